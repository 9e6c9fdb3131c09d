use std::sync::Arc;

use actix_web::{http::StatusCode, test, web, App};
use chrono::Duration;
use coursewiki_core::mailer::MemoryMailer;
use coursewiki_core::repository::InMemoryAccountRepository;
use coursewiki_lib::app_state::{AppState, AuthSettings};
use coursewiki_lib::server::configure_routes;
use serde_json::{json, Value};

fn settings() -> AuthSettings {
    AuthSettings {
        jwt_secret: "integration-test-secret-0123456789abcdef".to_string(),
        jwt_issuer: "coursewiki-test".to_string(),
        access_token_ttl: Duration::minutes(15),
        refresh_token_lifetime: Duration::days(7),
        refresh_token_retention: Duration::days(2),
        verification_validity: Duration::hours(24),
        reset_validity: Duration::hours(24),
        revoke_chain_on_reuse: true,
    }
}

fn state() -> (web::Data<AppState>, Arc<MemoryMailer>) {
    let mailer = Arc::new(MemoryMailer::new());
    let state = AppState::new(Arc::new(InMemoryAccountRepository::new()), mailer.clone(), &settings()).unwrap();
    (web::Data::new(state), mailer)
}

/// Token printed in a mail sent without an `Origin` header.
fn mailed_token(mailer: &MemoryMailer, to: &str) -> String {
    let body = mailer.last_to(to).unwrap().html_body;
    let start = body.rfind("<code>").unwrap() + "<code>".len();
    let end = start + body[start..].find("</code>").unwrap();
    body[start..end].to_string()
}

macro_rules! post {
    ($app:expr, $uri:expr, $body:expr) => {{
        let req = test::TestRequest::post().uri($uri).set_json($body).to_request();
        let resp = test::call_service(&$app, req).await;
        let status = resp.status();
        let body: Value = test::read_body_json(resp).await;
        (status, body)
    }};
}

#[actix_web::test]
async fn test_register_verify_login_and_rotate() {
    let (data, mailer) = state();
    let app = test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

    let (status, _) = post!(
        app,
        "/users/register",
        json!({"email": "a@x.com", "password": "Password1!", "nickname": "alice", "acceptTerms": true})
    );
    assert_eq!(status, StatusCode::OK);

    // Not verified yet.
    let (status, _) = post!(app, "/users/authenticate", json!({"email": "a@x.com", "password": "Password1!"}));
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let token = mailed_token(&mailer, "a@x.com");
    let (status, _) = post!(app, "/users/verify-email", json!({"email": "a@x.com", "token": token}));
    assert_eq!(status, StatusCode::OK);

    let (status, login) = post!(app, "/users/authenticate", json!({"email": "a@x.com", "password": "Password1!"}));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(login["roles"], json!(["Admin"]));
    assert_eq!(login["isVerified"], json!(true));
    let original = login["refreshToken"].as_str().unwrap().to_string();
    assert_eq!(original.len(), 80);

    let (status, rotated) = post!(app, "/users/refresh-token", json!({"refreshToken": original}));
    assert_eq!(status, StatusCode::OK);
    let successor = rotated["refreshToken"].as_str().unwrap().to_string();
    assert_ne!(successor, original);

    let (status, body) = post!(app, "/users/refresh-token", json!({"refreshToken": original}));
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    // Reuse of the superseded token cut off its successor as well.
    let (status, _) = post!(app, "/users/refresh-token", json!({"refreshToken": successor}));
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn test_second_account_is_plain_user() {
    let (data, mailer) = state();
    let app = test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

    for email in ["a@x.com", "b@x.com"] {
        let (status, _) = post!(
            app,
            "/users/register",
            json!({"email": email, "password": "Password1!", "nickname": "someone"})
        );
        assert_eq!(status, StatusCode::OK);
        let token = mailed_token(&mailer, email);
        let (status, _) = post!(app, "/users/verify-email", json!({"email": email, "token": token}));
        assert_eq!(status, StatusCode::OK);
    }

    let (status, login) = post!(app, "/users/authenticate", json!({"email": "b@x.com", "password": "Password1!"}));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(login["roles"], json!(["User"]));

    let jwt = login["jwtToken"].as_str().unwrap().to_string();
    let req = test::TestRequest::get()
        .uri("/users/self")
        .insert_header(("Authorization", format!("Bearer {jwt}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let me: Value = test::read_body_json(resp).await;
    assert_eq!(me["email"], "b@x.com");

    // Listing every account needs Admin.
    let req = test::TestRequest::get()
        .uri("/users")
        .insert_header(("Authorization", format!("Bearer {jwt}")))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

    let req = test::TestRequest::get().uri("/users/self").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn test_responses_do_not_reveal_registered_emails() {
    let (data, _mailer) = state();
    let app = test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

    let register = json!({"email": "a@x.com", "password": "Password1!", "nickname": "alice"});
    let (first_status, first) = post!(app, "/users/register", register.clone());
    let (second_status, second) = post!(app, "/users/register", register);
    assert_eq!(first_status, StatusCode::OK);
    assert_eq!(second_status, first_status);
    assert_eq!(second, first);

    let (known_status, known) = post!(app, "/users/forgot-password", json!({"email": "a@x.com"}));
    let (unknown_status, unknown) = post!(app, "/users/forgot-password", json!({"email": "nobody@x.com"}));
    assert_eq!(known_status, StatusCode::OK);
    assert_eq!(unknown_status, known_status);
    assert_eq!(unknown, known);
}

#[actix_web::test]
async fn test_password_reset_over_http() {
    let (data, mailer) = state();
    let app = test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

    post!(
        app,
        "/users/register",
        json!({"email": "a@x.com", "password": "Password1!", "nickname": "alice"})
    );
    let token = mailed_token(&mailer, "a@x.com");
    post!(app, "/users/verify-email", json!({"email": "a@x.com", "token": token}));

    post!(app, "/users/forgot-password", json!({"email": "a@x.com"}));
    let reset = mailed_token(&mailer, "a@x.com");

    let (status, _) = post!(app, "/users/validate-reset-token", json!({"email": "a@x.com", "token": reset}));
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post!(
        app,
        "/users/reset-password",
        json!({"email": "a@x.com", "token": reset, "password": "Changed2?", "confirmPassword": "Changed2?"})
    );
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post!(app, "/users/authenticate", json!({"email": "a@x.com", "password": "Password1!"}));
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = post!(app, "/users/authenticate", json!({"email": "a@x.com", "password": "Changed2?"}));
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post!(
        app,
        "/users/reset-password",
        json!({"email": "a@x.com", "token": reset, "password": "Again3#x"})
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_revoke_requires_bearer_and_ownership() {
    let (data, mailer) = state();
    let app = test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

    post!(
        app,
        "/users/register",
        json!({"email": "a@x.com", "password": "Password1!", "nickname": "alice"})
    );
    let token = mailed_token(&mailer, "a@x.com");
    post!(app, "/users/verify-email", json!({"email": "a@x.com", "token": token}));
    let (_, login) = post!(app, "/users/authenticate", json!({"email": "a@x.com", "password": "Password1!"}));
    let jwt = login["jwtToken"].as_str().unwrap().to_string();
    let refresh = login["refreshToken"].as_str().unwrap().to_string();

    let (status, _) = post!(app, "/users/revoke-token", json!({"token": refresh}));
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = test::TestRequest::post()
        .uri("/users/revoke-token")
        .insert_header(("Authorization", format!("Bearer {jwt}")))
        .set_json(json!({"token": refresh}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let (status, _) = post!(app, "/users/refresh-token", json!({"refreshToken": refresh}));
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
