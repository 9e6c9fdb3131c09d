use actix_web::{web, HttpRequest, HttpResponse};
use coursewiki_core::models::{
    AuthenticatePayload, AuthenticateResponse, MessageResponse, RefreshTokenPayload, RevokeTokenPayload,
};

use crate::app_state::AppState;
use crate::handlers::{client_ip, require_access_token, ApiResult};

/// POST /users/authenticate
pub async fn authenticate(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Json<AuthenticatePayload>,
) -> ApiResult {
    let session = app_state
        .sessions
        .login(&payload.email, &payload.password, &client_ip(&req))
        .await?;

    log::info!("Account authenticated: {}", session.account.id);
    Ok(HttpResponse::Ok().json(AuthenticateResponse::from(&session)))
}

/// POST /users/refresh-token
pub async fn refresh_token(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Json<RefreshTokenPayload>,
) -> ApiResult {
    let session = app_state
        .sessions
        .refresh(&payload.refresh_token, &client_ip(&req))
        .await?;

    Ok(HttpResponse::Ok().json(AuthenticateResponse::from(&session)))
}

/// POST /users/revoke-token
///
/// Users may revoke their own tokens; admins may revoke any.
pub async fn revoke_token(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Json<RevokeTokenPayload>,
) -> ApiResult {
    let claims = require_access_token(&req, &app_state)?;

    app_state
        .sessions
        .revoke(&payload.token, &client_ip(&req), &claims)
        .await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new("Token revoked")))
}
