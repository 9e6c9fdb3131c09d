use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use migration::MigratorTrait;
use sea_orm::Database;

use crate::{
    app_state::{AppState, AuthSettings},
    config::ServeConfig,
    db::SeaOrmAccountRepository,
    handlers,
    mail::LogMailer,
};

/// Mount every `/users` route.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/users")
            .route("/authenticate", web::post().to(handlers::session::authenticate))
            .route("/refresh-token", web::post().to(handlers::session::refresh_token))
            .route("/revoke-token", web::post().to(handlers::session::revoke_token))
            .route("/register", web::post().to(handlers::account::register))
            .route("/verify-email", web::post().to(handlers::account::verify_email))
            .route("/forgot-password", web::post().to(handlers::account::forgot_password))
            .route(
                "/validate-reset-token",
                web::post().to(handlers::account::validate_reset_token),
            )
            .route("/reset-password", web::post().to(handlers::account::reset_password))
            .route("", web::get().to(handlers::admin::get_all))
            .route("", web::post().to(handlers::admin::create))
            .route("/self", web::get().to(handlers::admin::get_self))
            .route("/{id}", web::get().to(handlers::admin::get_by_id))
            .route("/{id}", web::put().to(handlers::admin::update))
            .route("/{id}", web::delete().to(handlers::admin::delete)),
    );
}

pub async fn run_server(config: ServeConfig) -> anyhow::Result<()> {
    log::info!("Starting CourseWiki API Server...");

    log::info!("Connecting to database...");
    let db = Database::connect(&config.database_url).await?;

    log::info!("Running database migrations...");
    migration::Migrator::up(&db, None).await?;
    log::info!("Database migrations completed");

    let settings = AuthSettings::from_config(&config);
    let app_state = web::Data::new(AppState::new(
        Arc::new(SeaOrmAccountRepository::new(db)),
        Arc::new(LogMailer),
        &settings,
    )?);
    log::info!(
        "Access tokens valid for {} minutes, refresh tokens for {} days",
        config.access_token_ttl_minutes,
        config.refresh_token_lifetime_days
    );

    let bind_address = config.bind_address.clone();
    let cors_origins = config.cors_origin_list();
    log::info!("Listening on {}", bind_address);

    HttpServer::new(move || {
        let mut cors = Cors::default()
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                actix_web::http::header::AUTHORIZATION,
                actix_web::http::header::ACCEPT,
                actix_web::http::header::CONTENT_TYPE,
            ])
            .max_age(3600);

        for origin in &cors_origins {
            cors = cors.allowed_origin(origin);
        }

        App::new()
            .app_data(app_state.clone())
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}
