use actix_web::{web, HttpRequest, HttpResponse};
use coursewiki_core::error::AuthError;
use coursewiki_core::models::{
    ForgotPasswordPayload, MessageResponse, RegisterPayload, ResetPasswordPayload, ValidateResetTokenPayload,
    VerifyEmailPayload,
};

use crate::app_state::AppState;
use crate::handlers::{request_origin, ApiResult};

/// POST /users/register
///
/// A duplicate email gets the same response; the difference only shows up in
/// the mailbox.
pub async fn register(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Json<RegisterPayload>,
) -> ApiResult {
    let origin = request_origin(&req);
    app_state
        .accounts
        .register(
            &payload.email,
            &payload.password,
            &payload.nickname,
            payload.accept_terms,
            origin.as_deref(),
        )
        .await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new(
        "Registration successful, please check your email for verification instructions",
    )))
}

/// POST /users/verify-email
pub async fn verify_email(app_state: web::Data<AppState>, payload: web::Json<VerifyEmailPayload>) -> ApiResult {
    app_state.accounts.verify_email(&payload.email, &payload.token).await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new("Verification successful, you can now login")))
}

/// POST /users/forgot-password
pub async fn forgot_password(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Json<ForgotPasswordPayload>,
) -> ApiResult {
    let origin = request_origin(&req);
    app_state
        .accounts
        .forgot_password(&payload.email, origin.as_deref())
        .await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new(
        "Please check your email for password reset instructions",
    )))
}

/// POST /users/validate-reset-token
pub async fn validate_reset_token(
    app_state: web::Data<AppState>,
    payload: web::Json<ValidateResetTokenPayload>,
) -> ApiResult {
    app_state
        .accounts
        .validate_reset_token(&payload.email, &payload.token)
        .await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new("Token is valid")))
}

/// POST /users/reset-password
pub async fn reset_password(
    app_state: web::Data<AppState>,
    payload: web::Json<ResetPasswordPayload>,
) -> ApiResult {
    if let Some(confirm) = &payload.confirm_password {
        if confirm != &payload.password {
            return Err(AuthError::bad_request("Passwords do not match").into());
        }
    }

    app_state
        .accounts
        .reset_password(&payload.email, &payload.token, &payload.password)
        .await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new("Password reset successful, you can now login")))
}
