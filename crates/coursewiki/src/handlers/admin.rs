use actix_web::{web, HttpRequest, HttpResponse};
use coursewiki_core::account::Account;
use coursewiki_core::error::AuthError;
use coursewiki_core::models::{AccountResponse, CreateAccountPayload, MessageResponse, UpdateAccountPayload};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::handlers::{require_access_token, ApiError, ApiResult};

async fn requester(req: &HttpRequest, app_state: &AppState) -> Result<Account, ApiError> {
    let claims = require_access_token(req, app_state)?;
    Ok(app_state.accounts.requester(&claims).await?)
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError(AuthError::bad_request("Invalid account id")))
}

/// GET /users (admin)
pub async fn get_all(app_state: web::Data<AppState>, req: HttpRequest) -> ApiResult {
    let requester = requester(&req, &app_state).await?;
    let accounts = app_state.accounts.list(&requester).await?;

    let body: Vec<AccountResponse> = accounts.iter().map(AccountResponse::from).collect();
    Ok(HttpResponse::Ok().json(body))
}

/// GET /users/self
pub async fn get_self(app_state: web::Data<AppState>, req: HttpRequest) -> ApiResult {
    let requester = requester(&req, &app_state).await?;
    Ok(HttpResponse::Ok().json(AccountResponse::from(&requester)))
}

/// GET /users/{id}
pub async fn get_by_id(app_state: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> ApiResult {
    let requester = requester(&req, &app_state).await?;
    let account = app_state.accounts.get(&requester, parse_id(&path)?).await?;
    Ok(HttpResponse::Ok().json(AccountResponse::from(&account)))
}

/// POST /users (admin)
pub async fn create(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Json<CreateAccountPayload>,
) -> ApiResult {
    let requester = requester(&req, &app_state).await?;
    let account = app_state.accounts.create(&requester, &payload).await?;
    Ok(HttpResponse::Ok().json(AccountResponse::from(&account)))
}

/// PUT /users/{id}
pub async fn update(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    payload: web::Json<UpdateAccountPayload>,
) -> ApiResult {
    let requester = requester(&req, &app_state).await?;
    let account = app_state
        .accounts
        .update(&requester, parse_id(&path)?, &payload)
        .await?;
    Ok(HttpResponse::Ok().json(AccountResponse::from(&account)))
}

/// DELETE /users/{id}
pub async fn delete(app_state: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> ApiResult {
    let requester = requester(&req, &app_state).await?;
    app_state.accounts.delete(&requester, parse_id(&path)?).await?;
    Ok(HttpResponse::Ok().json(MessageResponse::new("Account deleted successfully")))
}
