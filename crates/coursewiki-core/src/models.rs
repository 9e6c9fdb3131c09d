use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::account::{Account, Role};
use crate::session::Session;

/// Request payload for POST /users/authenticate
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthenticatePayload {
    pub email: String,
    pub password: String,
}

/// Request payload for POST /users/refresh-token
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenPayload {
    #[serde(default)]
    pub refresh_token: String,
}

/// Request payload for POST /users/revoke-token
#[derive(Debug, Serialize, Deserialize)]
pub struct RevokeTokenPayload {
    #[serde(default)]
    pub token: String,
}

/// Request payload for POST /users/register
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    pub email: String,
    pub password: String,
    #[serde(alias = "nickName")]
    pub nickname: String,
    #[serde(default)]
    pub accept_terms: bool,
}

/// Request payload for POST /users/verify-email
#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyEmailPayload {
    pub email: String,
    pub token: String,
}

/// Request payload for POST /users/forgot-password
#[derive(Debug, Serialize, Deserialize)]
pub struct ForgotPasswordPayload {
    pub email: String,
}

/// Request payload for POST /users/validate-reset-token
#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateResetTokenPayload {
    pub email: String,
    pub token: String,
}

/// Request payload for POST /users/reset-password
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordPayload {
    pub email: String,
    pub token: String,
    pub password: String,
    #[serde(default)]
    pub confirm_password: Option<String>,
}

/// Request payload for POST /users (admin)
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateAccountPayload {
    pub email: String,
    pub password: String,
    #[serde(alias = "nickName")]
    pub nickname: String,
    #[serde(default)]
    pub role: Option<Role>,
}

/// Request payload for PUT /users/{id}
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccountPayload {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "nickName")]
    pub nickname: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub old_password: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
}

/// Public view of an account
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    pub id: Uuid,
    pub nickname: String,
    pub email: String,
    pub roles: Vec<String>,
    pub created: DateTime<Utc>,
    pub updated: Option<DateTime<Utc>>,
    pub is_verified: bool,
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            nickname: account.nickname.clone(),
            email: account.email.clone(),
            roles: account.role_names(),
            created: account.created,
            updated: account.updated,
            is_verified: account.is_verified(),
        }
    }
}

/// Response for authenticate and refresh-token
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateResponse {
    #[serde(flatten)]
    pub account: AccountResponse,
    pub jwt_token: String,
    pub refresh_token: String,
}

impl From<&Session> for AuthenticateResponse {
    fn from(session: &Session) -> Self {
        Self {
            account: AccountResponse::from(&session.account),
            jwt_token: session.access_token.clone(),
            refresh_token: session.refresh_token.token.clone(),
        }
    }
}

/// Plain message body
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_payload_deserialization() {
        let json = r#"{
            "email": "a@x.com",
            "password": "Password1!",
            "nickName": "alice",
            "acceptTerms": true
        }"#;

        let payload: RegisterPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.email, "a@x.com");
        assert_eq!(payload.nickname, "alice");
        assert!(payload.accept_terms);
    }

    #[test]
    fn test_refresh_payload_uses_camel_case() {
        let payload: RefreshTokenPayload = serde_json::from_str(r#"{"refreshToken":"abc"}"#).unwrap();
        assert_eq!(payload.refresh_token, "abc");
    }

    #[test]
    fn test_revoke_payload_tolerates_legacy_email() {
        let payload: RevokeTokenPayload = serde_json::from_str(r#"{"token":"abc","email":"a@x.com"}"#).unwrap();
        assert_eq!(payload.token, "abc");
    }

    #[test]
    fn test_authenticate_response_is_flat() {
        let mut account = Account::new("a@x.com", "alice", "hash".to_string(), Utc::now());
        account.roles.insert(Role::Admin);
        let response = AuthenticateResponse {
            account: AccountResponse::from(&account),
            jwt_token: "jwt".to_string(),
            refresh_token: "refresh".to_string(),
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["email"], "a@x.com");
        assert_eq!(json["roles"][0], "Admin");
        assert_eq!(json["isVerified"], false);
        assert_eq!(json["jwtToken"], "jwt");
        assert_eq!(json["refreshToken"], "refresh");
        assert!(json.get("passwordHash").is_none());
    }

    #[test]
    fn test_update_payload_role() {
        let payload: UpdateAccountPayload = serde_json::from_str(r#"{"role":"Admin","oldPassword":"x"}"#).unwrap();
        assert_eq!(payload.role, Some(Role::Admin));
        assert_eq!(payload.old_password.as_deref(), Some("x"));
    }
}
