use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::account::{Account, Role};
use crate::email::normalize_email;
use crate::error::{AuthError, TokenError};

pub const ACCESS_TOKEN_AUDIENCE: &str = "coursewiki-api";
pub const ONE_SHOT_AUDIENCE: &str = "coursewiki-one-shot";
pub const ACCESS_TOKEN_TYPE: &str = "access";

/// HS256 keys shorter than the digest size are rejected.
pub const MIN_SECRET_LEN: usize = 32;

/// Claims carried by an access token.
///
/// `roles` is a snapshot taken at issuance; it is not re-checked until the
/// next token is minted through the refresh flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Issuer
    pub iss: String,
    /// Subject (account ID)
    pub sub: String,
    /// Audience
    pub aud: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Always "access"
    pub token_type: String,
    pub roles: Vec<Role>,
}

impl AccessClaims {
    pub fn account_id(&self) -> Result<Uuid, TokenError> {
        Uuid::parse_str(&self.sub).map_err(|_| TokenError::Invalid)
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// What a one-shot token is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OneShotPurpose {
    VerifyEmail,
    ResetPassword,
}

impl OneShotPurpose {
    fn as_str(&self) -> &'static str {
        match self {
            OneShotPurpose::VerifyEmail => "verify_email",
            OneShotPurpose::ResetPassword => "reset_password",
        }
    }
}

/// Claims of an email-verification or password-reset token.
///
/// `stamp` fingerprints the account state the token is allowed to consume.
/// Consuming the token changes that state, which invalidates the token.
#[derive(Debug, Serialize, Deserialize)]
struct OneShotClaims {
    iss: String,
    sub: String,
    aud: String,
    iat: i64,
    exp: i64,
    purpose: OneShotPurpose,
    stamp: String,
}

/// Signs and verifies access tokens and one-shot tokens with a symmetric secret.
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    access_ttl: Duration,
}

impl TokenCodec {
    pub fn new(secret: &[u8], issuer: impl Into<String>, access_ttl: Duration) -> anyhow::Result<Self> {
        if secret.len() < MIN_SECRET_LEN {
            anyhow::bail!("JWT secret must be at least {MIN_SECRET_LEN} bytes");
        }
        if access_ttl <= Duration::zero() {
            anyhow::bail!("Access token lifetime must be positive");
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
            access_ttl,
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn issue_access_token(&self, account: &Account) -> Result<String, AuthError> {
        self.issue_access_token_at(account, Utc::now())
    }

    /// Mint an access token as if issued at `now`.
    pub fn issue_access_token_at(&self, account: &Account, now: DateTime<Utc>) -> Result<String, AuthError> {
        let claims = AccessClaims {
            iss: self.issuer.clone(),
            sub: account.id.to_string(),
            aud: ACCESS_TOKEN_AUDIENCE.to_string(),
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
            token_type: ACCESS_TOKEN_TYPE.to_string(),
            roles: account.roles.iter().copied().collect(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("Failed to sign access token: {e}")))
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let data = decode::<AccessClaims>(token, &self.decoding_key, &self.validation(ACCESS_TOKEN_AUDIENCE))
            .map_err(map_jwt_error)?;

        if data.claims.token_type != ACCESS_TOKEN_TYPE {
            return Err(TokenError::Invalid);
        }
        data.claims.account_id()?;

        Ok(data.claims)
    }

    /// Mint a one-shot token bound to the account's current state.
    pub fn issue_one_shot(
        &self,
        account: &Account,
        purpose: OneShotPurpose,
        expires: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let claims = OneShotClaims {
            iss: self.issuer.clone(),
            sub: account.id.to_string(),
            aud: ONE_SHOT_AUDIENCE.to_string(),
            iat: Utc::now().timestamp(),
            exp: expires.timestamp(),
            purpose,
            stamp: account_stamp(account, purpose),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("Failed to sign one-shot token: {e}")))
    }

    /// Check that `token` was issued for this account and purpose, and that
    /// the account has not moved on since.
    pub fn verify_one_shot(&self, account: &Account, purpose: OneShotPurpose, token: &str) -> Result<(), TokenError> {
        let data = decode::<OneShotClaims>(token.trim(), &self.decoding_key, &self.validation(ONE_SHOT_AUDIENCE))
            .map_err(map_jwt_error)?;
        let claims = data.claims;

        if claims.purpose != purpose || claims.sub != account.id.to_string() {
            return Err(TokenError::Invalid);
        }
        if claims.stamp != account_stamp(account, purpose) {
            return Err(TokenError::Invalid);
        }

        Ok(())
    }

    fn validation(&self, audience: &str) -> Validation {
        // Pinning the algorithm rejects `none` and algorithm substitution.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[audience]);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation
    }
}

fn map_jwt_error(e: jsonwebtoken::errors::Error) -> TokenError {
    match e.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Invalid,
    }
}

/// SHA-256 fingerprint of the account fields a one-shot token may consume.
fn account_stamp(account: &Account, purpose: OneShotPurpose) -> String {
    let mut hasher = Sha256::new();
    hasher.update(purpose.as_str());
    hasher.update(b"|");
    hasher.update(account.id.as_bytes());
    hasher.update(b"|");
    hasher.update(normalize_email(&account.email));
    hasher.update(b"|");
    hasher.update(&account.password_hash);
    hasher.update(b"|");
    match purpose {
        OneShotPurpose::VerifyEmail => {
            hasher.update(account.verified.map(|t| t.timestamp_millis()).unwrap_or(0).to_le_bytes());
        }
        OneShotPurpose::ResetPassword => {
            hasher.update(
                account
                    .reset_token_expires
                    .map(|t| t.timestamp_millis())
                    .unwrap_or(0)
                    .to_le_bytes(),
            );
        }
    }
    hex::encode(hasher.finalize())
}
