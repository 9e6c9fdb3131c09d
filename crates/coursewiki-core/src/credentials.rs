use std::sync::{Arc, OnceLock};

use crate::account::Account;
use crate::error::AuthError;
use crate::password;
use crate::repository::AccountRepository;

pub(crate) const INVALID_CREDENTIALS: &str = "Email or password is incorrect";

/// Hash checked when no account matches, so a miss costs the same as a wrong password.
fn dummy_hash() -> Option<&'static str> {
    static DUMMY: OnceLock<Option<String>> = OnceLock::new();
    DUMMY
        .get_or_init(|| password::hash_password("coursewiki-dummy-password").ok())
        .as_deref()
}

/// Gate in front of the login path: email + password must match a verified account.
#[derive(Clone)]
pub struct CredentialVerifier {
    repo: Arc<dyn AccountRepository>,
}

impl CredentialVerifier {
    pub fn new(repo: Arc<dyn AccountRepository>) -> Self {
        Self { repo }
    }

    /// Every failure is reported as the same `Unauthorized` error.
    pub async fn verify(&self, email: &str, password: &str) -> Result<Account, AuthError> {
        let Some(account) = self.repo.find_by_email(email).await? else {
            if let Some(hash) = dummy_hash() {
                let _ = password::verify_password(password, hash);
            }
            log::warn!("Login failed: no account for submitted email");
            return Err(AuthError::unauthorized(INVALID_CREDENTIALS));
        };

        let password_valid = password::verify_password(password, &account.password_hash)
            .map_err(|e| {
                log::error!("Failed to verify password hash for account {}: {e}", account.id);
                AuthError::Internal(e)
            })?;

        if !password_valid {
            log::warn!("Login failed: wrong password for account {}", account.id);
            return Err(AuthError::unauthorized(INVALID_CREDENTIALS));
        }

        if !account.is_verified() {
            log::warn!("Login failed: account {} is not verified", account.id);
            return Err(AuthError::unauthorized(INVALID_CREDENTIALS));
        }

        Ok(account)
    }
}
