//! Registration, email verification, password reset and account administration.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::account::{Account, Role};
use crate::email::{normalize_email, validate_email, validate_nickname};
use crate::error::{AuthError, RepositoryError};
use crate::mailer::{deliver, templates, Mailer};
use crate::models::{CreateAccountPayload, UpdateAccountPayload};
use crate::password::{hash_password, validate_password_strength, verify_password};
use crate::repository::{modify_account, AccountRepository};
use crate::token::{AccessClaims, OneShotPurpose, TokenCodec};

const VERIFICATION_FAILED: &str = "Email verify failed, please try again.";
const RESET_TOKEN_INVALID: &str = "Token is invalid";

#[derive(Debug, Clone)]
pub struct LifecyclePolicy {
    pub verification_validity: Duration,
    /// How long a password-reset token stays usable after it is requested.
    pub reset_validity: Duration,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            verification_validity: Duration::days(1),
            reset_validity: Duration::days(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Created(Uuid),
    /// The email already had an account; the owner was notified by email.
    AlreadyRegistered,
}

/// Initial roles for a newly registered account.
///
/// The very first account bootstraps the installation as Admin.
pub fn bootstrap_roles(existing_accounts: u64) -> BTreeSet<Role> {
    let role = if existing_accounts == 0 { Role::Admin } else { Role::User };
    BTreeSet::from([role])
}

#[derive(Clone)]
pub struct AccountService {
    repo: Arc<dyn AccountRepository>,
    codec: Arc<TokenCodec>,
    mailer: Arc<dyn Mailer>,
    policy: LifecyclePolicy,
}

impl AccountService {
    pub fn new(
        repo: Arc<dyn AccountRepository>,
        codec: Arc<TokenCodec>,
        mailer: Arc<dyn Mailer>,
        policy: LifecyclePolicy,
    ) -> Self {
        Self {
            repo,
            codec,
            mailer,
            policy,
        }
    }

    /// Register a new account and send its verification email.
    ///
    /// A duplicate email yields the same `Ok` shape as a fresh registration;
    /// only the mailbox owner learns the difference.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        nickname: &str,
        accept_terms: bool,
        origin: Option<&str>,
    ) -> Result<RegisterOutcome, AuthError> {
        validate_email(email).map_err(AuthError::bad_request)?;
        validate_nickname(nickname).map_err(AuthError::bad_request)?;
        // Checked before the existence lookup so a weak password is rejected
        // the same way for known and unknown emails.
        validate_password_strength(password).map_err(AuthError::bad_request)?;

        // Hashed up front so known and unknown emails take equally long.
        let password_hash = hash_password(password)?;

        let email = email.trim();
        if self.repo.find_by_email(email).await?.is_some() {
            log::info!("Registration for an already registered email");
            deliver(self.mailer.as_ref(), templates::already_registered(email, origin)).await;
            return Ok(RegisterOutcome::AlreadyRegistered);
        }

        let now = Utc::now();
        let mut account = Account::new(email, nickname, password_hash, now);
        account.accept_terms = accept_terms;
        account.roles = bootstrap_roles(self.repo.count().await?);

        let account = match self.repo.insert(account).await {
            Ok(account) => account,
            Err(RepositoryError::EmailTaken) => {
                deliver(self.mailer.as_ref(), templates::already_registered(email, origin)).await;
                return Ok(RegisterOutcome::AlreadyRegistered);
            }
            Err(e) => return Err(e.into()),
        };

        let token = self.codec.issue_one_shot(
            &account,
            OneShotPurpose::VerifyEmail,
            now + self.policy.verification_validity,
        )?;
        deliver(self.mailer.as_ref(), templates::verification(&account.email, &token, origin)).await;

        log::info!(
            "Account registered: {} (roles: {:?})",
            account.id,
            account.role_names()
        );
        Ok(RegisterOutcome::Created(account.id))
    }

    pub async fn verify_email(&self, email: &str, token: &str) -> Result<(), AuthError> {
        let account = self
            .repo
            .find_by_email(email)
            .await?
            .ok_or_else(|| AuthError::bad_request(VERIFICATION_FAILED))?;

        let codec = self.codec.as_ref();
        let (account, ()) = modify_account(self.repo.as_ref(), account, |a| {
            codec
                .verify_one_shot(a, OneShotPurpose::VerifyEmail, token)
                .map_err(|_| AuthError::bad_request(VERIFICATION_FAILED))?;
            let now = Utc::now();
            a.verified = Some(now);
            a.updated = Some(now);
            Ok(())
        })
        .await?;

        log::info!("Email verified for account {}", account.id);
        Ok(())
    }

    /// Start a password reset. Succeeds whether or not the email is known.
    pub async fn forgot_password(&self, email: &str, origin: Option<&str>) -> Result<(), AuthError> {
        validate_email(email).map_err(AuthError::bad_request)?;

        let Some(account) = self.repo.find_by_email(email).await? else {
            log::debug!("Password reset requested for an unknown email");
            return Ok(());
        };

        let expires = Utc::now() + self.policy.reset_validity;
        let (account, ()) = modify_account(self.repo.as_ref(), account, |a| {
            a.reset_token_expires = Some(expires);
            Ok(())
        })
        .await?;

        let token = self
            .codec
            .issue_one_shot(&account, OneShotPurpose::ResetPassword, expires)?;
        deliver(self.mailer.as_ref(), templates::password_reset(&account.email, &token, origin)).await;

        log::info!("Password reset issued for account {}", account.id);
        Ok(())
    }

    pub async fn validate_reset_token(&self, email: &str, token: &str) -> Result<(), AuthError> {
        let account = self
            .repo
            .find_by_email(email)
            .await?
            .ok_or_else(|| AuthError::bad_request(RESET_TOKEN_INVALID))?;
        check_reset_token(&self.codec, &account, token)
    }

    pub async fn reset_password(&self, email: &str, token: &str, new_password: &str) -> Result<(), AuthError> {
        let account = self
            .repo
            .find_by_email(email)
            .await?
            .ok_or_else(|| AuthError::bad_request(RESET_TOKEN_INVALID))?;
        check_reset_token(&self.codec, &account, token)?;
        validate_password_strength(new_password).map_err(AuthError::bad_request)?;

        let password_hash = hash_password(new_password)?;
        let codec = self.codec.as_ref();
        let (account, ()) = modify_account(self.repo.as_ref(), account, |a| {
            check_reset_token(codec, a, token)?;
            let now = Utc::now();
            a.password_hash = password_hash.clone();
            a.password_reset = Some(now);
            a.reset_token_expires = None;
            a.updated = Some(now);
            Ok(())
        })
        .await?;

        log::info!("Password reset completed for account {}", account.id);
        Ok(())
    }

    /// Resolve the account behind an access token.
    pub async fn requester(&self, claims: &AccessClaims) -> Result<Account, AuthError> {
        let id = claims
            .account_id()
            .map_err(|_| AuthError::unauthorized("Unauthorized"))?;
        self.repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| AuthError::unauthorized("Unauthorized"))
    }

    pub async fn list(&self, requester: &Account) -> Result<Vec<Account>, AuthError> {
        require_admin(requester)?;
        Ok(self.repo.list().await?)
    }

    pub async fn get(&self, requester: &Account, id: Uuid) -> Result<Account, AuthError> {
        require_self_or_admin(requester, id)?;
        self.repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| AuthError::not_found("Account not found"))
    }

    /// Admin-created accounts skip email verification.
    pub async fn create(&self, requester: &Account, payload: &CreateAccountPayload) -> Result<Account, AuthError> {
        require_admin(requester)?;
        validate_email(&payload.email).map_err(AuthError::bad_request)?;
        validate_nickname(&payload.nickname).map_err(AuthError::bad_request)?;
        validate_password_strength(&payload.password).map_err(AuthError::bad_request)?;

        let already_registered = || AuthError::bad_request(format!("Email '{}' is already registered", payload.email.trim()));
        if self.repo.find_by_email(&payload.email).await?.is_some() {
            return Err(already_registered());
        }

        let now = Utc::now();
        let mut account = Account::new(&payload.email, &payload.nickname, hash_password(&payload.password)?, now);
        account.verified = Some(now);
        account.roles = BTreeSet::from([payload.role.unwrap_or(Role::User)]);

        match self.repo.insert(account).await {
            Ok(account) => {
                log::info!("Account {} created by admin {}", account.id, requester.id);
                Ok(account)
            }
            Err(RepositoryError::EmailTaken) => Err(already_registered()),
            Err(e) => Err(e.into()),
        }
    }

    /// Users may update themselves; changing the password or email needs the
    /// current password. Admins may update anyone and grant roles.
    pub async fn update(
        &self,
        requester: &Account,
        id: Uuid,
        payload: &UpdateAccountPayload,
    ) -> Result<Account, AuthError> {
        require_self_or_admin(requester, id)?;
        let is_admin = requester.is_admin();

        let email = non_empty(payload.email.as_deref());
        let new_password = non_empty(payload.password.as_deref());
        let changes_credentials = new_password.is_some()
            || email.is_some_and(|e| normalize_email(e) != normalize_email(&requester.email));
        if !is_admin && changes_credentials {
            let old_password = payload.old_password.as_deref().unwrap_or_default();
            if !verify_password(old_password, &requester.password_hash)? {
                return Err(AuthError::bad_request("Wrong Password!"));
            }
        }
        let role = if is_admin { payload.role } else { None };

        let target = self
            .repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| AuthError::not_found("Account not found"))?;

        if let Some(email) = email {
            validate_email(email).map_err(AuthError::bad_request)?;
            if normalize_email(email) != normalize_email(&target.email)
                && self.repo.find_by_email(email).await?.is_some()
            {
                return Err(AuthError::bad_request(format!("Email '{email}' is already taken")));
            }
        }
        let nickname = non_empty(payload.nickname.as_deref());
        if let Some(nickname) = nickname {
            validate_nickname(nickname).map_err(AuthError::bad_request)?;
        }
        let password_hash = match new_password {
            Some(password) => {
                validate_password_strength(password).map_err(AuthError::bad_request)?;
                Some(hash_password(password)?)
            }
            None => None,
        };

        let result = modify_account(self.repo.as_ref(), target, |a| {
            if let Some(email) = email {
                a.email = email.to_string();
            }
            if let Some(nickname) = nickname {
                a.nickname = nickname.to_string();
            }
            if let Some(hash) = &password_hash {
                a.password_hash = hash.clone();
            }
            if let Some(role) = role {
                a.roles.insert(role);
            }
            a.updated = Some(Utc::now());
            Ok(())
        })
        .await;

        match result {
            Ok((account, ())) => {
                log::info!("Account {} updated by {}", account.id, requester.id);
                Ok(account)
            }
            Err(AuthError::Conflict(_)) => Err(AuthError::bad_request(format!(
                "Email '{}' is already taken",
                email.unwrap_or_default()
            ))),
            Err(e) => Err(e),
        }
    }

    pub async fn delete(&self, requester: &Account, id: Uuid) -> Result<(), AuthError> {
        require_self_or_admin(requester, id)?;
        if !self.repo.delete(id).await? {
            return Err(AuthError::not_found("Account not found"));
        }
        log::info!("Account {} deleted by {}", id, requester.id);
        Ok(())
    }
}

fn check_reset_token(codec: &TokenCodec, account: &Account, token: &str) -> Result<(), AuthError> {
    match account.reset_token_expires {
        Some(expires) if Utc::now() <= expires => {}
        _ => return Err(AuthError::bad_request(RESET_TOKEN_INVALID)),
    }
    codec
        .verify_one_shot(account, OneShotPurpose::ResetPassword, token)
        .map_err(|_| AuthError::bad_request(RESET_TOKEN_INVALID))
}

fn require_admin(requester: &Account) -> Result<(), AuthError> {
    if requester.is_admin() {
        Ok(())
    } else {
        Err(AuthError::unauthorized("Unauthorized"))
    }
}

fn require_self_or_admin(requester: &Account, id: Uuid) -> Result<(), AuthError> {
    if requester.id == id || requester.is_admin() {
        Ok(())
    } else {
        Err(AuthError::unauthorized("Unauthorized"))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
