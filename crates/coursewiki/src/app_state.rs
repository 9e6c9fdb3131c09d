use std::sync::Arc;

use chrono::Duration;
use coursewiki_core::lifecycle::{AccountService, LifecyclePolicy};
use coursewiki_core::mailer::Mailer;
use coursewiki_core::refresh::RefreshTokenStore;
use coursewiki_core::repository::AccountRepository;
use coursewiki_core::session::SessionManager;
use coursewiki_core::token::TokenCodec;

use crate::config::ServeConfig;

/// Token and lifecycle settings, resolved from the `serve` configuration.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub access_token_ttl: Duration,
    pub refresh_token_lifetime: Duration,
    pub refresh_token_retention: Duration,
    pub verification_validity: Duration,
    pub reset_validity: Duration,
    pub revoke_chain_on_reuse: bool,
}

impl AuthSettings {
    pub fn from_config(config: &ServeConfig) -> Self {
        Self {
            jwt_secret: config.jwt_secret.clone(),
            jwt_issuer: config.jwt_issuer.clone(),
            access_token_ttl: Duration::minutes(config.access_token_ttl_minutes),
            refresh_token_lifetime: Duration::days(config.refresh_token_lifetime_days),
            refresh_token_retention: Duration::days(config.refresh_token_ttl_days),
            verification_validity: Duration::hours(config.verification_token_validity_hours),
            reset_validity: Duration::hours(config.reset_token_validity_hours),
            revoke_chain_on_reuse: config.revoke_chain_on_reuse,
        }
    }
}

/// Shared application state
pub struct AppState {
    /// Login, refresh and revoke
    pub sessions: SessionManager,

    /// Registration, verification, password reset and account administration
    pub accounts: AccountService,

    /// Verifies bearer tokens on authenticated routes
    pub codec: Arc<TokenCodec>,
}

impl AppState {
    pub fn new(
        repo: Arc<dyn AccountRepository>,
        mailer: Arc<dyn Mailer>,
        settings: &AuthSettings,
    ) -> anyhow::Result<Self> {
        if settings.refresh_token_lifetime <= Duration::zero() {
            anyhow::bail!("Refresh token lifetime must be positive");
        }

        let codec = Arc::new(TokenCodec::new(
            settings.jwt_secret.as_bytes(),
            settings.jwt_issuer.clone(),
            settings.access_token_ttl,
        )?);

        let store = RefreshTokenStore::new(settings.refresh_token_lifetime, settings.refresh_token_retention);
        let sessions = SessionManager::new(repo.clone(), codec.clone(), store)
            .with_chain_revocation(settings.revoke_chain_on_reuse);

        let policy = LifecyclePolicy {
            verification_validity: settings.verification_validity,
            reset_validity: settings.reset_validity,
        };
        let accounts = AccountService::new(repo, codec.clone(), mailer, policy);

        Ok(Self {
            sessions,
            accounts,
            codec,
        })
    }
}
