use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::account::{Account, RefreshToken};
use crate::credentials::CredentialVerifier;
use crate::error::AuthError;
use crate::refresh::{Rejection, RefreshTokenStore, INVALID_TOKEN};
use crate::repository::{modify_account, AccountRepository};
use crate::token::{AccessClaims, TokenCodec};

/// A freshly minted token pair and the account state it was minted from.
#[derive(Debug, Clone)]
pub struct Session {
    pub account: Account,
    pub access_token: String,
    pub refresh_token: RefreshToken,
}

/// Login, refresh and revoke over the account's refresh-token list.
///
/// Per (account, token) the states are `Active -> Revoked`, with `Expired`
/// reached by time alone. Both are terminal.
#[derive(Clone)]
pub struct SessionManager {
    repo: Arc<dyn AccountRepository>,
    codec: Arc<TokenCodec>,
    store: RefreshTokenStore,
    credentials: CredentialVerifier,
    revoke_chain_on_reuse: bool,
}

impl SessionManager {
    pub fn new(repo: Arc<dyn AccountRepository>, codec: Arc<TokenCodec>, store: RefreshTokenStore) -> Self {
        Self {
            credentials: CredentialVerifier::new(repo.clone()),
            repo,
            codec,
            store,
            revoke_chain_on_reuse: true,
        }
    }

    /// Whether presenting a rotated token revokes the rest of its chain.
    pub fn with_chain_revocation(mut self, enabled: bool) -> Self {
        self.revoke_chain_on_reuse = enabled;
        self
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn store(&self) -> &RefreshTokenStore {
        &self.store
    }

    pub async fn login(&self, email: &str, password: &str, ip_address: &str) -> Result<Session, AuthError> {
        let account = self.credentials.verify(email, password).await?;
        let now = Utc::now();

        let (account, refresh_token) = modify_account(self.repo.as_ref(), account, |a| {
            let token = self.store.issue(a, ip_address, now);
            self.store.prune(a, now);
            Ok(token)
        })
        .await?;

        let access_token = self.codec.issue_access_token_at(&account, now)?;
        log::info!("Login successful for account {}", account.id);

        Ok(Session {
            account,
            access_token,
            refresh_token,
        })
    }

    /// Exchange an active refresh token for a new pair.
    ///
    /// The presented token is consumed: exactly one of several concurrent
    /// calls with the same token succeeds.
    pub async fn refresh(&self, token: &str, ip_address: &str) -> Result<Session, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::unauthorized(INVALID_TOKEN));
        }

        let account = self
            .repo
            .find_by_refresh_token(token)
            .await?
            .ok_or_else(|| AuthError::unauthorized(INVALID_TOKEN))?;
        let now = Utc::now();

        match self.store.check_active(&account, token, now) {
            Ok(()) => {}
            Err(Rejection::Reused { .. }) => {
                self.handle_reuse(account, token, ip_address, now).await;
                return Err(AuthError::unauthorized(INVALID_TOKEN));
            }
            Err(rejection) => {
                log::info!("Refresh rejected for account {}: {:?}", account.id, rejection);
                return Err(AuthError::unauthorized(INVALID_TOKEN));
            }
        }

        let (account, refresh_token) = modify_account(self.repo.as_ref(), account, |a| {
            let successor = self.store.rotate(a, token, ip_address, now)?;
            self.store.prune(a, now);
            Ok(successor)
        })
        .await?;

        // Roles are re-read from the stored account on every refresh.
        let access_token = self.codec.issue_access_token_at(&account, now)?;

        Ok(Session {
            account,
            access_token,
            refresh_token,
        })
    }

    /// Revoke a refresh token on behalf of `requester`.
    ///
    /// The requester must own the token or hold the Admin role.
    pub async fn revoke(&self, token: &str, ip_address: &str, requester: &AccessClaims) -> Result<(), AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::bad_request("Token is required"));
        }

        let requester_id = requester
            .account_id()
            .map_err(|_| AuthError::unauthorized("Unauthorized"))?;
        let requester = self
            .repo
            .find_by_id(requester_id)
            .await?
            .ok_or_else(|| AuthError::unauthorized("Unauthorized"))?;

        let owner = if requester.owns_token(token) {
            requester
        } else if requester.is_admin() {
            let (_, owner) = self.lookup_active(token).await?;
            owner
        } else {
            log::warn!("Account {} tried to revoke a token it does not own", requester.id);
            return Err(AuthError::unauthorized("Unauthorized"));
        };

        let now = Utc::now();
        let (owner, ()) = modify_account(self.repo.as_ref(), owner, |a| {
            self.store.revoke(a, token, ip_address, now)?;
            self.store.prune(a, now);
            Ok(())
        })
        .await?;

        log::info!("Refresh token revoked for account {} by {}", owner.id, requester_id);
        Ok(())
    }

    /// Resolve `token` through the token index, failing unless it is active.
    pub async fn lookup_active(&self, token: &str) -> Result<(RefreshToken, Account), AuthError> {
        let account = self
            .repo
            .find_by_refresh_token(token.trim())
            .await?
            .ok_or_else(|| AuthError::unauthorized(INVALID_TOKEN))?;

        let found = account
            .refresh_token(token.trim())
            .filter(|t| t.is_active(Utc::now()))
            .cloned()
            .ok_or_else(|| AuthError::unauthorized(INVALID_TOKEN))?;
        Ok((found, account))
    }

    /// Garbage-collect dead tokens of one account. Returns how many were removed.
    pub async fn prune(&self, account_id: Uuid) -> Result<usize, AuthError> {
        let account = self
            .repo
            .find_by_id(account_id)
            .await?
            .ok_or_else(|| AuthError::not_found("Account not found"))?;

        let now = Utc::now();
        if self.store.prune(&mut account.clone(), now) == 0 {
            return Ok(0);
        }

        let (_, removed) = modify_account(self.repo.as_ref(), account, |a| Ok(self.store.prune(a, now))).await?;
        Ok(removed)
    }

    /// A rotated token came back. Treat it as a leaked credential and cut off
    /// everything issued from it. The caller fails the request either way.
    async fn handle_reuse(&self, account: Account, token: &str, ip_address: &str, now: DateTime<Utc>) {
        log::warn!("Reuse of a rotated refresh token detected for account {}", account.id);
        if !self.revoke_chain_on_reuse {
            return;
        }

        let account_id = account.id;
        match modify_account(self.repo.as_ref(), account, |a| {
            Ok(self.store.revoke_chain(a, token, ip_address, now))
        })
        .await
        {
            Ok((_, revoked)) => {
                log::warn!("Revoked {revoked} downstream refresh token(s) for account {account_id}");
            }
            Err(e) => {
                log::error!("Failed to revoke refresh token chain for account {account_id}: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Role;
    use crate::password;
    use crate::repository::InMemoryAccountRepository;
    use chrono::Duration;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    async fn setup(verified: bool) -> (SessionManager, Arc<InMemoryAccountRepository>, Account) {
        let repo = Arc::new(InMemoryAccountRepository::new());
        let codec = Arc::new(TokenCodec::new(SECRET, "test", Duration::minutes(15)).unwrap());
        let hash = password::hash_password("Password1!").unwrap();
        let mut account = Account::new("a@x.com", "alice", hash, Utc::now());
        account.roles.insert(Role::User);
        if verified {
            account.verified = Some(Utc::now());
        }
        let account = repo.insert(account).await.unwrap();
        let manager = SessionManager::new(repo.clone(), codec, RefreshTokenStore::default());
        (manager, repo, account)
    }

    fn claims_for(manager: &SessionManager, account: &Account) -> AccessClaims {
        let token = manager.codec().issue_access_token(account).unwrap();
        manager.codec().verify_access_token(&token).unwrap()
    }

    #[tokio::test]
    async fn test_login_issues_pair_and_persists_token() {
        let (manager, repo, account) = setup(true).await;
        let session = manager.login("a@x.com", "Password1!", "1.2.3.4").await.unwrap();

        let claims = manager.codec().verify_access_token(&session.access_token).unwrap();
        assert_eq!(claims.account_id().unwrap(), account.id);
        assert_eq!(claims.roles, vec![Role::User]);

        let stored = repo.find_by_refresh_token(&session.refresh_token.token).await.unwrap().unwrap();
        assert_eq!(stored.id, account.id);
        assert_eq!(stored.refresh_tokens.len(), 1);
    }

    #[tokio::test]
    async fn test_login_unverified_is_unauthorized() {
        let (manager, _, _) = setup(false).await;
        assert!(matches!(
            manager.login("a@x.com", "Password1!", "ip").await,
            Err(AuthError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_with_superseded_token_fails() {
        let (manager, repo, account) = setup(true).await;
        let original = manager.login("a@x.com", "Password1!", "ip").await.unwrap();

        let rotated = manager.refresh(&original.refresh_token.token, "ip").await.unwrap();
        assert_ne!(rotated.refresh_token.token, original.refresh_token.token);

        let reused = manager.refresh(&original.refresh_token.token, "ip").await;
        assert!(matches!(reused, Err(AuthError::Unauthorized(_))));

        // Reuse detection cut off the successor as well.
        let stored = repo.find_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(stored.active_refresh_tokens(Utc::now()).count(), 0);
        assert!(manager.refresh(&rotated.refresh_token.token, "ip").await.is_err());
    }

    #[tokio::test]
    async fn test_reuse_without_chain_revocation_keeps_successor() {
        let (manager, _, _) = setup(true).await;
        let manager = manager.with_chain_revocation(false);
        let original = manager.login("a@x.com", "Password1!", "ip").await.unwrap();
        let rotated = manager.refresh(&original.refresh_token.token, "ip").await.unwrap();

        assert!(manager.refresh(&original.refresh_token.token, "ip").await.is_err());
        assert!(manager.refresh(&rotated.refresh_token.token, "ip").await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_picks_up_new_roles() {
        let (manager, repo, account) = setup(true).await;
        let session = manager.login("a@x.com", "Password1!", "ip").await.unwrap();

        let mut promoted = repo.find_by_id(account.id).await.unwrap().unwrap();
        promoted.roles.insert(Role::Admin);
        repo.save(&promoted).await.unwrap();

        let refreshed = manager.refresh(&session.refresh_token.token, "ip").await.unwrap();
        let claims = manager.codec().verify_access_token(&refreshed.access_token).unwrap();
        assert!(claims.has_role(Role::Admin));
    }

    #[tokio::test]
    async fn test_unknown_and_empty_tokens() {
        let (manager, _, _) = setup(true).await;
        assert!(matches!(manager.refresh("", "ip").await, Err(AuthError::Unauthorized(_))));
        assert!(matches!(manager.refresh("deadbeef", "ip").await, Err(AuthError::Unauthorized(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refresh_has_one_winner() {
        let (manager, repo, account) = setup(true).await;
        let manager = Arc::new(manager);
        let session = manager.login("a@x.com", "Password1!", "ip").await.unwrap();
        let token = session.refresh_token.token.clone();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                let token = token.clone();
                tokio::spawn(async move { manager.refresh(&token, "ip").await })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(e) => assert!(matches!(e, AuthError::Unauthorized(_)), "unexpected error: {e}"),
            }
        }
        assert_eq!(winners, 1);

        let stored = repo.find_by_id(account.id).await.unwrap().unwrap();
        assert!(stored.active_refresh_tokens(Utc::now()).count() <= 1);
        assert!(!stored.refresh_token(&token).unwrap().is_active(Utc::now()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refresh_of_distinct_sessions_all_succeed() {
        let (manager, repo, account) = setup(true).await;
        let manager = Arc::new(manager);

        let mut tokens = Vec::new();
        for _ in 0..8 {
            let session = manager.login("a@x.com", "Password1!", "ip").await.unwrap();
            tokens.push(session.refresh_token.token);
        }

        for _ in 0..5 {
            let handles: Vec<_> = tokens
                .iter()
                .cloned()
                .map(|token| {
                    let manager = manager.clone();
                    tokio::spawn(async move { manager.refresh(&token, "ip").await })
                })
                .collect();

            let mut successors = Vec::new();
            for handle in handles {
                let session = handle.await.unwrap().unwrap();
                successors.push(session.refresh_token.token);
            }
            tokens = successors;
        }

        let stored = repo.find_by_id(account.id).await.unwrap().unwrap();
        for token in &tokens {
            assert!(stored.refresh_token(token).unwrap().is_active(Utc::now()));
        }
    }

    #[tokio::test]
    async fn test_revoke_own_token_then_again() {
        let (manager, _, account) = setup(true).await;
        let session = manager.login("a@x.com", "Password1!", "ip").await.unwrap();
        let claims = claims_for(&manager, &account);

        manager.revoke(&session.refresh_token.token, "ip", &claims).await.unwrap();
        assert!(matches!(
            manager.revoke(&session.refresh_token.token, "ip", &claims).await,
            Err(AuthError::Unauthorized(_))
        ));
        assert!(matches!(
            manager.refresh(&session.refresh_token.token, "ip").await,
            Err(AuthError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_revoke_requires_ownership_or_admin() {
        let (manager, repo, _) = setup(true).await;
        let session = manager.login("a@x.com", "Password1!", "ip").await.unwrap();

        let mut other = Account::new("b@x.com", "bob", "hash".to_string(), Utc::now());
        other.roles.insert(Role::User);
        let other = repo.insert(other).await.unwrap();
        let other_claims = claims_for(&manager, &other);
        assert!(matches!(
            manager.revoke(&session.refresh_token.token, "ip", &other_claims).await,
            Err(AuthError::Unauthorized(_))
        ));

        let mut admin = Account::new("c@x.com", "carol", "hash".to_string(), Utc::now());
        admin.roles.insert(Role::Admin);
        let admin = repo.insert(admin).await.unwrap();
        let admin_claims = claims_for(&manager, &admin);
        manager.revoke(&session.refresh_token.token, "ip", &admin_claims).await.unwrap();

        assert!(matches!(
            manager.revoke("", "ip", &admin_claims).await,
            Err(AuthError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_lookup_active() {
        let (manager, _, account) = setup(true).await;
        let session = manager.login("a@x.com", "Password1!", "ip").await.unwrap();

        let (token, owner) = manager.lookup_active(&session.refresh_token.token).await.unwrap();
        assert_eq!(owner.id, account.id);
        assert_eq!(token.token, session.refresh_token.token);

        manager.refresh(&session.refresh_token.token, "ip").await.unwrap();
        assert!(manager.lookup_active(&session.refresh_token.token).await.is_err());
    }

    #[tokio::test]
    async fn test_prune_is_idempotent() {
        let (manager, repo, account) = setup(true).await;
        let mut stored = repo.find_by_id(account.id).await.unwrap().unwrap();
        let old = Utc::now() - Duration::days(10);
        manager.store().issue(&mut stored, "ip", old);
        manager.store().issue(&mut stored, "ip", Utc::now());
        repo.save(&stored).await.unwrap();

        assert_eq!(manager.prune(account.id).await.unwrap(), 1);
        assert_eq!(manager.prune(account.id).await.unwrap(), 0);
        let stored = repo.find_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_tokens.len(), 1);
    }
}
