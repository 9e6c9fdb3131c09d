//! Refresh token rotation engine.
//!
//! Tokens live in their owning account's list. Finding the account for a
//! token string is the repository's job (it keeps a token index), everything
//! here operates on one account in memory and is persisted by the caller.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;

use crate::account::{Account, RefreshToken, TokenState};
use crate::error::AuthError;

/// Random bytes per token; hex-encoded into 80 characters.
pub const REFRESH_TOKEN_BYTES: usize = 40;

pub const DEFAULT_REFRESH_TOKEN_LIFETIME_DAYS: i64 = 7;
pub const DEFAULT_REFRESH_TOKEN_RETENTION_DAYS: i64 = 2;

pub(crate) const INVALID_TOKEN: &str = "Invalid token";

/// Generate an unguessable token string from the OS CSPRNG.
pub fn random_token_string() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode_upper(bytes)
}

/// Outcome of presenting a token that is not active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The account does not own the token.
    Unknown,
    Expired,
    /// Revoked without a successor (explicit revoke).
    Revoked,
    /// Revoked because it was rotated; presenting it again signals reuse.
    Reused { successor: String },
}

#[derive(Debug, Clone)]
pub struct RefreshTokenStore {
    /// Time from creation to expiry.
    lifetime: Duration,
    /// How long inactive tokens are kept after creation before pruning.
    retention: Duration,
}

impl Default for RefreshTokenStore {
    fn default() -> Self {
        Self::new(
            Duration::days(DEFAULT_REFRESH_TOKEN_LIFETIME_DAYS),
            Duration::days(DEFAULT_REFRESH_TOKEN_RETENTION_DAYS),
        )
    }
}

impl RefreshTokenStore {
    pub fn new(lifetime: Duration, retention: Duration) -> Self {
        Self { lifetime, retention }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn generate(&self, ip_address: &str, now: DateTime<Utc>) -> RefreshToken {
        RefreshToken {
            token: random_token_string(),
            created: now,
            created_by_ip: ip_address.to_string(),
            expires: now + self.lifetime,
            revoked: None,
            revoked_by_ip: None,
            replaced_by_token: None,
        }
    }

    /// Classify `token` within `account`, succeeding only for an active token.
    pub fn check_active(&self, account: &Account, token: &str, now: DateTime<Utc>) -> Result<(), Rejection> {
        let Some(found) = account.refresh_token(token) else {
            return Err(Rejection::Unknown);
        };

        match found.state(now) {
            TokenState::Active => Ok(()),
            TokenState::Expired => Err(Rejection::Expired),
            TokenState::Revoked => match &found.replaced_by_token {
                Some(successor) => Err(Rejection::Reused {
                    successor: successor.clone(),
                }),
                None => Err(Rejection::Revoked),
            },
        }
    }

    /// Append a fresh token to the account, returning a copy of it.
    pub fn issue(&self, account: &mut Account, ip_address: &str, now: DateTime<Utc>) -> RefreshToken {
        let token = self.generate(ip_address, now);
        account.refresh_tokens.push(token.clone());
        token
    }

    /// Consume the active `old` token and replace it with a new one.
    ///
    /// The old token is revoked and linked to its successor, which is appended
    /// to the same account.
    pub fn rotate(
        &self,
        account: &mut Account,
        old: &str,
        ip_address: &str,
        now: DateTime<Utc>,
    ) -> Result<RefreshToken, AuthError> {
        self.check_active(account, old, now)
            .map_err(|_| AuthError::unauthorized(INVALID_TOKEN))?;

        let successor = self.generate(ip_address, now);
        let current = account
            .refresh_token_mut(old)
            .ok_or_else(|| AuthError::unauthorized(INVALID_TOKEN))?;
        current.revoked = Some(now);
        current.revoked_by_ip = Some(ip_address.to_string());
        current.replaced_by_token = Some(successor.token.clone());

        account.refresh_tokens.push(successor.clone());
        Ok(successor)
    }

    /// Revoke an active token without issuing a replacement.
    pub fn revoke(&self, account: &mut Account, token: &str, ip_address: &str, now: DateTime<Utc>) -> Result<(), AuthError> {
        self.check_active(account, token, now)
            .map_err(|_| AuthError::unauthorized(INVALID_TOKEN))?;

        let current = account
            .refresh_token_mut(token)
            .ok_or_else(|| AuthError::unauthorized(INVALID_TOKEN))?;
        current.revoked = Some(now);
        current.revoked_by_ip = Some(ip_address.to_string());
        Ok(())
    }

    /// Revoke every still-active token downstream of `from` in its rotation
    /// chain. Returns how many tokens were revoked.
    pub fn revoke_chain(&self, account: &mut Account, from: &str, ip_address: &str, now: DateTime<Utc>) -> usize {
        let mut revoked = 0;
        let mut next = account.refresh_token(from).and_then(|t| t.replaced_by_token.clone());

        // A chain never revisits a token; the bound guards against corrupt links.
        let mut remaining = account.refresh_tokens.len();
        while let Some(current) = next {
            if remaining == 0 {
                break;
            }
            remaining -= 1;

            let Some(token) = account.refresh_token_mut(&current) else {
                break;
            };
            if token.is_active(now) {
                token.revoked = Some(now);
                token.revoked_by_ip = Some(ip_address.to_string());
                revoked += 1;
            }
            next = token.replaced_by_token.clone();
        }

        revoked
    }

    /// Drop inactive tokens created more than the retention window ago.
    /// Returns how many tokens were removed.
    pub fn prune(&self, account: &mut Account, now: DateTime<Utc>) -> usize {
        let before = account.refresh_tokens.len();
        let retention = self.retention;
        account
            .refresh_tokens
            .retain(|t| t.is_active(now) || t.created + retention > now);
        before - account.refresh_tokens.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account::new("a@x.com", "alice", "hash".to_string(), Utc::now())
    }

    #[test]
    fn test_generate_shape() {
        let store = RefreshTokenStore::default();
        let now = Utc::now();
        let token = store.generate("10.0.0.1", now);

        assert_eq!(token.token.len(), REFRESH_TOKEN_BYTES * 2);
        assert!(token.token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(token.expires, now + Duration::days(7));
        assert_eq!(token.created_by_ip, "10.0.0.1");
        assert!(token.is_active(now));
        assert_ne!(token.token, store.generate("10.0.0.1", now).token);
    }

    #[test]
    fn test_rotate_revokes_exactly_one_and_adds_one() {
        let store = RefreshTokenStore::default();
        let now = Utc::now();
        let mut account = account();
        let first = store.issue(&mut account, "1.1.1.1", now);

        let second = store.rotate(&mut account, &first.token, "2.2.2.2", now).unwrap();

        assert_eq!(account.refresh_tokens.len(), 2);
        assert_eq!(account.active_refresh_tokens(now).count(), 1);
        let old = account.refresh_token(&first.token).unwrap();
        assert_eq!(old.revoked, Some(now));
        assert_eq!(old.revoked_by_ip.as_deref(), Some("2.2.2.2"));
        assert_eq!(old.replaced_by_token.as_deref(), Some(second.token.as_str()));
    }

    #[test]
    fn test_rotated_token_is_reported_as_reuse() {
        let store = RefreshTokenStore::default();
        let now = Utc::now();
        let mut account = account();
        let first = store.issue(&mut account, "ip", now);
        let second = store.rotate(&mut account, &first.token, "ip", now).unwrap();

        assert_eq!(
            store.check_active(&account, &first.token, now),
            Err(Rejection::Reused { successor: second.token })
        );
        assert!(store.rotate(&mut account, &first.token, "ip", now).is_err());
    }

    #[test]
    fn test_revoke_is_terminal() {
        let store = RefreshTokenStore::default();
        let now = Utc::now();
        let mut account = account();
        let token = store.issue(&mut account, "ip", now);

        store.revoke(&mut account, &token.token, "ip", now).unwrap();
        assert_eq!(store.check_active(&account, &token.token, now), Err(Rejection::Revoked));
        assert!(matches!(
            store.revoke(&mut account, &token.token, "ip", now),
            Err(AuthError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_expired_token_cannot_rotate() {
        let store = RefreshTokenStore::default();
        let now = Utc::now();
        let mut account = account();
        let token = store.issue(&mut account, "ip", now - Duration::days(8));

        assert_eq!(store.check_active(&account, &token.token, now), Err(Rejection::Expired));
        assert!(store.rotate(&mut account, &token.token, "ip", now).is_err());
    }

    #[test]
    fn test_revoke_chain_stops_at_the_end() {
        let store = RefreshTokenStore::default();
        let now = Utc::now();
        let mut account = account();
        let a = store.issue(&mut account, "ip", now);
        let b = store.rotate(&mut account, &a.token, "ip", now).unwrap();
        let c = store.rotate(&mut account, &b.token, "ip", now).unwrap();
        let unrelated = store.issue(&mut account, "ip", now);

        assert_eq!(store.revoke_chain(&mut account, &a.token, "attacker", now), 1);
        assert!(!account.refresh_token(&c.token).unwrap().is_active(now));
        assert!(account.refresh_token(&unrelated.token).unwrap().is_active(now));
        assert_eq!(store.revoke_chain(&mut account, &a.token, "attacker", now), 0);
    }

    #[test]
    fn test_prune_removes_only_old_inactive_tokens() {
        let store = RefreshTokenStore::default();
        let now = Utc::now();
        let mut account = account();

        let old_revoked = store.issue(&mut account, "ip", now - Duration::days(3));
        store.revoke(&mut account, &old_revoked.token, "ip", now - Duration::days(3)).unwrap();
        let recent_revoked = store.issue(&mut account, "ip", now - Duration::hours(1));
        store.revoke(&mut account, &recent_revoked.token, "ip", now).unwrap();
        let expired = store.issue(&mut account, "ip", now - Duration::days(10));
        let active = store.issue(&mut account, "ip", now);

        assert_eq!(store.prune(&mut account, now), 2);
        assert!(!account.owns_token(&old_revoked.token));
        assert!(!account.owns_token(&expired.token));
        assert!(account.owns_token(&recent_revoked.token));
        assert!(account.owns_token(&active.token));

        let after_first = account.refresh_tokens.clone();
        assert_eq!(store.prune(&mut account, now), 0);
        assert_eq!(account.refresh_tokens, after_first);
    }
}
