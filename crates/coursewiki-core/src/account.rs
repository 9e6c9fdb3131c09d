use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Roles an account can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Admin => "Admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("Unknown role: {other}")),
        }
    }
}

/// Lifecycle state of a refresh token at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Active,
    Revoked,
    Expired,
}

/// A long-lived opaque credential owned by exactly one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshToken {
    pub token: String,
    pub created: DateTime<Utc>,
    pub created_by_ip: String,
    pub expires: DateTime<Utc>,
    pub revoked: Option<DateTime<Utc>>,
    pub revoked_by_ip: Option<String>,
    /// Token string of the rotation successor. Relation only, the successor
    /// lives in the same account's token list.
    pub replaced_by_token: Option<String>,
}

impl RefreshToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.is_some()
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked() && !self.is_expired(now)
    }

    pub fn state(&self, now: DateTime<Utc>) -> TokenState {
        if self.is_revoked() {
            TokenState::Revoked
        } else if self.is_expired(now) {
            TokenState::Expired
        } else {
            TokenState::Active
        }
    }
}

/// Identity record together with the refresh tokens it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub nickname: String,
    pub password_hash: String,
    pub accept_terms: bool,
    pub roles: BTreeSet<Role>,
    pub verified: Option<DateTime<Utc>>,
    pub reset_token_expires: Option<DateTime<Utc>>,
    pub password_reset: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
    pub updated: Option<DateTime<Utc>>,
    pub refresh_tokens: Vec<RefreshToken>,
    /// Optimistic-concurrency counter, bumped by every successful save.
    pub version: i64,
}

impl Account {
    pub fn new(email: &str, nickname: &str, password_hash: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            email: email.trim().to_string(),
            nickname: nickname.trim().to_string(),
            password_hash,
            accept_terms: false,
            roles: BTreeSet::new(),
            verified: None,
            reset_token_expires: None,
            password_reset: None,
            created: now,
            updated: None,
            refresh_tokens: Vec::new(),
            version: 0,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.verified.is_some()
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }

    pub fn owns_token(&self, token: &str) -> bool {
        self.refresh_token(token).is_some()
    }

    pub fn refresh_token(&self, token: &str) -> Option<&RefreshToken> {
        self.refresh_tokens.iter().find(|t| t.token == token)
    }

    pub fn refresh_token_mut(&mut self, token: &str) -> Option<&mut RefreshToken> {
        self.refresh_tokens.iter_mut().find(|t| t.token == token)
    }

    pub fn active_refresh_tokens(&self, now: DateTime<Utc>) -> impl Iterator<Item = &RefreshToken> {
        self.refresh_tokens.iter().filter(move |t| t.is_active(now))
    }

    /// Role names in a stable order, as exposed over the API and in access tokens.
    pub fn role_names(&self) -> Vec<String> {
        self.roles.iter().map(|r| r.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(now: DateTime<Utc>) -> RefreshToken {
        RefreshToken {
            token: "abc".to_string(),
            created: now,
            created_by_ip: "127.0.0.1".to_string(),
            expires: now + Duration::days(7),
            revoked: None,
            revoked_by_ip: None,
            replaced_by_token: None,
        }
    }

    #[test]
    fn test_token_states() {
        let now = Utc::now();
        let mut t = token(now);
        assert_eq!(t.state(now), TokenState::Active);
        assert_eq!(t.state(now + Duration::days(7)), TokenState::Expired);

        t.revoked = Some(now);
        assert_eq!(t.state(now), TokenState::Revoked);
        assert!(!t.is_active(now));
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(" user ".parse::<Role>().unwrap(), Role::User);
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_names_are_sorted() {
        let mut account = Account::new("a@x.com", "a", "hash".to_string(), Utc::now());
        account.roles.insert(Role::Admin);
        account.roles.insert(Role::User);
        assert_eq!(account.role_names(), vec!["User", "Admin"]);
    }
}
