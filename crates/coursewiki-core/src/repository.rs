use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use uuid::Uuid;

use crate::account::Account;
use crate::email::normalize_email;
use crate::error::{AuthError, RepositoryError, RepositoryResult};

/// First backoff window after losing a concurrent update, in milliseconds.
const BACKOFF_BASE_MS: u64 = 2;

/// Upper bound for a single backoff window, in milliseconds.
const BACKOFF_CAP_MS: u64 = 100;

/// Persistence seam for the account aggregate (account + roles + refresh tokens).
///
/// Implementations must keep emails unique after normalization, keep refresh
/// token strings unique across all accounts, and treat `save` as a
/// compare-and-swap on [`Account::version`].
#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Account>>;

    /// Look up by email; the argument is normalized by the implementation.
    async fn find_by_email(&self, email: &str) -> RepositoryResult<Option<Account>>;

    /// Resolve the account owning `token` via the global token index.
    async fn find_by_refresh_token(&self, token: &str) -> RepositoryResult<Option<Account>>;

    async fn count(&self) -> RepositoryResult<u64>;

    /// All accounts, oldest first.
    async fn list(&self) -> RepositoryResult<Vec<Account>>;

    /// Insert a new account. Fails with `EmailTaken` on a normalized-email collision.
    async fn insert(&self, account: Account) -> RepositoryResult<Account>;

    /// Persist the whole aggregate if nobody saved it since it was read.
    ///
    /// Returns the stored account with its version bumped, or `StaleAccount`.
    async fn save(&self, account: &Account) -> RepositoryResult<Account>;

    /// Returns whether an account was removed.
    async fn delete(&self, id: Uuid) -> RepositoryResult<bool>;
}

/// Read-modify-write an account with optimistic concurrency.
///
/// `apply` runs against a fresh copy on every attempt, so its checks are
/// re-evaluated against the latest state after a lost race. An `Err` from
/// `apply` aborts without saving. A lost race is never surfaced to the
/// caller; the loop re-reads and tries again after a jittered backoff.
pub async fn modify_account<T, F>(
    repo: &dyn AccountRepository,
    mut account: Account,
    mut apply: F,
) -> Result<(Account, T), AuthError>
where
    F: FnMut(&mut Account) -> Result<T, AuthError> + Send,
    T: Send,
{
    let mut attempt: u32 = 0;
    loop {
        let mut working = account.clone();
        let value = apply(&mut working)?;

        match repo.save(&working).await {
            Ok(saved) => return Ok((saved, value)),
            Err(RepositoryError::StaleAccount) => {
                attempt = attempt.saturating_add(1);
                log::debug!("Account {} changed concurrently, retrying (attempt {attempt})", account.id);
                tokio::time::sleep(backoff(attempt)).await;
                account = repo
                    .find_by_id(account.id)
                    .await?
                    .ok_or_else(|| AuthError::not_found("Account not found"))?;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Full-jitter exponential backoff.
fn backoff(attempt: u32) -> Duration {
    let window = BACKOFF_BASE_MS
        .saturating_mul(1 << attempt.min(6))
        .min(BACKOFF_CAP_MS);
    Duration::from_millis(rand::thread_rng().gen_range(0..=window))
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<Uuid, Account>,
    by_email: HashMap<String, Uuid>,
    by_token: HashMap<String, Uuid>,
}

impl Inner {
    fn unindex(&mut self, account: &Account) {
        self.by_email.remove(&normalize_email(&account.email));
        for token in &account.refresh_tokens {
            self.by_token.remove(&token.token);
        }
    }

    fn index(&mut self, account: &Account) {
        self.by_email.insert(normalize_email(&account.email), account.id);
        for token in &account.refresh_tokens {
            self.by_token.insert(token.token.clone(), account.id);
        }
    }

    fn token_owned_elsewhere(&self, account: &Account) -> bool {
        account
            .refresh_tokens
            .iter()
            .any(|t| matches!(self.by_token.get(&t.token), Some(owner) if *owner != account.id))
    }
}

/// Process-local repository: an arena of accounts plus email and token indexes.
#[derive(Default)]
pub struct InMemoryAccountRepository {
    inner: RwLock<Inner>,
}

impl InMemoryAccountRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccountRepository {
    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Account>> {
        Ok(self.inner.read().accounts.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> RepositoryResult<Option<Account>> {
        let inner = self.inner.read();
        Ok(inner
            .by_email
            .get(&normalize_email(email))
            .and_then(|id| inner.accounts.get(id))
            .cloned())
    }

    async fn find_by_refresh_token(&self, token: &str) -> RepositoryResult<Option<Account>> {
        let inner = self.inner.read();
        Ok(inner
            .by_token
            .get(token)
            .and_then(|id| inner.accounts.get(id))
            .cloned())
    }

    async fn count(&self) -> RepositoryResult<u64> {
        Ok(self.inner.read().accounts.len() as u64)
    }

    async fn list(&self) -> RepositoryResult<Vec<Account>> {
        let mut accounts: Vec<Account> = self.inner.read().accounts.values().cloned().collect();
        accounts.sort_by_key(|a| (a.created, a.id));
        Ok(accounts)
    }

    async fn insert(&self, mut account: Account) -> RepositoryResult<Account> {
        let mut inner = self.inner.write();
        if inner.by_email.contains_key(&normalize_email(&account.email)) {
            return Err(RepositoryError::EmailTaken);
        }
        if inner.accounts.contains_key(&account.id) || inner.token_owned_elsewhere(&account) {
            return Err(RepositoryError::Backend(anyhow::anyhow!("Duplicate key on insert")));
        }

        account.version = 1;
        inner.index(&account);
        inner.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn save(&self, account: &Account) -> RepositoryResult<Account> {
        let mut inner = self.inner.write();
        let Some(stored) = inner.accounts.get(&account.id).cloned() else {
            return Err(RepositoryError::NotFound);
        };
        if stored.version != account.version {
            return Err(RepositoryError::StaleAccount);
        }

        let email_key = normalize_email(&account.email);
        if matches!(inner.by_email.get(&email_key), Some(owner) if *owner != account.id) {
            return Err(RepositoryError::EmailTaken);
        }
        if inner.token_owned_elsewhere(account) {
            return Err(RepositoryError::Backend(anyhow::anyhow!("Refresh token collision")));
        }

        let mut saved = account.clone();
        saved.version += 1;
        inner.unindex(&stored);
        inner.index(&saved);
        inner.accounts.insert(saved.id, saved.clone());
        Ok(saved)
    }

    async fn delete(&self, id: Uuid) -> RepositoryResult<bool> {
        let mut inner = self.inner.write();
        match inner.accounts.remove(&id) {
            Some(account) => {
                inner.unindex(&account);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
