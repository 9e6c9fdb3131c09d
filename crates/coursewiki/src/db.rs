use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coursewiki_core::account::{Account, RefreshToken, Role};
use coursewiki_core::email::normalize_email;
use coursewiki_core::error::{RepositoryError, RepositoryResult};
use coursewiki_core::repository::AccountRepository;
use entity::{account, account_role, refresh_token};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, SqlErr, TransactionTrait,
};
use uuid::Uuid;

fn map_db_err(e: DbErr) -> RepositoryError {
    if let Some(SqlErr::UniqueConstraintViolation(_)) = e.sql_err() {
        return RepositoryError::EmailTaken;
    }
    RepositoryError::Backend(anyhow::anyhow!("Database error: {e}"))
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> RepositoryResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| RepositoryError::Backend(anyhow::anyhow!("Timestamp out of range: {ms}")))
}

fn from_millis_opt(ms: Option<i64>) -> RepositoryResult<Option<DateTime<Utc>>> {
    ms.map(from_millis).transpose()
}

/// Columns of the `accounts` row, excluding `version`.
fn account_columns(a: &Account) -> account::ActiveModel {
    account::ActiveModel {
        id: Set(a.id.to_string()),
        email: Set(a.email.clone()),
        email_lower: Set(normalize_email(&a.email)),
        nickname: Set(a.nickname.clone()),
        password_hash: Set(a.password_hash.clone()),
        accept_terms: Set(a.accept_terms),
        verified_at: Set(a.verified.map(to_millis)),
        reset_token_expires_at: Set(a.reset_token_expires.map(to_millis)),
        password_reset_at: Set(a.password_reset.map(to_millis)),
        created_at: Set(to_millis(a.created)),
        updated_at: Set(a.updated.map(to_millis)),
        ..Default::default()
    }
}

fn token_row(account_id: &str, position: usize, t: &RefreshToken) -> refresh_token::ActiveModel {
    refresh_token::ActiveModel {
        token: Set(t.token.clone()),
        account_id: Set(account_id.to_string()),
        position: Set(position as i32),
        created_at: Set(to_millis(t.created)),
        created_by_ip: Set(t.created_by_ip.clone()),
        expires_at: Set(to_millis(t.expires)),
        revoked_at: Set(t.revoked.map(to_millis)),
        revoked_by_ip: Set(t.revoked_by_ip.clone()),
        replaced_by_token: Set(t.replaced_by_token.clone()),
    }
}

fn token_from_row(row: refresh_token::Model) -> RepositoryResult<RefreshToken> {
    Ok(RefreshToken {
        token: row.token,
        created: from_millis(row.created_at)?,
        created_by_ip: row.created_by_ip,
        expires: from_millis(row.expires_at)?,
        revoked: from_millis_opt(row.revoked_at)?,
        revoked_by_ip: row.revoked_by_ip,
        replaced_by_token: row.replaced_by_token,
    })
}

/// Replace the role and refresh-token rows owned by `a`.
async fn write_children<C: ConnectionTrait>(conn: &C, a: &Account) -> RepositoryResult<()> {
    let account_id = a.id.to_string();

    account_role::Entity::delete_many()
        .filter(account_role::Column::AccountId.eq(account_id.clone()))
        .exec(conn)
        .await
        .map_err(map_db_err)?;
    refresh_token::Entity::delete_many()
        .filter(refresh_token::Column::AccountId.eq(account_id.clone()))
        .exec(conn)
        .await
        .map_err(map_db_err)?;

    // insert_many rejects an empty batch.
    if !a.roles.is_empty() {
        let roles = a.roles.iter().map(|role| account_role::ActiveModel {
            account_id: Set(account_id.clone()),
            role: Set(role.as_str().to_string()),
        });
        account_role::Entity::insert_many(roles)
            .exec_without_returning(conn)
            .await
            .map_err(map_db_err)?;
    }

    if !a.refresh_tokens.is_empty() {
        let tokens = a
            .refresh_tokens
            .iter()
            .enumerate()
            .map(|(i, t)| token_row(&account_id, i, t));
        refresh_token::Entity::insert_many(tokens)
            .exec_without_returning(conn)
            .await
            .map_err(|e| match map_db_err(e) {
                RepositoryError::EmailTaken => {
                    RepositoryError::Backend(anyhow::anyhow!("Refresh token collision"))
                }
                other => other,
            })?;
    }

    Ok(())
}

async fn load_account<C: ConnectionTrait>(conn: &C, row: account::Model) -> RepositoryResult<Account> {
    let id = Uuid::parse_str(&row.id)
        .map_err(|e| RepositoryError::Backend(anyhow::anyhow!("Invalid account id '{}': {e}", row.id)))?;

    let role_rows = account_role::Entity::find()
        .filter(account_role::Column::AccountId.eq(row.id.clone()))
        .all(conn)
        .await
        .map_err(map_db_err)?;
    let mut roles = BTreeSet::new();
    for r in role_rows {
        let role: Role = r.role.parse().map_err(|e: String| RepositoryError::Backend(anyhow::anyhow!(e)))?;
        roles.insert(role);
    }

    let refresh_tokens = refresh_token::Entity::find()
        .filter(refresh_token::Column::AccountId.eq(row.id.clone()))
        .order_by_asc(refresh_token::Column::Position)
        .all(conn)
        .await
        .map_err(map_db_err)?
        .into_iter()
        .map(token_from_row)
        .collect::<RepositoryResult<Vec<_>>>()?;

    Ok(Account {
        id,
        email: row.email,
        nickname: row.nickname,
        password_hash: row.password_hash,
        accept_terms: row.accept_terms,
        roles,
        verified: from_millis_opt(row.verified_at)?,
        reset_token_expires: from_millis_opt(row.reset_token_expires_at)?,
        password_reset: from_millis_opt(row.password_reset_at)?,
        created: from_millis(row.created_at)?,
        updated: from_millis_opt(row.updated_at)?,
        refresh_tokens,
        version: row.version,
    })
}

/// `AccountRepository` over the `accounts`, `account_roles` and
/// `refresh_tokens` tables. Each write is one transaction.
#[derive(Clone)]
pub struct SeaOrmAccountRepository {
    db: DatabaseConnection,
}

impl SeaOrmAccountRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn load_opt(&self, row: Option<account::Model>) -> RepositoryResult<Option<Account>> {
        match row {
            Some(row) => Ok(Some(load_account(&self.db, row).await?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl AccountRepository for SeaOrmAccountRepository {
    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Account>> {
        let row = account::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await
            .map_err(map_db_err)?;
        self.load_opt(row).await
    }

    async fn find_by_email(&self, email: &str) -> RepositoryResult<Option<Account>> {
        let row = account::Entity::find()
            .filter(account::Column::EmailLower.eq(normalize_email(email)))
            .one(&self.db)
            .await
            .map_err(map_db_err)?;
        self.load_opt(row).await
    }

    async fn find_by_refresh_token(&self, token: &str) -> RepositoryResult<Option<Account>> {
        let Some(token_row) = refresh_token::Entity::find_by_id(token.to_string())
            .one(&self.db)
            .await
            .map_err(map_db_err)?
        else {
            return Ok(None);
        };

        let row = account::Entity::find_by_id(token_row.account_id)
            .one(&self.db)
            .await
            .map_err(map_db_err)?;
        self.load_opt(row).await
    }

    async fn count(&self) -> RepositoryResult<u64> {
        account::Entity::find().count(&self.db).await.map_err(map_db_err)
    }

    async fn list(&self) -> RepositoryResult<Vec<Account>> {
        let rows = account::Entity::find()
            .order_by_asc(account::Column::CreatedAt)
            .order_by_asc(account::Column::Id)
            .all(&self.db)
            .await
            .map_err(map_db_err)?;

        let mut accounts = Vec::with_capacity(rows.len());
        for row in rows {
            accounts.push(load_account(&self.db, row).await?);
        }
        Ok(accounts)
    }

    async fn insert(&self, mut account: Account) -> RepositoryResult<Account> {
        account.version = 1;

        let txn = self.db.begin().await.map_err(map_db_err)?;

        let mut row = account_columns(&account);
        row.version = Set(account.version);
        account::Entity::insert(row)
            .exec_without_returning(&txn)
            .await
            .map_err(map_db_err)?;
        write_children(&txn, &account).await?;

        txn.commit().await.map_err(map_db_err)?;
        Ok(account)
    }

    async fn save(&self, account: &Account) -> RepositoryResult<Account> {
        let id = account.id.to_string();
        let txn = self.db.begin().await.map_err(map_db_err)?;

        // Compare-and-swap on the version read by the caller.
        let mut columns = account_columns(account);
        columns.id = sea_orm::ActiveValue::NotSet;
        let result = account::Entity::update_many()
            .set(columns)
            .col_expr(account::Column::Version, Expr::value(account.version + 1))
            .filter(account::Column::Id.eq(id.clone()))
            .filter(account::Column::Version.eq(account.version))
            .exec(&txn)
            .await
            .map_err(map_db_err)?;

        if result.rows_affected == 0 {
            let exists = account::Entity::find_by_id(id)
                .one(&txn)
                .await
                .map_err(map_db_err)?
                .is_some();
            txn.rollback().await.map_err(map_db_err)?;
            return Err(if exists {
                RepositoryError::StaleAccount
            } else {
                RepositoryError::NotFound
            });
        }

        write_children(&txn, account).await?;
        txn.commit().await.map_err(map_db_err)?;

        let mut saved = account.clone();
        saved.version += 1;
        Ok(saved)
    }

    async fn delete(&self, id: Uuid) -> RepositoryResult<bool> {
        let id = id.to_string();
        let txn = self.db.begin().await.map_err(map_db_err)?;

        refresh_token::Entity::delete_many()
            .filter(refresh_token::Column::AccountId.eq(id.clone()))
            .exec(&txn)
            .await
            .map_err(map_db_err)?;
        account_role::Entity::delete_many()
            .filter(account_role::Column::AccountId.eq(id.clone()))
            .exec(&txn)
            .await
            .map_err(map_db_err)?;
        let result = account::Entity::delete_by_id(id)
            .exec(&txn)
            .await
            .map_err(map_db_err)?;

        txn.commit().await.map_err(map_db_err)?;
        Ok(result.rows_affected > 0)
    }
}
