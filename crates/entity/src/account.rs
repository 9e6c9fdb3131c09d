use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "accounts")]
pub struct Model {
    /// UUID (v7) in its hyphenated string form.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub email: String,

    /// Normalized email for case-insensitive uniqueness and lookups.
    ///
    /// This should always be `email.trim().to_lowercase()`.
    #[sea_orm(unique)]
    pub email_lower: String,

    pub nickname: String,

    /// Argon2id PHC string.
    pub password_hash: String,

    pub accept_terms: bool,

    /// Unix timestamp (milliseconds). NULL until the email is verified.
    pub verified_at: Option<i64>,

    /// Unix timestamp (milliseconds) after which the current reset token is dead.
    pub reset_token_expires_at: Option<i64>,

    pub password_reset_at: Option<i64>,

    /// Unix timestamp (milliseconds).
    pub created_at: i64,

    pub updated_at: Option<i64>,

    /// Bumped on every save; writes only succeed against the version they read.
    pub version: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::account_role::Entity")]
    AccountRole,
    #[sea_orm(has_many = "super::refresh_token::Entity")]
    RefreshToken,
}

impl Related<super::account_role::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AccountRole.def()
    }
}

impl Related<super::refresh_token::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RefreshToken.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
