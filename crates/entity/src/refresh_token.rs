use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "refresh_tokens")]
pub struct Model {
    /// Opaque token value (80 hex characters). Globally unique.
    #[sea_orm(primary_key, auto_increment = false)]
    pub token: String,

    /// Foreign key to accounts table
    pub account_id: String,

    /// Issue order within the owning account.
    pub position: i32,

    /// Unix timestamp (milliseconds).
    pub created_at: i64,
    pub created_by_ip: String,

    pub expires_at: i64,

    pub revoked_at: Option<i64>,
    pub revoked_by_ip: Option<String>,

    /// Token issued when this one was rotated.
    pub replaced_by_token: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::account::Entity",
        from = "Column::AccountId",
        to = "super::account::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Account,
}

impl Related<super::account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Account.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
