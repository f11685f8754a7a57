//! SCM user token entity model
//!
//! This module contains the SeaORM entity model for the scm_user_tokens table,
//! which holds at most one sealed credential per (user, provider) pair.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

/// Token type recorded for OAuth-issued credentials
pub const TOKEN_TYPE_BEARER: &str = "bearer";

/// Token type recorded for Personal Access Tokens
pub const TOKEN_TYPE_PAT: &str = "pat";

/// Per-user SCM credential
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "scm_user_tokens")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,

    pub scm_provider_id: Uuid,

    /// Sealed access token
    pub access_token_encrypted: String,

    /// Sealed refresh token; absent when the provider issued none
    pub refresh_token_encrypted: Option<String>,

    /// "bearer" or "pat"
    pub token_type: String,

    /// Absent means the credential never expires
    pub expires_at: Option<DateTimeWithTimeZone>,

    /// Comma-joined scope list
    pub scopes: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::scm_provider::Entity",
        from = "Column::ScmProviderId",
        to = "super::scm_provider::Column::Id",
        on_delete = "Cascade"
    )]
    ScmProvider,
}

impl Related<super::scm_provider::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ScmProvider.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
