//! SCM provider entity model
//!
//! This module contains the SeaORM entity model for the scm_providers table,
//! which stores one row per configured SCM integration.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

use crate::connectors::ProviderKind;

/// Client ID stored for PAT-based providers, which have no OAuth application.
pub const PAT_CLIENT_ID_SENTINEL: &str = "pat-auth";

/// Plaintext sealed into the client secret column of PAT-based providers.
pub const PAT_CLIENT_SECRET_SENTINEL: &str = "not-applicable";

/// SCM provider configuration
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "scm_providers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning organization; `None` makes the provider global
    pub organization_id: Option<Uuid>,

    pub provider_type: ProviderKind,

    /// Display name
    pub name: String,

    /// Base URL of a self-hosted instance
    pub base_url: Option<String>,

    /// Directory tenant for multi-tenant providers
    pub tenant_id: Option<String>,

    pub client_id: String,

    /// Sealed OAuth client secret
    pub client_secret_encrypted: String,

    /// Sealed webhook shared secret
    pub webhook_secret_encrypted: Option<String>,

    pub is_active: bool,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

/// How a provider row authenticates, with only the relevant fields present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderAuth<'a> {
    OAuth {
        client_id: &'a str,
        client_secret_encrypted: &'a str,
    },
    PersonalAccessToken,
}

impl Model {
    /// Tagged view over the credential columns, so callers never compare
    /// against the PAT sentinel strings.
    pub fn auth(&self) -> ProviderAuth<'_> {
        if self.provider_type.is_pat_based() {
            ProviderAuth::PersonalAccessToken
        } else {
            ProviderAuth::OAuth {
                client_id: &self.client_id,
                client_secret_encrypted: &self.client_secret_encrypted,
            }
        }
    }

    pub fn base_url_or_empty(&self) -> &str {
        self.base_url.as_deref().unwrap_or_default()
    }

    pub fn tenant_id_or_empty(&self) -> &str {
        self.tenant_id.as_deref().unwrap_or_default()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::scm_user_token::Entity")]
    UserTokens,
}

impl Related<super::scm_user_token::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserTokens.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
