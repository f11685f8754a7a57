//! SCM repository for database operations
//!
//! This module provides the [`TokenStore`] seam used by the credential service
//! and its SeaORM implementation, [`ScmRepository`], which also carries the
//! provider configuration admin queries.

use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::scm_provider::{self, Entity as ScmProvider};
use crate::models::scm_user_token::{self, Entity as ScmUserToken};

/// Persistence operations the credential lifecycle depends on
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get_provider(&self, provider_id: Uuid) -> Result<Option<scm_provider::Model>, DbErr>;

    async fn get_user_token(
        &self,
        user_id: Uuid,
        provider_id: Uuid,
    ) -> Result<Option<scm_user_token::Model>, DbErr>;

    /// Insert the row, or overwrite every column of the row sharing its `id`.
    async fn save_user_token(
        &self,
        token: scm_user_token::Model,
    ) -> Result<scm_user_token::Model, DbErr>;

    /// Delete the (user, provider) row, returning how many rows were removed.
    async fn delete_user_token(&self, user_id: Uuid, provider_id: Uuid) -> Result<u64, DbErr>;
}

/// Repository for SCM provider and user token database operations
#[derive(Debug, Clone)]
pub struct ScmRepository {
    /// Database connection pool
    pub db: Arc<DatabaseConnection>,
}

impl ScmRepository {
    /// Creates a new ScmRepository instance
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Inserts a provider configuration
    pub async fn create_provider(
        &self,
        provider: scm_provider::Model,
    ) -> Result<scm_provider::Model, DbErr> {
        provider_active_model(provider).insert(&*self.db).await
    }

    /// Writes every column of an existing provider configuration
    pub async fn update_provider(
        &self,
        provider: scm_provider::Model,
    ) -> Result<scm_provider::Model, DbErr> {
        provider_active_model(provider).update(&*self.db).await
    }

    /// Lists provider configurations, optionally scoped to one organization.
    /// Global providers (no organization) are always included.
    pub async fn list_providers(
        &self,
        organization_id: Option<Uuid>,
    ) -> Result<Vec<scm_provider::Model>, DbErr> {
        let mut query = ScmProvider::find();
        if let Some(org) = organization_id {
            query = query.filter(
                scm_provider::Column::OrganizationId
                    .eq(org)
                    .or(scm_provider::Column::OrganizationId.is_null()),
            );
        }

        query
            .order_by_asc(scm_provider::Column::CreatedAt)
            .order_by_asc(scm_provider::Column::Id)
            .all(&*self.db)
            .await
    }

    /// Deletes a provider configuration; its user tokens go with it
    pub async fn delete_provider(&self, provider_id: Uuid) -> Result<bool, DbErr> {
        ScmUserToken::delete_many()
            .filter(scm_user_token::Column::ScmProviderId.eq(provider_id))
            .exec(&*self.db)
            .await?;

        let result = ScmProvider::delete_by_id(provider_id)
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }
}

#[async_trait]
impl TokenStore for ScmRepository {
    async fn get_provider(&self, provider_id: Uuid) -> Result<Option<scm_provider::Model>, DbErr> {
        ScmProvider::find_by_id(provider_id).one(&*self.db).await
    }

    async fn get_user_token(
        &self,
        user_id: Uuid,
        provider_id: Uuid,
    ) -> Result<Option<scm_user_token::Model>, DbErr> {
        ScmUserToken::find()
            .filter(scm_user_token::Column::UserId.eq(user_id))
            .filter(scm_user_token::Column::ScmProviderId.eq(provider_id))
            .one(&*self.db)
            .await
    }

    async fn save_user_token(
        &self,
        token: scm_user_token::Model,
    ) -> Result<scm_user_token::Model, DbErr> {
        let exists = ScmUserToken::find_by_id(token.id)
            .one(&*self.db)
            .await?
            .is_some();

        let active = user_token_active_model(token);
        if exists {
            active.update(&*self.db).await
        } else {
            active.insert(&*self.db).await
        }
    }

    async fn delete_user_token(&self, user_id: Uuid, provider_id: Uuid) -> Result<u64, DbErr> {
        let result = ScmUserToken::delete_many()
            .filter(scm_user_token::Column::UserId.eq(user_id))
            .filter(scm_user_token::Column::ScmProviderId.eq(provider_id))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }
}

fn provider_active_model(provider: scm_provider::Model) -> scm_provider::ActiveModel {
    scm_provider::ActiveModel {
        id: Set(provider.id),
        organization_id: Set(provider.organization_id),
        provider_type: Set(provider.provider_type),
        name: Set(provider.name),
        base_url: Set(provider.base_url),
        tenant_id: Set(provider.tenant_id),
        client_id: Set(provider.client_id),
        client_secret_encrypted: Set(provider.client_secret_encrypted),
        webhook_secret_encrypted: Set(provider.webhook_secret_encrypted),
        is_active: Set(provider.is_active),
        created_at: Set(provider.created_at),
        updated_at: Set(provider.updated_at),
    }
}

fn user_token_active_model(token: scm_user_token::Model) -> scm_user_token::ActiveModel {
    scm_user_token::ActiveModel {
        id: Set(token.id),
        user_id: Set(token.user_id),
        scm_provider_id: Set(token.scm_provider_id),
        access_token_encrypted: Set(token.access_token_encrypted),
        refresh_token_encrypted: Set(token.refresh_token_encrypted),
        token_type: Set(token.token_type),
        expires_at: Set(token.expires_at),
        scopes: Set(token.scopes),
        created_at: Set(token.created_at),
        updated_at: Set(token.updated_at),
    }
}
