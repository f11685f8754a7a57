//! Provider configuration admin
//!
//! Creates, lists, reads, updates and deletes SCM provider configurations. PAT-based
//! providers are stored with sentinel OAuth credentials so both kinds share
//! one schema; responses never carry sealed secrets.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use super::CredentialError;
use crate::connectors::{AuthMethod, ProviderKind, UnknownProviderKind};
use crate::crypto::SecretCipher;
use crate::models::scm_provider::{
    self, PAT_CLIENT_ID_SENTINEL, PAT_CLIENT_SECRET_SENTINEL, ProviderAuth,
};
use crate::repositories::{ScmRepository, TokenStore};

/// Request body for creating a provider configuration
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct NewProvider {
    /// Owning organization; omit for a global provider
    pub organization_id: Option<Uuid>,
    /// One of github, gitlab, azuredevops, bitbucket_cloud, bitbucket_dc
    pub provider_type: String,
    pub name: String,
    /// Base URL of a self-hosted instance; required for bitbucket_dc
    pub base_url: Option<String>,
    pub tenant_id: Option<String>,
    /// OAuth application client ID; ignored for PAT-based providers
    pub client_id: Option<String>,
    /// OAuth application client secret; ignored for PAT-based providers
    pub client_secret: Option<String>,
    pub webhook_secret: Option<String>,
    pub is_active: Option<bool>,
}

/// Partial update of a provider configuration; absent fields are left as is
///
/// An empty `base_url`, `tenant_id` or `webhook_secret` clears the value.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateProvider {
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub tenant_id: Option<String>,
    /// Ignored for PAT-based providers
    pub client_id: Option<String>,
    /// Sealed before storage; ignored for PAT-based providers
    pub client_secret: Option<String>,
    pub webhook_secret: Option<String>,
    pub is_active: Option<bool>,
}

/// Provider configuration as returned by the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProviderView {
    pub id: Uuid,
    pub organization_id: Option<Uuid>,
    pub provider_type: ProviderKind,
    pub auth_method: AuthMethod,
    pub name: String,
    pub base_url: Option<String>,
    pub tenant_id: Option<String>,
    /// OAuth client ID; absent for PAT-based providers
    pub client_id: Option<String>,
    pub has_webhook_secret: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<scm_provider::Model> for ProviderView {
    fn from(model: scm_provider::Model) -> Self {
        let client_id = match model.auth() {
            ProviderAuth::OAuth { client_id, .. } => Some(client_id.to_string()),
            ProviderAuth::PersonalAccessToken => None,
        };

        Self {
            id: model.id,
            organization_id: model.organization_id,
            provider_type: model.provider_type,
            auth_method: model.provider_type.auth_method(),
            name: model.name,
            base_url: model.base_url,
            tenant_id: model.tenant_id,
            client_id,
            has_webhook_secret: model
                .webhook_secret_encrypted
                .as_deref()
                .is_some_and(|sealed| !sealed.is_empty()),
            is_active: model.is_active,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Trimmed base URL without a trailing `/`, rejected unless it parses.
fn parse_base_url(value: Option<String>) -> Result<Option<String>, CredentialError> {
    let base_url = non_empty(value).map(|url| url.trim_end_matches('/').to_string());
    if let Some(url) = base_url.as_deref() {
        url::Url::parse(url).map_err(|_| CredentialError::invalid("base_url must be a valid URL"))?;
    }
    Ok(base_url)
}

fn required(value: String, field: &str) -> Result<String, CredentialError> {
    non_empty(Some(value)).ok_or_else(|| CredentialError::invalid(format!("{field} is required")))
}

/// Provider configuration management
#[derive(Clone)]
pub struct ProviderAdmin {
    repo: ScmRepository,
    cipher: Arc<dyn SecretCipher>,
}

impl ProviderAdmin {
    pub fn new(repo: ScmRepository, cipher: Arc<dyn SecretCipher>) -> Self {
        Self { repo, cipher }
    }

    #[instrument(skip_all, fields(provider_type = %request.provider_type))]
    pub async fn create(&self, request: NewProvider) -> Result<ProviderView, CredentialError> {
        let provider_type: ProviderKind = request
            .provider_type
            .trim()
            .parse()
            .map_err(|err: UnknownProviderKind| CredentialError::invalid(err.to_string()))?;

        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(CredentialError::invalid("name is required"));
        }

        let base_url = parse_base_url(request.base_url)?;

        let (client_id, client_secret) = if provider_type.is_pat_based() {
            if base_url.is_none() {
                return Err(CredentialError::invalid(
                    "base_url is required for Personal Access Token providers",
                ));
            }
            (
                PAT_CLIENT_ID_SENTINEL.to_string(),
                PAT_CLIENT_SECRET_SENTINEL.to_string(),
            )
        } else {
            let client_id = non_empty(request.client_id)
                .ok_or_else(|| CredentialError::invalid("client_id is required"))?;
            let client_secret = non_empty(request.client_secret)
                .ok_or_else(|| CredentialError::invalid("client_secret is required"))?;
            (client_id, client_secret)
        };

        let client_secret_encrypted = self
            .cipher
            .seal(&client_secret)
            .map_err(CredentialError::encryption("encrypt client secret"))?;
        let webhook_secret_encrypted = non_empty(request.webhook_secret)
            .map(|secret| self.cipher.seal(&secret))
            .transpose()
            .map_err(CredentialError::encryption("encrypt webhook secret"))?;

        let now = Utc::now().fixed_offset();
        let model = scm_provider::Model {
            id: Uuid::new_v4(),
            organization_id: request.organization_id,
            provider_type,
            name,
            base_url,
            tenant_id: non_empty(request.tenant_id),
            client_id,
            client_secret_encrypted,
            webhook_secret_encrypted,
            is_active: request.is_active.unwrap_or(true),
            created_at: now,
            updated_at: now,
        };

        let created = self.repo.create_provider(model).await?;
        info!(provider_id = %created.id, "SCM provider created");
        Ok(created.into())
    }

    pub async fn list(
        &self,
        organization_id: Option<Uuid>,
    ) -> Result<Vec<ProviderView>, CredentialError> {
        let providers = self.repo.list_providers(organization_id).await?;
        Ok(providers.into_iter().map(ProviderView::from).collect())
    }

    pub async fn get(&self, provider_id: Uuid) -> Result<ProviderView, CredentialError> {
        self.repo
            .get_provider(provider_id)
            .await?
            .map(ProviderView::from)
            .ok_or_else(|| CredentialError::not_found("provider not found"))
    }

    /// Apply a partial update. PAT-based providers keep their sentinel
    /// credentials and must keep a base URL.
    #[instrument(skip_all, fields(provider_id = %provider_id))]
    pub async fn update(
        &self,
        provider_id: Uuid,
        request: UpdateProvider,
    ) -> Result<ProviderView, CredentialError> {
        let mut provider = self
            .repo
            .get_provider(provider_id)
            .await?
            .ok_or_else(|| CredentialError::not_found("provider not found"))?;
        let pat_based = provider.provider_type.is_pat_based();

        if let Some(name) = request.name {
            provider.name = required(name, "name")?;
        }
        if request.base_url.is_some() {
            provider.base_url = parse_base_url(request.base_url)?;
        }
        if pat_based && provider.base_url.is_none() {
            return Err(CredentialError::invalid(
                "base_url is required for Personal Access Token providers",
            ));
        }
        if request.tenant_id.is_some() {
            provider.tenant_id = non_empty(request.tenant_id);
        }

        if !pat_based {
            if let Some(client_id) = request.client_id {
                provider.client_id = required(client_id, "client_id")?;
            }
            if let Some(client_secret) = request.client_secret {
                let client_secret = required(client_secret, "client_secret")?;
                provider.client_secret_encrypted = self
                    .cipher
                    .seal(&client_secret)
                    .map_err(CredentialError::encryption("encrypt client secret"))?;
            }
        }

        if request.webhook_secret.is_some() {
            provider.webhook_secret_encrypted = non_empty(request.webhook_secret)
                .map(|secret| self.cipher.seal(&secret))
                .transpose()
                .map_err(CredentialError::encryption("encrypt webhook secret"))?;
        }
        if let Some(is_active) = request.is_active {
            provider.is_active = is_active;
        }
        provider.updated_at = Utc::now().fixed_offset();

        let updated = self.repo.update_provider(provider).await?;
        info!("SCM provider updated");
        Ok(updated.into())
    }

    /// Delete a provider and every credential stored for it.
    #[instrument(skip_all, fields(provider_id = %provider_id))]
    pub async fn delete(&self, provider_id: Uuid) -> Result<(), CredentialError> {
        if !self.repo.delete_provider(provider_id).await? {
            return Err(CredentialError::not_found("provider not found"));
        }
        info!("SCM provider deleted");
        Ok(())
    }
}
