//! SCM credential lifecycle
//!
//! - [`CredentialService`]: authorize, callback, revoke, manual refresh, PAT
//!   submission and connection status
//! - [`ResilientScmClient`]: repository/tag/branch reads with proactive and
//!   reactive renewal
//! - [`ProviderAdmin`]: provider configuration management
//!
//! Shared helpers for the OAuth state value, callback URLs, scope encoding
//! and credential decryption live here.

use std::fmt;
use std::sync::Arc;

use sea_orm::DbErr;
use thiserror::Error;
use uuid::Uuid;

use crate::connectors::{
    AccessToken, Connector, ConnectorRegistry, ConnectorSettings, RegistryError,
};
use crate::crypto::{CryptoError, SecretCipher};
use crate::models::scm_provider::{self, ProviderAuth};
use crate::models::scm_user_token;

pub mod orchestrator;
pub mod providers;
pub mod resilient;

pub use orchestrator::{AuthorizeOutcome, CredentialService, TokenStatus};
pub use providers::{NewProvider, ProviderAdmin, ProviderView, UpdateProvider};
pub use resilient::ResilientScmClient;

/// A stored credential opened for use; lives only for one request.
pub type DecryptedCredential = AccessToken;

/// Message returned when a stored credential is rejected and cannot be renewed.
pub const RECONNECT_MESSAGE: &str =
    "OAuth token is invalid or has been revoked; please reconnect to this SCM provider";

/// Failures of the credential lifecycle, each mapped to one HTTP status
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Malformed identifier, missing field or wrong flow for the provider kind
    #[error("{0}")]
    InvalidInput(String),
    /// No usable identity or stored credential for the caller
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{0}")]
    NotFound(String),
    /// The provider rejected the credential and renewal could not fix it
    #[error("{}", RECONNECT_MESSAGE)]
    UpstreamAuthFailure,
    /// Any other provider failure, with upstream detail attached
    #[error("{0}")]
    Upstream(String),
    #[error("failed to {operation}: {source}")]
    Encryption {
        operation: &'static str,
        source: CryptoError,
    },
    #[error("failed to create connector: {0}")]
    Connector(#[from] RegistryError),
    #[error("token store error: {0}")]
    Storage(#[from] DbErr),
}

impl CredentialError {
    pub(crate) fn invalid<S: Into<String>>(message: S) -> Self {
        CredentialError::InvalidInput(message.into())
    }

    pub(crate) fn not_found<S: Into<String>>(message: S) -> Self {
        CredentialError::NotFound(message.into())
    }

    pub(crate) fn encryption(operation: &'static str) -> impl FnOnce(CryptoError) -> Self {
        move |source| CredentialError::Encryption { operation, source }
    }
}

/// Opaque value round-tripped through the provider's redirect.
///
/// Encoded as `"{user_id}:{provider_id}"` so the callback needs no server-side
/// session to recover who started the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OAuthState {
    pub user_id: Uuid,
    pub provider_id: Uuid,
}

impl OAuthState {
    pub fn new(user_id: Uuid, provider_id: Uuid) -> Self {
        Self {
            user_id,
            provider_id,
        }
    }

    /// Parse a state value, splitting on the first `:`.
    pub fn parse(state: &str) -> Result<Self, CredentialError> {
        let (user, provider) = state
            .split_once(':')
            .filter(|(user, provider)| !user.is_empty() && !provider.is_empty())
            .ok_or_else(|| CredentialError::invalid("invalid state parameter"))?;

        let user_id = Uuid::parse_str(user)
            .map_err(|_| CredentialError::invalid("invalid user ID in state"))?;
        let provider_id = Uuid::parse_str(provider)
            .map_err(|_| CredentialError::invalid("invalid state parameter"))?;

        Ok(Self::new(user_id, provider_id))
    }
}

impl fmt::Display for OAuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user_id, self.provider_id)
    }
}

/// Redirect URI registered with the provider; identical at authorize and callback time.
pub fn callback_url(server_base_url: &str, provider_id: Uuid) -> String {
    format!(
        "{}/api/v1/scm-providers/{}/oauth/callback",
        server_base_url.trim_end_matches('/'),
        provider_id
    )
}

/// Admin UI page the browser lands on after a successful OAuth callback.
pub fn connected_redirect_url(server_base_url: &str, provider_id: Uuid) -> String {
    format!(
        "{}/admin/scm-providers/{}/connected",
        server_base_url.trim_end_matches('/'),
        provider_id
    )
}

/// Scopes are stored as one comma-joined column; `None` when there are none.
pub fn join_scopes(scopes: &[String]) -> Option<String> {
    let joined = scopes
        .iter()
        .map(|scope| scope.trim())
        .filter(|scope| !scope.is_empty())
        .collect::<Vec<_>>()
        .join(",");
    (!joined.is_empty()).then_some(joined)
}

pub fn split_scopes(scopes: Option<&str>) -> Vec<String> {
    scopes
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|scope| !scope.is_empty())
        .map(str::to_string)
        .collect()
}

/// Decrypt a stored token row into a usable credential.
///
/// The access token must open. A refresh token that fails to open is dropped
/// with a warning, leaving a credential that simply cannot be renewed.
pub fn open_credential(
    cipher: &dyn SecretCipher,
    record: &scm_user_token::Model,
) -> Result<DecryptedCredential, CryptoError> {
    let access_token = cipher.open(&record.access_token_encrypted)?;

    let refresh_token = match record.refresh_token_encrypted.as_deref() {
        Some(sealed) if !sealed.is_empty() => match cipher.open(sealed) {
            Ok(token) if !token.is_empty() => Some(token),
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(
                    user_id = %record.user_id,
                    provider_id = %record.scm_provider_id,
                    error = %err,
                    "stored refresh token could not be decrypted; renewal disabled for this call"
                );
                None
            }
        },
        _ => None,
    };

    Ok(AccessToken {
        access_token,
        refresh_token,
        token_type: record.token_type.clone(),
        expires_at: record.expires_at.map(|at| at.with_timezone(&chrono::Utc)),
        scopes: split_scopes(record.scopes.as_deref()),
    })
}

/// Builds connectors for stored provider rows.
///
/// OAuth providers have their client secret decrypted into the settings; PAT
/// providers never touch the cipher.
#[derive(Clone)]
pub struct ConnectorFactory {
    registry: Arc<ConnectorRegistry>,
    cipher: Arc<dyn SecretCipher>,
    server_base_url: String,
}

impl ConnectorFactory {
    pub fn new(
        registry: Arc<ConnectorRegistry>,
        cipher: Arc<dyn SecretCipher>,
        server_base_url: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            cipher,
            server_base_url: server_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn server_base_url(&self) -> &str {
        &self.server_base_url
    }

    pub fn settings_for(
        &self,
        provider: &scm_provider::Model,
    ) -> Result<ConnectorSettings, CredentialError> {
        let (client_id, client_secret) = match provider.auth() {
            ProviderAuth::OAuth {
                client_id,
                client_secret_encrypted,
            } => {
                let secret = self
                    .cipher
                    .open(client_secret_encrypted)
                    .map_err(CredentialError::encryption("decrypt client secret"))?;
                (client_id.to_string(), secret)
            }
            ProviderAuth::PersonalAccessToken => (String::new(), String::new()),
        };

        Ok(ConnectorSettings {
            kind: provider.provider_type,
            instance_base_url: provider.base_url_or_empty().to_string(),
            client_id,
            client_secret,
            callback_url: callback_url(&self.server_base_url, provider.id),
            tenant_id: provider.tenant_id_or_empty().to_string(),
        })
    }

    pub fn connector_for(
        &self,
        provider: &scm_provider::Model,
    ) -> Result<Arc<dyn Connector>, CredentialError> {
        let settings = self.settings_for(provider)?;
        Ok(self.registry.build(&settings)?)
    }
}

impl fmt::Debug for ConnectorFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorFactory")
            .field("registry", &self.registry)
            .field("server_base_url", &self.server_base_url)
            .finish()
    }
}
