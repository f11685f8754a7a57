//! Connector trait definition
//!
//! Defines the interface every SCM provider adapter implements. One
//! implementation exists per [`ProviderKind`]; the orchestrator and the
//! resilient wrapper only ever talk to this trait.

use std::fmt;

use async_trait::async_trait;
use url::Url;

use super::metadata::ProviderKind;
use super::types::{AccessToken, GitBranch, GitTag, Pagination, RepoListResult};

/// Statuses a provider uses to signal that the bearer credential was rejected.
/// 203 is used by Azure DevOps when it serves a sign-in page instead of data.
pub const AUTH_FAILURE_STATUSES: [u16; 3] = [401, 403, 203];

/// Connector-specific error types for structured error handling
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectorError {
    /// Non-success HTTP status from the upstream provider API
    #[error("SCM API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },
    /// Network or connectivity error
    #[error("network error: {details}")]
    Network { details: String },
    /// Malformed response from provider
    #[error("malformed response: {details}")]
    MalformedResponse { details: String },
    /// The provider refused to issue or renew a token
    #[error("token exchange failed: {details}")]
    TokenExchange { details: String },
    /// Configuration or setup error
    #[error("configuration error: {details}")]
    Configuration { details: String },
}

impl ConnectorError {
    pub fn api<S: Into<String>>(status: u16, message: S) -> Self {
        ConnectorError::Api {
            status,
            message: message.into(),
        }
    }

    /// Upstream HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ConnectorError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the error means the bearer credential is no longer accepted.
    pub fn is_auth_failure(&self) -> bool {
        self.status()
            .is_some_and(|status| AUTH_FAILURE_STATUSES.contains(&status))
    }
}

/// Everything needed to construct a connector for one provider configuration
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectorSettings {
    pub kind: ProviderKind,
    /// Base URL of a self-hosted instance; empty for the public SaaS endpoint
    pub instance_base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub callback_url: String,
    /// Directory tenant for multi-tenant providers; empty when unused
    pub tenant_id: String,
}

impl fmt::Debug for ConnectorSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorSettings")
            .field("kind", &self.kind)
            .field("instance_base_url", &self.instance_base_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("callback_url", &self.callback_url)
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}

/// Uniform capability set of an SCM provider adapter
#[async_trait]
pub trait Connector: Send + Sync {
    /// Provider type this connector speaks to
    fn kind(&self) -> ProviderKind;

    /// Build the provider authorization URL carrying the opaque `state` value.
    fn authorization_endpoint(&self, state: &str, scopes: &[String])
    -> Result<Url, ConnectorError>;

    /// Exchange an authorization code for a token.
    async fn complete_authorization(&self, code: &str) -> Result<AccessToken, ConnectorError>;

    /// Obtain a fresh access token from a refresh token.
    async fn renew_token(&self, refresh_token: &str) -> Result<AccessToken, ConnectorError>;

    async fn fetch_repositories(
        &self,
        credential: &AccessToken,
        pagination: Pagination,
    ) -> Result<RepoListResult, ConnectorError>;

    async fn search_repositories(
        &self,
        credential: &AccessToken,
        term: &str,
        pagination: Pagination,
    ) -> Result<RepoListResult, ConnectorError>;

    async fn fetch_tags(
        &self,
        credential: &AccessToken,
        owner: &str,
        repo: &str,
        pagination: Pagination,
    ) -> Result<Vec<GitTag>, ConnectorError>;

    async fn fetch_branches(
        &self,
        credential: &AccessToken,
        owner: &str,
        repo: &str,
        pagination: Pagination,
    ) -> Result<Vec<GitBranch>, ConnectorError>;
}
