//! Credential lifecycle orchestration
//!
//! Owns the authorize, callback, revoke, refresh and PAT transitions for a
//! user's credential on one SCM provider.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    ConnectorFactory, CredentialError, DecryptedCredential, OAuthState, connected_redirect_url,
    join_scopes, split_scopes,
};
use crate::connectors::AuthMethod;
use crate::crypto::SecretCipher;
use crate::models::scm_provider;
use crate::models::scm_user_token::{self, TOKEN_TYPE_BEARER, TOKEN_TYPE_PAT};
use crate::repositories::TokenStore;
use crate::token_refresh::{RenewalError, RenewalTrigger, TokenRenewer};

/// Guidance returned instead of a redirect for PAT-based providers
pub const PAT_GUIDANCE_MESSAGE: &str = "This provider requires a Personal Access Token. Use POST /api/v1/scm-providers/:id/token to save your PAT.";

/// Scope recorded for submitted Personal Access Tokens
pub const PAT_SCOPE: &str = "repo";

/// Result of starting a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(untagged)]
pub enum AuthorizeOutcome {
    /// Send the browser to the provider's consent page
    Redirect {
        authorization_url: String,
        state: String,
    },
    /// The provider has no OAuth flow; the user must submit a PAT
    PersonalAccessToken {
        auth_method: AuthMethod,
        message: String,
    },
}

/// Connection status for one (user, provider) pair. Never carries token material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TokenStatus {
    pub connected: bool,
    /// When the stored credential was last written
    pub connected_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

/// Column values written by an upsert; id and created_at come from the existing row
struct TokenWrite {
    access_token_encrypted: String,
    refresh_token_encrypted: Option<String>,
    token_type: String,
    expires_at: Option<DateTime<Utc>>,
    scopes: Option<String>,
}

/// Credential lifecycle orchestrator
pub struct CredentialService {
    store: Arc<dyn TokenStore>,
    cipher: Arc<dyn SecretCipher>,
    connectors: ConnectorFactory,
    renewer: Arc<TokenRenewer>,
}

impl CredentialService {
    pub fn new(
        store: Arc<dyn TokenStore>,
        cipher: Arc<dyn SecretCipher>,
        connectors: ConnectorFactory,
        renewer: Arc<TokenRenewer>,
    ) -> Self {
        Self {
            store,
            cipher,
            connectors,
            renewer,
        }
    }

    async fn load_provider(
        &self,
        provider_id: Uuid,
    ) -> Result<scm_provider::Model, CredentialError> {
        self.store
            .get_provider(provider_id)
            .await?
            .ok_or_else(|| CredentialError::not_found("provider not found"))
    }

    /// Start connecting `user_id` to a provider.
    #[instrument(skip_all, fields(provider_id = %provider_id, user_id = %user_id))]
    pub async fn authorize(
        &self,
        provider_id: Uuid,
        user_id: Uuid,
    ) -> Result<AuthorizeOutcome, CredentialError> {
        let provider = self.load_provider(provider_id).await?;

        if provider.provider_type.is_pat_based() {
            return Ok(AuthorizeOutcome::PersonalAccessToken {
                auth_method: AuthMethod::PersonalAccessToken,
                message: PAT_GUIDANCE_MESSAGE.to_string(),
            });
        }

        let connector = self.connectors.connector_for(&provider)?;
        let state = OAuthState::new(user_id, provider_id).to_string();
        let authorization_url = connector
            .authorization_endpoint(&state, &[])
            .map_err(|err| CredentialError::Upstream(format!("OAuth flow failed: {err}")))?;

        info!(provider_type = %provider.provider_type, "OAuth authorization started");

        Ok(AuthorizeOutcome::Redirect {
            authorization_url: authorization_url.to_string(),
            state,
        })
    }

    /// Complete the OAuth dance and store the issued credential.
    ///
    /// Returns the URL of the "connected" page the browser is redirected to.
    #[instrument(skip_all, fields(provider_id = %provider_id))]
    pub async fn callback(
        &self,
        provider_id: Uuid,
        code: Option<&str>,
        state: Option<&str>,
    ) -> Result<String, CredentialError> {
        let result = self.complete_callback(provider_id, code, state).await;
        let outcome = if result.is_ok() { "success" } else { "failure" };
        counter!("scm_oauth_callbacks_total", "outcome" => outcome).increment(1);
        result
    }

    async fn complete_callback(
        &self,
        provider_id: Uuid,
        code: Option<&str>,
        state: Option<&str>,
    ) -> Result<String, CredentialError> {
        let code = code
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .ok_or_else(|| CredentialError::invalid("missing authorization code"))?;

        let state = OAuthState::parse(state.unwrap_or_default())?;
        if state.provider_id != provider_id {
            warn!(
                state_provider_id = %state.provider_id,
                "OAuth state names a different provider"
            );
            return Err(CredentialError::invalid("invalid state parameter"));
        }

        let provider = self.load_provider(provider_id).await?;
        let connector = self.connectors.connector_for(&provider)?;

        let issued = connector
            .complete_authorization(code)
            .await
            .map_err(|err| CredentialError::Upstream(format!("OAuth flow failed: {err}")))?;

        let access_token_encrypted = self
            .cipher
            .seal(&issued.access_token)
            .map_err(CredentialError::encryption("encrypt access token"))?;
        let refresh_token_encrypted = issued
            .refresh_token()
            .map(|token| self.cipher.seal(token))
            .transpose()
            .map_err(CredentialError::encryption("encrypt refresh token"))?;
        let token_type = if issued.token_type.trim().is_empty() {
            TOKEN_TYPE_BEARER.to_string()
        } else {
            issued.token_type.clone()
        };

        self.upsert_token(
            state.user_id,
            provider_id,
            TokenWrite {
                access_token_encrypted,
                refresh_token_encrypted,
                token_type,
                expires_at: issued.expires_at,
                scopes: join_scopes(&issued.scopes),
            },
        )
        .await?;

        info!(
            user_id = %state.user_id,
            provider_type = %provider.provider_type,
            "SCM provider connected via OAuth"
        );

        Ok(connected_redirect_url(
            self.connectors.server_base_url(),
            provider_id,
        ))
    }

    /// Forget the user's credential. Revoking a missing credential succeeds.
    #[instrument(skip_all, fields(provider_id = %provider_id, user_id = %user_id))]
    pub async fn revoke(&self, provider_id: Uuid, user_id: Uuid) -> Result<(), CredentialError> {
        let removed = self.store.delete_user_token(user_id, provider_id).await?;
        info!(removed, "SCM token revoked");
        Ok(())
    }

    /// Renew the stored credential on request. Returns the new expiry.
    #[instrument(skip_all, fields(provider_id = %provider_id, user_id = %user_id))]
    pub async fn manual_refresh(
        &self,
        provider_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, CredentialError> {
        let mut record = self
            .store
            .get_user_token(user_id, provider_id)
            .await?
            .ok_or_else(|| CredentialError::not_found("not connected to this provider"))?;
        let provider = self.load_provider(provider_id).await?;

        let sealed_refresh = record
            .refresh_token_encrypted
            .as_deref()
            .filter(|sealed| !sealed.is_empty())
            .ok_or_else(|| CredentialError::invalid("no refresh token available"))?;
        let refresh_token = self
            .cipher
            .open(sealed_refresh)
            .map_err(CredentialError::encryption("decrypt refresh token"))?;

        // The current access token is replaced, so it is never opened here.
        let mut credential = DecryptedCredential {
            access_token: String::new(),
            refresh_token: Some(refresh_token),
            token_type: record.token_type.clone(),
            expires_at: record.expires_at.map(|at| at.with_timezone(&Utc)),
            scopes: split_scopes(record.scopes.as_deref()),
        };

        let connector = self.connectors.connector_for(&provider)?;

        self.renewer
            .renew_and_persist(
                connector.as_ref(),
                &mut record,
                &mut credential,
                RenewalTrigger::Manual,
            )
            .await
            .map_err(|err| match err {
                RenewalError::NoRefreshToken => {
                    CredentialError::invalid("no refresh token available")
                }
                RenewalError::NotConnected => {
                    CredentialError::not_found("not connected to this provider")
                }
                RenewalError::Connector(err) => {
                    CredentialError::Upstream(format!("token refresh failed: {err}"))
                }
                RenewalError::Encryption { operation, source } => {
                    CredentialError::Encryption { operation, source }
                }
                RenewalError::Storage(err) => CredentialError::Storage(err),
            })?;

        Ok(credential.expires_at)
    }

    /// Store a Personal Access Token for a PAT-based provider.
    #[instrument(skip_all, fields(provider_id = %provider_id, user_id = %user_id))]
    pub async fn save_pat(
        &self,
        provider_id: Uuid,
        user_id: Uuid,
        access_token: Option<&str>,
    ) -> Result<(), CredentialError> {
        let token = access_token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| CredentialError::invalid("access_token is required"))?;

        let provider = self.load_provider(provider_id).await?;
        if !provider.provider_type.is_pat_based() {
            return Err(CredentialError::invalid(
                "this provider uses OAuth, not Personal Access Tokens",
            ));
        }

        let access_token_encrypted = self
            .cipher
            .seal(token)
            .map_err(CredentialError::encryption("encrypt access token"))?;

        self.upsert_token(
            user_id,
            provider_id,
            TokenWrite {
                access_token_encrypted,
                refresh_token_encrypted: None,
                token_type: TOKEN_TYPE_PAT.to_string(),
                expires_at: None,
                scopes: Some(PAT_SCOPE.to_string()),
            },
        )
        .await?;

        info!(provider_type = %provider.provider_type, "Personal Access Token saved");
        Ok(())
    }

    /// Report whether the user is connected, without exposing the credential.
    pub async fn status(
        &self,
        provider_id: Uuid,
        user_id: Uuid,
    ) -> Result<TokenStatus, CredentialError> {
        let status = match self.store.get_user_token(user_id, provider_id).await? {
            Some(token) => TokenStatus {
                connected: true,
                connected_at: Some(token.updated_at.with_timezone(&Utc)),
                expires_at: token.expires_at.map(|at| at.with_timezone(&Utc)),
                token_type: Some(token.token_type),
            },
            None => TokenStatus {
                connected: false,
                connected_at: None,
                expires_at: None,
                token_type: None,
            },
        };
        Ok(status)
    }

    /// Write the credential for (user, provider), keeping the id and
    /// created_at of any existing row so reconnecting never orphans one.
    async fn upsert_token(
        &self,
        user_id: Uuid,
        provider_id: Uuid,
        write: TokenWrite,
    ) -> Result<scm_user_token::Model, CredentialError> {
        let now = Utc::now().fixed_offset();
        let (id, created_at) = match self.store.get_user_token(user_id, provider_id).await? {
            Some(existing) => (existing.id, existing.created_at),
            None => (Uuid::new_v4(), now),
        };

        let row = scm_user_token::Model {
            id,
            user_id,
            scm_provider_id: provider_id,
            access_token_encrypted: write.access_token_encrypted,
            refresh_token_encrypted: write.refresh_token_encrypted,
            token_type: write.token_type,
            expires_at: write.expires_at.map(|at| at.fixed_offset()),
            scopes: write.scopes,
            created_at,
            updated_at: now,
        };

        Ok(self.store.save_user_token(row).await?)
    }
}
