//! Resilient SCM reads
//!
//! Wraps repository, tag and branch reads with proactive renewal (before the
//! stored expiry enters the renewal window) and a single reactive renewal
//! plus retry when the provider rejects the credential.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{ConnectorFactory, CredentialError, open_credential};
use crate::connectors::{
    AccessToken, Connector, ConnectorError, GitBranch, GitTag, Pagination, SourceRepository,
};
use crate::crypto::SecretCipher;
use crate::repositories::TokenStore;
use crate::token_refresh::{RenewalError, RenewalTrigger, TokenRenewer};

/// Whether `credential` should be renewed before use at `now`.
///
/// Requires both a refresh token and an expiry; a credential without expiry
/// never expires.
pub fn renewal_due(credential: &AccessToken, window: Duration, now: DateTime<Utc>) -> bool {
    credential.refresh_token().is_some()
        && credential
            .expires_at
            .is_some_and(|expires_at| now >= expires_at - window)
}

/// SCM client that keeps the caller's stored credential fresh
pub struct ResilientScmClient {
    store: Arc<dyn TokenStore>,
    cipher: Arc<dyn SecretCipher>,
    connectors: ConnectorFactory,
    renewer: Arc<TokenRenewer>,
    renewal_window: Duration,
}

impl ResilientScmClient {
    pub fn new(
        store: Arc<dyn TokenStore>,
        cipher: Arc<dyn SecretCipher>,
        connectors: ConnectorFactory,
        renewer: Arc<TokenRenewer>,
        renewal_window: Duration,
    ) -> Self {
        Self {
            store,
            cipher,
            connectors,
            renewer,
            renewal_window,
        }
    }

    /// List repositories, or search them when `search` is non-empty.
    pub async fn list_repositories(
        &self,
        provider_id: Uuid,
        user_id: Uuid,
        search: Option<&str>,
    ) -> Result<Vec<SourceRepository>, CredentialError> {
        let search = search
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(str::to_string);

        let result = self
            .with_renewal(provider_id, user_id, "repositories", move |connector, credential| {
                let search = search.clone();
                async move {
                    match search {
                        Some(term) => {
                            connector
                                .search_repositories(&credential, &term, Pagination::default())
                                .await
                        }
                        None => {
                            connector
                                .fetch_repositories(&credential, Pagination::default())
                                .await
                        }
                    }
                }
            })
            .await?;

        Ok(result.repositories)
    }

    pub async fn list_tags(
        &self,
        provider_id: Uuid,
        user_id: Uuid,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<GitTag>, CredentialError> {
        let (owner, repo) = (owner.to_string(), repo.to_string());
        self.with_renewal(provider_id, user_id, "tags", move |connector, credential| {
            let (owner, repo) = (owner.clone(), repo.clone());
            async move {
                connector
                    .fetch_tags(&credential, &owner, &repo, Pagination::default())
                    .await
            }
        })
        .await
    }

    pub async fn list_branches(
        &self,
        provider_id: Uuid,
        user_id: Uuid,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<GitBranch>, CredentialError> {
        let (owner, repo) = (owner.to_string(), repo.to_string());
        self.with_renewal(provider_id, user_id, "branches", move |connector, credential| {
            let (owner, repo) = (owner.clone(), repo.clone());
            async move {
                connector
                    .fetch_branches(&credential, &owner, &repo, Pagination::default())
                    .await
            }
        })
        .await
    }

    /// Run `read` with the caller's credential, renewing it at most twice:
    /// once proactively and once in reaction to an auth failure.
    #[instrument(skip_all, fields(provider_id = %provider_id, user_id = %user_id, resource = resource))]
    async fn with_renewal<T, F, Fut>(
        &self,
        provider_id: Uuid,
        user_id: Uuid,
        resource: &'static str,
        read: F,
    ) -> Result<T, CredentialError>
    where
        F: Fn(Arc<dyn Connector>, AccessToken) -> Fut,
        Fut: Future<Output = Result<T, ConnectorError>>,
    {
        let provider = self
            .store
            .get_provider(provider_id)
            .await?
            .ok_or_else(|| CredentialError::not_found("provider not found"))?;
        let mut record = self
            .store
            .get_user_token(user_id, provider_id)
            .await?
            .ok_or_else(|| {
                CredentialError::Unauthenticated("not connected to this provider".to_string())
            })?;

        let mut credential = open_credential(self.cipher.as_ref(), &record)
            .map_err(CredentialError::encryption("decrypt access token"))?;
        let connector = self.connectors.connector_for(&provider)?;

        if renewal_due(&credential, self.renewal_window, Utc::now()) {
            debug!("credential inside renewal window; renewing before read");
            match self
                .renewer
                .renew_and_persist(
                    connector.as_ref(),
                    &mut record,
                    &mut credential,
                    RenewalTrigger::Proactive,
                )
                .await
            {
                Ok(_) => {}
                Err(err) if err.is_upstream() => {
                    warn!(error = %err, "proactive renewal failed; using existing credential");
                }
                Err(err) => return Err(renewal_failure(err)),
            }
        }

        let err = match read(Arc::clone(&connector), credential.clone()).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_auth_failure() {
            return Err(read_failure(resource, err));
        }
        if credential.refresh_token().is_none() {
            warn!(error = %err, "credential rejected and cannot be renewed");
            return Err(CredentialError::UpstreamAuthFailure);
        }

        counter!("scm_reactive_retry_total", "resource" => resource).increment(1);
        warn!(status = ?err.status(), "credential rejected; renewing and retrying once");

        self.renewer
            .renew_and_persist(
                connector.as_ref(),
                &mut record,
                &mut credential,
                RenewalTrigger::Reactive,
            )
            .await
            .map_err(renewal_failure)?;

        match read(connector, credential).await {
            Ok(value) => Ok(value),
            Err(err) if err.is_auth_failure() => {
                warn!(error = %err, "renewed credential rejected");
                Err(CredentialError::UpstreamAuthFailure)
            }
            Err(err) => Err(read_failure(resource, err)),
        }
    }
}

fn read_failure(resource: &str, err: ConnectorError) -> CredentialError {
    CredentialError::Upstream(format!("failed to list {resource}: {err}"))
}

fn renewal_failure(err: RenewalError) -> CredentialError {
    match err {
        RenewalError::NoRefreshToken | RenewalError::Connector(_) => {
            CredentialError::UpstreamAuthFailure
        }
        RenewalError::NotConnected => {
            CredentialError::Unauthenticated("not connected to this provider".to_string())
        }
        RenewalError::Encryption { operation, source } => {
            CredentialError::Encryption { operation, source }
        }
        RenewalError::Storage(err) => CredentialError::Storage(err),
    }
}
