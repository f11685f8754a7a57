//! # Token Renewal
//!
//! Shared renewal side effect used by the resilient SCM client (proactive and
//! reactive renewal) and by the manual refresh endpoint. Renewal for one
//! (user, provider) pair is single-flight: concurrent callers queue on a keyed
//! gate, and a caller that finds the stored credential already replaced adopts
//! it instead of renewing a second time.

use chrono::Utc;
use metrics::{counter, histogram};
use sea_orm::DbErr;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::connectors::{AccessToken, Connector, ConnectorError};
use crate::credentials::open_credential;
use crate::crypto::{CryptoError, SecretCipher};
use crate::models::scm_user_token;
use crate::repositories::TokenStore;

type GateKey = (Uuid, Uuid);
type GateMap = Arc<StdMutex<HashMap<GateKey, Arc<Mutex<()>>>>>;

/// Holds one (user, provider) gate; the map entry is dropped with the last lease
/// even when the renewing future is cancelled.
struct GateLease {
    gates: GateMap,
    key: GateKey,
    gate: Arc<Mutex<()>>,
}

impl GateLease {
    fn acquire(gates: &GateMap, key: GateKey) -> Self {
        let gate = {
            let mut map = gates.lock().unwrap_or_else(|poison| poison.into_inner());
            Arc::clone(map.entry(key).or_default())
        };
        Self {
            gates: Arc::clone(gates),
            key,
            gate,
        }
    }
}

impl Drop for GateLease {
    fn drop(&mut self) {
        let mut map = self
            .gates
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        // One reference lives in the map, one is ours.
        if Arc::strong_count(&self.gate) <= 2 {
            map.remove(&self.key);
        }
    }
}

/// What caused a renewal, used as a metrics label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalTrigger {
    /// The stored expiry fell inside the renewal window before a read
    Proactive,
    /// A read was rejected with an auth-failure status
    Reactive,
    /// The user asked for a refresh explicitly
    Manual,
}

impl RenewalTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenewalTrigger::Proactive => "proactive",
            RenewalTrigger::Reactive => "reactive",
            RenewalTrigger::Manual => "manual",
        }
    }
}

/// How a successful renewal obtained its credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalOutcome {
    /// The connector issued a new token which was persisted
    Renewed,
    /// Another request renewed first; its stored credential was reused
    Adopted,
}

#[derive(Debug, Error)]
pub enum RenewalError {
    #[error("no refresh token available")]
    NoRefreshToken,
    #[error("token was removed while renewing")]
    NotConnected,
    #[error(transparent)]
    Connector(#[from] ConnectorError),
    #[error("failed to {operation}: {source}")]
    Encryption {
        operation: &'static str,
        source: CryptoError,
    },
    #[error("token store error: {0}")]
    Storage(#[from] DbErr),
}

impl RenewalError {
    /// True when the failure came from the provider rather than from this service
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            RenewalError::NoRefreshToken | RenewalError::Connector(_)
        )
    }
}

/// Renews stored SCM credentials and persists the result in place
pub struct TokenRenewer {
    store: Arc<dyn TokenStore>,
    cipher: Arc<dyn SecretCipher>,
    /// Per (user, provider) gates serializing renewal
    in_flight: GateMap,
}

impl TokenRenewer {
    pub fn new(store: Arc<dyn TokenStore>, cipher: Arc<dyn SecretCipher>) -> Self {
        Self {
            store,
            cipher,
            in_flight: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Renew `credential` through `connector` and write the result to `record`'s row.
    ///
    /// On success both `record` and `credential` reflect the stored state, so a
    /// retried read can use the fresh token without touching storage again.
    #[instrument(
        skip_all,
        fields(
            user_id = %record.user_id,
            provider_id = %record.scm_provider_id,
            trigger = trigger.as_str()
        )
    )]
    pub async fn renew_and_persist(
        &self,
        connector: &dyn Connector,
        record: &mut scm_user_token::Model,
        credential: &mut AccessToken,
        trigger: RenewalTrigger,
    ) -> Result<RenewalOutcome, RenewalError> {
        let trigger_label = trigger.as_str();
        counter!("scm_token_renewal_attempts_total", "trigger" => trigger_label).increment(1);
        let started = std::time::Instant::now();

        let lease = GateLease::acquire(&self.in_flight, (record.user_id, record.scm_provider_id));
        let result = {
            let _guard = lease.gate.lock().await;
            self.renew_locked(connector, record, credential).await
        };
        drop(lease);

        histogram!("scm_token_renewal_latency_ms", "trigger" => trigger_label)
            .record(started.elapsed().as_secs_f64() * 1_000.0);

        match &result {
            Ok(outcome) => {
                counter!("scm_token_renewal_success_total", "trigger" => trigger_label).increment(1);
                info!(outcome = ?outcome, "SCM token renewed");
            }
            Err(err) => {
                counter!("scm_token_renewal_failure_total", "trigger" => trigger_label).increment(1);
                warn!(error = %err, "SCM token renewal failed");
            }
        }

        result
    }

    async fn renew_locked(
        &self,
        connector: &dyn Connector,
        record: &mut scm_user_token::Model,
        credential: &mut AccessToken,
    ) -> Result<RenewalOutcome, RenewalError> {
        let stored = self
            .store
            .get_user_token(record.user_id, record.scm_provider_id)
            .await?
            .ok_or(RenewalError::NotConnected)?;

        if stored.access_token_encrypted != record.access_token_encrypted {
            debug!("stored credential changed while waiting; adopting it");
            let adopted = open_credential(self.cipher.as_ref(), &stored).map_err(|source| {
                RenewalError::Encryption {
                    operation: "decrypt access token",
                    source,
                }
            })?;
            *credential = adopted;
            *record = stored;
            return Ok(RenewalOutcome::Adopted);
        }

        let refresh_token = credential
            .refresh_token()
            .ok_or(RenewalError::NoRefreshToken)?
            .to_string();

        let renewed = connector.renew_token(&refresh_token).await?;

        let access_token_encrypted =
            self.cipher
                .seal(&renewed.access_token)
                .map_err(|source| RenewalError::Encryption {
                    operation: "encrypt access token",
                    source,
                })?;

        // Providers that do not rotate refresh tokens return none; keep the old one.
        let rotated_refresh = renewed.refresh_token().map(str::to_string);
        let refresh_token_encrypted = match rotated_refresh.as_deref() {
            Some(token) => Some(self.cipher.seal(token).map_err(|source| {
                RenewalError::Encryption {
                    operation: "encrypt refresh token",
                    source,
                }
            })?),
            None => stored.refresh_token_encrypted.clone(),
        };

        let updated = scm_user_token::Model {
            access_token_encrypted,
            refresh_token_encrypted,
            expires_at: renewed.expires_at.map(|at| at.fixed_offset()),
            updated_at: Utc::now().fixed_offset(),
            ..stored
        };
        let saved = self.store.save_user_token(updated).await?;

        credential.access_token = renewed.access_token;
        credential.expires_at = renewed.expires_at;
        if let Some(token) = rotated_refresh {
            credential.refresh_token = Some(token);
        }
        *record = saved;

        Ok(RenewalOutcome::Renewed)
    }

    #[cfg(test)]
    fn gate_count(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .len()
    }
}
