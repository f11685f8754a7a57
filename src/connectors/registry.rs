//! Connector registry
//!
//! Factory of connector builders keyed by [`ProviderKind`]. Each stored provider
//! configuration is turned into a live connector by looking up the builder for
//! its type, after the settings pass validation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::metadata::ProviderKind;
use super::trait_::{Connector, ConnectorError, ConnectorSettings};

/// Error type for registry operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("no connector available for provider type '{kind}'")]
    ConnectorUnavailable { kind: ProviderKind },
    #[error("invalid connector settings: {reason}")]
    InvalidSettings { reason: String },
    #[error("connector construction failed: {0}")]
    Build(#[from] ConnectorError),
}

/// Constructs a connector from validated settings
pub type ConnectorBuilder =
    Arc<dyn Fn(&ConnectorSettings) -> Result<Arc<dyn Connector>, ConnectorError> + Send + Sync>;

/// Registry of connector builders, one per provider type
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    builders: HashMap<ProviderKind, ConnectorBuilder>,
}

impl ConnectorRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the builder for a provider type
    pub fn register<F>(&mut self, kind: ProviderKind, builder: F)
    where
        F: Fn(&ConnectorSettings) -> Result<Arc<dyn Connector>, ConnectorError>
            + Send
            + Sync
            + 'static,
    {
        if self.builders.insert(kind, Arc::new(builder)).is_some() {
            tracing::debug!(provider_type = %kind, "Replaced connector builder");
        }
    }

    /// Builder-style variant of [`ConnectorRegistry::register`]
    pub fn with<F>(mut self, kind: ProviderKind, builder: F) -> Self
    where
        F: Fn(&ConnectorSettings) -> Result<Arc<dyn Connector>, ConnectorError>
            + Send
            + Sync
            + 'static,
    {
        self.register(kind, builder);
        self
    }

    /// Validate `settings` and build the connector registered for its type
    pub fn build(&self, settings: &ConnectorSettings) -> Result<Arc<dyn Connector>, RegistryError> {
        validate_settings(settings)?;

        let builder =
            self.builders
                .get(&settings.kind)
                .ok_or(RegistryError::ConnectorUnavailable {
                    kind: settings.kind,
                })?;

        Ok(builder(settings)?)
    }

    pub fn has_kind(&self, kind: ProviderKind) -> bool {
        self.builders.contains_key(&kind)
    }

    /// Registered provider types, sorted for stable ordering
    pub fn available_kinds(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.builders.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

impl fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("kinds", &self.available_kinds())
            .finish()
    }
}

/// OAuth providers need an application identity; PAT providers need a host.
pub fn validate_settings(settings: &ConnectorSettings) -> Result<(), RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidSettings {
        reason: reason.to_string(),
    };

    if settings.kind.is_pat_based() {
        if settings.instance_base_url.trim().is_empty() {
            return Err(invalid("instance base URL is required for PAT providers"));
        }
        return Ok(());
    }

    if settings.client_id.trim().is_empty() {
        return Err(invalid("client ID is required"));
    }
    if settings.client_secret.is_empty() {
        return Err(invalid("client secret is required"));
    }
    if settings.callback_url.trim().is_empty() {
        return Err(invalid("callback URL is required"));
    }

    Ok(())
}
