//! # Data Models
//!
//! This module contains the persistence entities and shared response models.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod scm_provider;
pub mod scm_user_token;

pub use scm_provider::Entity as ScmProvider;
pub use scm_user_token::Entity as ScmUserToken;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "registry-scm".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Liveness response including database reachability
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthStatus {
    /// "ok" or "degraded"
    pub status: String,
    pub database: bool,
}
