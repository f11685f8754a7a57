//! Connectors module
//!
//! This module provides the SCM connector SDK including:
//! - The `Connector` trait every provider adapter implements
//! - Provider kind metadata and the builder registry used to select an adapter
//! - Value types exchanged with adapters

pub mod metadata;
pub mod registry;
pub mod trait_;
pub mod types;

pub use metadata::{AuthMethod, ProviderKind, UnknownProviderKind};
pub use registry::{ConnectorBuilder, ConnectorRegistry, RegistryError};
pub use trait_::{AUTH_FAILURE_STATUSES, Connector, ConnectorError, ConnectorSettings};
pub use types::{
    AccessToken, DEFAULT_PAGE_SIZE, GitBranch, GitTag, Pagination, RepoListResult,
    SourceRepository,
};
