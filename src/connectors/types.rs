//! Value types exchanged with SCM connectors

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Default number of items requested per page from a provider.
pub const DEFAULT_PAGE_SIZE: u32 = 30;

/// Bearer credential issued by a provider, or reconstructed from storage.
///
/// Never persisted as-is; the token fields are sealed before storage and the
/// `Debug` output redacts them.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AccessToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
}

impl AccessToken {
    /// Returns the refresh token when one is present and non-empty.
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|token| !token.is_empty())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Page request passed to list operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Repository as reported by a provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SourceRepository {
    pub id: String,
    pub name: String,
    pub full_name: String,
    pub owner: String,
    pub description: String,
    pub default_branch: String,
    pub clone_url: String,
    pub html_url: String,
    pub private: bool,
}

/// One page of repositories
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoListResult {
    pub repositories: Vec<SourceRepository>,
    pub total_count: u64,
    pub more_pages: bool,
    pub next_page: Option<u32>,
}

/// Git tag in a repository
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GitTag {
    pub tag_name: String,
    pub target_commit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation_msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tagger_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tagged_at: Option<DateTime<Utc>>,
}

/// Git branch in a repository
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GitBranch {
    pub branch_name: String,
    pub head_commit: String,
    pub is_protected: bool,
    pub is_main_branch: bool,
}
