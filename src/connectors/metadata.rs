//! Provider kind metadata
//!
//! Defines the supported SCM provider types and how each one authenticates.

use std::fmt;
use std::str::FromStr;

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Authentication flow a provider kind uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum AuthMethod {
    /// OAuth 2.0 authorization code flow
    #[serde(rename = "oauth")]
    OAuth2,
    /// Manually issued Personal Access Token
    #[serde(rename = "pat")]
    PersonalAccessToken,
}

/// Supported SCM provider types
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum ProviderKind {
    #[sea_orm(string_value = "github")]
    #[serde(rename = "github")]
    GitHub,

    #[sea_orm(string_value = "gitlab")]
    #[serde(rename = "gitlab")]
    GitLab,

    #[sea_orm(string_value = "azuredevops")]
    #[serde(rename = "azuredevops")]
    AzureDevOps,

    #[sea_orm(string_value = "bitbucket_cloud")]
    #[serde(rename = "bitbucket_cloud")]
    BitbucketCloud,

    #[sea_orm(string_value = "bitbucket_dc")]
    #[serde(rename = "bitbucket_dc")]
    BitbucketDataCenter,
}

/// Error returned when parsing an unknown provider type string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported provider type '{0}'")]
pub struct UnknownProviderKind(pub String);

impl ProviderKind {
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::GitHub,
        ProviderKind::GitLab,
        ProviderKind::AzureDevOps,
        ProviderKind::BitbucketCloud,
        ProviderKind::BitbucketDataCenter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::GitHub => "github",
            ProviderKind::GitLab => "gitlab",
            ProviderKind::AzureDevOps => "azuredevops",
            ProviderKind::BitbucketCloud => "bitbucket_cloud",
            ProviderKind::BitbucketDataCenter => "bitbucket_dc",
        }
    }

    pub fn auth_method(&self) -> AuthMethod {
        match self {
            ProviderKind::BitbucketDataCenter => AuthMethod::PersonalAccessToken,
            _ => AuthMethod::OAuth2,
        }
    }

    /// Self-hosted PAT providers have no OAuth application to speak of.
    pub fn is_pat_based(&self) -> bool {
        self.auth_method() == AuthMethod::PersonalAccessToken
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = UnknownProviderKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| UnknownProviderKind(value.to_string()))
    }
}
