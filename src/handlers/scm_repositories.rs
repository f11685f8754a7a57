//! # SCM Repository Handlers
//!
//! Read-only views of the caller's repositories, tags and branches on an SCM
//! provider. The stored credential is renewed transparently when needed.

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::parse_provider_id;
use crate::auth::{UserExtension, UserHeader};
use crate::connectors::{GitBranch, GitTag, SourceRepository};
use crate::error::{ApiError, bad_request};
use crate::server::AppState;

/// Query parameters for repository listing
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct RepositoryQuery {
    /// Optional search term; when empty all repositories are listed
    pub search: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RepositoriesResponse {
    pub repositories: Vec<SourceRepository>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TagsResponse {
    pub tags: Vec<GitTag>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BranchesResponse {
    pub branches: Vec<GitBranch>,
}

fn require_segment<'a>(value: &'a str, name: &str) -> Result<&'a str, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(bad_request(&format!("{name} is required")));
    }
    Ok(value)
}

/// List or search the caller's repositories
#[utoipa::path(
    get,
    path = "/api/v1/scm-providers/{id}/repositories",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "SCM provider ID (UUID)"),
        RepositoryQuery,
        UserHeader
    ),
    responses(
        (status = 200, description = "Repositories visible to the caller", body = RepositoriesResponse),
        (status = 400, description = "Invalid provider ID", body = ApiError),
        (status = 401, description = "Not connected, or the credential must be reconnected", body = ApiError),
        (status = 404, description = "Provider not found", body = ApiError),
        (status = 500, description = "Provider error", body = ApiError)
    ),
    tag = "scm-repositories"
)]
pub async fn list_repositories(
    State(state): State<AppState>,
    UserExtension(user): UserExtension,
    Path(id): Path<String>,
    Query(query): Query<RepositoryQuery>,
) -> Result<Json<RepositoriesResponse>, ApiError> {
    let provider_id = parse_provider_id(&id)?;
    let repositories = state
        .scm
        .list_repositories(provider_id, user.0, query.search.as_deref())
        .await?;
    Ok(Json(RepositoriesResponse { repositories }))
}

/// List tags of a repository
#[utoipa::path(
    get,
    path = "/api/v1/scm-providers/{id}/repositories/{owner}/{repo}/tags",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "SCM provider ID (UUID)"),
        ("owner" = String, Path, description = "Repository owner or project"),
        ("repo" = String, Path, description = "Repository name"),
        UserHeader
    ),
    responses(
        (status = 200, description = "Tags of the repository", body = TagsResponse),
        (status = 400, description = "Invalid provider ID", body = ApiError),
        (status = 401, description = "Not connected, or the credential must be reconnected", body = ApiError),
        (status = 404, description = "Provider not found", body = ApiError),
        (status = 500, description = "Provider error", body = ApiError)
    ),
    tag = "scm-repositories"
)]
pub async fn list_tags(
    State(state): State<AppState>,
    UserExtension(user): UserExtension,
    Path((id, owner, repo)): Path<(String, String, String)>,
) -> Result<Json<TagsResponse>, ApiError> {
    let provider_id = parse_provider_id(&id)?;
    let owner = require_segment(&owner, "owner")?;
    let repo = require_segment(&repo, "repo")?;
    let tags = state
        .scm
        .list_tags(provider_id, user.0, owner, repo)
        .await?;
    Ok(Json(TagsResponse { tags }))
}

/// List branches of a repository
#[utoipa::path(
    get,
    path = "/api/v1/scm-providers/{id}/repositories/{owner}/{repo}/branches",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "SCM provider ID (UUID)"),
        ("owner" = String, Path, description = "Repository owner or project"),
        ("repo" = String, Path, description = "Repository name"),
        UserHeader
    ),
    responses(
        (status = 200, description = "Branches of the repository", body = BranchesResponse),
        (status = 400, description = "Invalid provider ID", body = ApiError),
        (status = 401, description = "Not connected, or the credential must be reconnected", body = ApiError),
        (status = 404, description = "Provider not found", body = ApiError),
        (status = 500, description = "Provider error", body = ApiError)
    ),
    tag = "scm-repositories"
)]
pub async fn list_branches(
    State(state): State<AppState>,
    UserExtension(user): UserExtension,
    Path((id, owner, repo)): Path<(String, String, String)>,
) -> Result<Json<BranchesResponse>, ApiError> {
    let provider_id = parse_provider_id(&id)?;
    let owner = require_segment(&owner, "owner")?;
    let repo = require_segment(&repo, "repo")?;
    let branches = state
        .scm
        .list_branches(provider_id, user.0, owner, repo)
        .await?;
    Ok(Json(BranchesResponse { branches }))
}
