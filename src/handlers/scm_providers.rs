//! # SCM Provider Handlers
//!
//! Admin endpoints for SCM provider configurations.

use axum::{
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::parse_provider_id;
use crate::auth::UserHeader;
use crate::credentials::{NewProvider, ProviderView, UpdateProvider};
use crate::error::ApiError;
use crate::server::AppState;

/// Query parameters for provider listing
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct ListProvidersQuery {
    /// Restrict to one organization's providers; global providers are always included
    pub organization_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProvidersResponse {
    pub providers: Vec<ProviderView>,
}

/// Create an SCM provider configuration
#[utoipa::path(
    post,
    path = "/api/v1/scm-providers",
    security(("bearer_auth" = [])),
    params(UserHeader),
    request_body = NewProvider,
    responses(
        (status = 201, description = "Provider created", body = ProviderView),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Missing or invalid credentials", body = ApiError)
    ),
    tag = "scm-providers"
)]
pub async fn create_provider(
    State(state): State<AppState>,
    body: Result<Json<NewProvider>, JsonRejection>,
) -> Result<(StatusCode, Json<ProviderView>), ApiError> {
    let Json(request) = body?;
    let provider = state.providers.create(request).await?;
    Ok((StatusCode::CREATED, Json(provider)))
}

/// List SCM provider configurations
#[utoipa::path(
    get,
    path = "/api/v1/scm-providers",
    security(("bearer_auth" = [])),
    params(ListProvidersQuery, UserHeader),
    responses(
        (status = 200, description = "Provider configurations", body = ProvidersResponse),
        (status = 401, description = "Missing or invalid credentials", body = ApiError)
    ),
    tag = "scm-providers"
)]
pub async fn list_providers(
    State(state): State<AppState>,
    Query(query): Query<ListProvidersQuery>,
) -> Result<Json<ProvidersResponse>, ApiError> {
    let providers = state.providers.list(query.organization_id).await?;
    Ok(Json(ProvidersResponse { providers }))
}

/// Get one SCM provider configuration
#[utoipa::path(
    get,
    path = "/api/v1/scm-providers/{id}",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "SCM provider ID (UUID)"),
        UserHeader
    ),
    responses(
        (status = 200, description = "Provider configuration", body = ProviderView),
        (status = 400, description = "Invalid provider ID", body = ApiError),
        (status = 401, description = "Missing or invalid credentials", body = ApiError),
        (status = 404, description = "Provider not found", body = ApiError)
    ),
    tag = "scm-providers"
)]
pub async fn get_provider(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProviderView>, ApiError> {
    let provider_id = parse_provider_id(&id)?;
    Ok(Json(state.providers.get(provider_id).await?))
}

/// Update an SCM provider configuration
///
/// All fields are optional. Rotating the client secret or deactivating a
/// provider keeps every user's stored credential.
#[utoipa::path(
    put,
    path = "/api/v1/scm-providers/{id}",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "SCM provider ID (UUID)"),
        UserHeader
    ),
    request_body = UpdateProvider,
    responses(
        (status = 200, description = "Provider updated", body = ProviderView),
        (status = 400, description = "Invalid provider ID or validation error", body = ApiError),
        (status = 401, description = "Missing or invalid credentials", body = ApiError),
        (status = 404, description = "Provider not found", body = ApiError)
    ),
    tag = "scm-providers"
)]
pub async fn update_provider(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<UpdateProvider>, JsonRejection>,
) -> Result<Json<ProviderView>, ApiError> {
    let provider_id = parse_provider_id(&id)?;
    let Json(request) = body?;
    Ok(Json(state.providers.update(provider_id, request).await?))
}

/// Delete an SCM provider configuration and its stored credentials
#[utoipa::path(
    delete,
    path = "/api/v1/scm-providers/{id}",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "SCM provider ID (UUID)"),
        UserHeader
    ),
    responses(
        (status = 204, description = "Provider deleted"),
        (status = 400, description = "Invalid provider ID", body = ApiError),
        (status = 401, description = "Missing or invalid credentials", body = ApiError),
        (status = 404, description = "Provider not found", body = ApiError)
    ),
    tag = "scm-providers"
)]
pub async fn delete_provider(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let provider_id = parse_provider_id(&id)?;
    state.providers.delete(provider_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
