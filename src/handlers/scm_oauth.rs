//! # SCM OAuth Handlers
//!
//! Endpoints that connect a registry user to an SCM provider: the OAuth
//! authorize/callback pair, Personal Access Token submission, manual refresh,
//! revocation and connection status.

use axum::{
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::parse_provider_id;
use crate::auth::{UserExtension, UserHeader};
use crate::credentials::{AuthorizeOutcome, TokenStatus};
use crate::error::ApiError;
use crate::server::AppState;

/// Generic acknowledgement body
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: &str) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
        })
    }
}

/// Query parameters the provider appends when redirecting back
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct CallbackQuery {
    /// Authorization code to exchange
    pub code: Option<String>,
    /// State value issued by the authorize endpoint
    pub state: Option<String>,
}

/// Response of a manual token refresh
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RefreshResponse {
    pub message: String,
    /// New expiry; null when the renewed token does not expire
    pub expires_at: Option<DateTime<Utc>>,
}

/// Personal Access Token submission
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct SavePatRequest {
    pub access_token: Option<String>,
}

/// Start connecting the caller to an SCM provider
///
/// OAuth providers return the consent URL to send the browser to. PAT-based
/// providers return guidance to submit a token instead.
#[utoipa::path(
    get,
    path = "/api/v1/scm-providers/{id}/oauth/authorize",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "SCM provider ID (UUID)"),
        UserHeader
    ),
    responses(
        (status = 200, description = "Authorization URL or PAT guidance", body = AuthorizeOutcome, example = json!({
            "authorization_url": "https://github.com/login/oauth/authorize?client_id=abc&state=...",
            "state": "6f1c2a4e-3b0d-4c53-9d43-0a9f8e7b1c11:0b8e5d3a-2f4c-4e1b-8a9d-7c6b5a4f3e2d"
        })),
        (status = 400, description = "Invalid provider ID", body = ApiError),
        (status = 401, description = "Missing or invalid credentials", body = ApiError),
        (status = 404, description = "Provider not found", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "scm-oauth"
)]
pub async fn authorize(
    State(state): State<AppState>,
    UserExtension(user): UserExtension,
    Path(id): Path<String>,
) -> Result<Json<AuthorizeOutcome>, ApiError> {
    let provider_id = parse_provider_id(&id)?;
    let outcome = state.credentials.authorize(provider_id, user.0).await?;
    Ok(Json(outcome))
}

/// Complete the OAuth flow
///
/// Unauthenticated: the browser arrives here from the provider, and the
/// user's identity is recovered from `state`. Redirects to the admin UI.
#[utoipa::path(
    get,
    path = "/api/v1/scm-providers/{id}/oauth/callback",
    params(
        ("id" = String, Path, description = "SCM provider ID (UUID)"),
        CallbackQuery
    ),
    responses(
        (status = 302, description = "Connected; redirect to the admin UI"),
        (status = 400, description = "Missing code or invalid state", body = ApiError),
        (status = 404, description = "Provider not found", body = ApiError),
        (status = 500, description = "Token exchange or storage failed", body = ApiError)
    ),
    tag = "scm-oauth"
)]
pub async fn callback(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, ApiError> {
    let provider_id = parse_provider_id(&id)?;
    let location = state
        .credentials
        .callback(provider_id, query.code.as_deref(), query.state.as_deref())
        .await?;

    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}

/// Revoke the caller's stored credential
#[utoipa::path(
    delete,
    path = "/api/v1/scm-providers/{id}/oauth/token",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "SCM provider ID (UUID)"),
        UserHeader
    ),
    responses(
        (status = 200, description = "Token revoked (or was never stored)", body = MessageResponse),
        (status = 400, description = "Invalid provider ID", body = ApiError),
        (status = 401, description = "Missing or invalid credentials", body = ApiError)
    ),
    tag = "scm-oauth"
)]
pub async fn revoke(
    State(state): State<AppState>,
    UserExtension(user): UserExtension,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let provider_id = parse_provider_id(&id)?;
    state.credentials.revoke(provider_id, user.0).await?;
    Ok(MessageResponse::new("OAuth token revoked"))
}

/// Renew the caller's stored credential now
#[utoipa::path(
    post,
    path = "/api/v1/scm-providers/{id}/oauth/refresh",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "SCM provider ID (UUID)"),
        UserHeader
    ),
    responses(
        (status = 200, description = "Token refreshed", body = RefreshResponse),
        (status = 400, description = "Invalid provider ID or no refresh token", body = ApiError),
        (status = 401, description = "Missing or invalid credentials", body = ApiError),
        (status = 404, description = "Provider not found or not connected", body = ApiError),
        (status = 500, description = "Provider refused to renew", body = ApiError)
    ),
    tag = "scm-oauth"
)]
pub async fn refresh(
    State(state): State<AppState>,
    UserExtension(user): UserExtension,
    Path(id): Path<String>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let provider_id = parse_provider_id(&id)?;
    let expires_at = state.credentials.manual_refresh(provider_id, user.0).await?;
    Ok(Json(RefreshResponse {
        message: "token refreshed".to_string(),
        expires_at,
    }))
}

/// Store a Personal Access Token for a PAT-based provider
#[utoipa::path(
    post,
    path = "/api/v1/scm-providers/{id}/token",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "SCM provider ID (UUID)"),
        UserHeader
    ),
    request_body = SavePatRequest,
    responses(
        (status = 200, description = "Token saved", body = MessageResponse),
        (status = 400, description = "Missing token or provider uses OAuth", body = ApiError),
        (status = 401, description = "Missing or invalid credentials", body = ApiError),
        (status = 404, description = "Provider not found", body = ApiError)
    ),
    tag = "scm-oauth"
)]
pub async fn save_pat(
    State(state): State<AppState>,
    UserExtension(user): UserExtension,
    Path(id): Path<String>,
    body: Result<Json<SavePatRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let provider_id = parse_provider_id(&id)?;
    let Json(body) = body?;
    state
        .credentials
        .save_pat(provider_id, user.0, body.access_token.as_deref())
        .await?;
    Ok(MessageResponse::new("Personal Access Token saved successfully"))
}

/// Report whether the caller is connected to a provider
#[utoipa::path(
    get,
    path = "/api/v1/scm-providers/{id}/oauth/token",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "SCM provider ID (UUID)"),
        UserHeader
    ),
    responses(
        (status = 200, description = "Connection status", body = TokenStatus, example = json!({
            "connected": true,
            "connected_at": "2026-01-12T09:30:00Z",
            "expires_at": "2026-01-12T17:30:00Z",
            "token_type": "bearer"
        })),
        (status = 400, description = "Invalid provider ID", body = ApiError),
        (status = 401, description = "Missing or invalid credentials", body = ApiError)
    ),
    tag = "scm-oauth"
)]
pub async fn token_status(
    State(state): State<AppState>,
    UserExtension(user): UserExtension,
    Path(id): Path<String>,
) -> Result<Json<TokenStatus>, ApiError> {
    let provider_id = parse_provider_id(&id)?;
    let status = state.credentials.status(provider_id, user.0).await?;
    Ok(Json(status))
}
