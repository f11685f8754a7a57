//! # API Handlers
//!
//! This module contains all the HTTP endpoint handlers for the registry SCM API.

pub mod scm_oauth;
pub mod scm_providers;
pub mod scm_repositories;

use axum::{extract::State, http::StatusCode, response::Json};
use uuid::Uuid;

use crate::db;
use crate::error::{ApiError, bad_request};
use crate::models::{HealthStatus, ServiceInfo};
use crate::server::AppState;

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

/// Liveness probe that also pings the database
#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 200, description = "Service and database are healthy", body = HealthStatus),
        (status = 503, description = "Database unreachable", body = HealthStatus)
    ),
    tag = "root"
)]
pub async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    match db::health_check(&state.db).await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthStatus {
                status: "ok".to_string(),
                database: true,
            }),
        ),
        Err(err) => {
            tracing::error!(error = %err, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthStatus {
                    status: "degraded".to_string(),
                    database: false,
                }),
            )
        }
    }
}

/// Parse the `{id}` path segment of an SCM provider route.
pub(crate) fn parse_provider_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|_| bad_request("invalid provider ID"))
}
