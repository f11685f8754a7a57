//! # Authentication
//!
//! This module provides API bearer authentication and user identity header
//! validation for protected SCM endpoints.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{ApiError, unauthorized, unauthorized_with_trace_id};
use crate::telemetry::TraceContext;

/// Header carrying the authenticated registry user's identity
pub const USER_ID_HEADER: &str = "X-User-Id";

/// User ID wrapper for type safety
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserId(pub Uuid);

/// Extractor for the authenticated user from request extensions
#[derive(Debug, Clone, Copy)]
pub struct UserExtension(pub UserId);

/// Authentication middleware that validates bearer tokens and the user header
pub async fn auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let trace_id = request
        .extensions()
        .get::<TraceContext>()
        .map(|ctx| ctx.trace_id.clone());

    let headers = request.headers();
    let token = extract_bearer_token(headers, trace_id.clone())?;
    validate_token(&config, token, trace_id.clone())?;

    let user = extract_user_id(headers, trace_id)?;
    tracing::debug!(user_id = %user.0, "Authenticated API request");

    request.extensions_mut().insert(UserExtension(user));

    Ok(next.run(request).await)
}

fn extract_bearer_token(headers: &HeaderMap, trace_id: Option<String>) -> Result<&str, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| {
            unauthorized_with_trace_id(Some("Missing Authorization header"), trace_id.clone())
        })?
        .to_str()
        .map_err(|_| {
            unauthorized_with_trace_id(Some("Invalid Authorization header"), trace_id.clone())
        })?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            unauthorized_with_trace_id(
                Some("Authorization header must use Bearer scheme"),
                trace_id,
            )
        })
}

fn validate_token(
    config: &AppConfig,
    token: &str,
    trace_id: Option<String>,
) -> Result<(), ApiError> {
    let is_valid = config
        .api_tokens
        .iter()
        .any(|configured| ConstantTimeEq::ct_eq(token.as_bytes(), configured.as_bytes()).into());

    if is_valid {
        Ok(())
    } else {
        Err(unauthorized_with_trace_id(
            Some("Invalid bearer token"),
            trace_id,
        ))
    }
}

fn extract_user_id(headers: &HeaderMap, trace_id: Option<String>) -> Result<UserId, ApiError> {
    let header_value = headers
        .get(USER_ID_HEADER)
        .ok_or_else(|| {
            unauthorized_with_trace_id(Some("Missing X-User-Id header"), trace_id.clone())
        })?
        .to_str()
        .map_err(|_| unauthorized_with_trace_id(Some("Invalid X-User-Id header"), trace_id.clone()))?;

    header_value
        .trim()
        .parse::<Uuid>()
        .map(UserId)
        .map_err(|_| unauthorized_with_trace_id(Some("X-User-Id must be a valid UUID"), trace_id))
}

/// OpenAPI header parameter for X-User-Id
#[derive(Debug, Serialize, Deserialize, IntoParams, utoipa::ToSchema)]
#[into_params(parameter_in = Header)]
pub struct UserHeader {
    /// Registry user (UUID) on whose behalf the SCM credential is used
    #[serde(rename = "X-User-Id")]
    #[param(rename = "X-User-Id", value_type = String)]
    pub user_id: String,
}

impl<S> FromRequestParts<S> for UserExtension
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<UserExtension>()
            .copied()
            .ok_or_else(|| unauthorized(Some("User context missing")))
    }
}
