//! # Error Handling
//!
//! This module provides unified error handling for the registry SCM API,
//! implementing a consistent problem+json response format with trace ID propagation.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::credentials::CredentialError;
use crate::telemetry;

/// Error code returned when a stored SCM credential can no longer be used.
pub const SCM_RECONNECT_REQUIRED: &str = "SCM_RECONNECT_REQUIRED";

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            trace_id: Self::current_trace_id(),
        }
    }

    /// Trace ID of the active request, or a generated correlation ID outside one
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error
        .code()
        .is_some_and(|code| code == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code.as_ref()))
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        if is_unique_violation(&error) {
            tracing::debug!(?error, "Unique constraint violation detected");
            return Self::new(StatusCode::CONFLICT, "CONFLICT", "Resource already exists");
        }

        match error {
            sea_orm::DbErr::RecordNotFound(record) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("Record not found: {}", record),
            ),
            sea_orm::DbErr::Conn(connection_err) => {
                tracing::error!("Database connection error: {:?}", connection_err);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            other => {
                tracing::error!("Database error: {:?}", other);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

impl From<CredentialError> for ApiError {
    fn from(error: CredentialError) -> Self {
        match error {
            CredentialError::InvalidInput(message) => {
                Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
            }
            CredentialError::Unauthenticated(message) => {
                Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", &message)
            }
            CredentialError::NotFound(message) => {
                Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", &message)
            }
            err @ CredentialError::UpstreamAuthFailure => Self::new(
                StatusCode::UNAUTHORIZED,
                SCM_RECONNECT_REQUIRED,
                &err.to_string(),
            ),
            CredentialError::Upstream(message) => {
                tracing::warn!(error = %message, "SCM provider call failed");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "PROVIDER_ERROR",
                    &message,
                )
            }
            CredentialError::Encryption { operation, source } => {
                tracing::error!(operation, error = %source, "credential cipher failure");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    &format!("failed to {operation}"),
                )
            }
            CredentialError::Connector(source) => {
                tracing::error!(error = %source, "connector construction failed");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "failed to create connector",
                )
            }
            CredentialError::Storage(source) => {
                tracing::error!(error = ?source, "token store failure");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create an unauthorized error (401) with explicit trace_id
pub fn unauthorized_with_trace_id(message: Option<&str>, trace_id: Option<String>) -> ApiError {
    let mut error = unauthorized(message);
    if let Some(trace_id) = trace_id {
        error.trace_id = Some(trace_id.into_boxed_str());
    }
    error
}

/// Create a 400 error for a malformed request value
pub fn bad_request(message: &str) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::{ConnectorError, RegistryError};
    use crate::crypto::CryptoError;
    use serde_json::json;

    async fn body_json(error: ApiError) -> serde_json::Value {
        let response = error.into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_problem_json_content_type() {
        let response = ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "x").into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
    }

    #[test]
    fn test_api_error_basic() {
        let error = ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "Test error message",
        );

        assert_eq!(error.code, Box::from("VALIDATION_FAILED"));
        assert_eq!(error.message, Box::from("Test error message"));
    }

    #[test]
    fn test_trace_id_generation() {
        let error = ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "Test error",
        );

        let trace_id = error.trace_id.unwrap();
        assert!(trace_id.starts_with("corr-"));
        assert_eq!(trace_id.len(), 13);
    }

    #[tokio::test]
    async fn test_trace_id_from_active_context() {
        let context = telemetry::TraceContext {
            trace_id: "req-42".to_string(),
        };
        let error = telemetry::with_trace_context(context, async {
            ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "missing")
        })
        .await;

        assert_eq!(error.trace_id.as_deref(), Some("req-42"));
    }

    #[test]
    fn test_from_anyhow_hides_detail() {
        let api_error: ApiError = anyhow::anyhow!("db password is hunter2").into();

        assert_eq!(api_error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api_error.message, Box::from("An internal error occurred"));
    }

    #[test]
    fn test_database_error_mapping() {
        let api_error: ApiError = sea_orm::DbErr::RecordNotFound("scm_providers".to_string()).into();
        assert_eq!(api_error.status, StatusCode::NOT_FOUND);
        assert!(api_error.message.contains("scm_providers"));

        let api_error: ApiError = sea_orm::DbErr::Custom("boom".to_string()).into();
        assert_eq!(api_error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!api_error.message.contains("boom"));
    }

    #[test]
    fn test_credential_error_status_mapping() {
        let cases: Vec<(CredentialError, StatusCode, &str)> = vec![
            (
                CredentialError::InvalidInput("invalid state parameter".into()),
                StatusCode::BAD_REQUEST,
                "VALIDATION_FAILED",
            ),
            (
                CredentialError::Unauthenticated("not connected to this provider".into()),
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
            ),
            (
                CredentialError::NotFound("provider not found".into()),
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
            ),
            (
                CredentialError::UpstreamAuthFailure,
                StatusCode::UNAUTHORIZED,
                SCM_RECONNECT_REQUIRED,
            ),
            (
                CredentialError::Upstream("failed to list tags: boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "PROVIDER_ERROR",
            ),
            (
                CredentialError::Encryption {
                    operation: "decrypt access token",
                    source: CryptoError::InvalidFormat,
                },
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
            ),
            (
                CredentialError::Connector(RegistryError::Build(ConnectorError::Configuration {
                    details: "bad".into(),
                })),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
            ),
            (
                CredentialError::Storage(sea_orm::DbErr::Custom("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
            ),
        ];

        for (error, status, code) in cases {
            let api_error = ApiError::from(error);
            assert_eq!(api_error.status, status);
            assert_eq!(api_error.code.as_ref(), code);
        }
    }

    #[tokio::test]
    async fn test_reconnect_error_body() {
        let body = body_json(CredentialError::UpstreamAuthFailure.into()).await;

        assert_eq!(body["code"], json!("SCM_RECONNECT_REQUIRED"));
        assert_eq!(
            body["message"],
            json!(
                "OAuth token is invalid or has been revoked; please reconnect to this SCM provider"
            )
        );
        assert!(body.get("status").is_none());
    }

    #[tokio::test]
    async fn test_encryption_error_never_includes_secret() {
        let error = CredentialError::Encryption {
            operation: "decrypt client secret",
            source: CryptoError::DecryptionFailed("aead::Error".into()),
        };
        let body = body_json(error.into()).await;

        assert_eq!(body["message"], json!("failed to decrypt client secret"));
    }

    #[test]
    fn test_unauthorized_with_trace_id() {
        let error = unauthorized_with_trace_id(Some("Invalid bearer token"), Some("t-1".into()));
        assert_eq!(error.status, StatusCode::UNAUTHORIZED);
        assert_eq!(error.trace_id.as_deref(), Some("t-1"));
    }
}
