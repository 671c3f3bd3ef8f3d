//! API error types and helpers.
//!
//! # Purpose and responsibility
//! Centralizes HTTP error response construction so every Harbor endpoint
//! answers failures with the same `{error, code}` body.
//!
//! # Key invariants and assumptions
//! - `code` is stable and machine-readable; `error` is for humans.
//! - Status codes align with the failure category. Upstream failures mirror
//!   the remote endpoint's status.
//! - Internal errors log details server-side but return generic messages.
use crate::api::types::ErrorResponse;
use crate::orchestrator::OrchestratorError;
use crate::store::StoreError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;

/// Structured API error returned by handlers.
///
/// # Invariants
/// - `status` must match the semantics of `body.code`.
///
/// # Example
/// ```rust
/// use axum::http::StatusCode;
/// use controlplane::api::error::ApiError;
/// use controlplane::api::types::ErrorResponse;
///
/// let err = ApiError {
///     status: StatusCode::NOT_FOUND,
///     body: ErrorResponse {
///         error: "job not found".to_string(),
///         code: "not_found".to_string(),
///     },
/// };
/// assert_eq!(err.body.code, "not_found");
/// ```
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, code: &str, message: &str) -> Self {
        ApiError {
            status,
            body: ErrorResponse {
                error: message.to_string(),
                code: code.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Build a 404 Not Found error.
pub fn api_not_found(message: &str) -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "not_found", message)
}

/// Build a 409 Conflict error with a caller-provided code.
pub fn api_conflict(code: &str, message: &str) -> ApiError {
    ApiError::new(StatusCode::CONFLICT, code, message)
}

/// Build a 500 Internal Server Error from a store error.
///
/// # What it does
/// Logs the store error and returns a generic internal error response.
pub fn api_internal(message: &str, err: &StoreError) -> ApiError {
    tracing::error!(error = ?err, "controlplane storage error");
    api_internal_message(message)
}

pub fn api_internal_message(message: &str) -> ApiError {
    ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

/// Build a 400 Bad Request validation error.
pub fn api_validation_error(message: &str) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "validation_error", message)
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        let status = match &err {
            OrchestratorError::Validation(_) | OrchestratorError::SameNamespace => {
                StatusCode::BAD_REQUEST
            }
            OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
            OrchestratorError::Conflict(_) => StatusCode::CONFLICT,
            OrchestratorError::Unconfigured(_) => StatusCode::UNPROCESSABLE_ENTITY,
            OrchestratorError::Upstream { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|status| status.is_client_error() || status.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            OrchestratorError::Persistence(inner) => {
                tracing::error!(error = ?inner, "orchestration storage error");
                return api_internal_message("metadata store failure");
            }
        };
        ApiError::new(status, err.code(), &err.to_string())
    }
}
