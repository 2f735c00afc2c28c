//! HTTP error mapping
//!
//! Every failure is answered with `{success: false, error, message}` where
//! `error` is the stable `ServiceError::kind()`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use nlq_core::ServiceError;
use serde_json::json;

/// Handler error
#[derive(Debug)]
pub enum ApiError {
    /// Service failure
    Service(ServiceError),
    /// No caller identity on the request
    MissingUser,
    /// Malformed path or query parameter
    BadRequest(String),
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self::Service(err)
    }
}

/// HTTP status for a service error
#[must_use]
pub fn status_for(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        ServiceError::UnknownUser(_) => StatusCode::UNAUTHORIZED,
        ServiceError::TranslatorUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ServiceError::TranslatorTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        ServiceError::TranslatorFailed(_) | ServiceError::TranslatorBadResponse(_) => {
            StatusCode::BAD_GATEWAY
        }
        ServiceError::SecurityViolation { .. } => StatusCode::FORBIDDEN,
        ServiceError::NoPendingPlan(_)
        | ServiceError::StalePlan(_)
        | ServiceError::AlreadyConfirming(_) => StatusCode::CONFLICT,
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::ExecutionFailed { .. }
        | ServiceError::Storage(_)
        | ServiceError::Policy(_)
        | ServiceError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Service(err) => {
                let status = status_for(&err);
                if status.is_server_error() {
                    tracing::error!(kind = err.kind(), error = %err, "request failed");
                } else {
                    tracing::debug!(kind = err.kind(), error = %err, "request rejected");
                }
                let mut body = json!({
                    "success": false,
                    "error": err.kind(),
                    "message": err.to_string(),
                    "retryable": err.is_retryable(),
                });
                if let Some(id) = err.history_id() {
                    body["historyId"] = json!(id);
                }
                (status, body)
            }
            ApiError::MissingUser => (
                StatusCode::UNAUTHORIZED,
                json!({
                    "success": false,
                    "error": "unauthenticated",
                    "message": "missing x-user-id header",
                }),
            ),
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                json!({"success": false, "error": "invalid_input", "message": message}),
            ),
        };
        (status, Json(body)).into_response()
    }
}
