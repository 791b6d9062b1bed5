//! Mapping of [`CoreError`] onto HTTP responses.
//!
//! Caller errors keep their message; internal failures are logged and
//! answered with a generic body.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::CoreError;

// ---

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        // ---
        let (status, code, message) = match &self {
            CoreError::InvalidArgument(msg) => {
                (StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", msg.clone())
            }
            CoreError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            CoreError::ConcurrencyConflict(reason) => {
                tracing::warn!(%reason, "giving up after repeated conflicts");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "CONFLICT",
                    "The sensor is busy, try again".to_string(),
                )
            }
            CoreError::InvariantViolation(msg) => {
                tracing::error!(error = %msg, "internal consistency violation");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
            CoreError::Storage(err) => {
                tracing::error!(error = %err, "storage error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}

/// Unreadable request bodies are caller errors like any other bad input.
impl From<JsonRejection> for CoreError {
    fn from(rejection: JsonRejection) -> Self {
        CoreError::InvalidArgument(rejection.body_text())
    }
}
