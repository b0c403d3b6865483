use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::optimize::schema::ValidationReport;
use crate::queue::QueueError;
use crate::storage::StorageError;

/// Errors raised by pipeline stage handlers.
///
/// Anything returned from a handler goes back to the work queue, which retries
/// or dead-letters the delivery. Best-effort sub-steps never surface here; they
/// degrade in place through [`crate::pipeline::BestEffort`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing, oversized or unreadable input. Redelivery cannot fix it.
    #[error("input error: {0}")]
    Input(String),

    #[error("extraction error: {0}")]
    Extraction(String),

    /// The text-generation service call failed outright.
    #[error("generation error: {0}")]
    Generation(String),

    #[error("validation error: {0}")]
    Validation(ValidationReport),

    #[error("template error: {0}")]
    Template(String),

    #[error("conversion error: {0}")]
    Conversion(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

impl PipelineError {
    /// Whether a redelivery of the same payload could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            PipelineError::Input(_) | PipelineError::Extraction(_) | PipelineError::Template(_)
        )
    }
}

/// Application-level error type for the read-side HTTP surface.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => AppError::NotFound(format!("Artifact {key} not found")),
            StorageError::InvalidKey(key) => AppError::Validation(format!("Invalid key: {key}")),
            other => AppError::Storage(other),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Storage(e) => {
                tracing::error!("Storage error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    "A storage error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_and_extraction_errors_are_not_retried() {
        assert!(!PipelineError::Input("empty".to_string()).is_retryable());
        assert!(!PipelineError::Extraction("encrypted".to_string()).is_retryable());
        assert!(PipelineError::Generation("timeout".to_string()).is_retryable());
        assert!(PipelineError::Conversion("exit 1".to_string()).is_retryable());
    }

    #[test]
    fn test_storage_not_found_maps_to_404() {
        let err: AppError = StorageError::NotFound("pdf/abc.pdf".to_string()).into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_invalid_key_maps_to_400() {
        let err: AppError = StorageError::InvalidKey("../etc".to_string()).into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
