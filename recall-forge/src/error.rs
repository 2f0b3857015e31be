//! Error types for recall-forge
//!
//! `ForgeError` is the core taxonomy returned by the pipeline, review and
//! fork operations. `ApiError` maps it onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::services::content_extractor::ExtractionError;
use crate::services::generation_client::GenerationError;
use crate::services::vector_store::VectorStoreError;
use recall_common::SourceStatus;

/// Core error taxonomy
#[derive(Debug, Error)]
pub enum ForgeError {
    /// Source origin has neither or both of url/file
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    /// Rating outside 0..=5
    #[error("Invalid rating {0}: must be between 0 and 5")]
    InvalidRating(i64),

    #[error("Card not found: {0}")]
    CardNotFound(Uuid),

    #[error("Deck not found: {0}")]
    DeckNotFound(Uuid),

    #[error("Source not found: {0}")]
    SourceNotFound(Uuid),

    /// Content extractor could not produce text
    #[error("Extraction error: {0}")]
    ExtractionFailed(#[from] ExtractionError),

    /// Generation adapter failure (unavailable, malformed, unreadable, embedding)
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// Vector index failure
    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),

    /// Status update rejected by the state machine or by a concurrent writer
    #[error("Invalid status transition for source {source_id}: {from} -> {to}")]
    InvalidTransition {
        source_id: Uuid,
        from: SourceStatus,
        to: SourceStatus,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Common error: {0}")]
    Common(#[from] recall_common::Error),
}

/// Result type for core operations
pub type ForgeResult<T> = Result<T, ForgeError>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Upstream adapter failure (502)
    #[error("Upstream failure: {0}")]
    Upstream(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<ForgeError> for ApiError {
    fn from(err: ForgeError) -> Self {
        match err {
            ForgeError::InvalidSource(_) | ForgeError::InvalidRating(_) => {
                ApiError::BadRequest(err.to_string())
            }
            ForgeError::CardNotFound(_)
            | ForgeError::DeckNotFound(_)
            | ForgeError::SourceNotFound(_) => ApiError::NotFound(err.to_string()),
            ForgeError::ExtractionFailed(_)
            | ForgeError::Generation(_)
            | ForgeError::VectorStore(_) => ApiError::Upstream(err.to_string()),
            ForgeError::InvalidTransition { .. }
            | ForgeError::Database(_)
            | ForgeError::Common(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", msg),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_map_to_bad_request() {
        let api: ApiError = ForgeError::InvalidRating(9).into();
        assert!(matches!(api, ApiError::BadRequest(_)));
        let api: ApiError = ForgeError::InvalidSource("both".into()).into();
        assert_eq!(api.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_missing_records_map_to_not_found() {
        let api: ApiError = ForgeError::CardNotFound(Uuid::nil()).into();
        assert!(matches!(api, ApiError::NotFound(_)));
        let api: ApiError = ForgeError::DeckNotFound(Uuid::nil()).into();
        assert_eq!(api.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_extraction_failure_message() {
        let err = ForgeError::from(ExtractionError::HttpStatus(404, "https://example.com".into()));
        assert_eq!(
            err.to_string(),
            "Extraction error: HTTP 404 fetching https://example.com"
        );
    }

    #[test]
    fn test_adapter_errors_map_to_upstream() {
        let api: ApiError = ForgeError::Generation(GenerationError::GenerationUnavailable(
            "no key".into(),
        ))
        .into();
        assert!(matches!(api, ApiError::Upstream(_)));
        assert_eq!(
            api.into_response().status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
