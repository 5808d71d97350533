// crates/server/src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use mediaforge_types::{ErrorKind, ErrorResponse, JobError};

/// API error types that map to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Job(err) => {
                let status = match err.kind {
                    ErrorKind::InvalidParams => StatusCode::BAD_REQUEST,
                    ErrorKind::Busy => StatusCode::TOO_MANY_REQUESTS,
                    ErrorKind::NotFound => StatusCode::NOT_FOUND,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                match err.kind {
                    ErrorKind::InvalidParams | ErrorKind::Busy => {
                        tracing::warn!(error_kind = %err.kind, message = %err.message, "Submission rejected")
                    }
                    ErrorKind::NotFound => {
                        tracing::warn!(message = %err.message, "Job not found")
                    }
                    _ => tracing::error!(error_kind = %err.kind, message = %err.message, "Request failed"),
                }
                (status, ErrorResponse::new(err.kind, err.message.clone()))
            }
            ApiError::Internal(msg) => {
                tracing::error!(message = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    // Internal details are not exposed to clients.
                    ErrorResponse::new(ErrorKind::Connection, "internal server error"),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
