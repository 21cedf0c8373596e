//! Error types for the pdfgen server

use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use pdfgen_core::{LayoutError, SchedulerError, StageError};

/// Server error types
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Staging(#[from] StageError),

    #[error("Request body exceeds the configured limit")]
    BodyTooLarge,

    #[error("Render deadline exceeded")]
    DeadlineExceeded,

    #[error("Render cancelled")]
    Cancelled,

    #[error("Server is shutting down")]
    ShuttingDown,

    #[error("{0}")]
    RenderFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    code: &'static str,
}

impl ServerError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ServerError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            ServerError::BodyTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, "BODY_TOO_LARGE"),
            ServerError::Layout(_) => (StatusCode::BAD_REQUEST, "INVALID_LAYOUT"),
            ServerError::Staging(e) if e.is_validation() => {
                (StatusCode::BAD_REQUEST, "INVALID_BUNDLE")
            }
            ServerError::Staging(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STAGING_FAILED"),
            ServerError::DeadlineExceeded => (StatusCode::SERVICE_UNAVAILABLE, "DEADLINE_EXCEEDED"),
            ServerError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "CANCELLED"),
            ServerError::ShuttingDown => (StatusCode::SERVICE_UNAVAILABLE, "SHUTTING_DOWN"),
            ServerError::RenderFailed(_) => (StatusCode::INTERNAL_SERVER_ERROR, "RENDER_FAILED"),
            ServerError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if status.is_server_error() {
            tracing::error!(section = "http", code, error = %self, "handler error");
        } else {
            tracing::debug!(section = "http", code, error = %self, "request rejected");
        }

        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
            code,
        };

        (status, Json(body)).into_response()
    }
}

impl From<SchedulerError> for ServerError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::DeadlineExceeded => ServerError::DeadlineExceeded,
            SchedulerError::Cancelled => ServerError::Cancelled,
            SchedulerError::Closed => ServerError::ShuttingDown,
            SchedulerError::Backend(e) => ServerError::RenderFailed(e.to_string()),
            lost @ SchedulerError::WorkerLost => ServerError::Internal(lost.to_string()),
        }
    }
}

impl From<MultipartError> for ServerError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return ServerError::BodyTooLarge;
        }
        ServerError::InvalidRequest(format!("malformed multipart body: {}", err.body_text()))
    }
}
