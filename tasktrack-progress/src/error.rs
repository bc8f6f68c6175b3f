//! Error types for tasktrack-progress

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use tasktrack_common::api::error_body;

/// Progress service error
#[derive(Debug, Error)]
pub enum ProgressError {
    /// Record or task not found (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller may not perform this action (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Rejected transition or malformed input (400)
    ///
    /// Regress rejections carry the last stored progress value.
    #[error("{message}")]
    Validation {
        message: String,
        last_progress: Option<i64>,
    },

    /// The history kept moving while a write was being planned (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// tasktrack-common error
    #[error("Common error: {0}")]
    Common(#[from] tasktrack_common::Error),
}

impl ProgressError {
    pub fn validation(message: impl Into<String>) -> Self {
        ProgressError::Validation {
            message: message.into(),
            last_progress: None,
        }
    }

    /// Progress would move backwards from `last`
    pub fn regress(last: i64) -> Self {
        ProgressError::Validation {
            message: format!("Progress cannot go backwards. Last progress is {}%", last),
            last_progress: Some(last),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ProgressError::NotFound(_) => StatusCode::NOT_FOUND,
            ProgressError::Forbidden(_) => StatusCode::FORBIDDEN,
            ProgressError::Validation { .. } => StatusCode::BAD_REQUEST,
            ProgressError::Conflict(_) => StatusCode::CONFLICT,
            ProgressError::Database(_) | ProgressError::Common(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProgressError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (code, message, last_progress) = match self {
            ProgressError::NotFound(msg) => ("NOT_FOUND", msg, None),
            ProgressError::Forbidden(msg) => ("FORBIDDEN", msg, None),
            ProgressError::Conflict(msg) => ("CONFLICT", msg, None),
            ProgressError::Validation {
                message,
                last_progress,
            } => ("VALIDATION_ERROR", message, last_progress),
            ProgressError::Database(ref err) => ("DATABASE_ERROR", err.to_string(), None),
            ProgressError::Common(ref err) => ("COMMON_ERROR", err.to_string(), None),
        };

        let mut body = error_body(code, &message);
        if let Some(last) = last_progress {
            body["lastProgress"] = last.into();
        }

        (status, Json(body)).into_response()
    }
}

/// Result type for progress operations
pub type ProgressResult<T> = Result<T, ProgressError>;
