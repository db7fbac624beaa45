//! Error types
//!
//! `AppError` is the only error that reaches an HTTP client. Provider and
//! event-write failures are absorbed before they get there.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// Failures of the external location providers
#[derive(Debug, Clone, thiserror::Error)]
pub enum GeoError {
    #[error("provider not configured")]
    Unavailable,

    #[error("address is private or invalid: {0}")]
    UnroutableAddress(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("no result for query")]
    NotFound,

    #[error("timed out after {0} ms")]
    Timeout(u64),
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Profile not found")]
    ProfileNotFound,

    #[error("Authentication required")]
    Unauthorized,

    #[error("Not allowed to view analytics for this profile")]
    Forbidden,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            AppError::ProfileNotFound => (StatusCode::NOT_FOUND, "profile_not_found", self.to_string()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", self.to_string()),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden", self.to_string()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.clone()),
            AppError::Storage(e) => {
                tracing::error!("Request failed on storage: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        (
            status,
            Json(serde_json::json!({
                "error": error_code,
                "message": message
            })),
        )
            .into_response()
    }
}
