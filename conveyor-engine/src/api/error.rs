//! API Error Handling
//!
//! Unified error type and conversion for approval API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::service::ApprovalError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => {
                tracing::warn!("Approval conflict: {}", msg);
                (StatusCode::CONFLICT, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<ApprovalError> for ApiError {
    fn from(err: ApprovalError) -> Self {
        match err {
            ApprovalError::NotPending(_) => ApiError::NotFound(err.to_string()),
            ApprovalError::AlreadyPending(_) | ApprovalError::Cancelled(_) => {
                ApiError::Conflict(err.to_string())
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
