//! Error types for the Conveyor client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when using the Conveyor client
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection failure, timeout or transport error
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The server answered with a non-2xx status
    #[error("HTTP {status}: {message}")]
    ApiError { status: u16, message: String },

    /// Response body was not the expected JSON
    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

impl ClientError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// HTTP status of the failed response, if the server answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ApiError { status, .. } => Some(*status),
            Self::RequestFailed(e) => e.status().map(|s| s.as_u16()),
            Self::ParseError(_) => None,
        }
    }

    /// No approval is pending for the requested target
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// The request timed out before any response arrived
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestFailed(e) if e.is_timeout())
    }
}
