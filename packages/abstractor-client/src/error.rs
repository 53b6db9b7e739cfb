//! Error types for the abstractor client.

use reqwest::StatusCode;
use thiserror::Error;

/// Result type for abstractor client operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Normalized transport errors.
///
/// Every client operation fails with exactly one of these; raw `reqwest`
/// errors never leave the crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Connection refused, DNS failure, body interrupted mid-transfer
    #[error("Network error: {0}")]
    Network(String),

    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,

    /// Non-2xx response, or a body that does not match the wire schema
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Job or artifact does not exist on the server
    #[error("Not found: {0}")]
    NotFound(String),
}

impl ApiError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return ApiError::Timeout;
        }
        if let Some(status) = err.status() {
            return Self::from_status(status, err.to_string());
        }
        ApiError::Network(err.to_string())
    }

    /// Map a non-success status code and message onto the taxonomy.
    pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
        match status {
            StatusCode::NOT_FOUND => ApiError::NotFound(message.into()),
            StatusCode::REQUEST_TIMEOUT => ApiError::Timeout,
            _ => ApiError::Server {
                status: status.as_u16(),
                message: message.into(),
            },
        }
    }

    /// A body arrived but could not be decoded into the expected type.
    pub(crate) fn invalid_body(status: StatusCode, err: impl std::fmt::Display) -> Self {
        ApiError::Server {
            status: status.as_u16(),
            message: format!("invalid response body: {}", err),
        }
    }

    /// HTTP status code, when the error came from a response.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::Server { status, .. } => Some(*status),
            ApiError::NotFound(_) => Some(404),
            ApiError::Timeout => Some(408),
            ApiError::Network(_) => None,
        }
    }

    /// Human-readable explanation suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Network(_) => {
                "Network connection failed. Please check your internet connection.".to_string()
            }
            ApiError::Timeout => "Request timed out. Please try again.".to_string(),
            ApiError::NotFound(_) => "Article not found or not accessible.".to_string(),
            ApiError::Server { status: 413, .. } => {
                "File too large. Maximum size is 10MB.".to_string()
            }
            ApiError::Server { status, message } if *status >= 500 => {
                format!("The processing service failed ({}): {}", status, message)
            }
            ApiError::Server { message, .. } => message.clone(),
        }
    }
}

/// Pull a human message out of an error body.
///
/// FastAPI errors look like `{"detail": "..."}`; other backends use
/// `{"message": "..."}`. Falls back to the raw body when it is short text.
pub(crate) fn error_message_from_body(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["detail", "message", "error"] {
            if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed.len() > 200 {
        format!("HTTP {}", status)
    } else {
        trimmed.to_string()
    }
}
