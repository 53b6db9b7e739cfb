//! Typed errors for the extraction controller.
//!
//! Uses `thiserror` for library errors (not `anyhow`). Transport failures
//! arrive already normalized as [`ApiError`].

use abstractor_client::ApiError;
use thiserror::Error;

use crate::types::ErrorCode;

/// Errors returned by controller actions.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Local precondition failed; nothing was sent to the server
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Server rejected the submission or could not be reached
    #[error("submission failed: {0}")]
    SubmissionFailed(#[source] ApiError),

    /// No completed job with a downloadable artifact
    #[error("no completed job with a downloadable artifact")]
    NoArtifact,

    /// Artifact transfer or local persistence failed
    #[error("download failed: {0}")]
    DownloadFailed(String),

    /// The action was superseded by `reset` or a newer `start`
    #[error("operation cancelled")]
    Cancelled,
}

impl ControllerError {
    /// Error code shown alongside this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            ControllerError::InvalidInput(_) => ErrorCode::InvalidInput,
            ControllerError::SubmissionFailed(_) => ErrorCode::SubmissionFailed,
            ControllerError::NoArtifact => ErrorCode::NoArtifact,
            ControllerError::DownloadFailed(_) => ErrorCode::DownloadFailed,
            ControllerError::Cancelled => ErrorCode::Cancelled,
        }
    }
}

/// Result type alias for controller actions.
pub type Result<T> = std::result::Result<T, ControllerError>;
