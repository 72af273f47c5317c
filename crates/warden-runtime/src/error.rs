//! Error types for warden-runtime.

use thiserror::Error;

/// Result type alias for warden-runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur while talking to the container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The control socket could not be reached
    #[error("container runtime unreachable at {endpoint}: {message}")]
    Unavailable { endpoint: String, message: String },

    /// The referenced container, exec instance or image does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The runtime reported the request as a no-op (HTTP 304)
    #[error("not modified: {0}")]
    NotModified(String),

    /// The request conflicts with the current runtime state (HTTP 409)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Any other non-success response from the API
    #[error("runtime API error {status}: {message}")]
    Api { status: u16, message: String },

    /// The multiplexed output stream was malformed
    #[error("stream framing error: {0}")]
    Frame(#[from] crate::mux::FrameError),

    /// The connection dropped while reading a response body
    #[error("stream interrupted: {0}")]
    Stream(String),

    /// Failed to build a request
    #[error("request error: {0}")]
    Request(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RuntimeError {
    /// True when the runtime says the target does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True when the control socket could not be reached at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// True when a remove request raced with another removal of the same container.
    pub fn is_removal_in_progress(&self) -> bool {
        match self {
            Self::Conflict(message) => {
                let message = message.to_ascii_lowercase();
                message.contains("already in progress") || message.contains("is being removed")
            }
            _ => false,
        }
    }
}
