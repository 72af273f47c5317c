//! Error types for warden-core.

use std::path::PathBuf;
use thiserror::Error;
use warden_runtime::RuntimeError;

/// Result type alias for warden-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur during sandbox operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A mount or network request would break the sandbox boundary
    #[error("security violation for {path}: {reason}")]
    SecurityViolation {
        /// Offending host path or setting
        path: PathBuf,
        /// Why the request was refused
        reason: String,
    },

    /// Malformed limits, names or paths
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The container control API could not be reached
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// The command ran and exited non-zero
    #[error("command exited with code {exit_code}: {output}")]
    Execution {
        /// Process exit code
        exit_code: i64,
        /// Captured combined output, or a generic message if there was none
        output: String,
    },

    /// The sandbox died while a command was running in it
    #[error("sandbox {sandbox} terminated during execution: {reason}")]
    SandboxTerminated {
        /// Sandbox name
        sandbox: String,
        /// What the runtime reported
        reason: String,
        /// Output captured before termination
        output: String,
    },

    /// Invalid sandbox state for operation
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Any other runtime failure
    #[error("runtime error: {0}")]
    Runtime(RuntimeError),
}

impl From<RuntimeError> for CoreError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Unavailable { endpoint, message } => {
                Self::RuntimeUnavailable(format!("{endpoint}: {message}"))
            }
            other => Self::Runtime(other),
        }
    }
}

impl CoreError {
    pub(crate) fn security(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::SecurityViolation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for errors raised before any runtime call was made.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::SecurityViolation { .. } | Self::Configuration(_)
        )
    }
}
