//! Runtime error types.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while asking the container/process runtime to act.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to spawn `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("`{command}` timed out after {limit:?}")]
    Timeout { command: String, limit: Duration },

    #[error("invalid command template {template:?}: {reason}")]
    InvalidTemplate { template: String, reason: String },

    /// Injected by test doubles.
    #[error("{0}")]
    Rejected(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
