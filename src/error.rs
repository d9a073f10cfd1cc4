//! Crate-wide error taxonomy (design notes §7).

use thiserror::Error;

/// The kinds of failure the engine core can surface. Each variant maps to
/// exactly one REST status code in [`crate::api::rest::types::ApiError`] and,
/// where relevant, to one terminal action status in the dispatcher.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("policy check failed: {0}")]
    PolicyCheckFailed(String),

    #[error("resource operation failed: {0}")]
    DriverFailure(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("lock contention on {0}")]
    LockContention(String),

    #[error("retryable condition: {0}")]
    Retry(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
