//! Common error types for revsync.

use thiserror::Error;

use crate::types::Revision;

/// Top-level error type for revsync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Commit was based on a revision older than the remote head.
    #[error("Conflict: base revision {base} is behind remote head {head}")]
    Conflict { base: Revision, head: Revision },

    /// Caller lacks permission for the attempted operation.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Remote authority could not be reached or failed to answer.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Internal invariant violated.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Requested revision range lies outside the stored history.
    #[error("Revision range error: {0}")]
    Range(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

impl Error {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Io(_))
    }

    /// Whether this is a stale-base rejection.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Whether this is a permission failure.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Unauthorized(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
