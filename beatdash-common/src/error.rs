//! Common error types for beatdash

use thiserror::Error;

/// Common result type for beatdash operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by the core and the server
#[derive(Error, Debug)]
pub enum Error {
    /// Poll source or history API unreachable (retried next cycle)
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// Malformed candidate or request body
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Refusal to delete the only remaining session
    #[error("Cannot delete the last remaining session")]
    CannotDeleteLastSession,

    /// Persistence write failed (quota exceeded, backend unavailable)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for failures a later cycle may recover from on its own
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Fetch(_) | Error::Storage(_) | Error::Database(_))
    }
}
