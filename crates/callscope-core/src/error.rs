//! Library-wide error types
//!
//! A single `thiserror` enum covers every fallible operation in the core.
//! Most engine paths swallow these after logging; they surface only from
//! storage setup, folder persistence and the CLI.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Library-wide error type
///
/// Serializable so a presenter can forward it over a message channel.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum AppError {
    /// Storage/database error
    #[error("Storage error: {0}")]
    StorageError(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// A named entity (folder, record) does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generic error with custom message
    #[error("{0}")]
    Other(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<sled::Error> for AppError {
    fn from(err: sled::Error) -> Self {
        Self::StorageError(err.to_string())
    }
}
