//! Error types for airqmon-store.

use std::path::PathBuf;

use airqmon_types::ValidationError;

/// Result type for airqmon-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in airqmon-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A value was rejected before it reached the database.
    #[error("Invalid value: {0}")]
    Validation(#[from] ValidationError),

    /// Invalid time range.
    #[error("Invalid range: start {start} is after end {end}")]
    InvalidRange { start: i64, end: i64 },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error was caused by caller input rather than the database.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::InvalidRange { .. })
    }
}
