//! Database error types.
//!
//! Provides error handling for database operations using `thiserror`.

use thiserror::Error;

/// Database-specific errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to open or create database connection.
    #[error("failed to open database: {0}")]
    Open(String),

    /// Migration execution failed.
    #[error("migration failed: {0}")]
    Migration(String),

    /// Requested record was not found.
    #[error("record not found")]
    NotFound,

    /// Database record with provided identifier not found.
    #[error("{0}")]
    NotFoundWithMessage(String),

    /// Write rejected because it would break a write-once rule.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Failed to decode database value.
    #[error("decode error: {0}")]
    Decode(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Underlying `SQLx` error.
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error during database operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DatabaseError {
    /// Whether retrying the same write could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Sqlx(err) => !matches!(
                err,
                sqlx::Error::RowNotFound | sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_)
            ),
            Self::Io(_) | Self::Open(_) => true,
            _ => false,
        }
    }
}

/// Result type alias for database operations.
pub type Result<T> = std::result::Result<T, DatabaseError>;
