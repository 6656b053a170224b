//! Error types for the database layer.

use crate::types::ResultLevel;
use thiserror::Error;

/// Database operation result type.
pub type Result<T> = std::result::Result<T, DbError>;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLx error (connection, query, etc.)
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// IO error (file system operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// One row of a result tree could not be written. The surrounding
    /// transaction has been rolled back.
    #[error("Failed to insert {level} row #{index}: {source}")]
    Insert {
        level: ResultLevel,
        index: usize,
        #[source]
        source: sqlx::Error,
    },
}

impl DbError {
    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub(crate) fn insert(level: ResultLevel, index: usize, source: sqlx::Error) -> Self {
        Self::Insert {
            level,
            index,
            source,
        }
    }
}
