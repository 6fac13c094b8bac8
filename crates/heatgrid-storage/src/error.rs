//! Storage error types.

use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Writer thread not available")]
    WriterUnavailable,

    #[error("Run not found: {0}")]
    RunNotFound(i64),
}

impl StorageError {
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }
}
