//! Worker error types.

use thiserror::Error;

use crate::oracle::OracleError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Frame numbers must strictly increase: got {current} after {previous}")]
    FrameOrder { previous: u64, current: u64 },

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Media error: {0}")]
    Media(#[from] heatgrid_media::MediaError),

    #[error("Storage error: {0}")]
    Storage(#[from] heatgrid_storage::StorageError),

    #[error("Model error: {0}")]
    Model(#[from] heatgrid_models::ModelError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn processing_failed(msg: impl Into<String>) -> Self {
        Self::ProcessingFailed(msg.into())
    }
}
