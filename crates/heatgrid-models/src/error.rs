//! Model validation errors.

use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("Cell size must be positive")]
    ZeroCellSize,

    #[error("Cell size {cell_size} does not fit a {width}x{height} frame")]
    CellTooLarge { cell_size: u32, width: u32, height: u32 },

    #[error("Invalid resolution: {0}")]
    InvalidResolution(String),
}
