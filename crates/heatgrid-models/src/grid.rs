//! Grid geometry.

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::run::Resolution;

/// A discrete grid coordinate. Derived from a pixel position, never stored alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GridCell {
    pub x: u32,
    pub y: u32,
}

impl GridCell {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Grid dimensions in cells: `floor(resolution / cell_size)` on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridDims {
    pub cols: u32,
    pub rows: u32,
    pub cell_size: u32,
}

impl GridDims {
    pub fn new(resolution: Resolution, cell_size: u32) -> ModelResult<Self> {
        if cell_size == 0 {
            return Err(ModelError::ZeroCellSize);
        }
        let cols = resolution.width / cell_size;
        let rows = resolution.height / cell_size;
        if cols == 0 || rows == 0 {
            return Err(ModelError::CellTooLarge {
                cell_size,
                width: resolution.width,
                height: resolution.height,
            });
        }
        Ok(Self {
            cols,
            rows,
            cell_size,
        })
    }

    pub fn len(&self) -> usize {
        self.cols as usize * self.rows as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-major index of a cell.
    pub fn index(&self, cell: GridCell) -> usize {
        cell.y as usize * self.cols as usize + cell.x as usize
    }

    /// Cell at a row-major index.
    pub fn cell_at(&self, index: usize) -> GridCell {
        let cols = self.cols as usize;
        GridCell::new((index % cols) as u32, (index / cols) as u32)
    }

    pub fn contains(&self, cell: GridCell) -> bool {
        cell.x < self.cols && cell.y < self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_dims() {
        let dims = GridDims::new(Resolution::new(1280, 720), 20).unwrap();
        assert_eq!(dims.cols, 64);
        assert_eq!(dims.rows, 36);
        assert_eq!(dims.len(), 64 * 36);
    }

    #[test]
    fn test_dims_floor() {
        let dims = GridDims::new(Resolution::new(1290, 735), 20).unwrap();
        assert_eq!((dims.cols, dims.rows), (64, 36));
    }

    #[test]
    fn test_invalid_dims() {
        assert_eq!(
            GridDims::new(Resolution::new(1280, 720), 0),
            Err(ModelError::ZeroCellSize)
        );
        assert!(GridDims::new(Resolution::new(10, 10), 20).is_err());
    }

    #[test]
    fn test_index_roundtrip() {
        let dims = GridDims::new(Resolution::new(100, 60), 20).unwrap();
        let cell = GridCell::new(3, 2);
        assert_eq!(dims.index(cell), 13);
        assert_eq!(dims.cell_at(13), cell);
        assert!(!dims.contains(GridCell::new(5, 0)));
    }
}
