//! Pixel to grid cell mapping.

use heatgrid_models::{BoundingBox, GridCell, GridDims};

/// Maps canonical pixel coordinates to grid cells.
///
/// Cells are clamped into the grid: centers on or past the right/bottom
/// edge land in the last column/row, negative centers in the first.
#[derive(Debug, Clone, Copy)]
pub struct GridMapper {
    dims: GridDims,
}

impl GridMapper {
    pub fn new(dims: GridDims) -> Self {
        Self { dims }
    }

    pub fn dims(&self) -> GridDims {
        self.dims
    }

    pub fn cell_for_point(&self, x: f32, y: f32) -> GridCell {
        let size = self.dims.cell_size as f32;
        GridCell::new(
            clamp_index(x / size, self.dims.cols),
            clamp_index(y / size, self.dims.rows),
        )
    }

    /// Cell of the box center.
    pub fn cell_for(&self, bbox: &BoundingBox) -> GridCell {
        let (cx, cy) = bbox.center();
        self.cell_for_point(cx, cy)
    }
}

fn clamp_index(v: f32, len: u32) -> u32 {
    if !v.is_finite() || v < 0.0 {
        return 0;
    }
    (v.floor() as u64).min(len.saturating_sub(1) as u64) as u32
}
