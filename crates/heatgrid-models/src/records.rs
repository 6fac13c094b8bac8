//! Persisted rows and query results.

use serde::{Deserialize, Serialize};

use crate::grid::GridCell;
use crate::run::RunId;

/// One observed position of one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub identity: i64,
    pub frame_no: u64,
    pub x: i32,
    pub y: i32,
}

/// A persisted heatmap sample.
///
/// `count` is the window accumulator's value right after the triggering
/// increment, not the window's final total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeatmapRow {
    pub video_id: RunId,
    pub window_start_frame: u64,
    pub x_grid: u32,
    pub y_grid: u32,
    pub count: u32,
}

impl HeatmapRow {
    pub fn cell(&self) -> GridCell {
        GridCell::new(self.x_grid, self.y_grid)
    }
}

/// Summed count of one cell across a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellDensity {
    pub x: u32,
    pub y: u32,
    pub count: u64,
}

/// One point of a cell's time series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellSample {
    #[serde(rename = "t")]
    pub window_start_frame: u64,
    pub count: u32,
}

/// Dashboard aggregate for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub video_id: RunId,
    /// Number of trajectory rows
    pub total_moves: u64,
    /// Number of distinct identities
    pub distinct_identities: u64,
    /// Densest cells, descending
    #[serde(rename = "top5")]
    pub top_cells: Vec<CellDensity>,
    /// Average heatmap rows per window (dwell proxy)
    pub avg_dwell: f64,
}

/// A stored run, as listed by the run index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunListing {
    pub id: RunId,
    #[serde(rename = "name")]
    pub source_name: String,
    pub frame_count: u64,
}
