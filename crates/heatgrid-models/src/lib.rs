//! Shared data models for the heatgrid occupancy pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Video runs and their identifiers
//! - Identity-tagged detections and bounding boxes
//! - Grid geometry (cells and dimensions)
//! - Persisted rows (trajectories, heatmap samples) and query results
//! - Canonical processing and encoding constants

pub mod detection;
pub mod encoding;
pub mod error;
pub mod grid;
pub mod records;
pub mod run;

// Re-export common types
pub use detection::{BoundingBox, Detection, PERSON_CLASS};
pub use error::{ModelError, ModelResult};
pub use grid::{GridCell, GridDims};
pub use records::{CellDensity, CellSample, HeatmapRow, RunListing, RunSummary, TrajectoryPoint};
pub use run::{Resolution, RunId, VideoRun};
