//! Analysis configuration.

use heatgrid_models::encoding::{
    DEFAULT_CELL_SIZE, DEFAULT_DETECTION_STRIDE, DEFAULT_WINDOW_LENGTH,
};
use heatgrid_models::{GridDims, Resolution, RunId, PERSON_CLASS};
use heatgrid_storage::DEFAULT_QUEUE_CAPACITY;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};
use crate::oracle::DEFAULT_TRACKER_TIMEOUT;

/// Configuration for one analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Directory receiving videos, images, tracks and snapshots
    pub output_dir: PathBuf,
    /// SQLite database; `None` runs without persistence
    pub database: Option<PathBuf>,
    /// Canonical processing resolution
    pub resolution: Resolution,
    /// Grid cell edge length in pixels
    pub cell_size: u32,
    /// Frames per aggregation window
    pub window_length: u64,
    /// Query the oracle every `detection_stride` frames
    pub detection_stride: u64,
    /// Class kept from oracle output
    pub target_class: i32,
    /// Run id used when no database assigns one
    pub run_id: RunId,
    /// Bound of the persistence write queue
    pub queue_capacity: usize,
    /// Transcode outputs for web playback
    pub transcode: bool,
    /// Extract one JPEG per heatmap window
    pub snapshots: bool,
    /// Longest wait for one external tracker answer
    pub tracker_timeout: Duration,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("outputs"),
            database: None,
            resolution: Resolution::default(),
            cell_size: DEFAULT_CELL_SIZE,
            window_length: DEFAULT_WINDOW_LENGTH,
            detection_stride: DEFAULT_DETECTION_STRIDE,
            target_class: PERSON_CLASS,
            run_id: RunId::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            transcode: true,
            snapshots: false,
            tracker_timeout: DEFAULT_TRACKER_TIMEOUT,
        }
    }
}

impl AnalysisConfig {
    /// Create config from `HEATGRID_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            output_dir: std::env::var("HEATGRID_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            database: std::env::var("HEATGRID_DATABASE").ok().map(PathBuf::from),
            resolution: std::env::var("HEATGRID_RESOLUTION")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.resolution),
            cell_size: std::env::var("HEATGRID_CELL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.cell_size),
            window_length: std::env::var("HEATGRID_WINDOW_LENGTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.window_length),
            detection_stride: std::env::var("HEATGRID_DETECTION_STRIDE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.detection_stride),
            target_class: std::env::var("HEATGRID_TARGET_CLASS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.target_class),
            run_id: std::env::var("HEATGRID_RUN_ID")
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .map(RunId)
                .unwrap_or(defaults.run_id),
            queue_capacity: std::env::var("HEATGRID_QUEUE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.queue_capacity),
            transcode: std::env::var("HEATGRID_TRANSCODE")
                .map(|v| v != "0" && v.to_lowercase() != "false")
                .unwrap_or(defaults.transcode),
            snapshots: std::env::var("HEATGRID_SNAPSHOTS")
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(defaults.snapshots),
            tracker_timeout: std::env::var("HEATGRID_ORACLE_TIMEOUT")
                .ok()
                .and_then(|s| s.parse::<f64>().ok())
                .filter(|secs| secs.is_finite() && *secs > 0.0)
                .map(Duration::from_secs_f64)
                .unwrap_or(defaults.tracker_timeout),
        }
    }

    /// Validate and derive the grid dimensions.
    pub fn grid_dims(&self) -> WorkerResult<GridDims> {
        if self.window_length == 0 {
            return Err(WorkerError::config_error("window length must be positive"));
        }
        if self.detection_stride == 0 {
            return Err(WorkerError::config_error("detection stride must be positive"));
        }
        Ok(GridDims::new(self.resolution, self.cell_size)?)
    }

    pub fn tracks_dir(&self) -> PathBuf {
        self.output_dir.join("tracks")
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.output_dir.join("snapshots")
    }
}
