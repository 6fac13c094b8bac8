//! Frame-to-grid occupancy aggregation.
//!
//! This crate provides:
//! - Detection oracle adapters (replay files, external tracker processes)
//! - Grid mapping and temporal window aggregation
//! - Trajectory recording
//! - Overlay, windowed and global heatmap rendering
//! - The end-to-end analysis pipeline behind the `heatgrid` binary

pub mod aggregator;
pub mod compositor;
pub mod config;
pub mod error;
pub mod grid;
pub mod logging;
pub mod oracle;
pub mod processor;
pub mod renderers;
pub mod trajectory;

pub use aggregator::{CountGrid, TemporalWindowAggregator, TriggerSample, WindowAccumulator};
pub use compositor::OverlayCompositor;
pub use config::AnalysisConfig;
pub use error::{WorkerError, WorkerResult};
pub use grid::GridMapper;
pub use logging::RunLogger;
pub use oracle::{
    DetectionOracle, OracleAdapter, OracleError, OracleResult, ProcessOracle, ReplayOracle,
};
pub use processor::{AnalysisEngine, EngineOutput, HeatmapProcessor, RunArtifacts};
pub use renderers::{GlobalHeatmapRenderer, WindowedHeatmapRenderer};
pub use trajectory::TrajectoryRecorder;
