//! Canonical processing and encoding constants.

/// Canonical processing width; every decoded frame is resized to it.
pub const CANONICAL_WIDTH: u32 = 1280;
/// Canonical processing height.
pub const CANONICAL_HEIGHT: u32 = 720;

/// Default grid cell edge length in pixels.
pub const DEFAULT_CELL_SIZE: u32 = 20;
/// Default aggregation window length in frames.
pub const DEFAULT_WINDOW_LENGTH: u64 = 10;
/// Default oracle query stride (every frame).
pub const DEFAULT_DETECTION_STRIDE: u64 = 1;

/// Codec used for the raw per-run encodes.
pub const RAW_VIDEO_CODEC: &str = "mpeg4";
/// Quality scale for the raw encodes (lower is better).
pub const RAW_VIDEO_QSCALE: u8 = 3;

/// Web-playable transcode settings.
pub const WEB_VIDEO_CODEC: &str = "libx264";
pub const WEB_VIDEO_PROFILE: &str = "baseline";
pub const WEB_VIDEO_LEVEL: &str = "3.0";
pub const WEB_PIXEL_FORMAT: &str = "yuv420p";

/// Overlay blend weights (source frame, heat layer).
pub const OVERLAY_SOURCE_WEIGHT: f32 = 0.7;
pub const OVERLAY_HEAT_WEIGHT: f32 = 0.3;

/// Default number of cells returned by density queries.
pub const DEFAULT_TOP_CELLS: usize = 5;

/// Output file names for a run.
pub fn detected_video_name(run_id: impl std::fmt::Display) -> String {
    format!("detected_{}.mp4", run_id)
}

pub fn overlay_video_name(run_id: impl std::fmt::Display) -> String {
    format!("overlay_{}.mp4", run_id)
}

pub fn heatmap_video_name(run_id: impl std::fmt::Display) -> String {
    format!("heatmap_{}.mp4", run_id)
}

pub fn global_heatmap_name(run_id: impl std::fmt::Display) -> String {
    format!("global_heatmap_{}.png", run_id)
}

pub fn web_video_name(raw_name: &str) -> String {
    format!("web_{}", raw_name)
}

pub fn snapshot_name(run_id: impl std::fmt::Display, window_start_frame: u64) -> String {
    format!("{}_{}.jpg", run_id, window_start_frame)
}

pub fn track_file_name(identity: i64) -> String {
    format!("ID_{}.json", identity)
}
