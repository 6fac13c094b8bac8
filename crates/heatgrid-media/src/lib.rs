#![deny(unreachable_patterns)]
//! FFmpeg-backed media plumbing for the heatgrid pipeline.
//!
//! This crate provides:
//! - Sequential frame decoding at a canonical resolution
//! - Raw frame encoding with scoped finalization
//! - Best-effort web transcoding with fallback
//! - Heat layer rendering (normalization, color maps, blending)
//! - Box and identity label annotation
//! - Snapshot extraction

pub mod colormap;
pub mod command;
pub mod encoder;
pub mod error;
pub mod frame_source;
pub mod heatmap;
pub mod inspect;
pub mod label;
pub mod progress;
pub mod snapshot;
pub mod transcode;

pub use colormap::ColorMap;
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use encoder::{FrameWriter, VideoEncoder};
pub use error::{MediaError, MediaResult};
pub use frame_source::FrameSource;
pub use heatmap::{blend, draw_box, identity_color, normalize_min_max, render_heat_layer};
pub use inspect::{inspect_video, VideoInfo};
pub use label::{draw_identity_label, draw_text};
pub use progress::FfmpegProgress;
pub use snapshot::extract_snapshot;
pub use transcode::{transcode_for_web, transcode_or_fallback, TranscodeOutcome};
