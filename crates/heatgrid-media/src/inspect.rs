//! Source video inspection with ffprobe.

use heatgrid_models::Resolution;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};

/// Frame rate assumed when the container reports none.
pub const FALLBACK_FPS: f64 = 30.0;

/// What the pipeline needs to know about a source before decoding it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Seconds, 0.0 when unknown
    pub duration: f64,
    /// Native size, before scaling to the canonical resolution
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Container frame count, or `duration * fps` when absent
    pub frame_count: u64,
    pub codec: String,
}

impl VideoInfo {
    pub fn native_resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Presentation time of a 1-based frame number, for seeking.
    pub fn seconds_at(&self, frame_no: u64) -> f64 {
        frame_no as f64 / self.fps
    }
}

#[derive(Debug, Deserialize)]
struct StreamReport {
    #[serde(default)]
    streams: Vec<ReportStream>,
    #[serde(default)]
    format: Option<ReportFormat>,
}

#[derive(Debug, Deserialize)]
struct ReportFormat {
    duration: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReportStream {
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
}

/// Inspect the first video stream of `path`.
///
/// A missing file or one ffprobe cannot read is an error.
pub async fn inspect_video(path: impl AsRef<Path>) -> MediaResult<VideoInfo> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }
    check_ffprobe()?;

    let output = Command::new("ffprobe")
        .args(["-v", "error", "-select_streams", "v:0"])
        .args([
            "-show_entries",
            "stream=codec_name,width,height,avg_frame_rate,r_frame_rate,nb_frames:format=duration",
        ])
        .args(["-of", "json"])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: format!("cannot read {}", path.display()),
            stderr: Some(String::from_utf8_lossy(&output.stderr).trim().to_string()),
        });
    }

    let info = parse_stream_report(&output.stdout)?;
    debug!(path = %path.display(), ?info, "Inspected source");
    Ok(info)
}

fn parse_stream_report(json: &[u8]) -> MediaResult<VideoInfo> {
    let doc: StreamReport = serde_json::from_slice(json)?;
    let stream = doc
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| MediaError::InvalidVideo("no video stream".to_string()))?;

    let duration = doc
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .unwrap_or(0.0);

    let fps = [&stream.avg_frame_rate, &stream.r_frame_rate]
        .into_iter()
        .flatten()
        .find_map(|r| parse_rate(r))
        .unwrap_or(FALLBACK_FPS);

    let frame_count = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .unwrap_or_else(|| (duration * fps).round() as u64);

    Ok(VideoInfo {
        duration,
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
        fps,
        frame_count,
        codec: stream.codec_name.unwrap_or_default(),
    })
}

/// `"30000/1001"` or `"25"`; `None` for zero or malformed rates.
fn parse_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num.parse::<f64>().ok()? / den
        }
        None => rate.parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate("30/1"), Some(30.0));
        assert!((parse_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_rate("25"), Some(25.0));
        assert_eq!(parse_rate("0/0"), None);
        assert_eq!(parse_rate("N/A"), None);
    }

    #[test]
    fn test_parse_stream_report() {
        let json = br#"{
            "streams": [{"codec_name": "h264", "width": 1920, "height": 1080,
                         "avg_frame_rate": "30/1", "r_frame_rate": "30/1", "nb_frames": "300"}],
            "format": {"duration": "10.0"}
        }"#;
        let info = parse_stream_report(json).unwrap();
        assert_eq!(info.native_resolution(), Resolution::new(1920, 1080));
        assert_eq!(info.frame_count, 300);
        assert_eq!(info.fps, 30.0);
        assert_eq!(info.codec, "h264");
        assert!((info.seconds_at(45) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_frame_count_estimated_from_duration() {
        let json = br#"{
            "streams": [{"avg_frame_rate": "0/0", "r_frame_rate": "25/1"}],
            "format": {"duration": "2.0"}
        }"#;
        let info = parse_stream_report(json).unwrap();
        assert_eq!(info.fps, 25.0);
        assert_eq!(info.frame_count, 50);
    }

    #[test]
    fn test_no_video_stream() {
        let json = br#"{"streams": [], "format": {}}"#;
        assert!(matches!(
            parse_stream_report(json),
            Err(MediaError::InvalidVideo(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let result = inspect_video("/nonexistent/video.mp4").await;
        assert!(matches!(result, Err(MediaError::FileNotFound(_))));
    }
}
