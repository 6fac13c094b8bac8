//! Window snapshot extraction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(60);

/// Extract the frame at `seconds` from `video_path` into a JPEG.
pub async fn extract_snapshot(
    video_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    seconds: f64,
) -> MediaResult<PathBuf> {
    let video_path = video_path.as_ref();
    let output_path = output_path.as_ref();

    if !video_path.exists() {
        return Err(MediaError::FileNotFound(video_path.to_path_buf()));
    }

    let cmd = FfmpegCommand::new(video_path, output_path)
        .seek(seconds.max(0.0))
        .jpeg_still(2);

    FfmpegRunner::new("snapshot")
        .with_timeout(SNAPSHOT_TIMEOUT)
        .run(&cmd)
        .await?;

    Ok(output_path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_video() {
        let dir = tempfile::tempdir().unwrap();
        let result = extract_snapshot("/nonexistent/a.mp4", dir.path().join("1_10.jpg"), 0.3).await;
        assert!(matches!(result, Err(MediaError::FileNotFound(_))));
    }
}
