//! Web-playable transcoding of the raw run videos.

use heatgrid_models::encoding::{
    web_video_name, WEB_PIXEL_FORMAT, WEB_VIDEO_CODEC, WEB_VIDEO_LEVEL, WEB_VIDEO_PROFILE,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Which file a caller should serve after a transcode attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscodeOutcome {
    pub path: PathBuf,
    /// False when the raw file is served unmodified.
    pub transcoded: bool,
}

/// Build the H.264 baseline command for `raw` → `web`.
pub fn web_transcode_command(raw: &Path, web: &Path) -> FfmpegCommand {
    FfmpegCommand::new(raw, web)
        .video_codec(WEB_VIDEO_CODEC)
        .profile(WEB_VIDEO_PROFILE, WEB_VIDEO_LEVEL)
        .pixel_format(WEB_PIXEL_FORMAT)
        .faststart()
        .no_audio()
}

/// Transcode `raw` into `web`.
pub async fn transcode_for_web(raw: impl AsRef<Path>, web: impl AsRef<Path>) -> MediaResult<()> {
    let raw = raw.as_ref();
    if !raw.exists() {
        return Err(MediaError::FileNotFound(raw.to_path_buf()));
    }
    let last = FfmpegRunner::new("web-transcode")
        .run(&web_transcode_command(raw, web.as_ref()))
        .await?;
    debug!(raw = %raw.display(), frames = last.frame, "Web transcode finished");
    Ok(())
}

/// Transcode `raw` next to itself as `web_<name>`, falling back to `raw`.
///
/// Never fails: a failed transcode leaves the raw file as the deliverable.
pub async fn transcode_or_fallback(raw: impl AsRef<Path>) -> TranscodeOutcome {
    let raw = raw.as_ref();
    let name = raw
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let web = raw.with_file_name(web_video_name(&name));

    match transcode_for_web(raw, &web).await {
        Ok(()) => {
            info!(raw = %raw.display(), web = %web.display(), "Transcoded for web playback");
            TranscodeOutcome {
                path: web,
                transcoded: true,
            }
        }
        Err(e) => {
            warn!(
                raw = %raw.display(),
                error = %e,
                "Web transcode failed, serving raw file"
            );
            let _ = std::fs::remove_file(&web);
            TranscodeOutcome {
                path: raw.to_path_buf(),
                transcoded: false,
            }
        }
    }
}
