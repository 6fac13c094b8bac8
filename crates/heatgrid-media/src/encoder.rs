//! Raw video encoding over an FFmpeg stdin pipe.

use heatgrid_models::encoding::{RAW_VIDEO_CODEC, RAW_VIDEO_QSCALE};
use heatgrid_models::Resolution;
use image::RgbImage;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use tracing::{debug, warn};

use crate::command::check_ffmpeg;
use crate::error::{MediaError, MediaResult};

/// Sink for rendered frames.
pub trait FrameWriter {
    /// Append one frame. Frames must match the writer's resolution.
    fn write_frame(&mut self, frame: &RgbImage) -> MediaResult<()>;

    /// Frames accepted so far.
    fn frames_written(&self) -> u64;
}

/// FFmpeg-backed frame writer producing an MPEG-4 file.
///
/// The file is finalized by [`VideoEncoder::finish`], or on drop if the
/// encoder goes out of scope early (error paths included).
pub struct VideoEncoder {
    path: PathBuf,
    resolution: Resolution,
    child: Option<Child>,
    stdin: Option<BufWriter<ChildStdin>>,
    frames_written: u64,
}

impl VideoEncoder {
    /// Spawn an encoder writing to `path` at `fps`.
    pub fn create(path: impl AsRef<Path>, resolution: Resolution, fps: f64) -> MediaResult<Self> {
        let path = path.as_ref();
        check_ffmpeg()?;

        let size = resolution.to_string();
        let rate = format!("{:.3}", if fps > 0.0 { fps } else { 30.0 });
        let qscale = RAW_VIDEO_QSCALE.to_string();

        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-y", "-hide_banner", "-loglevel", "error"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s", &size, "-r", &rate, "-i", "-"])
            .args(["-an", "-c:v", RAW_VIDEO_CODEC, "-q:v", &qscale])
            .arg(path);
        let encoder = Self::spawn(cmd, path, resolution)?;

        debug!(path = %path.display(), %resolution, fps, "Opened video encoder");
        Ok(encoder)
    }

    /// Feed `rgb24` frames of `resolution` to the stdin of `cmd`.
    fn spawn(mut cmd: Command, path: &Path, resolution: Resolution) -> MediaResult<Self> {
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                MediaError::ffmpeg_failed(format!("Failed to spawn encoder: {}", e), None, None)
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::internal("Encoder stdin not captured"))?;

        Ok(Self {
            path: path.to_path_buf(),
            resolution,
            child: Some(child),
            stdin: Some(BufWriter::with_capacity(resolution.rgb_frame_len(), stdin)),
            frames_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush remaining frames and wait for FFmpeg to write the trailer.
    pub fn finish(mut self) -> MediaResult<PathBuf> {
        self.close()?;
        Ok(self.path.clone())
    }

    /// Close stdin and reap FFmpeg. The child is always waited on, also when
    /// the final flush fails.
    fn close(&mut self) -> MediaResult<()> {
        // Dropping the writer closes the pipe so FFmpeg sees end of input.
        let flushed = match self.stdin.take() {
            Some(mut stdin) => stdin.flush(),
            None => Ok(()),
        };
        let Some(mut child) = self.child.take() else {
            return flushed.map_err(MediaError::from);
        };

        let status = child.wait()?;
        if !status.success() {
            return Err(MediaError::ffmpeg_failed(
                format!("Encoder for {} exited with {}", self.path.display(), status),
                None,
                status.code(),
            ));
        }
        flushed?;

        debug!(
            path = %self.path.display(),
            frames = self.frames_written,
            "Finalized video"
        );
        Ok(())
    }
}

impl FrameWriter for VideoEncoder {
    fn write_frame(&mut self, frame: &RgbImage) -> MediaResult<()> {
        if frame.dimensions() != (self.resolution.width, self.resolution.height) {
            return Err(MediaError::frame_size(
                (self.resolution.width, self.resolution.height),
                frame.dimensions(),
            ));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MediaError::EncoderClosed(self.path.clone()))?;
        stdin.write_all(frame.as_raw())?;
        self.frames_written += 1;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl Drop for VideoEncoder {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(path = %self.path.display(), error = %e, "Encoder shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "requires ffmpeg"]
    fn test_encode_finalizes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mp4");
        let resolution = Resolution::new(64, 48);

        let mut encoder = VideoEncoder::create(&path, resolution, 10.0).unwrap();
        let frame = RgbImage::from_pixel(64, 48, image::Rgb([200, 10, 10]));
        for _ in 0..5 {
            encoder.write_frame(&frame).unwrap();
        }
        assert_eq!(encoder.frames_written(), 5);
        let written = encoder.finish().unwrap();
        assert!(written.metadata().unwrap().len() > 0);
    }

    fn shell_encoder(script: &str) -> VideoEncoder {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        VideoEncoder::spawn(cmd, Path::new("out.mp4"), Resolution::new(4, 4)).unwrap()
    }

    #[test]
    fn test_failed_encoder_is_reaped() {
        // Exits without reading, so the final flush may hit a closed pipe.
        let mut encoder = shell_encoder("exit 3");
        encoder.write_frame(&RgbImage::new(4, 4)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(100));

        let err = encoder.close().unwrap_err();
        assert!(matches!(
            err,
            MediaError::FfmpegFailed {
                exit_code: Some(3),
                ..
            }
        ));
        assert!(encoder.child.is_none());
        assert!(matches!(
            encoder.write_frame(&RgbImage::new(4, 4)),
            Err(MediaError::EncoderClosed(_))
        ));
    }

    #[test]
    fn test_successful_close() {
        let mut encoder = shell_encoder("cat >/dev/null");
        for _ in 0..3 {
            encoder.write_frame(&RgbImage::new(4, 4)).unwrap();
        }
        assert_eq!(encoder.frames_written(), 3);
        assert_eq!(encoder.finish().unwrap(), PathBuf::from("out.mp4"));
    }

    #[test]
    fn test_rejects_wrong_frame_size() {
        let mut encoder = shell_encoder("cat >/dev/null");
        let frame = RgbImage::new(32, 32);
        assert!(matches!(
            encoder.write_frame(&frame),
            Err(MediaError::FrameSize { .. })
        ));
    }
}
