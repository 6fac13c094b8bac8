//! One-shot FFmpeg invocations (web transcodes, snapshots).
//!
//! The streaming pipes used by the frame loop live in `frame_source` and
//! `encoder`; this module covers file-to-file jobs that run to completion.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::FfmpegProgress;

/// Lines of non-progress stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// File-to-file FFmpeg job.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: PathBuf,
    /// Arguments placed before `-i`
    input_args: Vec<String>,
    /// Arguments placed after `-i`
    output_args: Vec<String>,
}

impl FfmpegCommand {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
        }
    }

    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Input-side seek, so only the target frame is decoded.
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(format!("{:.3}", seconds))
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// H.264 profile and level.
    pub fn profile(self, profile: impl Into<String>, level: impl Into<String>) -> Self {
        self.output_arg("-profile:v")
            .output_arg(profile)
            .output_arg("-level")
            .output_arg(level)
    }

    pub fn pixel_format(self, pix_fmt: impl Into<String>) -> Self {
        self.output_arg("-pix_fmt").output_arg(pix_fmt)
    }

    /// Move the moov atom to the front for progressive playback.
    pub fn faststart(self) -> Self {
        self.output_arg("-movflags").output_arg("+faststart")
    }

    /// Write exactly one frame at the given JPEG quality (2 best, 31 worst).
    pub fn jpeg_still(self, quality: u8) -> Self {
        self.output_arg("-frames:v")
            .output_arg("1")
            .output_arg("-q:v")
            .output_arg(quality.to_string())
    }

    /// Drop any audio stream.
    pub fn no_audio(self) -> Self {
        self.output_arg("-an")
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-v".to_string(),
            "error".to_string(),
            // key=value progress blocks on stderr
            "-progress".to_string(),
            "pipe:2".to_string(),
        ];
        args.extend(self.input_args.iter().cloned());
        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());
        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());
        args
    }
}

/// Runs an [`FfmpegCommand`] to completion, logging progress under `label`.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    label: &'static str,
    timeout: Option<Duration>,
}

impl FfmpegRunner {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run `cmd` and return the last progress block FFmpeg reported.
    ///
    /// A non-zero exit carries the tail of FFmpeg's stderr.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<FfmpegProgress> {
        check_ffmpeg()?;

        let args = cmd.build_args();
        debug!(job = self.label, "ffmpeg {}", args.join(" "));

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stderr not captured"))?;

        let label = self.label;
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut progress = FfmpegProgress::default();
            let mut last = FfmpegProgress::default();
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(block) = progress.parse_line(&line) {
                    debug!(
                        job = label,
                        frame = block.frame,
                        out_secs = block.out_time_secs(),
                        "FFmpeg progress"
                    );
                    last = block;
                } else if !line.contains('=') {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
            (last, Vec::from(tail).join("\n"))
        });

        let status = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!(job = self.label, secs = timeout.as_secs(), "FFmpeg timed out, killing it");
                    let _ = child.kill().await;
                    return Err(MediaError::Timeout(timeout.as_secs()));
                }
            },
            None => child.wait().await?,
        };

        let (last, stderr_tail) = reader.await.unwrap_or_default();
        if status.success() {
            Ok(last)
        } else {
            Err(MediaError::ffmpeg_failed(
                format!("{} exited with {}", self.label, status),
                (!stderr_tail.is_empty()).then_some(stderr_tail),
                status.code(),
            ))
        }
    }
}

pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_web_transcode_args() {
        let cmd = FfmpegCommand::new("overlay_1.mp4", "web_overlay_1.mp4")
            .video_codec("libx264")
            .profile("baseline", "3.0")
            .pixel_format("yuv420p")
            .faststart()
            .no_audio();

        let args = cmd.build_args();
        assert_eq!(args[0], "-y");
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert!(args.windows(2).any(|w| w == ["-profile:v", "baseline"]));
        assert!(args.windows(2).any(|w| w == ["-movflags", "+faststart"]));
        assert!(args.iter().any(|a| a == "-an"));
        assert_eq!(args.last().map(String::as_str), Some("web_overlay_1.mp4"));
        assert_eq!(cmd.output(), Path::new("web_overlay_1.mp4"));
    }

    #[test]
    fn test_seek_precedes_input() {
        let args = FfmpegCommand::new("in.mp4", "snap.jpg")
            .seek(4.0)
            .jpeg_still(2)
            .build_args();

        let seek = args.iter().position(|a| a == "-ss").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(seek < input);
        assert_eq!(args[seek + 1], "4.000");
        assert!(args.windows(2).any(|w| w == ["-frames:v", "1"]));
        assert!(args.windows(2).any(|w| w == ["-q:v", "2"]));
    }
}
