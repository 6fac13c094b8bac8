//! Sequential RGB frame decoding via an FFmpeg rawvideo pipe.
//!
//! Every decoded frame is scaled to the requested resolution by FFmpeg, so
//! downstream stages only ever see one frame geometry.

use heatgrid_models::Resolution;
use image::RgbImage;
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

use crate::command::check_ffmpeg;
use crate::error::{MediaError, MediaResult};

/// Lines of decoder stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Blocking iterator over the frames of a video.
///
/// Yields frames in decode order. Iteration stops at end of stream, or after
/// the first error, which is yielded once. A decoder that exits non-zero is
/// an error even if it already produced frames.
pub struct FrameSource {
    path: PathBuf,
    resolution: Resolution,
    child: Child,
    reader: BufReader<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
    frames_read: u64,
    finished: bool,
}

impl FrameSource {
    /// Spawn the decoder for `path`, scaling every frame to `resolution`.
    pub fn open(path: impl AsRef<Path>, resolution: Resolution) -> MediaResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }
        check_ffmpeg()?;

        let scale = format!("scale={}:{}", resolution.width, resolution.height);
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-hide_banner", "-loglevel", "error", "-i"])
            .arg(path)
            .args(["-vf", &scale, "-pix_fmt", "rgb24", "-f", "rawvideo", "-"]);
        Self::spawn(cmd, path, resolution)
    }

    /// Read `rgb24` frames of `resolution` from the stdout of `cmd`.
    fn spawn(mut cmd: Command, path: &Path, resolution: Resolution) -> MediaResult<Self> {
        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                MediaError::ffmpeg_failed(format!("Failed to spawn decoder: {}", e), None, None)
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("Decoder stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("Decoder stderr not captured"))?;
        let stderr = thread::Builder::new()
            .name("decoder-stderr".to_string())
            .spawn(move || stderr_tail(stderr))?;

        debug!(path = %path.display(), %resolution, "Opened frame source");

        Ok(Self {
            path: path.to_path_buf(),
            resolution,
            child,
            reader: BufReader::with_capacity(resolution.rgb_frame_len(), stdout),
            stderr: Some(stderr),
            frames_read: 0,
            finished: false,
        })
    }

    fn read_frame(&mut self) -> MediaResult<Option<RgbImage>> {
        let mut buf = vec![0u8; self.resolution.rgb_frame_len()];
        match self.reader.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.check_exit()?;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        let frame = RgbImage::from_raw(self.resolution.width, self.resolution.height, buf)
            .ok_or_else(|| MediaError::FrameSize {
                expected: self.resolution.to_string(),
                actual: "short buffer".to_string(),
            })?;
        Ok(Some(frame))
    }

    /// Stdout is closed: the stream is only complete if the decoder succeeded.
    fn check_exit(&mut self) -> MediaResult<()> {
        let status = self.child.wait()?;
        if status.success() {
            return Ok(());
        }
        let tail = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .filter(|tail| !tail.is_empty());
        Err(MediaError::ffmpeg_failed(
            format!(
                "Decoder for {} exited with {} after {} frames",
                self.path.display(),
                status,
                self.frames_read
            ),
            tail,
            status.code(),
        ))
    }

    fn shutdown(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

fn stderr_tail(stderr: ChildStderr) -> String {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    for line in BufReader::new(stderr).lines().map_while(Result::ok) {
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join("\n")
}

impl Iterator for FrameSource {
    type Item = MediaResult<RgbImage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_frame() {
            Ok(Some(frame)) => {
                self.frames_read += 1;
                Some(Ok(frame))
            }
            Ok(None) => {
                self.finished = true;
                debug!(
                    path = %self.path.display(),
                    frames = self.frames_read,
                    "Frame source exhausted"
                );
                None
            }
            Err(e) => {
                self.finished = true;
                warn!(
                    path = %self.path.display(),
                    frames = self.frames_read,
                    error = %e,
                    "Frame decode failed"
                );
                Some(Err(e))
            }
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_input() {
        let result = FrameSource::open("/nonexistent/input.mp4", Resolution::default());
        assert!(matches!(result, Err(MediaError::FileNotFound(_))));
    }

    fn shell_decoder(script: &str) -> FrameSource {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        FrameSource::spawn(cmd, Path::new("fake.mp4"), Resolution::new(4, 4)).unwrap()
    }

    #[test]
    fn test_clean_exit_ends_stream() {
        // Two 4x4 rgb24 frames plus a truncated third.
        let source = shell_decoder("head -c 120 /dev/zero");
        let results: Vec<_> = source.collect();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_ok()));
    }

    #[test]
    fn test_decoder_crash_is_an_error() {
        let mut source = shell_decoder("head -c 48 /dev/zero; echo 'corrupt packet' >&2; exit 1");

        assert!(matches!(source.next(), Some(Ok(_))));
        match source.next() {
            Some(Err(MediaError::FfmpegFailed {
                exit_code, stderr, ..
            })) => {
                assert_eq!(exit_code, Some(1));
                assert!(stderr.unwrap_or_default().contains("corrupt packet"));
            }
            other => panic!("expected decoder failure, got {:?}", other.map(|r| r.map(|_| ()))),
        }
        assert!(source.next().is_none());
    }
}
