//! Parser for FFmpeg's `-progress` key=value blocks.

use serde::Serialize;

/// State accumulated from one FFmpeg progress stream.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FfmpegProgress {
    /// Frames written so far
    pub frame: u64,
    /// Output timestamp in microseconds
    pub out_time_us: i64,
    /// Set once FFmpeg reports `progress=end`
    pub finished: bool,
}

impl FfmpegProgress {
    pub fn out_time_secs(&self) -> f64 {
        self.out_time_us as f64 / 1_000_000.0
    }

    /// Feed one stderr line. Each `progress=` line closes a block and
    /// returns a copy of the state.
    pub fn parse_line(&mut self, line: &str) -> Option<FfmpegProgress> {
        let (key, value) = line.trim().split_once('=')?;
        match key {
            "frame" => {
                if let Ok(frame) = value.trim().parse() {
                    self.frame = frame;
                }
            }
            // Older builds report microseconds under `out_time_ms`.
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.trim().parse() {
                    self.out_time_us = us;
                }
            }
            "progress" => {
                self.finished = value.trim() == "end";
                return Some(self.clone());
            }
            _ => {}
        }
        None
    }
}
