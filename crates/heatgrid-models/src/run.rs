//! Video run metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::encoding::{CANONICAL_HEIGHT, CANONICAL_WIDTH};
use crate::error::ModelError;

/// Identifier of one ingestion run.
///
/// Assigned by the persistence sink (monotonically increasing) or supplied
/// by configuration when no sink is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub i64);

impl RunId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self(1)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RunId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Frame resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Bytes in one packed RGB24 frame.
    pub fn rgb_frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(CANONICAL_WIDTH, CANONICAL_HEIGHT)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = ModelError;

    /// Parse `WIDTHxHEIGHT`, e.g. `1280x720`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| ModelError::InvalidResolution(s.to_string()))?;
        let width: u32 = w
            .trim()
            .parse()
            .map_err(|_| ModelError::InvalidResolution(s.to_string()))?;
        let height: u32 = h
            .trim()
            .parse()
            .map_err(|_| ModelError::InvalidResolution(s.to_string()))?;
        if width == 0 || height == 0 {
            return Err(ModelError::InvalidResolution(s.to_string()));
        }
        Ok(Self { width, height })
    }
}

/// Metadata for one ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRun {
    /// Run identifier, propagated to every record and output file
    pub id: RunId,
    /// Source file name (base name only)
    pub source_name: String,
    /// Number of decoded frames (estimate until the run completes)
    pub frame_count: u64,
    /// Source frame rate
    pub fps: f64,
    /// Canonical processing resolution
    pub resolution: Resolution,
    /// Grid cell edge length in pixels
    pub cell_size: u32,
    /// Frames per aggregation window
    pub window_length: u64,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl VideoRun {
    pub fn new(
        source_name: impl Into<String>,
        fps: f64,
        resolution: Resolution,
        cell_size: u32,
        window_length: u64,
    ) -> Self {
        Self {
            id: RunId::default(),
            source_name: source_name.into(),
            frame_count: 0,
            fps,
            resolution,
            cell_size,
            window_length,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: RunId) -> Self {
        self.id = id;
        self
    }

    pub fn with_frame_count(mut self, frame_count: u64) -> Self {
        self.frame_count = frame_count;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_parse() {
        let res: Resolution = "1280x720".parse().unwrap();
        assert_eq!(res, Resolution::new(1280, 720));
        assert_eq!(res.rgb_frame_len(), 1280 * 720 * 3);

        assert!("1280".parse::<Resolution>().is_err());
        assert!("0x720".parse::<Resolution>().is_err());
        assert!("axb".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_run_id_serializes_transparently() {
        let json = serde_json::to_string(&RunId(42)).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn test_video_run_builder() {
        let run = VideoRun::new("lobby.mp4", 30.0, Resolution::default(), 20, 10)
            .with_id(RunId(7))
            .with_frame_count(300);
        assert_eq!(run.id, RunId(7));
        assert_eq!(run.frame_count, 300);
        assert_eq!(run.resolution.width, 1280);
    }
}
