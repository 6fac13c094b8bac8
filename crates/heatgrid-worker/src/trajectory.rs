//! Per-identity trajectory recording.

use heatgrid_models::encoding::track_file_name;
use heatgrid_models::{Detection, TrajectoryPoint};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::WorkerResult;

/// Ordered positions of every identity seen in a run.
#[derive(Debug, Default)]
pub struct TrajectoryRecorder {
    tracks: BTreeMap<i64, Vec<TrajectoryPoint>>,
}

impl TrajectoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the detection center for `frame_no`. The first point of an
    /// identity creates its track.
    ///
    /// Points of one identity must have strictly increasing frame numbers;
    /// a point at or before the identity's last frame is ignored and `None`
    /// is returned.
    pub fn record(&mut self, frame_no: u64, detection: &Detection) -> Option<TrajectoryPoint> {
        let track = self.tracks.entry(detection.identity).or_default();
        if let Some(last) = track.last().filter(|p| p.frame_no >= frame_no) {
            warn!(
                identity = detection.identity,
                frame_no,
                last_frame = last.frame_no,
                "Out-of-order trajectory point ignored"
            );
            return None;
        }

        let (x, y) = detection.center_px();
        let point = TrajectoryPoint {
            identity: detection.identity,
            frame_no,
            x,
            y,
        };
        track.push(point);
        Some(point)
    }

    pub fn points(&self, identity: i64) -> &[TrajectoryPoint] {
        self.tracks.get(&identity).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Identities in ascending order.
    pub fn identities(&self) -> impl Iterator<Item = i64> + '_ {
        self.tracks.keys().copied()
    }

    pub fn identity_count(&self) -> usize {
        self.tracks.len()
    }

    /// Total points across all identities.
    pub fn point_count(&self) -> usize {
        self.tracks.values().map(Vec::len).sum()
    }

    /// Write one `ID_<identity>.json` per identity into `dir`.
    pub fn write_files(&self, dir: impl AsRef<Path>) -> WorkerResult<Vec<PathBuf>> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let mut written = Vec::with_capacity(self.tracks.len());
        for (identity, points) in &self.tracks {
            let path = dir.join(track_file_name(*identity));
            let mut writer = BufWriter::new(fs::File::create(&path)?);
            serde_json::to_writer(&mut writer, points)?;
            writer.flush()?;
            written.push(path);
        }
        debug!(dir = %dir.display(), files = written.len(), "Wrote trajectory files");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heatgrid_models::{BoundingBox, PERSON_CLASS};

    fn det(identity: i64, x: f32) -> Detection {
        Detection::new(identity, PERSON_CLASS, BoundingBox::new(x, 10.0, x + 11.0, 21.0))
    }

    #[test]
    fn test_points_follow_frame_order() {
        let mut recorder = TrajectoryRecorder::new();
        recorder.record(1, &det(2, 0.0));
        recorder.record(2, &det(1, 50.0));
        recorder.record(3, &det(2, 10.0));

        let frames: Vec<u64> = recorder.points(2).iter().map(|p| p.frame_no).collect();
        assert_eq!(frames, vec![1, 3]);
        assert_eq!(recorder.points(2)[1].x, 15);
        assert_eq!(recorder.identities().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(recorder.point_count(), 3);
        assert!(recorder.points(99).is_empty());
    }

    #[test]
    fn test_repeated_frame_ignored() {
        let mut recorder = TrajectoryRecorder::new();
        assert!(recorder.record(10, &det(1, 0.0)).is_some());
        assert!(recorder.record(10, &det(1, 40.0)).is_none());
        assert!(recorder.record(9, &det(1, 40.0)).is_none());
        assert!(recorder.record(11, &det(1, 40.0)).is_some());

        let frames: Vec<u64> = recorder.points(1).iter().map(|p| p.frame_no).collect();
        assert_eq!(frames, vec![10, 11]);
        assert_eq!(recorder.points(1)[0].x, 5);
    }

    #[test]
    fn test_write_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = TrajectoryRecorder::new();
        recorder.record(10, &det(7, 100.0));
        recorder.record(20, &det(7, 120.0));

        let files = recorder.write_files(dir.path().join("tracks")).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("tracks/ID_7.json"));

        let points: Vec<TrajectoryPoint> =
            serde_json::from_slice(&fs::read(&files[0]).unwrap()).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].frame_no, 20);
    }
}
