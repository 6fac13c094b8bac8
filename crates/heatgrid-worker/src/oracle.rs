//! Detection oracles and the adapter that filters their output.
//!
//! An oracle owns identity continuity: it sees every queried frame in order
//! and returns identity-tagged boxes in canonical pixel coordinates.

use heatgrid_models::Detection;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TrySendError};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub type OracleResult<T> = Result<T, OracleError>;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed oracle output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Replay file line {line}: {message}")]
    Replay { line: usize, message: String },

    #[error("Tracker process exited: {0}")]
    Exited(String),

    #[error("Tracker gave no answer within {0:?}")]
    Timeout(Duration),
}

/// Source of identity-tagged detections.
pub trait DetectionOracle: Send {
    /// Detections for `frame`. Called with strictly increasing `frame_no`.
    fn track(&mut self, frame_no: u64, frame: &RgbImage) -> OracleResult<Vec<Detection>>;

    /// Oracle name for logging.
    fn name(&self) -> &'static str;
}

impl<O: DetectionOracle + ?Sized> DetectionOracle for Box<O> {
    fn track(&mut self, frame_no: u64, frame: &RgbImage) -> OracleResult<Vec<Detection>> {
        (**self).track(frame_no, frame)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// One line of a replay file / one tracker answer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameDetections {
    #[serde(default)]
    pub frame: u64,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

/// Replays precomputed tracker output from a JSON Lines file.
#[derive(Debug, Clone, Default)]
pub struct ReplayOracle {
    frames: BTreeMap<u64, Vec<Detection>>,
}

impl ReplayOracle {
    pub fn new(frames: BTreeMap<u64, Vec<Detection>>) -> Self {
        Self { frames }
    }

    pub fn from_path(path: impl AsRef<Path>) -> OracleResult<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let oracle = Self::from_reader(BufReader::new(file))?;
        info!(
            path = %path.display(),
            frames = oracle.frames.len(),
            "Loaded replay detections"
        );
        Ok(oracle)
    }

    /// Parse JSON Lines; blank lines are skipped, repeated frames are merged.
    pub fn from_reader(reader: impl BufRead) -> OracleResult<Self> {
        let mut frames: BTreeMap<u64, Vec<Detection>> = BTreeMap::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: FrameDetections =
                serde_json::from_str(&line).map_err(|e| OracleError::Replay {
                    line: idx + 1,
                    message: e.to_string(),
                })?;
            frames.entry(entry.frame).or_default().extend(entry.detections);
        }
        Ok(Self { frames })
    }

    /// Number of frames with recorded detections.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl DetectionOracle for ReplayOracle {
    fn track(&mut self, frame_no: u64, _frame: &RgbImage) -> OracleResult<Vec<Detection>> {
        Ok(self.frames.get(&frame_no).cloned().unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "replay"
    }
}

#[derive(Serialize)]
struct FrameHeader {
    frame: u64,
    width: u32,
    height: u32,
}

/// Default wait for one tracker answer.
pub const DEFAULT_TRACKER_TIMEOUT: Duration = Duration::from_secs(30);

/// Drives an external tracker over stdin/stdout.
///
/// Per frame the tracker receives one JSON header line followed by
/// `width * height * 3` RGB bytes, and answers with one JSON line
/// `{"detections": [...]}`.
///
/// Pipe I/O runs on two helper threads so a stalled tracker costs at most
/// the answer timeout; the tracker is then killed and every later frame
/// fails fast.
pub struct ProcessOracle {
    command: String,
    child: Child,
    frames_tx: Option<SyncSender<Vec<u8>>>,
    answers_rx: Receiver<io::Result<String>>,
    timeout: Duration,
}

impl ProcessOracle {
    /// Spawn `command` through the shell.
    pub fn spawn(command: &str) -> OracleResult<Self> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| OracleError::Exited("tracker stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| OracleError::Exited("tracker stdout not captured".to_string()))?;

        let (frames_tx, frames_rx) = mpsc::sync_channel::<Vec<u8>>(1);
        let (answers_tx, answers_rx) = mpsc::channel();

        // Neither thread is joined: both end once the tracker's pipes close.
        thread::Builder::new()
            .name("tracker-stdin".to_string())
            .spawn(move || write_frames(stdin, frames_rx))?;
        thread::Builder::new()
            .name("tracker-stdout".to_string())
            .spawn(move || read_answers(BufReader::new(stdout), answers_tx))?;

        info!(command, "Spawned tracker process");
        Ok(Self {
            command: command.to_string(),
            child,
            frames_tx: Some(frames_tx),
            answers_rx,
            timeout: DEFAULT_TRACKER_TIMEOUT,
        })
    }

    /// Longest wait for one answer before the tracker is declared stalled.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn kill(&mut self) {
        self.frames_tx = None;
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn write_frames(mut stdin: ChildStdin, frames: Receiver<Vec<u8>>) {
    for payload in frames {
        if let Err(e) = stdin.write_all(&payload).and_then(|_| stdin.flush()) {
            debug!(error = %e, "Tracker stdin closed");
            return;
        }
    }
}

fn read_answers(mut stdout: BufReader<ChildStdout>, answers: Sender<io::Result<String>>) {
    loop {
        let mut line = String::new();
        match stdout.read_line(&mut line) {
            Ok(0) => return,
            Ok(_) => {
                if answers.send(Ok(line)).is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = answers.send(Err(e));
                return;
            }
        }
    }
}

impl DetectionOracle for ProcessOracle {
    fn track(&mut self, frame_no: u64, frame: &RgbImage) -> OracleResult<Vec<Detection>> {
        let frames_tx = self
            .frames_tx
            .as_ref()
            .ok_or_else(|| OracleError::Exited(self.command.clone()))?;

        let header = FrameHeader {
            frame: frame_no,
            width: frame.width(),
            height: frame.height(),
        };
        let mut payload = serde_json::to_vec(&header)?;
        payload.push(b'\n');
        payload.extend_from_slice(frame.as_raw());

        match frames_tx.try_send(payload) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                // Previous frame still unwritten: the tracker stopped reading.
                self.kill();
                return Err(OracleError::Timeout(self.timeout));
            }
            Err(TrySendError::Disconnected(_)) => {
                self.frames_tx = None;
                return Err(OracleError::Exited(self.command.clone()));
            }
        }

        match self.answers_rx.recv_timeout(self.timeout) {
            Ok(Ok(line)) => {
                let answer: FrameDetections = serde_json::from_str(line.trim())?;
                Ok(answer.detections)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(RecvTimeoutError::Timeout) => {
                warn!(command = %self.command, frame_no, "Tracker stalled, killing it");
                self.kill();
                Err(OracleError::Timeout(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.frames_tx = None;
                Err(OracleError::Exited(self.command.clone()))
            }
        }
    }

    fn name(&self) -> &'static str {
        "process"
    }
}

impl Drop for ProcessOracle {
    fn drop(&mut self) {
        // EOF on stdin asks the tracker to exit.
        self.frames_tx.take();
        for _ in 0..20 {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            thread::sleep(Duration::from_millis(50));
        }
        warn!(command = %self.command, "Tracker did not exit, killing it");
        self.kill();
    }
}

/// Stride gating, class filtering and failure isolation around an oracle.
pub struct OracleAdapter<O> {
    oracle: O,
    stride: u64,
    target_class: i32,
    failures: u64,
}

impl<O: DetectionOracle> OracleAdapter<O> {
    pub fn new(oracle: O, stride: u64, target_class: i32) -> Self {
        Self {
            oracle,
            stride: stride.max(1),
            target_class,
            failures: 0,
        }
    }

    /// Whether `frame_no` is queried at all.
    pub fn is_queried(&self, frame_no: u64) -> bool {
        frame_no % self.stride == 0
    }

    /// Target-class detections for a frame; empty when not queried or on failure.
    pub fn detect(&mut self, frame_no: u64, frame: &RgbImage) -> Vec<Detection> {
        if !self.is_queried(frame_no) {
            return Vec::new();
        }
        match self.oracle.track(frame_no, frame) {
            Ok(detections) => {
                let target = self.target_class;
                let mut seen = HashSet::new();
                let kept: Vec<Detection> = detections
                    .into_iter()
                    .filter(|d| d.class_id == target)
                    .filter(|d| {
                        let first = seen.insert(d.identity);
                        if !first {
                            warn!(frame_no, identity = d.identity, "Duplicate identity in frame, keeping the first");
                        }
                        first
                    })
                    .collect();
                metrics::counter!("heatgrid_detections_total").increment(kept.len() as u64);
                kept
            }
            Err(e) => {
                self.failures += 1;
                metrics::counter!("heatgrid_oracle_failures_total").increment(1);
                warn!(
                    oracle = self.oracle.name(),
                    frame_no,
                    error = %e,
                    "Oracle failed, treating frame as empty"
                );
                Vec::new()
            }
        }
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heatgrid_models::{BoundingBox, PERSON_CLASS};

    struct FailingOracle;

    impl DetectionOracle for FailingOracle {
        fn track(&mut self, _: u64, _: &RgbImage) -> OracleResult<Vec<Detection>> {
            Err(OracleError::Exited("boom".to_string()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn replay() -> ReplayOracle {
        let jsonl = r#"{"frame": 2, "detections": [{"id": 1, "class": 0, "bbox": [0, 0, 10, 10]}, {"id": 9, "class": 2, "bbox": [5, 5, 8, 8]}]}

{"frame": 4, "detections": [{"id": 1, "class": 0, "bbox": [2, 2, 12, 12]}]}
"#;
        ReplayOracle::from_reader(jsonl.as_bytes()).unwrap()
    }

    #[test]
    fn test_replay_parsing() {
        let mut oracle = replay();
        assert_eq!(oracle.len(), 2);
        let frame = RgbImage::new(1, 1);
        assert_eq!(oracle.track(2, &frame).unwrap().len(), 2);
        assert!(oracle.track(3, &frame).unwrap().is_empty());
    }

    #[test]
    fn test_replay_bad_line() {
        let result = ReplayOracle::from_reader("{\"frame\": 1}\nnot json\n".as_bytes());
        assert!(matches!(result, Err(OracleError::Replay { line: 2, .. })));
    }

    #[test]
    fn test_adapter_filters_class() {
        let mut adapter = OracleAdapter::new(replay(), 1, PERSON_CLASS);
        let frame = RgbImage::new(1, 1);
        let kept = adapter.detect(2, &frame);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].identity, 1);
        assert_eq!(kept[0].bbox, BoundingBox::new(0.0, 0.0, 10.0, 10.0));
    }

    #[test]
    fn test_adapter_stride() {
        let mut adapter = OracleAdapter::new(replay(), 4, PERSON_CLASS);
        let frame = RgbImage::new(1, 1);
        assert!(adapter.detect(2, &frame).is_empty());
        assert_eq!(adapter.detect(4, &frame).len(), 1);
    }

    #[test]
    fn test_adapter_isolates_failures() {
        let mut adapter = OracleAdapter::new(FailingOracle, 1, PERSON_CLASS);
        let frame = RgbImage::new(1, 1);
        assert!(adapter.detect(1, &frame).is_empty());
        assert!(adapter.detect(2, &frame).is_empty());
        assert_eq!(adapter.failures(), 2);
    }

    #[test]
    fn test_process_oracle_round_trip() {
        // Reads the header line, skips 3 bytes of pixels, answers once.
        let script = r#"read header; head -c 3 >/dev/null; echo '{"detections": [{"id": 5, "class": 0, "bbox": [1, 1, 3, 3]}]}'; cat >/dev/null"#;
        let mut oracle = ProcessOracle::spawn(script).unwrap();
        let frame = RgbImage::new(1, 1);
        let detections = oracle.track(1, &frame).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].identity, 5);
    }

    #[test]
    fn test_stalled_tracker_times_out() {
        // Takes the header, never answers.
        let oracle = ProcessOracle::spawn("read header; sleep 30")
            .unwrap()
            .with_timeout(Duration::from_millis(200));
        let mut adapter = OracleAdapter::new(oracle, 1, PERSON_CLASS);
        let frame = RgbImage::new(4, 4);

        let started = std::time::Instant::now();
        assert!(adapter.detect(1, &frame).is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(adapter.failures(), 1);

        // Killed after the stall: later frames fail without waiting.
        let started = std::time::Instant::now();
        assert!(adapter.detect(2, &frame).is_empty());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(adapter.failures(), 2);
    }

    #[test]
    fn test_stalled_tracker_error() {
        let mut oracle = ProcessOracle::spawn("read header; sleep 30")
            .unwrap()
            .with_timeout(Duration::from_millis(100));
        let frame = RgbImage::new(4, 4);
        assert!(matches!(oracle.track(1, &frame), Err(OracleError::Timeout(_))));
        assert!(matches!(oracle.track(2, &frame), Err(OracleError::Exited(_))));
    }

    #[test]
    fn test_exited_tracker() {
        let mut oracle = ProcessOracle::spawn("exit 0").unwrap();
        let frame = RgbImage::new(1, 1);
        assert!(oracle.track(1, &frame).is_err());
    }

    #[test]
    fn test_adapter_drops_duplicate_identity() {
        let jsonl = r#"{"frame": 10, "detections": [{"id": 1, "class": 0, "bbox": [0, 0, 10, 10]}]}
{"frame": 10, "detections": [{"id": 1, "class": 0, "bbox": [50, 50, 60, 60]}, {"id": 2, "class": 0, "bbox": [5, 5, 9, 9]}]}
"#;
        let mut adapter =
            OracleAdapter::new(ReplayOracle::from_reader(jsonl.as_bytes()).unwrap(), 1, PERSON_CLASS);
        let kept = adapter.detect(10, &RgbImage::new(1, 1));
        let ids: Vec<i64> = kept.iter().map(|d| d.identity).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(kept[0].bbox, BoundingBox::new(0.0, 0.0, 10.0, 10.0));
    }
}
