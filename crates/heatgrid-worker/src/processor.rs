//! Analysis pipeline: decode, detect, aggregate, render, persist.
//!
//! [`AnalysisEngine`] is the per-frame loop, independent of where frames come
//! from and where rendered frames go. [`HeatmapProcessor`] wires it to FFmpeg,
//! the persistence sink and the post-run steps (renderers, trajectory files,
//! transcoding, snapshots).

use chrono::{DateTime, Utc};
use heatgrid_media::{
    draw_box, draw_identity_label, extract_snapshot, identity_color, inspect_video,
    transcode_or_fallback, FrameSource, FrameWriter, MediaResult, VideoEncoder, VideoInfo,
};
use heatgrid_models::encoding::{
    detected_video_name, global_heatmap_name, heatmap_video_name, overlay_video_name,
    snapshot_name,
};
use heatgrid_models::{GridCell, HeatmapRow, Resolution, RunId, VideoRun};
use heatgrid_storage::{FlushReport, PersistenceSink};
use image::RgbImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::aggregator::{CountGrid, TemporalWindowAggregator, WindowAccumulator};
use crate::compositor::OverlayCompositor;
use crate::config::AnalysisConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::grid::GridMapper;
use crate::logging::RunLogger;
use crate::oracle::{DetectionOracle, OracleAdapter};
use crate::renderers::{GlobalHeatmapRenderer, WindowedHeatmapRenderer};
use crate::trajectory::TrajectoryRecorder;

/// Outline width of detection boxes.
const BOX_THICKNESS: u32 = 2;

/// Pixel size of one label glyph dot.
const LABEL_SCALE: u32 = 2;

/// Frames between progress log lines.
const PROGRESS_INTERVAL: u64 = 500;

/// State handed over when the frame loop ends.
#[derive(Debug)]
pub struct EngineOutput {
    /// Frames processed
    pub frames: u64,
    /// Target-class detections kept
    pub detections: u64,
    /// Trigger increments applied
    pub trigger_events: u64,
    /// Frames on which the oracle failed
    pub oracle_failures: u64,
    pub global: CountGrid,
    /// Sealed windows, ascending by index
    pub windows: Vec<WindowAccumulator>,
    pub trajectories: TrajectoryRecorder,
}

/// Single-threaded per-frame aggregation loop.
pub struct AnalysisEngine<'a, O> {
    run_id: RunId,
    mapper: GridMapper,
    adapter: OracleAdapter<O>,
    aggregator: TemporalWindowAggregator,
    trajectories: TrajectoryRecorder,
    compositor: OverlayCompositor,
    sink: Option<&'a PersistenceSink>,
    frames: u64,
    detections: u64,
    trigger_events: u64,
}

impl<'a, O: DetectionOracle> AnalysisEngine<'a, O> {
    pub fn new(config: &AnalysisConfig, run_id: RunId, oracle: O) -> WorkerResult<Self> {
        let dims = config.grid_dims()?;
        Ok(Self {
            run_id,
            mapper: GridMapper::new(dims),
            adapter: OracleAdapter::new(oracle, config.detection_stride, config.target_class),
            aggregator: TemporalWindowAggregator::new(dims, config.window_length)?,
            trajectories: TrajectoryRecorder::new(),
            compositor: OverlayCompositor::new(config.resolution),
            sink: None,
            frames: 0,
            detections: 0,
            trigger_events: 0,
        })
    }

    /// Mirror trajectory and heatmap rows into `sink`.
    pub fn with_sink(mut self, sink: &'a PersistenceSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Live global accumulator.
    pub fn global(&self) -> &CountGrid {
        self.aggregator.global()
    }

    /// Windows sealed so far.
    pub fn archived_windows(&self) -> &[WindowAccumulator] {
        self.aggregator.archived()
    }

    /// Process one frame: one annotated frame goes to `detected` and one
    /// overlay frame to `overlay`, whatever the oracle returns.
    pub fn process_frame<D, V>(
        &mut self,
        frame_no: u64,
        frame: RgbImage,
        detected: &mut D,
        overlay: &mut V,
    ) -> WorkerResult<()>
    where
        D: FrameWriter + ?Sized,
        V: FrameWriter + ?Sized,
    {
        let detections = self.adapter.detect(frame_no, &frame);
        let cells: Vec<GridCell> = detections
            .iter()
            .map(|d| self.mapper.cell_for(&d.bbox))
            .collect();

        let samples = self.aggregator.observe(frame_no, &cells)?;
        for sample in &samples {
            if let Some(sink) = self.sink {
                sink.record_heatmap(HeatmapRow {
                    video_id: self.run_id,
                    window_start_frame: sample.window_start_frame,
                    x_grid: sample.cell.x,
                    y_grid: sample.cell.y,
                    count: sample.window_count,
                });
            }
        }
        self.trigger_events += samples.len() as u64;

        let mut annotated = frame;
        for detection in &detections {
            if let (Some(point), Some(sink)) =
                (self.trajectories.record(frame_no, detection), self.sink)
            {
                sink.record_trajectory(self.run_id, point);
            }
            let color = identity_color(detection.identity);
            draw_box(&mut annotated, &detection.bbox, color, BOX_THICKNESS);
            draw_identity_label(
                &mut annotated,
                &detection.bbox,
                detection.identity,
                color,
                LABEL_SCALE,
            );
        }

        detected.write_frame(&annotated)?;
        let blended = self.compositor.compose(&annotated, self.aggregator.global())?;
        overlay.write_frame(&blended)?;

        self.frames += 1;
        self.detections += detections.len() as u64;
        metrics::counter!("heatgrid_frames_total").increment(1);
        Ok(())
    }

    /// Drive the loop over `frames`, numbering them from 1.
    ///
    /// A decode error ends the loop early; everything processed so far is
    /// kept and rendered.
    pub fn run<I, D, V>(mut self, frames: I, detected: &mut D, overlay: &mut V) -> WorkerResult<EngineOutput>
    where
        I: IntoIterator<Item = MediaResult<RgbImage>>,
        D: FrameWriter + ?Sized,
        V: FrameWriter + ?Sized,
    {
        for (idx, frame) in frames.into_iter().enumerate() {
            let frame_no = idx as u64 + 1;
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(run_id = %self.run_id, frame_no, error = %e, "Decode failed, ending run early");
                    break;
                }
            };
            self.process_frame(frame_no, frame, detected, overlay)?;

            if frame_no % PROGRESS_INTERVAL == 0 {
                debug!(
                    run_id = %self.run_id,
                    frame_no,
                    detections = self.detections,
                    windows = self.aggregator.archived().len(),
                    "Frame loop progress"
                );
            }
        }
        Ok(self.finish())
    }

    /// Seal the open window and hand over all state.
    pub fn finish(self) -> EngineOutput {
        let oracle_failures = self.adapter.failures();
        let (global, windows) = self.aggregator.finish();
        EngineOutput {
            frames: self.frames,
            detections: self.detections,
            trigger_events: self.trigger_events,
            oracle_failures,
            global,
            windows,
            trajectories: self.trajectories,
        }
    }
}

/// Everything a run produced, printed by `heatgrid analyze`.
///
/// Video paths point at the web transcodes when those succeeded.
#[derive(Debug, Clone, Serialize)]
pub struct RunArtifacts {
    pub video_id: RunId,
    pub source: String,
    pub frames: u64,
    pub windows: usize,
    pub identities: usize,
    pub detected_video: PathBuf,
    pub overlay_video: PathBuf,
    /// Absent when no window was ever triggered
    pub heatmap_video: Option<PathBuf>,
    pub global_heatmap: PathBuf,
    pub tracks: Vec<PathBuf>,
    pub snapshots: Vec<PathBuf>,
    pub persistence: Option<FlushReport>,
    pub oracle_failures: u64,
    pub completed_at: DateTime<Utc>,
}

/// Output of the blocking half of a run.
struct RenderedRun {
    run_id: RunId,
    source: String,
    frames: u64,
    window_starts: Vec<u64>,
    identities: usize,
    detected_raw: PathBuf,
    overlay_raw: PathBuf,
    heatmap_raw: Option<PathBuf>,
    global_heatmap: PathBuf,
    tracks: Vec<PathBuf>,
    persistence: Option<FlushReport>,
    oracle_failures: u64,
}

/// End-to-end analysis of one video file.
pub struct HeatmapProcessor {
    config: AnalysisConfig,
}

impl HeatmapProcessor {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyze `video` with `oracle`.
    ///
    /// The source is inspected before any output is created, so an unreadable
    /// file fails without leaving artifacts behind.
    pub async fn process<O>(&self, video: impl AsRef<Path>, oracle: O) -> WorkerResult<RunArtifacts>
    where
        O: DetectionOracle + 'static,
    {
        let video = video.as_ref().to_path_buf();
        let logger = RunLogger::pending("analyze");

        self.config.grid_dims()?;
        let info = inspect_video(&video).await?;
        logger.log_start(&format!(
            "{} ({} {} @ {:.2} fps, ~{} frames)",
            video.display(),
            info.native_resolution(),
            info.codec,
            info.fps,
            info.frame_count
        ));

        tokio::fs::create_dir_all(&self.config.output_dir).await?;

        let config = self.config.clone();
        let source = video.clone();
        let inspected = info.clone();
        let rendered = tokio::task::spawn_blocking(move || render_run(&config, &source, &inspected, oracle))
            .await
            .map_err(|e| WorkerError::processing_failed(format!("Blocking task join error: {}", e)))??;

        let logger = logger.with_run(rendered.run_id);
        logger.log_progress(&format!(
            "{} frames, {} windows, {} identities",
            rendered.frames,
            rendered.window_starts.len(),
            rendered.identities
        ));

        let detected_video = self.deliver(&rendered.detected_raw).await;
        let overlay_video = self.deliver(&rendered.overlay_raw).await;
        let heatmap_video = match &rendered.heatmap_raw {
            Some(raw) => Some(self.deliver(raw).await),
            None => None,
        };

        let snapshots = if self.config.snapshots {
            self.extract_snapshots(&video, &info, &rendered, &logger).await
        } else {
            Vec::new()
        };

        logger.log_completion(&format!("outputs in {}", self.config.output_dir.display()));

        Ok(RunArtifacts {
            video_id: rendered.run_id,
            source: rendered.source,
            frames: rendered.frames,
            windows: rendered.window_starts.len(),
            identities: rendered.identities,
            detected_video,
            overlay_video,
            heatmap_video,
            global_heatmap: rendered.global_heatmap,
            tracks: rendered.tracks,
            snapshots,
            persistence: rendered.persistence,
            oracle_failures: rendered.oracle_failures,
            completed_at: Utc::now(),
        })
    }

    async fn deliver(&self, raw: &Path) -> PathBuf {
        if !self.config.transcode {
            return raw.to_path_buf();
        }
        transcode_or_fallback(raw).await.path
    }

    async fn extract_snapshots(
        &self,
        video: &Path,
        info: &VideoInfo,
        rendered: &RenderedRun,
        logger: &RunLogger,
    ) -> Vec<PathBuf> {
        let dir = self.config.snapshot_dir();
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            logger.log_warning(&format!("cannot create {}: {}", dir.display(), e));
            return Vec::new();
        }

        let mut snapshots = Vec::with_capacity(rendered.window_starts.len());
        for &start in &rendered.window_starts {
            let path = dir.join(snapshot_name(rendered.run_id, start));
            if path.exists() {
                snapshots.push(path);
                continue;
            }
            match extract_snapshot(video, &path, info.seconds_at(start)).await {
                Ok(path) => snapshots.push(path),
                Err(e) => logger.log_warning(&format!("snapshot at frame {} failed: {}", start, e)),
            }
        }
        snapshots
    }
}

/// Open the sink and register the run; any failure degrades to no sink.
///
/// The returned run carries the id every record and output file is keyed
/// by: the database-assigned one, or the configured one without persistence.
fn open_sink(config: &AnalysisConfig, run: VideoRun) -> (VideoRun, Option<PersistenceSink>) {
    let Some(db) = config.database.as_ref() else {
        return (run.with_id(config.run_id), None);
    };
    let sink = match PersistenceSink::open(db, config.queue_capacity) {
        Ok(sink) => sink,
        Err(e) => {
            warn!(database = %db.display(), error = %e, "Persistence unavailable, continuing without it");
            return (run.with_id(config.run_id), None);
        }
    };
    match sink.register_run(&run) {
        Ok(run_id) => {
            debug!(%run_id, source = %run.source_name, "Registered run");
            (run.with_id(run_id), Some(sink))
        }
        Err(e) => {
            warn!(database = %db.display(), error = %e, "Run registration failed, continuing without persistence");
            (run.with_id(config.run_id), None)
        }
    }
}

fn render_run<O: DetectionOracle>(
    config: &AnalysisConfig,
    video: &Path,
    info: &VideoInfo,
    oracle: O,
) -> WorkerResult<RenderedRun> {
    let resolution: Resolution = config.resolution;
    let source = video
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| video.display().to_string());

    let run = VideoRun::new(
        source.clone(),
        info.fps,
        resolution,
        config.cell_size,
        config.window_length,
    )
    .with_frame_count(info.frame_count);

    let (run, sink) = open_sink(config, run);
    let run_id = run.id;
    let logger = RunLogger::new(run_id, "analyze");
    let span = logger.create_span();
    let _guard = span.enter();

    let frames = FrameSource::open(video, resolution)?;
    let out = &config.output_dir;
    let mut detected = VideoEncoder::create(out.join(detected_video_name(run_id)), resolution, info.fps)?;
    let mut overlay = VideoEncoder::create(out.join(overlay_video_name(run_id)), resolution, info.fps)?;

    let mut engine = AnalysisEngine::new(config, run_id, oracle)?;
    if let Some(sink) = sink.as_ref() {
        engine = engine.with_sink(sink);
    }
    let output = engine.run(frames, &mut detected, &mut overlay)?;

    let detected_raw = detected.finish()?;
    let overlay_raw = overlay.finish()?;

    let heatmap_raw = if output.windows.is_empty() {
        logger.log_progress("no window was triggered, skipping windowed heatmap video");
        None
    } else {
        let mut encoder =
            VideoEncoder::create(out.join(heatmap_video_name(run_id)), resolution, info.fps)?;
        WindowedHeatmapRenderer::new(resolution, config.window_length)
            .render(&output.windows, &mut encoder)?;
        Some(encoder.finish()?)
    };

    let global_heatmap = GlobalHeatmapRenderer::new(resolution)
        .write_png(&output.global, out.join(global_heatmap_name(run_id)))?;
    let tracks = output.trajectories.write_files(config.tracks_dir())?;

    let persistence = sink.and_then(|sink| {
        sink.complete_run(run_id, output.frames);
        match sink.close() {
            Ok(report) => {
                info!(
                    written = report.written,
                    failed = report.failed,
                    dropped = report.dropped,
                    "Persistence flushed"
                );
                Some(report)
            }
            Err(e) => {
                warn!(error = %e, "Persistence flush failed");
                None
            }
        }
    });

    if output.oracle_failures > 0 {
        logger.log_warning(&format!("oracle failed on {} frames", output.oracle_failures));
    }

    Ok(RenderedRun {
        run_id,
        source,
        frames: output.frames,
        window_starts: output.windows.iter().map(|w| w.start_frame()).collect(),
        identities: output.trajectories.identity_count(),
        detected_raw,
        overlay_raw,
        heatmap_raw,
        global_heatmap,
        tracks,
        persistence,
        oracle_failures: output.oracle_failures,
    })
}
