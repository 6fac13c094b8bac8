//! Write-behind persistence sink.
//!
//! Producers enqueue rows on a bounded channel; a dedicated writer thread
//! drains it in batches, each batch inside one `BEGIN IMMEDIATE` transaction.
//! Enqueueing never blocks: when the queue is full the row is dropped and
//! counted, so decoding speed is never tied to disk speed.
//!
//! The blocking calls (`register_run`, `flush`) must be made from outside an
//! async context, e.g. from a `spawn_blocking` task.

use heatgrid_models::{HeatmapRow, RunId, TrajectoryPoint, VideoRun};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};
use crate::schema::initialize_schema;

/// Default bound of the write queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// Maximum commands drained into one transaction.
const WRITER_BATCH_CAP: usize = 256;

/// Outcome counters of the write-behind queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Rows committed
    pub written: u64,
    /// Rows whose insert failed
    pub failed: u64,
    /// Rows rejected because the queue was full
    pub dropped: u64,
}

enum WriteCommand {
    RegisterRun {
        run: VideoRun,
        respond: oneshot::Sender<StorageResult<RunId>>,
    },
    Trajectory {
        run: RunId,
        point: TrajectoryPoint,
    },
    Heatmap(HeatmapRow),
    CompleteRun {
        run: RunId,
        frame_count: u64,
    },
    Flush {
        respond: oneshot::Sender<()>,
    },
}

impl WriteCommand {
    /// Control commands run outside a batch transaction.
    fn is_control(&self) -> bool {
        matches!(
            self,
            WriteCommand::RegisterRun { .. } | WriteCommand::Flush { .. }
        )
    }
}

#[derive(Debug, Default)]
struct WriterCounters {
    written: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Handle to the persistence writer.
///
/// Dropping the sink closes the queue, lets the writer drain and commit what
/// is already enqueued, and joins the writer thread.
pub struct PersistenceSink {
    path: PathBuf,
    write_tx: Option<mpsc::Sender<WriteCommand>>,
    writer_handle: Option<JoinHandle<()>>,
    counters: Arc<WriterCounters>,
}

impl PersistenceSink {
    /// Open (or create) the database at `path` and start the writer thread.
    pub fn open(path: impl AsRef<Path>, queue_capacity: usize) -> StorageResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut conn = Connection::open(path)?;
        initialize_schema(&conn)?;

        let (write_tx, mut write_rx) = mpsc::channel::<WriteCommand>(queue_capacity.max(1));
        let counters = Arc::new(WriterCounters::default());
        let writer_counters = Arc::clone(&counters);

        let writer_handle = thread::Builder::new()
            .name("heatgrid-writer".to_string())
            .spawn(move || writer_loop(&mut conn, &mut write_rx, &writer_counters))?;

        info!(path = %path.display(), queue_capacity, "Persistence sink opened");

        Ok(Self {
            path: path.to_path_buf(),
            write_tx: Some(write_tx),
            writer_handle: Some(writer_handle),
            counters,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert the run row and return its id. Waits for the writer.
    pub fn register_run(&self, run: &VideoRun) -> StorageResult<RunId> {
        let (tx, rx) = oneshot::channel();
        self.sender()?
            .blocking_send(WriteCommand::RegisterRun {
                run: run.clone(),
                respond: tx,
            })
            .map_err(|_| StorageError::WriterUnavailable)?;
        rx.blocking_recv()
            .map_err(|_| StorageError::database("Writer response channel closed"))?
    }

    /// Enqueue a trajectory row. Never blocks.
    pub fn record_trajectory(&self, run: RunId, point: TrajectoryPoint) {
        self.enqueue(WriteCommand::Trajectory { run, point });
    }

    /// Enqueue a heatmap row. Never blocks.
    pub fn record_heatmap(&self, row: HeatmapRow) {
        self.enqueue(WriteCommand::Heatmap(row));
    }

    /// Enqueue the final frame count and completion time of a run.
    pub fn complete_run(&self, run: RunId, frame_count: u64) {
        self.enqueue(WriteCommand::CompleteRun { run, frame_count });
    }

    /// Wait until everything enqueued so far is committed.
    pub fn flush(&self) -> StorageResult<FlushReport> {
        let (tx, rx) = oneshot::channel();
        self.sender()?
            .blocking_send(WriteCommand::Flush { respond: tx })
            .map_err(|_| StorageError::WriterUnavailable)?;
        rx.blocking_recv()
            .map_err(|_| StorageError::database("Writer response channel closed"))?;
        Ok(self.report())
    }

    /// Current counters without waiting for the writer.
    pub fn report(&self) -> FlushReport {
        FlushReport {
            written: self.counters.written.load(Ordering::Acquire),
            failed: self.counters.failed.load(Ordering::Acquire),
            dropped: self.counters.dropped.load(Ordering::Acquire),
        }
    }

    /// Flush, stop the writer thread and return the final counters.
    pub fn close(mut self) -> StorageResult<FlushReport> {
        let report = self.flush()?;
        self.shutdown();
        Ok(report)
    }

    fn sender(&self) -> StorageResult<&mpsc::Sender<WriteCommand>> {
        self.write_tx.as_ref().ok_or(StorageError::WriterUnavailable)
    }

    fn enqueue(&self, cmd: WriteCommand) {
        let Some(tx) = self.write_tx.as_ref() else {
            self.count_dropped();
            return;
        };
        match tx.try_send(cmd) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.count_dropped();
                if dropped == 1 || dropped % 1000 == 0 {
                    warn!(dropped, "Persistence queue full, dropping rows");
                }
            }
            Err(TrySendError::Closed(_)) => {
                self.count_dropped();
            }
        }
    }

    fn count_dropped(&self) -> u64 {
        metrics::counter!("heatgrid_rows_dropped_total").increment(1);
        self.counters.dropped.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn shutdown(&mut self) {
        // Closing the channel ends the writer loop once the backlog is drained.
        self.write_tx.take();
        if let Some(handle) = self.writer_handle.take() {
            if handle.join().is_err() {
                warn!(path = %self.path.display(), "Writer thread panicked");
            }
        }
    }
}

impl Drop for PersistenceSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn writer_loop(
    conn: &mut Connection,
    rx: &mut mpsc::Receiver<WriteCommand>,
    counters: &WriterCounters,
) {
    while let Some(first_cmd) = rx.blocking_recv() {
        let mut batch = Vec::with_capacity(16);
        batch.push(first_cmd);
        while batch.len() < WRITER_BATCH_CAP {
            match rx.try_recv() {
                Ok(cmd) => batch.push(cmd),
                Err(_) => break,
            }
        }

        let mut txn_open = false;
        let mut pending: u64 = 0;
        for cmd in batch {
            if cmd.is_control() {
                commit(conn, &mut txn_open, &mut pending, counters);
                dispatch_control(conn, cmd);
                continue;
            }
            if !txn_open {
                txn_open = conn.execute_batch("BEGIN IMMEDIATE").is_ok();
            }
            match dispatch_row(conn, &cmd) {
                Ok(()) => pending += 1,
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::AcqRel);
                    warn!(error = %e, "Persistence insert failed");
                }
            }
            if !txn_open {
                // Autocommit mode: the row is durable already.
                counters.written.fetch_add(pending, Ordering::AcqRel);
                pending = 0;
            }
        }
        commit(conn, &mut txn_open, &mut pending, counters);
    }
    debug!("Persistence writer stopped");
}

fn commit(conn: &Connection, txn_open: &mut bool, pending: &mut u64, counters: &WriterCounters) {
    if !*txn_open {
        return;
    }
    *txn_open = false;
    match conn.execute_batch("COMMIT") {
        Ok(()) => {
            counters.written.fetch_add(*pending, Ordering::AcqRel);
        }
        Err(e) => {
            warn!(error = %e, rows = *pending, "Persistence commit failed");
            counters.failed.fetch_add(*pending, Ordering::AcqRel);
            let _ = conn.execute_batch("ROLLBACK");
        }
    }
    *pending = 0;
}

fn dispatch_control(conn: &Connection, cmd: WriteCommand) {
    match cmd {
        WriteCommand::RegisterRun { run, respond } => {
            let _ = respond.send(insert_run(conn, &run));
        }
        WriteCommand::Flush { respond } => {
            let _ = respond.send(());
        }
        _ => {}
    }
}

fn dispatch_row(conn: &Connection, cmd: &WriteCommand) -> rusqlite::Result<()> {
    match cmd {
        WriteCommand::Trajectory { run, point } => {
            conn.prepare_cached(
                "INSERT INTO trajectories (video_id, person_id, frame_number, x, y) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?
            .execute(params![
                run.as_i64(),
                point.identity,
                point.frame_no as i64,
                point.x,
                point.y
            ])?;
        }
        WriteCommand::Heatmap(row) => {
            conn.prepare_cached(
                "INSERT INTO heatmaps (video_id, window_start_frame, x_grid, y_grid, count) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?
            .execute(params![
                row.video_id.as_i64(),
                row.window_start_frame as i64,
                row.x_grid,
                row.y_grid,
                row.count
            ])?;
        }
        WriteCommand::CompleteRun { run, frame_count } => {
            conn.execute(
                "UPDATE videos SET frame_count = ?2, completed_at = datetime('now') WHERE id = ?1",
                params![run.as_i64(), *frame_count as i64],
            )?;
        }
        WriteCommand::RegisterRun { .. } | WriteCommand::Flush { .. } => {}
    }
    Ok(())
}

fn insert_run(conn: &Connection, run: &VideoRun) -> StorageResult<RunId> {
    conn.execute(
        "INSERT INTO videos \
         (filename, frame_count, fps, width, height, cell_size, window_length, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            run.source_name,
            run.frame_count as i64,
            run.fps,
            run.resolution.width,
            run.resolution.height,
            run.cell_size,
            run.window_length as i64,
            run.created_at.to_rfc3339()
        ],
    )?;
    let id = RunId(conn.last_insert_rowid());
    debug!(run_id = %id, source = %run.source_name, "Registered run");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use heatgrid_models::Resolution;

    fn test_run(name: &str) -> VideoRun {
        VideoRun::new(name, 30.0, Resolution::default(), 20, 10)
    }

    #[test]
    fn test_run_ids_increase() {
        let dir = tempfile::tempdir().unwrap();
        let sink = PersistenceSink::open(dir.path().join("heatgrid.db"), 16).unwrap();

        let first = sink.register_run(&test_run("a.mp4")).unwrap();
        let second = sink.register_run(&test_run("b.mp4")).unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_flush_reports_written_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("heatgrid.db");
        let sink = PersistenceSink::open(&db, 64).unwrap();
        let run = sink.register_run(&test_run("lobby.mp4")).unwrap();

        for frame_no in 1..=5 {
            sink.record_trajectory(
                run,
                TrajectoryPoint {
                    identity: 1,
                    frame_no,
                    x: 110,
                    y: 110,
                },
            );
        }
        sink.record_heatmap(HeatmapRow {
            video_id: run,
            window_start_frame: 10,
            x_grid: 5,
            y_grid: 5,
            count: 1,
        });
        sink.complete_run(run, 300);

        let report = sink.close().unwrap();
        assert_eq!(report.written, 7);
        assert_eq!(report.failed, 0);
        assert_eq!(report.dropped, 0);

        let conn = Connection::open(&db).unwrap();
        let frames: i64 = conn
            .query_row("SELECT frame_count FROM videos WHERE id = ?1", [run.as_i64()], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(frames, 300);
    }

    #[test]
    fn test_drop_commits_backlog() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("heatgrid.db");
        let run = {
            let sink = PersistenceSink::open(&db, 64).unwrap();
            let run = sink.register_run(&test_run("lobby.mp4")).unwrap();
            for frame_no in 1..=3 {
                sink.record_trajectory(
                    run,
                    TrajectoryPoint {
                        identity: 2,
                        frame_no,
                        x: 0,
                        y: 0,
                    },
                );
            }
            run
        };

        let conn = Connection::open(&db).unwrap();
        let rows: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM trajectories WHERE video_id = ?1",
                [run.as_i64()],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(rows, 3);
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() {
        let dir = tempfile::tempdir().unwrap();
        let sink = PersistenceSink::open(dir.path().join("heatgrid.db"), 1).unwrap();
        let run = sink.register_run(&test_run("busy.mp4")).unwrap();

        for frame_no in 1..=2000 {
            sink.record_trajectory(
                run,
                TrajectoryPoint {
                    identity: 1,
                    frame_no,
                    x: 1,
                    y: 1,
                },
            );
        }

        let report = sink.close().unwrap();
        assert_eq!(report.written + report.dropped + report.failed, 2000);
    }
}
