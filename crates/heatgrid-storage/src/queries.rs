//! Read-side occupancy queries.

use heatgrid_models::{CellDensity, CellSample, RunId, RunListing, RunSummary};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;

use crate::error::{StorageError, StorageResult};

/// Read-only query handle over a heatgrid database.
pub struct OccupancyQueries {
    conn: Connection,
}

impl OccupancyQueries {
    /// Open an existing database read-only.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StorageError::database(format!(
                "Database not found: {}",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    /// Wrap an existing connection (tests, in-memory databases).
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// Number of trajectory rows for a run.
    pub fn total_trajectory_rows(&self, run: RunId) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM trajectories WHERE video_id = ?1",
            [run.as_i64()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Number of distinct identities seen in a run.
    pub fn distinct_identities(&self, run: RunId) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT person_id) FROM trajectories WHERE video_id = ?1",
            [run.as_i64()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Top `k` cells by summed heatmap count.
    ///
    /// Ordered by count descending, ties broken by ascending `x` then `y`.
    pub fn top_cells(&self, run: RunId, k: usize) -> StorageResult<Vec<CellDensity>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT x_grid, y_grid, SUM(count) AS cnt \
             FROM heatmaps \
             WHERE video_id = ?1 \
             GROUP BY x_grid, y_grid \
             ORDER BY cnt DESC, x_grid ASC, y_grid ASC \
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![run.as_i64(), k as i64], |row| {
            Ok(CellDensity {
                x: row.get(0)?,
                y: row.get(1)?,
                count: row.get::<_, i64>(2)? as u64,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Average number of heatmap rows per distinct window start, 0.0 when none.
    pub fn dwell_proxy(&self, run: RunId) -> StorageResult<f64> {
        let avg: Option<f64> = self.conn.query_row(
            "SELECT AVG(cnt) FROM ( \
                 SELECT COUNT(*) AS cnt FROM heatmaps \
                 WHERE video_id = ?1 \
                 GROUP BY window_start_frame \
             )",
            [run.as_i64()],
            |row| row.get(0),
        )?;
        Ok(avg.unwrap_or(0.0))
    }

    /// Heatmap samples of one cell, in window order.
    pub fn cell_series(&self, run: RunId, x: u32, y: u32) -> StorageResult<Vec<CellSample>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT window_start_frame, count FROM heatmaps \
             WHERE video_id = ?1 AND x_grid = ?2 AND y_grid = ?3 \
             ORDER BY window_start_frame, id",
        )?;
        let rows = stmt.query_map(params![run.as_i64(), x, y], |row| {
            Ok(CellSample {
                window_start_frame: row.get::<_, i64>(0)? as u64,
                count: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Distinct window starts that produced heatmap rows, ascending.
    pub fn window_starts(&self, run: RunId) -> StorageResult<Vec<u64>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT DISTINCT window_start_frame FROM heatmaps \
             WHERE video_id = ?1 ORDER BY window_start_frame",
        )?;
        let rows = stmt.query_map([run.as_i64()], |row| row.get::<_, i64>(0))?;
        rows.map(|r| r.map(|v| v as u64).map_err(StorageError::from))
            .collect()
    }

    /// All runs, newest first.
    pub fn list_runs(&self) -> StorageResult<Vec<RunListing>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id, filename, frame_count FROM videos ORDER BY id DESC")?;
        let rows = stmt.query_map([], |row| {
            Ok(RunListing {
                id: RunId(row.get(0)?),
                source_name: row.get(1)?,
                frame_count: row.get::<_, i64>(2)? as u64,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Look up one run.
    pub fn run(&self, run: RunId) -> StorageResult<RunListing> {
        self.conn
            .query_row(
                "SELECT id, filename, frame_count FROM videos WHERE id = ?1",
                [run.as_i64()],
                |row| {
                    Ok(RunListing {
                        id: RunId(row.get(0)?),
                        source_name: row.get(1)?,
                        frame_count: row.get::<_, i64>(2)? as u64,
                    })
                },
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run.as_i64()))
    }

    /// Dashboard aggregate for a run.
    pub fn run_summary(&self, run: RunId, top_k: usize) -> StorageResult<RunSummary> {
        Ok(RunSummary {
            video_id: run,
            total_moves: self.total_trajectory_rows(run)?,
            distinct_identities: self.distinct_identities(run)?,
            top_cells: self.top_cells(run, top_k)?,
            avg_dwell: self.dwell_proxy(run)?,
        })
    }
}
