//! Database schema.

use rusqlite::Connection;

use crate::error::StorageResult;

/// Create-if-missing schema.
///
/// `heatmaps.window_start_frame` is the frame number of the window's trigger
/// frame; `count` is the window cell value right after that trigger.
pub const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS videos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL,
    frame_count INTEGER NOT NULL DEFAULT 0,
    fps REAL NOT NULL,
    width INTEGER NOT NULL,
    height INTEGER NOT NULL,
    cell_size INTEGER NOT NULL,
    window_length INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE TABLE IF NOT EXISTS trajectories (
    id INTEGER PRIMARY KEY,
    video_id INTEGER NOT NULL REFERENCES videos(id),
    person_id INTEGER NOT NULL,
    frame_number INTEGER NOT NULL,
    x INTEGER NOT NULL,
    y INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_trajectories_video ON trajectories(video_id, person_id);

CREATE TABLE IF NOT EXISTS heatmaps (
    id INTEGER PRIMARY KEY,
    video_id INTEGER NOT NULL REFERENCES videos(id),
    window_start_frame INTEGER NOT NULL,
    x_grid INTEGER NOT NULL,
    y_grid INTEGER NOT NULL,
    count INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_heatmaps_video_cell ON heatmaps(video_id, x_grid, y_grid);
CREATE INDEX IF NOT EXISTS idx_heatmaps_video_window ON heatmaps(video_id, window_start_frame);
"#;

/// Apply the schema to an open connection.
pub fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
