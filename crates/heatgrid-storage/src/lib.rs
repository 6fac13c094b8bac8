//! SQLite persistence for heatgrid runs.
//!
//! Writes go through [`PersistenceSink`], a bounded write-behind queue drained
//! by a dedicated writer thread. Reads go through [`OccupancyQueries`] on a
//! separate connection.

pub mod error;
pub mod queries;
pub mod schema;
pub mod sink;

pub use error::{StorageError, StorageResult};
pub use queries::OccupancyQueries;
pub use schema::initialize_schema;
pub use sink::{FlushReport, PersistenceSink, DEFAULT_QUEUE_CAPACITY};
