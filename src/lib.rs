//! # WaffleDB
//!
//! An embedded time-series database: tagged numeric samples go through a
//! write-ahead log into per-metric columnar chunks on local disk, with
//! range scans, aggregations and a small textual query language on top.
//!
//! ## Features
//!
//! - **Durable writes**: every write hits the WAL before it is acknowledged
//! - **Columnar chunks**: 1000-row chunks with block-level time pruning,
//!   delta-encoded timestamps and run-length-encoded values
//! - **Lock-free ingestion**: writers hand points to a background flusher
//!   without blocking each other
//! - **Crash recovery**: the WAL replays on re-open when chunks are missing
//! - **Aggregations**: sum/avg/min/max/count with equality tag filters
//!
//! ## Modules
//!
//! - [`storage`]: the engine (WAL, chunks, flusher, recovery)
//! - [`index`]: chunk-level pruning index
//! - [`query`]: textual `SELECT fn(metric) FROM metric` queries
//! - [`interchange`]: CSV and JSON import/export
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use waffledb::{Database, TimePoint, TagMap};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::open("metrics")?;
//!
//!     db.write(TimePoint::new("cpu.usage", 1700000000, 42.5).tag("host", "server1"))?;
//!
//!     // Writes become queryable within one flush interval (100 ms);
//!     // flush() forces it for immediate reads
//!     db.flush()?;
//!
//!     let avg = db.avg("cpu.usage", 0, u64::MAX, &TagMap::new());
//!     println!("average: {avg}");
//!
//!     db.close()?;
//!     Ok(())
//! }
//! ```

pub mod index;
pub mod interchange;
pub mod query;
pub mod storage;

pub use storage::{
    Database, DatabaseConfig, DatabaseStats, StorageError, StorageResult, TagMap, TimePoint,
    TimeSeries, WalSyncMode,
};

pub use index::AdaptiveIndex;

pub use query::{execute, AggregateFunc, QueryError, QueryOutput, QueryResult, Statement};

pub use interchange::{export_csv, import_csv, import_json, CsvImportResult, InterchangeError};
