//! WaffleDB storage engine
//!
//! Core time-series storage:
//!
//! - **types**: `TimePoint`, `TimeSeries`, tag matching
//! - **codec**: delta timestamp and RLE value codecs
//! - **chunk**: bounded columnar chunks with range/tag queries and block
//!   aggregates
//! - **chunk_store**: one file per sealed chunk on disk
//! - **wal**: length-framed write-ahead log
//! - **ingress**: lock-free writer → flusher hand-off
//! - **engine**: the `Database` orchestrating all of the above
//! - **error**: error types
//!
//! # Architecture
//!
//! ```text
//! Write path:
//!   TimePoint → WAL (durable) → ingress queue → flusher → active chunk
//!                                               └─ full chunk → seal → disk
//! Read path:
//!   Query → index pruning → active + sealed chunks → merge, sort
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use waffledb::storage::{Database, TimePoint, TagMap};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::open("metrics")?;
//!
//!     db.write(TimePoint::new("cpu.usage", 1700000000, 42.5).tag("host", "server1"))?;
//!     db.flush()?;
//!
//!     let points = db.query("cpu.usage", 0, u64::MAX, &TagMap::new());
//!     println!("{} points", points.len());
//!
//!     db.close()?;
//!     Ok(())
//! }
//! ```

pub mod chunk;
pub mod chunk_store;
pub mod codec;
pub mod engine;
pub mod error;
pub mod ingress;
pub mod types;
pub mod wal;

pub use chunk::{Chunk, CHUNK_CAPACITY, MAX_TAGS_PER_POINT, MAX_TAG_STR_LEN};
pub use chunk_store::ChunkStore;
pub use codec::{
    decode_timestamps, decode_values_rle, encode_timestamps, encode_values_rle,
    select_value_codec, EncodedColumns, TimestampCodec, ValueCodec,
};
pub use engine::{Database, DatabaseConfig, DatabaseStats, BRAND_DIR};
pub use error::{StorageError, StorageResult};
pub use ingress::IngressQueue;
pub use types::{TagMap, TimePoint, TimeSeries};
pub use wal::{WalSyncMode, WriteAheadLog};
