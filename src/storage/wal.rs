//! Write-ahead log
//!
//! Append-only binary log that makes a write durable before it reaches a
//! chunk. Every record is length-framed so recovery can walk the file
//! forward and stop cleanly at the first torn or invalid entry.
//!
//! Record layout (little-endian):
//!
//! ```text
//! u32 entry_size      (bytes following this field)
//! u64 sequence
//! u64 timestamp
//! f64 value
//! u32 metric_len; metric_len bytes
//! u32 tag_count
//! repeat tag_count times:
//!   u32 key_len;   key_len bytes
//!   u32 value_len; value_len bytes
//! ```
//!
//! Every append flushes to the OS; `WalSyncMode` controls how often the file
//! is additionally fsynced. The engine serializes all WAL access through a
//! single mutex; recovery runs before any writer starts.

use crate::storage::chunk::{MAX_TAGS_PER_POINT, MAX_TAG_STR_LEN};
use crate::storage::codec::{read_f64, read_u32, read_u64};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{TagMap, TimePoint};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Hard cap on the metric name length in a WAL record
const MAX_METRIC_LEN: usize = 1024;

/// Fsync strategy for WAL writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalSyncMode {
    /// Fsync after every append (safest, slowest)
    EveryWrite,
    /// Fsync once per 64 KiB of appended data
    #[default]
    Batched,
    /// Flush to the OS only, never fsync
    None,
}

/// Append-only write-ahead log with monotonic sequence numbers
pub struct WriteAheadLog {
    writer: BufWriter<File>,
    path: PathBuf,
    next_sequence: u64,
    entry_count: u64,
    bytes_since_sync: usize,
    sync_mode: WalSyncMode,
    sync_threshold: usize,
}

impl WriteAheadLog {
    /// Open or create the log file at `path`
    pub fn open(path: impl AsRef<Path>, sync_mode: WalSyncMode) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            writer: BufWriter::new(file),
            path,
            next_sequence: 0,
            entry_count: 0,
            bytes_since_sync: 0,
            sync_mode,
            sync_threshold: 64 * 1024,
        })
    }

    /// Append one point: assign the next sequence number, write, flush
    pub fn append(&mut self, point: &TimePoint) -> StorageResult<()> {
        self.write_entry(point)?;
        self.writer.flush()?;
        self.maybe_sync()
    }

    /// Append a batch under one flush
    pub fn append_batch(&mut self, points: &[TimePoint]) -> StorageResult<()> {
        for point in points {
            self.write_entry(point)?;
        }
        self.writer.flush()?;
        self.maybe_sync()
    }

    fn write_entry(&mut self, point: &TimePoint) -> StorageResult<()> {
        let sequence = self.next_sequence;

        let mut payload = Vec::with_capacity(64 + point.metric.len());
        payload.extend_from_slice(&sequence.to_le_bytes());
        payload.extend_from_slice(&point.timestamp.to_le_bytes());
        payload.extend_from_slice(&point.value.to_le_bytes());
        payload.extend_from_slice(&(point.metric.len() as u32).to_le_bytes());
        payload.extend_from_slice(point.metric.as_bytes());
        payload.extend_from_slice(&(point.tags.len() as u32).to_le_bytes());
        for (key, value) in &point.tags {
            payload.extend_from_slice(&(key.len() as u32).to_le_bytes());
            payload.extend_from_slice(key.as_bytes());
            payload.extend_from_slice(&(value.len() as u32).to_le_bytes());
            payload.extend_from_slice(value.as_bytes());
        }

        self.writer
            .write_all(&(payload.len() as u32).to_le_bytes())?;
        self.writer.write_all(&payload)?;

        self.next_sequence += 1;
        self.entry_count += 1;
        self.bytes_since_sync += 4 + payload.len();
        Ok(())
    }

    fn maybe_sync(&mut self) -> StorageResult<()> {
        match self.sync_mode {
            WalSyncMode::EveryWrite => self.sync(),
            WalSyncMode::Batched => {
                if self.bytes_since_sync >= self.sync_threshold {
                    self.sync()
                } else {
                    Ok(())
                }
            }
            WalSyncMode::None => Ok(()),
        }
    }

    /// Flush buffered writes to the OS; no truncation
    pub fn checkpoint(&mut self) -> StorageResult<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and fsync
    pub fn sync(&mut self) -> StorageResult<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.bytes_since_sync = 0;
        Ok(())
    }

    /// Replay the log in order.
    ///
    /// The whole file is read into memory and parsed forward. Any invalid
    /// entry size or internal length violation truncates the replay at that
    /// point: the valid prefix is returned and the remainder is assumed
    /// torn. Sets the next sequence number past the maximum observed.
    pub fn recover(&mut self) -> StorageResult<Vec<TimePoint>> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut points = Vec::new();
        let mut max_sequence = 0u64;
        let mut offset = 0usize;

        while offset < data.len() {
            if offset + 4 > data.len() {
                tracing::warn!("WAL: incomplete entry size at offset {}", offset);
                break;
            }
            let entry_size = read_u32(&data, offset) as usize;
            offset += 4;

            if entry_size == 0 || offset + entry_size > data.len() {
                tracing::warn!("WAL: invalid entry size {} at offset {}", entry_size, offset);
                break;
            }

            match parse_entry(&data[offset..offset + entry_size]) {
                Ok((sequence, point)) => {
                    max_sequence = max_sequence.max(sequence);
                    points.push(point);
                    offset += entry_size;
                }
                Err(e) => {
                    tracing::warn!("WAL: failed to parse entry at offset {}: {}", offset, e);
                    break;
                }
            }
        }

        if !points.is_empty() {
            self.next_sequence = max_sequence + 1;
        }
        self.entry_count = points.len() as u64;

        Ok(points)
    }

    /// Truncate the log and reset the sequence counter
    pub fn clear(&mut self) -> StorageResult<()> {
        self.writer.flush()?;

        // Recreate empty, then reopen for appending
        let truncated = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        drop(truncated);

        self.writer = BufWriter::new(
            OpenOptions::new().create(true).append(true).open(&self.path)?,
        );
        self.next_sequence = 0;
        self.entry_count = 0;
        self.bytes_since_sync = 0;
        Ok(())
    }

    /// Entries appended since open (refreshed by `recover`/`clear`)
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Sequence number the next append will be assigned
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Size of the log file in bytes
    pub fn file_size(&self) -> StorageResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }
}

/// Parse one length-framed entry body
fn parse_entry(data: &[u8]) -> StorageResult<(u64, TimePoint)> {
    let mut offset = 0usize;

    let sequence = read_field_u64(data, &mut offset, "sequence")?;
    let timestamp = read_field_u64(data, &mut offset, "timestamp")?;

    if offset + 8 > data.len() {
        return Err(StorageError::Wal("entry too small for value".into()));
    }
    let value = read_f64(data, offset);
    offset += 8;

    let metric_len = read_field_u32(data, &mut offset, "metric length")? as usize;
    if metric_len > MAX_METRIC_LEN || offset + metric_len > data.len() {
        return Err(StorageError::Wal(format!(
            "invalid metric length {}",
            metric_len
        )));
    }
    let metric = std::str::from_utf8(&data[offset..offset + metric_len])
        .map_err(|_| StorageError::Wal("metric is not valid UTF-8".into()))?
        .to_string();
    offset += metric_len;

    let tag_count = read_field_u32(data, &mut offset, "tag count")? as usize;
    if tag_count > MAX_TAGS_PER_POINT {
        return Err(StorageError::Wal(format!("too many tags: {}", tag_count)));
    }

    let mut tags = TagMap::with_capacity(tag_count);
    for _ in 0..tag_count {
        let key = read_tag_field(data, &mut offset, "tag key")?;
        let value = read_tag_field(data, &mut offset, "tag value")?;
        tags.insert(key, value);
    }

    if offset != data.len() {
        return Err(StorageError::Wal("entry has trailing bytes".into()));
    }

    Ok((
        sequence,
        TimePoint {
            timestamp,
            value,
            metric,
            tags,
        },
    ))
}

fn read_field_u64(data: &[u8], offset: &mut usize, what: &str) -> StorageResult<u64> {
    if *offset + 8 > data.len() {
        return Err(StorageError::Wal(format!("entry too small for {}", what)));
    }
    let v = read_u64(data, *offset);
    *offset += 8;
    Ok(v)
}

fn read_field_u32(data: &[u8], offset: &mut usize, what: &str) -> StorageResult<u32> {
    if *offset + 4 > data.len() {
        return Err(StorageError::Wal(format!("entry too small for {}", what)));
    }
    let v = read_u32(data, *offset);
    *offset += 4;
    Ok(v)
}

fn read_tag_field(data: &[u8], offset: &mut usize, what: &str) -> StorageResult<String> {
    let len = read_field_u32(data, offset, what)? as usize;
    if len > MAX_TAG_STR_LEN || *offset + len > data.len() {
        return Err(StorageError::Wal(format!("invalid {} length {}", what, len)));
    }
    let s = std::str::from_utf8(&data[*offset..*offset + len])
        .map_err(|_| StorageError::Wal(format!("{} is not valid UTF-8", what)))?
        .to_string();
    *offset += len;
    Ok(s)
}
