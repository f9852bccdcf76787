//! Bounded columnar chunk
//!
//! A chunk holds up to [`CHUNK_CAPACITY`] rows of one metric as parallel
//! columns `(timestamps, values, tags)` with inline min/max timestamp
//! bounds. Active chunks keep plain columns and accept appends in client
//! arrival order; when the engine seals a chunk it sorts it by timestamp and
//! re-encodes the numeric columns through the codec layer, so sealed chunks
//! sit compressed in memory and answer range queries by binary search.
//!
//! On-disk byte format (little-endian):
//!
//! ```text
//! u64 min_timestamp
//! u64 max_timestamp
//! u64 count
//! u64[count] timestamps
//! f64[count] values
//! repeat count times:
//!   u32 tag_count
//!   repeat tag_count times:
//!     u32 key_len;   key_len bytes    (key_len <= 256)
//!     u32 value_len; value_len bytes  (value_len <= 256)
//! ```

use crate::storage::codec::{read_f64, read_u32, read_u64, EncodedColumns};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::TagMap;
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

/// Maximum number of rows per chunk
pub const CHUNK_CAPACITY: usize = 1000;

/// Hard cap on tag key/value byte length; part of the file format contract
pub const MAX_TAG_STR_LEN: usize = 256;

/// Sanity cap on tags per point
pub const MAX_TAGS_PER_POINT: usize = 100;

/// Fixed header: min (8) + max (8) + count (8)
const CHUNK_HEADER_LEN: usize = 24;

/// Numeric columns, either plain (active chunks) or codec-packed (sealed)
#[derive(Debug, Clone)]
enum ColumnData {
    Plain {
        timestamps: Vec<u64>,
        values: Vec<f64>,
    },
    Packed(EncodedColumns),
}

/// A bounded columnar block of one metric's rows
#[derive(Debug, Clone)]
pub struct Chunk {
    columns: ColumnData,
    tags: Vec<TagMap>,
    min_timestamp: u64,
    max_timestamp: u64,
    count: usize,
    sorted: bool,
}

impl Default for Chunk {
    fn default() -> Self {
        Self::new()
    }
}

impl Chunk {
    /// Create an empty chunk
    pub fn new() -> Self {
        Self {
            columns: ColumnData::Plain {
                timestamps: Vec::with_capacity(CHUNK_CAPACITY),
                values: Vec::with_capacity(CHUNK_CAPACITY),
            },
            tags: Vec::with_capacity(CHUNK_CAPACITY),
            min_timestamp: u64::MAX,
            max_timestamp: 0,
            count: 0,
            sorted: true,
        }
    }

    /// Append a row.
    ///
    /// Fails with [`StorageError::ChunkFull`] at capacity or once the chunk
    /// has been packed by [`Chunk::compress`].
    pub fn append(&mut self, timestamp: u64, value: f64, tags: TagMap) -> StorageResult<()> {
        if !self.can_append() {
            return Err(StorageError::ChunkFull);
        }

        match &mut self.columns {
            ColumnData::Plain { timestamps, values } => {
                if let Some(&last) = timestamps.last() {
                    if timestamp < last {
                        self.sorted = false;
                    }
                }
                timestamps.push(timestamp);
                values.push(value);
            }
            ColumnData::Packed(_) => return Err(StorageError::ChunkFull),
        }

        self.tags.push(tags);
        self.min_timestamp = self.min_timestamp.min(timestamp);
        self.max_timestamp = self.max_timestamp.max(timestamp);
        self.count += 1;

        Ok(())
    }

    /// Whether another row fits
    pub fn can_append(&self) -> bool {
        matches!(self.columns, ColumnData::Plain { .. }) && self.count < CHUNK_CAPACITY
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the chunk holds no rows
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Smallest timestamp held, `u64::MAX` while empty
    pub fn min_timestamp(&self) -> u64 {
        self.min_timestamp
    }

    /// Largest timestamp held, `0` while empty
    pub fn max_timestamp(&self) -> u64 {
        self.max_timestamp
    }

    /// Whether `[start, end]` intersects this chunk's timestamp bounds
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        self.count > 0 && self.min_timestamp <= end && self.max_timestamp >= start
    }

    /// Timestamp column; decodes packed chunks on the fly
    pub fn timestamps(&self) -> Cow<'_, [u64]> {
        match &self.columns {
            ColumnData::Plain { timestamps, .. } => Cow::Borrowed(timestamps),
            ColumnData::Packed(encoded) => match encoded.decode_timestamps() {
                Ok(ts) => Cow::Owned(ts),
                Err(e) => {
                    tracing::error!("failed to decode packed timestamp column: {}", e);
                    Cow::Owned(Vec::new())
                }
            },
        }
    }

    /// Value column; decodes packed chunks on the fly
    pub fn values(&self) -> Cow<'_, [f64]> {
        match &self.columns {
            ColumnData::Plain { values, .. } => Cow::Borrowed(values),
            ColumnData::Packed(encoded) => match encoded.decode_values() {
                Ok(vals) => Cow::Owned(vals),
                Err(e) => {
                    tracing::error!("failed to decode packed value column: {}", e);
                    Cow::Owned(Vec::new())
                }
            },
        }
    }

    /// Per-row tag maps
    pub fn tags(&self) -> &[TagMap] {
        &self.tags
    }

    /// Indices of rows with `start <= timestamp <= end`, in row order.
    /// Inclusive on both ends. Sorted chunks binary-search; unsorted chunks
    /// scan linearly.
    pub fn query_time_range(&self, start: u64, end: u64) -> Vec<usize> {
        let timestamps = self.timestamps();

        if self.sorted {
            let lower = timestamps.partition_point(|&t| t < start);
            let upper = timestamps.partition_point(|&t| t <= end);
            (lower..upper).collect()
        } else {
            timestamps
                .iter()
                .enumerate()
                .filter(|(_, &t)| t >= start && t <= end)
                .map(|(i, _)| i)
                .collect()
        }
    }

    /// Indices of rows whose tag map contains every `(key, value)` in
    /// `required`. An empty filter selects all rows.
    pub fn query_tags(&self, required: &TagMap) -> Vec<usize> {
        if required.is_empty() {
            return (0..self.count).collect();
        }

        self.tags
            .iter()
            .enumerate()
            .filter(|(_, tags)| {
                required
                    .iter()
                    .all(|(k, v)| tags.get(k).map(|val| val == v).unwrap_or(false))
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Sum of values with timestamps in `[start, end]`. Returns `0.0` for an
    /// empty range; callers that must distinguish "no rows" from "sum is
    /// zero" should query and fold the result set instead.
    pub fn sum(&self, start: u64, end: u64) -> f64 {
        let indices = self.query_time_range(start, end);
        if indices.is_empty() {
            return 0.0;
        }

        let values = self.values();
        indices.iter().map(|&i| values[i]).sum()
    }

    /// Mean of values in `[start, end]`; `0.0` for an empty range
    pub fn avg(&self, start: u64, end: u64) -> f64 {
        let indices = self.query_time_range(start, end);
        if indices.is_empty() {
            return 0.0;
        }

        let values = self.values();
        let total: f64 = indices.iter().map(|&i| values[i]).sum();
        total / indices.len() as f64
    }

    /// Minimum value in `[start, end]`; `0.0` for an empty range
    pub fn min(&self, start: u64, end: u64) -> f64 {
        let indices = self.query_time_range(start, end);
        if indices.is_empty() {
            return 0.0;
        }

        let values = self.values();
        indices.iter().map(|&i| values[i]).fold(f64::MAX, f64::min)
    }

    /// Maximum value in `[start, end]`; `0.0` for an empty range
    pub fn max(&self, start: u64, end: u64) -> f64 {
        let indices = self.query_time_range(start, end);
        if indices.is_empty() {
            return 0.0;
        }

        let values = self.values();
        indices.iter().map(|&i| values[i]).fold(f64::MIN, f64::max)
    }

    /// Number of rows with timestamps in `[start, end]`
    pub fn count_in_range(&self, start: u64, end: u64) -> usize {
        self.query_time_range(start, end).len()
    }

    /// Sort rows by timestamp (stable). Called by the engine when sealing so
    /// that sealed chunks answer range queries by binary search.
    pub fn sort_by_time(&mut self) {
        if self.sorted {
            return;
        }

        let (timestamps, values) = match &mut self.columns {
            ColumnData::Plain { timestamps, values } => (timestamps, values),
            ColumnData::Packed(_) => return,
        };

        let mut order: Vec<usize> = (0..timestamps.len()).collect();
        order.sort_by_key(|&i| timestamps[i]);

        let sorted_ts: Vec<u64> = order.iter().map(|&i| timestamps[i]).collect();
        let sorted_vals: Vec<f64> = order.iter().map(|&i| values[i]).collect();
        let mut old_tags = std::mem::take(&mut self.tags);
        let mut sorted_tags = Vec::with_capacity(old_tags.len());
        for &i in &order {
            sorted_tags.push(std::mem::take(&mut old_tags[i]));
        }

        *timestamps = sorted_ts;
        *values = sorted_vals;
        self.tags = sorted_tags;
        self.sorted = true;
    }

    /// Re-encode the numeric columns through the codec layer, replacing the
    /// plain vectors. No-op when already packed or empty.
    pub fn compress(&mut self) {
        let (timestamps, values) = match &self.columns {
            ColumnData::Plain { timestamps, values } if self.count > 0 => (timestamps, values),
            _ => return,
        };

        let encoded = EncodedColumns::encode(timestamps, values);
        tracing::debug!(
            "packed chunk columns: {} rows, {} -> {} bytes",
            self.count,
            self.count * 16,
            encoded.encoded_len()
        );
        self.columns = ColumnData::Packed(encoded);
    }

    /// Restore plain columns from the packed form
    pub fn decompress(&mut self) -> StorageResult<()> {
        if let ColumnData::Packed(encoded) = &self.columns {
            let (timestamps, values) = encoded.decode()?;
            self.columns = ColumnData::Plain { timestamps, values };
        }
        Ok(())
    }

    /// Whether the numeric columns are codec-packed
    pub fn is_compressed(&self) -> bool {
        matches!(self.columns, ColumnData::Packed(_))
    }

    /// Distinct values per tag key across all rows, for index registration
    pub fn tag_values(&self) -> HashMap<String, HashSet<String>> {
        let mut out: HashMap<String, HashSet<String>> = HashMap::new();
        for tags in &self.tags {
            for (k, v) in tags {
                out.entry(k.clone()).or_default().insert(v.clone());
            }
        }
        out
    }

    /// Serialize to the on-disk byte format
    pub fn serialize(&self) -> Vec<u8> {
        let timestamps = self.timestamps();
        let values = self.values();

        let tag_bytes: usize = self
            .tags
            .iter()
            .map(|m| 4 + m.iter().map(|(k, v)| 8 + k.len() + v.len()).sum::<usize>())
            .sum();
        let mut buffer = Vec::with_capacity(CHUNK_HEADER_LEN + self.count * 16 + tag_bytes);

        buffer.extend_from_slice(&self.min_timestamp.to_le_bytes());
        buffer.extend_from_slice(&self.max_timestamp.to_le_bytes());
        buffer.extend_from_slice(&(self.count as u64).to_le_bytes());

        for ts in timestamps.iter() {
            buffer.extend_from_slice(&ts.to_le_bytes());
        }
        for value in values.iter() {
            buffer.extend_from_slice(&value.to_le_bytes());
        }

        for tags in &self.tags {
            buffer.extend_from_slice(&(tags.len() as u32).to_le_bytes());
            for (key, value) in tags {
                buffer.extend_from_slice(&(key.len() as u32).to_le_bytes());
                buffer.extend_from_slice(key.as_bytes());
                buffer.extend_from_slice(&(value.len() as u32).to_le_bytes());
                buffer.extend_from_slice(value.as_bytes());
            }
        }

        buffer
    }

    /// Parse a chunk from the on-disk byte format.
    ///
    /// Fails with [`StorageError::Corruption`] when any declared length
    /// would read past the end, `count` exceeds [`CHUNK_CAPACITY`], or a
    /// tag key/value exceeds [`MAX_TAG_STR_LEN`].
    pub fn deserialize(data: &[u8]) -> StorageResult<Self> {
        if data.len() < CHUNK_HEADER_LEN {
            return Err(StorageError::Corruption(
                "chunk data too small for header".into(),
            ));
        }

        let min_timestamp = read_u64(data, 0);
        let max_timestamp = read_u64(data, 8);
        let count = read_u64(data, 16) as usize;

        if count > CHUNK_CAPACITY {
            return Err(StorageError::Corruption(format!(
                "chunk count {} exceeds capacity {}",
                count, CHUNK_CAPACITY
            )));
        }

        let mut offset = CHUNK_HEADER_LEN;
        let columns_len = count
            .checked_mul(16)
            .ok_or_else(|| StorageError::Corruption("chunk column size overflow".into()))?;
        if data.len() < offset + columns_len {
            return Err(StorageError::Corruption(
                "chunk data too small for columns".into(),
            ));
        }

        let mut timestamps = Vec::with_capacity(count);
        for i in 0..count {
            timestamps.push(read_u64(data, offset + i * 8));
        }
        offset += count * 8;

        let mut values = Vec::with_capacity(count);
        for i in 0..count {
            values.push(read_f64(data, offset + i * 8));
        }
        offset += count * 8;

        let mut tags = Vec::with_capacity(count);
        for _ in 0..count {
            if data.len() < offset + 4 {
                return Err(StorageError::Corruption(
                    "chunk data too small for tag count".into(),
                ));
            }
            let tag_count = read_u32(data, offset) as usize;
            offset += 4;

            if tag_count > MAX_TAGS_PER_POINT {
                return Err(StorageError::Corruption(format!(
                    "chunk row declares {} tags",
                    tag_count
                )));
            }

            let mut map = TagMap::with_capacity(tag_count);
            for _ in 0..tag_count {
                let key = read_tag_str(data, &mut offset)?;
                let value = read_tag_str(data, &mut offset)?;
                map.insert(key, value);
            }
            tags.push(map);
        }

        if offset != data.len() {
            return Err(StorageError::Corruption(
                "chunk data has trailing bytes".into(),
            ));
        }

        let sorted = timestamps.windows(2).all(|w| w[0] <= w[1]);

        Ok(Self {
            columns: ColumnData::Plain { timestamps, values },
            tags,
            min_timestamp,
            max_timestamp,
            count,
            sorted,
        })
    }
}

fn read_tag_str(data: &[u8], offset: &mut usize) -> StorageResult<String> {
    if data.len() < *offset + 4 {
        return Err(StorageError::Corruption(
            "chunk data too small for tag length".into(),
        ));
    }
    let len = read_u32(data, *offset) as usize;
    *offset += 4;

    if len > MAX_TAG_STR_LEN {
        return Err(StorageError::Corruption(format!(
            "tag string length {} exceeds cap {}",
            len, MAX_TAG_STR_LEN
        )));
    }
    if data.len() < *offset + len {
        return Err(StorageError::Corruption(
            "chunk data too small for tag string".into(),
        ));
    }

    let s = std::str::from_utf8(&data[*offset..*offset + len])
        .map_err(|_| StorageError::Corruption("tag string is not valid UTF-8".into()))?
        .to_string();
    *offset += len;
    Ok(s)
}
