//! Column codecs for chunk sealing
//!
//! Two stateless, invertible compressors plus the policy that picks between
//! them:
//!
//! - Delta encoding for timestamps: first value verbatim, then differences
//!   at the narrowest signed width that fits.
//! - Run-length encoding for values: `(run_len, value)` pairs over bit-exact
//!   equal runs.
//!
//! Every encoded block is self-describing through [`EncodedColumns`], so the
//! selection policy can change without breaking readers.
//!
//! Encoded layouts (all little-endian):
//!
//! ```text
//! timestamps: first u64 | n u64 | bytes_per_delta u8 | (n-1) deltas
//! rle values: n u64 | repeat (run_len u16, value f64)
//! ```

use crate::storage::error::{StorageError, StorageResult};

/// Codec applied to the timestamp column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampCodec {
    /// Delta encoding with adaptive width
    Delta,
}

/// Codec applied to the value column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueCodec {
    /// Raw little-endian f64 column
    Plain,
    /// Run-length encoded
    Rle,
}

/// Header size of a non-empty delta-encoded timestamp block:
/// first (8) + count (8) + width (1).
const DELTA_HEADER_LEN: usize = 17;

pub(crate) fn read_u16(data: &[u8], offset: usize) -> u16 {
    let mut buf = [0u8; 2];
    buf.copy_from_slice(&data[offset..offset + 2]);
    u16::from_le_bytes(buf)
}

pub(crate) fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

pub(crate) fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

pub(crate) fn read_f64(data: &[u8], offset: usize) -> f64 {
    f64::from_bits(read_u64(data, offset))
}

/// Encode a timestamp column with delta encoding.
///
/// An empty input encodes to an empty byte string.
pub fn encode_timestamps(timestamps: &[u64]) -> Vec<u8> {
    if timestamps.is_empty() {
        return Vec::new();
    }

    let deltas: Vec<i64> = timestamps
        .windows(2)
        .map(|w| w[1].wrapping_sub(w[0]) as i64)
        .collect();

    let max_delta = deltas.iter().map(|d| d.unsigned_abs()).max().unwrap_or(0);
    let bytes_per_delta: u8 = if max_delta <= i8::MAX as u64 {
        1
    } else if max_delta <= i16::MAX as u64 {
        2
    } else if max_delta <= i32::MAX as u64 {
        4
    } else {
        8
    };

    let mut out = Vec::with_capacity(DELTA_HEADER_LEN + deltas.len() * bytes_per_delta as usize);
    out.extend_from_slice(&timestamps[0].to_le_bytes());
    out.extend_from_slice(&(timestamps.len() as u64).to_le_bytes());
    out.push(bytes_per_delta);

    for delta in deltas {
        match bytes_per_delta {
            1 => out.extend_from_slice(&(delta as i8).to_le_bytes()),
            2 => out.extend_from_slice(&(delta as i16).to_le_bytes()),
            4 => out.extend_from_slice(&(delta as i32).to_le_bytes()),
            _ => out.extend_from_slice(&delta.to_le_bytes()),
        }
    }

    out
}

/// Decode a delta-encoded timestamp column.
pub fn decode_timestamps(data: &[u8]) -> StorageResult<Vec<u64>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    if data.len() < DELTA_HEADER_LEN {
        return Err(StorageError::Corruption(
            "timestamp block too small for header".into(),
        ));
    }

    let first = read_u64(data, 0);
    let count = read_u64(data, 8);
    let width = data[16] as usize;

    if !matches!(width, 1 | 2 | 4 | 8) {
        return Err(StorageError::Corruption(format!(
            "invalid delta width: {}",
            width
        )));
    }
    if count == 0 {
        return Err(StorageError::Corruption(
            "timestamp block declares zero count".into(),
        ));
    }

    let expected = (count - 1)
        .checked_mul(width as u64)
        .and_then(|n| n.checked_add(DELTA_HEADER_LEN as u64));
    if expected != Some(data.len() as u64) {
        return Err(StorageError::Corruption(format!(
            "timestamp block length mismatch: declared {} deltas at width {}, got {} bytes",
            count - 1,
            width,
            data.len()
        )));
    }

    let mut out = Vec::with_capacity(count as usize);
    out.push(first);

    let mut current = first;
    let mut offset = DELTA_HEADER_LEN;
    for _ in 1..count {
        let delta = match width {
            1 => data[offset] as i8 as i64,
            2 => read_u16(data, offset) as i16 as i64,
            4 => read_u32(data, offset) as i32 as i64,
            _ => read_u64(data, offset) as i64,
        };
        current = current.wrapping_add(delta as u64);
        out.push(current);
        offset += width;
    }

    Ok(out)
}

/// Encode a value column with run-length encoding.
///
/// Runs compare bit-exact and cap at `u16::MAX`. An empty input encodes to
/// an empty byte string.
pub fn encode_values_rle(values: &[f64]) -> Vec<u8> {
    if values.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();
    out.extend_from_slice(&(values.len() as u64).to_le_bytes());

    let mut i = 0;
    while i < values.len() {
        let value = values[i];
        let mut run = 1usize;
        while i + run < values.len()
            && values[i + run].to_bits() == value.to_bits()
            && run < u16::MAX as usize
        {
            run += 1;
        }

        out.extend_from_slice(&(run as u16).to_le_bytes());
        out.extend_from_slice(&value.to_le_bytes());
        i += run;
    }

    out
}

/// Decode a run-length encoded value column.
pub fn decode_values_rle(data: &[u8]) -> StorageResult<Vec<f64>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    if data.len() < 8 {
        return Err(StorageError::Corruption(
            "RLE block too small for header".into(),
        ));
    }

    let count = read_u64(data, 0) as usize;
    let mut out = Vec::with_capacity(count.min(1 << 20));

    let mut offset = 8;
    while out.len() < count {
        if offset + 10 > data.len() {
            return Err(StorageError::Corruption(format!(
                "RLE block truncated: declared {} values, decoded {}",
                count,
                out.len()
            )));
        }

        let run = read_u16(data, offset);
        let value = read_f64(data, offset + 2);
        offset += 10;

        if run == 0 || out.len() + run as usize > count {
            return Err(StorageError::Corruption(format!(
                "RLE run of {} exceeds declared count {}",
                run, count
            )));
        }

        out.extend(std::iter::repeat(value).take(run as usize));
    }

    if offset != data.len() {
        return Err(StorageError::Corruption(
            "RLE block has trailing bytes".into(),
        ));
    }

    Ok(out)
}

/// Pick a codec for a value column.
///
/// RLE pays off when the column has few distinct values or long runs of
/// identical ones; otherwise the column stays plain. Advisory only: the
/// encoded block records which codec was used.
pub fn select_value_codec(values: &[f64]) -> ValueCodec {
    if values.len() < 10 {
        return ValueCodec::Plain;
    }

    let unique: std::collections::HashSet<u64> = values.iter().map(|v| v.to_bits()).collect();
    if unique.len() < values.len() / 10 {
        return ValueCodec::Rle;
    }

    let mut run_total = 0usize;
    let mut i = 0;
    while i < values.len() {
        let mut run = 1;
        while i + run < values.len() && values[i + run].to_bits() == values[i].to_bits() {
            run += 1;
        }
        if run > 1 {
            run_total += run;
        }
        i += run;
    }

    if run_total > values.len() / 2 {
        ValueCodec::Rle
    } else {
        ValueCodec::Plain
    }
}

fn encode_values_plain(values: &[f64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 8);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn decode_values_plain(data: &[u8]) -> StorageResult<Vec<f64>> {
    if data.len() % 8 != 0 {
        return Err(StorageError::Corruption(
            "plain value block length not a multiple of 8".into(),
        ));
    }
    Ok((0..data.len() / 8).map(|i| read_f64(data, i * 8)).collect())
}

/// A pair of encoded columns, tagged with the codecs that produced them
#[derive(Debug, Clone)]
pub struct EncodedColumns {
    /// Codec used for the timestamp column
    pub timestamp_codec: TimestampCodec,
    /// Codec used for the value column
    pub value_codec: ValueCodec,
    /// Encoded timestamp bytes
    pub timestamps: Vec<u8>,
    /// Encoded value bytes
    pub values: Vec<u8>,
}

impl EncodedColumns {
    /// Encode a chunk's columns, picking the value codec by policy
    pub fn encode(timestamps: &[u64], values: &[f64]) -> Self {
        let value_codec = select_value_codec(values);
        let encoded_values = match value_codec {
            ValueCodec::Rle => encode_values_rle(values),
            ValueCodec::Plain => encode_values_plain(values),
        };

        Self {
            timestamp_codec: TimestampCodec::Delta,
            value_codec,
            timestamps: encode_timestamps(timestamps),
            values: encoded_values,
        }
    }

    /// Decode back into raw columns
    pub fn decode(&self) -> StorageResult<(Vec<u64>, Vec<f64>)> {
        let timestamps = match self.timestamp_codec {
            TimestampCodec::Delta => decode_timestamps(&self.timestamps)?,
        };
        let values = match self.value_codec {
            ValueCodec::Rle => decode_values_rle(&self.values)?,
            ValueCodec::Plain => decode_values_plain(&self.values)?,
        };

        if timestamps.len() != values.len() {
            return Err(StorageError::Corruption(format!(
                "column length mismatch: {} timestamps, {} values",
                timestamps.len(),
                values.len()
            )));
        }

        Ok((timestamps, values))
    }

    /// Decode only the timestamp column
    pub fn decode_timestamps(&self) -> StorageResult<Vec<u64>> {
        match self.timestamp_codec {
            TimestampCodec::Delta => decode_timestamps(&self.timestamps),
        }
    }

    /// Decode only the value column
    pub fn decode_values(&self) -> StorageResult<Vec<f64>> {
        match self.value_codec {
            ValueCodec::Rle => decode_values_rle(&self.values),
            ValueCodec::Plain => decode_values_plain(&self.values),
        }
    }

    /// Total encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        self.timestamps.len() + self.values.len()
    }
}
