//! CSV and JSON import/export
//!
//! Thin format conversion over the engine's write and query paths.
//!
//! CSV rows are `timestamp,value[,tags]` where `tags` is `key=value` pairs
//! joined with `;`. Timestamps may be numeric (seconds) or a handful of
//! common date formats. JSON import takes an array of points in the
//! [`TimePoint`] serde shape.

use crate::storage::{Database, StorageError, TagMap, TimePoint};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::path::Path;
use thiserror::Error;

/// Cap on recorded per-row error messages
const MAX_ROW_ERRORS: usize = 10;

/// Errors from import/export operations
#[derive(Error, Debug)]
pub enum InterchangeError {
    /// I/O failure on the source or destination file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV reading/writing failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON parsing failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Engine rejected the write
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Outcome of a CSV import
#[derive(Debug)]
pub struct CsvImportResult {
    /// Rows successfully turned into points
    pub rows_imported: usize,
    /// Rows skipped because they failed to parse
    pub rows_failed: usize,
    /// First few per-row error messages
    pub errors: Vec<String>,
}

/// Import `timestamp,value[,tags]` rows from a CSV file as points of one
/// metric. Unparsable rows are skipped and counted, not fatal.
pub fn import_csv(
    db: &Database,
    path: impl AsRef<Path>,
    metric: &str,
) -> Result<CsvImportResult, InterchangeError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path.as_ref())?;

    let mut points = Vec::new();
    let mut rows_failed = 0;
    let mut errors = Vec::new();

    for (row_idx, record) in reader.records().enumerate() {
        let record = record?;
        let line = row_idx + 1;

        // Tolerate a header row in front
        if row_idx == 0 && record.get(0).map(|f| parse_timestamp(f).is_none()).unwrap_or(true) {
            continue;
        }

        match parse_row(&record, metric) {
            Ok(point) => points.push(point),
            Err(message) => {
                rows_failed += 1;
                if errors.len() < MAX_ROW_ERRORS {
                    errors.push(format!("line {}: {}", line, message));
                }
            }
        }
    }

    let rows_imported = points.len();
    db.write_batch(points)?;

    Ok(CsvImportResult {
        rows_imported,
        rows_failed,
        errors,
    })
}

fn parse_row(record: &csv::StringRecord, metric: &str) -> Result<TimePoint, String> {
    let ts_field = record.get(0).ok_or("missing timestamp column")?;
    let value_field = record.get(1).ok_or("missing value column")?;

    let timestamp =
        parse_timestamp(ts_field).ok_or_else(|| format!("bad timestamp '{}'", ts_field))?;
    let value: f64 = value_field
        .trim()
        .parse()
        .map_err(|_| format!("bad value '{}'", value_field))?;

    let tags = record.get(2).map(parse_tag_list).unwrap_or_default();

    Ok(TimePoint {
        timestamp,
        value,
        metric: metric.to_string(),
        tags,
    })
}

/// Parse a timestamp field: raw seconds, RFC 3339, or common date formats
fn parse_timestamp(s: &str) -> Option<u64> {
    let s = s.trim();

    if let Ok(ts) = s.parse::<u64>() {
        return Some(ts);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return u64::try_from(dt.timestamp()).ok();
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return u64::try_from(dt.and_utc().timestamp()).ok();
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let dt = date.and_hms_opt(0, 0, 0)?;
        return u64::try_from(dt.and_utc().timestamp()).ok();
    }

    None
}

/// Parse `key=value;key=value` into a tag map
fn parse_tag_list(s: &str) -> TagMap {
    s.split(';')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            if key.is_empty() {
                return None;
            }
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn format_tag_list(tags: &TagMap) -> String {
    let mut pairs: Vec<String> = tags.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    pairs.sort();
    pairs.join(";")
}

/// Import a JSON array of points. Returns the number imported.
pub fn import_json(db: &Database, path: impl AsRef<Path>) -> Result<usize, InterchangeError> {
    let file = std::fs::File::open(path.as_ref())?;
    let points: Vec<TimePoint> = serde_json::from_reader(std::io::BufReader::new(file))?;
    let count = points.len();
    db.write_batch(points)?;
    Ok(count)
}

/// Export one metric's points in `[start, end]` as CSV. Returns the number
/// of rows written.
pub fn export_csv(
    db: &Database,
    path: impl AsRef<Path>,
    metric: &str,
    start: u64,
    end: u64,
) -> Result<usize, InterchangeError> {
    let points = db.query(metric, start, end, &TagMap::new());

    let mut writer = csv::Writer::from_path(path.as_ref())?;
    writer.write_record(["timestamp", "value", "tags"])?;
    for point in &points {
        writer.write_record([
            point.timestamp.to_string(),
            point.value.to_string(),
            format_tag_list(&point.tags),
        ])?;
    }
    writer.flush()?;

    Ok(points.len())
}
