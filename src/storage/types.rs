//! Core data types for the WaffleDB storage engine
//!
//! - `TimePoint`: a single tagged sample
//! - `TimeSeries`: the columnar view of one metric's points
//! - `TagMap`: tag key/value mapping with subset-equality matching

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tag key/value mapping attached to a point. Unordered, equality-compared.
pub type TagMap = HashMap<String, String>;

/// A single time-series sample
///
/// Timestamps are opaque monotonically comparable integers; the engine never
/// interprets their unit. The CLI and the textual query layer assume seconds
/// since the Unix epoch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimePoint {
    /// Timestamp in caller-chosen units (seconds by convention)
    pub timestamp: u64,
    /// The measured value
    pub value: f64,
    /// Metric this point belongs to (e.g. "cpu.usage")
    pub metric: String,
    /// Optional tags for filtering
    #[serde(default)]
    pub tags: TagMap,
}

impl TimePoint {
    /// Create a point with no tags
    pub fn new(metric: impl Into<String>, timestamp: u64, value: f64) -> Self {
        Self {
            timestamp,
            value,
            metric: metric.into(),
            tags: TagMap::new(),
        }
    }

    /// Builder method: add a tag
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Builder method: replace the tag map
    pub fn tags(mut self, tags: TagMap) -> Self {
        self.tags = tags;
        self
    }

    /// Check if this point carries a specific tag value
    pub fn has_tag(&self, key: &str, value: &str) -> bool {
        self.tags.get(key).map(|v| v == value).unwrap_or(false)
    }

    /// Subset-equality tag match: every `(key, value)` in `required` must be
    /// present in this point's tags. An empty filter matches everything.
    pub fn matches_tags(&self, required: &TagMap) -> bool {
        required
            .iter()
            .all(|(k, v)| self.tags.get(k).map(|val| val == v).unwrap_or(false))
    }
}

/// Columnar view of one metric's points, as produced by export paths
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Metric name
    pub metric: String,
    /// Timestamps, parallel to `values`
    pub timestamps: Vec<u64>,
    /// Values, parallel to `timestamps`
    pub values: Vec<f64>,
    /// Tags shared by the series (as selected by the query filter)
    pub tags: TagMap,
}

impl TimeSeries {
    /// Build a series from query results for one metric
    pub fn from_points(metric: impl Into<String>, points: &[TimePoint]) -> Self {
        Self {
            metric: metric.into(),
            timestamps: points.iter().map(|p| p.timestamp).collect(),
            values: points.iter().map(|p| p.value).collect(),
            tags: TagMap::new(),
        }
    }

    /// Number of points in the series
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Check if the series is empty
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}
