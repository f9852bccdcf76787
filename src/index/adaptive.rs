//! Adaptive chunk index
//!
//! Tracks every sealed chunk's metric, time bounds and tag value sets so
//! queries can prune to candidate chunk IDs without touching chunk data.
//! Query patterns are counted as they arrive; `optimize` re-sorts the entry
//! list by metric and start time and runs automatically every
//! [`OPTIMIZE_INTERVAL`] lookups. Re-clustering beyond that re-sort is out
//! of scope.

use crate::storage::types::TagMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

/// Lookups between automatic `optimize` runs
const OPTIMIZE_INTERVAL: usize = 1000;

#[derive(Debug, Clone)]
struct IndexEntry {
    metric: String,
    chunk_id: usize,
    min_time: u64,
    max_time: u64,
    tag_index: HashMap<String, HashSet<String>>,
}

#[derive(Debug, Default)]
struct IndexState {
    entries: Vec<IndexEntry>,
    query_patterns: HashMap<String, usize>,
    query_count: usize,
}

/// Index over sealed chunks with query-pattern accounting
#[derive(Debug, Default)]
pub struct AdaptiveIndex {
    state: Mutex<IndexState>,
}

impl AdaptiveIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sealed chunk
    pub fn add_chunk(
        &self,
        metric: &str,
        chunk_id: usize,
        min_time: u64,
        max_time: u64,
        tag_index: HashMap<String, HashSet<String>>,
    ) {
        let mut state = self.state.lock();
        state.entries.push(IndexEntry {
            metric: metric.to_string(),
            chunk_id,
            min_time,
            max_time,
            tag_index,
        });
    }

    /// Candidate chunk IDs for a metric, time range and tag filter.
    ///
    /// A chunk survives when its time bounds intersect `[start, end]` and,
    /// for every required tag, the chunk saw that exact value. Records the
    /// query pattern as a side effect.
    pub fn find_chunks(&self, metric: &str, start: u64, end: u64, tags: &TagMap) -> Vec<usize> {
        let mut state = self.state.lock();

        let pattern = Self::pattern(metric, tags);
        *state.query_patterns.entry(pattern).or_insert(0) += 1;
        state.query_count += 1;

        let result: Vec<usize> = state
            .entries
            .iter()
            .filter(|entry| {
                entry.metric == metric
                    && entry.min_time <= end
                    && entry.max_time >= start
                    && tags.iter().all(|(k, v)| {
                        entry
                            .tag_index
                            .get(k)
                            .map(|values| values.contains(v))
                            .unwrap_or(false)
                    })
            })
            .map(|entry| entry.chunk_id)
            .collect();

        if state.query_count % OPTIMIZE_INTERVAL == 0 {
            Self::optimize_locked(&mut state);
        }

        result
    }

    /// Count a query pattern without running a lookup
    pub fn record_query(&self, pattern: &str) {
        let mut state = self.state.lock();
        *state.query_patterns.entry(pattern.to_string()).or_insert(0) += 1;
    }

    /// Re-sort entries by metric and start time
    pub fn optimize(&self) {
        let mut state = self.state.lock();
        Self::optimize_locked(&mut state);
    }

    fn optimize_locked(state: &mut IndexState) {
        state
            .entries
            .sort_by(|a, b| a.metric.cmp(&b.metric).then(a.min_time.cmp(&b.min_time)));
    }

    /// Drop all entries for one metric
    pub fn remove_metric(&self, metric: &str) {
        let mut state = self.state.lock();
        state.entries.retain(|entry| entry.metric != metric);
    }

    /// Drop everything, including pattern counts
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.query_patterns.clear();
        state.query_count = 0;
    }

    /// Number of indexed chunks
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether the index holds no entries
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    fn pattern(metric: &str, tags: &TagMap) -> String {
        let mut pattern = metric.to_string();
        let mut pairs: Vec<_> = tags.iter().collect();
        pairs.sort();
        for (key, value) in pairs {
            pattern.push_str(&format!(":{}={}", key, value));
        }
        pattern
    }
}
