//! WaffleDB storage engine
//!
//! The engine orchestrates the full write and read paths:
//!
//! - Write path: `TimePoint` → WAL (durability) → ingress queue → background
//!   flusher → per-metric active chunk → sealed chunk file on disk.
//! - Read path: query → adaptive index pruning → active + sealed chunks →
//!   merged, time-sorted results.
//!
//! One background flusher thread drains the ingress queue every flush
//! interval (100 ms by default), so a write becomes visible to queries
//! within at most one interval. Queries and the flusher serialize on the
//! chunks mutex and therefore always observe a consistent chunk set.
//!
//! Durability rules: a successful `write` means the point is in the WAL. On
//! re-open the WAL is replayed only when no chunk data survives on disk;
//! otherwise it is cleared, because clean shutdown always seals every
//! buffered point into chunks before clearing the log.

use crate::index::AdaptiveIndex;
use crate::storage::chunk::Chunk;
use crate::storage::chunk_store::ChunkStore;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::ingress::IngressQueue;
use crate::storage::types::{TagMap, TimePoint, TimeSeries};
use crate::storage::wal::{WalSyncMode, WriteAheadLog};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Directory under the current working directory that holds all databases
pub const BRAND_DIR: &str = ".waffledb";

const METADATA_FILE: &str = "metadata.txt";
const WAL_FILE: &str = "wal.log";

/// Engine configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Directory databases live under; each database is `<base_dir>/<name>`
    pub base_dir: PathBuf,
    /// How often the background flusher drains the ingress queue
    pub flush_interval: Duration,
    /// WAL fsync strategy
    pub wal_sync: WalSyncMode,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(BRAND_DIR),
            flush_interval: Duration::from_millis(100),
            wal_sync: WalSyncMode::default(),
        }
    }
}

/// Per-metric chunk state, guarded by the chunks mutex
#[derive(Debug, Default)]
struct ChunkTable {
    /// The writable chunk per metric
    active: HashMap<String, Chunk>,
    /// Sealed chunks per metric; position in the list is the chunk ID
    sealed: HashMap<String, Vec<Chunk>>,
}

/// State shared between the engine handle and the flusher thread
struct EngineShared {
    path: PathBuf,
    config: DatabaseConfig,
    metrics: Mutex<BTreeSet<String>>,
    chunks: Mutex<ChunkTable>,
    wal: Mutex<WriteAheadLog>,
    store: ChunkStore,
    index: AdaptiveIndex,
    ingress: IngressQueue,
    running: AtomicBool,
}

/// An embedded time-series database
///
/// Writes are durable in the WAL on return and become queryable within one
/// flush interval. Call [`Database::close`] for a clean shutdown (dropping
/// the handle does the same) or [`Database::destroy`] to delete the database
/// from disk.
pub struct Database {
    shared: Arc<EngineShared>,
    flusher: Option<JoinHandle<()>>,
    name: String,
    closed: bool,
}

impl Database {
    /// Open or create the database `name` under `.waffledb/` with defaults
    pub fn open(name: &str) -> StorageResult<Self> {
        Self::open_with_config(name, DatabaseConfig::default())
    }

    /// Open or create a database with explicit configuration.
    ///
    /// Runs the recovery protocol: load metadata and sealed chunks, then
    /// either replay the WAL (no chunk data survived) or clear it (its
    /// entries are superseded by the chunks on disk). The background flusher
    /// starts only after recovery completes.
    pub fn open_with_config(name: &str, config: DatabaseConfig) -> StorageResult<Self> {
        let path = config.base_dir.join(name);
        std::fs::create_dir_all(&path)?;

        let wal = WriteAheadLog::open(path.join(WAL_FILE), config.wal_sync)?;
        let store = ChunkStore::new(&path)?;

        let shared = Arc::new(EngineShared {
            path: path.clone(),
            config,
            metrics: Mutex::new(BTreeSet::new()),
            chunks: Mutex::new(ChunkTable::default()),
            wal: Mutex::new(wal),
            store,
            index: AdaptiveIndex::new(),
            ingress: IngressQueue::new(),
            running: AtomicBool::new(true),
        });

        // Load the metric registry and sealed-chunk manifest
        let (metric_names, chunk_counts) = match load_metadata(&path.join(METADATA_FILE)) {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!("failed to load metadata, starting empty: {}", e);
                (BTreeSet::new(), BTreeMap::new())
            }
        };

        {
            let mut metrics = shared.metrics.lock();
            *metrics = metric_names;
            for metric in chunk_counts.keys() {
                metrics.insert(metric.clone());
            }
        }

        let mut loaded_any = false;
        {
            let mut table = shared.chunks.lock();
            for (metric, count) in &chunk_counts {
                let mut list = Vec::new();
                for id in 0..*count {
                    match shared.store.load(metric, id) {
                        Some(mut chunk) => {
                            shared.index.add_chunk(
                                metric,
                                list.len(),
                                chunk.min_timestamp(),
                                chunk.max_timestamp(),
                                chunk.tag_values(),
                            );
                            chunk.compress();
                            list.push(chunk);
                        }
                        None => {
                            tracing::warn!("skipping missing or corrupt chunk {}_{}", metric, id);
                        }
                    }
                }
                if !list.is_empty() {
                    loaded_any = true;
                    table.sealed.insert(metric.clone(), list);
                }
            }
        }

        if loaded_any {
            // Chunk data superseded whatever the WAL holds: clean shutdown
            // sealed every buffered point before clearing the log
            shared.wal.lock().clear()?;
        } else {
            let recovered = shared.wal.lock().recover()?;
            if !recovered.is_empty() {
                tracing::info!("recovered {} points from WAL", recovered.len());
                {
                    let mut metrics = shared.metrics.lock();
                    for point in &recovered {
                        metrics.insert(point.metric.clone());
                    }
                }
                for point in recovered {
                    shared.ingress.push(point);
                }
                Self::flush_cycle(&shared)?;
            }
            shared.wal.lock().clear()?;
        }

        let flusher = Self::spawn_flusher(Arc::clone(&shared))?;

        Ok(Self {
            shared,
            flusher: Some(flusher),
            name: name.to_string(),
            closed: false,
        })
    }

    fn spawn_flusher(shared: Arc<EngineShared>) -> StorageResult<JoinHandle<()>> {
        let handle = std::thread::Builder::new()
            .name("waffledb-flusher".to_string())
            .spawn(move || {
                while shared.running.load(Ordering::SeqCst) {
                    std::thread::sleep(shared.config.flush_interval);
                    if !shared.running.load(Ordering::SeqCst) {
                        break;
                    }
                    if let Err(e) = Database::flush_cycle(&shared) {
                        tracing::error!("background flush failed: {}", e);
                    }
                }
            })?;
        Ok(handle)
    }

    /// Write one point: metric registered, WAL append (durable on return),
    /// then handed to the flusher through the ingress queue
    pub fn write(&self, point: TimePoint) -> StorageResult<()> {
        self.shared.metrics.lock().insert(point.metric.clone());
        self.shared.wal.lock().append(&point)?;
        self.shared.ingress.push(point);
        Ok(())
    }

    /// Write a batch under one WAL lock acquisition
    pub fn write_batch(&self, points: Vec<TimePoint>) -> StorageResult<()> {
        if points.is_empty() {
            return Ok(());
        }

        {
            let mut metrics = self.shared.metrics.lock();
            for point in &points {
                metrics.insert(point.metric.clone());
            }
        }
        self.shared.wal.lock().append_batch(&points)?;
        for point in points {
            self.shared.ingress.push(point);
        }
        Ok(())
    }

    /// Drain the ingress queue into chunks synchronously.
    ///
    /// The flusher runs this on its own; it is public so callers (and tests)
    /// can force pending writes to become queryable immediately.
    pub fn flush(&self) -> StorageResult<()> {
        Self::flush_cycle(&self.shared)
    }

    /// One flush cycle: drain, group by metric, append into active chunks
    /// (sealing as they fill), then checkpoint the WAL. Holds the chunks
    /// mutex for the whole append phase so queries see a consistent set.
    fn flush_cycle(shared: &EngineShared) -> StorageResult<()> {
        let drained = shared.ingress.drain();
        if drained.is_empty() {
            return Ok(());
        }

        let mut by_metric: HashMap<String, Vec<TimePoint>> = HashMap::new();
        for point in drained {
            by_metric.entry(point.metric.clone()).or_default().push(point);
        }

        {
            let mut table = shared.chunks.lock();
            for (metric, points) in by_metric {
                for point in points {
                    let full = table
                        .active
                        .get(&metric)
                        .map(|c| !c.can_append())
                        .unwrap_or(false);
                    if full {
                        Self::seal_active(shared, &mut table, &metric);
                    }

                    let chunk = table.active.entry(metric.clone()).or_default();
                    chunk.append(point.timestamp, point.value, point.tags)?;
                }
            }
        }

        shared.wal.lock().checkpoint()?;
        Ok(())
    }

    /// Seal a metric's active chunk: sort by time, write to disk with the
    /// next dense ID, register in the index, pack the columns and move it to
    /// the sealed list. Save failures are logged; the chunk stays queryable
    /// in memory either way.
    fn seal_active(shared: &EngineShared, table: &mut ChunkTable, metric: &str) {
        let Some(mut chunk) = table.active.remove(metric) else {
            return;
        };
        if chunk.is_empty() {
            return;
        }

        chunk.sort_by_time();

        let sealed = table.sealed.entry(metric.to_string()).or_default();
        let chunk_id = sealed.len();

        if let Err(e) = shared.store.save(metric, chunk_id, &chunk) {
            tracing::error!("failed to save chunk {}_{}: {}", metric, chunk_id, e);
        }

        shared.index.add_chunk(
            metric,
            chunk_id,
            chunk.min_timestamp(),
            chunk.max_timestamp(),
            chunk.tag_values(),
        );

        chunk.compress();
        sealed.push(chunk);
        tracing::debug!("sealed chunk {}_{}", metric, chunk_id);
    }

    /// Tag-filtered range query, ascending by timestamp.
    ///
    /// Both range ends are inclusive. Unknown metrics return an empty vec.
    /// Points still in the ingress queue (written less than one flush
    /// interval ago) are not visible yet.
    pub fn query(&self, metric: &str, start: u64, end: u64, tags: &TagMap) -> Vec<TimePoint> {
        let table = self.shared.chunks.lock();
        let mut results = Vec::new();

        if let Some(active) = table.active.get(metric) {
            collect_points(active, metric, start, end, tags, &mut results);
        }

        if let Some(sealed) = table.sealed.get(metric) {
            for chunk_id in self.shared.index.find_chunks(metric, start, end, tags) {
                if let Some(chunk) = sealed.get(chunk_id) {
                    collect_points(chunk, metric, start, end, tags, &mut results);
                }
            }
        }

        drop(table);

        results.sort_by_key(|p| p.timestamp);
        results
    }

    /// Sum of matching values in `[start, end]`. Returns `0.0` when nothing
    /// matches; query and fold the points to tell "no data" from zero.
    pub fn sum(&self, metric: &str, start: u64, end: u64, tags: &TagMap) -> f64 {
        if !tags.is_empty() {
            return self.query(metric, start, end, tags).iter().map(|p| p.value).sum();
        }

        let table = self.shared.chunks.lock();
        let mut total = 0.0;
        for_each_chunk(&table, metric, |chunk| {
            if chunk.overlaps(start, end) {
                total += chunk.sum(start, end);
            }
        });
        total
    }

    /// Minimum matching value in `[start, end]`; `0.0` when nothing matches
    pub fn min(&self, metric: &str, start: u64, end: u64, tags: &TagMap) -> f64 {
        if !tags.is_empty() {
            return fold_values(&self.query(metric, start, end, tags), f64::MAX, f64::min);
        }

        let table = self.shared.chunks.lock();
        let mut min_val = f64::MAX;
        let mut found = false;
        for_each_chunk(&table, metric, |chunk| {
            if chunk.overlaps(start, end) && chunk.count_in_range(start, end) > 0 {
                min_val = min_val.min(chunk.min(start, end));
                found = true;
            }
        });
        if found {
            min_val
        } else {
            0.0
        }
    }

    /// Maximum matching value in `[start, end]`; `0.0` when nothing matches
    pub fn max(&self, metric: &str, start: u64, end: u64, tags: &TagMap) -> f64 {
        if !tags.is_empty() {
            return fold_values(&self.query(metric, start, end, tags), f64::MIN, f64::max);
        }

        let table = self.shared.chunks.lock();
        let mut max_val = f64::MIN;
        let mut found = false;
        for_each_chunk(&table, metric, |chunk| {
            if chunk.overlaps(start, end) && chunk.count_in_range(start, end) > 0 {
                max_val = max_val.max(chunk.max(start, end));
                found = true;
            }
        });
        if found {
            max_val
        } else {
            0.0
        }
    }

    /// Mean of matching values in `[start, end]`; `0.0` when nothing
    /// matches. Sum and count accumulate across chunks and divide once, so
    /// unequally filled chunks average correctly.
    pub fn avg(&self, metric: &str, start: u64, end: u64, tags: &TagMap) -> f64 {
        if !tags.is_empty() {
            let points = self.query(metric, start, end, tags);
            if points.is_empty() {
                return 0.0;
            }
            let total: f64 = points.iter().map(|p| p.value).sum();
            return total / points.len() as f64;
        }

        let table = self.shared.chunks.lock();
        let mut total = 0.0;
        let mut count = 0usize;
        for_each_chunk(&table, metric, |chunk| {
            if chunk.overlaps(start, end) {
                let n = chunk.count_in_range(start, end);
                if n > 0 {
                    total += chunk.sum(start, end);
                    count += n;
                }
            }
        });

        if count == 0 {
            0.0
        } else {
            total / count as f64
        }
    }

    /// Number of matching points in `[start, end]`
    pub fn count(&self, metric: &str, start: u64, end: u64, tags: &TagMap) -> u64 {
        if !tags.is_empty() {
            return self.query(metric, start, end, tags).len() as u64;
        }

        let table = self.shared.chunks.lock();
        let mut count = 0u64;
        for_each_chunk(&table, metric, |chunk| {
            if chunk.overlaps(start, end) {
                count += chunk.count_in_range(start, end) as u64;
            }
        });
        count
    }

    /// Columnar view of a tag-filtered range query
    pub fn query_series(&self, metric: &str, start: u64, end: u64, tags: &TagMap) -> TimeSeries {
        let points = self.query(metric, start, end, tags);
        let mut series = TimeSeries::from_points(metric, &points);
        series.tags = tags.clone();
        series
    }

    /// Snapshot of the metric registry
    pub fn get_metrics(&self) -> Vec<String> {
        self.shared.metrics.lock().iter().cloned().collect()
    }

    /// Remove a metric: registry entry, active and sealed chunks in memory,
    /// chunk files on disk; metadata is persisted afterwards
    pub fn delete_metric(&self, metric: &str) -> StorageResult<()> {
        self.shared.metrics.lock().remove(metric);

        {
            let mut table = self.shared.chunks.lock();
            table.active.remove(metric);
            table.sealed.remove(metric);
        }

        self.shared.index.remove_metric(metric);

        if let Err(e) = self.shared.store.delete_chunks(metric) {
            tracing::warn!("failed to delete chunk files for {}: {}", metric, e);
        }

        self.persist_metadata()
    }

    /// Engine statistics
    pub fn stats(&self) -> DatabaseStats {
        let table = self.shared.chunks.lock();
        let active_points = table.active.values().map(|c| c.len()).sum();
        let sealed_chunks = table.sealed.values().map(|v| v.len()).sum();
        let sealed_points = table
            .sealed
            .values()
            .flat_map(|v| v.iter())
            .map(|c| c.len() as u64)
            .sum();
        drop(table);

        DatabaseStats {
            metric_count: self.shared.metrics.lock().len(),
            active_points,
            sealed_chunks,
            sealed_points,
            pending_points: self.shared.ingress.len(),
            wal_entries: self.shared.wal.lock().entry_count(),
        }
    }

    /// Database name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Database directory
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Clean shutdown: stop the flusher, drain the queue, seal every
    /// non-empty active chunk to disk, persist metadata, clear the WAL
    pub fn close(mut self) -> StorageResult<()> {
        self.shutdown()
    }

    /// Shut down and delete the database directory. Filesystem errors are
    /// logged, never propagated.
    pub fn destroy(mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!("shutdown during destroy failed: {}", e);
        }

        let path = self.shared.path.clone();
        if let Err(e) = std::fs::remove_dir_all(&path) {
            tracing::error!("failed to remove database directory {:?}: {}", path, e);
        }
    }

    fn shutdown(&mut self) -> StorageResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.flusher.take() {
            if handle.join().is_err() {
                tracing::error!("flusher thread panicked");
            }
        }

        Self::flush_cycle(&self.shared)?;

        {
            let mut table = self.shared.chunks.lock();
            let metrics: Vec<String> = table.active.keys().cloned().collect();
            for metric in metrics {
                Self::seal_active(&self.shared, &mut table, &metric);
            }
        }

        self.persist_metadata()?;

        // Everything buffered is now sealed on disk; the log is superseded
        self.shared.wal.lock().clear()?;
        Ok(())
    }

    /// Stop the flusher and drop the handle without the shutdown flush,
    /// leaving disk state as a crash would
    #[cfg(test)]
    pub(crate) fn abort(mut self) {
        self.closed = true;
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.flusher.take() {
            let _ = handle.join();
        }
    }

    fn persist_metadata(&self) -> StorageResult<()> {
        let metrics: Vec<String> = self.shared.metrics.lock().iter().cloned().collect();
        let counts: BTreeMap<String, usize> = {
            let table = self.shared.chunks.lock();
            table
                .sealed
                .iter()
                .map(|(metric, chunks)| (metric.clone(), chunks.len()))
                .collect()
        };

        let mut content = String::new();
        content.push_str(&format!("metrics:{}\n", metrics.len()));
        for metric in &metrics {
            content.push_str(metric);
            content.push('\n');
        }
        content.push_str("chunks:\n");
        for (metric, count) in &counts {
            content.push_str(&format!("{}:{}\n", metric, count));
        }

        std::fs::write(self.shared.path.join(METADATA_FILE), content)?;
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.shutdown() {
            tracing::error!("shutdown on drop failed: {}", e);
        }
    }
}

/// Parse the metadata file into the metric registry and per-metric sealed
/// chunk counts. A missing file yields empty state.
fn load_metadata(path: &Path) -> StorageResult<(BTreeSet<String>, BTreeMap<String, usize>)> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok((BTreeSet::new(), BTreeMap::new()));
        }
        Err(e) => return Err(e.into()),
    };

    let mut lines = content.lines();
    let header = lines
        .next()
        .ok_or_else(|| StorageError::Metadata("empty metadata file".into()))?;
    let metric_count: usize = header
        .strip_prefix("metrics:")
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| StorageError::Metadata(format!("invalid header line: {}", header)))?;

    let mut metrics = BTreeSet::new();
    for _ in 0..metric_count {
        let name = lines
            .next()
            .ok_or_else(|| StorageError::Metadata("truncated metric list".into()))?;
        metrics.insert(name.to_string());
    }

    match lines.next() {
        Some("chunks:") => {}
        other => {
            return Err(StorageError::Metadata(format!(
                "expected chunks section, got {:?}",
                other
            )));
        }
    }

    let mut counts = BTreeMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        // Split on the last colon so metric names containing ':' survive
        let (metric, count) = line
            .rsplit_once(':')
            .ok_or_else(|| StorageError::Metadata(format!("invalid chunk line: {}", line)))?;
        let count: usize = count
            .parse()
            .map_err(|_| StorageError::Metadata(format!("invalid chunk count: {}", line)))?;
        counts.insert(metric.to_string(), count);
    }

    Ok((metrics, counts))
}

/// Emit a chunk's matching rows into `results`
fn collect_points(
    chunk: &Chunk,
    metric: &str,
    start: u64,
    end: u64,
    tags: &TagMap,
    results: &mut Vec<TimePoint>,
) {
    if !chunk.overlaps(start, end) {
        return;
    }

    let time_indices = chunk.query_time_range(start, end);
    if time_indices.is_empty() {
        return;
    }

    let indices = if tags.is_empty() {
        time_indices
    } else {
        intersect_sorted(&time_indices, &chunk.query_tags(tags))
    };

    let timestamps = chunk.timestamps();
    let values = chunk.values();
    for i in indices {
        results.push(TimePoint {
            timestamp: timestamps[i],
            value: values[i],
            metric: metric.to_string(),
            tags: chunk.tags()[i].clone(),
        });
    }
}

fn for_each_chunk<F: FnMut(&Chunk)>(table: &ChunkTable, metric: &str, mut f: F) {
    if let Some(active) = table.active.get(metric) {
        f(active);
    }
    if let Some(sealed) = table.sealed.get(metric) {
        for chunk in sealed {
            f(chunk);
        }
    }
}

fn fold_values(points: &[TimePoint], init: f64, f: fn(f64, f64) -> f64) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    points.iter().map(|p| p.value).fold(init, f)
}

/// Intersection of two ascending index lists
fn intersect_sorted(a: &[usize], b: &[usize]) -> Vec<usize> {
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

/// Engine statistics snapshot
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    /// Metrics in the registry
    pub metric_count: usize,
    /// Points in active chunks
    pub active_points: usize,
    /// Sealed chunks across all metrics
    pub sealed_chunks: usize,
    /// Points in sealed chunks
    pub sealed_points: u64,
    /// Points waiting in the ingress queue
    pub pending_points: usize,
    /// WAL entries appended this session
    pub wal_entries: u64,
}

impl std::fmt::Display for DatabaseStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Metrics: {}, Active points: {}, Sealed chunks: {} ({} points), Pending: {}, WAL entries: {}",
            self.metric_count,
            self.active_points,
            self.sealed_chunks,
            self.sealed_points,
            self.pending_points,
            self.wal_entries
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(dir: &Path) -> DatabaseConfig {
        DatabaseConfig {
            base_dir: dir.to_path_buf(),
            flush_interval: Duration::from_millis(20),
            wal_sync: WalSyncMode::None,
        }
    }

    fn open_db(dir: &Path, name: &str) -> Database {
        Database::open_with_config(name, test_config(dir)).unwrap()
    }

    fn tags_of(pairs: &[(&str, &str)]) -> TagMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_single_point_roundtrip() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path(), "db1");

        db.write(TimePoint::new("cpu.usage", 100, 75.5)).unwrap();
        db.flush().unwrap();

        let points = db.query("cpu.usage", 90, 110, &TagMap::new());
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].timestamp, 100);
        assert_eq!(points[0].value, 75.5);
        assert_eq!(points[0].metric, "cpu.usage");
    }

    #[test]
    fn test_background_flusher_makes_writes_visible() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path(), "db_bg");

        db.write(TimePoint::new("bg.metric", 50, 1.0)).unwrap();

        // Worst case is one full flush interval plus scheduling slack
        let mut found = false;
        for _ in 0..50 {
            std::thread::sleep(Duration::from_millis(10));
            if !db.query("bg.metric", 0, 100, &TagMap::new()).is_empty() {
                found = true;
                break;
            }
        }
        assert!(found, "write never became visible to queries");
    }

    #[test]
    fn test_batch_then_range() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path(), "db_batch");

        db.write_batch(vec![
            TimePoint::new("cpu.batch", 60, 10.0),
            TimePoint::new("cpu.batch", 90, 20.0),
            TimePoint::new("cpu.batch", 120, 30.0),
        ])
        .unwrap();
        db.flush().unwrap();

        let points = db.query("cpu.batch", 0, 200, &TagMap::new());
        assert_eq!(points.len(), 3);
        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_tag_filter() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path(), "db_tags");

        db.write(
            TimePoint::new("memory.usage", 1, 4096.0)
                .tag("host", "server1")
                .tag("region", "us-west"),
        )
        .unwrap();
        db.write(
            TimePoint::new("memory.usage", 1, 2048.0)
                .tag("host", "server2")
                .tag("region", "us-east"),
        )
        .unwrap();
        db.flush().unwrap();

        let points = db.query("memory.usage", 0, 2, &tags_of(&[("host", "server1")]));
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 4096.0);
        assert!(points[0].has_tag("host", "server1"));

        // Tag filtering is subset semantics over the unfiltered result
        let all = db.query("memory.usage", 0, 2, &TagMap::new());
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_aggregates() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path(), "db_agg");

        for (ts, v) in [(10, 10.0), (30, 20.0), (50, 30.0), (70, 40.0)] {
            db.write(TimePoint::new("m", ts, v)).unwrap();
        }
        db.flush().unwrap();

        let no_tags = TagMap::new();
        assert_eq!(db.avg("m", 0, 100, &no_tags), 25.0);
        assert_eq!(db.sum("m", 0, 100, &no_tags), 100.0);
        assert_eq!(db.min("m", 0, 100, &no_tags), 10.0);
        assert_eq!(db.max("m", 0, 100, &no_tags), 40.0);
        assert_eq!(db.count("m", 0, 100, &no_tags), 4);

        // Partial window
        assert_eq!(db.sum("m", 30, 50, &no_tags), 50.0);
    }

    #[test]
    fn test_aggregates_empty_and_unknown() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path(), "db_agg_empty");

        db.write(TimePoint::new("m", 10, 5.0)).unwrap();
        db.flush().unwrap();

        let no_tags = TagMap::new();
        // Empty range and unknown metric both report 0.0 by convention
        assert_eq!(db.sum("m", 100, 200, &no_tags), 0.0);
        assert_eq!(db.min("m", 100, 200, &no_tags), 0.0);
        assert_eq!(db.max("m", 100, 200, &no_tags), 0.0);
        assert_eq!(db.avg("m", 100, 200, &no_tags), 0.0);
        assert_eq!(db.sum("ghost", 0, 100, &no_tags), 0.0);
        assert!(db.query("ghost", 0, 100, &no_tags).is_empty());
    }

    #[test]
    fn test_aggregates_with_tags() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path(), "db_agg_tags");

        db.write(TimePoint::new("m", 10, 1.0).tag("host", "a")).unwrap();
        db.write(TimePoint::new("m", 20, 2.0).tag("host", "b")).unwrap();
        db.write(TimePoint::new("m", 30, 3.0).tag("host", "a")).unwrap();
        db.flush().unwrap();

        let filter = tags_of(&[("host", "a")]);
        assert_eq!(db.sum("m", 0, 100, &filter), 4.0);
        assert_eq!(db.avg("m", 0, 100, &filter), 2.0);
        assert_eq!(db.min("m", 0, 100, &filter), 1.0);
        assert_eq!(db.max("m", 0, 100, &filter), 3.0);
        assert_eq!(db.count("m", 0, 100, &filter), 2);
    }

    #[test]
    fn test_aggregation_matches_query_fold() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path(), "db_agg_consistency");

        for i in 0..50u64 {
            db.write(TimePoint::new("m", i * 3, (i % 7) as f64)).unwrap();
        }
        db.flush().unwrap();

        let no_tags = TagMap::new();
        let points = db.query("m", 20, 100, &no_tags);
        let folded: f64 = points.iter().map(|p| p.value).sum();
        assert!((db.sum("m", 20, 100, &no_tags) - folded).abs() < 1e-9);
        assert_eq!(db.count("m", 20, 100, &no_tags) as usize, points.len());

        let expected_avg = folded / points.len() as f64;
        assert!((db.avg("m", 20, 100, &no_tags) - expected_avg).abs() < 1e-9);
    }

    #[test]
    fn test_chunk_sealing_and_query_across_chunks() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path(), "db_seal");

        let points: Vec<TimePoint> = (0..2500u64)
            .map(|i| TimePoint::new("big", i, i as f64))
            .collect();
        db.write_batch(points).unwrap();
        db.flush().unwrap();

        // 2500 points = 2 sealed chunks + 500 in the active chunk
        let stats = db.stats();
        assert_eq!(stats.sealed_chunks, 2);
        assert_eq!(stats.sealed_points, 2000);
        assert_eq!(stats.active_points, 500);

        assert!(dir.path().join("db_seal").join("big_0.chunk").exists());
        assert!(dir.path().join("db_seal").join("big_1.chunk").exists());

        let all = db.query("big", 0, 5000, &TagMap::new());
        assert_eq!(all.len(), 2500);
        // Ascending across sealed and active chunks
        for window in all.windows(2) {
            assert!(window[0].timestamp <= window[1].timestamp);
        }

        // A range straddling the seal boundary
        let crossing = db.query("big", 990, 1010, &TagMap::new());
        assert_eq!(crossing.len(), 21);
    }

    #[test]
    fn test_crash_recovery_replays_wal() {
        let dir = tempdir().unwrap();

        {
            let db = open_db(dir.path(), "db_crash");
            db.write(TimePoint::new("x", 1, 1.0)).unwrap();
            db.write(TimePoint::new("x", 2, 2.0)).unwrap();
            db.write(TimePoint::new("x", 3, 3.0).tag("host", "a")).unwrap();
            db.abort();
        }

        let db = open_db(dir.path(), "db_crash");
        let points = db.query("x", 0, u64::MAX, &TagMap::new());
        assert_eq!(points.len(), 3);
        assert_eq!(points[2].value, 3.0);
        assert!(points[2].has_tag("host", "a"));
        assert!(db.get_metrics().contains(&"x".to_string()));
    }

    #[test]
    fn test_no_duplicate_replay_after_clean_close() {
        let dir = tempdir().unwrap();

        {
            let db = open_db(dir.path(), "db_once");
            for i in 0..10u64 {
                db.write(TimePoint::new("m", i, i as f64)).unwrap();
            }
            db.flush().unwrap();
            db.close().unwrap();
        }

        {
            let db = open_db(dir.path(), "db_once");
            assert_eq!(db.query("m", 0, u64::MAX, &TagMap::new()).len(), 10);
            db.close().unwrap();
        }

        // A second clean cycle must still return each point exactly once
        let db = open_db(dir.path(), "db_once");
        assert_eq!(db.query("m", 0, u64::MAX, &TagMap::new()).len(), 10);
    }

    #[test]
    fn test_unflushed_points_sealed_on_close() {
        let dir = tempdir().unwrap();

        {
            let db = open_db(dir.path(), "db_close_seals");
            db.write(TimePoint::new("m", 7, 7.0)).unwrap();
            // No explicit flush; close must drain and seal
            db.close().unwrap();
        }

        let db = open_db(dir.path(), "db_close_seals");
        let points = db.query("m", 0, 100, &TagMap::new());
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].timestamp, 7);
    }

    #[test]
    fn test_delete_metric() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("db_del");

        {
            let db = open_db(dir.path(), "db_del");
            db.write(TimePoint::new("to.delete", 1, 1.0)).unwrap();
            db.write(TimePoint::new("keep", 1, 2.0)).unwrap();
            db.flush().unwrap();
            db.delete_metric("to.delete").unwrap();

            assert!(!db.get_metrics().contains(&"to.delete".to_string()));
            assert!(db.query("to.delete", 0, u64::MAX, &TagMap::new()).is_empty());
            db.close().unwrap();
        }

        // No chunk file for the deleted metric remains
        for entry in std::fs::read_dir(&db_path).unwrap() {
            let name = entry.unwrap().file_name().to_string_lossy().to_string();
            assert!(!name.starts_with("to.delete_"));
        }

        // The deletion survives a restart
        let db = open_db(dir.path(), "db_del");
        assert!(!db.get_metrics().contains(&"to.delete".to_string()));
        assert!(db.query("to.delete", 0, u64::MAX, &TagMap::new()).is_empty());
        assert_eq!(db.query("keep", 0, u64::MAX, &TagMap::new()).len(), 1);
    }

    #[test]
    fn test_metadata_persistence() {
        let dir = tempdir().unwrap();

        {
            let db = open_db(dir.path(), "db_meta");
            db.write(TimePoint::new("a.metric", 1, 1.0)).unwrap();
            db.write(TimePoint::new("b.metric", 2, 2.0)).unwrap();
            db.flush().unwrap();
            db.close().unwrap();
        }

        let content =
            std::fs::read_to_string(dir.path().join("db_meta").join("metadata.txt")).unwrap();
        assert!(content.starts_with("metrics:2\n"));
        assert!(content.contains("a.metric\n"));
        assert!(content.contains("chunks:\n"));
        assert!(content.contains("a.metric:1\n"));

        let db = open_db(dir.path(), "db_meta");
        assert_eq!(db.get_metrics(), vec!["a.metric", "b.metric"]);
    }

    #[test]
    fn test_sealed_chunks_reload_with_tags() {
        let dir = tempdir().unwrap();

        {
            let db = open_db(dir.path(), "db_reload");
            let points: Vec<TimePoint> = (0..1500u64)
                .map(|i| {
                    TimePoint::new("tagged", i, i as f64)
                        .tag("parity", if i % 2 == 0 { "even" } else { "odd" })
                })
                .collect();
            db.write_batch(points).unwrap();
            db.flush().unwrap();
            db.close().unwrap();
        }

        let db = open_db(dir.path(), "db_reload");
        assert_eq!(db.query("tagged", 0, u64::MAX, &TagMap::new()).len(), 1500);

        let evens = db.query("tagged", 0, u64::MAX, &tags_of(&[("parity", "even")]));
        assert_eq!(evens.len(), 750);
        assert!(evens.iter().all(|p| p.timestamp % 2 == 0));
    }

    #[test]
    fn test_query_series() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path(), "db_series");

        db.write(TimePoint::new("s", 10, 1.0).tag("host", "a")).unwrap();
        db.write(TimePoint::new("s", 20, 2.0).tag("host", "b")).unwrap();
        db.flush().unwrap();

        let series = db.query_series("s", 0, 100, &tags_of(&[("host", "a")]));
        assert_eq!(series.metric, "s");
        assert_eq!(series.timestamps, vec![10]);
        assert_eq!(series.values, vec![1.0]);
        assert_eq!(series.tags.get("host").map(String::as_str), Some("a"));
    }

    #[test]
    fn test_concurrent_writers() {
        let dir = tempdir().unwrap();
        let db = std::sync::Arc::new(open_db(dir.path(), "db_mt"));

        let threads: Vec<_> = (0..4)
            .map(|t| {
                let db = std::sync::Arc::clone(&db);
                std::thread::spawn(move || {
                    for i in 0..250u64 {
                        db.write(TimePoint::new("mt.metric", t * 1000 + i, i as f64))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in threads {
            handle.join().unwrap();
        }

        db.flush().unwrap();
        assert_eq!(db.query("mt.metric", 0, u64::MAX, &TagMap::new()).len(), 1000);
    }

    #[test]
    fn test_destroy_removes_directory() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path(), "db_destroy");
        db.write(TimePoint::new("m", 1, 1.0)).unwrap();
        db.flush().unwrap();

        let path = db.path().to_path_buf();
        assert!(path.exists());
        db.destroy();
        assert!(!path.exists());
    }

    #[test]
    fn test_corrupt_chunk_skipped_on_open() {
        let dir = tempdir().unwrap();

        {
            let db = open_db(dir.path(), "db_corrupt");
            let points: Vec<TimePoint> = (0..2000u64)
                .map(|i| TimePoint::new("m", i, i as f64))
                .collect();
            db.write_batch(points).unwrap();
            db.flush().unwrap();
            db.close().unwrap();
        }

        // Corrupt the first chunk file
        std::fs::write(dir.path().join("db_corrupt").join("m_0.chunk"), b"junk").unwrap();

        let db = open_db(dir.path(), "db_corrupt");
        // The intact chunk still loads
        let points = db.query("m", 0, u64::MAX, &TagMap::new());
        assert_eq!(points.len(), 1000);
    }

    #[test]
    fn test_intersect_sorted() {
        assert_eq!(intersect_sorted(&[1, 3, 5, 7], &[2, 3, 4, 7]), vec![3, 7]);
        assert_eq!(intersect_sorted(&[], &[1, 2]), Vec::<usize>::new());
        assert_eq!(intersect_sorted(&[1, 2, 3], &[1, 2, 3]), vec![1, 2, 3]);
    }

    #[test]
    fn test_load_metadata_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metadata.txt");

        std::fs::write(&path, "not metadata").unwrap();
        assert!(load_metadata(&path).is_err());

        std::fs::write(&path, "metrics:1\nm\nchunks:\nm:notanumber\n").unwrap();
        assert!(load_metadata(&path).is_err());

        // Metric names containing colons round-trip
        std::fs::write(&path, "metrics:1\nns:cpu\nchunks:\nns:cpu:3\n").unwrap();
        let (metrics, counts) = load_metadata(&path).unwrap();
        assert!(metrics.contains("ns:cpu"));
        assert_eq!(counts["ns:cpu"], 3);
    }
}
