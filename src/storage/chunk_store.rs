//! Directory-backed chunk persistence
//!
//! Each sealed chunk lives in its own file named `<metric>_<id>.chunk`
//! directly under the database directory. Loads degrade to `None` on missing
//! or corrupt files; the engine skips those with a warning.
//!
//! The store assumes a single process owns the directory.

use crate::storage::chunk::Chunk;
use crate::storage::error::StorageResult;
use std::fs;
use std::path::{Path, PathBuf};

/// Chunk file extension
const CHUNK_EXT: &str = ".chunk";

/// Persists sealed chunks as individual files
#[derive(Debug)]
pub struct ChunkStore {
    base_path: PathBuf,
}

impl ChunkStore {
    /// Open a store rooted at `base_path`, creating the directory if needed
    pub fn new(base_path: impl AsRef<Path>) -> StorageResult<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    fn chunk_path(&self, metric: &str, chunk_id: usize) -> PathBuf {
        self.base_path
            .join(format!("{}_{}{}", metric, chunk_id, CHUNK_EXT))
    }

    /// Write a chunk to `<metric>_<id>.chunk`
    pub fn save(&self, metric: &str, chunk_id: usize, chunk: &Chunk) -> StorageResult<()> {
        let path = self.chunk_path(metric, chunk_id);
        fs::write(&path, chunk.serialize())?;
        Ok(())
    }

    /// Load a chunk, or `None` when the file is missing or fails to parse
    pub fn load(&self, metric: &str, chunk_id: usize) -> Option<Chunk> {
        let path = self.chunk_path(metric, chunk_id);
        if !path.exists() {
            return None;
        }

        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("failed to read chunk file {:?}: {}", path, e);
                return None;
            }
        };

        match Chunk::deserialize(&data) {
            Ok(chunk) => Some(chunk),
            Err(e) => {
                tracing::warn!("failed to deserialize chunk file {:?}: {}", path, e);
                None
            }
        }
    }

    /// IDs of this metric's chunk files, ascending
    pub fn list_chunks(&self, metric: &str) -> StorageResult<Vec<usize>> {
        let prefix = format!("{}_", metric);
        let mut ids = Vec::new();

        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };

            let Some(rest) = name.strip_prefix(&prefix) else {
                continue;
            };
            let Some(id_str) = rest.strip_suffix(CHUNK_EXT) else {
                continue;
            };
            if let Ok(id) = id_str.parse::<usize>() {
                ids.push(id);
            }
        }

        ids.sort_unstable();
        Ok(ids)
    }

    /// Remove every file whose name begins with `<metric>_`
    pub fn delete_chunks(&self, metric: &str) -> StorageResult<()> {
        let prefix = format!("{}_", metric);

        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };

            if name.starts_with(&prefix) && name.ends_with(CHUNK_EXT) {
                if let Err(e) = fs::remove_file(entry.path()) {
                    tracing::warn!("failed to remove chunk file {:?}: {}", entry.path(), e);
                }
            }
        }

        Ok(())
    }

    /// Root directory of the store
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}
