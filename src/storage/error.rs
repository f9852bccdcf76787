//! Storage engine error types

use thiserror::Error;

/// Errors that can occur in the storage engine
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Data corruption detected (invalid lengths, bad codec width, etc.)
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// Chunk has reached capacity; internal signal, the engine seals and retries
    #[error("Chunk is full")]
    ChunkFull,

    /// WAL format or recovery error
    #[error("WAL error: {0}")]
    Wal(String),

    /// Metadata file could not be parsed
    #[error("Metadata error: {0}")]
    Metadata(String),
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
