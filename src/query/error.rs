//! Query error types

use thiserror::Error;

/// Errors from parsing or executing textual queries
#[derive(Error, Debug)]
pub enum QueryError {
    /// Input does not match the supported grammar
    #[error("Query syntax error: {0}")]
    Syntax(String),

    /// Storage layer error during execution
    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
