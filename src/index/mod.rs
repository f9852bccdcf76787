//! Index structures for chunk-level query pruning
//!
//! The engine registers every sealed chunk here so queries can skip chunks
//! whose time bounds or tag values cannot match.

mod adaptive;

pub use adaptive::AdaptiveIndex;
