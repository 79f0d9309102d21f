//! The proximity index and its cache/persistence layer.

mod cache;
mod hnsw;

pub use cache::{IndexCache, PersistedIndex};
pub use hnsw::{HnswConfig, HnswIndex, HnswStats, NodeId};
