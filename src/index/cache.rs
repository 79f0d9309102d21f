//! Bounded LRU cache of loaded indices, with dirty-flag write-back.
//!
//! Backed by an `IndexMap` for O(1) insert and LRU eviction via
//! `shift_remove_index(0)`; dirty entries are written back through a
//! caller-supplied persistence callback before they're evicted or dropped.

use crate::distance::DistanceMetric;
use crate::error::Result;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::hnsw::{HnswIndex, NodeId};

/// Full HNSW topology in a form suitable for `bincode` persistence:
/// node id/layer/neighbor-ids-per-layer plus the entry point, not the
/// looser "vectors only" legacy contract some index serializers settle for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedIndex {
    /// Distance metric the index was built with.
    pub metric: DistanceMetric,
    /// Vector dimension, once established.
    pub dim: Option<usize>,
    /// `HnswConfig::m` at build time.
    pub config_m: usize,
    /// `HnswConfig::ef_construction` at build time.
    pub config_ef_construction: usize,
    /// `HnswConfig::ef_search` at build time.
    pub config_ef_search: usize,
    /// `HnswConfig::alpha` at build time.
    pub config_alpha: f32,
    /// Entry point node id, if the index is non-empty.
    pub entry_point: Option<NodeId>,
    /// Highest occupied layer.
    pub max_layer: usize,
    /// Record id per node slot; `None` marks a tombstoned slot.
    pub ids: Vec<Option<String>>,
    /// Raw vector per node slot; `None` marks a tombstoned slot.
    pub vectors: Vec<Option<Vec<f32>>>,
    /// Per-layer adjacency lists, indexed `[layer][node_id]`.
    pub layers: Vec<Vec<Vec<NodeId>>>,
}

struct CacheEntry {
    index: Arc<HnswIndex>,
    dirty: AtomicBool,
}

/// A persistence callback invoked with a namespace key and its snapshot.
pub type PersistFn = Box<dyn Fn(&str, &PersistedIndex) -> Result<()> + Send + Sync>;

/// Cache hit/eviction/write-back counters.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of evictions.
    pub evictions: u64,
}

impl CacheStats {
    /// Hit rate in `[0, 1]`.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded LRU cache of loaded [`HnswIndex`] instances.
pub struct IndexCache {
    capacity: usize,
    inner: RwLock<IndexMap<String, CacheEntry>>,
    persist: PersistFn,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl IndexCache {
    /// Creates a cache with the given capacity, write-backing dirty entries
    /// through `persist` on eviction or explicit flush.
    #[must_use]
    pub fn new(capacity: usize, persist: PersistFn) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(IndexMap::with_capacity(capacity)),
            persist,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Current number of loaded indices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// True if no indices are currently loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Returns current cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Returns the index for `key`, loading it with `loader` on a miss and
    /// inserting it into the cache, evicting (and flushing if dirty) the
    /// least-recently-used entry if at capacity.
    ///
    /// # Errors
    ///
    /// Propagates errors from `loader` or from flushing the evicted entry.
    pub fn get_or_load(
        &self,
        key: &str,
        loader: impl FnOnce() -> Result<HnswIndex>,
    ) -> Result<Arc<HnswIndex>> {
        if let Some(index) = self.touch(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(index);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let index = Arc::new(loader()?);
        self.insert(key, Arc::clone(&index))?;
        Ok(index)
    }

    fn touch(&self, key: &str) -> Option<Arc<HnswIndex>> {
        let mut inner = self.inner.write();
        let (_, _key, entry) = inner.shift_remove_full(key)?;
        let index = Arc::clone(&entry.index);
        inner.insert(key.to_string(), entry);
        Some(index)
    }

    fn insert(&self, key: &str, index: Arc<HnswIndex>) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.len() >= self.capacity && !inner.contains_key(key) {
            if let Some((evicted_key, evicted)) = inner.shift_remove_index(0) {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                if evicted.dirty.load(Ordering::Relaxed) {
                    if let Err(e) = (self.persist)(&evicted_key, &evicted.index.snapshot()) {
                        tracing::warn!(namespace = %evicted_key, error = %e, "index cache write-back failed on eviction");
                    }
                }
            }
        }
        inner.insert(
            key.to_string(),
            CacheEntry {
                index,
                dirty: AtomicBool::new(false),
            },
        );
        Ok(())
    }

    /// Inserts an already-built index directly (used when a namespace
    /// creates a fresh index rather than loading one from disk).
    pub fn put(&self, key: &str, index: Arc<HnswIndex>) -> Result<()> {
        self.insert(key, index)
    }

    /// Marks `key`'s entry dirty, so it is write-backed on eviction or
    /// flush. No-op if `key` is not loaded.
    pub fn mark_dirty(&self, key: &str) {
        if let Some(entry) = self.inner.read().get(key) {
            entry.dirty.store(true, Ordering::Relaxed);
        }
    }

    /// Flushes every dirty entry through the persistence callback, clearing
    /// their dirty flags. Returns the number of entries flushed.
    ///
    /// # Errors
    ///
    /// Returns the first persistence error encountered; entries flushed
    /// before the failing one remain clean.
    pub fn flush_dirty(&self) -> Result<usize> {
        let inner = self.inner.read();
        let mut flushed = 0;
        for (key, entry) in inner.iter() {
            if entry.dirty.swap(false, Ordering::Relaxed) {
                (self.persist)(key, &entry.index.snapshot())?;
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Removes `key` from the cache, optionally flushing it first if dirty.
    ///
    /// # Errors
    ///
    /// Propagates a persistence error if `flush` is true and the entry was
    /// dirty.
    pub fn remove(&self, key: &str, flush: bool) -> Result<()> {
        let entry = self.inner.write().shift_remove(key);
        if let Some(entry) = entry {
            if flush && entry.dirty.load(Ordering::Relaxed) {
                (self.persist)(key, &entry.index.snapshot())?;
            }
        }
        Ok(())
    }

    /// Empties the cache, optionally flushing every dirty entry first.
    ///
    /// # Errors
    ///
    /// Propagates the first persistence error encountered while flushing.
    pub fn clear(&self, save_first: bool) -> Result<()> {
        if save_first {
            self.flush_dirty()?;
        }
        self.inner.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::hnsw::HnswConfig;
    use std::sync::Mutex;

    fn test_cache(capacity: usize) -> (IndexCache, Arc<Mutex<Vec<String>>>) {
        let persisted: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&persisted);
        let cache = IndexCache::new(
            capacity,
            Box::new(move |key, _snapshot| {
                recorder.lock().unwrap().push(key.to_string());
                Ok(())
            }),
        );
        (cache, persisted)
    }

    fn build_index() -> Result<HnswIndex> {
        let index = HnswIndex::new(DistanceMetric::Euclidean, HnswConfig::default());
        index.insert("a", &[1.0, 2.0])?;
        Ok(index)
    }

    #[test]
    fn miss_then_hit() {
        let (cache, _) = test_cache(4);
        cache.get_or_load("ns1", build_index).unwrap();
        cache.get_or_load("ns1", build_index).unwrap();
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn eviction_flushes_dirty_entry() {
        let (cache, persisted) = test_cache(1);
        cache.get_or_load("ns1", build_index).unwrap();
        cache.mark_dirty("ns1");
        cache.get_or_load("ns2", build_index).unwrap();
        assert_eq!(persisted.lock().unwrap().as_slice(), ["ns1"]);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn clean_eviction_does_not_flush() {
        let (cache, persisted) = test_cache(1);
        cache.get_or_load("ns1", build_index).unwrap();
        cache.get_or_load("ns2", build_index).unwrap();
        assert!(persisted.lock().unwrap().is_empty());
    }

    #[test]
    fn flush_dirty_clears_flags() {
        let (cache, persisted) = test_cache(4);
        cache.get_or_load("ns1", build_index).unwrap();
        cache.mark_dirty("ns1");
        let flushed = cache.flush_dirty().unwrap();
        assert_eq!(flushed, 1);
        assert_eq!(persisted.lock().unwrap().as_slice(), ["ns1"]);
        assert_eq!(cache.flush_dirty().unwrap(), 0);
    }

    #[test]
    fn clear_with_save_first_flushes() {
        let (cache, persisted) = test_cache(4);
        cache.get_or_load("ns1", build_index).unwrap();
        cache.mark_dirty("ns1");
        cache.clear(true).unwrap();
        assert_eq!(persisted.lock().unwrap().as_slice(), ["ns1"]);
        assert!(cache.is_empty());
    }
}
