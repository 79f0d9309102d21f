//! Namespace manager & registry: creates, resolves, and
//! isolates per-namespace vector stores, cached under a bounded LRU.
//!
//! Names are validated before a namespace is registered; the registry keeps
//! a persisted row (name, config, stats, timestamps) per namespace
//! independent of whether its store handle is currently cached in memory.

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::storage::{MemoryStore, VectorStore};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Namespace names reserved for internal use.
pub const RESERVED_NAMES: [&str; 4] = ["root", "system", "admin", "registry"];
/// Minimum namespace name length.
pub const MIN_NAME_LEN: usize = 3;
/// Maximum namespace name length.
pub const MAX_NAME_LEN: usize = 64;

/// How a namespace chooses between brute-force and indexed search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStrategy {
    /// Pick brute-force or HNSW based on vector count.
    Auto,
    /// Always scan.
    Brute,
    /// Always use the HNSW index.
    Hnsw,
}

/// Per-namespace configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Fixed dimension every vector in this namespace must have.
    pub dimension: usize,
    /// Distance metric for search.
    pub distance_metric: DistanceMetric,
    /// Indexing strategy.
    pub index_strategy: IndexStrategy,
    /// Compression codec applied on bulk insert, if any.
    pub compression: crate::quantization::CodecKind,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl NamespaceConfig {
    /// Creates a config with sane defaults for the given dimension/metric.
    #[must_use]
    pub fn new(dimension: usize, distance_metric: DistanceMetric) -> Self {
        Self {
            dimension,
            distance_metric,
            index_strategy: IndexStrategy::Auto,
            compression: crate::quantization::CodecKind::None,
            description: None,
        }
    }
}

/// Point-in-time namespace statistics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NamespaceStats {
    /// Live vector count.
    pub vector_count: usize,
    /// Approximate storage footprint in bytes.
    pub storage_bytes: usize,
    /// Creation timestamp (ms).
    pub created_at: u64,
    /// Last-modified timestamp (ms).
    pub modified_at: u64,
    /// Last-accessed timestamp (ms), bumped on every `get`.
    pub last_accessed_at: u64,
}

/// A persisted registry row: `{name, config, stats, created_at,
/// modified_at}`. The backing store name on disk is `<root>-ns-<name>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceRow {
    /// Namespace name.
    pub name: String,
    /// Namespace configuration.
    pub config: NamespaceConfig,
    /// Namespace statistics.
    pub stats: NamespaceStats,
}

/// Validates a namespace name: `^[A-Za-z][A-Za-z0-9_-]*$`, length 3-64, not
/// in [`RESERVED_NAMES`].
///
/// # Errors
///
/// Returns [`Error::NamespaceInvalidName`] on any violation.
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Error::NamespaceInvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    };

    if name.len() < MIN_NAME_LEN || name.len() > MAX_NAME_LEN {
        return Err(invalid(&format!(
            "length must be between {MIN_NAME_LEN} and {MAX_NAME_LEN}"
        )));
    }
    let mut chars = name.chars();
    let first = chars.next().ok_or_else(|| invalid("name must not be empty"))?;
    if !first.is_ascii_alphabetic() {
        return Err(invalid("name must start with an ASCII letter"));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(invalid(
            "name must contain only letters, digits, '_', or '-'",
        ));
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(invalid("name is reserved"));
    }
    Ok(())
}

/// Abstraction over the persisted registry of namespace rows. The core
/// consumes this the same way it consumes [`VectorStore`] for vector data:
/// an external collaborator, with an in-process reference implementation
/// for the embedded default.
pub trait NamespaceRegistry: Send + Sync {
    /// Inserts a new row. Fails if `name` is already registered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NamespaceExists`] if `name` is already registered.
    fn insert(&self, row: NamespaceRow) -> Result<()>;

    /// Fetches a row by name.
    fn get(&self, name: &str) -> Option<NamespaceRow>;

    /// Replaces an existing row's stats (bumping `modified_at` is the
    /// caller's responsibility, as it may not always accompany a stats
    /// change, e.g. a read-only access-time bump).
    fn update(&self, row: NamespaceRow);

    /// Removes a row. Returns whether one was present.
    fn remove(&self, name: &str) -> bool;

    /// Lists every registered namespace name.
    fn list(&self) -> Vec<String>;
}

/// An in-memory [`NamespaceRegistry`] reference implementation.
#[derive(Default)]
pub struct MemoryRegistry {
    rows: RwLock<IndexMap<String, NamespaceRow>>,
}

impl MemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl NamespaceRegistry for MemoryRegistry {
    fn insert(&self, row: NamespaceRow) -> Result<()> {
        let mut rows = self.rows.write();
        if rows.contains_key(&row.name) {
            return Err(Error::NamespaceExists(row.name));
        }
        rows.insert(row.name.clone(), row);
        Ok(())
    }

    fn get(&self, name: &str) -> Option<NamespaceRow> {
        self.rows.read().get(name).cloned()
    }

    fn update(&self, row: NamespaceRow) {
        self.rows.write().insert(row.name.clone(), row);
    }

    fn remove(&self, name: &str) -> bool {
        self.rows.write().shift_remove(name).is_some()
    }

    fn list(&self) -> Vec<String> {
        self.rows.read().keys().cloned().collect()
    }
}

/// A resolved, cacheable handle to one namespace's backing store.
pub struct Namespace {
    /// Namespace name.
    pub name: String,
    /// Namespace configuration. The `distance_metric`/`index_strategy`
    /// fields may be changed at runtime through the owning
    /// [`NamespaceManager`]'s mutators, which also invalidate `index`.
    pub config: RwLock<NamespaceConfig>,
    /// The backing store for this namespace's vectors.
    pub store: Arc<dyn VectorStore>,
    /// The namespace's built proximity index, if indexing is enabled and at
    /// least one `rebuild_index` has run.
    pub index: RwLock<Option<Arc<crate::index::HnswIndex>>>,
    last_accessed_at: AtomicU64,
}

impl Namespace {
    /// Bumps `last_accessed_at` to `now_ms`.
    pub fn touch(&self, now_ms: u64) {
        self.last_accessed_at.store(now_ms, Ordering::Relaxed);
    }

    /// Current `last_accessed_at`, used by the manager's LRU eviction.
    #[must_use]
    pub fn last_accessed_at(&self) -> u64 {
        self.last_accessed_at.load(Ordering::Relaxed)
    }

    /// A snapshot copy of the namespace's current configuration.
    #[must_use]
    pub fn config(&self) -> NamespaceConfig {
        self.config.read().clone()
    }

    /// The on-disk/registry store name for this namespace:
    /// `<root>-ns-<name>`.
    #[must_use]
    pub fn store_name(root: &str, name: &str) -> String {
        format!("{root}-ns-{name}")
    }
}

/// Opens (or creates) the backing store for a namespace. A host embedding
/// `embervec` links in a disk-backed factory; the default is
/// [`memory_store_factory`].
pub type StoreFactory = Box<dyn Fn(&str) -> Arc<dyn VectorStore> + Send + Sync>;

/// The default [`StoreFactory`]: a fresh [`MemoryStore`] per namespace,
/// used by the embedded/in-process deployment mode.
#[must_use]
pub fn memory_store_factory() -> StoreFactory {
    Box::new(|_store_name: &str| Arc::new(MemoryStore::new()) as Arc<dyn VectorStore>)
}

/// Creates, resolves, lists, and deletes namespaces, caching opened handles
/// under an LRU bound.
pub struct NamespaceManager {
    root: String,
    registry: Box<dyn NamespaceRegistry>,
    store_factory: StoreFactory,
    cache: RwLock<IndexMap<String, Arc<Namespace>>>,
    cache_limit: RwLock<usize>,
    default_namespace: Option<(String, usize, DistanceMetric)>,
    /// Namespaces with a currently-built index, ordered oldest-built first,
    /// used to enforce `IndexConfig::cache_capacity`'s residency bound.
    index_residency: RwLock<IndexMap<String, u64>>,
}

impl NamespaceManager {
    /// Creates a manager rooted at `root` (used to derive on-disk store
    /// names), backed by `registry`, opening stores through `store_factory`,
    /// caching at most `cache_limit` open namespaces.
    #[must_use]
    pub fn new(
        root: impl Into<String>,
        registry: Box<dyn NamespaceRegistry>,
        store_factory: StoreFactory,
        cache_limit: usize,
    ) -> Self {
        Self {
            root: root.into(),
            registry,
            store_factory,
            cache: RwLock::new(IndexMap::new()),
            cache_limit: RwLock::new(cache_limit.max(1)),
            default_namespace: None,
            index_residency: RwLock::new(IndexMap::new()),
        }
    }

    /// Declares a default namespace, auto-created with the given dimension
    /// and metric the first time [`Self::get`] is called and it doesn't
    /// already exist.
    #[must_use]
    pub fn with_default_namespace(
        mut self,
        name: impl Into<String>,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Self {
        self.default_namespace = Some((name.into(), dimension, metric));
        self
    }

    /// Changes the cached-namespace capacity, evicting the oldest-accessed
    /// entries (by `last_accessed_at`) until the cache fits.
    pub fn set_cache_limit(&self, limit: usize) {
        let limit = limit.max(1);
        *self.cache_limit.write() = limit;
        let mut cache = self.cache.write();
        while cache.len() > limit {
            evict_oldest(&mut cache);
        }
    }

    /// Creates a new namespace, validating its name and
    /// registering it before opening its backing store. On any failure
    /// after registration, the row is removed to keep the registry and
    /// store consistent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NamespaceInvalidName`] for a malformed name,
    /// [`Error::NamespaceExists`] if already registered, or
    /// [`Error::DimensionMismatch`] if `config.dimension` is out of range
    /// `1..=100_000`.
    pub fn create(&self, name: &str, config: NamespaceConfig, now_ms: u64) -> Result<Arc<Namespace>> {
        validate_name(name)?;
        if !(1..=100_000).contains(&config.dimension) {
            return Err(Error::InvalidFormat(format!(
                "dimension {} out of range 1..=100000",
                config.dimension
            )));
        }

        let row = NamespaceRow {
            name: name.to_string(),
            config: config.clone(),
            stats: NamespaceStats {
                vector_count: 0,
                storage_bytes: 0,
                created_at: now_ms,
                modified_at: now_ms,
                last_accessed_at: now_ms,
            },
        };
        self.registry.insert(row)?;

        let store_name = Namespace::store_name(&self.root, name);
        let store = (self.store_factory)(&store_name);
        let handle = Arc::new(Namespace {
            name: name.to_string(),
            config: RwLock::new(config),
            store,
            index: RwLock::new(None),
            last_accessed_at: AtomicU64::new(now_ms),
        });

        self.insert_cached(name, Arc::clone(&handle));
        tracing::info!(namespace = name, "namespace created");
        Ok(handle)
    }

    /// Resolves a namespace by name: a cache hit returns immediately; a miss
    /// loads the registry row, opens its store, caches it, and bumps
    /// `last_accessed_at`. Auto-creates the declared default namespace
    /// if `name` matches it and it isn't registered yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NamespaceNotFound`] if `name` is not registered and
    /// is not the (unregistered) default namespace.
    pub fn get(&self, name: &str, now_ms: u64) -> Result<Arc<Namespace>> {
        if let Some(handle) = self.cache.read().get(name) {
            handle.touch(now_ms);
            return Ok(self.touch_cached(name, now_ms));
        }

        let Some(row) = self.registry.get(name) else {
            if let Some((default_name, dimension, metric)) = &self.default_namespace {
                if default_name == name {
                    return self.create(name, NamespaceConfig::new(*dimension, *metric), now_ms);
                }
            }
            return Err(Error::NamespaceNotFound(name.to_string()));
        };

        let store_name = Namespace::store_name(&self.root, name);
        let store = (self.store_factory)(&store_name);
        let handle = Arc::new(Namespace {
            name: name.to_string(),
            config: RwLock::new(row.config),
            store,
            index: RwLock::new(None),
            last_accessed_at: AtomicU64::new(now_ms),
        });
        self.insert_cached(name, Arc::clone(&handle));
        Ok(handle)
    }

    /// Updates a namespace's distance metric, invalidating its cached index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NamespaceNotFound`] if `name` is not open/registered.
    pub fn set_distance_metric(&self, name: &str, metric: DistanceMetric, now_ms: u64) -> Result<()> {
        let handle = self.get(name, now_ms)?;
        handle.config.write().distance_metric = metric;
        *handle.index.write() = None;
        self.note_index_dropped(name);
        Ok(())
    }

    /// Updates a namespace's indexing strategy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NamespaceNotFound`] if `name` is not open/registered.
    pub fn set_index_strategy(&self, name: &str, strategy: IndexStrategy, now_ms: u64) -> Result<()> {
        let handle = self.get(name, now_ms)?;
        handle.config.write().index_strategy = strategy;
        if strategy == IndexStrategy::Brute {
            *handle.index.write() = None;
            self.note_index_dropped(name);
        }
        Ok(())
    }

    /// Records that `name`'s index was (re)built at `now_ms`, enforcing an
    /// LRU residency cap of `limit` built indexes across all namespaces.
    /// Returns the name of a displaced namespace (whose in-memory index the
    /// caller must drop) if the cap was exceeded.
    pub fn note_index_built(&self, name: &str, now_ms: u64, limit: usize) -> Option<String> {
        let mut residency = self.index_residency.write();
        residency.shift_remove(name);
        residency.insert(name.to_string(), now_ms);
        if residency.len() > limit.max(1) {
            residency.shift_remove_index(0).map(|(n, _)| n)
        } else {
            None
        }
    }

    /// Drops `name` from index residency bookkeeping; used whenever a
    /// namespace's index is cleared outside of [`Self::note_index_built`]'s
    /// own eviction (metric change, eviction sweep, `clear()`).
    pub fn note_index_dropped(&self, name: &str) {
        self.index_residency.write().shift_remove(name);
    }

    /// Deletes a namespace: evicts it from cache, removes its row, and
    /// drops its backing store handle (a disk-backed factory is
    /// responsible for actually reclaiming storage on drop).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NamespaceNotFound`] if `name` is not registered.
    pub fn delete(&self, name: &str) -> Result<()> {
        self.cache.write().shift_remove(name);
        if self.registry.remove(name) {
            tracing::info!(namespace = name, "namespace deleted");
            Ok(())
        } else {
            Err(Error::NamespaceNotFound(name.to_string()))
        }
    }

    /// Lists every registered namespace name.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.registry.list()
    }

    /// Lists namespace names matching a simple `*`-glob `pattern` (e.g.
    /// `"team-*"`).
    #[must_use]
    pub fn find(&self, pattern: &str) -> Vec<String> {
        self.list()
            .into_iter()
            .filter(|n| glob_match(pattern, n))
            .collect()
    }

    /// Closes every cached namespace handle without touching the registry.
    pub fn close_all(&self) {
        self.cache.write().clear();
    }

    /// Deletes every registered namespace: the destructive reset.
    pub fn delete_all(&self) {
        self.close_all();
        for name in self.registry.list() {
            self.registry.remove(&name);
        }
    }

    /// Persists updated stats for `name` (e.g. after a mutation changes
    /// `vector_count`/`storage_bytes`), bumping `modified_at`.
    pub fn update_stats(&self, name: &str, stats: NamespaceStats) {
        if let Some(mut row) = self.registry.get(name) {
            row.stats = stats;
            self.registry.update(row);
        }
    }

    fn insert_cached(&self, name: &str, handle: Arc<Namespace>) {
        let mut cache = self.cache.write();
        let limit = *self.cache_limit.read();
        if cache.len() >= limit && !cache.contains_key(name) {
            evict_oldest(&mut cache);
        }
        cache.insert(name.to_string(), handle);
    }

    fn touch_cached(&self, name: &str, now_ms: u64) -> Arc<Namespace> {
        let mut cache = self.cache.write();
        let (_, _key, handle) = cache.shift_remove_full(name).expect("checked present above");
        handle.touch(now_ms);
        cache.insert(name.to_string(), Arc::clone(&handle));
        handle
    }
}

fn evict_oldest(cache: &mut IndexMap<String, Arc<Namespace>>) {
    let oldest = cache
        .iter()
        .min_by_key(|(_, handle)| handle.last_accessed_at())
        .map(|(k, _)| k.clone());
    if let Some(key) = oldest {
        cache.shift_remove(&key);
    }
}

/// Minimal `*`-glob matcher (no `?`/character classes), sufficient for
/// `find_namespaces` patterns like `"team-*"` or `"*-staging"`.
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let mut rest = text;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !rest.starts_with(part) {
                return false;
            }
            rest = &rest[part.len()..];
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else if let Some(pos) = rest.find(part) {
            rest = &rest[pos + part.len()..];
        } else {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> NamespaceManager {
        NamespaceManager::new(
            "embervec",
            Box::new(MemoryRegistry::new()),
            memory_store_factory(),
            2,
        )
    }

    #[test]
    fn validate_name_rules() {
        assert!(validate_name("ab").is_err()); // too short
        assert!(validate_name("1abc").is_err()); // must start with letter
        assert!(validate_name("root").is_err()); // reserved
        assert!(validate_name("has space").is_err());
        assert!(validate_name("valid-name_1").is_ok());
    }

    #[test]
    fn create_then_get_returns_same_config() {
        let mgr = manager();
        let config = NamespaceConfig::new(3, DistanceMetric::Cosine);
        mgr.create("docs", config, 0).unwrap();
        let handle = mgr.get("docs", 100).unwrap();
        assert_eq!(handle.config().dimension, 3);
    }

    #[test]
    fn create_duplicate_errors() {
        let mgr = manager();
        mgr.create("docs", NamespaceConfig::new(3, DistanceMetric::Cosine), 0).unwrap();
        let err = mgr
            .create("docs", NamespaceConfig::new(3, DistanceMetric::Cosine), 0)
            .unwrap_err();
        assert_eq!(err.code(), "NAMESPACE_EXISTS");
    }

    #[test]
    fn get_missing_namespace_errors() {
        let mgr = manager();
        let err = mgr.get("missing", 0).unwrap_err();
        assert_eq!(err.code(), "NAMESPACE_NOT_FOUND");
    }

    #[test]
    fn delete_removes_registry_row_and_cache() {
        let mgr = manager();
        mgr.create("docs", NamespaceConfig::new(3, DistanceMetric::Cosine), 0).unwrap();
        mgr.delete("docs").unwrap();
        assert!(mgr.get("docs", 0).is_err());
        assert!(mgr.delete("docs").is_err());
    }

    #[test]
    fn namespace_isolation_across_separate_stores() {
        let mgr = manager();
        mgr.create("a", NamespaceConfig::new(2, DistanceMetric::Euclidean), 0).unwrap();
        mgr.create("b", NamespaceConfig::new(2, DistanceMetric::Euclidean), 0).unwrap();
        let ns_a = mgr.get("a", 0).unwrap();
        let ns_b = mgr.get("b", 0).unwrap();
        ns_a.store
            .put(crate::record::VectorRecord::new("v1".into(), vec![1.0, 2.0], None, 0))
            .unwrap();
        assert!(ns_a.store.exists("v1").unwrap());
        assert!(!ns_b.store.exists("v1").unwrap());
    }

    #[test]
    fn cache_evicts_oldest_beyond_limit() {
        let mgr = manager(); // cache_limit = 2
        mgr.create("a", NamespaceConfig::new(2, DistanceMetric::Cosine), 0).unwrap();
        mgr.create("b", NamespaceConfig::new(2, DistanceMetric::Cosine), 10).unwrap();
        mgr.create("c", NamespaceConfig::new(2, DistanceMetric::Cosine), 20).unwrap();
        assert_eq!(mgr.cache.read().len(), 2);
        assert!(!mgr.cache.read().contains_key("a"));
    }

    #[test]
    fn find_matches_glob_pattern() {
        let mgr = manager();
        mgr.create("team-alpha", NamespaceConfig::new(2, DistanceMetric::Cosine), 0).unwrap();
        mgr.create("team-beta", NamespaceConfig::new(2, DistanceMetric::Cosine), 0).unwrap();
        mgr.create("other", NamespaceConfig::new(2, DistanceMetric::Cosine), 0).unwrap();
        let mut found = mgr.find("team-*");
        found.sort();
        assert_eq!(found, vec!["team-alpha".to_string(), "team-beta".to_string()]);
    }

    #[test]
    fn delete_all_clears_registry() {
        let mgr = manager();
        mgr.create("a", NamespaceConfig::new(2, DistanceMetric::Cosine), 0).unwrap();
        mgr.create("b", NamespaceConfig::new(2, DistanceMetric::Cosine), 0).unwrap();
        mgr.delete_all();
        assert!(mgr.list().is_empty());
    }
}
