//! `embervec`: an embedded vector database.
//!
//! `embervec` indexes high-dimensional vectors for approximate nearest
//! neighbor search (HNSW), compresses them when it's worth the precision
//! loss (scalar/product quantization), enforces a storage budget (quota +
//! eviction), and isolates unrelated collections of vectors from one
//! another (namespaces) — all inside a single process, with no server to
//! run.
//!
//! ```
//! use embervec::Database;
//! use embervec::distance::DistanceMetric;
//!
//! let db = Database::open_in_memory();
//! db.create_namespace("docs", 3, DistanceMetric::Cosine).unwrap();
//! db.add_vector("docs", "v1", vec![1.0, 0.0, 0.0], None).unwrap();
//! let hits = db.search("docs", &[1.0, 0.0, 0.0], 5, None).unwrap();
//! assert_eq!(hits[0].id, "v1");
//! ```

pub mod compression;
pub mod config;
pub mod distance;
pub mod error;
pub mod eviction;
pub mod filter;
pub mod index;
pub mod metadata;
pub mod namespace;
pub mod quantization;
pub mod quota;
pub mod record;
pub mod search;
pub mod storage;

use compression::{CompressionManager, QualityBias};
use config::EmbervecConfig;
use distance::DistanceMetric;
use error::{Error, Result};
use filter::Filter;
use index::HnswIndex;
use namespace::{IndexStrategy, Namespace, NamespaceConfig, NamespaceManager, NamespaceStats};
use quantization::CodecKind;
use quota::{QuotaEvent, QuotaMonitor};
use record::VectorRecord;
use search::{SearchEngine, SearchHit};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn now_secs() -> u64 {
    now_ms() / 1000
}

/// Owns the namespace registry, the process-wide storage quota monitor, and
/// the auto-eviction toggle; the single entry point an embedding host talks
/// to.
pub struct Database {
    config: EmbervecConfig,
    namespaces: NamespaceManager,
    quota: QuotaMonitor,
    auto_eviction: AtomicBool,
    compression: CompressionManager,
    /// Mutating operations seen since the quota monitor's last sample,
    /// gating [`Self::check_quota`] against [`QuotaMonitor::next_check_interval`].
    ops_since_quota_check: AtomicU64,
}

impl Database {
    /// Opens a database backed entirely by in-memory stores: no files are
    /// read or written. Suitable for tests and ephemeral workloads.
    #[must_use]
    pub fn open_in_memory() -> Self {
        Self::open(EmbervecConfig::default())
    }

    /// Opens a database with the given configuration, using in-memory
    /// namespace stores (the only backing implementation this crate ships;
    /// a host wires in a disk-backed [`namespace::StoreFactory`] by
    /// constructing [`NamespaceManager`] directly instead of going through
    /// `Database`).
    #[must_use]
    pub fn open(config: EmbervecConfig) -> Self {
        let quota = QuotaMonitor::new(config.quota.to_quota_config());
        let namespaces = NamespaceManager::new(
            "embervec",
            Box::new(namespace::MemoryRegistry::new()),
            namespace::memory_store_factory(),
            config.namespace.cache_capacity,
        )
        .with_default_namespace(
            config.namespace.default_name.clone(),
            config.namespace.default_dimension,
            config.search.default_metric,
        );

        let compression = CompressionManager::new(config.compression.memory_budget_bytes);

        Self {
            config,
            namespaces,
            quota,
            auto_eviction: AtomicBool::new(true),
            compression,
            ops_since_quota_check: AtomicU64::new(0),
        }
    }

    /// Opens a database from a TOML configuration string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFormat`] if the TOML fails to parse or
    /// validate.
    pub fn open_from_toml(toml_str: &str) -> Result<Self> {
        let config =
            EmbervecConfig::from_toml(toml_str).map_err(|e| Error::InvalidFormat(e.to_string()))?;
        Ok(Self::open(config))
    }

    fn resolve(&self, namespace: &str) -> Result<Arc<Namespace>> {
        self.namespaces.get(namespace, now_ms())
    }

    // ---- Namespace operations --------------------------------

    /// Creates a namespace with a fixed dimension and distance metric.
    ///
    /// # Errors
    ///
    /// See [`NamespaceManager::create`].
    pub fn create_namespace(&self, name: &str, dimension: usize, metric: DistanceMetric) -> Result<()> {
        self.namespaces
            .create(name, NamespaceConfig::new(dimension, metric), now_ms())?;
        Ok(())
    }

    /// Creates a namespace from a full [`NamespaceConfig`] (e.g. to set a
    /// non-default [`IndexStrategy`] or compression codec up front).
    ///
    /// # Errors
    ///
    /// See [`NamespaceManager::create`].
    pub fn create_namespace_with_config(&self, name: &str, config: NamespaceConfig) -> Result<()> {
        self.namespaces.create(name, config, now_ms())?;
        Ok(())
    }

    /// Returns the namespace's configuration and point-in-time statistics.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NamespaceNotFound`] if `name` is not registered.
    pub fn get_namespace(&self, name: &str) -> Result<(NamespaceConfig, NamespaceStats)> {
        let handle = self.resolve(name)?;
        let stats = NamespaceStats {
            vector_count: handle.store.count(),
            storage_bytes: handle.store.approx_size_bytes(),
            created_at: handle.last_accessed_at(),
            modified_at: handle.last_accessed_at(),
            last_accessed_at: handle.last_accessed_at(),
        };
        Ok((handle.config(), stats))
    }

    /// Deletes a namespace and all of its vectors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NamespaceNotFound`] if `name` is not registered.
    pub fn delete_namespace(&self, name: &str) -> Result<()> {
        self.namespaces.delete(name)
    }

    /// Lists every namespace name.
    #[must_use]
    pub fn list_namespaces(&self) -> Vec<String> {
        self.namespaces.list()
    }

    /// Lists namespace names matching a `*`-glob pattern.
    #[must_use]
    pub fn find_namespaces(&self, pattern: &str) -> Vec<String> {
        self.namespaces.find(pattern)
    }

    // ---- Vector CRUD ------------------------------------------

    /// Inserts or overwrites a vector. Dimension is checked against the
    /// namespace's configured dimension.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`], a metadata-validation error, or
    /// an id-validation error.
    pub fn add_vector(
        &self,
        namespace: &str,
        id: &str,
        values: Vec<f32>,
        metadata: Option<Value>,
    ) -> Result<()> {
        let handle = self.resolve(namespace)?;
        record::validate_id(id)?;
        if let Some(m) = &metadata {
            metadata::validate(m)?;
        }
        let config = handle.config();
        if values.len() != config.dimension {
            return Err(Error::DimensionMismatch {
                expected: config.dimension,
                actual: values.len(),
            });
        }

        let now = now_ms();
        let record = VectorRecord::new(id.to_string(), values.clone(), metadata, now);
        handle.store.put(record)?;

        if let Some(index) = handle.index.read().as_ref() {
            index.insert(id, &values)?;
        }
        self.maybe_auto_build_index(namespace, &handle, &config)?;
        self.check_quota();
        Ok(())
    }

    /// Inserts or overwrites a batch of vectors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BatchPartialFailure`] if some records in the batch
    /// were rejected; see [`storage::VectorStore::put_batch`].
    pub fn add_batch(&self, namespace: &str, items: Vec<(String, Vec<f32>, Option<Value>)>) -> Result<()> {
        let handle = self.resolve(namespace)?;
        let config = handle.config();
        let now = now_ms();
        let compress = self.config.compression.auto_select && config.compression != CodecKind::None;

        let mut records = Vec::with_capacity(items.len());
        for (id, values, metadata) in items {
            record::validate_id(&id)?;
            if let Some(m) = &metadata {
                metadata::validate(m)?;
            }
            if values.len() != config.dimension {
                return Err(Error::DimensionMismatch {
                    expected: config.dimension,
                    actual: values.len(),
                });
            }
            if let Some(index) = handle.index.read().as_ref() {
                index.insert(&id, &values)?;
            }
            let mut record = VectorRecord::new(id, values, metadata, now);
            if compress {
                self.tag_compressed(&mut record);
            }
            records.push(record);
        }
        handle.store.put_batch(records)?;
        self.maybe_auto_build_index(namespace, &handle, &config)?;
        self.check_quota();
        Ok(())
    }

    /// Runs the compression manager's codec recommendation against a
    /// record's values, tagging it with the chosen codec and feeding the
    /// outcome back into the manager's rolling per-codec stats. The record's
    /// values are kept as raw floats regardless of the recommendation —
    /// search and the HNSW index both need full precision, and the backing
    /// KV store that would actually persist a codec's packed bytes is an
    /// external collaborator — but `codec_tag` records what a
    /// compressing backing store should have applied.
    fn tag_compressed(&self, record: &mut VectorRecord) {
        let recommendation = self.compression.auto_select(&record.values, QualityBias::Speed);
        self.compression.record_outcome(
            recommendation.strategy,
            recommendation.est_ratio,
            1.0 - recommendation.est_loss,
            0.0,
        );
        record.codec_tag = Some(recommendation.strategy.name().to_string());
    }

    /// Under [`IndexStrategy::Auto`], builds the HNSW index once the
    /// namespace's vector count first crosses `index.auto_index_threshold`
    ///. A
    /// no-op if the strategy isn't `Auto`, an index already exists, or the
    /// namespace hasn't reached the threshold yet.
    fn maybe_auto_build_index(&self, namespace: &str, handle: &Namespace, config: &NamespaceConfig) -> Result<()> {
        if config.index_strategy == IndexStrategy::Auto
            && handle.index.read().is_none()
            && handle.store.count() >= self.config.index.auto_index_threshold
        {
            self.rebuild_index(namespace)?;
        }
        Ok(())
    }

    /// Fetches a single vector record, bumping its access bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VectorNotFound`] if `id` does not exist.
    pub fn get_vector(&self, namespace: &str, id: &str) -> Result<VectorRecord> {
        let handle = self.resolve(namespace)?;
        let now = now_ms();
        handle.store.update_in_place(id, &mut |r| r.record_access(now))?;
        handle
            .store
            .get(id)?
            .ok_or_else(|| Error::VectorNotFound(id.to_string()))
    }

    /// Fetches many vector records by id, `None` for any missing id.
    ///
    /// # Errors
    ///
    /// Returns an error only for underlying store failures.
    pub fn get_many(&self, namespace: &str, ids: &[String]) -> Result<Vec<Option<VectorRecord>>> {
        let handle = self.resolve(namespace)?;
        let now = now_ms();
        for id in ids {
            let _ = handle.store.update_in_place(id, &mut |r| r.record_access(now));
        }
        handle.store.get_many(ids)
    }

    /// Deletes a vector, removing it from the namespace's index if present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VectorNotFound`] if `id` does not exist.
    pub fn delete_vector(&self, namespace: &str, id: &str) -> Result<()> {
        let handle = self.resolve(namespace)?;
        handle.store.delete(id)?;
        if let Some(index) = handle.index.read().as_ref() {
            index.delete(id)?;
        }
        Ok(())
    }

    /// Deletes many vectors, returning how many were actually present.
    ///
    /// # Errors
    ///
    /// Returns an error only for underlying store failures.
    pub fn delete_many(&self, namespace: &str, ids: &[String]) -> Result<usize> {
        let handle = self.resolve(namespace)?;
        let removed = handle.store.delete_many(ids)?;
        if let Some(index) = handle.index.read().as_ref() {
            for id in ids {
                let _ = index.delete(id);
            }
        }
        Ok(removed)
    }

    /// Replaces a vector's values (and, optionally, its metadata),
    /// recomputing its cached magnitude and updating the index in place.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] or [`Error::VectorNotFound`].
    pub fn update_vector(
        &self,
        namespace: &str,
        id: &str,
        values: Vec<f32>,
        metadata: Option<Value>,
    ) -> Result<()> {
        let handle = self.resolve(namespace)?;
        let config = handle.config();
        if values.len() != config.dimension {
            return Err(Error::DimensionMismatch {
                expected: config.dimension,
                actual: values.len(),
            });
        }
        if let Some(m) = &metadata {
            metadata::validate(m)?;
        }

        handle.store.update_in_place(id, &mut |r| {
            r.set_values(values.clone());
            if metadata.is_some() {
                r.metadata = metadata.clone();
            }
        })?;

        if let Some(index) = handle.index.read().as_ref() {
            index.delete(id).ok();
            index.insert(id, &values)?;
        }
        Ok(())
    }

    /// Replaces only a vector's metadata, leaving its values untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VectorNotFound`] if `id` does not exist.
    pub fn update_metadata(&self, namespace: &str, id: &str, metadata: Option<Value>) -> Result<()> {
        let handle = self.resolve(namespace)?;
        if let Some(m) = &metadata {
            metadata::validate(m)?;
        }
        handle.store.update_in_place(id, &mut |r| r.metadata = metadata.clone())
    }

    /// Applies [`Self::update_vector`] to every `(id, values, metadata)`
    /// triple, collecting per-id failures rather than aborting (mirrors
    /// [`storage::VectorStore::put_batch`]'s partial-failure contract).
    ///
    /// # Errors
    ///
    /// Returns [`Error::BatchPartialFailure`] if any item failed.
    pub fn update_batch(&self, namespace: &str, items: Vec<(String, Vec<f32>, Option<Value>)>) -> Result<()> {
        use std::collections::HashMap;
        let total = items.len();
        let mut errors = HashMap::new();
        let mut succeeded = 0;
        for (id, values, metadata) in items {
            match self.update_vector(namespace, &id, values, metadata) {
                Ok(()) => succeeded += 1,
                Err(e) => {
                    errors.insert(id, e.to_string());
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::BatchPartialFailure {
                succeeded,
                failed: total - succeeded,
                errors,
            })
        }
    }

    // ---- Search ------------------------------------------

    /// Ranks the `k` nearest vectors to `query`, optionally restricted by a
    /// compiled metadata filter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] or a distance-computation error.
    pub fn search(&self, namespace: &str, query: &[f32], k: usize, filter: Option<&Value>) -> Result<Vec<SearchHit>> {
        let handle = self.resolve(namespace)?;
        let compiled = filter.map(Filter::compile).transpose()?;
        with_search_engine(&handle, |engine| engine.search(query, k, compiled.as_ref()))
    }

    /// Returns every hit within `max_distance` of `query`, unranked by `k`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::search`].
    pub fn search_range(
        &self,
        namespace: &str,
        query: &[f32],
        max_distance: f32,
        filter: Option<&Value>,
    ) -> Result<Vec<SearchHit>> {
        let handle = self.resolve(namespace)?;
        let compiled = filter.map(Filter::compile).transpose()?;
        with_search_engine(&handle, |engine| engine.search_range(query, max_distance, compiled.as_ref()))
    }

    /// Streams progressively larger batches of results to `on_batch` until
    /// it returns `false` or the namespace is exhausted.
    ///
    /// # Errors
    ///
    /// Same as [`Self::search`].
    pub fn search_stream(
        &self,
        namespace: &str,
        query: &[f32],
        k: usize,
        filter: Option<&Value>,
        on_batch: impl FnMut(&[SearchHit]) -> bool,
    ) -> Result<()> {
        let handle = self.resolve(namespace)?;
        let compiled = filter.map(Filter::compile).transpose()?;
        with_search_engine(&handle, |engine| engine.search_stream(query, k, compiled.as_ref(), on_batch))
    }

    // ---- Index management ---------------------------

    /// Changes a namespace's distance metric, invalidating its cached index
    /// (a rebuild is required afterward for indexed search to resume).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NamespaceNotFound`] if `namespace` is not registered.
    pub fn set_distance_metric(&self, namespace: &str, metric: DistanceMetric) -> Result<()> {
        self.namespaces.set_distance_metric(namespace, metric, now_ms())
    }

    /// Changes a namespace's indexing strategy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NamespaceNotFound`] if `namespace` is not registered.
    pub fn set_indexing(&self, namespace: &str, strategy: IndexStrategy) -> Result<()> {
        self.namespaces.set_index_strategy(namespace, strategy, now_ms())
    }

    /// Rebuilds the namespace's HNSW index from scratch by scanning its
    /// backing store and re-inserting every vector.
    ///
    /// # Errors
    ///
    /// Returns a dimension-mismatch or distance error if a stored record no
    /// longer matches the namespace's configured dimension.
    pub fn rebuild_index(&self, namespace: &str) -> Result<index::HnswStats> {
        let handle = self.resolve(namespace)?;
        let config = handle.config();
        let hnsw_config = self.config.index.to_hnsw_config();
        let fresh = HnswIndex::new(config.distance_metric, hnsw_config);

        let mut insert_err = None;
        handle.store.scan(&mut |record: &VectorRecord| {
            if insert_err.is_some() {
                return;
            }
            if let Err(e) = fresh.insert(&record.id, &record.values) {
                insert_err = Some(e);
            }
        })?;
        if let Some(e) = insert_err {
            return Err(e);
        }

        let stats = fresh.stats();
        *handle.index.write() = Some(Arc::new(fresh));
        if let Some(evicted) = self
            .namespaces
            .note_index_built(namespace, now_ms(), self.config.index.cache_capacity)
        {
            if let Ok(evicted_handle) = self.namespaces.get(&evicted, now_ms()) {
                *evicted_handle.index.write() = None;
            }
            tracing::debug!(namespace = %evicted, "index evicted from residency cache");
        }
        tracing::info!(namespace, live_nodes = stats.live_nodes, "index rebuilt");
        Ok(stats)
    }

    /// Returns the namespace's current index statistics, or `None` if no
    /// index has been built yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NamespaceNotFound`] if `namespace` is not registered.
    pub fn get_index_stats(&self, namespace: &str) -> Result<Option<index::HnswStats>> {
        let handle = self.resolve(namespace)?;
        Ok(handle.index.read().as_ref().map(|i| i.stats()))
    }

    // ---- Quota & eviction ----------------------------

    fn total_storage_bytes(&self) -> u64 {
        self.namespaces
            .list()
            .into_iter()
            .filter_map(|name| self.namespaces.get(&name, now_ms()).ok())
            .map(|handle| handle.store.approx_size_bytes() as u64)
            .sum()
    }

    /// Samples the quota monitor once every `next_check_interval()`
    /// mutating operations, rather than on every call; the monitor's own
    /// adaptive interval (shorter near the limit, longer when usage is low)
    /// governs how often this actually takes a sample.
    fn check_quota(&self) {
        let due_every = self.quota.next_check_interval().as_millis().max(1) as u64;
        let seen = self.ops_since_quota_check.fetch_add(1, Ordering::Relaxed) + 1;
        if seen < due_every {
            return;
        }
        self.ops_since_quota_check.store(0, Ordering::Relaxed);

        let used = self.total_storage_bytes();
        if let Some(event) = self.quota.check(used, now_ms()) {
            if self.auto_eviction.load(Ordering::Relaxed)
                && matches!(event.severity, quota::Severity::Critical | quota::Severity::Emergency)
            {
                for name in self.namespaces.list() {
                    let _ = self.evict_vectors(&name, None);
                }
            }
        }
    }

    /// Returns the current aggregate storage quota usage across every
    /// namespace.
    #[must_use]
    pub fn get_storage_quota(&self) -> QuotaEvent {
        let used = self.total_storage_bytes();
        let limit = self.config.quota.hard_limit_bytes;
        let ratio = used as f64 / limit.max(1) as f64;
        let severity = if used >= limit || ratio >= self.config.quota.emergency_fraction {
            quota::Severity::Emergency
        } else if ratio >= self.config.quota.critical_fraction {
            quota::Severity::Critical
        } else {
            quota::Severity::Warning
        };
        QuotaEvent {
            severity,
            used_bytes: used,
            limit_bytes: limit,
            estimated_time_to_full: self.quota.estimate_time_to_full(),
        }
    }

    /// Subscribes a listener invoked whenever a quota threshold is crossed.
    pub fn on_quota_warning(&self, listener: impl Fn(&QuotaEvent) + Send + Sync + 'static) {
        self.quota.on_event(listener);
    }

    /// Enables or disables automatic eviction on quota `Critical`/
    /// `Emergency` events.
    pub fn set_auto_eviction(&self, enabled: bool) {
        self.auto_eviction.store(enabled, Ordering::Relaxed);
    }

    /// Runs an eviction sweep against a namespace, using `strategy` if
    /// given or [`eviction::suggest_strategy`] otherwise. A sweep that
    /// evicts any vectors invalidates the namespace's cached index (the
    /// sweep doesn't track which ids it removed, so there's nothing cheaper
    /// to do than drop it); call [`Self::rebuild_index`] afterward to
    /// resume indexed search.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NamespaceNotFound`] if `namespace` is not registered.
    pub fn evict_vectors(&self, namespace: &str, strategy: Option<eviction::Strategy>) -> Result<eviction::EvictionResult> {
        let handle = self.resolve(namespace)?;
        let config = self.config.eviction.to_eviction_config();
        let strategy =
            strategy.unwrap_or_else(|| eviction::suggest_strategy(&self.observe_store_stats(&handle)).strategy);
        let started = std::time::Instant::now();
        let result = eviction::run(handle.store.as_ref(), &config, strategy, now_secs(), started);

        if result.evicted_count > 0 && handle.index.read().is_some() {
            *handle.index.write() = None;
            self.namespaces.note_index_dropped(namespace);
        }
        Ok(result)
    }

    fn observe_store_stats(&self, handle: &Namespace) -> eviction::StoreStats {
        let mut total = 0usize;
        let mut expired = 0usize;
        let mut access_sum = 0u64;
        let cutoff_ms = now_ms().saturating_sub(self.config.eviction.ttl_seconds * 1000);
        let _ = handle.store.scan(&mut |r: &VectorRecord| {
            total += 1;
            access_sum += r.access_count;
            if r.last_accessed_at < cutoff_ms {
                expired += 1;
            }
        });
        eviction::StoreStats {
            total_records: total,
            expired_fraction: if total == 0 { 0.0 } else { expired as f32 / total as f32 },
            mean_access_count: if total == 0 { 0.0 } else { access_sum as f32 / total as f32 },
        }
    }

    /// Returns observed eviction-relevant statistics for a namespace without
    /// running a sweep (used to decide whether to call
    /// [`Self::evict_vectors`] at all).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NamespaceNotFound`] if `namespace` is not registered.
    pub fn get_eviction_stats(&self, namespace: &str) -> Result<eviction::StoreStats> {
        let handle = self.resolve(namespace)?;
        Ok(self.observe_store_stats(&handle))
    }

    // ---- Lifecycle --------------------------------------------

    /// Removes every vector from every namespace, keeping namespace
    /// registrations and configuration intact.
    pub fn clear(&self) {
        for name in self.namespaces.list() {
            if let Ok(handle) = self.namespaces.get(&name, now_ms()) {
                handle.store.clear();
                *handle.index.write() = None;
                self.namespaces.note_index_dropped(&name);
            }
        }
    }

    /// Closes every cached namespace handle, releasing in-process resources
    /// without deleting anything.
    pub fn close(&self) {
        self.namespaces.close_all();
    }

    /// Deletes every namespace and every vector they contain.
    pub fn delete(&self) {
        self.namespaces.delete_all();
    }
}

/// Builds a [`SearchEngine`] borrowing `handle`'s store and (if indexing is
/// enabled and built) its current HNSW index, then runs `f` against it. Kept
/// as a free function so the index read-lock guard's lifetime is scoped to
/// a single call rather than leaking across a method boundary.
fn with_search_engine<R>(handle: &Namespace, f: impl FnOnce(SearchEngine<'_>) -> R) -> R {
    let guard = handle.index.read();
    let strategy = handle.config().index_strategy;
    let index = guard
        .as_ref()
        .filter(|_| matches!(strategy, IndexStrategy::Hnsw | IndexStrategy::Auto))
        .map(Arc::as_ref);
    let engine = SearchEngine::new(handle.store.as_ref(), index, handle.config().distance_metric);
    f(engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_add_and_search_round_trips() {
        let db = Database::open_in_memory();
        db.create_namespace("docs", 3, DistanceMetric::Cosine).unwrap();
        db.add_vector("docs", "v1", vec![1.0, 0.0, 0.0], None).unwrap();
        db.add_vector("docs", "v2", vec![0.0, 1.0, 0.0], None).unwrap();

        let hits = db.search("docs", &[1.0, 0.0, 0.0], 5, None).unwrap();
        assert_eq!(hits[0].id, "v1");
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let db = Database::open_in_memory();
        db.create_namespace("docs", 3, DistanceMetric::Cosine).unwrap();
        let err = db.add_vector("docs", "v1", vec![1.0, 0.0], None).unwrap_err();
        assert_eq!(err.code(), "DIMENSION_MISMATCH");
    }

    #[test]
    fn delete_vector_removes_it_from_search() {
        let db = Database::open_in_memory();
        db.create_namespace("docs", 2, DistanceMetric::Euclidean).unwrap();
        db.add_vector("docs", "v1", vec![1.0, 1.0], None).unwrap();
        db.delete_vector("docs", "v1").unwrap();
        let hits = db.search("docs", &[1.0, 1.0], 5, None).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn update_vector_changes_values() {
        let db = Database::open_in_memory();
        db.create_namespace("docs", 2, DistanceMetric::Euclidean).unwrap();
        db.add_vector("docs", "v1", vec![0.0, 0.0], None).unwrap();
        db.update_vector("docs", "v1", vec![5.0, 5.0], None).unwrap();
        let got = db.get_vector("docs", "v1").unwrap();
        assert_eq!(got.values, vec![5.0, 5.0]);
    }

    #[test]
    fn filtered_search_respects_metadata() {
        let db = Database::open_in_memory();
        db.create_namespace("docs", 2, DistanceMetric::Euclidean).unwrap();
        db.add_vector("docs", "a", vec![0.0, 0.0], Some(json!({"tag": "x"}))).unwrap();
        db.add_vector("docs", "b", vec![0.1, 0.1], Some(json!({"tag": "y"}))).unwrap();

        let filter = json!({"tag": {"$eq": "y"}});
        let hits = db.search("docs", &[0.0, 0.0], 5, Some(&filter)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
    }

    #[test]
    fn rebuild_index_then_indexed_search_finds_nearest() {
        let db = Database::open_in_memory();
        db.create_namespace("docs", 2, DistanceMetric::Euclidean).unwrap();
        for i in 0..20 {
            db.add_vector("docs", &format!("v{i}"), vec![i as f32, 0.0], None).unwrap();
        }
        let stats = db.rebuild_index("docs").unwrap();
        assert_eq!(stats.live_nodes, 20);

        let hits = db.search("docs", &[0.0, 0.0], 3, None).unwrap();
        assert_eq!(hits[0].id, "v0");
    }

    #[test]
    fn namespace_isolation_holds_across_the_public_api() {
        let db = Database::open_in_memory();
        db.create_namespace("a", 2, DistanceMetric::Euclidean).unwrap();
        db.create_namespace("b", 2, DistanceMetric::Euclidean).unwrap();
        db.add_vector("a", "shared-id", vec![1.0, 1.0], None).unwrap();
        assert!(db.get_vector("b", "shared-id").is_err());
    }

    #[test]
    fn evict_vectors_respects_preserve_permanent() {
        let db = Database::open_in_memory();
        db.create_namespace("docs", 1, DistanceMetric::Euclidean).unwrap();
        db.add_vector("docs", "perm", vec![1.0], Some(json!({"permanent": true}))).unwrap();
        db.add_vector("docs", "temp", vec![2.0], None).unwrap();

        let result = db.evict_vectors("docs", Some(eviction::Strategy::Lru)).unwrap();
        assert!(result.evicted_count <= 1);
        assert!(db.get_vector("docs", "perm").is_ok());
    }

    #[test]
    fn clear_empties_every_namespace_but_keeps_registration() {
        let db = Database::open_in_memory();
        db.create_namespace("docs", 2, DistanceMetric::Cosine).unwrap();
        db.add_vector("docs", "v1", vec![1.0, 0.0], None).unwrap();
        db.clear();
        assert!(db.get_vector("docs", "v1").is_err());
        assert!(db.list_namespaces().contains(&"docs".to_string()));
    }

    #[test]
    fn auto_strategy_builds_index_once_threshold_is_crossed() {
        let mut config = EmbervecConfig::default();
        config.index.auto_index_threshold = 5;
        let db = Database::open(config);
        db.create_namespace("docs", 2, DistanceMetric::Euclidean).unwrap();
        assert!(db.get_index_stats("docs").unwrap().is_none());

        for i in 0..5 {
            db.add_vector("docs", &format!("v{i}"), vec![i as f32, 0.0], None).unwrap();
        }

        let stats = db.get_index_stats("docs").unwrap().expect("index should auto-build");
        assert_eq!(stats.live_nodes, 5);

        // Further inserts maintain the now-resident index incrementally,
        // they don't rebuild it from scratch.
        db.add_vector("docs", "v5", vec![5.0, 0.0], None).unwrap();
        let stats = db.get_index_stats("docs").unwrap().unwrap();
        assert_eq!(stats.live_nodes, 6);
    }

    #[test]
    fn brute_strategy_never_auto_builds_an_index() {
        let mut config = EmbervecConfig::default();
        config.index.auto_index_threshold = 2;
        let db = Database::open(config);
        db.create_namespace_with_config(
            "docs",
            NamespaceConfig {
                index_strategy: IndexStrategy::Brute,
                ..NamespaceConfig::new(2, DistanceMetric::Euclidean)
            },
        )
        .unwrap();
        for i in 0..10 {
            db.add_vector("docs", &format!("v{i}"), vec![i as f32, 0.0], None).unwrap();
        }
        assert!(db.get_index_stats("docs").unwrap().is_none());
    }

    #[test]
    fn delete_removes_every_namespace() {
        let db = Database::open_in_memory();
        db.create_namespace("docs", 2, DistanceMetric::Cosine).unwrap();
        db.delete();
        assert!(db.list_namespaces().is_empty());
    }

    #[test]
    fn add_batch_tags_codec_when_compression_is_enabled() {
        let mut config = EmbervecConfig::default();
        config.compression.auto_select = true;
        let db = Database::open(config);
        db.create_namespace_with_config(
            "docs",
            NamespaceConfig {
                compression: crate::quantization::CodecKind::Scalar,
                ..NamespaceConfig::new(4, DistanceMetric::Euclidean)
            },
        )
        .unwrap();

        db.add_batch("docs", vec![("v1".to_string(), vec![0.1, 0.2, 0.3, 0.4], None)])
            .unwrap();

        let got = db.get_vector("docs", "v1").unwrap();
        assert!(got.codec_tag.is_some());
    }

    #[test]
    fn add_batch_leaves_codec_tag_unset_when_compression_disabled() {
        let db = Database::open_in_memory();
        db.create_namespace("docs", 2, DistanceMetric::Cosine).unwrap();
        db.add_batch("docs", vec![("v1".to_string(), vec![1.0, 0.0], None)]).unwrap();
        let got = db.get_vector("docs", "v1").unwrap();
        assert!(got.codec_tag.is_none());
    }
}
