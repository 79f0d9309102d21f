//! The search engine: dispatches a query to the cheapest path
//! that can answer it correctly, with optional parallel/GPU-backed
//! brute-force fallbacks and a progressive streaming mode.
//!
//! A filtered query over-fetches candidates (`max(k*4, k+10)`) before
//! filtering down to `k`, since the filter can reject a large fraction of
//! the nearest raw matches. Every metric's distance is normalized through
//! [`DistanceMetric::score_from_distance`] first, so results always sort by
//! a single descending "higher is more similar" score regardless of metric.

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::index::HnswIndex;
use crate::record::VectorRecord;
use crate::storage::VectorStore;

/// A single ranked search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Matching record id.
    pub id: String,
    /// Raw distance under the active metric (lower is closer, except for
    /// `Dot`, where the raw value is itself the similarity).
    pub distance: f32,
    /// Normalized score; higher is always more similar, usable to compare
    /// hits across metrics.
    pub score: f32,
}

/// Above this candidate count, brute-force scans dispatch through the
/// configured [`ParallelExecutor`] instead of a plain sequential loop.
pub const PARALLEL_THRESHOLD: usize = 1_000;

/// Above this candidate count, a brute-force scan prefers a configured
/// [`GpuBackend`] over the (possibly parallel) CPU path, if one is
/// available and reports itself ready.
pub const GPU_THRESHOLD: usize = 10_000;

/// Computes distances from one query to many records, off the single
/// sequential path, when a backing store has enough candidates to make it
/// worthwhile. The default [`SequentialExecutor`] just loops;
/// a host embedding `embervec` into a thread-pooled application can
/// substitute its own.
pub trait ParallelExecutor: Send + Sync {
    /// Returns `(id, distance)` for every record, in arbitrary order.
    ///
    /// # Errors
    ///
    /// Returns an error if any per-record distance computation fails (e.g.
    /// a dimension mismatch, which should not happen for records already
    /// accepted into the namespace, but is surfaced rather than silently
    /// skipped).
    fn map_distances(
        &self,
        query: &[f32],
        metric: DistanceMetric,
        records: &[VectorRecord],
    ) -> Result<Vec<(String, f32)>>;
}

/// Single-threaded reference [`ParallelExecutor`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialExecutor;

impl ParallelExecutor for SequentialExecutor {
    fn map_distances(
        &self,
        query: &[f32],
        metric: DistanceMetric,
        records: &[VectorRecord],
    ) -> Result<Vec<(String, f32)>> {
        records
            .iter()
            .map(|r| Ok((r.id.clone(), metric.distance(query, &r.values)?)))
            .collect()
    }
}

/// Offloads batch distance computation to an accelerator. No implementation
/// ships in this crate; a host links one in when a GPU is available and
/// wires it through [`crate::search::SearchEngine::with_gpu_backend`].
pub trait GpuBackend: Send + Sync {
    /// Returns true if the backend is initialized and ready to accept work.
    fn is_available(&self) -> bool;

    /// Computes `(id, distance)` for every vector against `query`.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is unavailable or a kernel launch
    /// fails.
    fn batch_distance(
        &self,
        query: &[f32],
        metric: DistanceMetric,
        records: &[VectorRecord],
    ) -> Result<Vec<(String, f32)>>;
}

fn finite_or_internal(id: &str, distance: f32) -> Result<f32> {
    if distance.is_finite() {
        Ok(distance)
    } else {
        Err(Error::Internal(format!(
            "non-finite distance computed for record '{id}'"
        )))
    }
}

fn to_hits(metric: DistanceMetric, pairs: Vec<(String, f32)>) -> Result<Vec<SearchHit>> {
    pairs
        .into_iter()
        .map(|(id, distance)| {
            let distance = finite_or_internal(&id, distance)?;
            Ok(SearchHit {
                score: metric.score_from_distance(distance),
                id,
                distance,
            })
        })
        .collect()
}

fn sort_and_truncate(mut hits: Vec<SearchHit>, k: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    hits.truncate(k);
    hits
}

/// Coordinates a query against a store, an optional proximity index, and
/// optional acceleration backends.
pub struct SearchEngine<'a> {
    store: &'a dyn VectorStore,
    index: Option<&'a HnswIndex>,
    metric: DistanceMetric,
    executor: Box<dyn ParallelExecutor + 'a>,
    gpu: Option<&'a dyn GpuBackend>,
}

impl<'a> SearchEngine<'a> {
    /// Builds an engine over `store`, using `index` for unfiltered ANN
    /// queries when present, and a plain sequential brute-force executor
    /// otherwise.
    #[must_use]
    pub fn new(store: &'a dyn VectorStore, index: Option<&'a HnswIndex>, metric: DistanceMetric) -> Self {
        Self {
            store,
            index,
            metric,
            executor: Box::new(SequentialExecutor),
            gpu: None,
        }
    }

    /// Overrides the brute-force executor (e.g. with a thread-pooled one).
    #[must_use]
    pub fn with_executor(mut self, executor: impl ParallelExecutor + 'a) -> Self {
        self.executor = Box::new(executor);
        self
    }

    /// Wires in a GPU backend for large brute-force scans.
    #[must_use]
    pub fn with_gpu_backend(mut self, gpu: &'a dyn GpuBackend) -> Self {
        self.gpu = Some(gpu);
        self
    }

    /// Returns the top `k` matches for `query`, optionally restricted to
    /// records whose metadata satisfies `filter`.
    ///
    /// Dispatch ladder: a filter forces a full scan (the index
    /// has no metadata awareness), post-filtering over-fetched candidates;
    /// without a filter, the proximity index is used if present, else a
    /// brute-force scan dispatched through the parallel/GPU executors once
    /// the candidate count crosses their thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if `query`'s length does not
    /// match records in the store, or [`Error::Internal`] if any distance
    /// computation produces a non-finite value.
    pub fn search(&self, query: &[f32], k: usize, filter: Option<&Filter>) -> Result<Vec<SearchHit>> {
        if let Some(filter) = filter {
            return self.search_filtered(query, k, filter);
        }

        if let Some(index) = self.index {
            let pairs = index.search(query, k, None)?;
            let hits = pairs
                .into_iter()
                .map(|(id, distance)| {
                    let distance = finite_or_internal(&id, distance)?;
                    Ok(SearchHit {
                        score: self.metric.score_from_distance(distance),
                        id,
                        distance,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            return Ok(sort_and_truncate(hits, k));
        }

        let pairs = self.scan_distances(query)?;
        Ok(sort_and_truncate(to_hits(self.metric, pairs)?, k))
    }

    /// Returns every match within `max_distance` of `query` (lower is
    /// closer in the metric's raw distance units), sorted by score.
    ///
    /// # Errors
    ///
    /// Same as [`Self::search`].
    pub fn search_range(
        &self,
        query: &[f32],
        max_distance: f32,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>> {
        let pairs = self.scan_distances_filtered(query, filter)?;
        let mut hits = to_hits(self.metric, pairs)?;
        hits.retain(|h| h.distance <= max_distance);
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        Ok(hits)
    }

    /// Streams progressively larger result batches, widening the scanned
    /// sample through `min(100,N), min(1 000,N), min(10 000,N), N` each
    /// round until `k` distinct results have been yielded or the whole
    /// store has been covered. Each batch only contains ids not already
    /// emitted in a prior round. `on_batch` returns `false` to stop early.
    ///
    /// # Errors
    ///
    /// Same as [`Self::search`].
    pub fn search_stream(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&Filter>,
        mut on_batch: impl FnMut(&[SearchHit]) -> bool,
    ) -> Result<()> {
        let total = self.store.count();
        if total == 0 {
            on_batch(&[]);
            return Ok(());
        }

        let mut seen = std::collections::HashSet::new();
        for raw_size in [100usize, 1_000, 10_000, total] {
            let sample_size = raw_size.min(total);
            let hits = if let Some(index) = self.index.filter(|_| filter.is_none()) {
                let pairs = index.search(query, k, Some(sample_size))?;
                sort_and_truncate(to_hits(self.metric, pairs)?, k)
            } else {
                let mut pairs = self.scan_distances_filtered(query, filter)?;
                pairs.truncate(sample_size.min(pairs.len()));
                sort_and_truncate(to_hits(self.metric, pairs)?, k)
            };

            let fresh: Vec<SearchHit> = hits.into_iter().filter(|h| seen.insert(h.id.clone())).collect();
            let covered_all = sample_size >= total;
            let satisfied = seen.len() >= k || covered_all;

            let keep_going = on_batch(&fresh);
            if !keep_going || satisfied {
                break;
            }
        }
        Ok(())
    }

    fn search_filtered(&self, query: &[f32], k: usize, filter: &Filter) -> Result<Vec<SearchHit>> {
        let pairs = self.scan_distances_filtered(query, Some(filter))?;
        Ok(sort_and_truncate(to_hits(self.metric, pairs)?, k))
    }

    fn scan_distances(&self, query: &[f32]) -> Result<Vec<(String, f32)>> {
        self.scan_distances_filtered(query, None)
    }

    fn scan_distances_filtered(&self, query: &[f32], filter: Option<&Filter>) -> Result<Vec<(String, f32)>> {
        let mut records = Vec::new();
        self.store.scan(&mut |r| {
            if filter.is_none_or(|f| f.matches(r.metadata.as_ref())) {
                records.push(r.clone());
            }
        })?;

        if records.is_empty() {
            return Ok(Vec::new());
        }

        if records.len() >= GPU_THRESHOLD {
            if let Some(gpu) = self.gpu {
                if gpu.is_available() {
                    return gpu.batch_distance(query, self.metric, &records);
                }
            }
        }

        if records.len() >= PARALLEL_THRESHOLD {
            return self.executor.map_distances(query, self.metric, &records);
        }

        SequentialExecutor.map_distances(query, self.metric, &records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::HnswConfig;
    use crate::storage::MemoryStore;
    use serde_json::json;

    fn store_with(records: &[(&str, Vec<f32>, Option<serde_json::Value>)]) -> MemoryStore {
        let store = MemoryStore::new();
        for (id, v, meta) in records {
            store.put(VectorRecord::new((*id).to_string(), v.clone(), meta.clone(), 0)).unwrap();
        }
        store
    }

    #[test]
    fn brute_force_orders_by_score() {
        let store = store_with(&[
            ("far", vec![10.0, 10.0], None),
            ("near", vec![0.1, 0.1], None),
        ]);
        let engine = SearchEngine::new(&store, None, DistanceMetric::Euclidean);
        let hits = engine.search(&[0.0, 0.0], 2, None).unwrap();
        assert_eq!(hits[0].id, "near");
    }

    #[test]
    fn filter_excludes_non_matching_records() {
        let store = store_with(&[
            ("a", vec![0.0, 0.0], Some(json!({"group": "x"}))),
            ("b", vec![0.1, 0.1], Some(json!({"group": "y"}))),
        ]);
        let filter = Filter::compile(&json!({"group": "y"})).unwrap();
        let engine = SearchEngine::new(&store, None, DistanceMetric::Euclidean);
        let hits = engine.search(&[0.0, 0.0], 5, Some(&filter)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
    }

    #[test]
    fn search_range_respects_max_distance() {
        let store = store_with(&[
            ("near", vec![1.0, 0.0], None),
            ("far", vec![100.0, 0.0], None),
        ]);
        let engine = SearchEngine::new(&store, None, DistanceMetric::Euclidean);
        let hits = engine.search_range(&[0.0, 0.0], 5.0, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "near");
    }

    #[test]
    fn index_path_used_when_no_filter() {
        let index = HnswIndex::new(DistanceMetric::Euclidean, HnswConfig::default());
        index.insert("a", &[0.0, 0.0]).unwrap();
        index.insert("b", &[5.0, 5.0]).unwrap();
        let store = store_with(&[("a", vec![0.0, 0.0], None), ("b", vec![5.0, 5.0], None)]);
        let engine = SearchEngine::new(&store, Some(&index), DistanceMetric::Euclidean);
        let hits = engine.search(&[0.0, 0.0], 1, None).unwrap();
        assert_eq!(hits[0].id, "a");
    }

    #[test]
    fn search_stream_terminates_and_reports_all_when_small() {
        let store = store_with(&[("a", vec![0.0, 0.0], None), ("b", vec![1.0, 1.0], None)]);
        let engine = SearchEngine::new(&store, None, DistanceMetric::Euclidean);
        let mut rounds = 0;
        engine
            .search_stream(&[0.0, 0.0], 5, None, |_hits| {
                rounds += 1;
                true
            })
            .unwrap();
        assert!(rounds >= 1);
    }

    #[test]
    fn search_stream_on_empty_store_reports_empty_once() {
        let store = MemoryStore::new();
        let engine = SearchEngine::new(&store, None, DistanceMetric::Euclidean);
        let mut calls = 0;
        engine
            .search_stream(&[0.0, 0.0], 5, None, |hits| {
                calls += 1;
                assert!(hits.is_empty());
                true
            })
            .unwrap();
        assert_eq!(calls, 1);
    }
}
