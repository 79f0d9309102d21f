//! Native HNSW graph.
//!
//! Arena-based multi-layer proximity graph, with a stable `record_id <->
//! NodeId` mapping so callers address nodes by the id they inserted under,
//! and tombstone-based deletion so the arena never has to reuse or shift
//! slots. Lock order is `vectors` -> `layers` -> per-node neighbor lock,
//! avoiding nested acquisition in either direction. Layer assignment uses a
//! xorshift64 PRNG seeded once at index construction; neighbor selection at
//! insert time uses VAMANA-style alpha-diversification.

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Stable identifier for a node in the arena. Indices are never reused after
/// a delete; the slot is tombstoned instead.
pub type NodeId = usize;

#[derive(Debug, Clone, Copy)]
struct OrderedFloat(f32);

impl PartialEq for OrderedFloat {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}
impl Eq for OrderedFloat {}
impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.0.total_cmp(&other.0)
    }
}

struct Layer {
    neighbors: Vec<RwLock<Vec<NodeId>>>,
}

impl Layer {
    fn new(capacity: usize) -> Self {
        Self {
            neighbors: (0..capacity).map(|_| RwLock::new(Vec::new())).collect(),
        }
    }

    fn ensure_capacity(&mut self, node_id: NodeId) {
        while self.neighbors.len() <= node_id {
            self.neighbors.push(RwLock::new(Vec::new()));
        }
    }

    fn get_neighbors(&self, node_id: NodeId) -> Vec<NodeId> {
        self.neighbors
            .get(node_id)
            .map_or_else(Vec::new, |lock| lock.read().clone())
    }

    fn set_neighbors(&self, node_id: NodeId, neighbors: Vec<NodeId>) {
        if let Some(lock) = self.neighbors.get(node_id) {
            *lock.write() = neighbors;
        }
    }
}

/// Tuning parameters for a new index.
#[derive(Debug, Clone, Copy)]
pub struct HnswConfig {
    /// Max connections per node above layer 0 (M).
    pub m: usize,
    /// Construction-time candidate list size.
    pub ef_construction: usize,
    /// Default search-time candidate list size.
    pub ef_search: usize,
    /// VAMANA diversification factor; 1.0 is standard HNSW.
    pub alpha: f32,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
            alpha: 1.0,
        }
    }
}

/// Point-in-time index statistics.
#[derive(Debug, Clone, Copy)]
pub struct HnswStats {
    /// Live (non-tombstoned) node count.
    pub live_nodes: usize,
    /// Tombstoned node count.
    pub tombstones: usize,
    /// Number of layers currently allocated.
    pub layer_count: usize,
    /// Highest occupied layer.
    pub max_layer: usize,
}

/// A multi-layer proximity graph over vectors identified by record id.
pub struct HnswIndex {
    metric: DistanceMetric,
    config: HnswConfig,
    dim: RwLock<Option<usize>>,
    vectors: RwLock<Vec<Option<Vec<f32>>>>,
    ids: RwLock<Vec<Option<String>>>,
    id_to_node: RwLock<HashMap<String, NodeId>>,
    layers: RwLock<Vec<Layer>>,
    entry_point: RwLock<Option<NodeId>>,
    max_layer: AtomicUsize,
    live_count: AtomicUsize,
    tombstones: AtomicUsize,
    rng_state: AtomicU64,
    level_mult: f64,
    max_connections_0: usize,
}

impl HnswIndex {
    /// Creates an empty index for the given metric.
    #[must_use]
    pub fn new(metric: DistanceMetric, config: HnswConfig) -> Self {
        let level_mult = 1.0 / (config.m.max(2) as f64).ln();
        Self {
            metric,
            max_connections_0: config.m * 2,
            config,
            dim: RwLock::new(None),
            vectors: RwLock::new(Vec::new()),
            ids: RwLock::new(Vec::new()),
            id_to_node: RwLock::new(HashMap::new()),
            layers: RwLock::new(vec![Layer::new(0)]),
            entry_point: RwLock::new(None),
            max_layer: AtomicUsize::new(0),
            live_count: AtomicUsize::new(0),
            tombstones: AtomicUsize::new(0),
            rng_state: AtomicU64::new(0x5DEE_CE66_D1A4_B5B5),
            level_mult,
        }
    }

    /// Returns the number of live vectors in the index.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live_count.load(Ordering::Relaxed)
    }

    /// Returns true if the index has no live vectors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns point-in-time statistics.
    #[must_use]
    pub fn stats(&self) -> HnswStats {
        HnswStats {
            live_nodes: self.live_count.load(Ordering::Relaxed),
            tombstones: self.tombstones.load(Ordering::Relaxed),
            layer_count: self.layers.read().len(),
            max_layer: self.max_layer.load(Ordering::Relaxed),
        }
    }

    /// Inserts a vector under `record_id`, returning its node id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if `vector`'s length does not
    /// match the dimension established by the first insert, or
    /// [`Error::InvalidFormat`] if `record_id` is already indexed (callers
    /// must delete first to re-insert under the same id).
    pub fn insert(&self, record_id: &str, vector: &[f32]) -> Result<NodeId> {
        {
            let mut dim = self.dim.write();
            match *dim {
                Some(d) if d != vector.len() => {
                    return Err(Error::DimensionMismatch {
                        expected: d,
                        actual: vector.len(),
                    });
                }
                Some(_) => {}
                None => *dim = Some(vector.len()),
            }
        }

        if self.id_to_node.read().contains_key(record_id) {
            return Err(Error::InvalidFormat(format!(
                "record '{record_id}' is already indexed"
            )));
        }

        let node_id = {
            let mut vectors = self.vectors.write();
            let mut ids = self.ids.write();
            let id = vectors.len();
            vectors.push(Some(vector.to_vec()));
            ids.push(Some(record_id.to_string()));
            id
        };
        self.id_to_node.write().insert(record_id.to_string(), node_id);

        let node_layer = self.random_layer();
        {
            let mut layers = self.layers.write();
            while layers.len() <= node_layer {
                layers.push(Layer::new(node_id + 1));
            }
            for layer in layers.iter_mut() {
                layer.ensure_capacity(node_id);
            }
        }

        let entry_point = *self.entry_point.read();
        if let Some(ep) = entry_point {
            let mut current_ep = ep;
            let max_layer = self.max_layer.load(Ordering::Relaxed);

            for layer_idx in (node_layer + 1..=max_layer).rev() {
                current_ep = self.search_layer_single(vector, current_ep, layer_idx)?;
            }

            for layer_idx in (0..=node_layer.min(max_layer.max(node_layer))).rev() {
                let neighbors = self.search_layer(vector, vec![current_ep], self.config.ef_construction, layer_idx)?;
                let max_conn = if layer_idx == 0 {
                    self.max_connections_0
                } else {
                    self.config.m
                };
                let selected = self.select_neighbors(&neighbors, max_conn)?;
                self.layers.read()[layer_idx].set_neighbors(node_id, selected.clone());

                for &neighbor in &selected {
                    self.add_bidirectional_connection(node_id, neighbor, layer_idx, max_conn)?;
                }

                if let Some(&(closest, _)) = neighbors.first() {
                    current_ep = closest;
                }
            }
        } else {
            *self.entry_point.write() = Some(node_id);
        }

        if node_layer > self.max_layer.load(Ordering::Relaxed) {
            self.max_layer.store(node_layer, Ordering::Relaxed);
            *self.entry_point.write() = Some(node_id);
        }

        self.live_count.fetch_add(1, Ordering::Relaxed);
        Ok(node_id)
    }

    /// Tombstones the node holding `record_id`, removing it from future
    /// search results while leaving its arena slot allocated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VectorNotFound`] if `record_id` is not indexed.
    pub fn delete(&self, record_id: &str) -> Result<()> {
        let node_id = self
            .id_to_node
            .write()
            .remove(record_id)
            .ok_or_else(|| Error::VectorNotFound(record_id.to_string()))?;

        self.vectors.write()[node_id] = None;
        self.ids.write()[node_id] = None;
        self.live_count.fetch_sub(1, Ordering::Relaxed);
        self.tombstones.fetch_add(1, Ordering::Relaxed);

        if *self.entry_point.read() == Some(node_id) {
            self.reassign_entry_point();
        }
        Ok(())
    }

    fn reassign_entry_point(&self) {
        let replacement = self
            .ids
            .read()
            .iter()
            .position(Option::is_some);
        *self.entry_point.write() = replacement;
    }

    /// Searches for the `k` nearest live neighbors of `query`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if `query`'s length does not
    /// match the index dimension.
    pub fn search(&self, query: &[f32], k: usize, ef_search: Option<usize>) -> Result<Vec<(String, f32)>> {
        if let Some(d) = *self.dim.read() {
            if d != query.len() {
                return Err(Error::DimensionMismatch {
                    expected: d,
                    actual: query.len(),
                });
            }
        }

        let Some(ep) = *self.entry_point.read() else {
            return Ok(Vec::new());
        };

        let ef = ef_search.unwrap_or(self.config.ef_search).max(k);
        let max_layer = self.max_layer.load(Ordering::Relaxed);
        let mut current_ep = ep;
        for layer_idx in (1..=max_layer).rev() {
            current_ep = self.search_layer_single(query, current_ep, layer_idx)?;
        }

        let candidates = self.search_layer(query, vec![current_ep], ef, 0)?;
        let ids = self.ids.read();
        Ok(candidates
            .into_iter()
            .filter_map(|(node, dist)| ids[node].clone().map(|id| (id, dist)))
            .take(k)
            .collect())
    }

    fn get_vector(&self, node_id: NodeId) -> Option<Vec<f32>> {
        self.vectors.read().get(node_id).cloned().flatten()
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn random_layer(&self) -> usize {
        let mut state = self.rng_state.load(Ordering::Relaxed);
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        self.rng_state.store(state, Ordering::Relaxed);

        let uniform = (state as f64) / (u64::MAX as f64);
        let level = (-uniform.ln() * self.level_mult).floor() as usize;
        level.min(15)
    }

    fn search_layer_single(&self, query: &[f32], entry: NodeId, layer: usize) -> Result<NodeId> {
        let mut best = entry;
        let Some(entry_vec) = self.get_vector(entry) else {
            return Ok(entry);
        };
        let mut best_dist = self.metric.distance(query, &entry_vec)?;

        loop {
            let neighbors = self.layers.read()[layer].get_neighbors(best);
            let mut improved = false;

            for neighbor in neighbors {
                let Some(nv) = self.get_vector(neighbor) else {
                    continue;
                };
                let dist = self.metric.distance(query, &nv)?;
                if dist < best_dist {
                    best = neighbor;
                    best_dist = dist;
                    improved = true;
                }
            }

            if !improved {
                break;
            }
        }

        Ok(best)
    }

    fn search_layer(
        &self,
        query: &[f32],
        entry_points: Vec<NodeId>,
        ef: usize,
        layer: usize,
    ) -> Result<Vec<(NodeId, f32)>> {
        let mut visited: FxHashSet<NodeId> = FxHashSet::default();
        let mut candidates: BinaryHeap<Reverse<(OrderedFloat, NodeId)>> = BinaryHeap::new();
        let mut results: BinaryHeap<(OrderedFloat, NodeId)> = BinaryHeap::new();

        let vectors = self.vectors.read();

        for ep in entry_points {
            let Some(Some(v)) = vectors.get(ep) else {
                continue;
            };
            let dist = self.metric.distance(query, v)?;
            candidates.push(Reverse((OrderedFloat(dist), ep)));
            results.push((OrderedFloat(dist), ep));
            visited.insert(ep);
        }

        while let Some(Reverse((OrderedFloat(c_dist), c_node))) = candidates.pop() {
            let furthest_dist = results.peek().map_or(f32::MAX, |r| r.0 .0);
            if c_dist > furthest_dist && results.len() >= ef {
                break;
            }

            let neighbors = self.layers.read()[layer].get_neighbors(c_node);
            for neighbor in neighbors {
                if !visited.insert(neighbor) {
                    continue;
                }
                let Some(Some(nv)) = vectors.get(neighbor) else {
                    continue;
                };
                let dist = self.metric.distance(query, nv)?;
                let furthest = results.peek().map_or(f32::MAX, |r| r.0 .0);

                if dist < furthest || results.len() < ef {
                    candidates.push(Reverse((OrderedFloat(dist), neighbor)));
                    results.push((OrderedFloat(dist), neighbor));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut result_vec: Vec<(NodeId, f32)> = results.into_iter().map(|(d, n)| (n, d.0)).collect();
        result_vec.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        Ok(result_vec)
    }

    /// VAMANA-style diversified neighbor selection.
    fn select_neighbors(&self, candidates: &[(NodeId, f32)], max_neighbors: usize) -> Result<Vec<NodeId>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        if candidates.len() <= max_neighbors {
            return Ok(candidates.iter().map(|(id, _)| *id).collect());
        }

        let mut selected: Vec<NodeId> = Vec::with_capacity(max_neighbors);
        let mut selected_vecs: Vec<Vec<f32>> = Vec::with_capacity(max_neighbors);

        for &(candidate_id, candidate_dist) in candidates {
            if selected.len() >= max_neighbors {
                break;
            }
            let Some(candidate_vec) = self.get_vector(candidate_id) else {
                continue;
            };

            let mut is_diverse = true;
            for selected_vec in &selected_vecs {
                let dist_to_selected = self.metric.distance(&candidate_vec, selected_vec)?;
                if self.config.alpha * candidate_dist > dist_to_selected {
                    is_diverse = false;
                    break;
                }
            }

            if is_diverse || selected.is_empty() {
                selected.push(candidate_id);
                selected_vecs.push(candidate_vec);
            }
        }

        if selected.len() < max_neighbors {
            for &(candidate_id, _) in candidates {
                if selected.len() >= max_neighbors {
                    break;
                }
                if !selected.contains(&candidate_id) {
                    selected.push(candidate_id);
                }
            }
        }

        Ok(selected)
    }

    fn add_bidirectional_connection(
        &self,
        new_node: NodeId,
        neighbor: NodeId,
        layer: usize,
        max_conn: usize,
    ) -> Result<()> {
        let Some(neighbor_vec) = self.get_vector(neighbor) else {
            return Ok(());
        };
        let current_neighbors = self.layers.read()[layer].get_neighbors(neighbor);

        if current_neighbors.len() < max_conn {
            let layers = self.layers.read();
            let mut neighbors = layers[layer].get_neighbors(neighbor);
            neighbors.push(new_node);
            layers[layer].set_neighbors(neighbor, neighbors);
            return Ok(());
        }

        let mut all_neighbors = current_neighbors.clone();
        all_neighbors.push(new_node);

        let mut with_dist: Vec<(NodeId, f32)> = Vec::with_capacity(all_neighbors.len());
        for n in all_neighbors {
            if let Some(v) = self.get_vector(n) {
                with_dist.push((n, self.metric.distance(&neighbor_vec, &v)?));
            }
        }
        with_dist.sort_by(|a, b| a.1.total_cmp(&b.1));
        let pruned: Vec<NodeId> = with_dist.into_iter().take(max_conn).map(|(n, _)| n).collect();

        self.layers.read()[layer].set_neighbors(neighbor, pruned);
        Ok(())
    }

    /// Snapshots the full topology for persistence.
    #[must_use]
    pub fn snapshot(&self) -> super::cache::PersistedIndex {
        super::cache::PersistedIndex {
            metric: self.metric,
            dim: *self.dim.read(),
            config_m: self.config.m,
            config_ef_construction: self.config.ef_construction,
            config_ef_search: self.config.ef_search,
            config_alpha: self.config.alpha,
            entry_point: *self.entry_point.read(),
            max_layer: self.max_layer.load(Ordering::Relaxed),
            ids: self.ids.read().clone(),
            vectors: self.vectors.read().clone(),
            layers: self
                .layers
                .read()
                .iter()
                .map(|l| l.neighbors.iter().map(|n| n.read().clone()).collect())
                .collect(),
        }
    }

    /// Rebuilds an index from a persisted snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: &super::cache::PersistedIndex) -> Self {
        let config = HnswConfig {
            m: snapshot.config_m,
            ef_construction: snapshot.config_ef_construction,
            ef_search: snapshot.config_ef_search,
            alpha: snapshot.config_alpha,
        };
        let index = Self::new(snapshot.metric, config);
        *index.dim.write() = snapshot.dim;
        *index.entry_point.write() = snapshot.entry_point;
        index.max_layer.store(snapshot.max_layer, Ordering::Relaxed);

        let mut id_to_node = HashMap::new();
        let mut live = 0usize;
        let mut tombstones = 0usize;
        for (node_id, id) in snapshot.ids.iter().enumerate() {
            if let Some(id) = id {
                id_to_node.insert(id.clone(), node_id);
                live += 1;
            } else {
                tombstones += 1;
            }
        }
        *index.id_to_node.write() = id_to_node;
        index.live_count.store(live, Ordering::Relaxed);
        index.tombstones.store(tombstones, Ordering::Relaxed);
        *index.vectors.write() = snapshot.vectors.clone();
        *index.ids.write() = snapshot.ids.clone();

        let layers: Vec<Layer> = snapshot
            .layers
            .iter()
            .map(|layer_neighbors| Layer {
                neighbors: layer_neighbors.iter().map(|n| RwLock::new(n.clone())).collect(),
            })
            .collect();
        *index.layers.write() = layers;

        index
    }
}
