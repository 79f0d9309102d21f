//! Product quantizer: splits each vector into `M` subvectors and
//! replaces each with the nearest of `K` learned centroids.

use crate::error::{Error, Result};

/// Product quantizer configuration.
#[derive(Debug, Clone, Copy)]
pub struct ProductQuantizerConfig {
    /// Number of subspaces.
    pub m: usize,
    /// Number of centroids per subspace (≤256 so one byte per code).
    pub k: usize,
    /// Centroid initialization strategy.
    pub init: Init,
    /// Maximum k-means iterations per subspace.
    pub max_iters: usize,
    /// Stop when the relative decrease in distortion falls below this.
    pub convergence_threshold: f32,
}

/// Centroid initialization strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Init {
    /// Centroids are the first `K` distinct training subvectors.
    Random,
    /// k-means++ seeding.
    KMeansPlusPlus,
}

impl Default for ProductQuantizerConfig {
    fn default() -> Self {
        Self {
            m: 8,
            k: 256,
            init: Init::KMeansPlusPlus,
            max_iters: 25,
            convergence_threshold: 1e-3,
        }
    }
}

/// Per-subspace training diagnostics.
#[derive(Debug, Clone)]
pub struct SubspaceStats {
    /// Final total squared distortion for this subspace.
    pub distortion: f32,
    /// Number of k-means iterations actually run.
    pub iterations: usize,
}

/// A trained codebook: `M` subspaces × `K` centroids of dimension
/// `ceil(D/M)`, shared across all vectors in a namespace.
#[derive(Debug, Clone)]
pub struct ProductCodebook {
    m: usize,
    k: usize,
    subspace_dim: usize,
    dim: usize,
    /// `centroids[subspace][centroid_idx]` -> `subspace_dim` floats.
    centroids: Vec<Vec<Vec<f32>>>,
    /// Training diagnostics, one per subspace.
    pub stats: Vec<SubspaceStats>,
}

impl ProductCodebook {
    /// Total vector dimension this codebook was trained for.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of subspaces.
    #[must_use]
    pub fn m(&self) -> usize {
        self.m
    }

    /// Number of centroids per subspace.
    #[must_use]
    pub fn k(&self) -> usize {
        self.k
    }
}

/// A product quantizer bound to a trained (or not-yet-trained) codebook.
#[derive(Debug, Clone, Default)]
pub struct ProductQuantizer {
    config: ProductQuantizerConfig,
    codebook: Option<ProductCodebook>,
}

impl ProductQuantizer {
    /// Creates an untrained quantizer with the given config.
    #[must_use]
    pub fn new(config: ProductQuantizerConfig) -> Self {
        Self {
            config,
            codebook: None,
        }
    }

    /// Whether `train` has been called successfully.
    #[must_use]
    pub fn is_trained(&self) -> bool {
        self.codebook.is_some()
    }

    /// Trains the codebook via per-subspace k-means.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InsufficientTrainingData`] if any subspace has fewer
    /// training vectors than `K`.
    pub fn train(&mut self, training: &[Vec<f32>]) -> Result<()> {
        let dim = training
            .first()
            .map(Vec::len)
            .ok_or_else(|| Error::InsufficientTrainingData {
                required: self.config.k,
                got: 0,
            })?;

        if training.len() < self.config.k {
            return Err(Error::InsufficientTrainingData {
                required: self.config.k,
                got: training.len(),
            });
        }

        let subspace_dim = dim.div_ceil(self.config.m);
        let mut centroids = Vec::with_capacity(self.config.m);
        let mut stats = Vec::with_capacity(self.config.m);

        for subspace in 0..self.config.m {
            let start = subspace * subspace_dim;
            let end = (start + subspace_dim).min(dim);
            let subvectors: Vec<Vec<f32>> = training
                .iter()
                .map(|v| pad(&v[start..end], subspace_dim))
                .collect();

            let (subspace_centroids, sub_stats) = kmeans(
                &subvectors,
                self.config.k,
                self.config.init,
                self.config.max_iters,
                self.config.convergence_threshold,
            )?;
            centroids.push(subspace_centroids);
            stats.push(sub_stats);
        }

        self.codebook = Some(ProductCodebook {
            m: self.config.m,
            k: self.config.k,
            subspace_dim,
            dim,
            centroids,
            stats,
        });
        Ok(())
    }

    /// Encodes a vector into `M` centroid-index bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CodebookUntrained`] if `train` has not been called.
    pub fn encode(&self, values: &[f32]) -> Result<Vec<u8>> {
        let codebook = self.codebook.as_ref().ok_or(Error::CodebookUntrained)?;
        let mut codes = Vec::with_capacity(codebook.m);
        for subspace in 0..codebook.m {
            let start = subspace * codebook.subspace_dim;
            let end = (start + codebook.subspace_dim).min(values.len());
            let sub = pad(&values[start..end], codebook.subspace_dim);
            let nearest = nearest_centroid(&sub, &codebook.centroids[subspace]);
            codes.push(nearest as u8);
        }
        Ok(codes)
    }

    /// Decodes `M` centroid-index bytes back into a full-dimension vector by
    /// concatenating the selected centroid subvectors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CodebookUntrained`] if `train` has not been called.
    pub fn decode(&self, codes: &[u8]) -> Result<Vec<f32>> {
        let codebook = self.codebook.as_ref().ok_or(Error::CodebookUntrained)?;
        let mut out = Vec::with_capacity(codebook.dim);
        for (subspace, &code) in codes.iter().enumerate() {
            out.extend_from_slice(&codebook.centroids[subspace][code as usize]);
        }
        out.truncate(codebook.dim);
        Ok(out)
    }

    /// Asymmetric distance between a raw query and a PQ-encoded
    /// database vector: accumulates squared-euclidean per subspace against
    /// the query's own subvector (not the decoded centroid concatenation),
    /// so no full decode is required.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CodebookUntrained`] if `train` has not been called.
    pub fn asymmetric_distance(&self, query: &[f32], codes: &[u8]) -> Result<f32> {
        let codebook = self.codebook.as_ref().ok_or(Error::CodebookUntrained)?;
        let mut total = 0.0f32;
        for (subspace, &code) in codes.iter().enumerate() {
            let start = subspace * codebook.subspace_dim;
            let end = (start + codebook.subspace_dim).min(query.len());
            let q_sub = pad(&query[start..end], codebook.subspace_dim);
            let centroid = &codebook.centroids[subspace][code as usize];
            total += squared_euclidean(&q_sub, centroid);
        }
        Ok(total.sqrt())
    }

    /// Access to the trained codebook, if any.
    #[must_use]
    pub fn codebook(&self) -> Option<&ProductCodebook> {
        self.codebook.as_ref()
    }
}

fn pad(slice: &[f32], target_len: usize) -> Vec<f32> {
    let mut v = slice.to_vec();
    v.resize(target_len, 0.0);
    v
}

fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

fn nearest_centroid(v: &[f32], centroids: &[Vec<f32>]) -> usize {
    centroids
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            squared_euclidean(v, a).total_cmp(&squared_euclidean(v, b))
        })
        .map_or(0, |(idx, _)| idx)
}

/// A minimal k-means implementation: small enough per-subspace workload
/// (`K` centroids of dimension `⌈D/M⌉`) that pulling in a clustering crate
/// isn't worth the dependency.
fn kmeans(
    points: &[Vec<f32>],
    k: usize,
    init: Init,
    max_iters: usize,
    convergence_threshold: f32,
) -> Result<(Vec<Vec<f32>>, SubspaceStats)> {
    if points.len() < k {
        return Err(Error::InsufficientTrainingData {
            required: k,
            got: points.len(),
        });
    }

    let dim = points[0].len();
    let mut centroids = init_centroids(points, k, init);
    let mut assignment = vec![0usize; points.len()];
    let mut prev_distortion = f32::INFINITY;
    let mut iterations = 0;
    let mut distortion = 0.0;

    for iter in 0..max_iters.max(1) {
        iterations = iter + 1;
        distortion = 0.0;
        for (i, p) in points.iter().enumerate() {
            let idx = nearest_centroid(p, &centroids);
            assignment[i] = idx;
            distortion += squared_euclidean(p, &centroids[idx]);
        }

        let mut sums = vec![vec![0.0f32; dim]; k];
        let mut counts = vec![0usize; k];
        for (p, &idx) in points.iter().zip(&assignment) {
            counts[idx] += 1;
            for (s, &x) in sums[idx].iter_mut().zip(p) {
                *s += x;
            }
        }
        for c in 0..k {
            if counts[c] > 0 {
                for (centroid_val, sum_val) in centroids[c].iter_mut().zip(&sums[c]) {
                    *centroid_val = sum_val / counts[c] as f32;
                }
            }
        }

        let relative_decrease = if prev_distortion.is_finite() && prev_distortion > 0.0 {
            (prev_distortion - distortion) / prev_distortion
        } else {
            1.0
        };
        prev_distortion = distortion;
        if relative_decrease.abs() < convergence_threshold {
            break;
        }
    }

    Ok((
        centroids,
        SubspaceStats {
            distortion,
            iterations,
        },
    ))
}

fn init_centroids(points: &[Vec<f32>], k: usize, init: Init) -> Vec<Vec<f32>> {
    match init {
        Init::Random => points.iter().take(k).cloned().collect(),
        Init::KMeansPlusPlus => {
            // Deterministic variant: no RNG dependency, so we pick the first
            // point then greedily add the point farthest from the current
            // centroid set, which captures the spirit of k-means++ (spread
            // out seeds) without introducing nondeterminism into tests.
            let mut chosen = vec![points[0].clone()];
            while chosen.len() < k {
                let next = points
                    .iter()
                    .max_by(|a, b| {
                        let da = chosen
                            .iter()
                            .map(|c| squared_euclidean(a, c))
                            .fold(f32::INFINITY, f32::min);
                        let db = chosen
                            .iter()
                            .map(|c| squared_euclidean(b, c))
                            .fold(f32::INFINITY, f32::min);
                        da.total_cmp(&db)
                    })
                    .expect("points is non-empty");
                chosen.push(next.clone());
            }
            chosen
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis_vectors(dim: usize, count: usize) -> Vec<Vec<f32>> {
        (0..count)
            .map(|i| {
                let mut v = vec![0.0; dim];
                v[i % dim] = 1.0;
                v
            })
            .collect()
    }

    #[test]
    fn untrained_encode_fails() {
        let pq = ProductQuantizer::new(ProductQuantizerConfig::default());
        assert!(matches!(
            pq.encode(&[0.0; 8]),
            Err(Error::CodebookUntrained)
        ));
    }

    #[test]
    fn insufficient_training_data_errors() {
        let mut pq = ProductQuantizer::new(ProductQuantizerConfig {
            m: 2,
            k: 16,
            ..Default::default()
        });
        let training = axis_vectors(8, 4);
        assert!(matches!(
            pq.train(&training),
            Err(Error::InsufficientTrainingData { .. })
        ));
    }

    #[test]
    fn identity_round_trip_when_exact_centroid() {
        let mut pq = ProductQuantizer::new(ProductQuantizerConfig {
            m: 2,
            k: 4,
            max_iters: 10,
            ..Default::default()
        });
        let training = axis_vectors(8, 32);
        pq.train(&training).unwrap();

        // A vector whose subvectors coincide with some centroid round-trips
        // exactly.
        let codes = pq.encode(&training[0]).unwrap();
        let decoded = pq.decode(&codes).unwrap();
        let centroid_dist = squared_euclidean(&training[0], &decoded);
        assert!(centroid_dist < 1e-3);
    }

    #[test]
    fn asymmetric_distance_matches_decoded_distance() {
        let mut pq = ProductQuantizer::new(ProductQuantizerConfig {
            m: 4,
            k: 8,
            max_iters: 15,
            ..Default::default()
        });
        let training = axis_vectors(16, 64);
        pq.train(&training).unwrap();

        let query = vec![0.9; 16];
        let codes = pq.encode(&training[0]).unwrap();
        let decoded = pq.decode(&codes).unwrap();
        let direct = squared_euclidean(&query, &decoded).sqrt();
        let asym = pq.asymmetric_distance(&query, &codes).unwrap();
        assert!((direct - asym).abs() < 1e-4);
    }
}
