//! Distance kernels for vector similarity calculations.
//!
//! Each metric exposes a `distance` (lower is better, used for ranking and
//! range queries) and a `score_from_distance` (higher is better, the
//! user-facing value). `requires_normalized` tells the search engine
//! whether it should pre-normalize the query before scoring.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Distance metric for vector similarity calculations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// `1 - cosine_similarity`. Best for text embeddings.
    Cosine,
    /// Euclidean (L2) distance. Best for spatial data.
    Euclidean,
    /// Manhattan (L1) distance.
    Manhattan,
    /// Negated dot product, so that smaller is still better.
    Dot,
    /// Hamming distance on binary codings.
    Hamming,
    /// Jaccard distance on binary codings.
    Jaccard,
}

impl DistanceMetric {
    /// Computes the distance between two vectors under this metric.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] when `a.len() != b.len()`.
    pub fn distance(self, a: &[f32], b: &[f32]) -> Result<f32> {
        if a.len() != b.len() {
            tracing::trace!(expected = a.len(), actual = b.len(), metric = ?self, "dimension mismatch in distance kernel");
            return Err(Error::DimensionMismatch {
                expected: a.len(),
                actual: b.len(),
            });
        }

        Ok(match self {
            Self::Cosine => cosine_distance(a, b),
            Self::Euclidean => euclidean_distance(a, b),
            Self::Manhattan => manhattan_distance(a, b),
            Self::Dot => dot_distance(a, b),
            Self::Hamming => hamming_distance(a, b),
            Self::Jaccard => jaccard_distance(a, b),
        })
    }

    /// Whether this metric expects pre-normalized vectors. The kernel still
    /// tolerates unnormalized input; pre-normalizing is a caller-side
    /// efficiency, not a correctness requirement.
    #[must_use]
    pub const fn requires_normalized(self) -> bool {
        matches!(self, Self::Cosine)
    }

    /// Converts a raw distance into a "higher is better" user-facing score.
    #[must_use]
    pub fn score_from_distance(self, distance: f32) -> f32 {
        match self {
            Self::Cosine => 1.0 - distance / 2.0,
            Self::Dot => -distance,
            Self::Euclidean | Self::Manhattan => (-distance).exp(),
            Self::Hamming | Self::Jaccard => 1.0 - distance,
        }
    }

    /// Human-readable name, used in persisted index headers.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
            Self::Manhattan => "manhattan",
            Self::Dot => "dot",
            Self::Hamming => "hamming",
            Self::Jaccard => "jaccard",
        }
    }

    /// Parses a metric back from its persisted name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "cosine" => Some(Self::Cosine),
            "euclidean" => Some(Self::Euclidean),
            "manhattan" => Some(Self::Manhattan),
            "dot" => Some(Self::Dot),
            "hamming" => Some(Self::Hamming),
            "jaccard" => Some(Self::Jaccard),
            _ => None,
        }
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }

    1.0 - dot / (norm_a * norm_b)
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

fn manhattan_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
}

fn dot_distance(a: &[f32], b: &[f32]) -> f32 {
    -a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>()
}

/// Treats each component as non-zero/zero and counts differing positions,
/// normalized by length so the result is comparable across dimensions.
fn hamming_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() {
        return 0.0;
    }
    let differing = a
        .iter()
        .zip(b)
        .filter(|(x, y)| (**x != 0.0) != (**y != 0.0))
        .count();
    differing as f32 / a.len() as f32
}

fn jaccard_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut intersection = 0usize;
    let mut union = 0usize;
    for (x, y) in a.iter().zip(b) {
        let xb = *x != 0.0;
        let yb = *y != 0.0;
        if xb || yb {
            union += 1;
        }
        if xb && yb {
            intersection += 1;
        }
    }
    if union == 0 {
        return 0.0;
    }
    1.0 - (intersection as f32 / union as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_vectors_score_one() {
        let a = [1.0, 0.0, 0.0];
        let d = DistanceMetric::Cosine.distance(&a, &a).unwrap();
        assert!(d.abs() < 1e-6);
        let score = DistanceMetric::Cosine.score_from_distance(d);
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors_score_half() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        let d = DistanceMetric::Cosine.distance(&a, &b).unwrap();
        let score = DistanceMetric::Cosine.score_from_distance(d);
        assert!((score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn euclidean_distance_pythagorean() {
        let a = [0.0, 0.0, 0.0];
        let b = [3.0, 4.0, 0.0];
        let d = DistanceMetric::Euclidean.distance(&a, &b).unwrap();
        assert!((d - 5.0).abs() < 1e-6);
    }

    #[test]
    fn dot_score_is_negated_distance() {
        let a = [1.0, 2.0, 3.0];
        let b = [4.0, 5.0, 6.0];
        let d = DistanceMetric::Dot.distance(&a, &b).unwrap();
        assert!((d + 32.0).abs() < 1e-6);
        assert!((DistanceMetric::Dot.score_from_distance(d) - 32.0).abs() < 1e-6);
    }

    #[test]
    fn dimension_mismatch_errors() {
        let a = [1.0, 2.0];
        let b = [1.0, 2.0, 3.0];
        let err = DistanceMetric::Cosine.distance(&a, &b).unwrap_err();
        assert_eq!(err.code(), "DIMENSION_MISMATCH");
    }

    #[test]
    fn score_monotonicity_euclidean() {
        let closer = DistanceMetric::Euclidean.score_from_distance(1.0);
        let farther = DistanceMetric::Euclidean.score_from_distance(2.0);
        assert!(closer > farther);
    }

    #[test]
    fn hamming_and_jaccard_identical_are_zero() {
        let a = [1.0, 0.0, 1.0, 0.0];
        assert!(DistanceMetric::Hamming.distance(&a, &a).unwrap().abs() < 1e-6);
        assert!(DistanceMetric::Jaccard.distance(&a, &a).unwrap().abs() < 1e-6);
    }

    #[test]
    fn name_round_trips() {
        for m in [
            DistanceMetric::Cosine,
            DistanceMetric::Euclidean,
            DistanceMetric::Manhattan,
            DistanceMetric::Dot,
            DistanceMetric::Hamming,
            DistanceMetric::Jaccard,
        ] {
            assert_eq!(DistanceMetric::from_name(m.name()), Some(m));
        }
    }
}
