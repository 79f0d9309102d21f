//! Compression manager: analyzes a vector and recommends a
//! codec, tracking per-codec performance to adapt thresholds over time.

use crate::quantization::{CodecKind, ProductQuantizer, ProductQuantizerConfig, ScalarQuantizer};
use std::collections::VecDeque;

/// Statistics computed over a single vector, used to score candidate codecs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorAnalysis {
    /// Fraction of components with `|v| < epsilon`.
    pub sparsity: f32,
    /// Shannon entropy over 32 value bins.
    pub entropy: f32,
    /// Fraction of adjacent positions differing by more than epsilon.
    pub complexity: f32,
    /// Number of distinct-ish value clusters (gap-based).
    pub cluster_count: usize,
    /// True if values look binary (near 0 or near 1 extremes).
    pub binary_like: bool,
    /// `max - min` over the vector.
    pub dynamic_range: f32,
    /// Sample variance.
    pub variance: f32,
    /// Vector dimension.
    pub dim: usize,
}

const EPSILON: f32 = 1e-6;
const BINS: usize = 32;

impl VectorAnalysis {
    /// Computes the analysis for a vector.
    #[must_use]
    pub fn compute(values: &[f32]) -> Self {
        let dim = values.len();
        if dim == 0 {
            return Self {
                sparsity: 0.0,
                entropy: 0.0,
                complexity: 0.0,
                cluster_count: 0,
                binary_like: false,
                dynamic_range: 0.0,
                variance: 0.0,
                dim: 0,
            };
        }

        let sparsity = values.iter().filter(|v| v.abs() < EPSILON).count() as f32 / dim as f32;

        let min = values.iter().copied().fold(f32::INFINITY, f32::min);
        let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let dynamic_range = (max - min).max(0.0);

        let entropy = shannon_entropy(values, min, max);

        let complexity = if dim > 1 {
            values.windows(2).filter(|w| (w[1] - w[0]).abs() > EPSILON).count() as f32
                / (dim - 1) as f32
        } else {
            0.0
        };

        let mean = values.iter().sum::<f32>() / dim as f32;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / dim as f32;

        let cluster_count = cluster_count(values);
        let binary_like = values
            .iter()
            .all(|v| (*v).abs() < EPSILON || (*v - 1.0).abs() < EPSILON || (*v + 1.0).abs() < EPSILON);

        Self {
            sparsity,
            entropy,
            complexity,
            cluster_count,
            binary_like,
            dynamic_range,
            variance,
            dim,
        }
    }
}

fn shannon_entropy(values: &[f32], min: f32, max: f32) -> f32 {
    let range = (max - min).max(EPSILON);
    let mut counts = [0u32; BINS];
    for &v in values {
        let bin = (((v - min) / range) * (BINS - 1) as f32)
            .round()
            .clamp(0.0, (BINS - 1) as f32) as usize;
        counts[bin] += 1;
    }
    let total = values.len() as f32;
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f32 / total;
            -p * p.log2()
        })
        .sum()
}

fn cluster_count(values: &[f32]) -> usize {
    let mut sorted: Vec<f32> = values.to_vec();
    sorted.sort_by(f32::total_cmp);
    let range = (sorted.last().copied().unwrap_or(0.0) - sorted.first().copied().unwrap_or(0.0)).max(EPSILON);
    let gap_threshold = range * 0.05;
    let mut clusters = if sorted.is_empty() { 0 } else { 1 };
    for w in sorted.windows(2) {
        if (w[1] - w[0]) > gap_threshold {
            clusters += 1;
        }
    }
    clusters
}

/// A codec recommendation returned by `auto_select`.
#[derive(Debug, Clone)]
pub struct Recommendation {
    /// Recommended codec.
    pub strategy: CodecKind,
    /// Estimated compression ratio (original bytes / compressed bytes).
    pub est_ratio: f32,
    /// Estimated max reconstruction error.
    pub est_loss: f32,
    /// Human-readable rationale for the choice.
    pub reasoning: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    /// Other candidates considered, worst to best excluded.
    pub alternatives: Vec<(CodecKind, f32)>,
}

/// Bias knob for `auto_select`: favor decode/search speed or reconstruction
/// quality.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QualityBias {
    /// Favor speed (smaller codecs) when scores are close.
    Speed,
    /// Favor reconstruction quality (larger codecs) when scores are close.
    Quality,
}

#[derive(Debug, Clone, Default)]
struct CodecObservation {
    ratio: f32,
    quality: f32,
    time_ms: f32,
}

/// Rolling per-codec performance window, capped at 100 observations, used to
/// compute the `performance_bonus` term in the scoring function.
#[derive(Debug, Default)]
struct RollingStats {
    window: VecDeque<CodecObservation>,
}

const ROLLING_WINDOW_CAP: usize = 100;

impl RollingStats {
    fn record(&mut self, obs: CodecObservation) {
        if self.window.len() >= ROLLING_WINDOW_CAP {
            self.window.pop_front();
        }
        self.window.push_back(obs);
    }

    fn bonus(&self) -> f32 {
        if self.window.is_empty() {
            return 0.0;
        }
        let avg_quality: f32 =
            self.window.iter().map(|o| o.quality).sum::<f32>() / self.window.len() as f32;
        // Scale into a small additive bonus so it nudges, not dominates, the
        // base score.
        (avg_quality - 0.5) * 0.1
    }
}

/// Adaptive thresholds that drift toward observed workload characteristics.
#[derive(Debug, Clone, Copy)]
struct AdaptiveThresholds {
    dim: f32,
    sparsity: f32,
    complexity: f32,
    entropy: f32,
}

impl Default for AdaptiveThresholds {
    fn default() -> Self {
        Self {
            dim: 512.0,
            sparsity: 0.5,
            complexity: 0.5,
            entropy: 3.0,
        }
    }
}

const LEARNING_RATE: f32 = 0.05;

impl AdaptiveThresholds {
    fn adapt(&mut self, analysis: &VectorAnalysis) {
        self.dim += (analysis.dim as f32 - self.dim) * LEARNING_RATE;
        self.sparsity += (analysis.sparsity - self.sparsity) * LEARNING_RATE;
        self.complexity += (analysis.complexity - self.complexity) * LEARNING_RATE;
        self.entropy += (analysis.entropy - self.entropy) * LEARNING_RATE;
    }
}

/// Estimated memory budget, in bytes, that a codec's footprint (e.g. a PQ
/// codebook) is allowed to occupy before a memory penalty kicks in.
pub const DEFAULT_MEMORY_BUDGET_BYTES: usize = 64 * 1024 * 1024;

/// Analyzes vectors, scores candidate codecs, and tracks adaptive state.
pub struct CompressionManager {
    memory_budget_bytes: usize,
    thresholds: parking_lot::Mutex<AdaptiveThresholds>,
    stats: parking_lot::Mutex<std::collections::HashMap<CodecKind, RollingStats>>,
}

impl Default for CompressionManager {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_BUDGET_BYTES)
    }
}

impl CompressionManager {
    /// Creates a manager with the given memory budget for codec selection.
    #[must_use]
    pub fn new(memory_budget_bytes: usize) -> Self {
        Self {
            memory_budget_bytes,
            thresholds: parking_lot::Mutex::new(AdaptiveThresholds::default()),
            stats: parking_lot::Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Records an observed outcome for a codec, feeding the rolling
    /// performance-bonus window.
    pub fn record_outcome(&self, codec: CodecKind, ratio: f32, quality: f32, time_ms: f32) {
        self.stats
            .lock()
            .entry(codec)
            .or_default()
            .record(CodecObservation {
                ratio,
                quality,
                time_ms,
            });
    }

    /// Scores every candidate codec against `values` and returns the
    /// top recommendation plus alternatives.
    #[must_use]
    pub fn auto_select(&self, values: &[f32], bias: QualityBias) -> Recommendation {
        let analysis = VectorAnalysis::compute(values);
        self.thresholds.lock().adapt(&analysis);
        let thresholds = *self.thresholds.lock();
        let stats = self.stats.lock();

        let mut scored: Vec<(CodecKind, f32, String)> = vec![
            self.score_scalar(&analysis, &thresholds, &stats),
            self.score_product(&analysis, &thresholds, &stats, bias),
            self.score_binary(&analysis, &stats),
        ];
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        let (best_kind, best_score, reasoning) = scored[0].clone();
        let alternatives = scored[1..].iter().map(|(k, s, _)| (*k, *s)).collect();

        tracing::debug!(codec = best_kind.name(), score = best_score, "auto_select chose codec");

        Recommendation {
            strategy: best_kind,
            est_ratio: estimate_ratio(best_kind, &analysis),
            est_loss: estimate_loss(best_kind),
            reasoning,
            confidence: best_score,
            alternatives,
        }
    }

    fn score_scalar(
        &self,
        analysis: &VectorAnalysis,
        thresholds: &AdaptiveThresholds,
        stats: &std::collections::HashMap<CodecKind, RollingStats>,
    ) -> (CodecKind, f32, String) {
        let mut score = 0.7;
        let mut reasons = vec!["scalar is the baseline codec".to_string()];

        if (analysis.dim as f32) < thresholds.dim {
            score += 0.1;
            reasons.push("vector is small".into());
        }
        if analysis.sparsity < thresholds.sparsity {
            score += 0.05;
            reasons.push("vector is dense".into());
        }
        if analysis.complexity < thresholds.complexity {
            score += 0.05;
            reasons.push("low complexity".into());
        }

        score += stats.get(&CodecKind::Scalar).map_or(0.0, RollingStats::bonus);
        (CodecKind::Scalar, score.clamp(0.0, 1.0), reasons.join("; "))
    }

    fn score_product(
        &self,
        analysis: &VectorAnalysis,
        thresholds: &AdaptiveThresholds,
        stats: &std::collections::HashMap<CodecKind, RollingStats>,
        bias: QualityBias,
    ) -> (CodecKind, f32, String) {
        let mut score = 0.5;
        let mut reasons = vec!["product quantization splits into subspaces".to_string()];

        if (analysis.dim as f32) >= thresholds.dim {
            score += 0.2;
            reasons.push("vector is large".into());
        }
        if analysis.entropy > thresholds.entropy {
            score += 0.1;
            reasons.push("high entropy".into());
        }
        if analysis.complexity > thresholds.complexity {
            score += 0.1;
            reasons.push("high complexity".into());
        }
        if bias == QualityBias::Quality {
            score += 0.1;
            reasons.push("caller biased for quality".into());
        }

        let estimated_codebook_bytes = analysis.dim * 256 * std::mem::size_of::<f32>();
        if estimated_codebook_bytes > self.memory_budget_bytes {
            score -= 0.3;
            reasons.push("codebook exceeds memory budget".into());
        }

        score += stats.get(&CodecKind::Product).map_or(0.0, RollingStats::bonus);
        (CodecKind::Product, score.clamp(0.0, 1.0), reasons.join("; "))
    }

    fn score_binary(
        &self,
        analysis: &VectorAnalysis,
        stats: &std::collections::HashMap<CodecKind, RollingStats>,
    ) -> (CodecKind, f32, String) {
        let mut score = 0.3;
        let mut reasons = vec!["binary quantization keeps only sign bits".to_string()];

        if analysis.binary_like {
            score += 0.4;
            reasons.push("values already look binary".into());
        }
        if analysis.sparsity > 0.8 {
            score += 0.2;
            reasons.push("vector is very sparse".into());
        }

        score += stats.get(&CodecKind::Binary).map_or(0.0, RollingStats::bonus);
        (CodecKind::Binary, score.clamp(0.0, 1.0), reasons.join("; "))
    }

    /// Compresses a vector with the auto-selected (or explicitly requested)
    /// strategy. Falls back to scalar with a warning if `Product` was
    /// requested but no `training` set was supplied to train a codebook on
    /// demand.
    pub fn compress(
        &self,
        values: &[f32],
        strategy: Option<CodecKind>,
        training: Option<&[Vec<f32>]>,
    ) -> (CodecKind, Vec<u8>) {
        let chosen = strategy.unwrap_or_else(|| self.auto_select(values, QualityBias::Speed).strategy);

        match chosen {
            CodecKind::Product => match training {
                Some(training_set) => {
                    let mut pq = ProductQuantizer::new(ProductQuantizerConfig::default());
                    match pq.train(training_set) {
                        Ok(()) => match pq.encode(values) {
                            Ok(codes) => (CodecKind::Product, codes),
                            Err(_) => self.scalar_fallback(values),
                        },
                        Err(_) => self.scalar_fallback(values),
                    }
                }
                None => {
                    tracing::warn!("PQ requested without training data; falling back to scalar");
                    self.scalar_fallback(values)
                }
            },
            CodecKind::Scalar | CodecKind::Binary | CodecKind::None => self.scalar_fallback(values),
        }
    }

    fn scalar_fallback(&self, values: &[f32]) -> (CodecKind, Vec<u8>) {
        let q = ScalarQuantizer::default();
        let batch = q.compress(values).unwrap_or_else(|_| {
            // Uniform strategy with default bit depth cannot fail; this arm
            // exists only to keep the function infallible for callers.
            ScalarQuantizer::default().compress(&[0.0]).unwrap()
        });
        let bytes = batch.codes.iter().map(|&c| c as u8).collect();
        (CodecKind::Scalar, bytes)
    }
}

fn estimate_ratio(kind: CodecKind, analysis: &VectorAnalysis) -> f32 {
    match kind {
        CodecKind::None => 1.0,
        CodecKind::Scalar => 4.0,
        CodecKind::Product => (analysis.dim as f32 * 4.0) / ProductQuantizerConfig::default().m as f32,
        CodecKind::Binary => 32.0,
    }
}

fn estimate_loss(kind: CodecKind) -> f32 {
    match kind {
        CodecKind::None => 0.0,
        CodecKind::Scalar => 0.01,
        CodecKind::Product => 0.05,
        CodecKind::Binary => 0.2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_binary_like_vector_prefers_binary() {
        let manager = CompressionManager::default();
        let values: Vec<f32> = (0..64).map(|i| if i % 8 == 0 { 1.0 } else { 0.0 }).collect();
        let rec = manager.auto_select(&values, QualityBias::Speed);
        assert_eq!(rec.strategy, CodecKind::Binary);
    }

    #[test]
    fn large_complex_vector_prefers_product_under_quality_bias() {
        let manager = CompressionManager::default();
        let values: Vec<f32> = (0..2048).map(|i| ((i as f32) * 0.37).sin()).collect();
        let rec = manager.auto_select(&values, QualityBias::Quality);
        assert_eq!(rec.strategy, CodecKind::Product);
    }

    #[test]
    fn small_dense_vector_prefers_scalar() {
        let manager = CompressionManager::default();
        let values: Vec<f32> = vec![0.1, 0.2, 0.15, 0.22, 0.18];
        let rec = manager.auto_select(&values, QualityBias::Speed);
        assert_eq!(rec.strategy, CodecKind::Scalar);
    }

    #[test]
    fn compress_falls_back_without_training_data() {
        let manager = CompressionManager::default();
        let values = vec![0.1; 16];
        let (kind, bytes) = manager.compress(&values, Some(CodecKind::Product), None);
        assert_eq!(kind, CodecKind::Scalar);
        assert_eq!(bytes.len(), 16);
    }

    #[test]
    fn analysis_entropy_is_zero_for_constant_vector() {
        let analysis = VectorAnalysis::compute(&vec![1.0; 32]);
        assert!(analysis.entropy.abs() < 1e-6);
    }
}
