//! Scalar quantizer.
//!
//! Maps each component of a float vector linearly into an n-bit integer
//! range using a shared `(min, max)`, with configurable bit depth and an
//! adaptive-bits mode that picks the smallest depth meeting a precision
//! bound.

use crate::error::{Error, Result};

/// Supported bit depths for scalar quantization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BitDepth {
    /// 4 bits per component (16 levels).
    Four,
    /// 8 bits per component (256 levels).
    Eight,
    /// 12 bits per component (4096 levels).
    Twelve,
    /// 16 bits per component (65536 levels).
    Sixteen,
}

impl BitDepth {
    const ALL: [Self; 4] = [Self::Four, Self::Eight, Self::Twelve, Self::Sixteen];

    /// Number of bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::Four => 4,
            Self::Eight => 8,
            Self::Twelve => 12,
            Self::Sixteen => 16,
        }
    }

    /// Maximum representable level, `2^bits - 1`.
    #[must_use]
    pub const fn max_level(self) -> u32 {
        (1u32 << self.bits()) - 1
    }
}

/// How the `(min, max)` range is derived from a batch of values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarStrategy {
    /// Range is the observed min/max of the values.
    Uniform,
    /// Range is the `[lo, hi]` percentile of the values, clamping outliers.
    Percentile {
        /// Lower percentile in `[0, 1]`.
        lo: f32,
        /// Upper percentile in `[0, 1]`.
        hi: f32,
    },
}

/// A scalar-quantized batch: packed codes plus the range needed to decode
/// them. Persisted layout is a fixed 256-byte header (magic, version,
/// bit-depth, strategy tag, dim, min, scale) followed by packed codes; here
/// we keep the header fields as a plain struct and let the caller handle
/// the byte-exact framing at the persistence boundary.
#[derive(Debug, Clone)]
pub struct ScalarQuantizedBatch {
    /// Bit depth used for every code in this batch.
    pub bit_depth: BitDepth,
    /// Dimension of each encoded vector.
    pub dim: usize,
    /// Range minimum used for decoding.
    pub min: f32,
    /// Range scale (`(max - min) / max_level`), used for decoding.
    pub scale: f32,
    /// Packed codes, one `u32` level per component, row-major per vector.
    pub codes: Vec<u32>,
}

/// Scalar quantizer parameters.
#[derive(Debug, Clone)]
pub struct ScalarQuantizer {
    /// Bit depth to encode at (ignored if `adaptive_bits` picks a lower one).
    pub bit_depth: BitDepth,
    /// Range-derivation strategy.
    pub strategy: ScalarStrategy,
    /// When true, `compress` searches for the smallest bit depth whose
    /// reconstruction error satisfies `max_precision_loss`.
    pub adaptive_bits: bool,
    /// Maximum allowed per-component reconstruction error under adaptive
    /// mode.
    pub max_precision_loss: f32,
}

impl Default for ScalarQuantizer {
    fn default() -> Self {
        Self {
            bit_depth: BitDepth::Eight,
            strategy: ScalarStrategy::Uniform,
            adaptive_bits: false,
            max_precision_loss: f32::INFINITY,
        }
    }
}

impl ScalarQuantizer {
    /// Compresses a single vector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QualityBelowThreshold`] if `adaptive_bits` is set and
    /// no supported bit depth satisfies `max_precision_loss`.
    pub fn compress(&self, values: &[f32]) -> Result<ScalarQuantizedBatch> {
        let (lo, hi) = self.range(values);

        if self.adaptive_bits {
            for depth in BitDepth::ALL {
                let batch = encode(values, depth, lo, hi);
                if max_reconstruction_error(values, &batch) <= self.max_precision_loss {
                    return Ok(batch);
                }
            }
            return Err(Error::QualityBelowThreshold(format!(
                "no bit depth achieves max_precision_loss={}",
                self.max_precision_loss
            )));
        }

        Ok(encode(values, self.bit_depth, lo, hi))
    }

    /// Compresses a batch of vectors sharing one `(min, max)` range, when
    /// their value ranges are comparable.
    #[must_use]
    pub fn compress_batch(&self, vectors: &[Vec<f32>]) -> ScalarQuantizedBatch {
        let all: Vec<f32> = vectors.iter().flatten().copied().collect();
        let (lo, hi) = self.range(&all);
        let dim = vectors.first().map_or(0, Vec::len);
        let mut codes = Vec::with_capacity(all.len());
        let scale = scale_for(lo, hi, self.bit_depth);
        for v in vectors {
            for &x in v {
                codes.push(level_for(x, lo, scale, self.bit_depth));
            }
        }
        ScalarQuantizedBatch {
            bit_depth: self.bit_depth,
            dim,
            min: lo,
            scale,
            codes,
        }
    }

    fn range(&self, values: &[f32]) -> (f32, f32) {
        match self.strategy {
            ScalarStrategy::Uniform => {
                let lo = values.iter().copied().fold(f32::INFINITY, f32::min);
                let hi = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                (lo, hi)
            }
            ScalarStrategy::Percentile { lo, hi } => {
                let mut sorted: Vec<f32> = values.to_vec();
                sorted.sort_by(f32::total_cmp);
                let n = sorted.len();
                if n == 0 {
                    return (0.0, 0.0);
                }
                let lo_idx = ((n as f32 - 1.0) * lo).round() as usize;
                let hi_idx = ((n as f32 - 1.0) * hi).round() as usize;
                (sorted[lo_idx.min(n - 1)], sorted[hi_idx.min(n - 1)])
            }
        }
    }
}

/// Decompresses a scalar-quantized batch back into per-vector float values.
#[must_use]
pub fn decompress(batch: &ScalarQuantizedBatch) -> Vec<Vec<f32>> {
    if batch.dim == 0 {
        return Vec::new();
    }
    batch
        .codes
        .chunks(batch.dim)
        .map(|chunk| {
            chunk
                .iter()
                .map(|&level| batch.min + level as f32 * batch.scale)
                .collect()
        })
        .collect()
}

fn encode(values: &[f32], depth: BitDepth, lo: f32, hi: f32) -> ScalarQuantizedBatch {
    let scale = scale_for(lo, hi, depth);
    let codes = values.iter().map(|&x| level_for(x, lo, scale, depth)).collect();
    ScalarQuantizedBatch {
        bit_depth: depth,
        dim: values.len(),
        min: lo,
        scale,
        codes,
    }
}

fn scale_for(lo: f32, hi: f32, depth: BitDepth) -> f32 {
    let range = (hi - lo).max(f32::EPSILON);
    range / depth.max_level() as f32
}

fn level_for(x: f32, lo: f32, scale: f32, depth: BitDepth) -> u32 {
    let clamped = x.clamp(lo, lo + scale * depth.max_level() as f32);
    (((clamped - lo) / scale).round() as i64).clamp(0, i64::from(depth.max_level())) as u32
}

fn max_reconstruction_error(original: &[f32], batch: &ScalarQuantizedBatch) -> f32 {
    original
        .iter()
        .zip(&batch.codes)
        .map(|(&x, &level)| (x - (batch.min + level as f32 * batch.scale)).abs())
        .fold(0.0, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_within_bound() {
        let values = vec![0.0, 0.25, 0.5, 0.75, 1.0];
        let q = ScalarQuantizer {
            bit_depth: BitDepth::Eight,
            ..Default::default()
        };
        let batch = q.compress(&values).unwrap();
        let restored = &decompress(&batch)[0];

        // Max per-component reconstruction error <= R / (2*(2^b - 1)).
        let range = 1.0_f32;
        let bound = range / (2.0 * BitDepth::Eight.max_level() as f32);
        for (orig, got) in values.iter().zip(restored) {
            assert!((orig - got).abs() <= bound + 1e-6);
        }
    }

    #[test]
    fn adaptive_bits_finds_small_depth_for_exact_levels() {
        // Values exactly representable at 4 bits (16 levels) over [0,1].
        let values: Vec<f32> = (0..16).map(|i| i as f32 / 15.0).collect();
        let q = ScalarQuantizer {
            adaptive_bits: true,
            max_precision_loss: 0.01,
            ..Default::default()
        };
        let batch = q.compress(&values).unwrap();
        assert_eq!(batch.bit_depth, BitDepth::Four);
    }

    #[test]
    fn adaptive_bits_fails_when_unreachable() {
        let values = vec![0.0, 0.33, 0.66, 1.0];
        let q = ScalarQuantizer {
            adaptive_bits: true,
            max_precision_loss: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            q.compress(&values),
            Err(Error::QualityBelowThreshold(_))
        ));
    }

    #[test]
    fn percentile_strategy_clamps_outliers() {
        let mut values = vec![0.0; 98];
        values.push(-1000.0);
        values.push(1000.0);
        let q = ScalarQuantizer {
            strategy: ScalarStrategy::Percentile { lo: 0.05, hi: 0.95 },
            ..Default::default()
        };
        let batch = q.compress(&values).unwrap();
        assert!(batch.min > -1000.0);
    }
}
