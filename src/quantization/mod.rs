//! Quantization codecs: scalar and product quantization.

mod product;
mod scalar;

pub use product::{ProductCodebook, ProductQuantizer, ProductQuantizerConfig};
pub use scalar::{decompress, BitDepth, ScalarQuantizedBatch, ScalarQuantizer, ScalarStrategy};

/// Which codec a compressed payload was encoded with, persisted as
/// `codec_tag` on the record and used to pick the right decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    /// No compression.
    None,
    /// Per-component linear scalar quantization.
    Scalar,
    /// Product quantization with a shared codebook.
    Product,
    /// 1-bit-per-component binary quantization (sign of each component).
    Binary,
}

impl CodecKind {
    /// Human-readable name, matches the `compression` enum in namespace
    /// config.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Scalar => "scalar",
            Self::Product => "product",
            Self::Binary => "binary",
        }
    }
}
