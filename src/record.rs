//! The vector record and its id/namespace-name validation rules.

use crate::error::{Error, Result};
use crate::metadata;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum byte length of a record id.
pub const MAX_ID_BYTES: usize = 255;

/// A vector record: a stable id, its values, and the bookkeeping fields the
/// rest of the system (eviction, quota, search) depends on.
///
/// Persisted layout: `{ id, values, magnitude, created_at,
/// last_accessed_at, access_count, metadata?, normalized?, codec_tag? }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorRecord {
    /// Stable identifier, unique within its namespace.
    pub id: String,
    /// Fixed-dimension vector values.
    pub values: Vec<f32>,
    /// Cached Euclidean norm of `values`, recomputed on update.
    pub magnitude: f32,
    /// Millisecond Unix timestamp of creation.
    pub created_at: u64,
    /// Millisecond Unix timestamp of the most recent read or search hit.
    pub last_accessed_at: u64,
    /// Monotonically non-decreasing read counter.
    pub access_count: u64,
    /// Free-form structured metadata (validated at the boundary, see
    /// [`metadata::validate`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Set when `values` has been pre-normalized (cosine fast path).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized: Option<bool>,
    /// Tag identifying the compression codec used to store this record, if
    /// any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec_tag: Option<String>,
}

impl VectorRecord {
    /// Creates a new record at the given timestamp with `access_count = 0`.
    #[must_use]
    pub fn new(id: String, values: Vec<f32>, metadata: Option<Value>, now_ms: u64) -> Self {
        let magnitude = magnitude_of(&values);
        Self {
            id,
            values,
            magnitude,
            created_at: now_ms,
            last_accessed_at: now_ms,
            access_count: 0,
            metadata,
            normalized: None,
            codec_tag: None,
        }
    }

    /// Bumps access bookkeeping on every read or search hit.
    pub fn record_access(&mut self, now_ms: u64) {
        self.last_accessed_at = now_ms;
        self.access_count += 1;
    }

    /// Replaces the vector values and recomputes the cached magnitude.
    pub fn set_values(&mut self, values: Vec<f32>) {
        self.magnitude = magnitude_of(&values);
        self.values = values;
    }

    /// Returns true if `metadata.permanent == true` (exempt from eviction).
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        metadata::is_permanent(self.metadata.as_ref())
    }

    /// Approximate resident size in bytes, used by quota/eviction byte
    /// accounting: the raw float payload plus a rough estimate for metadata.
    #[must_use]
    pub fn approx_size_bytes(&self) -> usize {
        let vector_bytes = self.values.len() * std::mem::size_of::<f32>();
        let metadata_bytes = self
            .metadata
            .as_ref()
            .map_or(0, |m| serde_json::to_vec(m).map(|v| v.len()).unwrap_or(0));
        vector_bytes + metadata_bytes + self.id.len() + 64
    }
}

fn magnitude_of(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum::<f32>().sqrt()
}

/// Validates a record id: non-empty, ≤255 bytes, no control or path
/// characters.
///
/// # Errors
///
/// Returns [`Error::InvalidFormat`] when the id is empty, too long, or
/// contains a forbidden character.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::InvalidFormat("id must not be empty".into()));
    }
    if id.len() > MAX_ID_BYTES {
        return Err(Error::InvalidFormat(format!(
            "id exceeds {MAX_ID_BYTES} bytes"
        )));
    }
    if id.chars().any(|c| c.is_control() || c == '/' || c == '\\') {
        return Err(Error::InvalidFormat(
            "id must not contain control or path characters".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_record_has_zero_access_count() {
        let r = VectorRecord::new("a".into(), vec![1.0, 0.0], None, 1000);
        assert_eq!(r.access_count, 0);
        assert!((r.magnitude - 1.0).abs() < 1e-6);
    }

    #[test]
    fn record_access_increments_monotonically() {
        let mut r = VectorRecord::new("a".into(), vec![1.0], None, 0);
        r.record_access(10);
        r.record_access(20);
        assert_eq!(r.access_count, 2);
        assert_eq!(r.last_accessed_at, 20);
    }

    #[test]
    fn set_values_recomputes_magnitude() {
        let mut r = VectorRecord::new("a".into(), vec![1.0, 0.0], None, 0);
        r.set_values(vec![3.0, 4.0]);
        assert!((r.magnitude - 5.0).abs() < 1e-6);
    }

    #[test]
    fn permanent_flag_from_metadata() {
        let r = VectorRecord::new("a".into(), vec![1.0], Some(json!({"permanent": true})), 0);
        assert!(r.is_permanent());
    }

    #[test]
    fn validate_id_rejects_empty_and_long_and_control() {
        assert!(validate_id("").is_err());
        assert!(validate_id(&"x".repeat(MAX_ID_BYTES + 1)).is_err());
        assert!(validate_id("a/b").is_err());
        assert!(validate_id("a\nb").is_err());
        assert!(validate_id("valid-id_123").is_ok());
    }
}
