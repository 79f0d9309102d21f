//! Dynamic metadata tree attached to vector records.
//!
//! Metadata is a bounded recursive tree of strings, numbers, booleans, null,
//! arrays, and nested maps. We represent it with `serde_json::Value` directly
//! and validate the bounds once at the boundary; downstream code — the
//! filter evaluator, the eviction manager's `priority` lookup — treats it as
//! an opaque value.

use crate::error::{Error, Result};
use serde_json::Value;

/// Maximum nesting depth for a metadata map or array.
pub const MAX_DEPTH: usize = 10;
/// Maximum number of keys in any single metadata object.
pub const MAX_KEYS: usize = 1_000;
/// Maximum number of entries in any single metadata array.
pub const MAX_ARRAY_ENTRIES: usize = 10_000;
/// Maximum length, in bytes, of any single metadata string.
pub const MAX_STRING_BYTES: usize = 10 * 1024;

/// Validates a metadata value against the depth/size bounds above, recursively.
///
/// # Errors
///
/// Returns [`Error::InvalidFormat`] if depth, key count, array length, or
/// string length exceed the configured bounds.
pub fn validate(value: &Value) -> Result<()> {
    validate_at_depth(value, 0)
}

fn validate_at_depth(value: &Value, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::InvalidFormat(format!(
            "metadata nesting exceeds max depth {MAX_DEPTH}"
        )));
    }

    match value {
        Value::String(s) => {
            if s.len() > MAX_STRING_BYTES {
                return Err(Error::InvalidFormat(format!(
                    "metadata string exceeds {MAX_STRING_BYTES} bytes"
                )));
            }
        }
        Value::Array(items) => {
            if items.len() > MAX_ARRAY_ENTRIES {
                return Err(Error::InvalidFormat(format!(
                    "metadata array exceeds {MAX_ARRAY_ENTRIES} entries"
                )));
            }
            for item in items {
                validate_at_depth(item, depth + 1)?;
            }
        }
        Value::Object(map) => {
            if map.len() > MAX_KEYS {
                return Err(Error::InvalidFormat(format!(
                    "metadata object exceeds {MAX_KEYS} keys"
                )));
            }
            for v in map.values() {
                validate_at_depth(v, depth + 1)?;
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }

    Ok(())
}

/// Returns true if `metadata.permanent == true`.
#[must_use]
pub fn is_permanent(metadata: Option<&Value>) -> bool {
    metadata
        .and_then(|m| m.get("permanent"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Reads `metadata.priority` as a float in `[0, 1]`, defaulting to `0.5`.
#[must_use]
pub fn priority(metadata: Option<&Value>) -> f32 {
    metadata
        .and_then(|m| m.get("priority"))
        .and_then(Value::as_f64)
        .map_or(0.5, |p| p.clamp(0.0, 1.0) as f32)
}

/// Reads a value at a dot-notation path, e.g. `"user.name"`, used by the
/// filter compiler to support nested-field conditions.
#[must_use]
pub fn get_path<'a>(metadata: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = metadata;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_well_formed_metadata() {
        let v = json!({"group": "A", "value": 1, "tags": ["a", "b"]});
        assert!(validate(&v).is_ok());
    }

    #[test]
    fn rejects_too_many_keys() {
        let mut map = serde_json::Map::new();
        for i in 0..(MAX_KEYS + 1) {
            map.insert(i.to_string(), json!(1));
        }
        let v = Value::Object(map);
        assert!(validate(&v).is_err());
    }

    #[test]
    fn rejects_oversized_string() {
        let v = json!({"blob": "x".repeat(MAX_STRING_BYTES + 1)});
        assert!(validate(&v).is_err());
    }

    #[test]
    fn rejects_excessive_nesting() {
        let mut v = json!(1);
        for _ in 0..(MAX_DEPTH + 2) {
            v = json!({"nested": v});
        }
        assert!(validate(&v).is_err());
    }

    #[test]
    fn permanent_flag_detection() {
        let v = json!({"permanent": true});
        assert!(is_permanent(Some(&v)));
        assert!(!is_permanent(Some(&json!({"permanent": false}))));
        assert!(!is_permanent(None));
    }

    #[test]
    fn priority_default_and_clamp() {
        assert!((priority(None) - 0.5).abs() < 1e-6);
        assert!((priority(Some(&json!({"priority": 2.0}))) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn nested_path_lookup() {
        let v = json!({"user": {"name": "ada"}});
        assert_eq!(get_path(&v, "user.name").unwrap(), &json!("ada"));
        assert!(get_path(&v, "user.missing").is_none());
    }
}
