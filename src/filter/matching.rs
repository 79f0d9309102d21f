//! Leaf-operator comparison semantics shared by the filter compiler.

use super::LeafOp;
use serde_json::Value;
use std::cmp::Ordering;

pub(super) fn eval_leaf(op: &LeafOp, value: Option<&Value>) -> bool {
    match op {
        LeafOp::Eq(expected) => value == Some(expected),
        LeafOp::Ne(expected) => value != Some(expected),
        LeafOp::Gt(expected) => compare(value, expected) == Some(Ordering::Greater),
        LeafOp::Gte(expected) => matches!(
            compare(value, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        LeafOp::Lt(expected) => compare(value, expected) == Some(Ordering::Less),
        LeafOp::Lte(expected) => matches!(
            compare(value, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        LeafOp::In(values) => value.is_some_and(|v| values.iter().any(|expected| v == expected)),
        LeafOp::Nin(values) => !value.is_some_and(|v| values.iter().any(|expected| v == expected)),
        LeafOp::Exists(expected) => value.is_some() == *expected,
        LeafOp::Regex(regex) => value
            .and_then(Value::as_str)
            .is_some_and(|s| regex.is_match(s)),
    }
}

/// Numeric/string ordering comparison. Returns `None` when the two values
/// are not comparable (different types, or neither numeric nor string).
fn compare(value: Option<&Value>, expected: &Value) -> Option<Ordering> {
    let value = value?;
    if let (Some(a), Some(b)) = (value.as_f64(), expected.as_f64()) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (value.as_str(), expected.as_str()) {
        return Some(a.cmp(b));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_comparison() {
        assert_eq!(compare(Some(&json!(5)), &json!(3)), Some(Ordering::Greater));
        assert_eq!(compare(Some(&json!(3)), &json!(5)), Some(Ordering::Less));
    }

    #[test]
    fn string_comparison() {
        assert_eq!(
            compare(Some(&json!("b")), &json!("a")),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn incomparable_types_are_none() {
        assert_eq!(compare(Some(&json!("a")), &json!(1)), None);
    }
}
