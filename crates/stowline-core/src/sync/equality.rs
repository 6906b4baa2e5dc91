//! Structural equality over JSON-like values.
//!
//! A missing value and an explicit `null` are the same thing here, at the
//! top level and inside objects. Arrays compare in order.

use serde_json::{Map, Number, Value};

/// Recursive structural comparison used by content diffing.
pub fn deep_equal(left: Option<&Value>, right: Option<&Value>) -> bool {
    match (present(left), present(right)) {
        (None, None) => true,
        (Some(left), Some(right)) => values_equal(left, right),
        _ => false,
    }
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|value| !value.is_null())
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Bool(left), Value::Bool(right)) => left == right,
        (Value::Number(left), Value::Number(right)) => numbers_equal(left, right),
        (Value::String(left), Value::String(right)) => left == right,
        (Value::Array(left), Value::Array(right)) => {
            left.len() == right.len()
                && left
                    .iter()
                    .zip(right)
                    .all(|(left, right)| deep_equal(Some(left), Some(right)))
        }
        (Value::Object(left), Value::Object(right)) => objects_equal(left, right),
        _ => false,
    }
}

fn numbers_equal(left: &Number, right: &Number) -> bool {
    if let (Some(left), Some(right)) = (left.as_i64(), right.as_i64()) {
        return left == right;
    }
    if let (Some(left), Some(right)) = (left.as_u64(), right.as_u64()) {
        return left == right;
    }
    match (left.as_f64(), right.as_f64()) {
        #[allow(clippy::float_cmp)]
        (Some(left), Some(right)) => left == right,
        _ => false,
    }
}

fn objects_equal(left: &Map<String, Value>, right: &Map<String, Value>) -> bool {
    left.keys()
        .chain(right.keys())
        .all(|key| deep_equal(left.get(key), right.get(key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eq(left: &Value, right: &Value) -> bool {
        deep_equal(Some(left), Some(right))
    }

    #[test]
    fn missing_and_null_are_equivalent() {
        assert!(deep_equal(None, None));
        assert!(deep_equal(None, Some(&Value::Null)));
        assert!(!deep_equal(None, Some(&json!(""))));
        assert!(eq(&json!({"a": 1, "b": null}), &json!({"a": 1})));
    }

    #[test]
    fn primitives_compare_by_value() {
        assert!(eq(&json!(1), &json!(1.0)));
        assert!(!eq(&json!(1), &json!("1")));
        assert!(!eq(&json!(true), &json!(1)));
        assert!(eq(&json!("Sofa"), &json!("Sofa")));
        assert!(!eq(&json!("Sofa"), &json!("Sofa (restored)")));
    }

    #[test]
    fn arrays_are_order_sensitive() {
        assert!(eq(&json!([1, 2, 3]), &json!([1, 2, 3])));
        assert!(!eq(&json!([1, 2, 3]), &json!([3, 2, 1])));
        assert!(!eq(&json!([1, 2]), &json!([1, 2, null])));
    }

    #[test]
    fn nested_structures_recurse() {
        let left = json!([{"url": "a.jpg", "caption": null, "primary": true}]);
        let right = json!([{"url": "a.jpg", "primary": true}]);
        assert!(eq(&left, &right));

        let moved = json!([{"url": "b.jpg", "primary": true}]);
        assert!(!eq(&left, &moved));
    }
}
