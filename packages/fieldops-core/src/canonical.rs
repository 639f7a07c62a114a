//! Canonical JSON: recursively key-sorted values, used wherever two JSON
//! payloads need structural equality independent of serialization order
//! (idempotency comparisons, receipt fixtures in tests).

use std::collections::BTreeMap;

use serde_json::Value;

pub fn to_canonical_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: BTreeMap<String, Value> = BTreeMap::new();
            for (k, v) in map {
                sorted.insert(k.clone(), to_canonical_value(v));
            }
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(to_canonical_value).collect()),
        other => other.clone(),
    }
}

pub fn canonical_string(value: &Value) -> String {
    serde_json::to_string(&to_canonical_value(value)).expect("canonical value always serializes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_canonical_string() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_string(&a), canonical_string(&b));
    }

    #[test]
    fn nested_objects_are_sorted_recursively() {
        let v = json!({"outer": {"z": 1, "y": {"b": 2, "a": 3}}});
        assert_eq!(canonical_string(&v), r#"{"outer":{"y":{"a":3,"b":2},"z":1}}"#);
    }
}
