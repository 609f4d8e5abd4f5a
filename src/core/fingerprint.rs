//! Content signatures for invocation dedup.
//!
//! Two invocations share a signature when the function name matches and the
//! arguments are equal as JSON, regardless of object key order. The
//! signature is a 64 bit xxHash over a canonical serialization, prefixed
//! with the function name so it stays readable in logs.

use serde_json::{Map, Value};
use twox_hash::XxHash64;

const SIGNATURE_SEED: u64 = 0;

/// Serialize a value with object keys sorted at every level.
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Signature of `function_name` called with `args`.
pub fn signature(function_name: &str, args: &Map<String, Value>) -> String {
    let mut canonical = String::with_capacity(function_name.len() + 64);
    canonical.push_str(function_name);
    canonical.push('\u{0}');
    write_canonical(&Value::Object(args.clone()), &mut canonical);
    let hash = XxHash64::oneshot(SIGNATURE_SEED, canonical.as_bytes());
    format!("{function_name}:{hash:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_signature_ignores_key_order() {
        let a = signature("search", &args(json!({"query": "rust", "limit": 5})));
        let b = signature("search", &args(json!({"limit": 5, "query": "rust"})));
        assert_eq!(a, b);
        assert!(a.starts_with("search:"));
        assert_eq!(a.len(), "search:".len() + 16);
    }

    #[test]
    fn test_signature_nested_order() {
        let a = signature("f", &args(json!({"o": {"x": 1, "y": [1, {"b": 2, "a": 1}]}})));
        let b = signature("f", &args(json!({"o": {"y": [1, {"a": 1, "b": 2}], "x": 1}})));
        assert_eq!(a, b);
    }

    #[test]
    fn test_signature_distinguishes_values_and_names() {
        let base = signature("search", &args(json!({"query": "rust"})));
        assert_ne!(base, signature("search", &args(json!({"query": "rusty"}))));
        assert_ne!(base, signature("lookup", &args(json!({"query": "rust"}))));
        // types matter: 5 and "5" are different arguments
        assert_ne!(
            signature("f", &args(json!({"n": 5}))),
            signature("f", &args(json!({"n": "5"})))
        );
    }

    #[test]
    fn test_canonicalize() {
        assert_eq!(
            canonicalize(&json!({"b": [true, null], "a": "x\"y"})),
            r#"{"a":"x\"y","b":[true,null]}"#
        );
    }
}
