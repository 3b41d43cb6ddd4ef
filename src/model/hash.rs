//! Deterministic digest of a task configuration.
//!
//! Two configurations that differ only in object key order hash the same.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// SHA-256 of the canonical serialization, as lowercase hex.
pub fn config_hash(configuration: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(configuration, &mut canonical);
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{digest:x}")
}

/// Compact JSON with object keys sorted at every depth.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(val, out);
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_change_hash() {
        let a: Value = serde_json::from_str(r#"{"x": 1, "y": {"b": [1, 2], "a": null}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y": {"a": null, "b": [1, 2]}, "x": 1}"#).unwrap();
        assert_eq!(config_hash(&a), config_hash(&b));
    }

    #[test]
    fn different_values_hash_differently() {
        assert_ne!(config_hash(&json!({"x": 1})), config_hash(&json!({"x": 2})));
        assert_ne!(config_hash(&json!([1, 2])), config_hash(&json!([2, 1])));
        assert_ne!(config_hash(&json!({"x": "1"})), config_hash(&json!({"x": 1})));
    }

    #[test]
    fn hash_is_hex_sha256() {
        let h = config_hash(&json!({}));
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        // sha256("{}")
        assert_eq!(
            h,
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }
}
