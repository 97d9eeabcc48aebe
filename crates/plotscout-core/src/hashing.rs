//! Canonical JSON and content hashing.
//!
//! Fingerprints must be stable across processes because they key the
//! persisted response cache, so they are computed over a canonical JSON
//! rendering (sorted object keys, no whitespace) hashed with SHA-256.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Render a JSON value with sorted object keys and no insignificant whitespace.
pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => Value::String(s.clone()).to_string(),
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(to_canonical_json).collect();
            format!("[{}]", rendered.join(","))
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, String> = map
                .iter()
                .map(|(k, v)| (k, to_canonical_json(v)))
                .collect();
            let rendered: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), v))
                .collect();
            format!("{{{}}}", rendered.join(","))
        }
    }
}

/// Hex-encoded SHA-256 of a string.
pub fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Hex-encoded SHA-256 of the canonical rendering of a JSON value.
pub fn hash_json(value: &Value) -> String {
    sha256_hex(&to_canonical_json(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_keys_sorted() {
        let val = json!({ "b": 2, "a": 1 });
        assert_eq!(to_canonical_json(&val), "{\"a\":1,\"b\":2}");
    }

    #[test]
    fn test_nested_and_escaped() {
        let val = json!({ "z": [ { "y": "q\"uote" }, null ], "a": { "x": 10 } });
        assert_eq!(
            to_canonical_json(&val),
            "{\"a\":{\"x\":10},\"z\":[{\"y\":\"q\\\"uote\"},null]}"
        );
    }

    #[test]
    fn test_key_order_does_not_change_hash() {
        let a = json!({ "model": "m", "temperature": 0.2 });
        let b = json!({ "temperature": 0.2, "model": "m" });
        assert_eq!(hash_json(&a), hash_json(&b));
        assert_eq!(hash_json(&a).len(), 64);
    }

    #[test]
    fn test_sha256_known_value() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
