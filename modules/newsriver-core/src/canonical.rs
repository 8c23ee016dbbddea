//! Canonical JSON serialization for payload hashing.
//!
//! The ledger's idempotency key includes a hash of the payload, so the byte
//! form must be stable across re-serialization: keys recursively sorted,
//! UTF-8, no insignificant whitespace, numbers emitted from their parsed
//! value. Two deliveries of the same logical payload always hash equal.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialize a JSON value canonically: object keys sorted at every depth,
/// no whitespace between tokens.
pub fn canonical_json_bytes(value: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    write_canonical(value, &mut out);
    out
}

/// SHA-256 over the canonical byte form. This is the `payload_hash` stored
/// on every raw arrival.
pub fn payload_hash(value: &Value) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json_bytes(value));
    hasher.finalize().to_vec()
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Value::String(s) => {
            // serde_json's string escaping is deterministic
            out.extend_from_slice(
                serde_json::to_string(s)
                    .expect("string serialization is infallible")
                    .as_bytes(),
            );
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.extend_from_slice(
                    serde_json::to_string(key)
                        .expect("string serialization is infallible")
                        .as_bytes(),
                );
                out.push(b':');
                write_canonical(&map[*key], out);
            }
            out.push(b'}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_sorted_at_every_depth() {
        let v = json!({"b": {"z": 1, "a": 2}, "a": [{"y": 1, "x": 2}]});
        let bytes = canonical_json_bytes(&v);
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":[{"x":2,"y":1}],"b":{"a":2,"z":1}}"#
        );
    }

    #[test]
    fn no_insignificant_whitespace() {
        let v: Value = serde_json::from_str("{ \"a\" : [ 1 , 2 ] }").unwrap();
        assert_eq!(canonical_json_bytes(&v), br#"{"a":[1,2]}"#);
    }

    #[test]
    fn hash_stable_across_key_order() {
        let a: Value = serde_json::from_str(r#"{"source":"hn","title":"x"}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"title":"x","source":"hn"}"#).unwrap();
        assert_eq!(payload_hash(&a), payload_hash(&b));
    }

    #[test]
    fn hash_differs_on_value_change() {
        let a = json!({"title": "x"});
        let b = json!({"title": "y"});
        assert_ne!(payload_hash(&a), payload_hash(&b));
    }

    #[test]
    fn hash_is_32_bytes() {
        assert_eq!(payload_hash(&json!({})).len(), 32);
    }

    #[test]
    fn unicode_strings_round_trip() {
        let a: Value = serde_json::from_str(r#"{"t":"café"}"#).unwrap();
        let b = json!({"t": "café"});
        assert_eq!(payload_hash(&a), payload_hash(&b));
    }
}
