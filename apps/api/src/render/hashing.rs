//! Content addressing for compiled artifacts.
//!
//! A cache key is the SHA-256 digest of the payload's canonical JSON
//! form: object keys sorted lexicographically at every nesting level,
//! so two payloads that differ only in key insertion order address the
//! same artifact.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Content address of a compiled artifact. Fixed 32-byte SHA-256 digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Full hex encoding, used as the on-disk filename stem.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 12 hex chars, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

/// Computes the content address of a document payload.
///
/// The only failure mode is a payload that cannot be re-serialized,
/// which is a caller contract violation.
pub fn payload_key(payload: &Value) -> Result<CacheKey, serde_json::Error> {
    let canonical = serde_json::to_string(&sort_keys(payload))?;
    Ok(CacheKey(Sha256::digest(canonical.as_bytes()).into()))
}

/// Rebuilds the value with object keys in lexicographic order at every
/// level. Arrays keep their element order (it is meaningful).
fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            Value::Object(
                keys.into_iter()
                    .map(|k| (k.clone(), sort_keys(&map[k])))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}
