//! Canonical JSON encoding and content checksums.
//!
//! Canonical form: object keys sorted recursively in byte order,
//! compact separators, array order preserved. The checksum is the SHA-256 hex
//! digest of those bytes, so two states with equal content always share a
//! checksum regardless of the key order they were built with.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::StorageError;
use crate::types::{Envelope, StateData};
use crate::StorageResult;

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            let mut sorted = serde_json::Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.clone(), sort_keys(v));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Serialize `value` in canonical form.
pub fn canonical_json(value: &Value) -> StorageResult<Vec<u8>> {
    Ok(serde_json::to_vec(&sort_keys(value))?)
}

/// Canonical bytes of a state object.
pub fn canonical_state(data: &StateData) -> StorageResult<Vec<u8>> {
    canonical_json(&Value::Object(data.clone()))
}

/// SHA-256 lowercase hex digest of `bytes`.
pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Encode an envelope into the blob persisted by the byte store.
pub fn encode_envelope(state_key: &str, envelope: &Envelope) -> StorageResult<Vec<u8>> {
    serde_json::to_vec(envelope).map_err(|e| StorageError::corruption(state_key, e.to_string()))
}

/// Decode a persisted blob and verify its checksum.
pub fn decode_envelope(state_key: &str, bytes: &[u8]) -> StorageResult<Envelope> {
    let envelope: Envelope = serde_json::from_slice(bytes)
        .map_err(|e| StorageError::corruption(state_key, format!("malformed envelope: {e}")))?;

    let actual = checksum(&canonical_state(&envelope.data)?);
    if actual != envelope.metadata.checksum {
        return Err(StorageError::corruption(
            state_key,
            format!(
                "checksum mismatch: expected {}, got {}",
                envelope.metadata.checksum, actual
            ),
        ));
    }
    Ok(envelope)
}
