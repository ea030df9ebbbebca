//! CanonHash: canonical JSON bytes + SHA-256 content addressing.
//!
//! Grounded on `constellation_2/phaseA/lib/canon_json_v1.py` and the
//! stricter `phaseC` variant (`_walk_assert_no_floats`, `allow_nan=False`),
//! using the teacher's own `sha2::{Digest, Sha256}` pattern from
//! `backtest_v2/data_pipeline.rs::RawPayload::hash`.

use sha2::{Digest, Sha256};

use crate::value::{CanonicalizationError, Value};

/// `sha256_hex(canonical_bytes(v))`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn canonical_bytes(v: &serde_json::Value) -> Result<Vec<u8>, CanonicalizationError> {
    Ok(Value::from_json(v)?.canonical_bytes())
}

pub fn canonical_hash(v: &serde_json::Value) -> Result<String, CanonicalizationError> {
    Ok(sha256_hex(&canonical_bytes(v)?))
}

/// Deep-clones `obj`, sets the named top-level fields to `null`, then
/// canonical-hashes the result. Mirrors
/// `canonical_hash_excluding_fields_v1`.
pub fn hash_excluding_fields(
    obj: &serde_json::Value,
    fields: &[&str],
) -> Result<String, CanonicalizationError> {
    let mut cloned = obj.clone();
    if let Some(map) = cloned.as_object_mut() {
        for field in fields {
            map.insert((*field).to_string(), serde_json::Value::Null);
        }
    }
    canonical_hash(&cloned)
}

/// The standard convention used by every artifact in this repository:
/// hash with `canonical_json_hash` forced to null.
pub fn hash_for_artifact(obj: &serde_json::Value) -> Result<String, CanonicalizationError> {
    hash_excluding_fields(obj, &["canonical_json_hash"])
}

/// Returns a new object with `canonical_json_hash` set to the hash computed
/// over the object with that field forced to null first (self-hash-null).
pub fn inject_self_hash(
    obj: &serde_json::Value,
    field_name: &str,
) -> Result<(serde_json::Value, String), CanonicalizationError> {
    let hash = hash_excluding_fields(obj, &[field_name])?;
    let mut out = obj.clone();
    if let Some(map) = out.as_object_mut() {
        map.insert(field_name.to_string(), serde_json::Value::String(hash.clone()));
    }
    Ok((out, hash))
}
