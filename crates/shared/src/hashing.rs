//! Hashing utilities for cache keys and payload fingerprints.

use sha2::{Digest, Sha256};

/// Computes SHA-256 hash of the input and returns it as a hex string.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Computes a stable fingerprint of a JSON payload.
///
/// The value is serialized with `serde_json` (which preserves map ordering
/// via its default `BTreeMap`-backed object when parsed from a struct, and
/// the caller's insertion order otherwise) and hashed. Two structurally
/// identical payloads produce the same fingerprint.
pub fn payload_fingerprint(payload: &serde_json::Value) -> String {
    sha256_hex(&payload.to_string())
}
