//! SHA-256 hashing over raw and **canonical JSON** bytes.
//!
//! Deterministic: same canonical structure ⇒ same lowercase 64-hex across
//! OS/arch.

use digest::Digest;
use serde::Serialize;
use sha2::Sha256;

use crate::canonical_json::to_canonical_bytes;
use crate::IoError;

/// Compute lowercase 64-hex SHA-256 of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize()) // lowercase
}

/// SHA-256 of the canonical JSON representation; returns lowercase 64-hex.
pub fn sha256_canonical<T: Serialize>(value: &T) -> Result<String, IoError> {
    let bytes = to_canonical_bytes(value)?;
    Ok(sha256_hex(&bytes))
}

/// True iff string is **lowercase** hex of length `n`.
pub fn is_lower_hex_len(s: &str, n: usize) -> bool {
    s.len() == n && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
