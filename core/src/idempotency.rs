//! Idempotency hashing helpers.
//!
//! A replayed idempotency key must carry the same canonical request body.
//! The body's SHA-256 hex digest is stored next to the key; a divergent
//! digest on replay is a conflict, not a cache hit.

use sha2::{Digest, Sha256};

/// SHA-256 hex digest of a canonical payload.
#[must_use]
pub fn hash_payload(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Redis key for the hot-path idempotency cache (24 h TTL set at call site).
#[must_use]
pub fn cache_key(service: &str, idempotency_key: &str) -> String {
    format!("idempotency:{service}:{idempotency_key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_hex() {
        let a = hash_payload(b"{\"riderId\":\"usr_101\"}");
        let b = hash_payload(b"{\"riderId\":\"usr_101\"}");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_payloads_hash_differently() {
        assert_ne!(hash_payload(b"a"), hash_payload(b"b"));
    }

    #[test]
    fn cache_key_namespaces_by_service() {
        assert_eq!(cache_key("dispatch", "ik-1"), "idempotency:dispatch:ik-1");
    }
}
