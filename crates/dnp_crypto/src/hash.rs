//! BLAKE3-based hash utilities
//!
//! - Envelope integrity digests (checked before any decryption attempt)
//! - Content digests used to break equal-timestamp merge ties deterministically

pub fn hash(data: &[u8]) -> [u8; 32] {
    blake3::hash(data).into()
}

/// Integrity digest for a sync envelope: H(tag || id || timestamp || ciphertext), hex.
///
/// The id and timestamp are bound so an envelope cannot be replayed under a
/// different record or clock value without detection.
pub fn envelope_digest(id: &str, timestamp_ms: i64, ciphertext_b64: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"dnp-envelope-v1\x00");
    hasher.update(id.as_bytes());
    hasher.update(b"\x00");
    hasher.update(&timestamp_ms.to_le_bytes());
    hasher.update(b"\x00");
    hasher.update(ciphertext_b64.as_bytes());
    hex::encode(hasher.finalize().as_bytes())
}

/// Recompute and compare an envelope digest in constant time.
pub fn verify_envelope_digest(id: &str, timestamp_ms: i64, ciphertext_b64: &str, expected_hex: &str) -> bool {
    let computed = envelope_digest(id, timestamp_ms, ciphertext_b64);
    constant_time_eq(computed.as_bytes(), expected_hex.to_ascii_lowercase().as_bytes())
}

/// Digest of canonical plaintext content. Equal content gives equal digests on every replica.
pub fn content_digest(canonical: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"dnp-content-v1\x00");
    hasher.update(canonical);
    hasher.finalize().into()
}

pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_binds_every_field() {
        let base = envelope_digest("id-1", 1000, "Y2lwaGVy");
        assert_eq!(base.len(), 64);
        assert_ne!(base, envelope_digest("id-2", 1000, "Y2lwaGVy"));
        assert_ne!(base, envelope_digest("id-1", 1001, "Y2lwaGVy"));
        assert_ne!(base, envelope_digest("id-1", 1000, "Y2lwaGVz"));
    }

    #[test]
    fn verify_accepts_uppercase_hex() {
        let d = envelope_digest("id", 5, "abc");
        assert!(verify_envelope_digest("id", 5, "abc", &d));
        assert!(verify_envelope_digest("id", 5, "abc", &d.to_uppercase()));
        assert!(!verify_envelope_digest("id", 6, "abc", &d));
        assert!(!verify_envelope_digest("id", 5, "abc", "deadbeef"));
    }

    #[test]
    fn content_digest_is_stable() {
        assert_eq!(content_digest(b"{\"a\":1}"), content_digest(b"{\"a\":1}"));
        assert_ne!(content_digest(b"{\"a\":1}"), content_digest(b"{\"a\":2}"));
    }
}
