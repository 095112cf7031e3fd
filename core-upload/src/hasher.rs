//! Content digests used as the dedup key between the working set and the
//! upload queue.

use sha2::{Digest, Sha256};

/// Computes a stable digest over raw bytes.
///
/// Implementations must be pure: equal input always yields an equal,
/// non-empty digest.
pub trait ContentHasher: Send + Sync {
    fn digest(&self, data: &[u8]) -> String;

    /// Short name recorded alongside digests in logs
    fn algorithm(&self) -> &'static str;
}

/// SHA-256 rendered as lowercase hex
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl ContentHasher for Sha256Hasher {
    fn digest(&self, data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }

    fn algorithm(&self) -> &'static str {
        "sha256"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_digest() {
        let hasher = Sha256Hasher;
        let digest = hasher.digest(b"test data");

        assert_eq!(digest.len(), 64);
        assert_eq!(
            digest,
            "916f0027a575074ce72a331777c3478d6513f786a591bd892da1a577bf2335f9"
        );
        assert_eq!(hasher.algorithm(), "sha256");
    }

    #[test]
    fn test_digest_is_deterministic() {
        let hasher = Sha256Hasher;
        assert_eq!(hasher.digest(b"same"), hasher.digest(b"same"));
        assert_ne!(hasher.digest(b"same"), hasher.digest(b"other"));
        assert!(!hasher.digest(b"").is_empty());
    }
}
