//! Payload digests.
//!
//! Claim digests use SHA3-256 so that the replay key is a standardized hash,
//! independent of the BLAKE3 hashes used for the chain itself. Blob references
//! use SHA-256 content addressing, which is what most object stores expose.

use sha2::Sha256;
use sha3::{Digest, Sha3_256};

use super::hash::Hash;

/// Streaming SHA3-256 digest producing a [`Hash`].
pub struct Sha3Digest {
    inner: Sha3_256,
}

impl Default for Sha3Digest {
    fn default() -> Self {
        Self::new()
    }
}

impl Sha3Digest {
    /// Create an empty digest
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Sha3_256::new(),
        }
    }

    /// Absorb bytes
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.inner.update(data);
        self
    }

    /// Finish the digest
    #[must_use]
    pub fn finalize(self) -> Hash {
        Hash::from_bytes(self.inner.finalize().into())
    }
}

/// SHA-256 content address of a blob.
#[must_use]
pub fn content_address(content: &[u8]) -> Hash {
    Hash::from_bytes(Sha256::digest(content).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha3_digest_matches_one_shot() {
        let mut digest = Sha3Digest::new();
        digest.update(b"run").update(b"5000");
        let streamed = digest.finalize();

        let one_shot = Hash::from_bytes(Sha3_256::digest(b"run5000").into());
        assert_eq!(streamed, one_shot);
    }

    #[test]
    fn test_content_address_is_sha256() {
        let addr = content_address(b"");
        assert_eq!(
            addr.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
