//! BLAKE3 hashing for entry hashes, ids and the ledger chain.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte digest
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Hash([u8; 32]);

impl Hash {
    /// The zero hash (parent of the first ledger entry)
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a hash from raw bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the underlying bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string
    ///
    /// # Errors
    /// Returns error if hex string is invalid or wrong length
    pub fn from_hex(s: &str) -> Result<Self, super::CryptoError> {
        let bytes = hex::decode(s).map_err(|e| super::CryptoError::InvalidHash(e.to_string()))?;

        let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            super::CryptoError::InvalidHash(format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    /// Check for the zero hash
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Incremental BLAKE3 hasher with an optional domain tag.
pub struct Hasher {
    inner: blake3::Hasher,
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher {
    /// Create a new hasher
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: blake3::Hasher::new(),
        }
    }

    /// Create a hasher whose output is bound to `domain`.
    ///
    /// Entry hashes, claim ids and attestation payloads each use their own
    /// domain so a digest from one context never validates in another.
    #[must_use]
    pub fn with_domain(domain: &str) -> Self {
        let mut hasher = Self::new();
        hasher.update(&(domain.len() as u64).to_le_bytes());
        hasher.update(domain.as_bytes());
        hasher
    }

    /// Update the hasher with data
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.inner.update(data);
        self
    }

    /// Finalize and get the hash
    #[must_use]
    pub fn finalize(&self) -> Hash {
        Hash::from_bytes(*self.inner.finalize().as_bytes())
    }
}

/// Hash arbitrary data
#[must_use]
pub fn hash_data(data: &[u8]) -> Hash {
    Hash::from_bytes(*blake3::hash(data).as_bytes())
}

/// Binary Merkle root over `hashes`; odd nodes are paired with themselves.
/// An empty list yields the zero hash.
#[must_use]
pub fn merkle_root(hashes: &[Hash]) -> Hash {
    if hashes.is_empty() {
        return Hash::ZERO;
    }

    let mut level: Vec<Hash> = hashes.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let right = pair.get(1).unwrap_or(&pair[0]);
                Hasher::with_domain("stridechain/merkle")
                    .update(pair[0].as_bytes())
                    .update(right.as_bytes())
                    .finalize()
            })
            .collect();
    }

    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domains_separate_identical_payloads() {
        let a = Hasher::with_domain("entry").update(b"payload").finalize();
        let b = Hasher::with_domain("claim").update(b"payload").finalize();
        assert_ne!(a, b);
        assert_ne!(a, hash_data(b"payload"));
    }

    #[test]
    fn test_merkle_root_is_order_sensitive() {
        let hashes: Vec<Hash> = (0u8..5).map(|i| hash_data(&[i])).collect();
        let mut reversed = hashes.clone();
        reversed.reverse();

        assert_eq!(merkle_root(&hashes), merkle_root(&hashes));
        assert_ne!(merkle_root(&hashes), merkle_root(&reversed));
        assert_eq!(merkle_root(&[]), Hash::ZERO);
        assert_eq!(merkle_root(&hashes[..1]), hashes[0]);
    }

    #[test]
    fn test_hex_rejects_wrong_length() {
        let parsed = Hash::from_hex(&hash_data(b"x").to_hex()).unwrap();
        assert_eq!(parsed, hash_data(b"x"));
        assert!(Hash::from_hex("abcd").is_err());
    }
}
