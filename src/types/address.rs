//! Account addresses.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::{CryptoError, Hasher, PublicKey};

/// A 20-byte account address derived from an Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address([u8; 20]);

impl Address {
    /// Derive the address for a public key (first 20 bytes of a domain-tagged BLAKE3).
    #[must_use]
    pub fn from_public_key(key: &PublicKey) -> Self {
        let digest = Hasher::with_domain("stridechain/address")
            .update(key.as_bytes())
            .finalize();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest.as_bytes()[..20]);
        Self(bytes)
    }

    /// Raw bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Rebuild from raw bytes (storage keys)
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Parse `sc1`-prefixed or bare hex
    ///
    /// # Errors
    /// Returns error on malformed hex or wrong length
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let raw = s.strip_prefix("sc1").unwrap_or(s);
        let bytes = hex::decode(raw).map_err(|e| CryptoError::InvalidHash(e.to_string()))?;
        let arr: [u8; 20] = bytes.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidHash(format!("expected 20 address bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sc1{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(sc1{}..)", &hex::encode(self.0)[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    #[test]
    fn test_display_parses_back() {
        let kp = Keypair::generate();
        let addr = Address::from_public_key(kp.public_key());
        assert_eq!(Address::from_hex(&addr.to_string()).unwrap(), addr);
        assert!(Address::from_hex("sc1beef").is_err());
    }
}
