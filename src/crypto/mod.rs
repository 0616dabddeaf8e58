//! Cryptographic primitives for the StrideChain ledger.
//!
//! - ed25519-dalek for owner, witness and authority signatures
//! - BLAKE3 for entry hashes, claim ids and the hash chain
//! - SHA3-256 for claim payload digests (the replay key)
//! - SHA-256 for content addressing of off-chain blobs

mod digest;
mod hash;
mod signature;

pub use digest::{content_address, Sha3Digest};
pub use hash::{hash_data, merkle_root, Hash, Hasher};
pub use signature::{verify, Keypair, PublicKey, SecretKey, Signature};

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Invalid signature
    #[error("invalid signature")]
    InvalidSignature,
    /// Invalid public key format
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
    /// Invalid hash format
    #[error("invalid hash: {0}")]
    InvalidHash(String),
    /// Invalid secret key material
    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),
}

/// Result type for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;
