//! Activity claims - the unit of work entering the ledger.
//!
//! A claim arrives as an untrusted [`ClaimSubmission`]: signed numbers from
//! an external activity source. Only the claim validator turns a submission
//! into an [`ActivityClaim`].

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Address, Timestamp};
use crate::crypto::{content_address, Hash, Keypair, PublicKey, Sha3Digest, Signature};

/// Identifier of a claim: its payload digest.
pub type ClaimId = Hash;

const CLAIM_DIGEST_DOMAIN: &[u8] = b"stridechain/claim/v1";
const CLAIM_SIGNATURE_DOMAIN: &[u8] = b"stridechain/claim-signature/v1";

/// Weak reference into the off-chain object store (SHA-256 content address).
///
/// The ledger records it but never dereferences it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobRef(Hash);

impl BlobRef {
    /// Reference for the given blob contents
    #[must_use]
    pub fn for_content(content: &[u8]) -> Self {
        Self(content_address(content))
    }

    /// Wrap an existing content address
    #[must_use]
    pub const fn from_hash(hash: Hash) -> Self {
        Self(hash)
    }

    /// Underlying content address
    #[must_use]
    pub const fn as_hash(&self) -> &Hash {
        &self.0
    }
}

impl fmt::Debug for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobRef({}..)", &self.0.to_hex()[..12])
    }
}

/// Raw claim tuple as received from an untrusted submitter.
///
/// Distance and duration are signed so that negative values from a buggy or
/// hostile source are representable and rejected rather than wrapped.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClaimSubmission {
    /// Claim owner
    pub owner: PublicKey,
    /// Distance in meters
    pub distance_m: i64,
    /// Duration in seconds
    pub duration_s: i64,
    /// When the activity was performed (unix ms)
    pub claimed_at: Timestamp,
    /// Submitter-provided payload digest
    pub claim_hash: Hash,
    /// Optional pointer to raw activity data
    pub blob: Option<BlobRef>,
    /// Owner's signature over the claim hash
    pub signature: Signature,
}

impl ClaimSubmission {
    /// Build and sign a submission with a correct digest.
    #[must_use]
    pub fn signed(
        owner: &Keypair,
        distance_m: i64,
        duration_s: i64,
        claimed_at: Timestamp,
        blob: Option<BlobRef>,
    ) -> Self {
        let owner_key = *owner.public_key();
        let claim_hash = claim_digest(&owner_key, distance_m, duration_s, claimed_at, blob.as_ref());
        Self {
            owner: owner_key,
            distance_m,
            duration_s,
            claimed_at,
            claim_hash,
            blob,
            signature: owner.sign(&claim_signing_bytes(&claim_hash)),
        }
    }

    /// Digest recomputed from the payload fields
    #[must_use]
    pub fn recompute_hash(&self) -> Hash {
        claim_digest(
            &self.owner,
            self.distance_m,
            self.duration_s,
            self.claimed_at,
            self.blob.as_ref(),
        )
    }
}

/// A structurally valid claim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityClaim {
    /// Claim owner
    pub owner: PublicKey,
    /// Owner's account address
    pub account: Address,
    /// Distance in meters
    pub distance_m: u64,
    /// Duration in seconds
    pub duration_s: u64,
    /// When the activity was performed (unix ms)
    pub claimed_at: Timestamp,
    /// Payload digest, unique across the ledger
    pub claim_hash: Hash,
    /// Optional pointer to raw activity data
    pub blob: Option<BlobRef>,
    /// Owner's signature over the claim hash
    pub signature: Signature,
}

impl ActivityClaim {
    /// Claim identifier
    #[must_use]
    pub const fn id(&self) -> ClaimId {
        self.claim_hash
    }
}

/// Deterministic SHA3-256 digest of a claim payload.
///
/// Integers are encoded little-endian at fixed width; the blob reference is
/// preceded by a presence flag so `None` and a zero hash never collide.
#[must_use]
pub fn claim_digest(
    owner: &PublicKey,
    distance_m: i64,
    duration_s: i64,
    claimed_at: Timestamp,
    blob: Option<&BlobRef>,
) -> Hash {
    let mut digest = Sha3Digest::new();
    digest
        .update(CLAIM_DIGEST_DOMAIN)
        .update(owner.as_bytes())
        .update(&distance_m.to_le_bytes())
        .update(&duration_s.to_le_bytes())
        .update(&claimed_at.to_le_bytes());
    match blob {
        Some(blob) => digest.update(&[1]).update(blob.as_hash().as_bytes()),
        None => digest.update(&[0]),
    };
    digest.finalize()
}

/// Message the owner signs for a claim
#[must_use]
pub fn claim_signing_bytes(claim_hash: &Hash) -> Vec<u8> {
    let mut data = Vec::with_capacity(CLAIM_SIGNATURE_DOMAIN.len() + 32);
    data.extend_from_slice(CLAIM_SIGNATURE_DOMAIN);
    data.extend_from_slice(claim_hash.as_bytes());
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_covers_every_field() {
        let kp = Keypair::generate();
        let owner = kp.public_key();
        let base = claim_digest(owner, 5000, 1800, 1_000, None);

        assert_eq!(base, claim_digest(owner, 5000, 1800, 1_000, None));
        assert_ne!(base, claim_digest(owner, 5001, 1800, 1_000, None));
        assert_ne!(base, claim_digest(owner, 5000, 1801, 1_000, None));
        assert_ne!(base, claim_digest(owner, 5000, 1800, 1_001, None));
        assert_ne!(
            base,
            claim_digest(owner, 5000, 1800, 1_000, Some(&BlobRef::from_hash(Hash::ZERO)))
        );
    }

    #[test]
    fn test_signed_submission_is_self_consistent() {
        let kp = Keypair::generate();
        let blob = BlobRef::for_content(b"gpx track");
        let sub = ClaimSubmission::signed(&kp, 5000, 1800, 42, Some(blob));

        assert_eq!(sub.recompute_hash(), sub.claim_hash);
        assert!(crate::crypto::verify(
            &sub.owner,
            &claim_signing_bytes(&sub.claim_hash),
            &sub.signature
        )
        .is_ok());
    }
}
