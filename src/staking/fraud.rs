//! Authority-signed fraud proofs.

use serde::{Deserialize, Serialize};

use crate::crypto::{verify, CryptoResult, Hash, Hasher, Keypair, PublicKey, Signature};
use crate::types::{Address, StrideAmount, Timestamp};

const FRAUD_DOMAIN: &str = "stridechain/fraud-proof/v1";

/// Evidence that an account profited from a forged claim or attestation.
///
/// Only proofs signed by the configured authority can slash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FraudProof {
    /// Account to slash
    pub accused: Address,
    /// Claim shown to be fraudulent
    pub claim_hash: Hash,
    /// Requested slash; clamped to the stake
    pub amount: StrideAmount,
    /// When the authority issued the proof
    pub issued_at: Timestamp,
    /// Authority signature over the fields above
    pub signature: Signature,
}

impl FraudProof {
    /// Issue and sign a proof
    #[must_use]
    pub fn issue(
        authority: &Keypair,
        accused: Address,
        claim_hash: Hash,
        amount: StrideAmount,
        issued_at: Timestamp,
    ) -> Self {
        let mut proof = Self {
            accused,
            claim_hash,
            amount,
            issued_at,
            signature: Signature::EMPTY,
        };
        proof.signature = authority.sign(proof.id().as_bytes());
        proof
    }

    /// Digest of the signed fields; also used to refuse replays
    #[must_use]
    pub fn id(&self) -> Hash {
        Hasher::with_domain(FRAUD_DOMAIN)
            .update(self.accused.as_bytes())
            .update(self.claim_hash.as_bytes())
            .update(&self.amount.raw().to_le_bytes())
            .update(&self.issued_at.to_le_bytes())
            .finalize()
    }

    /// Check the authority signature
    ///
    /// # Errors
    /// Returns error if not signed by `authority`
    pub fn verify(&self, authority: &PublicKey) -> CryptoResult<()> {
        verify(authority, self.id().as_bytes(), &self.signature)
    }
}
