//! Witness registry and signed witness messages.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;
use crate::types::ClaimId;

const ATTEST_DOMAIN: &[u8] = b"stridechain/attest/v1";
const WITHDRAW_DOMAIN: &[u8] = b"stridechain/withdraw/v1";

/// What a witness asserts about a claim
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WitnessVerdict {
    /// The activity happened as claimed
    Confirm,
    /// The claim conflicts with what the witness observed
    Dispute,
}

impl WitnessVerdict {
    const fn as_byte(self) -> u8 {
        match self {
            Self::Confirm => 1,
            Self::Dispute => 2,
        }
    }
}

/// Witnesses eligible to attest, with their quorum weight.
#[derive(Clone, Debug, Default)]
pub struct WitnessRegistry {
    witnesses: HashMap<PublicKey, u64>,
}

impl WitnessRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-weight) a witness
    pub fn register(&mut self, witness: PublicKey, weight: u64) {
        self.witnesses.insert(witness, weight);
    }

    /// Remove a witness; attestations already counted stay counted
    pub fn deregister(&mut self, witness: &PublicKey) -> bool {
        self.witnesses.remove(witness).is_some()
    }

    /// Weight of an eligible witness
    #[must_use]
    pub fn weight_of(&self, witness: &PublicKey) -> Option<u64> {
        self.witnesses.get(witness).copied()
    }

    /// Number of registered witnesses
    #[must_use]
    pub fn len(&self) -> usize {
        self.witnesses.len()
    }

    /// Whether no witnesses are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.witnesses.is_empty()
    }
}

/// Message a witness signs for a verdict on a claim
#[must_use]
pub fn attestation_signing_bytes(claim_id: &ClaimId, witness: &PublicKey, verdict: WitnessVerdict) -> Vec<u8> {
    let mut data = Vec::with_capacity(ATTEST_DOMAIN.len() + 65);
    data.extend_from_slice(ATTEST_DOMAIN);
    data.extend_from_slice(claim_id.as_bytes());
    data.extend_from_slice(witness.as_bytes());
    data.push(verdict.as_byte());
    data
}

/// Message an owner signs to withdraw a pending claim
#[must_use]
pub fn withdrawal_signing_bytes(claim_id: &ClaimId) -> Vec<u8> {
    let mut data = Vec::with_capacity(WITHDRAW_DOMAIN.len() + 32);
    data.extend_from_slice(WITHDRAW_DOMAIN);
    data.extend_from_slice(claim_id.as_bytes());
    data
}
