//! Witness attestation of activity claims.
//!
//! Every validated claim opens a [`Attestation`] in state `Pending`. Witnesses
//! from the [`WitnessRegistry`] sign a verdict over the claim hash; once the
//! configured quorum of distinct, valid confirmations is reached before the
//! deadline the claim becomes `Verified` and can be handed to the batch
//! processor exactly once as a [`VerifiedClaim`].
//!
//! ```text
//!             confirmations >= quorum
//!   Pending ───────────────────────────▶ Verified
//!      │  \
//!      │   \ invalid signature / dispute / owner withdrawal
//!      │    ───────────────────────────▶ Rejected
//!      │ deadline elapsed
//!      └────────────────────────────────▶ Expired
//! ```

mod witness;

pub use witness::{attestation_signing_bytes, withdrawal_signing_bytes, WitnessRegistry, WitnessVerdict};

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::crypto::{verify, Hash, PublicKey, Signature};
use crate::types::{ActivityClaim, ClaimId, Timestamp};

/// State of a claim's attestation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttestationState {
    /// Collecting witness confirmations
    Pending,
    /// Quorum reached
    Verified,
    /// Disputed, forged, or withdrawn
    Rejected,
    /// Deadline elapsed without quorum
    Expired,
}

impl AttestationState {
    /// Whether no further transition is possible
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// How many confirmations make a quorum
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuorumPolicy {
    /// At least `threshold` distinct witnesses
    Count {
        /// Required number of witnesses
        threshold: usize,
    },
    /// Sum of registered witness weights reaches `min_weight`
    StakeWeighted {
        /// Required total weight
        min_weight: u64,
    },
}

/// Attestation configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttestationConfig {
    /// Quorum policy
    pub quorum: QuorumPolicy,
    /// Time from opening until a pending claim expires (ms)
    pub deadline_ms: i64,
}

impl Default for AttestationConfig {
    fn default() -> Self {
        Self {
            quorum: QuorumPolicy::Count { threshold: 2 },
            deadline_ms: 10 * 60 * 1000,
        }
    }
}

/// Why a claim ended without a ledger entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionReason {
    /// A registered witness sent a signature that does not verify
    InvalidWitnessSignature {
        /// Offending witness
        witness: PublicKey,
    },
    /// A registered witness signed a dispute
    Disputed {
        /// Disputing witness
        witness: PublicKey,
    },
    /// The owner withdrew the claim before quorum
    Withdrawn,
    /// The ledger refused the verified claim
    Ledger(String),
}

/// Final outcome of a claim once it leaves the verifier
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimOutcome {
    /// Committed as the ledger entry with this hash
    Committed {
        /// Resulting entry hash
        entry_hash: Hash,
    },
    /// Terminated without a ledger entry
    Rejected(RejectionReason),
}

/// Per-claim attestation record, kept while the claim is pending or
/// awaiting handoff
#[derive(Clone, Debug)]
pub struct Attestation {
    /// The claim under attestation
    pub claim: ActivityClaim,
    state: AttestationState,
    witnesses: BTreeSet<PublicKey>,
    weight: u64,
    /// When the attestation was opened
    pub opened_at: Timestamp,
    /// When a pending attestation expires
    pub deadline: Timestamp,
}

impl Attestation {
    /// Current state
    #[must_use]
    pub const fn state(&self) -> AttestationState {
        self.state
    }

    /// Distinct confirming witnesses
    #[must_use]
    pub fn witnesses(&self) -> impl Iterator<Item = &PublicKey> {
        self.witnesses.iter()
    }

    /// Number of distinct confirmations
    #[must_use]
    pub fn confirmations(&self) -> usize {
        self.witnesses.len()
    }

    /// Accumulated witness weight
    #[must_use]
    pub const fn weight(&self) -> u64 {
        self.weight
    }
}

/// What remains of a claim once it is handed off, rejected or expired.
///
/// The claim payload and witness set are dropped; the id stays known so the
/// hash cannot be opened again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tombstone {
    /// State when the claim was retired
    pub state: AttestationState,
    /// Settlement outcome, once known
    pub outcome: Option<ClaimOutcome>,
}

/// A claim whose attestation reached `Verified`.
///
/// Only [`AttestationVerifier::take_verified`] constructs this type, so a
/// ledger entry can never be built from an unverified claim.
#[derive(Clone, Debug)]
pub struct VerifiedClaim {
    claim: ActivityClaim,
    witnesses: Vec<PublicKey>,
}

impl VerifiedClaim {
    /// The verified claim
    #[must_use]
    pub const fn claim(&self) -> &ActivityClaim {
        &self.claim
    }

    /// Witnesses that confirmed it
    #[must_use]
    pub fn witnesses(&self) -> &[PublicKey] {
        &self.witnesses
    }
}

/// Attestation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttestationError {
    /// Unknown claim id
    #[error("claim {0} not found")]
    NotFound(ClaimId),
    /// Claim hash already seen by the verifier
    #[error("claim {0} already submitted")]
    DuplicateClaim(ClaimId),
    /// Witness is not in the registry
    #[error("witness {0} is not eligible")]
    NotEligible(PublicKey),
    /// Owners cannot attest their own claims
    #[error("owner cannot witness their own claim")]
    SelfAttestation,
    /// Claim already verified; cannot be cancelled
    #[error("claim already verified")]
    AlreadyVerified,
    /// Operation requires a pending claim
    #[error("claim is {0:?}, not pending")]
    NotPending(AttestationState),
    /// Withdrawal not signed by the owner
    #[error("withdrawal signature does not match the claim owner")]
    InvalidOwnerSignature,
}

/// Tracks attestations for every claim it has seen.
///
/// Live claims keep their payload; claims that were handed off, rejected or
/// expired are retired to a [`Tombstone`].
pub struct AttestationVerifier {
    config: AttestationConfig,
    registry: WitnessRegistry,
    attestations: HashMap<ClaimId, Attestation>,
    retired: HashMap<ClaimId, Tombstone>,
}

impl AttestationVerifier {
    /// Create a verifier
    #[must_use]
    pub fn new(config: AttestationConfig, registry: WitnessRegistry) -> Self {
        Self {
            config,
            registry,
            attestations: HashMap::new(),
            retired: HashMap::new(),
        }
    }

    /// Witness registry
    #[must_use]
    pub const fn registry(&self) -> &WitnessRegistry {
        &self.registry
    }

    /// Mutable witness registry
    pub fn registry_mut(&mut self) -> &mut WitnessRegistry {
        &mut self.registry
    }

    /// Open a pending attestation for a validated claim
    ///
    /// # Errors
    /// Returns `DuplicateClaim` if this claim hash was seen before, whatever
    /// its state: a terminated claim must be resubmitted with new data.
    pub fn open(&mut self, claim: ActivityClaim, now: Timestamp) -> Result<Timestamp, AttestationError> {
        let id = claim.id();
        if self.attestations.contains_key(&id) || self.retired.contains_key(&id) {
            return Err(AttestationError::DuplicateClaim(id));
        }

        let deadline = now.saturating_add(self.config.deadline_ms);
        debug!(claim = %id, deadline, "attestation opened");
        self.attestations.insert(
            id,
            Attestation {
                claim,
                state: AttestationState::Pending,
                witnesses: BTreeSet::new(),
                weight: 0,
                opened_at: now,
                deadline,
            },
        );
        Ok(deadline)
    }

    /// Record a witness verdict
    ///
    /// A repeated valid confirmation from the same witness is ignored. A
    /// dispute or an invalid signature rejects the claim even if that witness
    /// confirmed earlier. Attestations on claims that already left `Pending`
    /// leave the state unchanged.
    ///
    /// # Errors
    /// Returns error for unknown claims or ineligible witnesses.
    pub fn attest(
        &mut self,
        claim_id: &ClaimId,
        witness: &PublicKey,
        verdict: WitnessVerdict,
        signature: &Signature,
        now: Timestamp,
    ) -> Result<AttestationState, AttestationError> {
        if let Some(tombstone) = self.retired.get(claim_id) {
            return Ok(tombstone.state);
        }
        let attestation = self
            .attestations
            .get_mut(claim_id)
            .ok_or(AttestationError::NotFound(*claim_id))?;

        if attestation.state == AttestationState::Verified {
            return Ok(attestation.state);
        }
        if now >= attestation.deadline {
            return Ok(self.expire(claim_id));
        }

        if *witness == attestation.claim.owner {
            return Err(AttestationError::SelfAttestation);
        }
        let weight = self
            .registry
            .weight_of(witness)
            .ok_or(AttestationError::NotEligible(*witness))?;

        let message = attestation_signing_bytes(claim_id, witness, verdict);
        let rejection = if verify(witness, &message, signature).is_err() {
            Some(RejectionReason::InvalidWitnessSignature { witness: *witness })
        } else if verdict == WitnessVerdict::Dispute {
            Some(RejectionReason::Disputed { witness: *witness })
        } else {
            None
        };
        if let Some(reason) = rejection {
            return Ok(self.reject(claim_id, reason));
        }

        if !attestation.witnesses.insert(*witness) {
            debug!(claim = %claim_id, %witness, "repeat confirmation ignored");
            return Ok(attestation.state);
        }
        attestation.weight = attestation.weight.saturating_add(weight);

        let quorum_met = match self.config.quorum {
            QuorumPolicy::Count { threshold } => attestation.witnesses.len() >= threshold,
            QuorumPolicy::StakeWeighted { min_weight } => attestation.weight >= min_weight,
        };
        if quorum_met {
            info!(
                claim = %claim_id,
                witnesses = attestation.witnesses.len(),
                "claim verified"
            );
            attestation.state = AttestationState::Verified;
        }

        Ok(attestation.state)
    }

    /// Owner withdraws a pending claim
    ///
    /// # Errors
    /// Fails if the signature is not the owner's or the claim is no longer pending.
    pub fn withdraw(
        &mut self,
        claim_id: &ClaimId,
        owner_signature: &Signature,
        now: Timestamp,
    ) -> Result<AttestationState, AttestationError> {
        if let Some(tombstone) = self.retired.get(claim_id) {
            return Err(match tombstone.state {
                AttestationState::Verified => AttestationError::AlreadyVerified,
                state => AttestationError::NotPending(state),
            });
        }
        let attestation = self
            .attestations
            .get(claim_id)
            .ok_or(AttestationError::NotFound(*claim_id))?;

        verify(
            &attestation.claim.owner,
            &withdrawal_signing_bytes(claim_id),
            owner_signature,
        )
        .map_err(|_| AttestationError::InvalidOwnerSignature)?;

        let (state, deadline) = (attestation.state, attestation.deadline);
        match state {
            AttestationState::Verified => Err(AttestationError::AlreadyVerified),
            _ if now >= deadline => Err(AttestationError::NotPending(self.expire(claim_id))),
            _ => Ok(self.reject(claim_id, RejectionReason::Withdrawn)),
        }
    }

    /// Expire every pending claim whose deadline has passed
    pub fn expire_due(&mut self, now: Timestamp) -> Vec<ClaimId> {
        let due: Vec<ClaimId> = self
            .attestations
            .iter()
            .filter(|(_, a)| a.state == AttestationState::Pending && now >= a.deadline)
            .map(|(id, _)| *id)
            .collect();
        for id in &due {
            self.expire(id);
        }
        due
    }

    /// Hand a verified claim to the batch processor; yields it at most once
    pub fn take_verified(&mut self, claim_id: &ClaimId) -> Option<VerifiedClaim> {
        if self.attestations.get(claim_id)?.state != AttestationState::Verified {
            return None;
        }
        let attestation = self.attestations.remove(claim_id)?;
        self.retired.insert(
            *claim_id,
            Tombstone {
                state: AttestationState::Verified,
                outcome: None,
            },
        );

        Some(VerifiedClaim {
            claim: attestation.claim,
            witnesses: attestation.witnesses.into_iter().collect(),
        })
    }

    /// Record what the ledger did with a verified claim
    pub fn settle(&mut self, claim_id: &ClaimId, outcome: ClaimOutcome) {
        if let Some(tombstone) = self.retired.get_mut(claim_id) {
            tombstone.outcome = Some(outcome);
        }
    }

    /// Live attestation of a pending or not yet handed off claim
    #[must_use]
    pub fn get(&self, claim_id: &ClaimId) -> Option<&Attestation> {
        self.attestations.get(claim_id)
    }

    /// Current state of a claim, live or retired
    #[must_use]
    pub fn state(&self, claim_id: &ClaimId) -> Option<AttestationState> {
        self.attestations
            .get(claim_id)
            .map(Attestation::state)
            .or_else(|| self.retired.get(claim_id).map(|t| t.state))
    }

    /// Terminal outcome of a retired claim, if settled
    #[must_use]
    pub fn outcome(&self, claim_id: &ClaimId) -> Option<&ClaimOutcome> {
        self.retired.get(claim_id)?.outcome.as_ref()
    }

    /// Number of claims still pending
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.attestations
            .values()
            .filter(|a| a.state == AttestationState::Pending)
            .count()
    }

    /// Number of retired claims
    #[must_use]
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    fn reject(&mut self, claim_id: &ClaimId, reason: RejectionReason) -> AttestationState {
        warn!(claim = %claim_id, ?reason, "claim rejected");
        self.retire(claim_id, AttestationState::Rejected, Some(ClaimOutcome::Rejected(reason)))
    }

    fn expire(&mut self, claim_id: &ClaimId) -> AttestationState {
        let confirmations = self.attestations.get(claim_id).map_or(0, |a| a.witnesses.len());
        info!(claim = %claim_id, confirmations, "claim expired without quorum");
        self.retire(claim_id, AttestationState::Expired, None)
    }

    fn retire(
        &mut self,
        claim_id: &ClaimId,
        state: AttestationState,
        outcome: Option<ClaimOutcome>,
    ) -> AttestationState {
        self.attestations.remove(claim_id);
        self.retired.insert(*claim_id, Tombstone { state, outcome });
        state
    }
}
