//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use stridechain::attestation::{
    attestation_signing_bytes, AttestationConfig, AttestationVerifier, QuorumPolicy, VerifiedClaim,
    WitnessRegistry, WitnessVerdict,
};
use stridechain::batch::Batch;
use stridechain::crypto::Keypair;
use stridechain::ledger::{BatchPolicy, Ledger, LedgerConfig, LedgerStore};
use stridechain::rewards::{MintCapability, RewardEngine, RewardSchedule};
use stridechain::staking::{StakeManager, StakingConfig};
use stridechain::types::{Address, ClaimSubmission, Timestamp};
use stridechain::validator::{validate_claim, ValidationConfig};

/// Fixed "now" for deterministic tests
pub const NOW: Timestamp = 1_700_000_000_000;

/// One day in milliseconds
pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// A ledger plus the authority that controls it
pub struct Fixture {
    pub authority: Keypair,
    pub ledger: Ledger,
}

pub fn fixture(policy: BatchPolicy) -> Fixture {
    fixture_with(policy, StakingConfig::default())
}

pub fn fixture_with(policy: BatchPolicy, staking: StakingConfig) -> Fixture {
    let authority = Keypair::generate();
    let ledger = build_ledger(&authority, policy, staking);
    Fixture { authority, ledger }
}

pub fn build_ledger(authority: &Keypair, policy: BatchPolicy, staking: StakingConfig) -> Ledger {
    let key = *authority.public_key();
    Ledger::new(
        LedgerConfig::new(policy),
        RewardEngine::new(RewardSchedule::default(), key),
        StakeManager::new(staking, key),
        MintCapability::grant(authority, &key).unwrap(),
    )
    .unwrap()
}

pub fn persistent_ledger(authority: &Keypair, store: LedgerStore) -> Ledger {
    build_ledger(authority, BatchPolicy::Strict, StakingConfig::default())
        .with_store(store)
        .unwrap()
}

pub fn address_of(keypair: &Keypair) -> Address {
    Address::from_public_key(keypair.public_key())
}

/// Two witnesses and a 2-of-2 count quorum
pub struct Witnesses {
    pub keys: Vec<Keypair>,
    pub verifier: AttestationVerifier,
}

impl Witnesses {
    pub fn new(count: usize) -> Self {
        let keys: Vec<Keypair> = (0..count).map(|_| Keypair::generate()).collect();
        let mut registry = WitnessRegistry::new();
        for key in &keys {
            registry.register(*key.public_key(), 1);
        }
        let verifier = AttestationVerifier::new(
            AttestationConfig {
                quorum: QuorumPolicy::Count { threshold: count },
                deadline_ms: DAY_MS,
            },
            registry,
        );
        Self { keys, verifier }
    }

    /// Validate, attest to quorum and hand off one submission
    pub fn verify(&mut self, submission: &ClaimSubmission) -> VerifiedClaim {
        let claim = validate_claim(submission, &ValidationConfig::default(), NOW).unwrap();
        let id = claim.id();
        self.verifier.open(claim, NOW).unwrap();
        for key in &self.keys {
            let signature = key.sign(&attestation_signing_bytes(&id, key.public_key(), WitnessVerdict::Confirm));
            self.verifier
                .attest(&id, key.public_key(), WitnessVerdict::Confirm, &signature, NOW)
                .unwrap();
        }
        self.verifier.take_verified(&id).unwrap()
    }

    /// A verified claim for `owner`
    pub fn claim(&mut self, owner: &Keypair, distance_m: i64, duration_s: i64, claimed_at: Timestamp) -> VerifiedClaim {
        self.verify(&ClaimSubmission::signed(owner, distance_m, duration_s, claimed_at, None))
    }
}

pub fn batch(sequence: u64, claims: Vec<VerifiedClaim>) -> Batch {
    Batch::new(sequence, claims)
}
