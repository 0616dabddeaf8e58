//! $STRD reward computation and minting.
//!
//! Rewards are a pure function of distance and duration over fixed-point
//! integers: two calls with the same inputs return the same amount on every
//! platform, forever. Crediting a reward requires a [`MintCapability`] issued
//! for the configured authority key.

mod supply;

pub use supply::SupplyMetrics;

use serde::{Deserialize, Serialize};

use crate::crypto::{verify, Keypair, PublicKey};
use crate::types::{StrideAmount, ONE_STRD};

const MINT_CHALLENGE: &[u8] = b"stridechain/mint-capability/v1";

/// Reward rates
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardSchedule {
    /// Credited per meter
    pub per_meter: StrideAmount,
    /// Credited per whole minute of activity
    pub per_minute: StrideAmount,
    /// Upper bound on a single claim's reward
    pub max_per_claim: StrideAmount,
}

impl Default for RewardSchedule {
    fn default() -> Self {
        Self {
            per_meter: StrideAmount::from_raw(ONE_STRD / 1_000), // 1 STRD per km
            per_minute: StrideAmount::from_raw(ONE_STRD / 100),  // 0.01 STRD per minute
            max_per_claim: StrideAmount::from_strd(1_000),
        }
    }
}

impl RewardSchedule {
    /// Reward for an activity: `distance * per_meter + (duration / 60) * per_minute`,
    /// capped at `max_per_claim`.
    ///
    /// # Errors
    /// Returns `RewardOverflow` if any intermediate step overflows `u128`.
    pub fn compute_reward(&self, distance_m: u64, duration_s: u64) -> Result<StrideAmount, RewardError> {
        let distance_part = u128::from(distance_m)
            .checked_mul(self.per_meter.raw())
            .ok_or(RewardError::RewardOverflow)?;
        let duration_part = u128::from(duration_s / 60)
            .checked_mul(self.per_minute.raw())
            .ok_or(RewardError::RewardOverflow)?;
        let total = distance_part
            .checked_add(duration_part)
            .ok_or(RewardError::RewardOverflow)?;

        Ok(StrideAmount::from_raw(total).min(self.max_per_claim))
    }
}

/// Proof that the holder controls the minting authority key.
///
/// The ledger holds one of these; nothing else can credit rewards.
pub struct MintCapability {
    authority: PublicKey,
}

impl MintCapability {
    /// Issue a capability after checking `keypair` is the configured authority
    ///
    /// # Errors
    /// Returns `Unauthorized` if the key does not match `expected`.
    pub fn grant(keypair: &Keypair, expected: &PublicKey) -> Result<Self, RewardError> {
        if keypair.public_key() != expected {
            return Err(RewardError::Unauthorized(*keypair.public_key()));
        }
        let proof = keypair.sign(MINT_CHALLENGE);
        verify(expected, MINT_CHALLENGE, &proof).map_err(|_| RewardError::Unauthorized(*expected))?;

        Ok(Self { authority: *expected })
    }

    /// Authority this capability was issued for
    #[must_use]
    pub const fn authority(&self) -> &PublicKey {
        &self.authority
    }
}

/// Applies the reward schedule on behalf of the authority
#[derive(Clone, Debug)]
pub struct RewardEngine {
    schedule: RewardSchedule,
    authority: PublicKey,
}

impl RewardEngine {
    /// Create an engine bound to `authority`
    #[must_use]
    pub const fn new(schedule: RewardSchedule, authority: PublicKey) -> Self {
        Self { schedule, authority }
    }

    /// The reward schedule
    #[must_use]
    pub const fn schedule(&self) -> &RewardSchedule {
        &self.schedule
    }

    /// Authority whose capability may credit
    #[must_use]
    pub const fn authority(&self) -> &PublicKey {
        &self.authority
    }

    /// Reward owed for an activity
    ///
    /// # Errors
    /// See [`RewardSchedule::compute_reward`].
    pub fn compute_reward(&self, distance_m: u64, duration_s: u64) -> Result<StrideAmount, RewardError> {
        self.schedule.compute_reward(distance_m, duration_s)
    }

    /// New balance after crediting `amount` to `balance`
    ///
    /// # Errors
    /// `Unauthorized` for a capability of another authority, `RewardOverflow`
    /// if the balance would pass the representable supply ceiling.
    pub fn credit(
        &self,
        capability: &MintCapability,
        balance: StrideAmount,
        amount: StrideAmount,
    ) -> Result<StrideAmount, RewardError> {
        if capability.authority != self.authority {
            return Err(RewardError::Unauthorized(capability.authority));
        }
        balance
            .checked_credit(amount)
            .ok_or(RewardError::RewardOverflow)
    }
}

/// Reward errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RewardError {
    /// Arithmetic overflow while computing or crediting
    #[error("reward overflow")]
    RewardOverflow,
    /// Caller is not the minting authority
    #[error("{0} is not the minting authority")]
    Unauthorized(PublicKey),
}
