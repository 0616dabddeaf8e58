//! Supply accounting.
//!
//! Tracks what the ledger has minted (genesis allocations and rewards) and
//! burned (slashes), so conservation can be checked against the account index.

use serde::{Deserialize, Serialize};

use crate::types::StrideAmount;

/// Running supply totals
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyMetrics {
    /// Genesis allocations
    pub total_allocated: StrideAmount,
    /// Rewards credited
    pub total_rewarded: StrideAmount,
    /// Stake burned by slashing
    pub total_slashed: StrideAmount,
    /// Currently staked across all accounts
    pub total_staked: StrideAmount,
}

impl SupplyMetrics {
    /// Net supply: allocations + rewards - slashes.
    ///
    /// Equals the sum of all balances whenever the ledger is consistent.
    #[must_use]
    pub fn circulating(&self) -> Option<StrideAmount> {
        self.total_allocated
            .checked_add(self.total_rewarded)?
            .checked_sub(self.total_slashed)
    }

    /// Circulating supply that is not staked
    #[must_use]
    pub fn liquid(&self) -> Option<StrideAmount> {
        self.circulating()?.checked_sub(self.total_staked)
    }

    /// Share of circulating supply that is staked, in basis points
    #[must_use]
    pub fn stake_ratio_bps(&self) -> u128 {
        match self.circulating() {
            Some(c) if !c.is_zero() => self.total_staked.raw().saturating_mul(10_000) / c.raw(),
            _ => 0,
        }
    }
}
