//! Ledger accounts.

use serde::{Deserialize, Serialize};

use crate::crypto::{hash_data, Hash};
use crate::types::{Address, StrideAmount, Timestamp};

/// Materialized account state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account address
    pub address: Address,
    /// Total balance, staked portion included
    pub balance: StrideAmount,
    /// Portion of `balance` reserved by staking
    pub staked: StrideAmount,
    /// Number of committed ledger entries touching this account
    pub nonce: u64,
    /// `claimed_at` of the latest committed activity
    pub last_activity: Option<Timestamp>,
}

impl Account {
    /// A fresh, empty account
    #[must_use]
    pub const fn new(address: Address) -> Self {
        Self {
            address,
            balance: StrideAmount::ZERO,
            staked: StrideAmount::ZERO,
            nonce: 0,
            last_activity: None,
        }
    }

    /// Balance that is not staked
    #[must_use]
    pub const fn available(&self) -> StrideAmount {
        self.balance.saturating_sub(self.staked)
    }

    /// Whether `staked <= balance` holds
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.staked <= self.balance
    }

    /// Leaf hash for the state root
    #[must_use]
    pub fn leaf_hash(&self) -> Hash {
        let mut data = Vec::with_capacity(20 + 16 + 16 + 8);
        data.extend_from_slice(self.address.as_bytes());
        data.extend_from_slice(&self.balance.raw().to_le_bytes());
        data.extend_from_slice(&self.staked.raw().to_le_bytes());
        data.extend_from_slice(&self.nonce.to_le_bytes());
        hash_data(&data)
    }
}
