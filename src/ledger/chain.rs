//! Hash-chained ledger entries.
//!
//! Every committed mutation becomes one [`LedgerEntry`] whose hash covers the
//! previous entry's hash, so rewriting any past entry breaks every hash after
//! it. Entries carry the post-state of the touched account, which lets the
//! account index be rebuilt (and cross-checked) from entry 0.

use serde::{Deserialize, Serialize};

use super::Account;
use crate::crypto::{Hash, Hasher, PublicKey};
use crate::staking::Stake;
use crate::types::{ActivityClaim, Address, StrideAmount, Timestamp};

const ENTRY_DOMAIN: &str = "stridechain/entry/v1";

/// Signed change to an account balance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceDelta {
    /// Balance unchanged
    Zero,
    /// Balance increased
    Credit(StrideAmount),
    /// Balance decreased
    Debit(StrideAmount),
}

impl BalanceDelta {
    /// Apply the delta to `balance`
    #[must_use]
    pub fn apply(self, balance: StrideAmount) -> Option<StrideAmount> {
        match self {
            Self::Zero => Some(balance),
            Self::Credit(amount) => balance.checked_credit(amount),
            Self::Debit(amount) => balance.checked_sub(amount),
        }
    }
}

/// What an entry records
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// Initial allocation minted at genesis
    Genesis {
        /// Allocated amount
        amount: StrideAmount,
    },
    /// A verified activity claim and its reward
    Activity {
        /// The committed claim
        claim: ActivityClaim,
        /// Reward credited for it
        reward: StrideAmount,
        /// Witnesses that confirmed it
        witnesses: Vec<PublicKey>,
    },
    /// Balance reserved by staking
    Stake {
        /// Newly locked amount
        amount: StrideAmount,
        /// Position after the change
        position: Stake,
    },
    /// Stake withdrawn after expiry
    Release {
        /// Released amount
        amount: StrideAmount,
        /// Position after the change
        position: Stake,
    },
    /// Stake burned by a fraud proof
    Slash {
        /// Burned amount (already clamped)
        amount: StrideAmount,
        /// Identifier of the applied fraud proof
        proof_id: Hash,
        /// Claim the proof concerns
        claim_hash: Hash,
        /// Remainder of the position returned to the unstaked balance
        released: StrideAmount,
        /// Position after the change
        position: Stake,
    },
}

impl EntryKind {
    /// Short label for logs and listings
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Genesis { .. } => "genesis",
            Self::Activity { .. } => "activity",
            Self::Stake { .. } => "stake",
            Self::Release { .. } => "release",
            Self::Slash { .. } => "slash",
        }
    }

    /// Resulting stake position, for stake-changing entries
    #[must_use]
    pub const fn position(&self) -> Option<&Stake> {
        match self {
            Self::Stake { position, .. } | Self::Release { position, .. } | Self::Slash { position, .. } => {
                Some(position)
            }
            Self::Genesis { .. } | Self::Activity { .. } => None,
        }
    }
}

/// One immutable, hash-chained ledger record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Position in the chain, starting at 0
    pub index: u64,
    /// Touched account
    pub account: Address,
    /// What happened
    pub kind: EntryKind,
    /// Change to the account balance
    pub delta: BalanceDelta,
    /// Account state after this entry
    pub post: AccountSnapshot,
    /// Commit time (unix ms)
    pub committed_at: Timestamp,
    /// Hash of the previous entry (`Hash::ZERO` for index 0)
    pub prev_hash: Hash,
    /// Hash over all fields above
    pub hash: Hash,
}

/// Account fields captured after an entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// Balance
    pub balance: StrideAmount,
    /// Staked portion
    pub staked: StrideAmount,
    /// Account nonce
    pub nonce: u64,
}

impl From<&Account> for AccountSnapshot {
    fn from(account: &Account) -> Self {
        Self {
            balance: account.balance,
            staked: account.staked,
            nonce: account.nonce,
        }
    }
}

#[derive(Serialize)]
struct EntryBody<'a> {
    index: u64,
    account: &'a Address,
    kind: &'a EntryKind,
    delta: &'a BalanceDelta,
    post: &'a AccountSnapshot,
    committed_at: Timestamp,
    prev_hash: &'a Hash,
}

impl LedgerEntry {
    /// Build an entry and seal it with its hash
    ///
    /// # Errors
    /// Returns error if the body cannot be encoded
    pub fn seal(
        index: u64,
        account: Address,
        kind: EntryKind,
        delta: BalanceDelta,
        post: AccountSnapshot,
        committed_at: Timestamp,
        prev_hash: Hash,
    ) -> Result<Self, bincode::Error> {
        let mut entry = Self {
            index,
            account,
            kind,
            delta,
            post,
            committed_at,
            prev_hash,
            hash: Hash::ZERO,
        };
        entry.hash = entry.compute_hash()?;
        Ok(entry)
    }

    /// Recompute the entry hash from its fields
    ///
    /// # Errors
    /// Returns error if the body cannot be encoded
    pub fn compute_hash(&self) -> Result<Hash, bincode::Error> {
        let body = bincode::serialize(&EntryBody {
            index: self.index,
            account: &self.account,
            kind: &self.kind,
            delta: &self.delta,
            post: &self.post,
            committed_at: self.committed_at,
            prev_hash: &self.prev_hash,
        })?;
        Ok(Hasher::with_domain(ENTRY_DOMAIN).update(&body).finalize())
    }

    /// The committed claim, for activity entries
    #[must_use]
    pub const fn claim(&self) -> Option<&ActivityClaim> {
        match &self.kind {
            EntryKind::Activity { claim, .. } => Some(claim),
            _ => None,
        }
    }

    /// `claimed_at` of an activity entry
    #[must_use]
    pub fn claimed_at(&self) -> Option<Timestamp> {
        self.claim().map(|c| c.claimed_at)
    }
}
