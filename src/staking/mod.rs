//! Stake lifecycle: lock, release, slash.
//!
//! Staking reserves part of an account's balance; it never moves tokens.
//! Withdrawal after the lock expires only lowers `staked`. Slashing burns
//! the slashed amount from both `staked` and `balance` and is irreversible.
//!
//! ```text
//!   Unstaked ──stake──▶ Locked ──withdraw (after expiry, full)──▶ Released
//!                         │
//!                         └──authenticated fraud proof──▶ Slashed
//! ```

mod fraud;

pub use fraud::FraudProof;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::crypto::PublicKey;
use crate::ledger::Account;
use crate::types::{Address, StrideAmount, Timestamp};

const STAKE_DOMAIN: &[u8] = b"stridechain/stake/v1";

/// Staking configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StakingConfig {
    /// Lock period applied on every stake action (ms)
    pub lock_period_ms: i64,
    /// Minimum total stake a position must hold
    pub min_stake: StrideAmount,
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            lock_period_ms: 7 * 24 * 60 * 60 * 1000,
            min_stake: StrideAmount::from_raw(1),
        }
    }
}

/// Stake states
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StakeState {
    /// Nothing reserved
    Unstaked,
    /// Reserved until `lock_expiry`
    Locked,
    /// Burned by a fraud proof
    Slashed,
    /// Fully withdrawn after expiry
    Released,
}

/// An account's stake position
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stake {
    /// Owning account
    pub account: Address,
    /// Amount currently reserved
    pub amount: StrideAmount,
    /// Earliest withdrawal time
    pub lock_expiry: Timestamp,
    /// Lifecycle state
    pub state: StakeState,
    /// Total burned from this position
    pub slashed: StrideAmount,
}

impl Stake {
    /// An empty position for `account`
    #[must_use]
    pub const fn unstaked(account: Address) -> Self {
        Self {
            account,
            amount: StrideAmount::ZERO,
            lock_expiry: 0,
            state: StakeState::Unstaked,
            slashed: StrideAmount::ZERO,
        }
    }
}

/// Owner-initiated stake actions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StakeAction {
    /// Lock balance
    Lock,
    /// Withdraw after expiry
    Release,
}

/// Message an owner signs to request a stake action.
///
/// Binding the account nonce makes every signed request single-use.
#[must_use]
pub fn stake_signing_bytes(action: StakeAction, account: &Address, amount: StrideAmount, nonce: u64) -> Vec<u8> {
    let mut data = Vec::with_capacity(STAKE_DOMAIN.len() + 1 + 20 + 16 + 8);
    data.extend_from_slice(STAKE_DOMAIN);
    data.push(match action {
        StakeAction::Lock => 0,
        StakeAction::Release => 1,
    });
    data.extend_from_slice(account.as_bytes());
    data.extend_from_slice(&amount.raw().to_le_bytes());
    data.extend_from_slice(&nonce.to_le_bytes());
    data
}

/// A completed stake state change
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeTransition {
    /// State before
    pub from: StakeState,
    /// State after
    pub to: StakeState,
    /// Amount locked, released or burned
    pub amount: StrideAmount,
}

/// Staking errors; on any error neither account nor stake is modified
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StakeError {
    /// Amount must be non-zero
    #[error("amount must be non-zero")]
    ZeroAmount,
    /// Not enough unstaked balance
    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        /// `balance - staked`
        available: StrideAmount,
        /// Requested stake
        requested: StrideAmount,
    },
    /// Resulting position below the configured minimum
    #[error("stake below minimum {min}")]
    BelowMinimum {
        /// Configured minimum
        min: StrideAmount,
    },
    /// Withdrawal larger than the stake
    #[error("insufficient stake: staked {staked}, requested {requested}")]
    InsufficientStake {
        /// Currently staked
        staked: StrideAmount,
        /// Requested withdrawal
        requested: StrideAmount,
    },
    /// Lock has not expired
    #[error("stake locked until {until}")]
    StakeLocked {
        /// Lock expiry
        until: Timestamp,
    },
    /// Operation requires a locked stake
    #[error("stake is {0:?}, not locked")]
    NotLocked(StakeState),
    /// Fraud proof not signed by the authority
    #[error("fraud proof is not authenticated by the authority")]
    UnauthenticatedProof,
    /// Fraud proof names another account
    #[error("fraud proof accuses {accused}, not {account}")]
    WrongAccount {
        /// Account named in the proof
        accused: Address,
        /// Account being slashed
        account: Address,
    },
}

/// Applies stake transitions to ledger accounts
#[derive(Clone, Debug)]
pub struct StakeManager {
    config: StakingConfig,
    authority: PublicKey,
}

impl StakeManager {
    /// Create a manager; fraud proofs must be signed by `authority`
    #[must_use]
    pub const fn new(config: StakingConfig, authority: PublicKey) -> Self {
        Self { config, authority }
    }

    /// Staking configuration
    #[must_use]
    pub const fn config(&self) -> &StakingConfig {
        &self.config
    }

    /// Reserve `amount` of the account's unstaked balance.
    ///
    /// A Released or Slashed position starts over as a fresh stake. Staking
    /// onto a Locked position adds to it and restarts the lock.
    ///
    /// # Errors
    /// `InsufficientBalance` if `amount > balance - staked`.
    pub fn stake(
        &self,
        account: &mut Account,
        stake: &mut Stake,
        amount: StrideAmount,
        now: Timestamp,
    ) -> Result<StakeTransition, StakeError> {
        if amount.is_zero() {
            return Err(StakeError::ZeroAmount);
        }

        let available = account.available();
        if amount > available {
            return Err(StakeError::InsufficientBalance {
                available,
                requested: amount,
            });
        }

        let base = if stake.state == StakeState::Locked {
            stake.amount
        } else {
            StrideAmount::ZERO
        };
        // amount <= available <= balance, so neither sum can overflow
        let position = base.checked_add(amount).ok_or(StakeError::InsufficientBalance {
            available,
            requested: amount,
        })?;
        if position < self.config.min_stake {
            return Err(StakeError::BelowMinimum {
                min: self.config.min_stake,
            });
        }
        let staked = account.staked.checked_add(amount).ok_or(StakeError::InsufficientBalance {
            available,
            requested: amount,
        })?;

        let from = stake.state;
        if from != StakeState::Locked {
            *stake = Stake::unstaked(account.address);
        }
        account.staked = staked;
        stake.amount = position;
        stake.lock_expiry = now.saturating_add(self.config.lock_period_ms);
        stake.state = StakeState::Locked;

        info!(account = %account.address, %amount, until = stake.lock_expiry, "stake locked");
        Ok(StakeTransition {
            from,
            to: StakeState::Locked,
            amount,
        })
    }

    /// Release `amount` of an expired lock; the balance is untouched.
    ///
    /// # Errors
    /// `StakeLocked` before expiry, `InsufficientStake` if `amount` exceeds the stake.
    pub fn withdraw(
        &self,
        account: &mut Account,
        stake: &mut Stake,
        amount: StrideAmount,
        now: Timestamp,
    ) -> Result<StakeTransition, StakeError> {
        if stake.state != StakeState::Locked {
            return Err(StakeError::NotLocked(stake.state));
        }
        if now < stake.lock_expiry {
            return Err(StakeError::StakeLocked {
                until: stake.lock_expiry,
            });
        }
        if amount.is_zero() {
            return Err(StakeError::ZeroAmount);
        }

        let insufficient = StakeError::InsufficientStake {
            staked: stake.amount,
            requested: amount,
        };
        let remaining = stake.amount.checked_sub(amount).ok_or_else(|| insufficient.clone())?;
        let staked = account.staked.checked_sub(amount).ok_or(insufficient)?;

        account.staked = staked;
        stake.amount = remaining;
        if remaining.is_zero() {
            stake.state = StakeState::Released;
        }

        info!(account = %account.address, %amount, state = ?stake.state, "stake withdrawn");
        Ok(StakeTransition {
            from: StakeState::Locked,
            to: stake.state,
            amount,
        })
    }

    /// Burn stake on an authenticated fraud proof, clamped to what is staked.
    ///
    /// The position ends Slashed; whatever the proof did not burn goes back
    /// to the unstaked balance.
    ///
    /// # Errors
    /// `UnauthenticatedProof` unless signed by the authority.
    pub fn slash(
        &self,
        account: &mut Account,
        stake: &mut Stake,
        proof: &FraudProof,
    ) -> Result<StakeTransition, StakeError> {
        proof
            .verify(&self.authority)
            .map_err(|_| StakeError::UnauthenticatedProof)?;
        if proof.accused != account.address {
            return Err(StakeError::WrongAccount {
                accused: proof.accused,
                account: account.address,
            });
        }
        if stake.state != StakeState::Locked {
            return Err(StakeError::NotLocked(stake.state));
        }

        let burned = proof.amount.min(stake.amount).min(account.staked);
        // burned <= staked <= balance; the rest of the position is unreserved
        let released = stake.amount.saturating_sub(burned);
        account.balance = account.balance.saturating_sub(burned);
        account.staked = account.staked.saturating_sub(stake.amount);
        stake.amount = StrideAmount::ZERO;
        stake.slashed = stake.slashed.checked_add(burned).unwrap_or(stake.slashed);
        stake.state = StakeState::Slashed;

        info!(
            account = %account.address,
            requested = %proof.amount,
            %burned,
            %released,
            claim = %proof.claim_hash,
            "stake slashed"
        );
        Ok(StakeTransition {
            from: StakeState::Locked,
            to: StakeState::Slashed,
            amount: burned,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{hash_data, Keypair};

    const NOW: Timestamp = 1_700_000_000_000;

    fn setup(balance: u64) -> (StakeManager, Keypair, Account, Stake) {
        let authority = Keypair::generate();
        let manager = StakeManager::new(
            StakingConfig {
                lock_period_ms: 1_000,
                min_stake: StrideAmount::from_raw(1),
            },
            *authority.public_key(),
        );
        let owner = Keypair::generate();
        let mut account = Account::new(Address::from_public_key(owner.public_key()));
        account.balance = StrideAmount::from_strd(balance);
        let stake = Stake::unstaked(account.address);
        (manager, authority, account, stake)
    }

    #[test]
    fn test_stake_then_overstake_then_withdraw() {
        let (manager, _, mut account, mut stake) = setup(150);

        let t = manager
            .stake(&mut account, &mut stake, StrideAmount::from_strd(100), NOW)
            .unwrap();
        assert_eq!((t.from, t.to), (StakeState::Unstaked, StakeState::Locked));
        assert_eq!(account.staked, StrideAmount::from_strd(100));

        assert_eq!(
            manager.stake(&mut account, &mut stake, StrideAmount::from_strd(60), NOW),
            Err(StakeError::InsufficientBalance {
                available: StrideAmount::from_strd(50),
                requested: StrideAmount::from_strd(60),
            })
        );

        assert!(matches!(
            manager.withdraw(&mut account, &mut stake, StrideAmount::from_strd(100), NOW + 999),
            Err(StakeError::StakeLocked { .. })
        ));

        let t = manager
            .withdraw(&mut account, &mut stake, StrideAmount::from_strd(100), NOW + 1_000)
            .unwrap();
        assert_eq!(t.to, StakeState::Released);
        assert_eq!(account.staked, StrideAmount::ZERO);
        assert_eq!(account.balance, StrideAmount::from_strd(150));
    }

    #[test]
    fn test_partial_withdrawal_keeps_lock() {
        let (manager, _, mut account, mut stake) = setup(100);
        manager
            .stake(&mut account, &mut stake, StrideAmount::from_strd(80), NOW)
            .unwrap();

        assert!(matches!(
            manager.withdraw(&mut account, &mut stake, StrideAmount::from_strd(81), NOW + 1_000),
            Err(StakeError::InsufficientStake { .. })
        ));
        let t = manager
            .withdraw(&mut account, &mut stake, StrideAmount::from_strd(30), NOW + 1_000)
            .unwrap();
        assert_eq!(t.to, StakeState::Locked);
        assert_eq!(account.staked, StrideAmount::from_strd(50));
    }

    #[test]
    fn test_slash_clamps_to_staked() {
        let (manager, authority, mut account, mut stake) = setup(150);
        manager
            .stake(&mut account, &mut stake, StrideAmount::from_strd(100), NOW)
            .unwrap();

        let proof = FraudProof::issue(
            &authority,
            account.address,
            hash_data(b"forged attestation"),
            StrideAmount::from_strd(1_000),
            NOW,
        );
        let t = manager.slash(&mut account, &mut stake, &proof).unwrap();

        assert_eq!(t.amount, StrideAmount::from_strd(100));
        assert_eq!(account.balance, StrideAmount::from_strd(50));
        assert_eq!(account.staked, StrideAmount::ZERO);
        assert_eq!(stake.state, StakeState::Slashed);

        // irreversible: no withdrawal, no second slash
        assert_eq!(
            manager.withdraw(&mut account, &mut stake, StrideAmount::from_strd(1), NOW + 5_000),
            Err(StakeError::NotLocked(StakeState::Slashed))
        );
        assert_eq!(
            manager.slash(&mut account, &mut stake, &proof),
            Err(StakeError::NotLocked(StakeState::Slashed))
        );
    }

    #[test]
    fn test_partial_slash_releases_remainder() {
        let (manager, authority, mut account, mut stake) = setup(150);
        manager
            .stake(&mut account, &mut stake, StrideAmount::from_strd(100), NOW)
            .unwrap();

        let proof = FraudProof::issue(&authority, account.address, hash_data(b"c"), StrideAmount::from_strd(30), NOW);
        let t = manager.slash(&mut account, &mut stake, &proof).unwrap();

        assert_eq!(t.amount, StrideAmount::from_strd(30));
        assert_eq!(account.balance, StrideAmount::from_strd(120));
        assert_eq!(account.staked, StrideAmount::ZERO);
        assert_eq!(stake.slashed, StrideAmount::from_strd(30));
        assert_eq!(account.available(), StrideAmount::from_strd(120));
    }

    #[test]
    fn test_slash_requires_authority_signature() {
        let (manager, _, mut account, mut stake) = setup(10);
        manager
            .stake(&mut account, &mut stake, StrideAmount::from_strd(10), NOW)
            .unwrap();

        let rogue = Keypair::generate();
        let proof = FraudProof::issue(&rogue, account.address, hash_data(b"x"), StrideAmount::from_strd(1), NOW);
        assert_eq!(
            manager.slash(&mut account, &mut stake, &proof),
            Err(StakeError::UnauthenticatedProof)
        );
        assert_eq!(account.staked, StrideAmount::from_strd(10));
    }

    #[test]
    fn test_restaking_after_release_starts_fresh() {
        let (manager, _, mut account, mut stake) = setup(20);
        manager
            .stake(&mut account, &mut stake, StrideAmount::from_strd(20), NOW)
            .unwrap();
        manager
            .withdraw(&mut account, &mut stake, StrideAmount::from_strd(20), NOW + 1_000)
            .unwrap();

        let t = manager
            .stake(&mut account, &mut stake, StrideAmount::from_strd(5), NOW + 2_000)
            .unwrap();
        assert_eq!(t.from, StakeState::Released);
        assert_eq!(stake.amount, StrideAmount::from_strd(5));
        assert_eq!(stake.lock_expiry, NOW + 3_000);
    }

    #[test]
    fn test_zero_and_minimum_are_enforced() {
        let (_, authority, mut account, mut stake) = setup(100);
        let manager = StakeManager::new(
            StakingConfig {
                lock_period_ms: 0,
                min_stake: StrideAmount::from_strd(10),
            },
            *authority.public_key(),
        );
        assert_eq!(
            manager.stake(&mut account, &mut stake, StrideAmount::ZERO, NOW),
            Err(StakeError::ZeroAmount)
        );
        assert!(matches!(
            manager.stake(&mut account, &mut stake, StrideAmount::from_strd(9), NOW),
            Err(StakeError::BelowMinimum { .. })
        ));
        assert_eq!(account.staked, StrideAmount::ZERO);
    }
}
