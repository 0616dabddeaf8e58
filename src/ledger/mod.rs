//! Ledger core: the hash chain and the account index it materializes.
//!
//! All mutations go through one writer lock. A batch (or a single stake
//! action) is staged against the current state, persisted in one storage
//! transaction, then merged and published while still holding the lock, so
//! readers observe either none or all of it.

mod account;
mod chain;
pub mod store;

pub use account::Account;
pub use chain::{AccountSnapshot, BalanceDelta, EntryKind, LedgerEntry};
pub use store::{CommitSet, LedgerStore, StoreError};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::batch::Batch;
use crate::crypto::{merkle_root, Hash, PublicKey};
use crate::events::{EventCursor, EventError, EventLog, EventSubscription};
use crate::rewards::{MintCapability, RewardEngine, RewardError, SupplyMetrics};
use crate::staking::{FraudProof, Stake, StakeError, StakeManager};
use crate::types::{ActivityClaim, Address, ClaimId, StrideAmount, Timestamp};

/// Largest page `history` returns
pub const MAX_HISTORY_PAGE: usize = 1_000;

/// What to do when a claim in a batch fails
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPolicy {
    /// Any failing claim aborts the whole batch
    Strict,
    /// Commit the valid subset, report the rest
    BestEffort,
}

/// Ledger configuration. The batch policy has no default and must be chosen.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Batch failure policy
    pub batch_policy: BatchPolicy,
    /// How many live events a slow subscriber may lag behind
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

const fn default_event_capacity() -> usize {
    1_024
}

impl LedgerConfig {
    /// Configuration with the given policy
    #[must_use]
    pub const fn new(batch_policy: BatchPolicy) -> Self {
        Self {
            batch_policy,
            event_capacity: default_event_capacity(),
        }
    }
}

/// Ledger errors
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Claim hash already committed, or repeated within the batch
    #[error("duplicate claim {0}")]
    DuplicateClaim(ClaimId),
    /// Claim older than the account's latest committed activity
    #[error("claim at {claimed_at} is older than last activity {last} of {account}")]
    OutOfOrder {
        /// Account
        account: Address,
        /// Latest committed `claimed_at`
        last: Timestamp,
        /// Rejected `claimed_at`
        claimed_at: Timestamp,
    },
    /// Reward arithmetic or credit overflowed
    #[error("reward overflow")]
    RewardOverflow,
    /// Mint capability does not belong to the reward authority
    #[error("{0} is not the minting authority")]
    Unauthorized(PublicKey),
    /// A ledger invariant would be broken
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    /// The hash chain does not verify
    #[error("chain broken at entry {index}: {reason}")]
    ChainBroken {
        /// First bad entry
        index: u64,
        /// What is wrong with it
        reason: String,
    },
    /// Stake transition refused
    #[error(transparent)]
    Stake(#[from] StakeError),
    /// Fraud proof was already applied
    #[error("fraud proof {0} already applied")]
    ProofAlreadyApplied(Hash),
    /// Optimistic nonce check failed
    #[error("stale nonce: expected {expected}, account is at {actual}")]
    StaleNonce {
        /// Nonce the caller signed
        expected: u64,
        /// Current account nonce
        actual: u64,
    },
    /// Genesis allocations are only accepted on an empty chain
    #[error("genesis already committed")]
    GenesisClosed,
    /// A claim aborted its batch; nothing in the batch was committed
    #[error("batch aborted by claim {claim}: {reason}")]
    BatchAborted {
        /// Offending claim
        claim: ClaimId,
        /// Why
        reason: Box<LedgerError>,
    },
    /// Event subscription failed
    #[error(transparent)]
    Events(#[from] EventError),
    /// Persistence failed
    #[error(transparent)]
    Storage(#[from] StoreError),
    /// Entry encoding failed
    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

impl LedgerError {
    /// Whether the error aborts a batch under every policy
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::DuplicateClaim(_) | Self::OutOfOrder { .. })
    }
}

impl From<RewardError> for LedgerError {
    fn from(err: RewardError) -> Self {
        match err {
            RewardError::RewardOverflow => Self::RewardOverflow,
            RewardError::Unauthorized(key) => Self::Unauthorized(key),
        }
    }
}

/// Result of one claim in a batch
#[derive(Debug)]
pub enum ClaimResult {
    /// Committed
    Committed {
        /// Claim id
        claim: ClaimId,
        /// Resulting entry index
        entry_index: u64,
        /// Resulting entry hash
        entry_hash: Hash,
        /// Credited reward
        reward: StrideAmount,
    },
    /// Skipped under the best-effort policy
    Rejected {
        /// Claim id
        claim: ClaimId,
        /// Why it was skipped
        error: LedgerError,
    },
}

impl ClaimResult {
    /// The claim this result is for
    #[must_use]
    pub const fn claim(&self) -> &ClaimId {
        match self {
            Self::Committed { claim, .. } | Self::Rejected { claim, .. } => claim,
        }
    }
}

/// Summary of an applied batch
#[derive(Debug)]
pub struct BatchReport {
    /// Batch sequence number
    pub sequence: u64,
    /// Per-claim results in application order
    pub results: Vec<ClaimResult>,
    /// Merkle root over the hashes of the entries this batch appended
    pub entries_root: Hash,
    /// Chain tip after the batch
    pub tip: Hash,
}

impl BatchReport {
    /// Number of committed claims
    #[must_use]
    pub fn committed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r, ClaimResult::Committed { .. }))
            .count()
    }

    /// Number of rejected claims
    #[must_use]
    pub fn rejected(&self) -> usize {
        self.results.len() - self.committed()
    }
}

/// Position in an account's activity history
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryCursor {
    /// `claimed_at` of the last returned entry
    pub claimed_at: Timestamp,
    /// Index of the last returned entry
    pub index: u64,
}

/// One page of activity history
#[derive(Clone, Debug, Default)]
pub struct HistoryPage {
    /// Activity entries ordered by `claimed_at`
    pub entries: Vec<LedgerEntry>,
    /// Cursor for the following page, if there is one
    pub next: Option<HistoryCursor>,
}

/// Result of a full chain verification
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainReport {
    /// Entries verified
    pub entries: u64,
    /// Tip hash
    pub tip: Hash,
    /// Accounts rebuilt
    pub accounts: usize,
    /// Supply totals rebuilt
    pub supply: SupplyMetrics,
}

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<Address, Account>,
    stakes: HashMap<Address, Stake>,
    entries: Vec<LedgerEntry>,
    claims: HashMap<ClaimId, u64>,
    activity: HashMap<Address, Vec<u64>>,
    proofs: HashSet<Hash>,
    supply: SupplyMetrics,
}

impl LedgerState {
    fn tip(&self) -> Hash {
        self.entries.last().map_or(Hash::ZERO, |e| e.hash)
    }

    fn merge(&mut self, changes: StagedChanges) {
        for entry in changes.entries {
            if let Some(claim) = entry.claim() {
                self.claims.insert(claim.claim_hash, entry.index);
                self.activity.entry(entry.account).or_default().push(entry.index);
            }
            self.entries.push(entry);
        }
        self.accounts.extend(changes.accounts);
        self.stakes.extend(changes.stakes);
        self.proofs.extend(changes.proofs);
        self.supply = changes.supply;
    }
}

struct StagedChanges {
    entries: Vec<LedgerEntry>,
    accounts: HashMap<Address, Account>,
    stakes: HashMap<Address, Stake>,
    proofs: HashSet<Hash>,
    supply: SupplyMetrics,
}

impl StagedChanges {
    fn commit_set(&self) -> CommitSet<'_> {
        CommitSet {
            entries: &self.entries,
            accounts: self.accounts.values().collect(),
            stakes: self.stakes.values().collect(),
        }
    }
}

/// Uncommitted changes layered over the current state.
///
/// Every entry, fresh or replayed from storage, passes through [`Staging::absorb`],
/// which is the single place the chain and account invariants are checked.
struct Staging<'a> {
    base: &'a LedgerState,
    accounts: HashMap<Address, Account>,
    stakes: HashMap<Address, Stake>,
    claims: HashSet<ClaimId>,
    proofs: HashSet<Hash>,
    entries: Vec<LedgerEntry>,
    supply: SupplyMetrics,
}

impl<'a> Staging<'a> {
    fn new(base: &'a LedgerState) -> Self {
        Self {
            base,
            accounts: HashMap::new(),
            stakes: HashMap::new(),
            claims: HashSet::new(),
            proofs: HashSet::new(),
            entries: Vec::new(),
            supply: base.supply.clone(),
        }
    }

    fn account(&self, address: &Address) -> Account {
        self.accounts
            .get(address)
            .or_else(|| self.base.accounts.get(address))
            .cloned()
            .unwrap_or_else(|| Account::new(*address))
    }

    fn stake(&self, address: &Address) -> Stake {
        self.stakes
            .get(address)
            .or_else(|| self.base.stakes.get(address))
            .cloned()
            .unwrap_or_else(|| Stake::unstaked(*address))
    }

    fn has_claim(&self, claim: &ClaimId) -> bool {
        self.claims.contains(claim) || self.base.claims.contains_key(claim)
    }

    fn has_proof(&self, proof: &Hash) -> bool {
        self.proofs.contains(proof) || self.base.proofs.contains(proof)
    }

    fn next_index(&self) -> u64 {
        (self.base.entries.len() + self.entries.len()) as u64
    }

    fn tip(&self) -> Hash {
        self.entries.last().map_or_else(|| self.base.tip(), |e| e.hash)
    }

    /// Per-claim checks; failing here leaves the staging untouched
    fn check_claim(&self, claim: &ActivityClaim) -> Result<(), LedgerError> {
        if self.has_claim(&claim.claim_hash) {
            return Err(LedgerError::DuplicateClaim(claim.claim_hash));
        }
        let account = self.account(&claim.account);
        match account.last_activity {
            Some(last) if claim.claimed_at < last => Err(LedgerError::OutOfOrder {
                account: claim.account,
                last,
                claimed_at: claim.claimed_at,
            }),
            _ => Ok(()),
        }
    }

    /// Seal a new entry for `post` and absorb it
    fn append(
        &mut self,
        post: &Account,
        kind: EntryKind,
        delta: BalanceDelta,
        committed_at: Timestamp,
    ) -> Result<&LedgerEntry, LedgerError> {
        let entry = LedgerEntry::seal(
            self.next_index(),
            post.address,
            kind,
            delta,
            AccountSnapshot::from(post),
            committed_at,
            self.tip(),
        )?;
        self.absorb(entry)?;
        self.entries
            .last()
            .ok_or_else(|| LedgerError::InvariantViolation("appended entry missing".into()))
    }

    #[allow(clippy::too_many_lines)] // every entry kind is checked here
    fn absorb(&mut self, entry: LedgerEntry) -> Result<(), LedgerError> {
        let index = entry.index;
        let broken = |reason: &str| LedgerError::ChainBroken {
            index,
            reason: reason.to_string(),
        };
        if index != self.next_index() {
            return Err(broken("index out of sequence"));
        }
        if entry.prev_hash != self.tip() {
            return Err(broken("prev_hash does not match the previous entry"));
        }
        if entry.compute_hash()? != entry.hash {
            return Err(broken("hash does not match contents"));
        }

        let mut account = self.account(&entry.account);
        let post = entry.post;
        if entry.delta.apply(account.balance) != Some(post.balance) {
            return Err(broken("balance delta does not match the account"));
        }
        if Some(post.nonce) != account.nonce.checked_add(1) {
            return Err(broken("nonce is not the successor of the account nonce"));
        }
        if post.staked > post.balance {
            return Err(LedgerError::InvariantViolation(format!(
                "staked {} exceeds balance {} for {}",
                post.staked, post.balance, entry.account
            )));
        }

        let staked_delta = |expected: Option<StrideAmount>| {
            if expected == Some(post.staked) {
                Ok(())
            } else {
                Err(broken("staked amount does not follow from the entry"))
            }
        };
        let mut supply = self.supply.clone();
        let overflow = || LedgerError::InvariantViolation("supply totals overflow".into());

        match &entry.kind {
            EntryKind::Genesis { amount } => {
                if entry.delta != BalanceDelta::Credit(*amount) {
                    return Err(broken("genesis delta does not match allocation"));
                }
                staked_delta(Some(account.staked))?;
                supply.total_allocated = supply.total_allocated.checked_add(*amount).ok_or_else(overflow)?;
            }
            EntryKind::Activity { claim, reward, .. } => {
                if claim.account != entry.account || entry.delta != BalanceDelta::Credit(*reward) {
                    return Err(broken("activity does not match its account or reward"));
                }
                if self.has_claim(&claim.claim_hash) {
                    return Err(LedgerError::DuplicateClaim(claim.claim_hash));
                }
                if account.last_activity.is_some_and(|last| claim.claimed_at < last) {
                    return Err(broken("activity out of order"));
                }
                staked_delta(Some(account.staked))?;
                supply.total_rewarded = supply.total_rewarded.checked_add(*reward).ok_or_else(overflow)?;
                account.last_activity = Some(claim.claimed_at);
            }
            EntryKind::Stake { amount, position } => {
                if entry.delta != BalanceDelta::Zero || position.account != entry.account {
                    return Err(broken("stake entry moves balance or names another account"));
                }
                staked_delta(account.staked.checked_add(*amount))?;
                supply.total_staked = supply.total_staked.checked_add(*amount).ok_or_else(overflow)?;
            }
            EntryKind::Release { amount, position } => {
                if entry.delta != BalanceDelta::Zero || position.account != entry.account {
                    return Err(broken("release entry moves balance or names another account"));
                }
                staked_delta(account.staked.checked_sub(*amount))?;
                supply.total_staked = supply.total_staked.checked_sub(*amount).ok_or_else(overflow)?;
            }
            EntryKind::Slash {
                amount,
                proof_id,
                released,
                position,
                ..
            } => {
                if entry.delta != BalanceDelta::Debit(*amount) || position.account != entry.account {
                    return Err(broken("slash delta does not match the burned amount"));
                }
                if self.has_proof(proof_id) {
                    return Err(LedgerError::ProofAlreadyApplied(*proof_id));
                }
                let unreserved = amount.checked_add(*released).ok_or_else(overflow)?;
                staked_delta(account.staked.checked_sub(unreserved))?;
                supply.total_slashed = supply.total_slashed.checked_add(*amount).ok_or_else(overflow)?;
                supply.total_staked = supply.total_staked.checked_sub(unreserved).ok_or_else(overflow)?;
                self.proofs.insert(*proof_id);
            }
        }

        if let Some(position) = entry.kind.position() {
            self.stakes.insert(entry.account, position.clone());
        }
        if let Some(claim) = entry.claim() {
            self.claims.insert(claim.claim_hash);
        }
        account.balance = post.balance;
        account.staked = post.staked;
        account.nonce = post.nonce;
        self.accounts.insert(entry.account, account);
        self.supply = supply;
        self.entries.push(entry);
        Ok(())
    }

    fn into_changes(self) -> StagedChanges {
        StagedChanges {
            entries: self.entries,
            accounts: self.accounts,
            stakes: self.stakes,
            proofs: self.proofs,
            supply: self.supply,
        }
    }
}

fn bump_nonce(account: &mut Account) -> Result<(), LedgerError> {
    account.nonce = account
        .nonce
        .checked_add(1)
        .ok_or_else(|| LedgerError::InvariantViolation(format!("nonce exhausted for {}", account.address)))?;
    Ok(())
}

/// The activity ledger
pub struct Ledger {
    config: LedgerConfig,
    state: RwLock<LedgerState>,
    store: Option<LedgerStore>,
    events: Arc<EventLog>,
    rewards: RewardEngine,
    staking: StakeManager,
    mint: MintCapability,
}

impl Ledger {
    /// Create an in-memory ledger
    ///
    /// # Errors
    /// `Unauthorized` if `mint` was not issued for the reward engine's authority
    pub fn new(
        config: LedgerConfig,
        rewards: RewardEngine,
        staking: StakeManager,
        mint: MintCapability,
    ) -> Result<Self, LedgerError> {
        if mint.authority() != rewards.authority() {
            return Err(LedgerError::Unauthorized(*mint.authority()));
        }
        Ok(Self {
            events: Arc::new(EventLog::new(config.event_capacity)),
            config,
            state: RwLock::new(LedgerState::default()),
            store: None,
            rewards,
            staking,
            mint,
        })
    }

    /// Attach persistent storage, replaying and verifying everything it holds
    ///
    /// # Errors
    /// Returns error if the stored chain does not verify or the stored
    /// account index disagrees with it
    pub fn with_store(mut self, store: LedgerStore) -> Result<Self, LedgerError> {
        let entries = store.load_entries()?;
        let state = self.state.get_mut();
        let mut staging = Staging::new(state);
        for entry in entries {
            staging.absorb(entry)?;
        }
        let changes = staging.into_changes();
        state.merge(changes);

        let stored = store.load_accounts()?;
        if stored.len() != state.accounts.len()
            || stored.iter().any(|a| state.accounts.get(&a.address) != Some(a))
        {
            return Err(LedgerError::InvariantViolation(
                "stored account index diverges from the chain".into(),
            ));
        }

        self.events.publish(&state.entries);
        info!(entries = state.entries.len(), accounts = state.accounts.len(), tip = %state.tip(), "ledger opened");
        self.store = Some(store);
        Ok(self)
    }

    /// Ledger configuration
    #[must_use]
    pub const fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Reward engine
    #[must_use]
    pub const fn rewards(&self) -> &RewardEngine {
        &self.rewards
    }

    /// Stake manager
    #[must_use]
    pub const fn staking(&self) -> &StakeManager {
        &self.staking
    }

    /// Mint the initial allocations; only allowed on an empty chain
    ///
    /// # Errors
    /// `GenesisClosed` if any entry exists, `RewardOverflow` past the supply ceiling
    pub fn allocate_genesis(
        &self,
        allocations: &[(Address, StrideAmount)],
        now: Timestamp,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let mut state = self.state.write();
        if !state.entries.is_empty() {
            return Err(LedgerError::GenesisClosed);
        }

        let mut staging = Staging::new(&state);
        for (address, amount) in allocations {
            let mut account = staging.account(address);
            account.balance = self.rewards.credit(&self.mint, account.balance, *amount)?;
            bump_nonce(&mut account)?;
            staging.append(
                &account,
                EntryKind::Genesis { amount: *amount },
                BalanceDelta::Credit(*amount),
                now,
            )?;
        }
        let changes = staging.into_changes();
        let entries = self.commit(&mut state, changes)?;
        drop(state);
        info!(allocations = entries.len(), "genesis committed");
        Ok(entries)
    }

    /// Apply a batch of verified claims.
    ///
    /// Claims are applied in ascending `claimed_at` (stable, so per-account
    /// submission order breaks ties). Under [`BatchPolicy::Strict`] any failing
    /// claim aborts the batch; under [`BatchPolicy::BestEffort`] duplicate and
    /// out-of-order claims are skipped. Overflows and invariant violations
    /// abort under both policies.
    ///
    /// # Errors
    /// `BatchAborted` naming the claim that aborted the batch, or a storage error.
    /// Nothing from the batch is visible after an error.
    pub fn apply_batch(&self, batch: &Batch, now: Timestamp) -> Result<BatchReport, LedgerError> {
        let mut claims: Vec<_> = batch.claims().iter().collect();
        claims.sort_by_key(|c| c.claim().claimed_at);

        let mut state = self.state.write();
        let mut staging = Staging::new(&state);
        let mut results = Vec::with_capacity(claims.len());

        for verified in claims {
            let claim = verified.claim();
            match self.stage_claim(&mut staging, claim, verified.witnesses(), now) {
                Ok((entry_index, entry_hash, reward)) => results.push(ClaimResult::Committed {
                    claim: claim.claim_hash,
                    entry_index,
                    entry_hash,
                    reward,
                }),
                Err(error) if !error.is_fatal() && self.config.batch_policy == BatchPolicy::BestEffort => {
                    debug!(claim = %claim.claim_hash, %error, "claim skipped");
                    results.push(ClaimResult::Rejected {
                        claim: claim.claim_hash,
                        error,
                    });
                }
                Err(error) => {
                    warn!(sequence = batch.sequence(), claim = %claim.claim_hash, %error, "batch aborted");
                    return Err(LedgerError::BatchAborted {
                        claim: claim.claim_hash,
                        reason: Box::new(error),
                    });
                }
            }
        }

        let changes = staging.into_changes();
        let hashes: Vec<Hash> = changes.entries.iter().map(|e| e.hash).collect();
        let entries_root = merkle_root(&hashes);
        self.commit(&mut state, changes)?;

        let report = BatchReport {
            sequence: batch.sequence(),
            results,
            entries_root,
            tip: state.tip(),
        };
        drop(state);
        info!(
            sequence = report.sequence,
            committed = report.committed(),
            rejected = report.rejected(),
            tip = %report.tip,
            "batch committed"
        );
        Ok(report)
    }

    fn stage_claim(
        &self,
        staging: &mut Staging<'_>,
        claim: &ActivityClaim,
        witnesses: &[PublicKey],
        now: Timestamp,
    ) -> Result<(u64, Hash, StrideAmount), LedgerError> {
        staging.check_claim(claim)?;

        let reward = self.rewards.compute_reward(claim.distance_m, claim.duration_s)?;
        let mut account = staging.account(&claim.account);
        account.balance = self.rewards.credit(&self.mint, account.balance, reward)?;
        bump_nonce(&mut account)?;

        let entry = staging.append(
            &account,
            EntryKind::Activity {
                claim: claim.clone(),
                reward,
                witnesses: witnesses.to_vec(),
            },
            BalanceDelta::Credit(reward),
            now,
        )?;
        Ok((entry.index, entry.hash, reward))
    }

    /// Lock `amount` of the account's balance.
    ///
    /// `expected_nonce`, when given, must equal the account's current nonce.
    ///
    /// # Errors
    /// Staking errors, `StaleNonce`, or a storage error
    pub fn stake(
        &self,
        address: Address,
        amount: StrideAmount,
        expected_nonce: Option<u64>,
        now: Timestamp,
    ) -> Result<LedgerEntry, LedgerError> {
        self.commit_stake_action(address, expected_nonce, now, |account, stake| {
            let transition = self.staking.stake(account, stake, amount, now)?;
            Ok((
                EntryKind::Stake {
                    amount: transition.amount,
                    position: stake.clone(),
                },
                BalanceDelta::Zero,
            ))
        })
    }

    /// Withdraw `amount` of an expired stake
    ///
    /// # Errors
    /// Staking errors, `StaleNonce`, or a storage error
    pub fn withdraw_stake(
        &self,
        address: Address,
        amount: StrideAmount,
        expected_nonce: Option<u64>,
        now: Timestamp,
    ) -> Result<LedgerEntry, LedgerError> {
        self.commit_stake_action(address, expected_nonce, now, |account, stake| {
            let transition = self.staking.withdraw(account, stake, amount, now)?;
            Ok((
                EntryKind::Release {
                    amount: transition.amount,
                    position: stake.clone(),
                },
                BalanceDelta::Zero,
            ))
        })
    }

    /// Slash the accused account's stake on an authority-signed fraud proof
    ///
    /// # Errors
    /// `ProofAlreadyApplied` for a replayed proof, staking errors, or a storage error
    pub fn slash(&self, proof: &FraudProof, now: Timestamp) -> Result<LedgerEntry, LedgerError> {
        let proof_id = proof.id();
        if self.state.read().proofs.contains(&proof_id) {
            return Err(LedgerError::ProofAlreadyApplied(proof_id));
        }
        self.commit_stake_action(proof.accused, None, now, |account, stake| {
            let before = stake.amount;
            let transition = self.staking.slash(account, stake, proof)?;
            Ok((
                EntryKind::Slash {
                    amount: transition.amount,
                    proof_id,
                    claim_hash: proof.claim_hash,
                    released: before.saturating_sub(transition.amount),
                    position: stake.clone(),
                },
                BalanceDelta::Debit(transition.amount),
            ))
        })
    }

    fn commit_stake_action<F>(
        &self,
        address: Address,
        expected_nonce: Option<u64>,
        now: Timestamp,
        action: F,
    ) -> Result<LedgerEntry, LedgerError>
    where
        F: FnOnce(&mut Account, &mut Stake) -> Result<(EntryKind, BalanceDelta), LedgerError>,
    {
        let mut state = self.state.write();
        let mut staging = Staging::new(&state);
        let mut account = staging.account(&address);
        if let Some(expected) = expected_nonce {
            if expected != account.nonce {
                return Err(LedgerError::StaleNonce {
                    expected,
                    actual: account.nonce,
                });
            }
        }

        let mut stake = staging.stake(&address);
        let (kind, delta) = action(&mut account, &mut stake)?;
        bump_nonce(&mut account)?;
        staging.append(&account, kind, delta, now)?;

        let changes = staging.into_changes();
        let mut entries = self.commit(&mut state, changes)?;
        drop(state);
        entries
            .pop()
            .ok_or_else(|| LedgerError::InvariantViolation("stake action produced no entry".into()))
    }

    /// Persist, merge and publish staged changes; the caller holds the write lock
    fn commit(&self, state: &mut LedgerState, changes: StagedChanges) -> Result<Vec<LedgerEntry>, LedgerError> {
        if changes.entries.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(store) = &self.store {
            store.commit(&changes.commit_set())?;
        }
        let entries = changes.entries.clone();
        state.merge(changes);
        self.events.publish(&entries);
        Ok(entries)
    }

    /// Account state
    #[must_use]
    pub fn account(&self, address: &Address) -> Option<Account> {
        self.state.read().accounts.get(address).cloned()
    }

    /// Stake position
    #[must_use]
    pub fn stake_position(&self, address: &Address) -> Option<Stake> {
        self.state.read().stakes.get(address).cloned()
    }

    /// Whether a claim hash is committed
    #[must_use]
    pub fn contains_claim(&self, claim: &ClaimId) -> bool {
        self.state.read().claims.contains_key(claim)
    }

    /// Entry at `index`
    #[must_use]
    pub fn entry(&self, index: u64) -> Option<LedgerEntry> {
        let index = usize::try_from(index).ok()?;
        self.state.read().entries.get(index).cloned()
    }

    /// Up to `limit` entries starting at `from`
    #[must_use]
    pub fn entries(&self, from: u64, limit: usize) -> Vec<LedgerEntry> {
        let state = self.state.read();
        let start = usize::try_from(from).unwrap_or(usize::MAX).min(state.entries.len());
        state.entries[start..].iter().take(limit).cloned().collect()
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> u64 {
        self.state.read().entries.len() as u64
    }

    /// Whether the chain is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// Hash of the latest entry
    #[must_use]
    pub fn tip(&self) -> Hash {
        self.state.read().tip()
    }

    /// Supply totals
    #[must_use]
    pub fn supply(&self) -> SupplyMetrics {
        self.state.read().supply.clone()
    }

    /// Merkle root over all accounts, ordered by address
    #[must_use]
    pub fn state_root(&self) -> Hash {
        let mut leaves: Vec<(Address, Hash)> = self
            .state
            .read()
            .accounts
            .values()
            .map(|a| (a.address, a.leaf_hash()))
            .collect();
        leaves.sort_by_key(|(address, _)| *address);
        let leaves: Vec<Hash> = leaves.into_iter().map(|(_, leaf)| leaf).collect();
        merkle_root(&leaves)
    }

    /// Activity history of an account ordered by `claimed_at`, resuming after `cursor`
    #[must_use]
    pub fn history(&self, address: &Address, cursor: Option<HistoryCursor>, limit: usize) -> HistoryPage {
        let state = self.state.read();
        let Some(indices) = state.activity.get(address) else {
            return HistoryPage::default();
        };
        let limit = limit.clamp(1, MAX_HISTORY_PAGE);
        let key = |index: u64| {
            let claimed_at = usize::try_from(index)
                .ok()
                .and_then(|i| state.entries.get(i))
                .and_then(LedgerEntry::claimed_at)
                .unwrap_or(Timestamp::MIN);
            (claimed_at, index)
        };

        let start = cursor.map_or(0, |c| indices.partition_point(|&i| key(i) <= (c.claimed_at, c.index)));
        let entries: Vec<LedgerEntry> = indices[start..]
            .iter()
            .take(limit)
            .filter_map(|&i| usize::try_from(i).ok().and_then(|i| state.entries.get(i)).cloned())
            .collect();

        let next = if start + entries.len() < indices.len() {
            entries.last().and_then(|e| {
                e.claimed_at().map(|claimed_at| HistoryCursor {
                    claimed_at,
                    index: e.index,
                })
            })
        } else {
            None
        };
        HistoryPage { entries, next }
    }

    /// Recompute every hash from entry 0, rebuild the account index and
    /// compare it to the live one
    ///
    /// # Errors
    /// `ChainBroken` at the first bad entry, `InvariantViolation` if the
    /// rebuilt state differs
    pub fn verify_chain(&self) -> Result<ChainReport, LedgerError> {
        let state = self.state.read();
        let empty = LedgerState::default();
        let mut replay = Staging::new(&empty);
        for entry in &state.entries {
            replay.absorb(entry.clone())?;
        }
        let rebuilt = replay.into_changes();

        if rebuilt.accounts != state.accounts || rebuilt.stakes != state.stakes {
            return Err(LedgerError::InvariantViolation(
                "account index diverges from the chain".into(),
            ));
        }
        if rebuilt.supply != state.supply {
            return Err(LedgerError::InvariantViolation("supply totals diverge from the chain".into()));
        }

        debug!(entries = state.entries.len(), "chain verified");
        Ok(ChainReport {
            entries: state.entries.len() as u64,
            tip: state.tip(),
            accounts: state.accounts.len(),
            supply: rebuilt.supply,
        })
    }

    /// The event log
    #[must_use]
    pub const fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    /// Subscribe to ledger events from `cursor`
    ///
    /// # Errors
    /// See [`EventLog::subscribe`].
    pub fn subscribe(&self, cursor: EventCursor) -> Result<EventSubscription, LedgerError> {
        Ok(self.events.subscribe(cursor)?)
    }

    /// Flush storage, if any
    ///
    /// # Errors
    /// Returns error if the flush fails
    pub fn flush(&self) -> Result<(), LedgerError> {
        if let Some(store) = &self.store {
            store.flush()?;
        }
        Ok(())
    }
}
