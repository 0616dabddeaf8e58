//! Sled persistence for the ledger.
//!
//! # Trees
//!
//! - `entries` - hash chain (key: big-endian entry index)
//! - `accounts` - materialized account index (key: address)
//! - `stakes` - stake positions (key: address)
//! - `claims` - committed claim hashes (key: claim hash, value: entry index)
//!
//! A commit writes all four trees in one sled transaction.

use std::path::Path;

use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;
use tracing::debug;

use super::{Account, LedgerEntry};
use crate::staking::Stake;

const TREE_ENTRIES: &str = "entries";
const TREE_ACCOUNTS: &str = "accounts";
const TREE_STAKES: &str = "stakes";
const TREE_CLAIMS: &str = "claims";

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying sled failure
    #[error("storage error: {0}")]
    Sled(#[from] sled::Error),
    /// Encoding or decoding a record failed
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    /// Stored data is inconsistent
    #[error("corrupt store: {0}")]
    Corrupt(String),
}

/// Everything one commit writes
#[derive(Debug, Default)]
pub struct CommitSet<'a> {
    /// New chain entries, in order
    pub entries: &'a [LedgerEntry],
    /// Accounts touched by the entries
    pub accounts: Vec<&'a Account>,
    /// Stake positions touched by the entries
    pub stakes: Vec<&'a Stake>,
}

/// Persistent ledger storage
pub struct LedgerStore {
    db: sled::Db,
    entries: sled::Tree,
    accounts: sled::Tree,
    stakes: sled::Tree,
    claims: sled::Tree,
}

impl LedgerStore {
    /// Open or create a store at `path`
    ///
    /// # Errors
    /// Returns error if sled cannot open the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A throwaway store removed on drop
    ///
    /// # Errors
    /// Returns error if sled cannot create the database
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            entries: db.open_tree(TREE_ENTRIES)?,
            accounts: db.open_tree(TREE_ACCOUNTS)?,
            stakes: db.open_tree(TREE_STAKES)?,
            claims: db.open_tree(TREE_CLAIMS)?,
            db,
        })
    }

    /// All entries in chain order
    ///
    /// # Errors
    /// Returns error on read or decode failure, or a gap in the indices
    pub fn load_entries(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        let mut entries = Vec::with_capacity(self.entries.len());
        for item in self.entries.iter() {
            let (key, value) = item?;
            let entry: LedgerEntry = bincode::deserialize(&value)?;
            let expected = entries.len() as u64;
            if *key != expected.to_be_bytes() || entry.index != expected {
                return Err(StoreError::Corrupt(format!(
                    "expected entry {expected}, found {}",
                    entry.index
                )));
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    /// The stored account index
    ///
    /// # Errors
    /// Returns error on read or decode failure
    pub fn load_accounts(&self) -> Result<Vec<Account>, StoreError> {
        self.accounts
            .iter()
            .map(|item| {
                let (_, value) = item?;
                Ok(bincode::deserialize(&value)?)
            })
            .collect()
    }

    /// Number of committed claim hashes
    #[must_use]
    pub fn claim_count(&self) -> usize {
        self.claims.len()
    }

    /// Write a commit atomically across all trees
    ///
    /// # Errors
    /// Returns error if encoding or the transaction fails; nothing is written then
    pub fn commit(&self, set: &CommitSet<'_>) -> Result<(), StoreError> {
        let mut entry_rows = Vec::with_capacity(set.entries.len());
        let mut claim_rows = Vec::new();
        for entry in set.entries {
            let key = entry.index.to_be_bytes();
            entry_rows.push((key, bincode::serialize(entry)?));
            if let Some(claim) = entry.claim() {
                claim_rows.push((*claim.claim_hash.as_bytes(), key));
            }
        }
        let account_rows = set
            .accounts
            .iter()
            .map(|a| Ok((*a.address.as_bytes(), bincode::serialize(a)?)))
            .collect::<Result<Vec<_>, StoreError>>()?;
        let stake_rows = set
            .stakes
            .iter()
            .map(|s| Ok((*s.account.as_bytes(), bincode::serialize(s)?)))
            .collect::<Result<Vec<_>, StoreError>>()?;

        (&self.entries, &self.accounts, &self.stakes, &self.claims)
            .transaction(|(entries, accounts, stakes, claims)| {
                for (key, value) in &entry_rows {
                    entries.insert(key.as_slice(), value.as_slice())?;
                }
                for (key, value) in &account_rows {
                    accounts.insert(key.as_slice(), value.as_slice())?;
                }
                for (key, value) in &stake_rows {
                    stakes.insert(key.as_slice(), value.as_slice())?;
                }
                for (key, value) in &claim_rows {
                    claims.insert(key.as_slice(), value.as_slice())?;
                }
                Ok::<(), ConflictableTransactionError<StoreError>>(())
            })
            .map_err(|e| match e {
                TransactionError::Abort(e) => e,
                TransactionError::Storage(e) => StoreError::Sled(e),
            })?;

        debug!(entries = set.entries.len(), accounts = set.accounts.len(), "commit persisted");
        Ok(())
    }

    /// Flush pending writes to disk
    ///
    /// # Errors
    /// Returns error if sled fails to flush
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}
