//! Node configuration.
//!
//! Loaded from TOML, then overridden from the environment:
//!
//! - `STRIDE_DATA_DIR` - data directory
//! - `STRIDE_AUTHORITY` - path of the authority secret key file
//!
//! The batch policy has no default; a config file must choose one.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::attestation::{AttestationConfig, WitnessRegistry};
use crate::batch::BatchConfig;
use crate::crypto::{CryptoError, Keypair, PublicKey, SecretKey};
use crate::ledger::LedgerConfig;
use crate::rewards::RewardSchedule;
use crate::staking::StakingConfig;
use crate::types::{Address, AmountError, StrideAmount};
use crate::validator::ValidationConfig;

/// Environment variable overriding `data_dir`
pub const ENV_DATA_DIR: &str = "STRIDE_DATA_DIR";
/// Environment variable overriding `authority_key`
pub const ENV_AUTHORITY: &str = "STRIDE_AUTHORITY";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Reading a file failed
    #[error("failed to read {path}: {source}")]
    Io {
        /// File
        path: PathBuf,
        /// Cause
        source: std::io::Error,
    },
    /// TOML did not parse
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A key in the config is malformed
    #[error("invalid key: {0}")]
    InvalidKey(#[from] CryptoError),
    /// A genesis amount is malformed
    #[error("invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),
}

/// Off-chain object store settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Deadline for a single object store call (ms)
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { timeout_ms: 5_000 }
    }
}

/// A registered witness
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessEntry {
    /// Hex Ed25519 public key
    pub key: String,
    /// Weight under stake-weighted quorum
    #[serde(default = "default_weight")]
    pub weight: u64,
}

const fn default_weight() -> u64 {
    1
}

/// An initial allocation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisEntry {
    /// Address, `sc1`-prefixed hex
    pub address: String,
    /// Amount in STRD, decimal
    pub amount: String,
}

/// Full node configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Where the ledger database lives
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// File holding the hex secret key of the minting and slashing authority
    pub authority_key: PathBuf,
    /// Ledger settings; `batch_policy` is mandatory
    pub ledger: LedgerConfig,
    /// Claim bounds
    #[serde(default)]
    pub validation: ValidationConfig,
    /// Quorum and deadline
    #[serde(default)]
    pub attestation: AttestationConfig,
    /// Reward rates
    #[serde(default)]
    pub rewards: RewardSchedule,
    /// Lock period and minimum stake
    #[serde(default)]
    pub staking: StakingConfig,
    /// Batch size and flush interval
    #[serde(default)]
    pub batch: BatchConfig,
    /// Object store settings
    #[serde(default)]
    pub store: StoreConfig,
    /// Registered witnesses
    #[serde(default)]
    pub witnesses: Vec<WitnessEntry>,
    /// Allocations minted on an empty chain
    #[serde(default)]
    pub genesis: Vec<GenesisEntry>,
}

/// Default data directory: the platform data dir, or `./data` without one
#[must_use]
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir().map_or_else(|| PathBuf::from("./data"), |d| d.join("stridechain"))
}

impl NodeConfig {
    /// Parse a TOML document
    ///
    /// # Errors
    /// Returns error if the TOML is invalid or lacks required fields
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load from a TOML file, then apply environment overrides
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env();
        Ok(config)
    }

    /// Apply `STRIDE_*` environment overrides
    pub fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(key) = std::env::var(ENV_AUTHORITY) {
            self.authority_key = PathBuf::from(key);
        }
    }

    /// Sled database path
    #[must_use]
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("ledger")
    }

    /// Read the authority keypair
    ///
    /// # Errors
    /// Returns error if the file is missing or not a hex secret key
    pub fn authority_keypair(&self) -> Result<Keypair, ConfigError> {
        let content = std::fs::read_to_string(&self.authority_key).map_err(|source| ConfigError::Io {
            path: self.authority_key.clone(),
            source,
        })?;
        let secret = SecretKey::from_hex(content.trim())?;
        Ok(Keypair::from_secret(secret))
    }

    /// Build the witness registry
    ///
    /// # Errors
    /// Returns error on a malformed witness key
    pub fn witness_registry(&self) -> Result<WitnessRegistry, ConfigError> {
        let mut registry = WitnessRegistry::new();
        for entry in &self.witnesses {
            registry.register(PublicKey::from_hex(&entry.key)?, entry.weight);
        }
        Ok(registry)
    }

    /// Parse the genesis allocations
    ///
    /// # Errors
    /// Returns error on a malformed address or amount
    pub fn genesis_allocations(&self) -> Result<Vec<(Address, StrideAmount)>, ConfigError> {
        self.genesis
            .iter()
            .map(|g| {
                Ok((
                    Address::from_hex(&g.address)?,
                    StrideAmount::from_decimal_str(&g.amount)?,
                ))
            })
            .collect()
    }
}
