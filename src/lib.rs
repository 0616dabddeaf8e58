//! # StrideChain
//!
//! A tamper-evident, replay-safe ledger that turns attested physical
//! activity into token rewards.
//!
//! ## Architecture
//!
//! A claim moves through four stages:
//! - **Validation**: structural checks on the untrusted submission
//! - **Attestation**: registered witnesses confirm until quorum
//! - **Batching**: verified claims are grouped FIFO
//! - **Ledger**: each batch commits atomically as hash-chained entries
//!
//! ## Security Model
//!
//! - Every claim hash commits at most once
//! - Rewards are minted only through the ledger's mint capability
//! - Slashing requires an authority-signed fraud proof, applied once
//! - Any change to a past entry breaks the chain from that point on

#![forbid(unsafe_code)]
#![deny(clippy::all, rust_2018_idioms)]
#![warn(clippy::pedantic, clippy::nursery, missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod attestation;
pub mod batch;
pub mod config;
pub mod crypto;
pub mod events;
pub mod ingress;
pub mod ledger;
pub mod rewards;
pub mod service;
pub mod staking;
pub mod types;
pub mod validator;

pub use attestation::{AttestationState, AttestationVerifier, ClaimOutcome, QuorumPolicy, WitnessVerdict};
pub use config::NodeConfig;
pub use crypto::{Hash, Keypair, PublicKey, SecretKey, Signature};
pub use ledger::{BatchPolicy, Ledger, LedgerConfig, LedgerEntry, LedgerError};
pub use service::{ActivityService, ServiceError};
pub use types::{ActivityClaim, Address, ClaimSubmission, StrideAmount};

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
