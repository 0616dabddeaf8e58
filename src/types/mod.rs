//! Core data types for the StrideChain ledger.

mod address;
mod amount;
mod claim;

pub use address::Address;
pub use amount::{AmountError, StrideAmount, DECIMALS, MAX_SUPPLY, ONE_STRD};
pub use claim::{
    claim_digest, claim_signing_bytes, ActivityClaim, BlobRef, ClaimId, ClaimSubmission,
};

use chrono::{DateTime, Utc};

/// Unix timestamp in milliseconds
pub type Timestamp = i64;

/// Get current timestamp in milliseconds
#[must_use]
pub fn now_millis() -> Timestamp {
    Utc::now().timestamp_millis()
}

/// Convert timestamp to `DateTime`
#[must_use]
pub fn timestamp_to_datetime(ts: Timestamp) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ts)
}
