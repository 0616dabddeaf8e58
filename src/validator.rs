//! Claim validation.
//!
//! Structural and bounds checks on an untrusted [`ClaimSubmission`]. The
//! checks are pure: they read the submission, the configured bounds and the
//! caller-supplied clock, and nothing else.

use serde::{Deserialize, Serialize};

use crate::crypto::{verify, Hash};
use crate::types::{claim_signing_bytes, ActivityClaim, Address, ClaimSubmission, Timestamp};

/// Plausibility bounds for inbound claims
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Largest accepted distance (meters)
    pub max_distance_m: u64,
    /// Largest accepted duration (seconds)
    pub max_duration_s: u64,
    /// Smallest accepted duration (seconds)
    pub min_duration_s: u64,
    /// How far `claimed_at` may lie in the future (ms)
    pub max_clock_skew_ms: i64,
    /// How old a claim may be when submitted (ms); `None` disables the check
    pub max_claim_age_ms: Option<i64>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_distance_m: 300_000,   // 300 km
            max_duration_s: 86_400,    // 24 h
            min_duration_s: 1,
            max_clock_skew_ms: 5 * 60 * 1000,
            max_claim_age_ms: Some(30 * 24 * 60 * 60 * 1000),
        }
    }
}

/// Reasons a claim is rejected before attestation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Distance is zero or negative
    #[error("distance must be positive, got {0}")]
    NonPositiveDistance(i64),
    /// Duration is zero or negative
    #[error("duration must be positive, got {0}")]
    NonPositiveDuration(i64),
    /// Distance exceeds the configured bound
    #[error("distance {got}m exceeds maximum {max}m")]
    DistanceOutOfBounds {
        /// Submitted distance
        got: u64,
        /// Configured maximum
        max: u64,
    },
    /// Duration outside the configured bounds
    #[error("duration {got}s outside [{min}, {max}]s")]
    DurationOutOfBounds {
        /// Submitted duration
        got: u64,
        /// Configured minimum
        min: u64,
        /// Configured maximum
        max: u64,
    },
    /// Claimed timestamp is too far in the future
    #[error("claimed_at {claimed_at} is beyond now {now} plus skew tolerance")]
    FutureTimestamp {
        /// Submitted timestamp
        claimed_at: Timestamp,
        /// Validator clock
        now: Timestamp,
    },
    /// Claimed timestamp is older than the accepted window
    #[error("claimed_at {claimed_at} is older than the accepted window")]
    StaleClaim {
        /// Submitted timestamp
        claimed_at: Timestamp,
    },
    /// Provided hash differs from the recomputed digest
    #[error("claim hash mismatch: provided {provided}, computed {computed}")]
    HashMismatch {
        /// Submitted hash
        provided: Hash,
        /// Recomputed digest
        computed: Hash,
    },
    /// Owner signature does not verify
    #[error("owner signature is invalid")]
    InvalidSignature,
}

/// Validate a raw submission against `config` at time `now`.
///
/// # Errors
/// Returns the first failed check.
pub fn validate_claim(
    submission: &ClaimSubmission,
    config: &ValidationConfig,
    now: Timestamp,
) -> Result<ActivityClaim, ValidationError> {
    let distance_m = u64::try_from(submission.distance_m)
        .ok()
        .filter(|d| *d > 0)
        .ok_or(ValidationError::NonPositiveDistance(submission.distance_m))?;
    let duration_s = u64::try_from(submission.duration_s)
        .ok()
        .filter(|d| *d > 0)
        .ok_or(ValidationError::NonPositiveDuration(submission.duration_s))?;

    if distance_m > config.max_distance_m {
        return Err(ValidationError::DistanceOutOfBounds {
            got: distance_m,
            max: config.max_distance_m,
        });
    }

    if duration_s < config.min_duration_s || duration_s > config.max_duration_s {
        return Err(ValidationError::DurationOutOfBounds {
            got: duration_s,
            min: config.min_duration_s,
            max: config.max_duration_s,
        });
    }

    if submission.claimed_at > now.saturating_add(config.max_clock_skew_ms) {
        return Err(ValidationError::FutureTimestamp {
            claimed_at: submission.claimed_at,
            now,
        });
    }

    if let Some(max_age) = config.max_claim_age_ms {
        if submission.claimed_at < now.saturating_sub(max_age) {
            return Err(ValidationError::StaleClaim {
                claimed_at: submission.claimed_at,
            });
        }
    }

    let computed = submission.recompute_hash();
    if computed != submission.claim_hash {
        return Err(ValidationError::HashMismatch {
            provided: submission.claim_hash,
            computed,
        });
    }

    verify(
        &submission.owner,
        &claim_signing_bytes(&submission.claim_hash),
        &submission.signature,
    )
    .map_err(|_| ValidationError::InvalidSignature)?;

    Ok(ActivityClaim {
        owner: submission.owner,
        account: Address::from_public_key(&submission.owner),
        distance_m,
        duration_s,
        claimed_at: submission.claimed_at,
        claim_hash: submission.claim_hash,
        blob: submission.blob,
        signature: submission.signature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    const NOW: Timestamp = 1_700_000_000_000;

    fn submit(distance: i64, duration: i64, at: Timestamp) -> ClaimSubmission {
        ClaimSubmission::signed(&Keypair::generate(), distance, duration, at, None)
    }

    #[test]
    fn test_accepts_plausible_claim() {
        let claim = validate_claim(&submit(5000, 1800, NOW), &ValidationConfig::default(), NOW)
            .expect("valid claim");
        assert_eq!(claim.distance_m, 5000);
        assert_eq!(claim.account, Address::from_public_key(&claim.owner));
    }

    #[test]
    fn test_rejects_zero_and_negative_values() {
        let config = ValidationConfig::default();
        assert_eq!(
            validate_claim(&submit(0, 1800, NOW), &config, NOW),
            Err(ValidationError::NonPositiveDistance(0))
        );
        assert_eq!(
            validate_claim(&submit(-5, 1800, NOW), &config, NOW),
            Err(ValidationError::NonPositiveDistance(-5))
        );
        assert_eq!(
            validate_claim(&submit(5000, -1, NOW), &config, NOW),
            Err(ValidationError::NonPositiveDuration(-1))
        );
    }

    #[test]
    fn test_rejects_out_of_bounds() {
        let config = ValidationConfig {
            max_distance_m: 10_000,
            max_duration_s: 3_600,
            ..ValidationConfig::default()
        };
        assert!(matches!(
            validate_claim(&submit(10_001, 1800, NOW), &config, NOW),
            Err(ValidationError::DistanceOutOfBounds { .. })
        ));
        assert!(matches!(
            validate_claim(&submit(5000, 3_601, NOW), &config, NOW),
            Err(ValidationError::DurationOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_skew_tolerance_bounds_future_timestamps() {
        let config = ValidationConfig::default();
        let edge = NOW + config.max_clock_skew_ms;

        assert!(validate_claim(&submit(5000, 1800, edge), &config, NOW).is_ok());
        assert!(matches!(
            validate_claim(&submit(5000, 1800, edge + 1), &config, NOW),
            Err(ValidationError::FutureTimestamp { .. })
        ));
    }

    #[test]
    fn test_rejects_stale_claims_when_enabled() {
        let config = ValidationConfig {
            max_claim_age_ms: Some(1_000),
            ..ValidationConfig::default()
        };
        assert!(matches!(
            validate_claim(&submit(5000, 1800, NOW - 1_001), &config, NOW),
            Err(ValidationError::StaleClaim { .. })
        ));

        let unbounded = ValidationConfig {
            max_claim_age_ms: None,
            ..config
        };
        assert!(validate_claim(&submit(5000, 1800, 0), &unbounded, NOW).is_ok());
    }

    #[test]
    fn test_rejects_tampered_payload() {
        let mut sub = submit(5000, 1800, NOW);
        sub.distance_m = 50_000;
        assert!(matches!(
            validate_claim(&sub, &ValidationConfig::default(), NOW),
            Err(ValidationError::HashMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_foreign_signature() {
        let mut sub = submit(5000, 1800, NOW);
        let forger = Keypair::generate();
        sub.signature = forger.sign(&claim_signing_bytes(&sub.claim_hash));
        assert_eq!(
            validate_claim(&sub, &ValidationConfig::default(), NOW),
            Err(ValidationError::InvalidSignature)
        );
    }
}
