//! Line-delimited JSON requests for a local node.
//!
//! Each input line holds one [`Request`] and is answered by one [`Reply`]
//! line. Requests carry the same signatures `stridechain-cli` produces, so
//! its output can be piped straight into a running node.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::attestation::{AttestationState, WitnessVerdict};
use crate::crypto::{Hash, PublicKey, Signature};
use crate::ledger::LedgerEntry;
use crate::service::{ActivityService, BlobStatus, ServiceError};
use crate::staking::FraudProof;
use crate::types::{ClaimId, ClaimSubmission, StrideAmount, Timestamp};

/// A request to the node
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Submit a signed claim
    SubmitClaim {
        /// The owner-signed submission
        submission: ClaimSubmission,
    },
    /// Record a witness verdict
    Attest {
        /// Claim id
        claim: ClaimId,
        /// Witness key
        witness: PublicKey,
        /// Confirm or dispute
        verdict: WitnessVerdict,
        /// Witness signature over the verdict
        signature: Signature,
    },
    /// Owner withdrawal of a pending claim
    WithdrawClaim {
        /// Claim id
        claim: ClaimId,
        /// Owner signature
        signature: Signature,
    },
    /// Lock part of the owner's balance
    Stake {
        /// Account owner
        owner: PublicKey,
        /// Amount to lock
        amount: StrideAmount,
        /// Owner signature bound to the account nonce
        signature: Signature,
    },
    /// Release part of an expired stake
    WithdrawStake {
        /// Account owner
        owner: PublicKey,
        /// Amount to release
        amount: StrideAmount,
        /// Owner signature bound to the account nonce
        signature: Signature,
    },
    /// Apply an authority-signed fraud proof
    Slash {
        /// The proof
        proof: FraudProof,
    },
}

/// The node's answer to one request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Reply {
    /// Claim accepted and pending
    Claim {
        /// Claim id
        claim_id: ClaimId,
        /// Attestation state
        state: AttestationState,
        /// Attestation deadline
        deadline: Timestamp,
        /// Blob check, if the claim references one
        blob: Option<BlobStatus>,
    },
    /// Attestation state after the request
    State {
        /// Claim id
        claim_id: ClaimId,
        /// Attestation state
        state: AttestationState,
    },
    /// Ledger entry written by a stake action
    Entry {
        /// Entry index
        index: u64,
        /// Entry hash
        hash: Hash,
    },
    /// The request failed
    Error {
        /// What went wrong
        message: String,
    },
}

impl From<&LedgerEntry> for Reply {
    fn from(entry: &LedgerEntry) -> Self {
        Self::Entry {
            index: entry.index,
            hash: entry.hash,
        }
    }
}

/// Run one request against the service
///
/// # Errors
/// Whatever the service operation returns
pub async fn dispatch(service: &ActivityService, request: Request) -> Result<Reply, ServiceError> {
    match request {
        Request::SubmitClaim { submission } => {
            let receipt = service.submit_claim(submission).await?;
            Ok(Reply::Claim {
                claim_id: receipt.claim_id,
                state: receipt.state,
                deadline: receipt.deadline,
                blob: receipt.blob,
            })
        }
        Request::Attest {
            claim,
            witness,
            verdict,
            signature,
        } => {
            let state = service.attest(&claim, &witness, verdict, &signature).await?;
            Ok(Reply::State { claim_id: claim, state })
        }
        Request::WithdrawClaim { claim, signature } => {
            service.withdraw_claim(&claim, &signature).await?;
            Ok(Reply::State {
                claim_id: claim,
                state: AttestationState::Rejected,
            })
        }
        Request::Stake {
            owner,
            amount,
            signature,
        } => Ok(Reply::from(&service.stake(&owner, amount, &signature)?)),
        Request::WithdrawStake {
            owner,
            amount,
            signature,
        } => Ok(Reply::from(&service.withdraw_stake(&owner, amount, &signature)?)),
        Request::Slash { proof } => Ok(Reply::from(&service.slash(&proof)?)),
    }
}

/// Parse and run one input line; failures become [`Reply::Error`]
pub async fn handle_line(service: &ActivityService, line: &str) -> Reply {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "malformed request");
            return Reply::Error {
                message: format!("malformed request: {e}"),
            };
        }
    };
    dispatch(service, request)
        .await
        .unwrap_or_else(|e| Reply::Error { message: e.to_string() })
}
