//! Activity service: the external face of the ledger.
//!
//! Ties validation, attestation, batching and the ledger together. The only
//! operations that suspend are waiting for a claim's verdict (bounded by its
//! attestation deadline) and object store calls (bounded by a timeout). A
//! timed-out object store marks the blob unavailable and never blocks a commit.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::attestation::{
    AttestationError, AttestationState, AttestationVerifier, ClaimOutcome, WitnessVerdict,
};
use crate::batch::{spawn_batcher, BatchConfig, BatchError, BatchHandle, Settlement};
use crate::crypto::{verify, PublicKey, Signature};
use crate::events::{EventCursor, EventError, EventSubscription};
use crate::ledger::{Account, HistoryCursor, HistoryPage, Ledger, LedgerEntry, LedgerError};
use crate::staking::{stake_signing_bytes, FraudProof, Stake, StakeAction};
use crate::types::{now_millis, Address, BlobRef, ClaimId, ClaimSubmission, StrideAmount, Timestamp};
use crate::validator::{validate_claim, ValidationConfig, ValidationError};

/// How often a verdict waiter re-checks a verified claim awaiting settlement
const SETTLEMENT_POLL: Duration = Duration::from_millis(250);

/// Object store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObjectStoreError {
    /// The backend refused or failed the request
    #[error("object store error: {0}")]
    Backend(String),
}

/// Content-addressed blob storage outside the ledger
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `content`, returning its address
    async fn put(&self, content: Vec<u8>) -> Result<BlobRef, ObjectStoreError>;

    /// Whether a blob is present
    async fn contains(&self, blob: &BlobRef) -> Result<bool, ObjectStoreError>;
}

/// In-process object store
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    blobs: parking_lot::RwLock<HashMap<BlobRef, Vec<u8>>>,
}

impl MemoryObjectStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, content: Vec<u8>) -> Result<BlobRef, ObjectStoreError> {
        let blob = BlobRef::for_content(&content);
        self.blobs.write().insert(blob, content);
        Ok(blob)
    }

    async fn contains(&self, blob: &BlobRef) -> Result<bool, ObjectStoreError> {
        Ok(self.blobs.read().contains_key(blob))
    }
}

/// What the service could learn about a claim's blob
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobStatus {
    /// Present in the object store
    Available,
    /// Not in the object store
    Missing,
    /// The object store did not answer in time or failed
    Unavailable,
}

/// Acknowledgement of a submitted claim
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimReceipt {
    /// Claim id
    pub claim_id: ClaimId,
    /// State after submission (always Pending)
    pub state: AttestationState,
    /// When the claim expires without quorum
    pub deadline: Timestamp,
    /// Blob check result, when the claim references one
    pub blob: Option<BlobStatus>,
}

/// Final verdict of a claim
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimVerdict {
    /// Attestation state
    pub state: AttestationState,
    /// Ledger outcome; `None` for expired claims
    pub outcome: Option<ClaimOutcome>,
}

/// Service errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Claim failed validation
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Attestation refused
    #[error(transparent)]
    Attestation(#[from] AttestationError),
    /// Ledger refused
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// Batching task unavailable
    #[error(transparent)]
    Batch(#[from] BatchError),
    /// Subscription refused
    #[error(transparent)]
    Events(#[from] EventError),
    /// Object store failure
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
    /// Object store did not answer in time
    #[error("object store timed out after {0:?}")]
    ExternalStoreTimeout(Duration),
    /// Request signature does not verify
    #[error("invalid request signature")]
    InvalidSignature,
    /// Claim id never seen
    #[error("unknown claim {0}")]
    UnknownClaim(ClaimId),
}

/// Service settings
#[derive(Clone, Debug)]
pub struct ServiceSettings {
    /// Claim bounds
    pub validation: ValidationConfig,
    /// Batching
    pub batch: BatchConfig,
    /// Object store call deadline
    pub store_timeout: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            validation: ValidationConfig::default(),
            batch: BatchConfig::default(),
            store_timeout: Duration::from_secs(5),
        }
    }
}

/// Background tasks owned by a running service
pub struct ServiceTasks {
    /// Batching task
    pub batcher: JoinHandle<()>,
    /// Settlement task
    pub settlements: JoinHandle<()>,
}

/// The activity service
pub struct ActivityService {
    validation: ValidationConfig,
    verifier: Mutex<AttestationVerifier>,
    verdicts: Notify,
    ledger: Arc<Ledger>,
    batches: BatchHandle,
    objects: Option<Arc<dyn ObjectStore>>,
    store_timeout: Duration,
}

impl ActivityService {
    /// Start the service and its background tasks
    #[must_use]
    pub fn start(
        ledger: Arc<Ledger>,
        verifier: AttestationVerifier,
        objects: Option<Arc<dyn ObjectStore>>,
        settings: ServiceSettings,
    ) -> (Arc<Self>, ServiceTasks) {
        let (settle_tx, settle_rx) = mpsc::channel(settings.batch.mailbox_capacity.max(1));
        let (batches, batcher) = spawn_batcher(Arc::clone(&ledger), &settings.batch, settle_tx);

        let service = Arc::new(Self {
            validation: settings.validation,
            verifier: Mutex::new(verifier),
            verdicts: Notify::new(),
            ledger,
            batches,
            objects,
            store_timeout: settings.store_timeout,
        });
        let settlements = tokio::spawn(Self::settle_loop(Arc::downgrade(&service), settle_rx));

        (service, ServiceTasks { batcher, settlements })
    }

    async fn settle_loop(service: Weak<Self>, mut rx: mpsc::Receiver<Settlement>) {
        while let Some(settlement) = rx.recv().await {
            let Some(service) = service.upgrade() else {
                break;
            };
            service.settle(&[settlement]).await;
        }
        debug!("settlement loop stopped");
    }

    async fn settle(&self, settlements: &[Settlement]) {
        if settlements.is_empty() {
            return;
        }
        let mut verifier = self.verifier.lock().await;
        for settlement in settlements {
            verifier.settle(&settlement.claim, settlement.outcome.clone());
        }
        drop(verifier);
        self.verdicts.notify_waiters();
    }

    /// The ledger
    #[must_use]
    pub const fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Validate a claim and open its attestation
    ///
    /// # Errors
    /// Validation errors, or `DuplicateClaim` for a known or committed hash
    pub async fn submit_claim(&self, submission: ClaimSubmission) -> Result<ClaimReceipt, ServiceError> {
        let now = now_millis();
        let claim = validate_claim(&submission, &self.validation, now)?;
        let claim_id = claim.id();
        if self.ledger.contains_claim(&claim_id) {
            return Err(LedgerError::DuplicateClaim(claim_id).into());
        }

        let blob = match claim.blob {
            Some(blob) => Some(self.check_blob(&blob).await),
            None => None,
        };

        let deadline = self.verifier.lock().await.open(claim, now)?;
        info!(claim = %claim_id, deadline, ?blob, "claim submitted");
        Ok(ClaimReceipt {
            claim_id,
            state: AttestationState::Pending,
            deadline,
            blob,
        })
    }

    /// Record a witness verdict; a claim reaching quorum is queued for the ledger
    ///
    /// # Errors
    /// Attestation errors, or `Batch` if the batching task has stopped
    pub async fn attest(
        &self,
        claim_id: &ClaimId,
        witness: &PublicKey,
        verdict: WitnessVerdict,
        signature: &Signature,
    ) -> Result<AttestationState, ServiceError> {
        let mut verifier = self.verifier.lock().await;
        let state = verifier.attest(claim_id, witness, verdict, signature, now_millis())?;
        let verified = verifier.take_verified(claim_id);
        drop(verifier);

        if let Some(verified) = verified {
            self.batches.submit(verified).await?;
        }
        if state.is_terminal() {
            self.verdicts.notify_waiters();
        }
        Ok(state)
    }

    /// Owner withdrawal of a pending claim
    ///
    /// # Errors
    /// Attestation errors (unknown claim, bad signature, not pending)
    pub async fn withdraw_claim(&self, claim_id: &ClaimId, owner_signature: &Signature) -> Result<(), ServiceError> {
        self.verifier
            .lock()
            .await
            .withdraw(claim_id, owner_signature, now_millis())?;
        self.verdicts.notify_waiters();
        Ok(())
    }

    /// Current attestation state of a claim
    pub async fn claim_state(&self, claim_id: &ClaimId) -> Option<AttestationState> {
        self.verifier.lock().await.state(claim_id)
    }

    /// Expire every pending claim past its deadline
    pub async fn sweep_expired(&self) -> Vec<ClaimId> {
        let expired = self.verifier.lock().await.expire_due(now_millis());
        if !expired.is_empty() {
            self.verdicts.notify_waiters();
        }
        expired
    }

    /// Wait until a claim is committed, rejected or expired.
    ///
    /// A pending claim is waited on at most until its deadline, after which
    /// it is expired.
    ///
    /// # Errors
    /// `UnknownClaim` if the claim was never submitted
    pub async fn await_verdict(&self, claim_id: &ClaimId) -> Result<ClaimVerdict, ServiceError> {
        loop {
            let notified = self.verdicts.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let poll = poll_verdict(&mut *self.verifier.lock().await, claim_id, now_millis())?;
            match poll {
                VerdictPoll::Ready(verdict) => return Ok(verdict),
                VerdictPoll::Wait(wait) => {
                    let _ = tokio::time::timeout(wait, notified).await;
                }
            }
        }
    }

    /// Apply everything queued now and settle the results
    ///
    /// # Errors
    /// `Batch` if the batching task has stopped
    pub async fn flush(&self) -> Result<Vec<Settlement>, ServiceError> {
        let settled = self.batches.flush().await?;
        self.settle(&settled).await;
        Ok(settled)
    }

    /// Account state
    #[must_use]
    pub fn account(&self, address: &Address) -> Option<Account> {
        self.ledger.account(address)
    }

    /// Stake position
    #[must_use]
    pub fn stake_position(&self, address: &Address) -> Option<Stake> {
        self.ledger.stake_position(address)
    }

    /// Activity history page
    #[must_use]
    pub fn history(&self, address: &Address, cursor: Option<HistoryCursor>, limit: usize) -> HistoryPage {
        self.ledger.history(address, cursor, limit)
    }

    /// Lock part of the owner's balance.
    ///
    /// `signature` is the owner's signature over
    /// [`stake_signing_bytes`] with the account's current nonce.
    ///
    /// # Errors
    /// `InvalidSignature`, or the ledger's staking errors
    pub fn stake(&self, owner: &PublicKey, amount: StrideAmount, signature: &Signature) -> Result<LedgerEntry, ServiceError> {
        let (address, nonce) = self.authorize(StakeAction::Lock, owner, amount, signature)?;
        Ok(self.ledger.stake(address, amount, Some(nonce), now_millis())?)
    }

    /// Withdraw part of an expired stake; signed like [`ActivityService::stake`]
    ///
    /// # Errors
    /// `InvalidSignature`, or the ledger's staking errors
    pub fn withdraw_stake(
        &self,
        owner: &PublicKey,
        amount: StrideAmount,
        signature: &Signature,
    ) -> Result<LedgerEntry, ServiceError> {
        let (address, nonce) = self.authorize(StakeAction::Release, owner, amount, signature)?;
        Ok(self.ledger.withdraw_stake(address, amount, Some(nonce), now_millis())?)
    }

    fn authorize(
        &self,
        action: StakeAction,
        owner: &PublicKey,
        amount: StrideAmount,
        signature: &Signature,
    ) -> Result<(Address, u64), ServiceError> {
        let address = Address::from_public_key(owner);
        let nonce = self.ledger.account(&address).map_or(0, |a| a.nonce);
        verify(owner, &stake_signing_bytes(action, &address, amount, nonce), signature)
            .map_err(|_| ServiceError::InvalidSignature)?;
        Ok((address, nonce))
    }

    /// Apply an authority-signed fraud proof
    ///
    /// # Errors
    /// The ledger's slashing errors
    pub fn slash(&self, proof: &FraudProof) -> Result<LedgerEntry, ServiceError> {
        Ok(self.ledger.slash(proof, now_millis())?)
    }

    /// Subscribe to ledger events
    ///
    /// # Errors
    /// Unknown entry hash or offset out of range
    pub fn subscribe(&self, cursor: EventCursor) -> Result<EventSubscription, ServiceError> {
        Ok(self.ledger.events().subscribe(cursor)?)
    }

    /// Upload a blob to the object store
    ///
    /// # Errors
    /// `ExternalStoreTimeout` past the configured deadline, or the store's error
    pub async fn put_blob(&self, content: Vec<u8>) -> Result<BlobRef, ServiceError> {
        let Some(objects) = &self.objects else {
            return Err(ObjectStoreError::Backend("no object store configured".into()).into());
        };
        match tokio::time::timeout(self.store_timeout, objects.put(content)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ServiceError::ExternalStoreTimeout(self.store_timeout)),
        }
    }

    async fn check_blob(&self, blob: &BlobRef) -> BlobStatus {
        let Some(objects) = &self.objects else {
            return BlobStatus::Unavailable;
        };
        match tokio::time::timeout(self.store_timeout, objects.contains(blob)).await {
            Ok(Ok(true)) => BlobStatus::Available,
            Ok(Ok(false)) => BlobStatus::Missing,
            Ok(Err(e)) => {
                warn!(?blob, error = %e, "object store failed");
                BlobStatus::Unavailable
            }
            Err(_) => {
                warn!(?blob, timeout = ?self.store_timeout, "object store timed out");
                BlobStatus::Unavailable
            }
        }
    }

    /// Flush the batching task and stop it
    pub async fn shutdown(&self) {
        if let Err(e) = self.flush().await {
            debug!(error = %e, "final flush skipped");
        }
        self.batches.shutdown().await;
    }
}

enum VerdictPoll {
    Ready(ClaimVerdict),
    Wait(Duration),
}

fn poll_verdict(
    verifier: &mut AttestationVerifier,
    claim_id: &ClaimId,
    now: Timestamp,
) -> Result<VerdictPoll, ServiceError> {
    let state = verifier
        .state(claim_id)
        .ok_or(ServiceError::UnknownClaim(*claim_id))?;
    if let Some(outcome) = verifier.outcome(claim_id) {
        return Ok(VerdictPoll::Ready(ClaimVerdict {
            state,
            outcome: Some(outcome.clone()),
        }));
    }

    let deadline = verifier.get(claim_id).map(|a| a.deadline);
    match (state, deadline) {
        (AttestationState::Pending, Some(deadline)) if now < deadline => Ok(VerdictPoll::Wait(Duration::from_millis(
            u64::try_from(deadline - now).unwrap_or(0),
        ))),
        (AttestationState::Pending, _) => {
            verifier.expire_due(now);
            Ok(VerdictPoll::Ready(ClaimVerdict {
                state: AttestationState::Expired,
                outcome: None,
            }))
        }
        (AttestationState::Expired, _) => Ok(VerdictPoll::Ready(ClaimVerdict { state, outcome: None })),
        _ => Ok(VerdictPoll::Wait(SETTLEMENT_POLL)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::{AttestationConfig, WitnessRegistry};
    use crate::crypto::Keypair;
    use crate::ledger::{BatchPolicy, LedgerConfig};
    use crate::rewards::{MintCapability, RewardEngine, RewardSchedule};
    use crate::staking::{StakeManager, StakingConfig};

    struct StalledStore;

    #[async_trait]
    impl ObjectStore for StalledStore {
        async fn put(&self, _content: Vec<u8>) -> Result<BlobRef, ObjectStoreError> {
            std::future::pending().await
        }

        async fn contains(&self, _blob: &BlobRef) -> Result<bool, ObjectStoreError> {
            std::future::pending().await
        }
    }

    fn start(objects: Option<Arc<dyn ObjectStore>>) -> Arc<ActivityService> {
        let authority = Keypair::generate();
        let key = *authority.public_key();
        let ledger = Ledger::new(
            LedgerConfig::new(BatchPolicy::Strict),
            RewardEngine::new(RewardSchedule::default(), key),
            StakeManager::new(StakingConfig::default(), key),
            MintCapability::grant(&authority, &key).unwrap(),
        )
        .unwrap();
        let verifier = AttestationVerifier::new(AttestationConfig::default(), WitnessRegistry::new());
        let settings = ServiceSettings {
            store_timeout: Duration::from_millis(20),
            ..ServiceSettings::default()
        };
        ActivityService::start(Arc::new(ledger), verifier, objects, settings).0
    }

    fn submission(blob: Option<BlobRef>) -> ClaimSubmission {
        ClaimSubmission::signed(&Keypair::generate(), 2_000, 900, now_millis() - 1_000, blob)
    }

    #[tokio::test]
    async fn test_blob_status_reflects_store() {
        let store = Arc::new(MemoryObjectStore::new());
        let service = start(Some(store));

        let stored = service.put_blob(b"gps trace".to_vec()).await.unwrap();
        let receipt = service.submit_claim(submission(Some(stored))).await.unwrap();
        assert_eq!(receipt.blob, Some(BlobStatus::Available));
        assert_eq!(receipt.state, AttestationState::Pending);

        let absent = BlobRef::for_content(b"never uploaded");
        let receipt = service.submit_claim(submission(Some(absent))).await.unwrap();
        assert_eq!(receipt.blob, Some(BlobStatus::Missing));

        let receipt = service.submit_claim(submission(None)).await.unwrap();
        assert_eq!(receipt.blob, None);
    }

    #[tokio::test]
    async fn test_stalled_store_does_not_block_claims() {
        let service = start(Some(Arc::new(StalledStore)));

        let blob = BlobRef::for_content(b"trace");
        let receipt = service.submit_claim(submission(Some(blob))).await.unwrap();
        assert_eq!(receipt.blob, Some(BlobStatus::Unavailable));
        assert_eq!(
            service.claim_state(&receipt.claim_id).await,
            Some(AttestationState::Pending)
        );

        let err = service.put_blob(b"trace".to_vec()).await.unwrap_err();
        assert!(matches!(err, ServiceError::ExternalStoreTimeout(_)));
    }

    #[tokio::test]
    async fn test_resubmission_is_duplicate() {
        let service = start(None);
        let claim = submission(None);
        service.submit_claim(claim.clone()).await.unwrap();
        assert!(matches!(
            service.submit_claim(claim).await,
            Err(ServiceError::Attestation(AttestationError::DuplicateClaim(_)))
        ));
    }

    #[tokio::test]
    async fn test_unknown_claim_verdict() {
        let service = start(None);
        let id = crate::crypto::hash_data(b"nobody");
        assert!(matches!(
            service.await_verdict(&id).await,
            Err(ServiceError::UnknownClaim(_))
        ));
    }
}
