//! Batch processor: groups verified claims into ledger batches.
//!
//! Claims are queued FIFO and cut into batches of at most `max_batch_size`.
//! The processor never reorders and never validates; the ledger decides what
//! commits. When a strict batch aborts, the offending claim is settled as
//! rejected and the rest go back to the front of the queue in their
//! original order.
//!
//! ```text
//!   BatchHandle ──mpsc──▶ Batcher task ──size or interval──▶ Ledger::apply_batch
//!                                              │
//!                                              └──▶ settlements (mpsc)
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

use crate::attestation::{ClaimOutcome, RejectionReason, VerifiedClaim};
use crate::ledger::{ClaimResult, Ledger, LedgerError};
use crate::types::{now_millis, ClaimId, Timestamp};

/// Batching configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Most claims per batch
    pub max_batch_size: usize,
    /// Flush a partial batch after this long (ms)
    pub flush_interval_ms: u64,
    /// Mailbox capacity of the batching task
    pub mailbox_capacity: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 256,
            flush_interval_ms: 500,
            mailbox_capacity: 4_096,
        }
    }
}

/// An ordered group of verified claims applied atomically
#[derive(Clone, Debug)]
pub struct Batch {
    sequence: u64,
    claims: Vec<VerifiedClaim>,
}

impl Batch {
    /// Create a batch
    #[must_use]
    pub const fn new(sequence: u64, claims: Vec<VerifiedClaim>) -> Self {
        Self { sequence, claims }
    }

    /// Sequence number
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Claims in queue order
    #[must_use]
    pub fn claims(&self) -> &[VerifiedClaim] {
        &self.claims
    }

    /// Number of claims
    #[must_use]
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    /// Whether the batch is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

/// What became of a claim handed to the ledger
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settlement {
    /// Claim id
    pub claim: ClaimId,
    /// Final outcome
    pub outcome: ClaimOutcome,
}

impl Settlement {
    fn rejected(claim: ClaimId, error: &LedgerError) -> Self {
        Self {
            claim,
            outcome: ClaimOutcome::Rejected(RejectionReason::Ledger(error.to_string())),
        }
    }
}

/// FIFO queue of verified claims
#[derive(Debug)]
pub struct BatchProcessor {
    queue: VecDeque<VerifiedClaim>,
    max_batch_size: usize,
    next_sequence: u64,
}

impl BatchProcessor {
    /// Create an empty processor
    #[must_use]
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            queue: VecDeque::new(),
            max_batch_size: config.max_batch_size.max(1),
            next_sequence: 0,
        }
    }

    /// Queue a verified claim
    pub fn enqueue(&mut self, claim: VerifiedClaim) {
        self.queue.push_back(claim);
    }

    /// Claims waiting
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is waiting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Whether a full batch is waiting
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.max_batch_size
    }

    /// Cut the next batch, up to `max_batch_size` claims in queue order
    pub fn cut(&mut self) -> Option<Batch> {
        if self.queue.is_empty() {
            return None;
        }
        let take = self.queue.len().min(self.max_batch_size);
        let claims: Vec<_> = self.queue.drain(..take).collect();
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Some(Batch::new(sequence, claims))
    }

    /// Put claims back at the head of the queue, keeping their order
    pub fn requeue_front(&mut self, claims: Vec<VerifiedClaim>) {
        for claim in claims.into_iter().rev() {
            self.queue.push_front(claim);
        }
    }

    /// Cut one batch and apply it.
    ///
    /// Returns the settlements of every claim that reached a final outcome.
    /// Claims that were only collateral to an aborted batch are requeued.
    pub fn process(&mut self, ledger: &Ledger, now: Timestamp) -> Vec<Settlement> {
        let Some(batch) = self.cut() else {
            return Vec::new();
        };

        match ledger.apply_batch(&batch, now) {
            Ok(report) => report
                .results
                .into_iter()
                .map(|result| match result {
                    ClaimResult::Committed { claim, entry_hash, .. } => Settlement {
                        claim,
                        outcome: ClaimOutcome::Committed { entry_hash },
                    },
                    ClaimResult::Rejected { claim, error } => Settlement::rejected(claim, &error),
                })
                .collect(),
            Err(LedgerError::BatchAborted { claim, reason }) => {
                let rest: Vec<_> = batch
                    .claims
                    .into_iter()
                    .filter(|c| c.claim().claim_hash != claim)
                    .collect();
                debug!(requeued = rest.len(), "requeueing claims of aborted batch");
                self.requeue_front(rest);
                vec![Settlement::rejected(claim, &reason)]
            }
            Err(e) => {
                error!(sequence = batch.sequence, error = %e, "batch failed, requeueing");
                self.requeue_front(batch.claims);
                Vec::new()
            }
        }
    }
}

/// Messages accepted by the batching task
pub enum BatchMessage {
    /// Queue a verified claim
    Submit(Box<VerifiedClaim>),
    /// Apply everything queued now and return the settlements
    Flush(oneshot::Sender<Vec<Settlement>>),
    /// Flush and stop
    Shutdown,
}

/// Batching task errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    /// The batching task has stopped
    #[error("batcher stopped")]
    Closed,
}

/// Cloneable handle to the batching task
#[derive(Clone, Debug)]
pub struct BatchHandle {
    sender: mpsc::Sender<BatchMessage>,
}

impl BatchHandle {
    /// Queue a verified claim
    ///
    /// # Errors
    /// `Closed` if the task has stopped
    pub async fn submit(&self, claim: VerifiedClaim) -> Result<(), BatchError> {
        self.sender
            .send(BatchMessage::Submit(Box::new(claim)))
            .await
            .map_err(|_| BatchError::Closed)
    }

    /// Apply everything queued and wait for the settlements
    ///
    /// # Errors
    /// `Closed` if the task has stopped
    pub async fn flush(&self) -> Result<Vec<Settlement>, BatchError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(BatchMessage::Flush(tx))
            .await
            .map_err(|_| BatchError::Closed)?;
        rx.await.map_err(|_| BatchError::Closed)
    }

    /// Stop the task after a final flush
    pub async fn shutdown(&self) {
        let _ = self.sender.send(BatchMessage::Shutdown).await;
    }
}

/// The batching task
pub struct Batcher {
    processor: BatchProcessor,
    ledger: Arc<Ledger>,
    mailbox: mpsc::Receiver<BatchMessage>,
    settlements: mpsc::Sender<Settlement>,
    flush_interval: Duration,
}

impl Batcher {
    /// Run until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        let mut timer = interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(msg) = self.mailbox.recv() => match msg {
                    BatchMessage::Submit(claim) => {
                        self.processor.enqueue(*claim);
                        if self.processor.is_full() {
                            self.process_one().await;
                        }
                    }
                    BatchMessage::Flush(response) => {
                        let settled = self.drain().await;
                        let _ = response.send(settled);
                    }
                    BatchMessage::Shutdown => {
                        self.drain().await;
                        break;
                    }
                },
                _ = timer.tick(), if !self.processor.is_empty() => {
                    self.process_one().await;
                }
                else => {
                    self.drain().await;
                    break;
                }
            }
        }
        debug!("batcher stopped");
    }

    async fn process_one(&mut self) -> Vec<Settlement> {
        let settled = self.processor.process(&self.ledger, now_millis());
        for settlement in &settled {
            if self.settlements.send(settlement.clone()).await.is_err() {
                warn!(claim = %settlement.claim, "settlement receiver dropped");
            }
        }
        settled
    }

    async fn drain(&mut self) -> Vec<Settlement> {
        let mut settled = Vec::new();
        while !self.processor.is_empty() {
            let before = self.processor.len();
            settled.extend(self.process_one().await);
            // A failing store requeues everything; stop instead of spinning
            if self.processor.len() >= before {
                break;
            }
        }
        settled
    }
}

/// Spawn the batching task for `ledger`; settlements are sent to `settlements`
#[must_use]
pub fn spawn_batcher(
    ledger: Arc<Ledger>,
    config: &BatchConfig,
    settlements: mpsc::Sender<Settlement>,
) -> (BatchHandle, JoinHandle<()>) {
    let (sender, mailbox) = mpsc::channel(config.mailbox_capacity.max(1));
    let batcher = Batcher {
        processor: BatchProcessor::new(config),
        ledger,
        mailbox,
        settlements,
        flush_interval: Duration::from_millis(config.flush_interval_ms.max(1)),
    };
    (BatchHandle { sender }, tokio::spawn(batcher.run()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::{
        attestation_signing_bytes, AttestationConfig, AttestationVerifier, QuorumPolicy, WitnessRegistry,
        WitnessVerdict,
    };
    use crate::crypto::Keypair;
    use crate::ledger::{BatchPolicy, LedgerConfig};
    use crate::rewards::{MintCapability, RewardEngine, RewardSchedule};
    use crate::staking::{StakeManager, StakingConfig};
    use crate::types::ClaimSubmission;
    use crate::validator::{validate_claim, ValidationConfig};

    const NOW: Timestamp = 1_700_000_000_000;

    fn ledger(policy: BatchPolicy) -> Ledger {
        let authority = Keypair::generate();
        let key = *authority.public_key();
        Ledger::new(
            LedgerConfig::new(policy),
            RewardEngine::new(RewardSchedule::default(), key),
            StakeManager::new(StakingConfig::default(), key),
            MintCapability::grant(&authority, &key).unwrap(),
        )
        .unwrap()
    }

    fn verified(owners: &[(&Keypair, Timestamp)]) -> Vec<VerifiedClaim> {
        let witness = Keypair::generate();
        let mut registry = WitnessRegistry::new();
        registry.register(*witness.public_key(), 1);
        let mut verifier = AttestationVerifier::new(
            AttestationConfig {
                quorum: QuorumPolicy::Count { threshold: 1 },
                deadline_ms: 60_000,
            },
            registry,
        );

        owners
            .iter()
            .map(|(owner, claimed_at)| {
                let submission = ClaimSubmission::signed(owner, 1_000, 600, *claimed_at, None);
                let claim = validate_claim(&submission, &ValidationConfig::default(), NOW).unwrap();
                let id = claim.id();
                verifier.open(claim, NOW).unwrap();
                let sig = witness.sign(&attestation_signing_bytes(&id, witness.public_key(), WitnessVerdict::Confirm));
                verifier
                    .attest(&id, witness.public_key(), WitnessVerdict::Confirm, &sig, NOW)
                    .unwrap();
                verifier.take_verified(&id).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_cut_is_fifo_and_bounded() {
        let owner = Keypair::generate();
        let claims = verified(&[(&owner, NOW - 3), (&owner, NOW - 2), (&owner, NOW - 1)]);
        let ids: Vec<_> = claims.iter().map(|c| c.claim().id()).collect();

        let mut processor = BatchProcessor::new(&BatchConfig {
            max_batch_size: 2,
            ..BatchConfig::default()
        });
        for claim in claims {
            processor.enqueue(claim);
        }
        assert!(processor.is_full());

        let first = processor.cut().unwrap();
        assert_eq!(first.sequence(), 0);
        assert_eq!(
            first.claims().iter().map(|c| c.claim().id()).collect::<Vec<_>>(),
            ids[..2]
        );
        let second = processor.cut().unwrap();
        assert_eq!(second.sequence(), 1);
        assert_eq!(second.len(), 1);
        assert!(processor.cut().is_none());
    }

    #[test]
    fn test_strict_abort_requeues_innocent_claims() {
        let ledger = ledger(BatchPolicy::Strict);
        let owner = Keypair::generate();
        let other = Keypair::generate();
        let claims = verified(&[(&owner, NOW - 1_000), (&owner, NOW - 5_000), (&other, NOW - 500)]);
        let late = claims[0].clone();
        let stale = claims[1].claim().id();

        let mut processor = BatchProcessor::new(&BatchConfig::default());
        processor.enqueue(late);
        assert_eq!(processor.process(&ledger, NOW).len(), 1);

        processor.enqueue(claims[1].clone());
        processor.enqueue(claims[2].clone());
        let settled = processor.process(&ledger, NOW);
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].claim, stale);
        assert!(matches!(settled[0].outcome, ClaimOutcome::Rejected(RejectionReason::Ledger(_))));
        assert_eq!(processor.len(), 1);

        let settled = processor.process(&ledger, NOW);
        assert!(matches!(settled[0].outcome, ClaimOutcome::Committed { .. }));
        assert_eq!(ledger.len(), 2);
    }

    #[tokio::test]
    async fn test_batcher_flush_settles_everything() {
        let ledger = Arc::new(ledger(BatchPolicy::BestEffort));
        let owner = Keypair::generate();
        let claims = verified(&[(&owner, NOW - 2), (&owner, NOW - 1)]);

        let (tx, mut rx) = mpsc::channel(16);
        let (handle, task) = spawn_batcher(Arc::clone(&ledger), &BatchConfig::default(), tx);
        for claim in claims {
            handle.submit(claim).await.unwrap();
        }
        let settled = handle.flush().await.unwrap();
        assert_eq!(settled.len(), 2);
        assert_eq!(rx.recv().await.unwrap(), settled[0]);
        assert_eq!(ledger.len(), 2);

        handle.shutdown().await;
        task.await.unwrap();
        assert_eq!(handle.submit(verified(&[(&owner, NOW)]).remove(0)).await, Err(BatchError::Closed));
    }
}
