//! Append-only ledger event stream.
//!
//! Every committed entry publishes its events here, in chain order, each with
//! a dense offset. Subscribers start from an offset or from the entry hash
//! they last processed, replay the backlog, then follow live events.
//! Delivery is at-least-once across reconnects; consumers dedupe on
//! `entry_hash` (plus event kind).

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::crypto::Hash;
use crate::ledger::{EntryKind, LedgerEntry};
use crate::types::{Address, StrideAmount, Timestamp};

/// Event payloads
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// An activity claim was committed
    ActivityRecorded {
        /// Committed claim hash
        claim_hash: Hash,
        /// Distance in meters
        distance_m: u64,
        /// Duration in seconds
        duration_s: u64,
        /// When the activity happened
        claimed_at: Timestamp,
    },
    /// A reward was credited for a committed claim
    RewardCredited {
        /// Credited amount
        amount: StrideAmount,
        /// Balance afterwards
        balance: StrideAmount,
    },
    /// Balance was locked into stake
    Staked {
        /// Newly locked amount
        amount: StrideAmount,
        /// Total staked afterwards
        staked: StrideAmount,
        /// Lock expiry
        lock_expiry: Timestamp,
    },
    /// Stake was withdrawn
    Released {
        /// Released amount
        amount: StrideAmount,
        /// Total staked afterwards
        staked: StrideAmount,
    },
    /// Stake was burned
    Slashed {
        /// Burned amount
        amount: StrideAmount,
        /// Applied fraud proof
        proof_id: Hash,
        /// Balance afterwards
        balance: StrideAmount,
    },
}

impl EventKind {
    /// Event name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ActivityRecorded { .. } => "ActivityRecorded",
            Self::RewardCredited { .. } => "RewardCredited",
            Self::Staked { .. } => "Staked",
            Self::Released { .. } => "Released",
            Self::Slashed { .. } => "Slashed",
        }
    }
}

/// A published ledger event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Position in the stream, starting at 0
    pub offset: u64,
    /// Entry that produced the event
    pub entry_hash: Hash,
    /// Index of that entry
    pub entry_index: u64,
    /// Affected account
    pub account: Address,
    /// Payload
    pub kind: EventKind,
}

/// Events for one entry, without offsets
#[must_use]
pub fn events_for(entry: &LedgerEntry) -> Vec<EventKind> {
    match &entry.kind {
        EntryKind::Genesis { .. } => Vec::new(),
        EntryKind::Activity { claim, reward, .. } => vec![
            EventKind::ActivityRecorded {
                claim_hash: claim.claim_hash,
                distance_m: claim.distance_m,
                duration_s: claim.duration_s,
                claimed_at: claim.claimed_at,
            },
            EventKind::RewardCredited {
                amount: *reward,
                balance: entry.post.balance,
            },
        ],
        EntryKind::Stake { amount, position } => vec![EventKind::Staked {
            amount: *amount,
            staked: entry.post.staked,
            lock_expiry: position.lock_expiry,
        }],
        EntryKind::Release { amount, .. } => vec![EventKind::Released {
            amount: *amount,
            staked: entry.post.staked,
        }],
        EntryKind::Slash { amount, proof_id, .. } => vec![EventKind::Slashed {
            amount: *amount,
            proof_id: *proof_id,
            balance: entry.post.balance,
        }],
    }
}

/// Where a subscription starts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventCursor {
    /// From the first event ever published
    Start,
    /// From this offset (inclusive)
    Offset(u64),
    /// From the first event after every event of this entry
    AfterEntry(Hash),
    /// Only events published from now on
    Tip,
}

/// Event stream errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    /// No event was produced by this entry
    #[error("no events for entry {0}")]
    UnknownEntry(Hash),
    /// Offset beyond the end of the stream
    #[error("offset {offset} is past the end of the stream ({len})")]
    OffsetOutOfRange {
        /// Requested offset
        offset: u64,
        /// Current stream length
        len: u64,
    },
}

/// The append-only event log
pub struct EventLog {
    events: RwLock<Vec<LedgerEvent>>,
    live: broadcast::Sender<LedgerEvent>,
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog").field("len", &self.len()).finish()
    }
}

impl EventLog {
    /// Create an empty log; `capacity` bounds how far a live subscriber may lag
    /// before it falls back to reading the backlog
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (live, _) = broadcast::channel(capacity.max(1));
        Self {
            events: RwLock::new(Vec::new()),
            live,
        }
    }

    /// Number of published events
    #[must_use]
    pub fn len(&self) -> u64 {
        self.events.read().len() as u64
    }

    /// Whether nothing was published yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Event at `offset`
    #[must_use]
    pub fn get(&self, offset: u64) -> Option<LedgerEvent> {
        let index = usize::try_from(offset).ok()?;
        self.events.read().get(index).cloned()
    }

    /// Up to `limit` events starting at `offset`
    #[must_use]
    pub fn read_from(&self, offset: u64, limit: usize) -> Vec<LedgerEvent> {
        let events = self.events.read();
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(events.len());
        events[start..].iter().take(limit).cloned().collect()
    }

    /// Publish the events of freshly committed entries, in order
    pub fn publish(&self, entries: &[LedgerEntry]) {
        let mut events = self.events.write();
        for entry in entries {
            for kind in events_for(entry) {
                let event = LedgerEvent {
                    offset: events.len() as u64,
                    entry_hash: entry.hash,
                    entry_index: entry.index,
                    account: entry.account,
                    kind,
                };
                events.push(event.clone());
                // No receivers is fine: the backlog keeps everything
                let _ = self.live.send(event);
            }
        }
    }

    /// Resolve a cursor to a starting offset
    ///
    /// # Errors
    /// `UnknownEntry` for a hash that produced no events, `OffsetOutOfRange`
    /// for an offset past the end of the stream.
    pub fn resolve(&self, cursor: EventCursor) -> Result<u64, EventError> {
        let events = self.events.read();
        let len = events.len() as u64;
        match cursor {
            EventCursor::Start => Ok(0),
            EventCursor::Tip => Ok(len),
            EventCursor::Offset(offset) if offset <= len => Ok(offset),
            EventCursor::Offset(offset) => Err(EventError::OffsetOutOfRange { offset, len }),
            EventCursor::AfterEntry(hash) => events
                .iter()
                .rposition(|e| e.entry_hash == hash)
                .map(|i| i as u64 + 1)
                .ok_or(EventError::UnknownEntry(hash)),
        }
    }

    /// Subscribe from `cursor`
    ///
    /// # Errors
    /// See [`EventLog::resolve`].
    pub fn subscribe(self: &Arc<Self>, cursor: EventCursor) -> Result<EventSubscription, EventError> {
        // Receiver first: anything published after this point reaches it, and
        // anything before is in the backlog. Overlap is skipped by offset.
        let live = self.live.subscribe();
        let next = self.resolve(cursor)?;
        Ok(EventSubscription {
            log: Arc::clone(self),
            next,
            live,
        })
    }
}

/// A cursor over the event stream
pub struct EventSubscription {
    log: Arc<EventLog>,
    next: u64,
    live: broadcast::Receiver<LedgerEvent>,
}

impl EventSubscription {
    /// Offset of the next event this subscription yields
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.next
    }

    /// Next event without waiting, if one is already published
    pub fn try_next(&mut self) -> Option<LedgerEvent> {
        let event = self.log.get(self.next)?;
        self.next += 1;
        Some(event)
    }

    /// Wait for the next event
    pub async fn next(&mut self) -> Option<LedgerEvent> {
        loop {
            if let Some(event) = self.try_next() {
                return Some(event);
            }
            match self.live.recv().await {
                Ok(event) if event.offset == self.next => {
                    self.next += 1;
                    return Some(event);
                }
                // Already seen, or ahead of us: re-read the backlog
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return self.try_next(),
            }
        }
    }
}
