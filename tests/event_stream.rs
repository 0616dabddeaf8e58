//! Subscribing to ledger events from offsets, entry hashes and the tip.

mod common;

use std::time::Duration;

use common::{address_of, batch, fixture, Witnesses, NOW};
use stridechain::crypto::{hash_data, Keypair};
use stridechain::events::{EventCursor, EventError, EventKind};
use stridechain::ledger::{BatchPolicy, LedgerError};
use stridechain::types::StrideAmount;

#[test]
fn test_events_follow_chain_order() {
    let f = fixture(BatchPolicy::Strict);
    let mut witnesses = Witnesses::new(2);
    let runner = Keypair::generate();
    let address = address_of(&runner);

    f.ledger
        .allocate_genesis(&[(address, StrideAmount::from_strd(50))], NOW)
        .unwrap();
    let claim = witnesses.claim(&runner, 5_000, 1_800, NOW - 1_000);
    f.ledger.apply_batch(&batch(1, vec![claim]), NOW).unwrap();
    f.ledger.stake(address, StrideAmount::from_strd(20), None, NOW).unwrap();

    let mut sub = f.ledger.subscribe(EventCursor::Start).unwrap();
    let names: Vec<_> = std::iter::from_fn(|| sub.try_next())
        .map(|e| e.kind.name())
        .collect();
    assert_eq!(names, vec!["ActivityRecorded", "RewardCredited", "Staked"]);

    let credited = f.ledger.events().get(1).unwrap();
    assert_eq!(credited.entry_index, 1);
    assert_eq!(credited.account, address);
    assert!(matches!(
        credited.kind,
        EventKind::RewardCredited { balance, .. } if balance == StrideAmount::from_decimal_str("55.3").unwrap()
    ));
}

#[test]
fn test_resume_after_entry_hash() {
    let f = fixture(BatchPolicy::Strict);
    let mut witnesses = Witnesses::new(1);
    let runner = Keypair::generate();

    let claims = vec![
        witnesses.claim(&runner, 1_000, 300, NOW - 3_000),
        witnesses.claim(&runner, 2_000, 600, NOW - 2_000),
        witnesses.claim(&runner, 3_000, 900, NOW - 1_000),
    ];
    f.ledger.apply_batch(&batch(1, claims), NOW).unwrap();

    let first = f.ledger.entry(0).unwrap();
    let mut sub = f.ledger.subscribe(EventCursor::AfterEntry(first.hash)).unwrap();
    let resumed = sub.try_next().unwrap();
    assert_eq!(resumed.entry_index, 1);
    assert_eq!(resumed.offset, 2);

    let mut from_offset = f.ledger.subscribe(EventCursor::Offset(4)).unwrap();
    assert_eq!(from_offset.try_next().unwrap().entry_index, 2);

    let mut tip = f.ledger.subscribe(EventCursor::Tip).unwrap();
    assert!(tip.try_next().is_none());
    assert_eq!(tip.position(), 6);
}

#[test]
fn test_bad_cursors_are_refused() {
    let f = fixture(BatchPolicy::Strict);
    assert!(matches!(
        f.ledger.subscribe(EventCursor::AfterEntry(hash_data(b"never committed"))),
        Err(LedgerError::Events(EventError::UnknownEntry(_)))
    ));
    assert!(matches!(
        f.ledger.subscribe(EventCursor::Offset(10)),
        Err(LedgerError::Events(EventError::OffsetOutOfRange { .. }))
    ));
}

#[tokio::test]
async fn test_live_subscriber_sees_new_commits() {
    let f = fixture(BatchPolicy::Strict);
    let mut witnesses = Witnesses::new(1);
    let runner = Keypair::generate();
    let mut sub = f.ledger.subscribe(EventCursor::Tip).unwrap();

    let claim = witnesses.claim(&runner, 4_200, 1_500, NOW - 1_000);
    f.ledger.apply_batch(&batch(1, vec![claim.clone()]), NOW).unwrap();

    let recorded = tokio::time::timeout(Duration::from_secs(1), sub.next())
        .await
        .unwrap()
        .unwrap();
    match recorded.kind {
        EventKind::ActivityRecorded { claim_hash, distance_m, .. } => {
            assert_eq!(claim_hash, claim.claim().id());
            assert_eq!(distance_m, 4_200);
        }
        other => panic!("unexpected event {other:?}"),
    }
    let credited = sub.next().await.unwrap();
    assert_eq!(credited.offset, 1);
    assert_eq!(credited.entry_hash, recorded.entry_hash);
}
