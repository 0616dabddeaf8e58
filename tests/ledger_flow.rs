//! End-to-end ledger behaviour: rewards, duplicates, ordering, staking and slashing.

mod common;

use std::sync::Arc;
use std::thread;

use common::{address_of, batch, fixture, fixture_with, Witnesses, DAY_MS, NOW};
use stridechain::crypto::{hash_data, Keypair};
use stridechain::ledger::{BatchPolicy, ClaimResult, LedgerError};
use stridechain::staking::{FraudProof, StakeError, StakeState, StakingConfig};
use stridechain::types::StrideAmount;

fn strd(s: &str) -> StrideAmount {
    StrideAmount::from_decimal_str(s).unwrap()
}

#[test]
fn test_quorum_claim_credits_reward_once() {
    let f = fixture(BatchPolicy::Strict);
    let mut witnesses = Witnesses::new(2);
    let runner = Keypair::generate();
    let claim = witnesses.claim(&runner, 5_000, 1_800, NOW - 60_000);

    let report = f.ledger.apply_batch(&batch(1, vec![claim.clone()]), NOW).unwrap();
    assert_eq!(report.committed(), 1);
    match &report.results[0] {
        ClaimResult::Committed { reward, entry_index, .. } => {
            assert_eq!(*reward, strd("5.3"));
            assert_eq!(*entry_index, 0);
        }
        other => panic!("unexpected result {other:?}"),
    }

    let account = f.ledger.account(&address_of(&runner)).unwrap();
    assert_eq!(account.balance, strd("5.3"));
    assert_eq!(account.nonce, 1);
    assert!(f.ledger.contains_claim(&claim.claim().id()));

    let err = f.ledger.apply_batch(&batch(2, vec![claim]), NOW).unwrap_err();
    match err {
        LedgerError::BatchAborted { reason, .. } => {
            assert!(matches!(*reason, LedgerError::DuplicateClaim(_)));
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(f.ledger.account(&address_of(&runner)).unwrap().balance, strd("5.3"));
    assert_eq!(f.ledger.len(), 1);
    assert_eq!(f.ledger.supply().total_rewarded, strd("5.3"));
}

#[test]
fn test_staking_walkthrough() {
    let f = fixture(BatchPolicy::Strict);
    let holder = Keypair::generate();
    let address = address_of(&holder);
    f.ledger
        .allocate_genesis(&[(address, StrideAmount::from_strd(150))], NOW)
        .unwrap();

    f.ledger.stake(address, StrideAmount::from_strd(100), None, NOW).unwrap();
    assert_eq!(f.ledger.account(&address).unwrap().staked, StrideAmount::from_strd(100));

    let err = f
        .ledger
        .stake(address, StrideAmount::from_strd(60), None, NOW)
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Stake(StakeError::InsufficientBalance { .. })
    ));

    let early = f
        .ledger
        .withdraw_stake(address, StrideAmount::from_strd(100), None, NOW + 1)
        .unwrap_err();
    assert!(matches!(early, LedgerError::Stake(StakeError::StakeLocked { .. })));

    let expiry = NOW + StakingConfig::default().lock_period_ms;
    f.ledger
        .withdraw_stake(address, StrideAmount::from_strd(100), None, expiry)
        .unwrap();

    let account = f.ledger.account(&address).unwrap();
    assert_eq!(account.staked, StrideAmount::ZERO);
    assert_eq!(account.balance, StrideAmount::from_strd(150));
    assert_eq!(f.ledger.stake_position(&address).unwrap().state, StakeState::Released);
    assert_eq!(f.ledger.supply().total_staked, StrideAmount::ZERO);
}

#[test]
fn test_policies_on_out_of_order_claim() {
    for policy in [BatchPolicy::Strict, BatchPolicy::BestEffort] {
        let f = fixture(policy);
        let mut witnesses = Witnesses::new(2);
        let runner = Keypair::generate();

        let first = witnesses.claim(&runner, 3_000, 900, NOW - 10_000);
        f.ledger.apply_batch(&batch(1, vec![first]), NOW).unwrap();

        let stale = witnesses.claim(&runner, 1_000, 300, NOW - 50_000);
        let fresh = witnesses.claim(&runner, 2_000, 600, NOW - 1_000);
        let result = f.ledger.apply_batch(&batch(2, vec![fresh, stale]), NOW);

        match policy {
            BatchPolicy::Strict => {
                assert!(matches!(result, Err(LedgerError::BatchAborted { .. })));
                assert_eq!(f.ledger.len(), 1);
            }
            BatchPolicy::BestEffort => {
                let report = result.unwrap();
                assert_eq!(report.committed(), 1);
                assert_eq!(report.rejected(), 1);
                // Applied in claimed_at order, so the stale claim comes first
                assert!(matches!(
                    &report.results[0],
                    ClaimResult::Rejected {
                        error: LedgerError::OutOfOrder { .. },
                        ..
                    }
                ));
                assert_eq!(f.ledger.len(), 2);
            }
        }
        f.ledger.verify_chain().unwrap();
    }
}

#[test]
fn test_batch_is_sorted_by_claimed_at() {
    let f = fixture(BatchPolicy::Strict);
    let mut witnesses = Witnesses::new(1);
    let runner = Keypair::generate();

    let late = witnesses.claim(&runner, 1_000, 300, NOW - 1_000);
    let early = witnesses.claim(&runner, 1_000, 300, NOW - 9_000);
    f.ledger.apply_batch(&batch(1, vec![late, early]), NOW).unwrap();

    let times: Vec<_> = f
        .ledger
        .entries(0, 10)
        .iter()
        .filter_map(|e| e.claimed_at())
        .collect();
    assert_eq!(times, vec![NOW - 9_000, NOW - 1_000]);
}

#[test]
fn test_duplicate_within_batch_best_effort() {
    let f = fixture(BatchPolicy::BestEffort);
    let mut witnesses = Witnesses::new(2);
    let runner = Keypair::generate();
    let claim = witnesses.claim(&runner, 4_000, 1_200, NOW - 5_000);

    let report = f
        .ledger
        .apply_batch(&batch(1, vec![claim.clone(), claim]), NOW)
        .unwrap();
    assert_eq!(report.committed(), 1);
    assert!(matches!(
        &report.results[1],
        ClaimResult::Rejected {
            error: LedgerError::DuplicateClaim(_),
            ..
        }
    ));
    assert_eq!(f.ledger.account(&address_of(&runner)).unwrap().nonce, 1);
}

#[test]
fn test_slash_is_clamped_and_single_use() {
    let f = fixture(BatchPolicy::Strict);
    let cheat = Keypair::generate();
    let address = address_of(&cheat);
    f.ledger
        .allocate_genesis(&[(address, StrideAmount::from_strd(150))], NOW)
        .unwrap();
    f.ledger.stake(address, StrideAmount::from_strd(100), None, NOW).unwrap();

    let proof = FraudProof::issue(
        &f.authority,
        address,
        hash_data(b"fabricated run"),
        StrideAmount::from_strd(500),
        NOW,
    );
    let entry = f.ledger.slash(&proof, NOW + 1).unwrap();
    assert_eq!(entry.kind.label(), "slash");

    let account = f.ledger.account(&address).unwrap();
    assert_eq!(account.balance, StrideAmount::from_strd(50));
    assert_eq!(account.staked, StrideAmount::ZERO);
    assert_eq!(f.ledger.supply().total_slashed, StrideAmount::from_strd(100));
    assert_eq!(f.ledger.stake_position(&address).unwrap().state, StakeState::Slashed);

    assert!(matches!(
        f.ledger.slash(&proof, NOW + 2),
        Err(LedgerError::ProofAlreadyApplied(_))
    ));
}

#[test]
fn test_slash_requires_authority() {
    let f = fixture(BatchPolicy::Strict);
    let cheat = Keypair::generate();
    let address = address_of(&cheat);
    f.ledger
        .allocate_genesis(&[(address, StrideAmount::from_strd(10))], NOW)
        .unwrap();
    f.ledger.stake(address, StrideAmount::from_strd(10), None, NOW).unwrap();

    let impostor = Keypair::generate();
    let proof = FraudProof::issue(&impostor, address, hash_data(b"x"), StrideAmount::from_strd(10), NOW);
    assert!(matches!(
        f.ledger.slash(&proof, NOW),
        Err(LedgerError::Stake(StakeError::UnauthenticatedProof))
    ));
    assert_eq!(f.ledger.account(&address).unwrap().balance, StrideAmount::from_strd(10));
}

#[test]
fn test_restake_after_slash_starts_fresh() {
    let f = fixture_with(
        BatchPolicy::Strict,
        StakingConfig {
            lock_period_ms: DAY_MS,
            ..StakingConfig::default()
        },
    );
    let holder = Keypair::generate();
    let address = address_of(&holder);
    f.ledger
        .allocate_genesis(&[(address, StrideAmount::from_strd(100))], NOW)
        .unwrap();
    f.ledger.stake(address, StrideAmount::from_strd(40), None, NOW).unwrap();
    let proof = FraudProof::issue(&f.authority, address, hash_data(b"y"), StrideAmount::from_strd(10), NOW);
    f.ledger.slash(&proof, NOW).unwrap();

    // 10 burned, the other 30 released back to the available balance
    let account = f.ledger.account(&address).unwrap();
    assert_eq!(account.balance, StrideAmount::from_strd(90));
    assert_eq!(account.available(), StrideAmount::from_strd(90));

    f.ledger.stake(address, StrideAmount::from_strd(90), None, NOW + 1).unwrap();
    let stake = f.ledger.stake_position(&address).unwrap();
    assert_eq!(stake.state, StakeState::Locked);
    assert_eq!(stake.amount, StrideAmount::from_strd(90));
    f.ledger.verify_chain().unwrap();
}

#[test]
fn test_concurrent_commits_are_linearized() {
    let f = fixture(BatchPolicy::Strict);
    let ledger = Arc::new(f.ledger);
    let mut witnesses = Witnesses::new(1);
    let runner = Keypair::generate();

    // Same claimed_at everywhere so any interleaving is in order
    let claims: Vec<_> = (0..32)
        .map(|i| witnesses.claim(&runner, 1_000 + i, 600, NOW - 1_000))
        .collect();
    let expected: u128 = claims
        .iter()
        .map(|c| {
            ledger
                .rewards()
                .compute_reward(c.claim().distance_m, c.claim().duration_s)
                .unwrap()
                .raw()
        })
        .sum();

    let handles: Vec<_> = claims
        .chunks(4)
        .enumerate()
        .map(|(i, chunk)| {
            let ledger = Arc::clone(&ledger);
            let chunk = chunk.to_vec();
            thread::spawn(move || ledger.apply_batch(&batch(i as u64, chunk), NOW).unwrap())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let account = ledger.account(&address_of(&runner)).unwrap();
    assert_eq!(account.nonce, 32);
    assert_eq!(account.balance.raw(), expected);
    assert_eq!(ledger.len(), 32);
    let report = ledger.verify_chain().unwrap();
    assert_eq!(report.entries, 32);
    assert_eq!(report.tip, ledger.tip());
}

#[test]
fn test_same_claim_from_many_threads_commits_once() {
    let f = fixture(BatchPolicy::BestEffort);
    let ledger = Arc::new(f.ledger);
    let mut witnesses = Witnesses::new(2);
    let runner = Keypair::generate();
    let claim = witnesses.claim(&runner, 8_000, 2_400, NOW - 1_000);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let ledger = Arc::clone(&ledger);
            let claim = claim.clone();
            thread::spawn(move || ledger.apply_batch(&batch(i, vec![claim]), NOW).unwrap().committed())
        })
        .collect();
    let committed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(committed, 1);
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger.account(&address_of(&runner)).unwrap().nonce, 1);
}

#[test]
fn test_state_root_tracks_balances() {
    let f = fixture(BatchPolicy::Strict);
    let mut witnesses = Witnesses::new(1);
    let runner = Keypair::generate();
    let empty_root = f.ledger.state_root();

    let claim = witnesses.claim(&runner, 2_500, 700, NOW - 1_000);
    let report = f.ledger.apply_batch(&batch(1, vec![claim]), NOW).unwrap();

    assert_ne!(f.ledger.state_root(), empty_root);
    assert_eq!(report.tip, f.ledger.tip());
    assert_eq!(report.entries_root, f.ledger.entry(0).unwrap().hash);
}
