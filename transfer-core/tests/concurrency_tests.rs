//! Concurrent transfer tests
//!
//! Every test runs real RocksDB transactions on a multi-threaded runtime so
//! that transfers genuinely contend for account row locks.

mod common;

use common::*;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use transfer_core::{
    AccountId, Config, Error, ErrorKind, Ledger, RowStore, Storage, TransferStep,
};

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cross_traffic_does_not_deadlock() {
    // Without deadlock detection a cycle of waiters would only end in lock
    // timeouts and retries
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&temp_dir);
    config.transaction.deadlock_detect = false;
    let ledger = Arc::new(Ledger::open(config).await.unwrap());
    let a = funded(&ledger, "alice", 1_000).await;
    let b = funded(&ledger, "bob", 1_000).await;

    let n = 10;
    let mut handles = Vec::new();
    for i in 0..n {
        let ledger = ledger.clone();
        let (from, to) = if i % 2 == 1 { (b.id, a.id) } else { (a.id, b.id) };
        handles.push(tokio::spawn(async move {
            ledger.execute_transfer(from, to, 10, TIMEOUT).await
        }));
    }

    let started = Instant::now();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert!(started.elapsed() < TIMEOUT);
    assert_eq!(ledger.metrics().transfer_retries_total.get(), 0);

    // Five each way
    assert_eq!(ledger.get_account(a.id).unwrap().balance, 1_000);
    assert_eq!(ledger.get_account(b.id).unwrap().balance, 1_000);
    assert_eq!(transfers_of(&ledger, a.id).len(), n);
    assert_eq!(entries_of(&ledger, a.id).len(), n + 1);
    assert!(ledger.verify_account_balance(a.id).unwrap());
    assert!(ledger.verify_account_balance(b.id).unwrap());
    assert_eq!(ledger.metrics().transfers_total.get(), n as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_direction_transfers_serialize() {
    let (ledger, _temp) = create_test_ledger().await;
    let ledger = Arc::new(ledger);
    let a = funded(&ledger, "alice", 10_000).await;
    let b = funded(&ledger, "bob", 0).await;

    let n: i64 = 10;
    let amount: i64 = 10;
    let mut handles = Vec::new();
    for _ in 0..n {
        let ledger = ledger.clone();
        let (from, to) = (a.id, b.id);
        handles.push(tokio::spawn(async move {
            ledger.execute_transfer(from, to, amount, TIMEOUT).await
        }));
    }

    let mut payer_steps = Vec::new();
    let mut payee_steps = Vec::new();
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();

        let debited = 10_000 - outcome.from_account_new_balance;
        assert_eq!(debited % amount, 0);
        payer_steps.push(debited / amount);

        let credited = outcome.to_account_new_balance;
        assert_eq!(credited % amount, 0);
        payee_steps.push(credited / amount);
    }

    // Each transfer saw the balance left by exactly the ones before it
    payer_steps.sort_unstable();
    payee_steps.sort_unstable();
    let expected: Vec<i64> = (1..=n).collect();
    assert_eq!(payer_steps, expected);
    assert_eq!(payee_steps, expected);

    assert_eq!(ledger.get_account(a.id).unwrap().balance, 10_000 - n * amount);
    assert_eq!(ledger.get_account(b.id).unwrap().balance, n * amount);
    assert_eq!(entries_of(&ledger, b.id).len(), n as usize);
    assert!(ledger.verify_account_balance(a.id).unwrap());
    assert!(ledger.verify_account_balance(b.id).unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_credit_leg_rolls_back_everything() {
    let (ledger, probe, _temp) = create_probed_ledger();
    let a = funded(&ledger, "alice", 100).await;
    let b = funded(&ledger, "bob", 50).await;

    probe.fail_internally(1);
    let err = ledger.execute_transfer(a.id, b.id, 10, TIMEOUT).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InternalStoreError);
    assert!(matches!(
        err,
        Error::Step {
            step: TransferStep::InsertToEntry,
            ..
        }
    ));
    // Internal errors are not retried
    assert_eq!(ledger.metrics().transfer_retries_total.get(), 0);

    assert_eq!(ledger.get_account(a.id).unwrap().balance, 100);
    assert_eq!(ledger.get_account(b.id).unwrap().balance, 50);
    assert!(transfers_of(&ledger, a.id).is_empty());
    assert_eq!(entries_of(&ledger, a.id).len(), 1);
    assert_eq!(entries_of(&ledger, b.id).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_retry_after_transient_failure_applies_once() {
    let (ledger, probe, _temp) = create_probed_ledger();
    let a = funded(&ledger, "alice", 100).await;
    let b = funded(&ledger, "bob", 50).await;

    probe.fail_transiently(1);
    let outcome = ledger.execute_transfer(a.id, b.id, 10, TIMEOUT).await.unwrap();

    assert_eq!(outcome.from_account_new_balance, 90);
    assert_eq!(outcome.to_account_new_balance, 60);
    assert_eq!(ledger.metrics().transfer_retries_total.get(), 1);

    let transfers = transfers_of(&ledger, a.id);
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].id, outcome.transfer_id);
    assert_eq!(entries_of(&ledger, a.id).len(), 2);
    assert_eq!(entries_of(&ledger, b.id).len(), 2);
    assert!(ledger.verify_account_balance(a.id).unwrap());
    assert!(ledger.verify_account_balance(b.id).unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_persistent_transient_failure_exhausts_retries() {
    let (ledger, probe, _temp) = create_probed_ledger();
    let a = funded(&ledger, "alice", 100).await;
    let b = funded(&ledger, "bob", 50).await;

    probe.fail_transiently(u32::MAX);
    let err = ledger.execute_transfer(a.id, b.id, 10, TIMEOUT).await.unwrap_err();
    probe.fail_transiently(0);

    assert!(matches!(err, Error::RetriesExhausted { attempts: 3, .. }));
    assert!(err.is_transient());
    assert_eq!(ledger.metrics().transfer_retries_total.get(), 2);
    assert_eq!(ledger.metrics().transfer_failures_total.get(), 1);
    assert!(transfers_of(&ledger, a.id).is_empty());
    assert_eq!(ledger.get_account(a.id).unwrap().balance, 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_adjustments_follow_account_order() {
    let (ledger, probe, _temp) = create_probed_ledger();
    let low = funded(&ledger, "low", 100).await;
    let high = funded(&ledger, "high", 100).await;
    assert!(low.id < high.id);
    probe.take_adjusted();

    ledger.execute_transfer(high.id, low.id, 5, TIMEOUT).await.unwrap();
    assert_eq!(probe.take_adjusted(), vec![low.id, high.id]);

    ledger.execute_transfer(low.id, high.id, 5, TIMEOUT).await.unwrap();
    assert_eq!(probe.take_adjusted(), vec![low.id, high.id]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_deadline_exceeded_while_waiting_for_lock() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config: Config = test_config(&temp_dir);
    let storage = Arc::new(Storage::open(&config).unwrap());
    let ledger = Ledger::with_store(storage.clone(), config).unwrap();

    let a = funded(&ledger, "alice", 100).await;
    let b = funded(&ledger, "bob", 50).await;

    // Hold the lock on `a` for longer than the transfer may wait
    let (locked_tx, locked_rx) = mpsc::channel();
    let holder_storage = storage.clone();
    let holder_id: AccountId = a.id;
    let holder = std::thread::spawn(move || {
        let mut unit = holder_storage
            .begin(Instant::now() + Duration::from_secs(5))
            .unwrap();
        unit.get_account_for_update(holder_id).unwrap();
        locked_tx.send(()).unwrap();
        std::thread::sleep(Duration::from_millis(800));
        unit.rollback().unwrap();
    });
    locked_rx.recv().unwrap();

    let started = Instant::now();
    let err = ledger
        .execute_transfer(a.id, b.id, 10, Duration::from_millis(200))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
    assert!(started.elapsed() < Duration::from_millis(800));
    holder.join().unwrap();

    assert_eq!(ledger.get_account(a.id).unwrap().balance, 100);
    assert_eq!(ledger.get_account(b.id).unwrap().balance, 50);
    assert!(transfers_of(&ledger, a.id).is_empty());
    assert_eq!(entries_of(&ledger, b.id).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_balances_audit_after_mixed_load() {
    let (ledger, _temp) = create_test_ledger().await;
    let ledger = Arc::new(ledger);

    let mut ids = Vec::new();
    for owner in ["a", "b", "c", "d"] {
        ids.push(funded(&ledger, owner, 500).await.id);
    }

    let mut handles = Vec::new();
    for i in 0..40usize {
        let ledger = ledger.clone();
        let from = ids[i % ids.len()];
        let to = ids[(i * 3 + 1) % ids.len()];
        if from == to {
            continue;
        }
        let amount = (i as i64 % 7) + 1;
        handles.push(tokio::spawn(async move {
            ledger.execute_transfer(from, to, amount, TIMEOUT).await
        }));
    }

    let submitted = handles.len();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(total_balance(&ledger, &ids), 2_000);
    for id in &ids {
        assert!(ledger.verify_account_balance(*id).unwrap());
    }

    let mut transfer_ids: Vec<_> = ids
        .iter()
        .flat_map(|id| transfers_of(&ledger, *id))
        .map(|t| t.id)
        .collect();
    transfer_ids.sort();
    transfer_ids.dedup();
    assert_eq!(transfer_ids.len(), submitted);
}
