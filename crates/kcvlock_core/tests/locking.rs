//! End-to-end behavior of the locking manager against a recorded backend.

use kcvlock_core::{
    ExpectedValueCheckingStoreManager, LocalLockerProvider, LockingConfig, TransactionState,
};
use kcvlock_storage::{
    Entry, InMemoryStoreManager, KcvMutation, KeyColumnValueStore, KeySliceQuery, MutationBatch,
    Options, SliceQuery, StorageError, StoreManager, StoreTransaction, TransactionConfig,
    CONSISTENCY_OPTION,
};
use kcvlock_testkit::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn batch(store: &str, key: &str, column: &str, value: &str) -> MutationBatch {
    let mut rows = HashMap::new();
    rows.insert(
        buf(key),
        KcvMutation::new(vec![Entry::new(buf(column), buf(value))], vec![]),
    );
    let mut batch = MutationBatch::new();
    batch.insert(store.to_owned(), rows);
    batch
}

#[test]
fn concurrent_open_returns_one_handle() {
    init_tracing();
    let recorded = Arc::new(recorded_manager());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let recorded = Arc::clone(&recorded);
            thread::spawn(move || recorded.manager.open_database("edges").unwrap())
        })
        .collect();
    let stores: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for store in &stores[1..] {
        assert!(Arc::ptr_eq(&stores[0], store));
    }
    assert_eq!(recorded.log.count(|c| matches!(c, Call::Open { .. })), 1);
    assert_eq!(recorded.lockers.inner().scopes(), vec!["edges_lock_".to_owned()]);
}

#[test]
fn begin_opens_data_and_consistency_transactions() {
    let recorded = recorded_manager();
    let custom = Options::new()
        .with(CONSISTENCY_OPTION, "eventual")
        .with("timeout", 5i64);
    let config = TransactionConfig::builder()
        .custom_options(custom.clone())
        .group_name("writers")
        .build();

    let tx = recorded.manager.begin_transaction(&config).unwrap();

    let calls = recorded.log.calls();
    assert_eq!(
        calls,
        vec![
            Call::Begin {
                tx: 1,
                options: custom.clone(),
            },
            Call::Begin {
                tx: 2,
                options: Options::new()
                    .with(CONSISTENCY_OPTION, "strong")
                    .with("timeout", 5i64),
            },
        ]
    );
    assert_eq!(tx.data_transaction().serial(), 1);
    assert_eq!(tx.consistent_transaction().serial(), 2);
    assert_eq!(
        tx.consistent_transaction().config().group_name.as_deref(),
        Some("writers")
    );
    assert_eq!(tx.config(), &config);
}

#[test]
fn consistency_open_failure_rolls_back_data_transaction() {
    let recorded = recorded_manager();
    recorded.backend().fail_begin_at(2);

    let result = recorded.manager.begin_transaction(&TransactionConfig::new());

    assert!(matches!(result, Err(StorageError::Backend { .. })));
    assert!(recorded.log.calls().contains(&Call::Rollback { tx: 1 }));
}

#[test]
fn locks_and_expected_values_are_verified_before_mutation() {
    let recorded = recorded_manager();
    let store = recorded.manager.open_database("s").unwrap();
    let tx = recorded
        .manager
        .begin_transaction(&TransactionConfig::new())
        .unwrap();
    recorded.log.clear();

    store.acquire_lock(&buf("k"), &buf("c"), None, &tx).unwrap();
    store
        .mutate(&buf("k"), &[Entry::new(buf("c"), buf("v1"))], &[], &tx)
        .unwrap();

    let lock = recorded
        .log
        .position(|c| matches!(c, Call::WriteLock { .. }))
        .unwrap();
    let check = recorded
        .log
        .position(|c| matches!(c, Call::CheckLocks { .. }))
        .unwrap();
    let read = recorded
        .log
        .position(|c| matches!(c, Call::GetSlice { tx: 2, .. }))
        .unwrap();
    let write = recorded
        .log
        .position(Call::is_physical_mutation)
        .unwrap();
    assert!(lock < check && check < read && read < write);

    // Locked writes go through the consistency transaction
    assert_eq!(
        recorded.log.calls()[write],
        Call::Mutate {
            store: "s".into(),
            tx: 2,
        }
    );
}

#[test]
fn unlocked_writes_use_data_transaction() {
    let recorded = recorded_manager();
    let store = recorded.manager.open_database("s").unwrap();
    let tx = recorded
        .manager
        .begin_transaction(&TransactionConfig::new())
        .unwrap();

    store
        .mutate(&buf("k"), &[Entry::new(buf("c"), buf("v"))], &[], &tx)
        .unwrap();

    assert!(recorded.log.calls().contains(&Call::Mutate {
        store: "s".into(),
        tx: 1,
    }));
    assert_eq!(recorded.log.count(|c| matches!(c, Call::CheckLocks { .. })), 0);
}

#[test]
fn preparation_runs_once() {
    let recorded = recorded_manager();
    let store = recorded.manager.open_database("s").unwrap();
    let tx = recorded
        .manager
        .begin_transaction(&TransactionConfig::new())
        .unwrap();
    store.acquire_lock(&buf("k"), &buf("c"), None, &tx).unwrap();

    recorded
        .manager
        .mutate_many(&batch("s", "k", "c", "v1"), &tx)
        .unwrap();
    recorded
        .manager
        .mutate_many(&batch("s", "k", "d", "v2"), &tx)
        .unwrap();

    assert_eq!(recorded.log.count(|c| matches!(c, Call::CheckLocks { .. })), 1);
    assert_eq!(recorded.log.count(|c| matches!(c, Call::GetSlice { .. })), 1);
    assert_eq!(recorded.log.count(|c| matches!(c, Call::MutateMany { tx: 1 })), 2);
    assert_eq!(tx.state(), TransactionState::Prepared);
}

#[test]
fn failed_preparation_mutates_nothing() {
    let recorded = recorded_manager();
    let store = recorded.manager.open_database("s").unwrap();
    let tx = recorded
        .manager
        .begin_transaction(&TransactionConfig::new())
        .unwrap();

    // Column is absent, but the lock expects a value
    store
        .acquire_lock(&buf("k"), &buf("c"), Some(&buf("v0")), &tx)
        .unwrap();
    let result = recorded.manager.mutate_many(&batch("s", "k", "c", "v1"), &tx);

    let err = result.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(recorded.log.count(Call::is_physical_mutation), 0);
    assert_eq!(tx.state(), TransactionState::Created);
    assert_eq!(store.backing_store().inner().row_count(), 0);
}

#[test]
fn conflicting_writer_sees_mismatch() {
    let recorded = recorded_manager();
    let store = recorded.manager.open_database("s").unwrap();
    let config = TransactionConfig::new();

    let setup = recorded.manager.begin_transaction(&config).unwrap();
    recorded
        .manager
        .mutate_many(&batch("s", "k", "c", "v0"), &setup)
        .unwrap();
    setup.commit().unwrap();

    let t1 = recorded.manager.begin_transaction(&config).unwrap();
    let t2 = recorded.manager.begin_transaction(&config).unwrap();

    store
        .acquire_lock(&buf("k"), &buf("c"), Some(&buf("v0")), &t1)
        .unwrap();
    recorded
        .manager
        .mutate_many(&batch("s", "k", "c", "v1"), &t1)
        .unwrap();
    t1.commit().unwrap();

    store
        .acquire_lock(&buf("k"), &buf("c"), Some(&buf("v0")), &t2)
        .unwrap();
    let result = recorded.manager.mutate_many(&batch("s", "k", "c", "v2"), &t2);

    assert!(matches!(
        result,
        Err(StorageError::ExpectedValueMismatch { .. })
    ));
    t2.rollback().unwrap();
    assert_eq!(
        store.backing_store().inner().get(b"k", b"c"),
        Some(buf("v1"))
    );
}

#[test]
fn lock_contention_times_out_without_conflict() {
    let recorded = recorded_manager();
    let store = recorded.manager.open_database("s").unwrap();
    let holder = recorded
        .manager
        .begin_transaction(&TransactionConfig::new())
        .unwrap();
    let waiter = recorded
        .manager
        .begin_transaction(&TransactionConfig::new())
        .unwrap();

    store.acquire_lock(&buf("k"), &buf("c"), None, &holder).unwrap();
    let err = store
        .acquire_lock(&buf("k"), &buf("c"), None, &waiter)
        .unwrap_err();

    assert!(matches!(err, StorageError::LockTimeout { .. }));
    assert!(err.is_lock_failure());
    assert!(!err.is_conflict());
}

#[test]
fn waiter_proceeds_once_holder_commits() {
    let recorded = Arc::new(recorded_manager());
    let store = recorded.manager.open_database("s").unwrap();
    let holder = recorded
        .manager
        .begin_transaction(&TransactionConfig::new())
        .unwrap();
    store.acquire_lock(&buf("k"), &buf("c"), None, &holder).unwrap();

    let waiter = {
        let recorded = Arc::clone(&recorded);
        let store = Arc::clone(&store);
        thread::spawn(move || {
            let tx = recorded
                .manager
                .begin_transaction(&TransactionConfig::new())
                .unwrap();
            store.acquire_lock(&buf("k"), &buf("c"), None, &tx)
        })
    };

    thread::sleep(Duration::from_millis(20));
    holder.commit().unwrap();

    assert!(waiter.join().unwrap().is_ok());
}

#[test]
fn transient_read_failures_are_retried() {
    let recorded = recorded_manager();
    let store = recorded.manager.open_database("s").unwrap();
    let tx = recorded
        .manager
        .begin_transaction(&TransactionConfig::new())
        .unwrap();
    store.acquire_lock(&buf("k"), &buf("c"), None, &tx).unwrap();

    recorded.backend().fail_next_slices(2);
    recorded
        .manager
        .mutate_many(&batch("s", "k", "c", "v"), &tx)
        .unwrap();

    assert_eq!(recorded.log.count(|c| matches!(c, Call::GetSlice { .. })), 3);
}

#[test]
fn persistent_read_failures_time_out() {
    let recorded = recorded_manager();
    let store = recorded.manager.open_database("s").unwrap();
    let tx = recorded
        .manager
        .begin_transaction(&TransactionConfig::new())
        .unwrap();
    store.acquire_lock(&buf("k"), &buf("c"), None, &tx).unwrap();

    recorded.backend().fail_next_slices(usize::MAX);
    let err = recorded
        .manager
        .mutate_many(&batch("s", "k", "c", "v"), &tx)
        .unwrap_err();

    assert!(matches!(err, StorageError::LockTimeout { .. }));
    assert_eq!(recorded.log.count(Call::is_physical_mutation), 0);
}

#[test]
fn expired_claim_fails_preparation() {
    let config = LockingConfig::new()
        .max_read_time(Duration::from_millis(200))
        .lock_expiry(Duration::from_millis(10));
    let manager = ExpectedValueCheckingStoreManager::new(
        InMemoryStoreManager::new(),
        LocalLockerProvider::from_config(&config),
        config,
    )
    .unwrap();
    let store = manager.open_database("s").unwrap();
    let t1 = manager.begin_transaction(&TransactionConfig::new()).unwrap();
    let t2 = manager.begin_transaction(&TransactionConfig::new()).unwrap();

    store.acquire_lock(&buf("k"), &buf("c"), None, &t1).unwrap();
    thread::sleep(Duration::from_millis(30));
    store.acquire_lock(&buf("k"), &buf("c"), None, &t2).unwrap();

    let err = manager
        .mutate_many(&batch("s", "k", "c", "v"), &t1)
        .unwrap_err();
    assert!(matches!(err, StorageError::LockFailure { .. }));
    assert!(!err.is_conflict());
}

#[test]
fn locks_released_on_commit_rollback_and_drop() {
    let recorded = recorded_manager();
    let store = recorded.manager.open_database("s").unwrap();
    let locker = recorded.lockers.inner().locker("s_lock_");
    let config = TransactionConfig::new();

    let committed = recorded.manager.begin_transaction(&config).unwrap();
    store.acquire_lock(&buf("a"), &buf("c"), None, &committed).unwrap();
    committed.commit().unwrap();
    assert_eq!(locker.claim_count(), 0);

    let rolled_back = recorded.manager.begin_transaction(&config).unwrap();
    store.acquire_lock(&buf("b"), &buf("c"), None, &rolled_back).unwrap();
    rolled_back.rollback().unwrap();
    assert_eq!(locker.claim_count(), 0);

    {
        let dropped = recorded.manager.begin_transaction(&config).unwrap();
        store.acquire_lock(&buf("c"), &buf("c"), None, &dropped).unwrap();
        assert_eq!(locker.claim_count(), 1);
    }
    assert_eq!(locker.claim_count(), 0);
    assert_eq!(recorded.log.count(|c| matches!(c, Call::DeleteLocks { .. })), 3);
}

#[test]
fn commit_order_is_data_locks_consistency() {
    let recorded = recorded_manager();
    let store = recorded.manager.open_database("s").unwrap();
    let tx = recorded
        .manager
        .begin_transaction(&TransactionConfig::new())
        .unwrap();
    store.acquire_lock(&buf("k"), &buf("c"), None, &tx).unwrap();
    recorded.log.clear();

    tx.commit().unwrap();

    assert_eq!(
        recorded.log.calls(),
        vec![
            Call::Commit { tx: 1 },
            Call::DeleteLocks {
                scope: "s_lock_".into(),
            },
            Call::Commit { tx: 2 },
        ]
    );
}

#[test]
fn foreign_transaction_is_rejected_before_any_call() {
    let a = recorded_manager();
    let b = recorded_manager();
    let store_b = b.manager.open_database("s").unwrap();
    let foreign = a
        .manager
        .begin_transaction(&TransactionConfig::new())
        .unwrap();
    b.log.clear();

    let batch_result = b.manager.mutate_many(&batch("s", "k", "c", "v"), &foreign);
    let lock_result = store_b.acquire_lock(&buf("k"), &buf("c"), None, &foreign);
    let mutate_result = store_b.mutate(&buf("k"), &[], &[], &foreign);
    let query = KeySliceQuery::new(buf("k"), SliceQuery::single_column(&buf("c")));
    let read_result = store_b.get_slice(&query, &foreign);

    for result in [batch_result, lock_result, mutate_result] {
        assert!(matches!(result, Err(StorageError::InvalidTransaction { .. })));
    }
    assert!(read_result.unwrap_err().is_misuse());
    assert!(b.log.is_empty());
    assert_eq!(foreign.state(), TransactionState::Created);
}

#[test]
fn features_always_report_locking() {
    let plain = recorded_manager();
    assert!(!plain.backend().inner().features().has_locking());
    assert!(plain.manager.features().has_locking());

    let native = recorded_manager_with(
        InMemoryStoreManager::default_features()
            .to_builder()
            .locking(true)
            .ordered_scan(false)
            .build(),
    );
    let features = native.manager.features();
    assert!(features.has_locking());
    assert!(!features.has_ordered_scan());
    assert!(features.is_key_consistent());
}

#[test]
fn backend_without_key_consistency_is_rejected() {
    let features = InMemoryStoreManager::default_features()
        .to_builder()
        .not_key_consistent()
        .build();
    let result = ExpectedValueCheckingStoreManager::new(
        InMemoryStoreManager::with_features(features),
        LocalLockerProvider::default(),
        LockingConfig::default(),
    );
    assert!(matches!(result, Err(StorageError::Unsupported(_))));
}

#[test]
fn backend_open_failure_leaves_cache_empty() {
    let recorded = recorded_manager();
    recorded.backend().fail_next_open();

    let err = recorded.manager.open_database("s").unwrap_err();
    match err {
        StorageError::Backend { message, temporary } => {
            assert_eq!(message, "injected failure opening store s");
            assert!(!temporary);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(recorded.manager.open_store_count(), 0);
    assert!(recorded.lockers.inner().scopes().is_empty());

    let first = recorded.manager.open_database("s").unwrap();
    let second = recorded.manager.open_database("s").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(recorded.manager.open_store_count(), 1);
}

#[test]
fn locker_failure_leaves_cache_empty() {
    let recorded = recorded_manager();
    recorded.lockers.fail_next_scope("s_lock_");

    let err = recorded.manager.open_database("s").unwrap_err();
    match err {
        StorageError::Backend { message, .. } => {
            assert_eq!(message, "injected failure creating locker for s_lock_");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(recorded.manager.open_store_count(), 0);

    let store = recorded.manager.open_database("s").unwrap();
    assert_eq!(store.lock_scope(), "s_lock_");
    assert_eq!(recorded.manager.open_store_count(), 1);
}

#[test]
fn dropping_unfinished_transaction_rolls_back_both_halves() {
    let recorded = recorded_manager();
    let store = recorded.manager.open_database("s").unwrap();
    {
        let tx = recorded
            .manager
            .begin_transaction(&TransactionConfig::new())
            .unwrap();
        store.acquire_lock(&buf("k"), &buf("c"), None, &tx).unwrap();
        recorded.log.clear();
    }

    assert_eq!(
        recorded.log.calls(),
        vec![
            Call::DeleteLocks {
                scope: "s_lock_".into(),
            },
            Call::Rollback { tx: 1 },
            Call::Rollback { tx: 2 },
        ]
    );
}

#[test]
fn dropping_finished_transaction_does_nothing() {
    let recorded = recorded_manager();
    let tx = recorded
        .manager
        .begin_transaction(&TransactionConfig::new())
        .unwrap();
    tx.commit().unwrap();
    recorded.log.clear();

    drop(tx);

    assert!(recorded.log.is_empty());
}
