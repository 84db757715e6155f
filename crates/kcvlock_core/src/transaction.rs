//! Paired data/consistency transactions with expected-value verification.

use crate::locker::{LockRequester, Locker};
use crate::retry::{deadline_after, execute_until};
use crate::store::ExpectedValueCheckingStore;
use kcvlock_storage::{
    format_values, KeyColumn, KeyColumnValueStore, KeySliceQuery, SliceQuery, StaticBuffer,
    StorageError, StorageResult, StoreTransaction, TransactionConfig,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Lifecycle of an [`ExpectedValueCheckingTransaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Locks may still be acquired; no mutation has been sent.
    Created,
    /// Locks and expected values were verified; mutations may flow.
    Prepared,
    /// Both halves committed.
    Committed,
    /// Both halves rolled back.
    Aborted,
}

impl TransactionState {
    /// Returns true once the transaction has been committed or aborted.
    pub fn is_completed(&self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::Aborted)
    }
}

struct StoreExpectations<S: KeyColumnValueStore> {
    store: Arc<S>,
    locker: Arc<dyn Locker>,
    values: BTreeMap<KeyColumn, Option<StaticBuffer>>,
}

/// A logical transaction backed by two physical transactions.
///
/// The *data* transaction carries the caller's configuration. The
/// *consistency* transaction is opened with the backend's key-consistent
/// options and is used for lock bookkeeping and expected-value reads.
///
/// ## State machine
///
/// `Created → Prepared → Committed | Aborted`. Locks can only be acquired
/// while `Created`. [`prepare_for_mutations`](Self::prepare_for_mutations)
/// performs verification once; later calls are no-ops. Dropping an
/// unfinished transaction releases its locks and rolls back both halves.
pub struct ExpectedValueCheckingTransaction<S: KeyColumnValueStore> {
    manager_id: Uuid,
    requester: LockRequester,
    data_tx: S::Transaction,
    consistent_tx: S::Transaction,
    max_read_time: Duration,
    state: Mutex<TransactionState>,
    expected: Mutex<BTreeMap<String, StoreExpectations<S>>>,
}

impl<S: KeyColumnValueStore> ExpectedValueCheckingTransaction<S> {
    pub(crate) fn new(
        manager_id: Uuid,
        data_tx: S::Transaction,
        consistent_tx: S::Transaction,
        max_read_time: Duration,
    ) -> Self {
        Self {
            manager_id,
            requester: LockRequester::new(max_read_time),
            data_tx,
            consistent_tx,
            max_read_time,
            state: Mutex::new(TransactionState::Created),
            expected: Mutex::new(BTreeMap::new()),
        }
    }

    /// Identity of the manager that created this transaction.
    #[must_use]
    pub fn manager_id(&self) -> Uuid {
        self.manager_id
    }

    /// The identity locks are claimed under.
    #[must_use]
    pub fn requester(&self) -> &LockRequester {
        &self.requester
    }

    /// The transaction used for ordinary reads and unlocked writes.
    pub fn data_transaction(&self) -> &S::Transaction {
        &self.data_tx
    }

    /// The key-consistent transaction used for lock bookkeeping.
    pub fn consistent_transaction(&self) -> &S::Transaction {
        &self.consistent_tx
    }

    /// Upper bound on preparation.
    #[must_use]
    pub fn max_read_time(&self) -> Duration {
        self.max_read_time
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    /// Returns true once preparation succeeded.
    #[must_use]
    pub fn is_mutation_started(&self) -> bool {
        self.state() != TransactionState::Created
    }

    /// Returns true if any lock was acquired through this transaction.
    #[must_use]
    pub fn has_any_locks(&self) -> bool {
        self.expected.lock().values().any(|e| !e.values.is_empty())
    }

    /// Number of key/columns locked through this transaction.
    #[must_use]
    pub fn lock_count(&self) -> usize {
        self.expected.lock().values().map(|e| e.values.len()).sum()
    }

    /// Claims `lock_id` in `store`'s scope and records its expected value.
    ///
    /// Only the first expected value recorded for a lock is kept.
    pub(crate) fn register_lock(
        &self,
        store: &ExpectedValueCheckingStore<S>,
        lock_id: KeyColumn,
        expected: Option<StaticBuffer>,
    ) -> StorageResult<()> {
        // Held for the whole claim so preparation cannot slip in between
        let state = self.state.lock();
        match *state {
            TransactionState::Created => {}
            TransactionState::Prepared => {
                return Err(StorageError::lock_failure(format!(
                    "cannot lock {lock_id} after mutations have started"
                )));
            }
            other => {
                return Err(StorageError::invalid_transaction(format!(
                    "cannot lock {lock_id} on a {other:?} transaction"
                )));
            }
        }

        debug!(store = store.name(), lock = %lock_id, requester = %self.requester, "acquiring lock");
        store.locker().write_lock(&lock_id, &self.requester)?;

        let mut expected_by_store = self.expected.lock();
        let entry = expected_by_store
            .entry(store.name().to_owned())
            .or_insert_with(|| StoreExpectations {
                store: Arc::clone(store.backing_store()),
                locker: Arc::clone(store.locker()),
                values: BTreeMap::new(),
            });
        entry.values.entry(lock_id).or_insert(expected);
        drop(state);
        Ok(())
    }

    /// Verifies every lock and expected value before the first mutation.
    ///
    /// Runs at most once: after a successful call the transaction is
    /// `Prepared` and further calls return immediately. Returns whether any
    /// lock is held. All checks share one deadline of `max_read_time`.
    ///
    /// # Errors
    ///
    /// - `LockTimeout` if verification cannot finish in time
    /// - `LockFailure` if a claim was lost
    /// - `ExpectedValueMismatch` if a locked column changed
    /// - `InvalidTransaction` if the transaction already completed
    pub fn prepare_for_mutations(&self) -> StorageResult<bool> {
        let mut state = self.state.lock();
        match *state {
            TransactionState::Created => {
                let deadline = deadline_after(Instant::now(), self.max_read_time);
                self.check_all_locks(deadline)?;
                self.check_all_expected_values(deadline)?;
                *state = TransactionState::Prepared;
                debug!(requester = %self.requester, locks = self.lock_count(), "prepared for mutations");
            }
            TransactionState::Prepared => {}
            other => {
                return Err(StorageError::invalid_transaction(format!(
                    "cannot mutate through a {other:?} transaction"
                )));
            }
        }
        drop(state);
        Ok(self.has_any_locks())
    }

    fn check_all_locks(&self, deadline: Instant) -> StorageResult<()> {
        let expected_by_store = self.expected.lock();
        for expectations in expected_by_store.values() {
            if !expectations.values.is_empty() {
                expectations.locker.check_locks(&self.requester, deadline)?;
            }
        }
        Ok(())
    }

    fn check_all_expected_values(&self, deadline: Instant) -> StorageResult<()> {
        let expected_by_store = self.expected.lock();
        for expectations in expected_by_store.values() {
            for (lock_id, value) in &expectations.values {
                self.check_single_expected_value(
                    expectations.store.as_ref(),
                    lock_id,
                    value.as_ref(),
                    deadline,
                )?;
            }
        }
        Ok(())
    }

    fn check_single_expected_value(
        &self,
        store: &S,
        lock_id: &KeyColumn,
        expected: Option<&StaticBuffer>,
        deadline: Instant,
    ) -> StorageResult<()> {
        let query = KeySliceQuery::new(
            lock_id.key.clone(),
            SliceQuery::single_column(&lock_id.column),
        );
        let what = format!("{}/{}", store.name(), lock_id);
        let entries = execute_until(&what, deadline, || {
            store.get_slice(&query, &self.consistent_tx)
        })?;

        let actual: Vec<StaticBuffer> = entries.into_iter().map(|e| e.value).collect();
        let expected: Vec<StaticBuffer> = expected.into_iter().cloned().collect();
        if actual != expected {
            return Err(StorageError::ExpectedValueMismatch {
                store: store.name().to_owned(),
                lock: lock_id.to_string(),
                expected: format_values(&expected),
                actual: format_values(&actual),
            });
        }
        Ok(())
    }

    /// Releases every lock; failures are logged, not returned.
    fn delete_all_locks(&self) {
        let expected_by_store = self.expected.lock();
        for (name, expectations) in expected_by_store.iter() {
            if expectations.values.is_empty() {
                continue;
            }
            if let Err(e) = expectations.locker.delete_locks(&self.requester) {
                warn!(store = %name, requester = %self.requester, error = %e, "failed to release locks");
            }
        }
    }
}

impl<S: KeyColumnValueStore> StoreTransaction for ExpectedValueCheckingTransaction<S> {
    fn config(&self) -> &TransactionConfig {
        self.data_tx.config()
    }

    /// Commits the data transaction, releases locks, then commits the
    /// consistency transaction.
    fn commit(&self) -> StorageResult<()> {
        let mut state = self.state.lock();
        if state.is_completed() {
            return Err(StorageError::invalid_transaction(format!(
                "cannot commit a {:?} transaction",
                *state
            )));
        }
        self.data_tx.commit()?;
        self.delete_all_locks();
        *state = TransactionState::Committed;
        drop(state);
        self.consistent_tx.commit()
    }

    /// Releases locks and rolls back both halves, reporting the first failure.
    fn rollback(&self) -> StorageResult<()> {
        let mut state = self.state.lock();
        if state.is_completed() {
            return Err(StorageError::invalid_transaction(format!(
                "cannot roll back a {:?} transaction",
                *state
            )));
        }
        self.delete_all_locks();
        *state = TransactionState::Aborted;
        drop(state);
        let data = self.data_tx.rollback();
        let consistent = self.consistent_tx.rollback();
        data.and(consistent)
    }
}

impl<S: KeyColumnValueStore> Drop for ExpectedValueCheckingTransaction<S> {
    fn drop(&mut self) {
        if self.state.get_mut().is_completed() {
            return;
        }
        debug!(requester = %self.requester, "rolling back unfinished transaction");
        self.delete_all_locks();
        *self.state.get_mut() = TransactionState::Aborted;
        if let Err(e) = self.data_tx.rollback() {
            warn!(requester = %self.requester, error = %e, "failed to roll back data transaction");
        }
        if let Err(e) = self.consistent_tx.rollback() {
            warn!(requester = %self.requester, error = %e, "failed to roll back consistency transaction");
        }
    }
}

impl<S: KeyColumnValueStore> fmt::Debug for ExpectedValueCheckingTransaction<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpectedValueCheckingTransaction")
            .field("requester", &self.requester)
            .field("state", &self.state())
            .field("locks", &self.lock_count())
            .field("max_read_time", &self.max_read_time)
            .finish_non_exhaustive()
    }
}
