//! Recording wrappers around backends and lockers.
//!
//! Every wrapped call is appended to a shared [`CallLog`] so tests can assert
//! on the order in which the locking layer talks to its collaborators.

use kcvlock_core::{LocalLockerProvider, LockRequester, Locker, LockerProvider};
use kcvlock_storage::{
    Entry, EntryList, KeyColumn, KeyColumnValueStore, KeyRange, KeySliceQuery, MutationBatch,
    Options, StaticBuffer, StorageError, StorageResult, StoreFeatures, StoreManager,
    StoreTransaction, TransactionConfig,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A call observed by a recording wrapper.
///
/// Transactions are numbered from 1 in the order they were begun.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `open_database` on the backend.
    Open {
        /// Store name.
        store: String,
    },
    /// `begin_transaction` on the backend.
    Begin {
        /// Transaction number.
        tx: usize,
        /// Custom options the transaction was opened with.
        options: Options,
    },
    /// A backend transaction committed.
    Commit {
        /// Transaction number.
        tx: usize,
    },
    /// A backend transaction rolled back.
    Rollback {
        /// Transaction number.
        tx: usize,
    },
    /// `get_slice` on a backend store.
    GetSlice {
        /// Store name.
        store: String,
        /// Transaction number.
        tx: usize,
    },
    /// `mutate` on a backend store.
    Mutate {
        /// Store name.
        store: String,
        /// Transaction number.
        tx: usize,
    },
    /// `mutate_many` on the backend.
    MutateMany {
        /// Transaction number.
        tx: usize,
    },
    /// `write_lock` on a locker.
    WriteLock {
        /// Lock scope.
        scope: String,
        /// Claimed key/column.
        lock: KeyColumn,
    },
    /// `check_locks` on a locker.
    CheckLocks {
        /// Lock scope.
        scope: String,
    },
    /// `delete_locks` on a locker.
    DeleteLocks {
        /// Lock scope.
        scope: String,
    },
}

impl Call {
    /// Returns true for calls that physically change stored data.
    pub fn is_physical_mutation(&self) -> bool {
        matches!(self, Call::Mutate { .. } | Call::MutateMany { .. })
    }
}

/// Shared, append-only call log.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a call.
    pub fn record(&self, call: Call) {
        self.0.lock().push(call);
    }

    /// Snapshot of every call so far.
    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().clone()
    }

    /// Forgets every recorded call.
    pub fn clear(&self) {
        self.0.lock().clear();
    }

    /// Number of calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.0.lock().iter().filter(|c| pred(c)).count()
    }

    /// Index of the first call matching `pred`.
    pub fn position(&self, pred: impl Fn(&Call) -> bool) -> Option<usize> {
        self.0.lock().iter().position(pred)
    }

    /// Returns true if no call was recorded.
    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

/// A backend transaction tagged with its begin order.
#[derive(Debug)]
pub struct RecordingTransaction<T> {
    serial: usize,
    inner: T,
    log: CallLog,
}

impl<T> RecordingTransaction<T> {
    /// Begin order of this transaction, starting at 1.
    pub fn serial(&self) -> usize {
        self.serial
    }

    /// The wrapped transaction.
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: StoreTransaction> StoreTransaction for RecordingTransaction<T> {
    fn config(&self) -> &TransactionConfig {
        self.inner.config()
    }

    fn commit(&self) -> StorageResult<()> {
        self.log.record(Call::Commit { tx: self.serial });
        self.inner.commit()
    }

    fn rollback(&self) -> StorageResult<()> {
        self.log.record(Call::Rollback { tx: self.serial });
        self.inner.rollback()
    }
}

/// A backend store that records reads and writes.
#[derive(Debug)]
pub struct RecordingStore<S> {
    inner: Arc<S>,
    log: CallLog,
    slice_failures: Arc<AtomicUsize>,
}

impl<S: KeyColumnValueStore> RecordingStore<S> {
    /// The wrapped store.
    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }
}

impl<S: KeyColumnValueStore> KeyColumnValueStore for RecordingStore<S> {
    type Transaction = RecordingTransaction<S::Transaction>;

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn get_slice(
        &self,
        query: &KeySliceQuery,
        txh: &Self::Transaction,
    ) -> StorageResult<EntryList> {
        self.log.record(Call::GetSlice {
            store: self.inner.name().to_owned(),
            tx: txh.serial,
        });
        let injected = self
            .slice_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StorageError::temporary("injected read failure"));
        }
        self.inner.get_slice(query, &txh.inner)
    }

    fn mutate(
        &self,
        key: &StaticBuffer,
        additions: &[Entry],
        deletions: &[StaticBuffer],
        txh: &Self::Transaction,
    ) -> StorageResult<()> {
        self.log.record(Call::Mutate {
            store: self.inner.name().to_owned(),
            tx: txh.serial,
        });
        self.inner.mutate(key, additions, deletions, &txh.inner)
    }

    fn acquire_lock(
        &self,
        key: &StaticBuffer,
        column: &StaticBuffer,
        expected: Option<&StaticBuffer>,
        txh: &Self::Transaction,
    ) -> StorageResult<()> {
        self.inner.acquire_lock(key, column, expected, &txh.inner)
    }

    fn close(&self) -> StorageResult<()> {
        self.inner.close()
    }
}

/// A [`StoreManager`] that records every call and can inject failures.
///
/// ```rust
/// use kcvlock_storage::{InMemoryStoreManager, StoreManager, TransactionConfig};
/// use kcvlock_testkit::{Call, RecordingStoreManager};
///
/// let backend = RecordingStoreManager::new(InMemoryStoreManager::new());
/// backend.begin_transaction(&TransactionConfig::new()).unwrap();
/// assert!(matches!(backend.log().calls()[0], Call::Begin { tx: 1, .. }));
/// ```
#[derive(Debug)]
pub struct RecordingStoreManager<B> {
    inner: B,
    log: CallLog,
    features: Option<StoreFeatures>,
    begun: AtomicUsize,
    fail_begin_at: Mutex<Option<usize>>,
    fail_next_open: AtomicBool,
    slice_failures: Arc<AtomicUsize>,
}

impl<B: StoreManager> RecordingStoreManager<B> {
    /// Wraps `inner` with a fresh log.
    pub fn new(inner: B) -> Self {
        Self::with_log(inner, CallLog::new())
    }

    /// Wraps `inner`, recording into `log`.
    pub fn with_log(inner: B, log: CallLog) -> Self {
        Self {
            inner,
            log,
            features: None,
            begun: AtomicUsize::new(0),
            fail_begin_at: Mutex::new(None),
            fail_next_open: AtomicBool::new(false),
            slice_failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Reports `features` instead of the wrapped backend's.
    #[must_use]
    pub fn reporting(mut self, features: StoreFeatures) -> Self {
        self.features = Some(features);
        self
    }

    /// The shared call log.
    pub fn log(&self) -> &CallLog {
        &self.log
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Makes the `n`th `begin_transaction` (counting from 1) fail.
    pub fn fail_begin_at(&self, n: usize) {
        *self.fail_begin_at.lock() = Some(n);
    }

    /// Makes the next `open_database` fail with a permanent error.
    pub fn fail_next_open(&self) {
        self.fail_next_open.store(true, Ordering::SeqCst);
    }

    /// Makes the next `count` slice reads fail with a temporary error.
    pub fn fail_next_slices(&self, count: usize) {
        self.slice_failures.store(count, Ordering::SeqCst);
    }

    fn wrap_store(&self, store: Arc<B::Store>) -> Arc<RecordingStore<B::Store>> {
        Arc::new(RecordingStore {
            inner: store,
            log: self.log.clone(),
            slice_failures: Arc::clone(&self.slice_failures),
        })
    }
}

impl<B: StoreManager> StoreManager for RecordingStoreManager<B> {
    type Transaction = RecordingTransaction<B::Transaction>;
    type Store = RecordingStore<B::Store>;

    fn open_database(&self, name: &str) -> StorageResult<Arc<Self::Store>> {
        self.log.record(Call::Open {
            store: name.to_owned(),
        });
        if self.fail_next_open.swap(false, Ordering::SeqCst) {
            return Err(StorageError::permanent(format!(
                "injected failure opening store {name}"
            )));
        }
        let store = self.inner.open_database(name)?;
        Ok(self.wrap_store(store))
    }

    fn begin_transaction(&self, config: &TransactionConfig) -> StorageResult<Self::Transaction> {
        let serial = self.begun.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.record(Call::Begin {
            tx: serial,
            options: config.custom_options.clone(),
        });
        if *self.fail_begin_at.lock() == Some(serial) {
            return Err(StorageError::permanent(format!(
                "injected failure opening transaction {serial}"
            )));
        }
        let inner = self.inner.begin_transaction(config)?;
        Ok(RecordingTransaction {
            serial,
            inner,
            log: self.log.clone(),
        })
    }

    fn mutate_many(&self, mutations: &MutationBatch, txh: &Self::Transaction) -> StorageResult<()> {
        self.log.record(Call::MutateMany { tx: txh.serial });
        self.inner.mutate_many(mutations, &txh.inner)
    }

    fn close(&self) -> StorageResult<()> {
        self.inner.close()
    }

    fn clear_storage(&self) -> StorageResult<()> {
        self.inner.clear_storage()
    }

    fn local_key_partition(&self) -> StorageResult<Vec<KeyRange>> {
        self.inner.local_key_partition()
    }

    fn features(&self) -> StoreFeatures {
        match &self.features {
            Some(features) => features.clone(),
            None => self.inner.features(),
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// A locker that records calls before delegating.
pub struct RecordingLocker {
    scope: String,
    inner: Arc<dyn Locker>,
    log: CallLog,
}

impl Locker for RecordingLocker {
    fn write_lock(&self, lock_id: &KeyColumn, requester: &LockRequester) -> StorageResult<()> {
        self.log.record(Call::WriteLock {
            scope: self.scope.clone(),
            lock: lock_id.clone(),
        });
        self.inner.write_lock(lock_id, requester)
    }

    fn check_locks(&self, requester: &LockRequester, deadline: Instant) -> StorageResult<()> {
        self.log.record(Call::CheckLocks {
            scope: self.scope.clone(),
        });
        self.inner.check_locks(requester, deadline)
    }

    fn delete_locks(&self, requester: &LockRequester) -> StorageResult<()> {
        self.log.record(Call::DeleteLocks {
            scope: self.scope.clone(),
        });
        self.inner.delete_locks(requester)
    }
}

/// Hands out [`RecordingLocker`]s backed by a [`LocalLockerProvider`].
#[derive(Debug)]
pub struct RecordingLockerProvider {
    inner: LocalLockerProvider,
    log: CallLog,
    failing_scope: Mutex<Option<String>>,
}

impl RecordingLockerProvider {
    /// Wraps `inner`, recording into `log`.
    pub fn new(inner: LocalLockerProvider, log: CallLog) -> Self {
        Self {
            inner,
            log,
            failing_scope: Mutex::new(None),
        }
    }

    /// Makes the next `get_locker` for `scope` fail with a permanent error.
    pub fn fail_next_scope(&self, scope: impl Into<String>) {
        *self.failing_scope.lock() = Some(scope.into());
    }

    /// The wrapped provider.
    pub fn inner(&self) -> &LocalLockerProvider {
        &self.inner
    }
}

impl LockerProvider for RecordingLockerProvider {
    fn get_locker(&self, scope: &str) -> StorageResult<Arc<dyn Locker>> {
        {
            let mut failing = self.failing_scope.lock();
            if failing.as_deref() == Some(scope) {
                *failing = None;
                return Err(StorageError::permanent(format!(
                    "injected failure creating locker for {scope}"
                )));
            }
        }
        let inner = self.inner.get_locker(scope)?;
        Ok(Arc::new(RecordingLocker {
            scope: scope.to_owned(),
            inner,
            log: self.log.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use kcvlock_storage::{InMemoryStoreManager, SliceQuery};

    #[test]
    fn transactions_are_numbered_in_begin_order() {
        let backend = RecordingStoreManager::new(InMemoryStoreManager::new());
        let a = backend.begin_transaction(&TransactionConfig::new()).unwrap();
        let b = backend.begin_transaction(&TransactionConfig::new()).unwrap();
        assert_eq!(a.serial(), 1);
        assert_eq!(b.serial(), 2);

        b.commit().unwrap();
        a.rollback().unwrap();
        let calls = backend.log().calls();
        assert_eq!(calls[2], Call::Commit { tx: 2 });
        assert_eq!(calls[3], Call::Rollback { tx: 1 });
    }

    #[test]
    fn injected_begin_failure_hits_only_that_call() {
        let backend = RecordingStoreManager::new(InMemoryStoreManager::new());
        backend.fail_begin_at(2);
        assert!(backend.begin_transaction(&TransactionConfig::new()).is_ok());
        assert!(backend.begin_transaction(&TransactionConfig::new()).is_err());
        assert!(backend.begin_transaction(&TransactionConfig::new()).is_ok());
    }

    #[test]
    fn injected_open_failure_hits_only_next_open() {
        let backend = RecordingStoreManager::new(InMemoryStoreManager::new());
        backend.fail_next_open();
        assert!(backend.open_database("s").is_err());
        assert!(backend.open_database("s").is_ok());
        assert_eq!(backend.log().count(|c| matches!(c, Call::Open { .. })), 2);
    }

    #[test]
    fn injected_locker_failure_hits_only_that_scope_once() {
        let provider = RecordingLockerProvider::new(LocalLockerProvider::default(), CallLog::new());
        provider.fail_next_scope("a_lock_");
        assert!(provider.get_locker("b_lock_").is_ok());
        assert!(provider.get_locker("a_lock_").is_err());
        assert!(provider.get_locker("a_lock_").is_ok());
    }

    #[test]
    fn injected_slice_failures_are_temporary() {
        let backend = RecordingStoreManager::new(InMemoryStoreManager::new());
        let store = backend.open_database("s").unwrap();
        let tx = backend.begin_transaction(&TransactionConfig::new()).unwrap();
        let query = KeySliceQuery::new(
            Bytes::from_static(b"k"),
            SliceQuery::single_column(&Bytes::from_static(b"c")),
        );

        backend.fail_next_slices(1);
        let err = store.get_slice(&query, &tx).unwrap_err();
        assert!(err.is_temporary());
        assert!(store.get_slice(&query, &tx).unwrap().is_empty());
    }

    #[test]
    fn locker_calls_share_the_log() {
        let log = CallLog::new();
        let provider = RecordingLockerProvider::new(LocalLockerProvider::default(), log.clone());
        let locker = provider.get_locker("s_lock_").unwrap();
        let requester = LockRequester::new(std::time::Duration::from_millis(50));
        let lock = KeyColumn::new(Bytes::from_static(b"k"), Bytes::from_static(b"c"));

        locker.write_lock(&lock, &requester).unwrap();
        locker.delete_locks(&requester).unwrap();

        assert_eq!(
            log.calls(),
            vec![
                Call::WriteLock {
                    scope: "s_lock_".into(),
                    lock,
                },
                Call::DeleteLocks {
                    scope: "s_lock_".into(),
                },
            ]
        );
        assert_eq!(provider.inner().locker("s_lock_").claim_count(), 0);
    }
}
