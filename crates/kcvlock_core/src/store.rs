//! Store wrapper that routes locks through a scoped [`Locker`].

use crate::locker::Locker;
use crate::transaction::ExpectedValueCheckingTransaction;
use kcvlock_storage::{
    Entry, EntryList, KeyColumn, KeyColumnValueStore, KeySliceQuery, StaticBuffer, StorageError,
    StorageResult,
};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// A physical store paired with the lock primitive of its scope.
///
/// - `acquire_lock` claims the key/column through the locker and records the
///   expected value on the transaction
/// - `mutate` prepares the transaction first, then writes through the
///   consistency transaction when locks are held and through the data
///   transaction otherwise
/// - `get_slice` reads through the data transaction without locking
pub struct ExpectedValueCheckingStore<S: KeyColumnValueStore> {
    manager_id: Uuid,
    store: Arc<S>,
    locker: Arc<dyn Locker>,
    lock_scope: String,
}

impl<S: KeyColumnValueStore> ExpectedValueCheckingStore<S> {
    pub(crate) fn new(
        manager_id: Uuid,
        store: Arc<S>,
        locker: Arc<dyn Locker>,
        lock_scope: String,
    ) -> Self {
        Self {
            manager_id,
            store,
            locker,
            lock_scope,
        }
    }

    /// The wrapped physical store.
    pub fn backing_store(&self) -> &Arc<S> {
        &self.store
    }

    /// The lock primitive guarding this store's keys.
    pub fn locker(&self) -> &Arc<dyn Locker> {
        &self.locker
    }

    /// The lock scope the locker was obtained for.
    #[must_use]
    pub fn lock_scope(&self) -> &str {
        &self.lock_scope
    }

    fn ensure_owned(&self, txh: &ExpectedValueCheckingTransaction<S>) -> StorageResult<()> {
        if txh.manager_id() != self.manager_id {
            return Err(StorageError::invalid_transaction(format!(
                "transaction {} was not opened by the manager of store {}",
                txh.requester(),
                self.store.name()
            )));
        }
        Ok(())
    }
}

impl<S: KeyColumnValueStore> KeyColumnValueStore for ExpectedValueCheckingStore<S> {
    type Transaction = ExpectedValueCheckingTransaction<S>;

    fn name(&self) -> &str {
        self.store.name()
    }

    fn get_slice(
        &self,
        query: &KeySliceQuery,
        txh: &ExpectedValueCheckingTransaction<S>,
    ) -> StorageResult<EntryList> {
        self.ensure_owned(txh)?;
        self.store.get_slice(query, txh.data_transaction())
    }

    fn mutate(
        &self,
        key: &StaticBuffer,
        additions: &[Entry],
        deletions: &[StaticBuffer],
        txh: &ExpectedValueCheckingTransaction<S>,
    ) -> StorageResult<()> {
        self.ensure_owned(txh)?;
        if txh.prepare_for_mutations()? {
            self.store
                .mutate(key, additions, deletions, txh.consistent_transaction())
        } else {
            self.store
                .mutate(key, additions, deletions, txh.data_transaction())
        }
    }

    fn acquire_lock(
        &self,
        key: &StaticBuffer,
        column: &StaticBuffer,
        expected: Option<&StaticBuffer>,
        txh: &ExpectedValueCheckingTransaction<S>,
    ) -> StorageResult<()> {
        self.ensure_owned(txh)?;
        let lock_id = KeyColumn::new(key.clone(), column.clone());
        txh.register_lock(self, lock_id, expected.cloned())
    }

    fn close(&self) -> StorageResult<()> {
        self.store.close()
    }
}

impl<S: KeyColumnValueStore> fmt::Debug for ExpectedValueCheckingStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpectedValueCheckingStore")
            .field("name", &self.store.name())
            .field("lock_scope", &self.lock_scope)
            .finish_non_exhaustive()
    }
}
