//! Key-column-value backend trait definitions.

use crate::error::StorageResult;
use crate::features::StoreFeatures;
use crate::options::TransactionConfig;
use crate::types::{Entry, EntryList, KeyRange, KeySliceQuery, MutationBatch, StaticBuffer};
use std::sync::Arc;

/// A physical transaction handle opened by a [`StoreManager`].
///
/// Handles are shared by reference across store calls, so completion
/// goes through `&self`.
pub trait StoreTransaction: Send + Sync {
    /// The configuration the transaction was opened with.
    fn config(&self) -> &TransactionConfig;

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or the transaction already completed.
    fn commit(&self) -> StorageResult<()>;

    /// Rolls the transaction back.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or the transaction already completed.
    fn rollback(&self) -> StorageResult<()>;
}

/// One named table of rows, each row holding ordered column/value cells.
///
/// # Invariants
///
/// - `get_slice` returns entries in column order, within the query bounds
/// - `mutate` applies deletions before additions for the same row
/// - Stores must be `Send + Sync` for concurrent access
pub trait KeyColumnValueStore: Send + Sync {
    /// Transaction handle type accepted by this store.
    type Transaction: StoreTransaction;

    /// The store's name as known to the backend.
    fn name(&self) -> &str;

    /// Reads the columns of one row that fall inside the query's slice.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get_slice(&self, query: &KeySliceQuery, txh: &Self::Transaction)
        -> StorageResult<EntryList>;

    /// Deletes `deletions` and then writes `additions` on row `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn mutate(
        &self,
        key: &StaticBuffer,
        additions: &[Entry],
        deletions: &[StaticBuffer],
        txh: &Self::Transaction,
    ) -> StorageResult<()>;

    /// Locks `key`/`column` for the transaction, expecting `expected` as its
    /// current value (`None` meaning absent).
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be taken or the store has no
    /// locking support.
    fn acquire_lock(
        &self,
        key: &StaticBuffer,
        column: &StaticBuffer,
        expected: Option<&StaticBuffer>,
        txh: &Self::Transaction,
    ) -> StorageResult<()>;

    /// Releases resources held by the store.
    ///
    /// # Errors
    ///
    /// Returns an error if closing fails.
    fn close(&self) -> StorageResult<()>;
}

/// Entry point of a key-column-value backend.
///
/// # Implementors
///
/// - [`super::InMemoryStoreManager`] - For testing and ephemeral use
pub trait StoreManager: Send + Sync {
    /// Transaction handle type.
    type Transaction: StoreTransaction;
    /// Store handle type.
    type Store: KeyColumnValueStore<Transaction = Self::Transaction>;

    /// Opens (creating if needed) the named store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened.
    fn open_database(&self, name: &str) -> StorageResult<Arc<Self::Store>>;

    /// Opens a transaction with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot be opened.
    fn begin_transaction(&self, config: &TransactionConfig) -> StorageResult<Self::Transaction>;

    /// Applies a batch of row mutations across stores.
    ///
    /// # Errors
    ///
    /// Returns an error if any part of the batch cannot be applied.
    fn mutate_many(&self, mutations: &MutationBatch, txh: &Self::Transaction)
        -> StorageResult<()>;

    /// Closes the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if closing fails.
    fn close(&self) -> StorageResult<()>;

    /// Deletes all data in every store.
    ///
    /// # Errors
    ///
    /// Returns an error if clearing fails.
    fn clear_storage(&self) -> StorageResult<()>;

    /// Key ranges held by the local node.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Unsupported`] if the backend cannot
    /// enumerate its partitions.
    fn local_key_partition(&self) -> StorageResult<Vec<KeyRange>>;

    /// The backend's capability descriptor.
    fn features(&self) -> StoreFeatures;

    /// The backend's name.
    fn name(&self) -> &str;
}

impl<M: StoreManager> StoreManager for Arc<M> {
    type Transaction = M::Transaction;
    type Store = M::Store;

    fn open_database(&self, name: &str) -> StorageResult<Arc<Self::Store>> {
        (**self).open_database(name)
    }

    fn begin_transaction(&self, config: &TransactionConfig) -> StorageResult<Self::Transaction> {
        (**self).begin_transaction(config)
    }

    fn mutate_many(
        &self,
        mutations: &MutationBatch,
        txh: &Self::Transaction,
    ) -> StorageResult<()> {
        (**self).mutate_many(mutations, txh)
    }

    fn close(&self) -> StorageResult<()> {
        (**self).close()
    }

    fn clear_storage(&self) -> StorageResult<()> {
        (**self).clear_storage()
    }

    fn local_key_partition(&self) -> StorageResult<Vec<KeyRange>> {
        (**self).local_key_partition()
    }

    fn features(&self) -> StoreFeatures {
        (**self).features()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
