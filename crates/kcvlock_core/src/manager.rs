//! Coordinating store manager.

use crate::config::LockingConfig;
use crate::locker::LockerProvider;
use crate::store::ExpectedValueCheckingStore;
use crate::transaction::ExpectedValueCheckingTransaction;
use kcvlock_storage::{
    KeyColumnValueStore, KeyRange, MutationBatch, Options, StorageError, StorageResult,
    StoreFeatures, StoreManager, StoreTransaction, TransactionConfig,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// A [`StoreManager`] that makes a lock-less backend behave as if it had
/// mutual exclusion and check-then-act safety.
///
/// The manager provides:
/// - One [`ExpectedValueCheckingStore`] per database name, cached for the
///   manager's lifetime
/// - Transaction pairs: a data transaction with the caller's configuration
///   and a consistency transaction forced to the backend's key-consistent
///   options
/// - A single mutation path that verifies locks and expected values before
///   any data reaches the backend
///
/// ## Example
///
/// ```rust
/// use kcvlock_core::{ExpectedValueCheckingStoreManager, LocalLockerProvider, LockingConfig};
/// use kcvlock_storage::{InMemoryStoreManager, StoreManager, TransactionConfig};
///
/// let manager = ExpectedValueCheckingStoreManager::new(
///     InMemoryStoreManager::new(),
///     LocalLockerProvider::default(),
///     LockingConfig::default(),
/// )
/// .unwrap();
///
/// let _edges = manager.open_database("edges").unwrap();
/// let _tx = manager.begin_transaction(&TransactionConfig::new()).unwrap();
/// assert!(manager.features().has_locking());
/// ```
pub struct ExpectedValueCheckingStoreManager<B: StoreManager> {
    id: Uuid,
    backend: B,
    locker_provider: Arc<dyn LockerProvider>,
    lock_store_suffix: String,
    max_read_time: Duration,
    backend_features: StoreFeatures,
    key_consistent_options: Options,
    stores: Mutex<HashMap<String, Arc<ExpectedValueCheckingStore<B::Store>>>>,
}

impl<B: StoreManager> ExpectedValueCheckingStoreManager<B> {
    /// Wraps `backend`, taking lock primitives from `locker_provider`.
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` if the backend offers no key-consistent
    /// transaction mode: lock bookkeeping would have no consistent place
    /// to run.
    pub fn new(
        backend: B,
        locker_provider: impl LockerProvider + 'static,
        config: LockingConfig,
    ) -> StorageResult<Self> {
        let backend_features = backend.features();
        let key_consistent_options = backend_features
            .key_consistent_tx_config()
            .cloned()
            .ok_or_else(|| {
                StorageError::Unsupported(format!(
                    "backend {} has no key-consistent transactions",
                    backend.name()
                ))
            })?;

        Ok(Self {
            id: Uuid::new_v4(),
            backend,
            locker_provider: Arc::new(locker_provider),
            lock_store_suffix: config.lock_store_suffix,
            max_read_time: config.max_read_time,
            backend_features,
            key_consistent_options,
            stores: Mutex::new(HashMap::new()),
        })
    }

    /// Unique identity stamped on every transaction this manager creates.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Upper bound on lock acquisition and verification.
    #[must_use]
    pub fn max_read_time(&self) -> Duration {
        self.max_read_time
    }

    /// Number of cached database handles.
    #[must_use]
    pub fn open_store_count(&self) -> usize {
        self.stores.lock().len()
    }

    /// Rejects transactions that this manager did not create.
    fn ensure_owned(&self, txh: &ExpectedValueCheckingTransaction<B::Store>) -> StorageResult<()> {
        if txh.manager_id() != self.id {
            return Err(StorageError::invalid_transaction(format!(
                "transaction {} belongs to manager {}, not {}",
                txh.requester(),
                txh.manager_id(),
                self.id
            )));
        }
        Ok(())
    }
}

impl<B: StoreManager> StoreManager for ExpectedValueCheckingStoreManager<B> {
    type Transaction = ExpectedValueCheckingTransaction<B::Store>;
    type Store = ExpectedValueCheckingStore<B::Store>;

    fn open_database(&self, name: &str) -> StorageResult<Arc<Self::Store>> {
        if name.is_empty() {
            return Err(StorageError::InvalidArgument(
                "database name must not be empty".into(),
            ));
        }

        // Held across the whole open so concurrent first opens build one handle
        let mut stores = self.stores.lock();
        if let Some(store) = stores.get(name) {
            return Ok(Arc::clone(store));
        }

        let store = self.backend.open_database(name)?;
        let lock_scope = format!("{}{}", store.name(), self.lock_store_suffix);
        let locker = self.locker_provider.get_locker(&lock_scope)?;
        debug!(database = name, %lock_scope, "opened lock-checking store");

        let wrapped = Arc::new(ExpectedValueCheckingStore::new(
            self.id, store, locker, lock_scope,
        ));
        stores.insert(name.to_owned(), Arc::clone(&wrapped));
        Ok(wrapped)
    }

    fn begin_transaction(&self, config: &TransactionConfig) -> StorageResult<Self::Transaction> {
        let data_tx = self.backend.begin_transaction(config)?;

        let consistent_config = TransactionConfig::builder_from(config)
            .custom_options(Options::merged(
                &self.key_consistent_options,
                &config.custom_options,
            ))
            .build();
        let consistent_tx = match self.backend.begin_transaction(&consistent_config) {
            Ok(tx) => tx,
            Err(e) => {
                if let Err(rollback_err) = data_tx.rollback() {
                    warn!(error = %rollback_err, "failed to roll back data transaction of incomplete pair");
                }
                return Err(e);
            }
        };

        let tx = ExpectedValueCheckingTransaction::new(
            self.id,
            data_tx,
            consistent_tx,
            self.max_read_time,
        );
        debug!(requester = %tx.requester(), "began transaction pair");
        Ok(tx)
    }

    fn mutate_many(&self, mutations: &MutationBatch, txh: &Self::Transaction) -> StorageResult<()> {
        self.ensure_owned(txh)?;
        txh.prepare_for_mutations()?;
        debug!(requester = %txh.requester(), stores = mutations.len(), "forwarding mutation batch");
        self.backend.mutate_many(mutations, txh.data_transaction())
    }

    fn close(&self) -> StorageResult<()> {
        let result = self.backend.close();
        self.stores.lock().clear();
        result
    }

    fn clear_storage(&self) -> StorageResult<()> {
        self.backend.clear_storage()
    }

    fn local_key_partition(&self) -> StorageResult<Vec<KeyRange>> {
        self.backend.local_key_partition()
    }

    /// The backend's descriptor with locking reported as available.
    fn features(&self) -> StoreFeatures {
        self.backend_features.to_builder().locking(true).build()
    }

    fn name(&self) -> &str {
        self.backend.name()
    }
}

impl<B: StoreManager> fmt::Debug for ExpectedValueCheckingStoreManager<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpectedValueCheckingStoreManager")
            .field("id", &self.id)
            .field("backend", &self.backend.name())
            .field("lock_store_suffix", &self.lock_store_suffix)
            .field("max_read_time", &self.max_read_time)
            .field("open_stores", &self.open_store_count())
            .finish_non_exhaustive()
    }
}
