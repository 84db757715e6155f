//! In-memory key-column-value backend for testing.

use crate::backend::{KeyColumnValueStore, StoreManager, StoreTransaction};
use crate::error::{StorageError, StorageResult};
use crate::features::StoreFeatures;
use crate::options::{Options, TransactionConfig};
use crate::types::{Entry, EntryList, KeyRange, KeySliceQuery, MutationBatch, StaticBuffer};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

type Row = BTreeMap<StaticBuffer, StaticBuffer>;

/// Option name the default descriptor reports for key-consistent transactions.
pub const CONSISTENCY_OPTION: &str = "consistency";

/// An in-memory backend.
///
/// This backend stores all data in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral stores that don't need persistence
///
/// Mutations are applied immediately; transactions only track their own
/// completion state and provide no isolation.
///
/// # Example
///
/// ```rust
/// use kcvlock_storage::{
///     Entry, InMemoryStoreManager, KeyColumnValueStore, KeySliceQuery, SliceQuery,
///     StoreManager, TransactionConfig,
/// };
///
/// let manager = InMemoryStoreManager::new();
/// let store = manager.open_database("vertices").unwrap();
/// let tx = manager.begin_transaction(&TransactionConfig::new()).unwrap();
///
/// let key = bytes::Bytes::from_static(b"k1");
/// store.mutate(&key, &[Entry::new(&b"c"[..], &b"v"[..])], &[], &tx).unwrap();
///
/// let query = KeySliceQuery::new(key, SliceQuery::new(&b"a"[..], &b"z"[..]));
/// assert_eq!(store.get_slice(&query, &tx).unwrap().len(), 1);
/// ```
#[derive(Debug)]
pub struct InMemoryStoreManager {
    name: String,
    features: StoreFeatures,
    stores: RwLock<HashMap<String, Arc<InMemoryStore>>>,
    closed: AtomicBool,
}

impl Default for InMemoryStoreManager {
    fn default() -> Self {
        Self::with_features(Self::default_features())
    }
}

impl InMemoryStoreManager {
    /// Creates a new empty backend with the default descriptor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new empty backend reporting `features`.
    #[must_use]
    pub fn with_features(features: StoreFeatures) -> Self {
        Self {
            name: "inmemory".to_owned(),
            features,
            stores: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// The descriptor used by [`InMemoryStoreManager::new`].
    ///
    /// Reports no native locking and a key-consistent mode selected by
    /// `consistency = "strong"`.
    #[must_use]
    pub fn default_features() -> StoreFeatures {
        StoreFeatures::builder()
            .ordered_scan(true)
            .unordered_scan(true)
            .batch_mutation(true)
            .key_ordered(true)
            .locking(false)
            .key_consistent(Options::new().with(CONSISTENCY_OPTION, "strong"))
            .build()
    }

    /// Names of the stores opened so far.
    #[must_use]
    pub fn store_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

impl StoreManager for InMemoryStoreManager {
    type Transaction = InMemoryTransaction;
    type Store = InMemoryStore;

    fn open_database(&self, name: &str) -> StorageResult<Arc<InMemoryStore>> {
        self.ensure_open()?;
        if name.is_empty() {
            return Err(StorageError::InvalidArgument(
                "store name must not be empty".into(),
            ));
        }
        let mut stores = self.stores.write();
        let store = stores
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(InMemoryStore::new(name)));
        Ok(Arc::clone(store))
    }

    fn begin_transaction(&self, config: &TransactionConfig) -> StorageResult<InMemoryTransaction> {
        self.ensure_open()?;
        Ok(InMemoryTransaction::new(config.clone()))
    }

    fn mutate_many(&self, mutations: &MutationBatch, txh: &InMemoryTransaction) -> StorageResult<()> {
        self.ensure_open()?;
        txh.ensure_active()?;

        // Resolve every store first so a bad name leaves nothing applied
        let stores = self.stores.read();
        let mut targets = Vec::with_capacity(mutations.len());
        for (name, rows) in mutations {
            let store = stores
                .get(name)
                .ok_or_else(|| StorageError::NotFound { name: name.clone() })?;
            targets.push((store, rows));
        }

        for (store, rows) in targets {
            for (key, mutation) in rows {
                store.apply(key, &mutation.additions, &mutation.deletions);
            }
        }
        debug!(stores = mutations.len(), "applied mutation batch");
        Ok(())
    }

    fn close(&self) -> StorageResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn clear_storage(&self) -> StorageResult<()> {
        self.ensure_open()?;
        for store in self.stores.read().values() {
            store.clear();
        }
        Ok(())
    }

    fn local_key_partition(&self) -> StorageResult<Vec<KeyRange>> {
        if !self.features.has_local_key_partition() {
            return Err(StorageError::Unsupported(
                "local key partition is not available".into(),
            ));
        }
        Ok(vec![KeyRange::new(StaticBuffer::new(), vec![0xffu8; 8])])
    }

    fn features(&self) -> StoreFeatures {
        self.features.clone()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A single in-memory table.
#[derive(Debug)]
pub struct InMemoryStore {
    name: String,
    rows: RwLock<BTreeMap<StaticBuffer, Row>>,
}

impl InMemoryStore {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            rows: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of non-empty rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.read().len()
    }

    /// Reads one cell directly, bypassing transactions.
    #[must_use]
    pub fn get(&self, key: &[u8], column: &[u8]) -> Option<StaticBuffer> {
        self.rows.read().get(key).and_then(|row| row.get(column).cloned())
    }

    fn apply(&self, key: &StaticBuffer, additions: &[Entry], deletions: &[StaticBuffer]) {
        let mut rows = self.rows.write();
        let row = rows.entry(key.clone()).or_default();
        for column in deletions {
            row.remove(column);
        }
        for entry in additions {
            row.insert(entry.column.clone(), entry.value.clone());
        }
        if row.is_empty() {
            rows.remove(key);
        }
    }

    fn clear(&self) {
        self.rows.write().clear();
    }
}

impl KeyColumnValueStore for InMemoryStore {
    type Transaction = InMemoryTransaction;

    fn name(&self) -> &str {
        &self.name
    }

    fn get_slice(&self, query: &KeySliceQuery, txh: &InMemoryTransaction) -> StorageResult<EntryList> {
        txh.ensure_active()?;
        let rows = self.rows.read();
        let Some(row) = rows.get(&query.key) else {
            return Ok(Vec::new());
        };
        if query.slice.start >= query.slice.end {
            return Ok(Vec::new());
        }
        let limit = query.slice.limit.unwrap_or(usize::MAX);
        Ok(row
            .range(query.slice.start.clone()..query.slice.end.clone())
            .take(limit)
            .map(|(column, value)| Entry::new(column.clone(), value.clone()))
            .collect())
    }

    fn mutate(
        &self,
        key: &StaticBuffer,
        additions: &[Entry],
        deletions: &[StaticBuffer],
        txh: &InMemoryTransaction,
    ) -> StorageResult<()> {
        txh.ensure_active()?;
        self.apply(key, additions, deletions);
        Ok(())
    }

    fn acquire_lock(
        &self,
        _key: &StaticBuffer,
        _column: &StaticBuffer,
        _expected: Option<&StaticBuffer>,
        _txh: &InMemoryTransaction,
    ) -> StorageResult<()> {
        Err(StorageError::Unsupported(format!(
            "store {} has no native locking",
            self.name
        )))
    }

    fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Completion state of an [`InMemoryTransaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InMemoryTxState {
    /// Open for reads and writes.
    Active,
    /// Committed.
    Committed,
    /// Rolled back.
    RolledBack,
}

/// Transaction handle of the in-memory backend.
#[derive(Debug)]
pub struct InMemoryTransaction {
    id: Uuid,
    config: TransactionConfig,
    state: Mutex<InMemoryTxState>,
}

impl InMemoryTransaction {
    fn new(config: TransactionConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            state: Mutex::new(InMemoryTxState::Active),
        }
    }

    /// Unique transaction identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current completion state.
    #[must_use]
    pub fn state(&self) -> InMemoryTxState {
        *self.state.lock()
    }

    fn ensure_active(&self) -> StorageResult<()> {
        match *self.state.lock() {
            InMemoryTxState::Active => Ok(()),
            InMemoryTxState::Committed => Err(StorageError::invalid_transaction(
                "transaction already committed",
            )),
            InMemoryTxState::RolledBack => Err(StorageError::invalid_transaction(
                "transaction already rolled back",
            )),
        }
    }

    fn finish(&self, next: InMemoryTxState) -> StorageResult<()> {
        let mut state = self.state.lock();
        if *state != InMemoryTxState::Active {
            return Err(StorageError::invalid_transaction(format!(
                "transaction {} is not active ({:?})",
                self.id, *state
            )));
        }
        *state = next;
        Ok(())
    }
}

impl StoreTransaction for InMemoryTransaction {
    fn config(&self) -> &TransactionConfig {
        &self.config
    }

    fn commit(&self) -> StorageResult<()> {
        self.finish(InMemoryTxState::Committed)
    }

    fn rollback(&self) -> StorageResult<()> {
        self.finish(InMemoryTxState::RolledBack)
    }
}
