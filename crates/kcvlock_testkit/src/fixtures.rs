//! Ready-made managers and buffers for tests.

use crate::recording::{CallLog, RecordingLockerProvider, RecordingStoreManager};
use bytes::Bytes;
use kcvlock_core::{ExpectedValueCheckingStoreManager, LocalLockerProvider, LockingConfig};
use kcvlock_storage::{InMemoryStoreManager, StaticBuffer, StoreFeatures};
use std::sync::{Arc, Once};
use std::time::Duration;

/// Locking manager over the in-memory backend.
pub type MemoryLockingManager = ExpectedValueCheckingStoreManager<InMemoryStoreManager>;

/// Locking manager over a recorded in-memory backend.
pub type RecordedLockingManager =
    ExpectedValueCheckingStoreManager<RecordingStoreManager<InMemoryStoreManager>>;

/// Copies `s` into a buffer.
pub fn buf(s: &str) -> StaticBuffer {
    Bytes::copy_from_slice(s.as_bytes())
}

/// Locking configuration with short waits, so contention fails fast.
pub fn test_config() -> LockingConfig {
    LockingConfig::new()
        .max_read_time(Duration::from_millis(200))
        .lock_expiry(Duration::from_secs(30))
}

/// A locking manager over a fresh in-memory backend.
///
/// Returns the locker provider too, so tests can inspect lock claims.
pub fn memory_manager() -> (Arc<LocalLockerProvider>, MemoryLockingManager) {
    let config = test_config();
    let lockers = Arc::new(LocalLockerProvider::from_config(&config));
    let manager = ExpectedValueCheckingStoreManager::new(
        InMemoryStoreManager::new(),
        Arc::clone(&lockers),
        config,
    )
    .expect("in-memory backend is key-consistent");
    (lockers, manager)
}

/// A locking manager whose backend and lockers record into one log.
pub struct Recorded {
    /// Calls made to the backend and the lockers.
    pub log: CallLog,
    /// The recording locker provider handed to the manager.
    pub lockers: Arc<RecordingLockerProvider>,
    /// The manager under test.
    pub manager: RecordedLockingManager,
}

impl Recorded {
    /// The recording backend behind the manager.
    pub fn backend(&self) -> &RecordingStoreManager<InMemoryStoreManager> {
        self.manager.backend()
    }
}

/// A recorded manager over an in-memory backend with default features.
pub fn recorded_manager() -> Recorded {
    recorded_manager_with(InMemoryStoreManager::default_features())
}

/// A recorded manager over an in-memory backend reporting `features`.
///
/// # Panics
///
/// Panics if `features` is not key-consistent.
pub fn recorded_manager_with(features: StoreFeatures) -> Recorded {
    let config = test_config();
    let log = CallLog::new();
    let backend =
        RecordingStoreManager::with_log(InMemoryStoreManager::with_features(features), log.clone());
    let lockers = Arc::new(RecordingLockerProvider::new(
        LocalLockerProvider::from_config(&config),
        log.clone(),
    ));
    let manager = ExpectedValueCheckingStoreManager::new(backend, Arc::clone(&lockers), config)
        .expect("features must be key-consistent");
    Recorded {
        log,
        lockers,
        manager,
    }
}

/// Installs a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
