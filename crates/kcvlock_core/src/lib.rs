//! # kcvlock Core
//!
//! Lock coordination for key-column-value stores that have no native
//! compare-and-swap.
//!
//! This crate provides:
//! - [`ExpectedValueCheckingStoreManager`], a drop-in [`StoreManager`] that
//!   enforces locking on top of any backend
//! - [`ExpectedValueCheckingTransaction`], pairing a data transaction with a
//!   key-consistent transaction used for lock bookkeeping
//! - [`ExpectedValueCheckingStore`], routing lock claims through a scoped
//!   [`Locker`]
//! - [`LocalLockerProvider`], an in-process lock table
//!
//! ## Key Invariants
//!
//! - At most one store handle per database name per manager
//! - Every transaction opens both a data and a consistency transaction
//! - Lock and expected-value verification completes before any mutation
//!   reaches the backend
//! - Verification runs once per transaction and is bounded by `max_read_time`
//!
//! ## Example
//!
//! ```rust
//! use kcvlock_core::{ExpectedValueCheckingStoreManager, LocalLockerProvider, LockingConfig};
//! use kcvlock_storage::{
//!     Entry, InMemoryStoreManager, KeyColumnValueStore, StoreManager, StoreTransaction,
//!     TransactionConfig,
//! };
//!
//! let manager = ExpectedValueCheckingStoreManager::new(
//!     InMemoryStoreManager::new(),
//!     LocalLockerProvider::default(),
//!     LockingConfig::default(),
//! )
//! .unwrap();
//!
//! let store = manager.open_database("vertices").unwrap();
//! let tx = manager.begin_transaction(&TransactionConfig::new()).unwrap();
//!
//! let key = bytes::Bytes::from_static(b"v1");
//! let column = bytes::Bytes::from_static(b"name");
//! store.acquire_lock(&key, &column, None, &tx).unwrap();
//! store.mutate(&key, &[Entry::new(column, &b"alice"[..])], &[], &tx).unwrap();
//! tx.commit().unwrap();
//! ```
//!
//! [`StoreManager`]: kcvlock_storage::StoreManager

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod locker;
mod manager;
mod retry;
mod store;
mod transaction;

pub use config::{LockingConfig, DEFAULT_LOCK_STORE_SUFFIX};
pub use locker::{LocalLocker, LocalLockerProvider, LockRequester, Locker, LockerProvider};
pub use manager::ExpectedValueCheckingStoreManager;
pub use store::ExpectedValueCheckingStore;
pub use transaction::{ExpectedValueCheckingTransaction, TransactionState};
