//! # kcvlock Storage
//!
//! Key-column-value backend traits and implementations for kcvlock.
//!
//! This crate provides the lowest-level storage abstraction: named stores of
//! rows, each row holding ordered column/value cells. Backends may be weakly
//! consistent and need not offer locking; the `kcvlock_core` crate layers
//! lock enforcement on top of any [`StoreManager`].
//!
//! ## Design Principles
//!
//! - Backends are polymorphic through the [`StoreManager`] trait family
//! - Every layer shares one error taxonomy ([`StorageError`])
//! - Must be `Send + Sync` for concurrent access
//! - Key-consistent transaction options are advertised through [`StoreFeatures`]
//!
//! ## Available Backends
//!
//! - [`InMemoryStoreManager`] - For testing and ephemeral storage
//!
//! ## Example
//!
//! ```rust
//! use kcvlock_storage::{InMemoryStoreManager, StoreManager, TransactionConfig};
//!
//! let manager = InMemoryStoreManager::new();
//! let _store = manager.open_database("edges").unwrap();
//! let _tx = manager.begin_transaction(&TransactionConfig::new()).unwrap();
//! assert!(manager.features().is_key_consistent());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod features;
mod memory;
mod options;
mod types;

pub use backend::{KeyColumnValueStore, StoreManager, StoreTransaction};
pub use error::{StorageError, StorageResult};
pub use features::{StoreFeatures, StoreFeaturesBuilder};
pub use memory::{
    InMemoryStore, InMemoryStoreManager, InMemoryTransaction, InMemoryTxState, CONSISTENCY_OPTION,
};
pub use options::{OptionValue, Options, TransactionConfig, TransactionConfigBuilder};
pub use types::{
    column_successor, format_values, hex, Entry, EntryList, KcvMutation, KeyColumn, KeyRange,
    KeySliceQuery, MutationBatch, SliceQuery, StaticBuffer,
};
