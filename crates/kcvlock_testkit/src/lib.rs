//! # kcvlock Testkit
//!
//! Test utilities for kcvlock.
//!
//! This crate provides:
//! - Recording wrappers for backends and lockers with a shared call log
//! - Failure injection for transaction opens and slice reads
//! - Ready-made locking managers over the in-memory backend
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use kcvlock_testkit::prelude::*;
//! use kcvlock_storage::{StoreManager, TransactionConfig};
//!
//! let recorded = recorded_manager();
//! recorded.manager.begin_transaction(&TransactionConfig::new()).unwrap();
//! assert_eq!(recorded.log.count(|c| matches!(c, Call::Begin { .. })), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod recording;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::recording::*;
}

pub use fixtures::*;
pub use generators::*;
pub use recording::*;
