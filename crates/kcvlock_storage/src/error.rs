//! Error types for storage operations.
//!
//! A single taxonomy is shared by physical backends and by the locking layer
//! built on top of them, so a lock-enforcing manager can stand in for a raw
//! backend without changing the caller's error handling.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The backend failed internally.
    #[error("backend error: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
        /// Whether the operation may succeed if retried.
        temporary: bool,
    },

    /// The store or manager is closed.
    #[error("storage is closed")]
    Closed,

    /// The backend does not support the requested operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// An argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A named database does not exist.
    #[error("database not found: {name}")]
    NotFound {
        /// Name of the database.
        name: String,
    },

    /// A lock could not be secured within the allotted time.
    #[error("timed out after {waited:?} waiting for lock {lock}")]
    LockTimeout {
        /// Display form of the contended lock (or operation).
        lock: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// A locking rule was violated or a held lock was lost.
    #[error("locking failure: {message}")]
    LockFailure {
        /// Description of the failure.
        message: String,
    },

    /// A locked column no longer holds the value observed when the lock was taken.
    #[error("expected value mismatch for {lock} in store {store}: expected={expected} actual={actual}")]
    ExpectedValueMismatch {
        /// Name of the store holding the column.
        store: String,
        /// Display form of the locked key/column.
        lock: String,
        /// Values expected, formatted.
        expected: String,
        /// Values observed, formatted.
        actual: String,
    },

    /// A transaction handle was used incorrectly.
    #[error("invalid transaction: {message}")]
    InvalidTransaction {
        /// Description of the misuse.
        message: String,
    },
}

impl StorageError {
    /// Creates a backend error that may succeed on retry.
    pub fn temporary(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            temporary: true,
        }
    }

    /// Creates a backend error that will not succeed on retry.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            temporary: false,
        }
    }

    /// Creates a locking failure error.
    pub fn lock_failure(message: impl Into<String>) -> Self {
        Self::LockFailure {
            message: message.into(),
        }
    }

    /// Creates an invalid transaction error.
    pub fn invalid_transaction(message: impl Into<String>) -> Self {
        Self::InvalidTransaction {
            message: message.into(),
        }
    }

    /// Returns true if retrying the same operation may succeed.
    pub fn is_temporary(&self) -> bool {
        match self {
            StorageError::Backend { temporary, .. } => *temporary,
            StorageError::LockTimeout { .. } => true,
            _ => false,
        }
    }

    /// Returns true for a concurrent modification of a locked column.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::ExpectedValueMismatch { .. })
    }

    /// Returns true if exclusivity could not be secured or was lost.
    pub fn is_lock_failure(&self) -> bool {
        matches!(
            self,
            StorageError::LockTimeout { .. } | StorageError::LockFailure { .. }
        )
    }

    /// Returns true for programming errors such as foreign transaction handles.
    pub fn is_misuse(&self) -> bool {
        matches!(self, StorageError::InvalidTransaction { .. })
    }
}
