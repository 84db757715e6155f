//! Lock primitives scoped to a store.
//!
//! A [`LockerProvider`] hands out one [`Locker`] per lock scope. The locking
//! layer only relies on the contract below; how exclusivity is obtained
//! (leases, quorum claims, an in-process table) is up to the implementation.
//!
//! ## Contract
//!
//! - `write_lock` claims a key/column for a requester, waiting at most the
//!   requester's `max_wait` before failing with
//!   [`StorageError::LockTimeout`](kcvlock_storage::StorageError::LockTimeout)
//! - `check_locks` confirms every claim of the requester is still held,
//!   failing once `deadline` has passed
//! - `delete_locks` releases every claim of the requester and is safe to
//!   call when nothing is held

mod local;

pub use local::{LocalLocker, LocalLockerProvider};

use kcvlock_storage::{KeyColumn, StorageResult};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// The transaction on whose behalf locks are claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockRequester {
    /// Unique identity of the requesting transaction.
    pub id: Uuid,
    /// How long a single claim may wait for a contended lock.
    pub max_wait: Duration,
}

impl LockRequester {
    /// Creates a requester with a fresh identity.
    #[must_use]
    pub fn new(max_wait: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            max_wait,
        }
    }
}

impl fmt::Display for LockRequester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req:{}", self.id)
    }
}

/// A mutual-exclusion primitive over the key/columns of one lock scope.
pub trait Locker: Send + Sync {
    /// Claims `lock_id` for `requester`. Re-claiming an owned lock succeeds.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` if the lock stays held by another requester for
    /// longer than `requester.max_wait`.
    fn write_lock(&self, lock_id: &KeyColumn, requester: &LockRequester) -> StorageResult<()>;

    /// Verifies that every claim of `requester` is still held.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` once `deadline` has passed and `LockFailure` if
    /// a claim was lost.
    fn check_locks(&self, requester: &LockRequester, deadline: Instant) -> StorageResult<()>;

    /// Releases every claim of `requester`.
    ///
    /// # Errors
    ///
    /// Returns an error if the release cannot be recorded.
    fn delete_locks(&self, requester: &LockRequester) -> StorageResult<()>;
}

/// Source of lock primitives, one per lock scope.
pub trait LockerProvider: Send + Sync {
    /// Returns the locker for `scope`.
    ///
    /// # Errors
    ///
    /// Returns an error if the primitive cannot be allocated.
    fn get_locker(&self, scope: &str) -> StorageResult<Arc<dyn Locker>>;
}

impl<P: LockerProvider> LockerProvider for Arc<P> {
    fn get_locker(&self, scope: &str) -> StorageResult<Arc<dyn Locker>> {
        (**self).get_locker(scope)
    }
}
