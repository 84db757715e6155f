//! In-process lock table.

use super::{LockRequester, Locker, LockerProvider};
use crate::config::LockingConfig;
use crate::retry::deadline_after;
use kcvlock_storage::{KeyColumn, StorageError, StorageResult};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct Claim {
    owner: Uuid,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct LockTable {
    claims: HashMap<KeyColumn, Claim>,
    held: HashMap<Uuid, BTreeSet<KeyColumn>>,
}

/// A locker that arbitrates claims between threads of one process.
///
/// Claims are leases: a claim not released within the configured expiry
/// may be taken over by another requester, after which the original owner's
/// `check_locks` fails.
///
/// # Thread Safety
///
/// Waiters block on a condition variable and are woken on every release.
#[derive(Debug)]
pub struct LocalLocker {
    scope: String,
    expiry: Duration,
    table: Mutex<LockTable>,
    released: Condvar,
}

impl LocalLocker {
    /// Creates an empty locker for `scope`.
    #[must_use]
    pub fn new(scope: impl Into<String>, expiry: Duration) -> Self {
        Self {
            scope: scope.into(),
            expiry,
            table: Mutex::new(LockTable::default()),
            released: Condvar::new(),
        }
    }

    /// The lock scope this locker arbitrates.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Number of claims currently recorded, expired ones included.
    #[must_use]
    pub fn claim_count(&self) -> usize {
        self.table.lock().claims.len()
    }

    /// Returns true if `requester` currently holds `lock_id`.
    #[must_use]
    pub fn is_held_by(&self, lock_id: &KeyColumn, requester: &LockRequester) -> bool {
        let table = self.table.lock();
        table
            .claims
            .get(lock_id)
            .is_some_and(|c| c.owner == requester.id && c.expires_at > Instant::now())
    }
}

impl Locker for LocalLocker {
    fn write_lock(&self, lock_id: &KeyColumn, requester: &LockRequester) -> StorageResult<()> {
        let started = Instant::now();
        let deadline = deadline_after(started, requester.max_wait);
        let mut table = self.table.lock();

        loop {
            let now = Instant::now();
            let current = table.claims.get(lock_id).copied();
            match current {
                None => break,
                Some(claim) if claim.owner == requester.id => break,
                Some(claim) if claim.expires_at <= now => {
                    // The previous owner keeps the key in its held set so its
                    // next check_locks reports the loss.
                    debug!(scope = %self.scope, lock = %lock_id, previous = %claim.owner, "taking over expired lock");
                    break;
                }
                Some(claim) => {
                    if now >= deadline {
                        return Err(StorageError::LockTimeout {
                            lock: format!("{}/{}", self.scope, lock_id),
                            waited: now.duration_since(started),
                        });
                    }
                    trace!(scope = %self.scope, lock = %lock_id, owner = %claim.owner, "waiting for lock");
                    let wake = deadline.min(claim.expires_at);
                    self.released.wait_until(&mut table, wake);
                }
            }
        }

        table.claims.insert(
            lock_id.clone(),
            Claim {
                owner: requester.id,
                expires_at: deadline_after(Instant::now(), self.expiry),
            },
        );
        table
            .held
            .entry(requester.id)
            .or_default()
            .insert(lock_id.clone());
        trace!(scope = %self.scope, lock = %lock_id, %requester, "lock claimed");
        Ok(())
    }

    fn check_locks(&self, requester: &LockRequester, deadline: Instant) -> StorageResult<()> {
        let now = Instant::now();
        if now > deadline {
            return Err(StorageError::LockTimeout {
                lock: format!("{}/*", self.scope),
                waited: now.duration_since(deadline),
            });
        }

        let table = self.table.lock();
        let Some(keys) = table.held.get(&requester.id) else {
            return Ok(());
        };
        for lock_id in keys {
            match table.claims.get(lock_id) {
                Some(claim) if claim.owner == requester.id && claim.expires_at > now => {}
                Some(claim) if claim.owner == requester.id => {
                    return Err(StorageError::lock_failure(format!(
                        "lock {}/{} held by {} expired",
                        self.scope, lock_id, requester
                    )));
                }
                _ => {
                    return Err(StorageError::lock_failure(format!(
                        "lock {}/{} is no longer held by {}",
                        self.scope, lock_id, requester
                    )));
                }
            }
        }
        Ok(())
    }

    fn delete_locks(&self, requester: &LockRequester) -> StorageResult<()> {
        let mut table = self.table.lock();
        let Some(keys) = table.held.remove(&requester.id) else {
            return Ok(());
        };
        let released = keys.len();
        for lock_id in keys {
            if table
                .claims
                .get(&lock_id)
                .is_some_and(|c| c.owner == requester.id)
            {
                table.claims.remove(&lock_id);
            }
        }
        drop(table);
        self.released.notify_all();
        trace!(scope = %self.scope, %requester, released, "locks released");
        Ok(())
    }
}

/// Hands out one [`LocalLocker`] per scope, cached for the provider's lifetime.
#[derive(Debug)]
pub struct LocalLockerProvider {
    expiry: Duration,
    lockers: Mutex<HashMap<String, Arc<LocalLocker>>>,
}

impl Default for LocalLockerProvider {
    fn default() -> Self {
        Self::from_config(&LockingConfig::default())
    }
}

impl LocalLockerProvider {
    /// Creates a provider whose lockers use `expiry` as claim lease.
    #[must_use]
    pub fn new(expiry: Duration) -> Self {
        Self {
            expiry,
            lockers: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a provider from the locking configuration.
    #[must_use]
    pub fn from_config(config: &LockingConfig) -> Self {
        Self::new(config.lock_expiry)
    }

    /// Returns the concrete locker for `scope`, creating it if needed.
    #[must_use]
    pub fn locker(&self, scope: &str) -> Arc<LocalLocker> {
        let mut lockers = self.lockers.lock();
        let locker = lockers
            .entry(scope.to_owned())
            .or_insert_with(|| Arc::new(LocalLocker::new(scope, self.expiry)));
        Arc::clone(locker)
    }

    /// Scopes handed out so far.
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        let mut scopes: Vec<String> = self.lockers.lock().keys().cloned().collect();
        scopes.sort();
        scopes
    }
}

impl LockerProvider for LocalLockerProvider {
    fn get_locker(&self, scope: &str) -> StorageResult<Arc<dyn Locker>> {
        if scope.is_empty() {
            return Err(StorageError::InvalidArgument(
                "lock scope must not be empty".into(),
            ));
        }
        Ok(self.locker(scope))
    }
}
