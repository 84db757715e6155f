//! Deadline-bounded retries of backend operations.

use kcvlock_storage::{StorageError, StorageResult};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

const INITIAL_PAUSE: Duration = Duration::from_millis(10);
const MAX_PAUSE: Duration = Duration::from_millis(500);
/// Stand-in for "never" when a wait is too long to represent as an instant.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Returns `start + wait`, saturating to a far-future instant on overflow.
pub(crate) fn deadline_after(start: Instant, wait: Duration) -> Instant {
    start
        .checked_add(wait)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}

/// Runs `op` until it succeeds, fails permanently, or `deadline` passes.
///
/// Temporary failures are retried with exponential backoff capped at the
/// remaining time. Running out of time yields `LockTimeout` naming `what`.
pub(crate) fn execute_until<T>(
    what: &str,
    deadline: Instant,
    mut op: impl FnMut() -> StorageResult<T>,
) -> StorageResult<T> {
    let started = Instant::now();
    if started >= deadline {
        return Err(StorageError::LockTimeout {
            lock: what.to_owned(),
            waited: Duration::ZERO,
        });
    }

    let mut pause = INITIAL_PAUSE;
    let mut attempt = 1u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_temporary() => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(StorageError::LockTimeout {
                        lock: what.to_owned(),
                        waited: now.duration_since(started),
                    });
                }
                debug!(operation = what, attempt, error = %e, "retrying after temporary failure");
                thread::sleep(pause.min(deadline - now));
                pause = (pause * 2).min(MAX_PAUSE);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_first_success() {
        let result = execute_until("read", Instant::now() + Duration::from_secs(1), || Ok(7));
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn retries_temporary_failures() {
        let mut calls = 0;
        let result = execute_until("read", Instant::now() + Duration::from_secs(5), || {
            calls += 1;
            if calls < 3 {
                Err(StorageError::temporary("busy"))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn permanent_failure_is_not_retried() {
        let mut calls = 0;
        let result: StorageResult<()> =
            execute_until("read", Instant::now() + Duration::from_secs(5), || {
                calls += 1;
                Err(StorageError::permanent("gone"))
            });
        assert!(matches!(result, Err(StorageError::Backend { temporary: false, .. })));
        assert_eq!(calls, 1);
    }

    #[test]
    fn exhausted_deadline_times_out() {
        let result: StorageResult<()> =
            execute_until("read", Instant::now() + Duration::from_millis(30), || {
                Err(StorageError::temporary("busy"))
            });
        assert!(matches!(result, Err(StorageError::LockTimeout { .. })));
    }

    #[test]
    fn deadline_after_adds_small_waits() {
        let start = Instant::now();
        assert_eq!(
            deadline_after(start, Duration::from_secs(3)),
            start + Duration::from_secs(3)
        );
    }

    #[test]
    fn deadline_after_saturates_unbounded_waits() {
        let start = Instant::now();
        let deadline = deadline_after(start, Duration::MAX);
        assert!(deadline > start + Duration::from_secs(3600));
    }

    #[test]
    fn unbounded_deadline_still_runs_op() {
        let deadline = deadline_after(Instant::now(), Duration::MAX);
        assert_eq!(execute_until("read", deadline, || Ok(1)).unwrap(), 1);
    }

    #[test]
    fn past_deadline_fails_without_calling() {
        let mut called = false;
        let result: StorageResult<()> = execute_until("read", Instant::now(), || {
            called = true;
            Ok(())
        });
        assert!(result.is_err());
        assert!(!called);
    }
}
