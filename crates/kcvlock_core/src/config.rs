//! Locking layer configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default suffix appended to a store name to form its lock scope.
pub const DEFAULT_LOCK_STORE_SUFFIX: &str = "_lock_";

/// Configuration for the expected-value locking layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockingConfig {
    /// Suffix appended to a physical store name to derive its lock scope.
    pub lock_store_suffix: String,

    /// Upper bound on lock acquisition and expected-value verification.
    #[serde(with = "duration_ms")]
    pub max_read_time: Duration,

    /// Lease after which an unreleased local lock may be taken over.
    #[serde(with = "duration_ms")]
    pub lock_expiry: Duration,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            lock_store_suffix: DEFAULT_LOCK_STORE_SUFFIX.to_owned(),
            max_read_time: Duration::from_secs(10),
            lock_expiry: Duration::from_secs(300),
        }
    }
}

impl LockingConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the lock scope suffix.
    #[must_use]
    pub fn lock_store_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.lock_store_suffix = suffix.into();
        self
    }

    /// Sets the maximum read time.
    #[must_use]
    pub const fn max_read_time(mut self, value: Duration) -> Self {
        self.max_read_time = value;
        self
    }

    /// Sets the local lock lease.
    #[must_use]
    pub const fn lock_expiry(mut self, value: Duration) -> Self {
        self.lock_expiry = value;
        self
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
