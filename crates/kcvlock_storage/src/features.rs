//! Backend capability descriptor.

use crate::options::Options;

/// Immutable record of what a backend supports.
///
/// Build one with [`StoreFeatures::builder`] or derive a modified copy with
/// [`StoreFeatures::to_builder`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreFeatures {
    ordered_scan: bool,
    unordered_scan: bool,
    batch_mutation: bool,
    locking: bool,
    local_key_partition: bool,
    distributed: bool,
    transactional: bool,
    persists: bool,
    key_ordered: bool,
    key_consistent_tx_config: Option<Options>,
}

impl StoreFeatures {
    /// Starts a builder with every capability disabled.
    #[must_use]
    pub fn builder() -> StoreFeaturesBuilder {
        StoreFeaturesBuilder::default()
    }

    /// Starts a builder initialized from this descriptor.
    #[must_use]
    pub fn to_builder(&self) -> StoreFeaturesBuilder {
        StoreFeaturesBuilder {
            features: self.clone(),
        }
    }

    /// Supports scans in key order.
    pub fn has_ordered_scan(&self) -> bool {
        self.ordered_scan
    }

    /// Supports scans in arbitrary order.
    pub fn has_unordered_scan(&self) -> bool {
        self.unordered_scan
    }

    /// Supports multi-store mutation batches.
    pub fn has_batch_mutation(&self) -> bool {
        self.batch_mutation
    }

    /// Guarantees mutual exclusion for locked key/columns.
    pub fn has_locking(&self) -> bool {
        self.locking
    }

    /// Can enumerate the key ranges held locally.
    pub fn has_local_key_partition(&self) -> bool {
        self.local_key_partition
    }

    /// Data is spread over several machines.
    pub fn is_distributed(&self) -> bool {
        self.distributed
    }

    /// Transactions are atomic.
    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    /// Data survives process restarts.
    pub fn is_persistent(&self) -> bool {
        self.persists
    }

    /// Keys are stored in order.
    pub fn is_key_ordered(&self) -> bool {
        self.key_ordered
    }

    /// Offers a strongly consistent per-key transaction mode.
    pub fn is_key_consistent(&self) -> bool {
        self.key_consistent_tx_config.is_some()
    }

    /// Options that put a transaction in key-consistent mode.
    pub fn key_consistent_tx_config(&self) -> Option<&Options> {
        self.key_consistent_tx_config.as_ref()
    }
}

/// Builder for [`StoreFeatures`].
#[derive(Debug, Default)]
pub struct StoreFeaturesBuilder {
    features: StoreFeatures,
}

impl StoreFeaturesBuilder {
    /// Sets ordered scan support.
    #[must_use]
    pub fn ordered_scan(mut self, value: bool) -> Self {
        self.features.ordered_scan = value;
        self
    }

    /// Sets unordered scan support.
    #[must_use]
    pub fn unordered_scan(mut self, value: bool) -> Self {
        self.features.unordered_scan = value;
        self
    }

    /// Sets batch mutation support.
    #[must_use]
    pub fn batch_mutation(mut self, value: bool) -> Self {
        self.features.batch_mutation = value;
        self
    }

    /// Sets the locking capability.
    #[must_use]
    pub fn locking(mut self, value: bool) -> Self {
        self.features.locking = value;
        self
    }

    /// Sets local key partition support.
    #[must_use]
    pub fn local_key_partition(mut self, value: bool) -> Self {
        self.features.local_key_partition = value;
        self
    }

    /// Sets whether the backend is distributed.
    #[must_use]
    pub fn distributed(mut self, value: bool) -> Self {
        self.features.distributed = value;
        self
    }

    /// Sets whether transactions are atomic.
    #[must_use]
    pub fn transactional(mut self, value: bool) -> Self {
        self.features.transactional = value;
        self
    }

    /// Sets whether data persists.
    #[must_use]
    pub fn persists(mut self, value: bool) -> Self {
        self.features.persists = value;
        self
    }

    /// Sets whether keys are ordered.
    #[must_use]
    pub fn key_ordered(mut self, value: bool) -> Self {
        self.features.key_ordered = value;
        self
    }

    /// Sets the options for key-consistent transactions.
    #[must_use]
    pub fn key_consistent(mut self, options: Options) -> Self {
        self.features.key_consistent_tx_config = Some(options);
        self
    }

    /// Clears key-consistent transaction support.
    #[must_use]
    pub fn not_key_consistent(mut self) -> Self {
        self.features.key_consistent_tx_config = None;
        self
    }

    /// Finishes the descriptor.
    #[must_use]
    pub fn build(self) -> StoreFeatures {
        self.features
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_to_nothing() {
        let features = StoreFeatures::builder().build();
        assert!(!features.has_locking());
        assert!(!features.is_key_consistent());
        assert!(features.key_consistent_tx_config().is_none());
    }

    #[test]
    fn to_builder_preserves_other_fields() {
        let original = StoreFeatures::builder()
            .ordered_scan(true)
            .batch_mutation(true)
            .key_consistent(Options::new().with("consistency", "all"))
            .build();

        let locked = original.to_builder().locking(true).build();

        assert!(locked.has_locking());
        assert!(locked.has_ordered_scan());
        assert!(locked.has_batch_mutation());
        assert_eq!(
            locked.key_consistent_tx_config(),
            original.key_consistent_tx_config()
        );
        assert!(!original.has_locking());
    }
}
