//! Property-based test generators using proptest.

use bytes::Bytes;
use kcvlock_storage::{
    Entry, KcvMutation, MutationBatch, OptionValue, Options, StaticBuffer, CONSISTENCY_OPTION,
};
use proptest::prelude::*;

/// Strategy for short row keys and column names.
pub fn buffer_strategy() -> impl Strategy<Value = StaticBuffer> {
    prop::collection::vec(any::<u8>(), 1..8).prop_map(Bytes::from)
}

/// Strategy for a single column/value pair.
pub fn entry_strategy() -> impl Strategy<Value = Entry> {
    (buffer_strategy(), prop::collection::vec(any::<u8>(), 0..16))
        .prop_map(|(column, value)| Entry::new(column, value))
}

/// Strategy for a row mutation.
pub fn mutation_strategy() -> impl Strategy<Value = KcvMutation> {
    (
        prop::collection::vec(entry_strategy(), 0..4),
        prop::collection::vec(buffer_strategy(), 0..3),
    )
        .prop_map(|(additions, deletions)| KcvMutation::new(additions, deletions))
}

/// Strategy for a batch touching a subset of `stores`.
pub fn mutation_batch_strategy(
    stores: &'static [&'static str],
) -> impl Strategy<Value = MutationBatch> {
    prop::collection::vec(
        prop::collection::hash_map(buffer_strategy(), mutation_strategy(), 0..4),
        stores.len(),
    )
    .prop_map(move |rows_per_store| {
        stores
            .iter()
            .zip(rows_per_store)
            .filter(|(_, rows)| !rows.is_empty())
            .map(|(name, rows)| ((*name).to_owned(), rows))
            .collect::<MutationBatch>()
    })
}

/// Strategy for option values.
pub fn option_value_strategy() -> impl Strategy<Value = OptionValue> {
    prop_oneof![
        any::<bool>().prop_map(OptionValue::from),
        any::<i64>().prop_map(OptionValue::from),
        "[a-z]{0,8}".prop_map(OptionValue::from),
    ]
}

/// Strategy for option sets with names drawn from a small alphabet, so
/// independently generated sets overlap. Sometimes sets the in-memory
/// backend's consistency option.
pub fn options_strategy() -> impl Strategy<Value = Options> {
    let name = prop_oneof![3 => "[a-d]", 1 => Just(CONSISTENCY_OPTION.to_owned())];
    prop::collection::btree_map(name, option_value_strategy(), 0..4)
        .prop_map(|map| map.into_iter().collect())
}
