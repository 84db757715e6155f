//! Core data types for key-column-value stores.

use bytes::Bytes;
use std::collections::HashMap;
use std::fmt::{self, Write as _};

/// Immutable byte buffer used for row keys, columns and values.
pub type StaticBuffer = Bytes;

/// A single column/value cell of a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entry {
    /// Column name.
    pub column: StaticBuffer,
    /// Cell value.
    pub value: StaticBuffer,
}

impl Entry {
    /// Creates a new entry.
    pub fn new(column: impl Into<StaticBuffer>, value: impl Into<StaticBuffer>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

/// Result of a slice read, ordered by column.
pub type EntryList = Vec<Entry>;

/// A column range `[start, end)` with an optional result limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceQuery {
    /// Inclusive lower bound.
    pub start: StaticBuffer,
    /// Exclusive upper bound.
    pub end: StaticBuffer,
    /// Maximum number of entries to return.
    pub limit: Option<usize>,
}

impl SliceQuery {
    /// Creates an unlimited slice query.
    pub fn new(start: impl Into<StaticBuffer>, end: impl Into<StaticBuffer>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            limit: None,
        }
    }

    /// A slice containing exactly `column`.
    pub fn single_column(column: &StaticBuffer) -> Self {
        Self::new(column.clone(), column_successor(column))
    }

    /// Sets the result limit.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if `column` falls inside the range.
    pub fn contains(&self, column: &[u8]) -> bool {
        column >= self.start.as_ref() && column < self.end.as_ref()
    }
}

/// A slice query bound to one row key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySliceQuery {
    /// Row key.
    pub key: StaticBuffer,
    /// Column range.
    pub slice: SliceQuery,
}

impl KeySliceQuery {
    /// Creates a new keyed slice query.
    pub fn new(key: impl Into<StaticBuffer>, slice: SliceQuery) -> Self {
        Self {
            key: key.into(),
            slice,
        }
    }
}

/// A contiguous range of row keys `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    /// Inclusive lower bound.
    pub start: StaticBuffer,
    /// Exclusive upper bound.
    pub end: StaticBuffer,
}

impl KeyRange {
    /// Creates a new key range.
    pub fn new(start: impl Into<StaticBuffer>, end: impl Into<StaticBuffer>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }
}

/// Identity of a lockable cell: one column of one row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyColumn {
    /// Row key.
    pub key: StaticBuffer,
    /// Column name.
    pub column: StaticBuffer,
}

impl KeyColumn {
    /// Creates a new key/column pair.
    pub fn new(key: impl Into<StaticBuffer>, column: impl Into<StaticBuffer>) -> Self {
        Self {
            key: key.into(),
            column: column.into(),
        }
    }
}

impl fmt::Display for KeyColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hex(&self.key), hex(&self.column))
    }
}

/// Additions and deletions applied to a single row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KcvMutation {
    /// Entries to insert or overwrite.
    pub additions: Vec<Entry>,
    /// Columns to delete.
    pub deletions: Vec<StaticBuffer>,
}

impl KcvMutation {
    /// Creates a new mutation.
    pub fn new(additions: Vec<Entry>, deletions: Vec<StaticBuffer>) -> Self {
        Self {
            additions,
            deletions,
        }
    }

    /// Returns true if the mutation changes nothing.
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.deletions.is_empty()
    }

    /// Appends the additions and deletions of `other`.
    pub fn merge(&mut self, other: KcvMutation) {
        self.additions.extend(other.additions);
        self.deletions.extend(other.deletions);
    }
}

/// Database name → row key → mutation.
pub type MutationBatch = HashMap<String, HashMap<StaticBuffer, KcvMutation>>;

/// Returns the smallest buffer strictly greater than `column`.
///
/// The range `[column, column_successor(column))` contains `column` and nothing else.
pub fn column_successor(column: &[u8]) -> StaticBuffer {
    let mut next = Vec::with_capacity(column.len() + 1);
    next.extend_from_slice(column);
    next.push(0);
    Bytes::from(next)
}

/// Lowercase hex rendering used in diagnostics.
pub fn hex(buffer: &[u8]) -> String {
    let mut out = String::with_capacity(buffer.len() * 2);
    for byte in buffer {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Renders a list of values as `[hex, hex, ...]`.
pub fn format_values<'a>(values: impl IntoIterator<Item = &'a StaticBuffer>) -> String {
    let parts: Vec<String> = values.into_iter().map(|v| hex(v)).collect();
    format!("[{}]", parts.join(", "))
}
