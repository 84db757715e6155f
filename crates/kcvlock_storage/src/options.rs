//! Transaction options and configuration merging.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::SystemTime;

/// A single backend-specific option value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer value (durations are expressed in milliseconds).
    Int(i64),
    /// String value.
    Str(String),
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// Backend-specific transaction options, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Options(BTreeMap<String, OptionValue>);

impl Options {
    /// Creates an empty option set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an option, returning the updated set.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Sets an option in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<OptionValue>) {
        self.0.insert(name.into(), value.into());
    }

    /// Looks up an option.
    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.0.get(name)
    }

    /// Returns true if the option is present.
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Number of options.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no option is set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over options in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &OptionValue)> {
        self.0.iter()
    }

    /// Builds the effective option set from mandatory and caller options.
    ///
    /// Every option in `mandatory` overrides the same option in `custom`.
    /// Options only present in `custom` are kept as-is.
    #[must_use]
    pub fn merged(mandatory: &Options, custom: &Options) -> Options {
        let mut effective = custom.0.clone();
        for (name, value) in &mandatory.0 {
            effective.insert(name.clone(), value.clone());
        }
        Options(effective)
    }
}

impl<K: Into<String>, V: Into<OptionValue>> FromIterator<(K, V)> for Options {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Configuration for opening a physical transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionConfig {
    /// Backend-specific options.
    pub custom_options: Options,
    /// Metrics/logging group of the transaction.
    pub group_name: Option<String>,
    /// Commit timestamp assigned by the caller, if any.
    pub commit_time: Option<SystemTime>,
}

impl TransactionConfig {
    /// Creates a configuration with no options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a builder with default values.
    #[must_use]
    pub fn builder() -> TransactionConfigBuilder {
        TransactionConfigBuilder::default()
    }

    /// Starts a builder copying every field of `other`.
    #[must_use]
    pub fn builder_from(other: &TransactionConfig) -> TransactionConfigBuilder {
        TransactionConfigBuilder {
            config: other.clone(),
        }
    }
}

/// Builder for [`TransactionConfig`].
#[derive(Debug, Default)]
pub struct TransactionConfigBuilder {
    config: TransactionConfig,
}

impl TransactionConfigBuilder {
    /// Replaces the custom options.
    #[must_use]
    pub fn custom_options(mut self, options: Options) -> Self {
        self.config.custom_options = options;
        self
    }

    /// Sets the group name.
    #[must_use]
    pub fn group_name(mut self, name: impl Into<String>) -> Self {
        self.config.group_name = Some(name.into());
        self
    }

    /// Sets the commit time.
    #[must_use]
    pub fn commit_time(mut self, time: SystemTime) -> Self {
        self.config.commit_time = Some(time);
        self
    }

    /// Finishes the configuration.
    #[must_use]
    pub fn build(self) -> TransactionConfig {
        self.config
    }
}
