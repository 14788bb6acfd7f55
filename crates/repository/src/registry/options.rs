//! Per-name repository options.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, RepositoryResult};
use crate::model::AggregateRoot;

/// The name a repository configuration is registered under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepositoryName(String);

impl RepositoryName {
    /// Fallback name for aggregates without an explicit mapping.
    pub const DEFAULT: &'static str = "Default";

    /// Creates a repository name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The default repository name.
    pub fn default_name() -> Self {
        Self::new(Self::DEFAULT)
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this is the default name.
    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT
    }

    /// Returns true if the name is empty or whitespace.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Default for RepositoryName {
    fn default() -> Self {
        Self::default_name()
    }
}

impl fmt::Display for RepositoryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RepositoryName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for RepositoryName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for RepositoryName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Configuration of one named repository.
///
/// Options are read-only once the registry is built.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RepositoryOptions {
    /// The repository name.
    pub name: RepositoryName,

    /// Batch mutations until an explicit commit. Defaults to false.
    #[serde(default)]
    pub unit_of_work_enabled: bool,

    /// Backend-specific settings.
    #[serde(default)]
    pub settings: BTreeMap<String, String>,

    /// Aggregate types served by this repository.
    #[serde(default)]
    pub aggregates: BTreeSet<String>,
}

impl RepositoryOptions {
    /// Options for `name` with every setting at its default.
    pub fn new(name: impl Into<RepositoryName>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Starts building options for `name`.
    pub fn builder(name: impl Into<RepositoryName>) -> RepositoryOptionsBuilder {
        RepositoryOptionsBuilder {
            options: Self::new(name),
        }
    }

    /// Returns a raw setting.
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    /// Parses a setting with [`FromStr`].
    pub fn parse_setting<T>(&self, key: &str) -> RepositoryResult<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.setting(key)
            .map(|raw| {
                raw.trim().parse::<T>().map_err(|e| self.invalid_setting(key, e.to_string()))
            })
            .transpose()
    }

    /// Parses a human-readable duration setting such as `"5s"` or `"250ms"`.
    pub fn duration_setting(&self, key: &str) -> RepositoryResult<Option<Duration>> {
        self.setting(key)
            .map(|raw| {
                humantime::parse_duration(raw.trim())
                    .map_err(|e| self.invalid_setting(key, e.to_string()))
            })
            .transpose()
    }

    fn invalid_setting(&self, key: &str, message: String) -> crate::error::RepositoryError {
        ConfigurationError::InvalidSetting {
            name: self.name.to_string(),
            key: key.to_string(),
            message,
        }
        .into()
    }

    /// Returns true if `aggregate_type` is explicitly mapped to this repository.
    pub fn serves(&self, aggregate_type: &str) -> bool {
        self.aggregates.contains(aggregate_type)
    }
}

/// Builder for [`RepositoryOptions`].
#[derive(Debug, Clone)]
pub struct RepositoryOptionsBuilder {
    options: RepositoryOptions,
}

impl RepositoryOptionsBuilder {
    /// Enables or disables batching until an explicit commit.
    pub fn enable_unit_of_work(mut self, enabled: bool) -> Self {
        self.options.unit_of_work_enabled = enabled;
        self
    }

    /// Sets a backend setting.
    pub fn setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.settings.insert(key.into(), value.into());
        self
    }

    /// Maps aggregate type `A` to this repository.
    pub fn use_for<A: AggregateRoot>(self) -> Self {
        self.aggregate(A::AGGREGATE_TYPE)
    }

    /// Maps an aggregate type, by name, to this repository.
    pub fn aggregate(mut self, aggregate_type: impl Into<String>) -> Self {
        self.options.aggregates.insert(aggregate_type.into());
        self
    }

    /// Finishes the options.
    pub fn build(self) -> RepositoryOptions {
        self.options
    }
}
