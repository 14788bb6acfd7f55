//! Repository registry.
//!
//! The registry maps repository names to backend providers and options, and
//! aggregate types to repository names. It is built once, validated at build
//! time, and read-only afterwards, so it can be shared freely behind an
//! [`Arc`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use helios_repository::registry::{RepositoryOptions, RepositoryRegistry};
//!
//! let registry = RepositoryRegistry::builder()
//!     .memory(RepositoryOptions::builder("Default").enable_unit_of_work(true).build())
//!     .memory(RepositoryOptions::builder("Cache").aggregate("Session").build())
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(registry.repository_name_for("Session").unwrap(), "Cache");
//! assert_eq!(registry.repository_name_for("Person").unwrap(), "Default");
//!
//! let registry = Arc::new(registry);
//! let scope = registry.begin_scope();
//! assert!(!scope.is_closed());
//! ```

mod builder;
mod config;
mod options;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::core::{BackendProvider, RepositoryScope, ValidatorSet, WriteStats};
use crate::error::{ConfigurationError, RepositoryResult};

pub use builder::RepositoryRegistryBuilder;
pub use config::{BackendType, RegistryConfig, RepositoryEntry};
pub use options::{RepositoryName, RepositoryOptions, RepositoryOptionsBuilder};

struct Registered {
    options: RepositoryOptions,
    provider: Arc<dyn BackendProvider>,
}

/// Resolved repository configuration.
pub struct RepositoryRegistry {
    repositories: BTreeMap<String, Registered>,
    aggregates: BTreeMap<String, String>,
    validators: Arc<ValidatorSet>,
}

impl fmt::Debug for RepositoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repositories: BTreeMap<&str, String> = self
            .repositories
            .iter()
            .map(|(name, r)| (name.as_str(), r.provider.kind().to_string()))
            .collect();
        f.debug_struct("RepositoryRegistry")
            .field("repositories", &repositories)
            .field("aggregates", &self.aggregates)
            .field("validators", &self.validators)
            .finish()
    }
}

impl RepositoryRegistry {
    /// Starts building a registry.
    pub fn builder() -> RepositoryRegistryBuilder {
        RepositoryRegistryBuilder::new()
    }

    /// Registered repository names, in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.repositories.keys().map(String::as_str)
    }

    /// Returns true if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.repositories.contains_key(name)
    }

    /// Resolves the repository name serving `aggregate_type`.
    ///
    /// Unmapped aggregate types fall back to [`RepositoryName::DEFAULT`] when
    /// a repository of that name is registered.
    pub fn repository_name_for(&self, aggregate_type: &str) -> RepositoryResult<&str> {
        if let Some(name) = self.aggregates.get(aggregate_type) {
            return Ok(name);
        }
        match self.repositories.get_key_value(RepositoryName::DEFAULT) {
            Some((name, _)) => Ok(name),
            None => Err(ConfigurationError::UnmappedAggregate {
                aggregate_type: aggregate_type.to_string(),
            }
            .into()),
        }
    }

    fn registered(&self, name: &str) -> RepositoryResult<&Registered> {
        self.repositories.get(name).ok_or_else(|| {
            ConfigurationError::UnknownRepository {
                name: name.to_string(),
            }
            .into()
        })
    }

    /// Options of repository `name`.
    pub fn options(&self, name: &str) -> RepositoryResult<&RepositoryOptions> {
        Ok(&self.registered(name)?.options)
    }

    /// Backend provider of repository `name`.
    pub fn provider(&self, name: &str) -> RepositoryResult<&Arc<dyn BackendProvider>> {
        Ok(&self.registered(name)?.provider)
    }

    /// Write counters of repository `name`.
    pub fn write_stats(&self, name: &str) -> RepositoryResult<WriteStats> {
        Ok(self.registered(name)?.provider.write_stats())
    }

    /// Registered validators.
    pub fn validators(&self) -> &Arc<ValidatorSet> {
        &self.validators
    }

    /// Opens a new scope over this registry.
    pub fn begin_scope(self: &Arc<Self>) -> RepositoryScope {
        RepositoryScope::new(Arc::clone(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RepositoryError;

    fn configuration_error(result: RepositoryResult<RepositoryRegistry>) -> ConfigurationError {
        match result {
            Err(RepositoryError::Configuration(err)) => err,
            other => panic!("expected configuration error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_unmapped_aggregate_falls_back_to_default() {
        let registry = RepositoryRegistry::builder()
            .memory(RepositoryOptions::new("Default"))
            .memory(RepositoryOptions::builder("Audit").aggregate("AuditEntry").build())
            .build()
            .unwrap();
        assert_eq!(registry.repository_name_for("AuditEntry").unwrap(), "Audit");
        assert_eq!(registry.repository_name_for("Person").unwrap(), "Default");
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["Audit", "Default"]);
    }

    #[test]
    fn test_unmapped_aggregate_without_default() {
        let registry = RepositoryRegistry::builder()
            .memory(RepositoryOptions::builder("Audit").aggregate("AuditEntry").build())
            .build()
            .unwrap();
        let err = registry.repository_name_for("Person").unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Configuration(ConfigurationError::UnmappedAggregate { .. })
        ));
    }

    #[test]
    fn test_duplicate_repository_name() {
        let result = RepositoryRegistry::builder()
            .memory(RepositoryOptions::new("Default"))
            .memory(RepositoryOptions::new("Default"))
            .build();
        assert!(matches!(
            configuration_error(result),
            ConfigurationError::DuplicateRepository { name } if name == "Default"
        ));
    }

    #[test]
    fn test_aggregate_mapped_twice() {
        let result = RepositoryRegistry::builder()
            .memory(RepositoryOptions::builder("A").aggregate("Person").build())
            .memory(RepositoryOptions::builder("B").aggregate("Person").build())
            .build();
        assert!(matches!(
            configuration_error(result),
            ConfigurationError::AmbiguousAggregate { first, second, .. }
                if first == "A" && second == "B"
        ));
    }

    #[test]
    fn test_blank_name() {
        let result = RepositoryRegistry::builder()
            .memory(RepositoryOptions::new(" "))
            .build();
        assert!(matches!(
            configuration_error(result),
            ConfigurationError::BlankName
        ));
    }

    #[test]
    fn test_unknown_repository() {
        let registry = RepositoryRegistry::builder().build().unwrap();
        assert!(matches!(
            registry.options("Default").unwrap_err(),
            RepositoryError::Configuration(ConfigurationError::UnknownRepository { .. })
        ));
    }

    #[test]
    fn test_from_config() {
        let config = RegistryConfig::from_json_str(
            r#"{"repositories": [
                {"name": "Default", "backend": "memory", "unit_of_work": true},
                {"name": "Cache", "backend": "memory", "aggregates": ["Session"]}
            ]}"#,
        )
        .unwrap();
        let registry = RepositoryRegistry::builder()
            .from_config(&config)
            .unwrap()
            .build()
            .unwrap();
        assert!(registry.options("Default").unwrap().unit_of_work_enabled);
        assert!(!registry.options("Cache").unwrap().unit_of_work_enabled);
        assert_eq!(registry.repository_name_for("Session").unwrap(), "Cache");
        assert_eq!(registry.write_stats("Cache").unwrap(), WriteStats::default());
    }
}
