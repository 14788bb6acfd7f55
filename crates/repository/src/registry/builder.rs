//! Builder for [`RepositoryRegistry`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::backends::memory::MemoryProvider;
use crate::core::{BackendProvider, Validator, ValidatorSet};
use crate::error::{ConfigurationError, RepositoryResult};
use crate::model::AggregateRoot;

use super::config::{BackendType, RegistryConfig};
use super::options::RepositoryOptions;
use super::{Registered, RepositoryRegistry};

/// Builder for constructing a [`RepositoryRegistry`].
///
/// Configuration errors are reported by [`build`](Self::build), never later.
#[derive(Default)]
pub struct RepositoryRegistryBuilder {
    repositories: Vec<(RepositoryOptions, Arc<dyn BackendProvider>)>,
    validators: ValidatorSet,
}

impl fmt::Debug for RepositoryRegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self
            .repositories
            .iter()
            .map(|(options, _)| options.name.as_str())
            .collect();
        f.debug_struct("RepositoryRegistryBuilder")
            .field("repositories", &names)
            .field("validators", &self.validators)
            .finish()
    }
}

impl RepositoryRegistryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a repository name backed by `provider`.
    pub fn repository(
        mut self,
        options: RepositoryOptions,
        provider: Arc<dyn BackendProvider>,
    ) -> Self {
        self.repositories.push((options, provider));
        self
    }

    /// Registers a repository backed by a fresh in-memory store.
    pub fn memory(self, options: RepositoryOptions) -> Self {
        self.repository(options, Arc::new(MemoryProvider::new()))
    }

    /// Registers a repository backed by SQLite, configured from its settings.
    #[cfg(feature = "sqlite")]
    pub fn sqlite(self, options: RepositoryOptions) -> RepositoryResult<Self> {
        let provider = crate::backends::sqlite::SqliteProvider::from_options(&options)?;
        Ok(self.repository(options, Arc::new(provider)))
    }

    /// Registers a validator run for every staged add and update of `A`.
    pub fn add_validator<A, V>(mut self, validator: V) -> Self
    where
        A: AggregateRoot,
        V: Validator<A> + 'static,
    {
        self.validators.add::<A, V>(validator);
        self
    }

    /// Registers every repository of a configuration document.
    pub fn from_config(mut self, config: &RegistryConfig) -> RepositoryResult<Self> {
        for entry in &config.repositories {
            let options = entry.options();
            let provider = provider_for(entry.backend, &options)?;
            self = self.repository(options, provider);
        }
        Ok(self)
    }

    /// Validates the configuration and builds the registry.
    pub fn build(self) -> RepositoryResult<RepositoryRegistry> {
        let mut repositories = BTreeMap::new();
        let mut aggregates: BTreeMap<String, String> = BTreeMap::new();

        for (options, provider) in self.repositories {
            if options.name.is_blank() {
                return Err(ConfigurationError::BlankName.into());
            }
            let name = options.name.to_string();
            if repositories.contains_key(&name) {
                return Err(ConfigurationError::DuplicateRepository { name }.into());
            }
            for aggregate_type in &options.aggregates {
                if let Some(first) = aggregates.get(aggregate_type) {
                    return Err(ConfigurationError::AmbiguousAggregate {
                        aggregate_type: aggregate_type.clone(),
                        first: first.clone(),
                        second: name,
                    }
                    .into());
                }
                aggregates.insert(aggregate_type.clone(), name.clone());
            }
            repositories.insert(name, Registered { options, provider });
        }

        let backends: BTreeSet<String> = repositories
            .values()
            .map(|r| r.provider.kind().to_string())
            .collect();
        info!(
            repositories = repositories.len(),
            aggregates = aggregates.len(),
            backends = ?backends,
            validators = !self.validators.is_empty(),
            "Built repository registry"
        );

        Ok(RepositoryRegistry {
            repositories,
            aggregates,
            validators: Arc::new(self.validators),
        })
    }
}

fn provider_for(
    backend: BackendType,
    options: &RepositoryOptions,
) -> RepositoryResult<Arc<dyn BackendProvider>> {
    match backend {
        BackendType::Memory => Ok(Arc::new(MemoryProvider::new())),
        #[cfg(feature = "sqlite")]
        BackendType::Sqlite => Ok(Arc::new(
            crate::backends::sqlite::SqliteProvider::from_options(options)?,
        )),
        #[cfg(not(feature = "sqlite"))]
        BackendType::Sqlite => {
            let _ = options;
            Err(ConfigurationError::UnsupportedBackend {
                backend: backend.kind().to_string(),
            }
            .into())
        }
    }
}
