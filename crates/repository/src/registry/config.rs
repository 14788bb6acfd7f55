//! Registry configuration documents.
//!
//! A registry can be described by a JSON document:
//!
//! ```json
//! {
//!   "repositories": [
//!     { "name": "Default", "backend": "sqlite", "unit_of_work": true,
//!       "settings": { "path": "data/app.db", "busy_timeout": "5s" } },
//!     { "name": "Cache", "backend": "memory", "aggregates": ["Session"] }
//!   ]
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::BackendKind;
use crate::error::{ConfigurationError, RepositoryResult};

use super::options::{RepositoryName, RepositoryOptions};

/// Backend kinds a configuration document can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// In-process document store.
    Memory,
    /// SQLite database.
    Sqlite,
}

impl BackendType {
    /// The backend kind this type selects.
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendType::Memory => BackendKind::Memory,
            BackendType::Sqlite => BackendKind::Sqlite,
        }
    }
}

/// One repository in a configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryEntry {
    /// Repository name.
    #[serde(default)]
    pub name: RepositoryName,

    /// Backend kind.
    pub backend: BackendType,

    /// Batch mutations until an explicit commit.
    #[serde(default)]
    pub unit_of_work: bool,

    /// Backend settings. Non-string values are kept in their JSON form.
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,

    /// Aggregate types served by this repository.
    #[serde(default)]
    pub aggregates: BTreeSet<String>,
}

impl RepositoryEntry {
    /// Converts the entry into repository options.
    pub fn options(&self) -> RepositoryOptions {
        let settings = self
            .settings
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), value)
            })
            .collect();
        RepositoryOptions {
            name: self.name.clone(),
            unit_of_work_enabled: self.unit_of_work,
            settings,
            aggregates: self.aggregates.clone(),
        }
    }
}

/// A registry configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Configured repositories.
    #[serde(default)]
    pub repositories: Vec<RepositoryEntry>,
}

impl RegistryConfig {
    /// Parses a configuration document.
    pub fn from_json_str(json: &str) -> RepositoryResult<Self> {
        serde_json::from_str(json).map_err(|e| {
            ConfigurationError::Unreadable {
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Reads a configuration document from a file.
    pub fn from_path(path: impl AsRef<Path>) -> RepositoryResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ConfigurationError::Unreadable {
            message: format!("{}: {}", path.display(), e),
        })?;
        Self::from_json_str(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RepositoryError;

    #[test]
    fn test_parse_document() {
        let config = RegistryConfig::from_json_str(
            r#"{
                "repositories": [
                    {"name": "Default", "backend": "sqlite", "unit_of_work": true,
                     "settings": {"path": ":memory:", "max_connections": 4, "enable_wal": false}},
                    {"name": "Cache", "backend": "memory", "aggregates": ["Session"]}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.repositories.len(), 2);
        let default = config.repositories[0].options();
        assert!(default.unit_of_work_enabled);
        assert_eq!(default.setting("path"), Some(":memory:"));
        assert_eq!(default.setting("max_connections"), Some("4"));
        assert_eq!(default.setting("enable_wal"), Some("false"));

        let cache = &config.repositories[1];
        assert_eq!(cache.backend, BackendType::Memory);
        assert_eq!(cache.backend.kind(), BackendKind::Memory);
        assert!(!cache.unit_of_work);
        assert!(cache.options().serves("Session"));
    }

    #[test]
    fn test_missing_name_is_default() {
        let config =
            RegistryConfig::from_json_str(r#"{"repositories": [{"backend": "memory"}]}"#).unwrap();
        assert!(config.repositories[0].name.is_default());
    }

    #[test]
    fn test_unknown_backend_is_unreadable() {
        let err = RegistryConfig::from_json_str(r#"{"repositories": [{"backend": "oracle"}]}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Configuration(ConfigurationError::Unreadable { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let err = RegistryConfig::from_path(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Configuration(ConfigurationError::Unreadable { .. })
        ));
    }
}
