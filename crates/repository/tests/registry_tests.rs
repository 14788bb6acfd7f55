//! Registry configuration and aggregate routing tests.

mod common;

use std::sync::Arc;

use helios_repository::error::{ConfigurationError, RepositoryError};
use helios_repository::query::Specification;
use helios_repository::registry::{RegistryConfig, RepositoryOptions, RepositoryRegistry};
use helios_repository::BackendKind;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::{Company, Person};

fn configuration_error(err: RepositoryError) -> ConfigurationError {
    match err {
        RepositoryError::Configuration(inner) => inner,
        other => panic!("expected a configuration error, got {:?}", other),
    }
}

#[tokio::test]
async fn aggregates_route_to_mapped_repository() {
    let registry = Arc::new(
        RepositoryRegistry::builder()
            .memory(RepositoryOptions::new("Default"))
            .memory(
                RepositoryOptions::builder("Companies")
                    .enable_unit_of_work(true)
                    .use_for::<Company>()
                    .build(),
            )
            .build()
            .unwrap(),
    );
    assert_eq!(registry.names().collect::<Vec<_>>(), vec!["Companies", "Default"]);
    assert_eq!(registry.repository_name_for("Company").unwrap(), "Companies");
    assert_eq!(registry.repository_name_for("Person").unwrap(), "Default");

    let cancel = CancellationToken::new();
    let scope = registry.begin_scope();
    let companies = scope.repository::<Company>().unwrap();
    assert_eq!(companies.name(), "Companies");
    assert!(companies.unit_of_work().is_enabled());
    let people = scope.repository::<Person>().unwrap();
    assert!(!people.unit_of_work().is_enabled());

    companies
        .add(Company::new("Acme", 1990), &cancel)
        .await
        .unwrap();
    people.add(Person::new("Ann", 30), &cancel).await.unwrap();
    scope.commit(&cancel).await.unwrap();

    assert_eq!(registry.write_stats("Companies").unwrap().inserts, 1);
    assert_eq!(registry.write_stats("Default").unwrap().inserts, 1);
}

#[test]
fn unmapped_aggregate_without_default_is_rejected() {
    let registry = Arc::new(
        RepositoryRegistry::builder()
            .memory(RepositoryOptions::builder("Companies").use_for::<Company>().build())
            .build()
            .unwrap(),
    );

    let scope = registry.begin_scope();
    let err = configuration_error(scope.repository::<Person>().unwrap_err());
    assert!(matches!(
        err,
        ConfigurationError::UnmappedAggregate { aggregate_type } if aggregate_type == "Person"
    ));
    let err = configuration_error(scope.repository_named::<Person>("Archive").unwrap_err());
    assert!(matches!(err, ConfigurationError::UnknownRepository { name } if name == "Archive"));
    assert!(scope.repository_named::<Person>("Companies").is_ok());
}

#[test]
fn invalid_registrations_fail_at_build() {
    let err = RepositoryRegistry::builder()
        .memory(RepositoryOptions::new("Default"))
        .memory(RepositoryOptions::new("Default"))
        .build()
        .unwrap_err();
    assert!(matches!(
        configuration_error(err),
        ConfigurationError::DuplicateRepository { .. }
    ));

    let err = RepositoryRegistry::builder()
        .memory(RepositoryOptions::new("  "))
        .build()
        .unwrap_err();
    assert!(matches!(configuration_error(err), ConfigurationError::BlankName));

    let err = RepositoryRegistry::builder()
        .memory(RepositoryOptions::builder("First").use_for::<Person>().build())
        .memory(RepositoryOptions::builder("Second").use_for::<Person>().build())
        .build()
        .unwrap_err();
    match configuration_error(err) {
        ConfigurationError::AmbiguousAggregate { first, second, .. } => {
            assert_eq!((first.as_str(), second.as_str()), ("First", "Second"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn unreadable_documents_are_configuration_errors() {
    let dir = tempfile::tempdir().unwrap();

    let missing = dir.path().join("missing.json");
    let err = configuration_error(RegistryConfig::from_path(&missing).unwrap_err());
    assert!(matches!(err, ConfigurationError::Unreadable { .. }));

    let malformed = dir.path().join("malformed.json");
    std::fs::write(&malformed, r#"{"repositories": [{"name": "Default"}]}"#).unwrap();
    let err = configuration_error(RegistryConfig::from_path(&malformed).unwrap_err());
    assert!(matches!(err, ConfigurationError::Unreadable { .. }));
}

#[tokio::test]
async fn configured_memory_repository() {
    let config = RegistryConfig::from_json_str(
        r#"{"repositories": [{"name": "Default", "backend": "memory", "unit_of_work": true}]}"#,
    )
    .unwrap();
    let registry = Arc::new(
        RepositoryRegistry::builder()
            .from_config(&config)
            .unwrap()
            .build()
            .unwrap(),
    );
    assert_eq!(
        registry.provider("Default").unwrap().kind(),
        BackendKind::Memory
    );
    assert!(registry.options("Default").unwrap().unit_of_work_enabled);
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;

    fn file_config(path: &std::path::Path) -> RegistryConfig {
        let document = json!({
            "repositories": [
                {
                    "name": "Default",
                    "backend": "sqlite",
                    "unit_of_work": true,
                    "settings": {
                        "path": path.to_string_lossy(),
                        "max_connections": 2,
                        "busy_timeout": "2s"
                    }
                },
                { "name": "Cache", "backend": "memory", "aggregates": ["Company"] }
            ]
        });
        RegistryConfig::from_json_str(&document.to_string()).unwrap()
    }

    #[tokio::test]
    async fn file_database_outlives_registry() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("repository.db");
        let config_path = dir.path().join("registry.json");
        let config = file_config(&db);
        std::fs::write(&config_path, serde_json::to_string(&config).unwrap()).unwrap();

        let cancel = CancellationToken::new();
        {
            let config = RegistryConfig::from_path(&config_path).unwrap();
            let registry = Arc::new(
                RepositoryRegistry::builder()
                    .from_config(&config)
                    .unwrap()
                    .build()
                    .unwrap(),
            );
            assert_eq!(
                registry.provider("Cache").unwrap().kind(),
                BackendKind::Memory
            );

            let scope = registry.begin_scope();
            let people = scope.repository::<Person>().unwrap();
            assert_eq!(people.backend_kind(), BackendKind::Sqlite);
            people
                .add_range(vec![Person::new("Ann", 30), Person::new("Bob", 25)], &cancel)
                .await
                .unwrap();
            scope.commit(&cancel).await.unwrap();
        }

        let registry = Arc::new(
            RepositoryRegistry::builder()
                .from_config(&config)
                .unwrap()
                .build()
                .unwrap(),
        );
        let scope = registry.begin_scope();
        let people = scope.repository::<Person>().unwrap();
        assert_eq!(
            people.count(&Specification::all(), &cancel).await.unwrap(),
            2
        );
        // Key sequences continue where the previous registry stopped.
        let carla = people.add(Person::new("Carla", 41), &cancel).await.unwrap();
        assert_eq!(carla.id, Some(3));
    }

    #[test]
    fn invalid_backend_setting_is_reported() {
        let config = RegistryConfig::from_json_str(
            r#"{"repositories": [{"name": "Default", "backend": "sqlite",
                "settings": {"busy_timeout": "eventually"}}]}"#,
        )
        .unwrap();
        let err = RepositoryRegistry::builder().from_config(&config).unwrap_err();
        match configuration_error(err) {
            ConfigurationError::InvalidSetting { name, key, .. } => {
                assert_eq!(name, "Default");
                assert_eq!(key, "busy_timeout");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
