//! Test harness infrastructure for backend testing.
//!
//! This module provides the [`TestContext`] struct for running tests against
//! each backend, with the unit of work either enabled or disabled.

use std::sync::Arc;

use helios_repository::core::{RepositoryScope, WriteStats};
use helios_repository::registry::{
    RepositoryOptions, RepositoryRegistry, RepositoryRegistryBuilder,
};
use helios_repository::{AggregateRoot, BackendKind, Repository};
use tokio_util::sync::CancellationToken;

/// Installs a test-writer subscriber once per test binary.
///
/// Filtered by `RUST_LOG`, defaulting to `helios_repository=warn`.
pub fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("helios_repository=warn"));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer())
        .with(filter)
        .try_init();
}

/// The backends the harness can instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestBackend {
    /// In-memory document store.
    Memory,
    /// In-memory SQLite database.
    #[cfg(feature = "sqlite")]
    Sqlite,
}

impl TestBackend {
    /// Every backend compiled into this build.
    pub fn all() -> Vec<TestBackend> {
        vec![
            TestBackend::Memory,
            #[cfg(feature = "sqlite")]
            TestBackend::Sqlite,
        ]
    }

    /// The backend kind reported by sessions.
    pub fn kind(&self) -> BackendKind {
        match self {
            TestBackend::Memory => BackendKind::Memory,
            #[cfg(feature = "sqlite")]
            TestBackend::Sqlite => BackendKind::Sqlite,
        }
    }

    /// Registers a repository of this backend on `builder`.
    pub fn register(
        &self,
        builder: RepositoryRegistryBuilder,
        options: RepositoryOptions,
    ) -> RepositoryRegistryBuilder {
        match self {
            TestBackend::Memory => builder.memory(options),
            #[cfg(feature = "sqlite")]
            TestBackend::Sqlite => builder
                .sqlite(options)
                .expect("Failed to create SQLite provider"),
        }
    }
}

/// Context for running backend tests.
///
/// Holds a registry with a single `Default` repository of the selected
/// backend. Each [`scope`](Self::scope) is one logical unit of work.
pub struct TestContext {
    /// The registry under test.
    pub registry: Arc<RepositoryRegistry>,
    /// The backend behind the `Default` repository.
    pub backend: TestBackend,
    /// Whether the `Default` repository batches changes.
    pub unit_of_work: bool,
    /// A token that is never cancelled.
    pub cancel: CancellationToken,
}

impl TestContext {
    /// Creates a context with a plain `Default` repository.
    pub fn new(backend: TestBackend, unit_of_work: bool) -> Self {
        Self::with_builder(backend, unit_of_work, RepositoryRegistry::builder())
    }

    /// Creates a context from a builder that may already carry validators
    /// or other repositories.
    pub fn with_builder(
        backend: TestBackend,
        unit_of_work: bool,
        builder: RepositoryRegistryBuilder,
    ) -> Self {
        init_logging();
        let options = RepositoryOptions::builder("Default")
            .enable_unit_of_work(unit_of_work)
            .build();
        let registry = backend
            .register(builder, options)
            .build()
            .expect("Failed to build registry");
        Self {
            registry: Arc::new(registry),
            backend,
            unit_of_work,
            cancel: CancellationToken::new(),
        }
    }

    /// Opens a new scope.
    pub fn scope(&self) -> RepositoryScope {
        self.registry.begin_scope()
    }

    /// Returns the repository of `A` in `scope`.
    pub fn repository<A: AggregateRoot>(&self, scope: &RepositoryScope) -> Repository<A> {
        scope.repository::<A>().expect("Failed to resolve repository")
    }

    /// Makes the scope's staged work durable.
    ///
    /// A no-op when the unit of work is disabled, since every call has
    /// already committed.
    pub async fn save(&self, scope: &RepositoryScope) {
        if self.unit_of_work {
            scope
                .commit(&self.cancel)
                .await
                .expect("Failed to commit scope");
        }
    }

    /// Adds `items` in a scope of their own and returns them with keys.
    pub async fn seed<A: AggregateRoot>(&self, items: Vec<A>) -> Vec<A> {
        let scope = self.scope();
        let added = self
            .repository::<A>(&scope)
            .add_range(items, &self.cancel)
            .await
            .expect("Failed to seed aggregates");
        self.save(&scope).await;
        added
    }

    /// Reads one aggregate in a fresh scope.
    pub async fn fetch<A: AggregateRoot>(&self, key: &A::Key) -> Option<A> {
        let scope = self.scope();
        self.repository::<A>(&scope)
            .get(key, &self.cancel)
            .await
            .expect("Failed to read aggregate")
    }

    /// Write counters of the `Default` repository.
    pub fn write_stats(&self) -> WriteStats {
        self.registry
            .write_stats("Default")
            .expect("Default repository is registered")
    }
}

/// Macro to define a test that runs against every backend and unit-of-work
/// mode.
///
/// The test body is an `async fn` taking a [`TestContext`] by value.
///
/// # Example
///
/// ```ignore
/// async fn add_assigns_key(ctx: TestContext) {
///     let scope = ctx.scope();
///     let person = ctx
///         .repository::<Person>(&scope)
///         .add(Person::new("Ann", 30), &ctx.cancel)
///         .await
///         .unwrap();
///     assert!(person.id.is_some());
/// }
///
/// backend_test!(add_assigns_key);
/// ```
#[macro_export]
macro_rules! backend_test {
    ($test_name:ident) => {
        paste::paste! {
            #[tokio::test]
            async fn [<memory_ $test_name>]() {
                use $crate::common::harness::{TestBackend, TestContext};
                $test_name(TestContext::new(TestBackend::Memory, false)).await;
            }

            #[tokio::test]
            async fn [<memory_uow_ $test_name>]() {
                use $crate::common::harness::{TestBackend, TestContext};
                $test_name(TestContext::new(TestBackend::Memory, true)).await;
            }

            #[cfg(feature = "sqlite")]
            #[tokio::test]
            async fn [<sqlite_ $test_name>]() {
                use $crate::common::harness::{TestBackend, TestContext};
                $test_name(TestContext::new(TestBackend::Sqlite, false)).await;
            }

            #[cfg(feature = "sqlite")]
            #[tokio::test]
            async fn [<sqlite_uow_ $test_name>]() {
                use $crate::common::harness::{TestBackend, TestContext};
                $test_name(TestContext::new(TestBackend::Sqlite, true)).await;
            }
        }
    };
}

/// Like [`backend_test!`], but only with the unit of work enabled.
#[macro_export]
macro_rules! unit_of_work_test {
    ($test_name:ident) => {
        paste::paste! {
            #[tokio::test]
            async fn [<memory_ $test_name>]() {
                use $crate::common::harness::{TestBackend, TestContext};
                $test_name(TestContext::new(TestBackend::Memory, true)).await;
            }

            #[cfg(feature = "sqlite")]
            #[tokio::test]
            async fn [<sqlite_ $test_name>]() {
                use $crate::common::harness::{TestBackend, TestContext};
                $test_name(TestContext::new(TestBackend::Sqlite, true)).await;
            }
        }
    };
}
