//! Helios Aggregate Repository Layer
//!
//! This crate provides a persistence-agnostic repository abstraction for
//! aggregate-root domain entities. Application code issues add, update,
//! remove and query operations against one uniform contract while the
//! storage backend is swapped behind a pluggable provider.
//!
//! # Features
//!
//! - **Uniform contract**: [`Repository`] behaves identically on every backend
//! - **Reconciliation**: updates are merged into tracked state and written as
//!   field-level diffs
//! - **Unit of work**: per-repository batching of staged changes, committed
//!   atomically where the backend supports transactions
//! - **Specifications**: composable predicates pushed down into the store
//! - **Registry**: named repository configurations resolved per aggregate type
//!
//! # Backend Features
//!
//! Available backend features:
//! - `sqlite` (default) - SQLite with in-memory and file modes
//!
//! The in-memory backend is always compiled.
//!
//! # Architecture
//!
//! - [`model`] - Aggregate roots, keys and field-level values
//! - [`query`] - Predicates, specifications and query options
//! - [`error`] - Error types for all operations
//! - [`core`] - Repository contract, reconciliation engine and unit of work
//! - [`registry`] - Named repository options and backend providers
//! - [`backends`] - Backend implementations (memory, SQLite)
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use helios_repository::model::AggregateRoot;
//! use helios_repository::query::{Predicate, QueryOptions, Specification};
//! use helios_repository::registry::{RepositoryOptions, RepositoryRegistry};
//! use serde::{Deserialize, Serialize};
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Person {
//!     id: Option<i64>,
//!     name: String,
//!     age: u32,
//! }
//!
//! impl AggregateRoot for Person {
//!     type Key = i64;
//!     const AGGREGATE_TYPE: &'static str = "Person";
//!
//!     fn id(&self) -> Option<&i64> {
//!         self.id.as_ref()
//!     }
//!
//!     fn set_id(&mut self, key: i64) {
//!         self.id = Some(key);
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(
//!     RepositoryRegistry::builder()
//!         .memory(RepositoryOptions::builder("Default").enable_unit_of_work(true).build())
//!         .build()?,
//! );
//! let cancel = CancellationToken::new();
//!
//! let scope = registry.begin_scope();
//! let people = scope.repository::<Person>()?;
//! let ann = people
//!     .add(Person { id: None, name: "Ann".into(), age: 30 }, &cancel)
//!     .await?;
//! assert_eq!(ann.id, Some(1));
//! scope.commit(&cancel).await?;
//!
//! let adults = Specification::where_(Predicate::ge("age", 18));
//! let found = people.find_many(&adults, &QueryOptions::new(), &cancel).await?;
//! assert_eq!(found.len(), 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod core;
pub mod error;
pub mod model;
pub mod query;
pub mod registry;

// Re-export commonly used types at crate root
pub use error::{RepositoryError, RepositoryResult};
pub use model::{AggregateKey, AggregateRoot, ReferenceProperty};
pub use query::{Predicate, QueryOptions, Specification};
pub use registry::{RepositoryOptions, RepositoryRegistry};

// Re-export core types
pub use core::{
    BackendCapability, BackendKind, BackendProvider, BackendSession, CommitReport, Repository,
    RepositoryScope, UnitOfWork, UnitOfWorkState,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
