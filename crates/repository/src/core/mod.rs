//! Core repository abstractions.
//!
//! This module provides the backend-independent machinery of the repository
//! layer:
//!
//! - [`BackendSession`] / [`BackendProvider`] - storage adapter contract
//! - [`IdentityTracker`] / [`IdentityMap`] - one tracked entry per aggregate key
//! - [`Reconciler`] - merges caller-supplied instances into tracked state
//! - [`UnitOfWork`] - stages reconciled operations and commits them
//! - [`RepositoryScope`] - one logical operation scope over a registry
//! - [`Repository`] - the uniform per-aggregate operation surface
//! - [`Validator`] - pre-commit validation hook
//!
//! # Flow of an update
//!
//! ```text
//! Repository::update
//!     └── Reconciler::reconcile ──▶ IdentityTracker (session)
//!             └── UnitOfWork::stage
//!                     └── UnitOfWork::commit
//!                             ├── ValidatorSet::validate
//!                             └── BackendSession::commit
//! ```
//!
//! # Example: Implementing a Backend
//!
//! ```ignore
//! use async_trait::async_trait;
//! use helios_repository::core::{BackendSession, BackendKind, IdentityMap};
//! use helios_repository::error::RepositoryResult;
//! use helios_repository::model::FieldValues;
//!
//! #[derive(Debug)]
//! struct MySession {
//!     identity: IdentityMap,
//!     // ... backend-specific fields
//! }
//!
//! #[async_trait]
//! impl BackendSession for MySession {
//!     fn backend_name(&self) -> &'static str {
//!         "my-backend"
//!     }
//!
//!     async fn load(&self, collection: &str, key: &str) -> RepositoryResult<Option<FieldValues>> {
//!         // Implementation...
//!         todo!()
//!     }
//!
//!     // ... implement other required methods
//! }
//! ```

pub mod backend;
pub mod operation;
pub mod reconcile;
pub mod repository;
pub mod scope;
pub mod tracking;
pub mod unit_of_work;
pub mod validation;

// Re-export main types
pub use backend::{
    AggregateFunction, BackendCapability, BackendKind, BackendProvider, BackendSession,
    EntryState, IdentityTracker, TrackedEntry,
};
pub use operation::{AppliedOperation, CommitReport, OperationKind, StagedOperation, WriteStats};
pub use reconcile::{ReconcileOutcome, Reconciled, Reconciler, ReferenceTouch, UpdateRequest};
pub use repository::{Numeric, Repository};
pub use scope::RepositoryScope;
pub use tracking::IdentityMap;
pub use unit_of_work::{UnitOfWork, UnitOfWorkState};
pub use validation::{Validator, ValidatorSet};
