//! Backend abstraction for storage adapters.
//!
//! This module defines the collaborator interfaces every storage adapter
//! implements:
//!
//! - [`IdentityTracker`] - the session's identity tracking capability
//! - [`BackendSession`] - durable reads, identity generation and batched commit
//! - [`BackendProvider`] - long-lived store that opens one session per scope
//!
//! The reconciliation engine and unit of work are written once against these
//! traits, so application-visible semantics never depend on the adapter.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Number;
use tokio_util::sync::CancellationToken;

use crate::error::RepositoryResult;
use crate::model::{FieldValues, GeneratedIdentity, WriteSet};
use crate::query::{Predicate, QuerySpec};
use crate::registry::RepositoryOptions;

use super::operation::{CommitReport, StagedOperation, WriteStats};

/// Identifies the type of storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// In-process document store.
    Memory,
    /// SQLite database (file-based or in-memory).
    Sqlite,
    /// Custom or unknown backend.
    Custom(&'static str),
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Memory => write!(f, "memory"),
            BackendKind::Sqlite => write!(f, "sqlite"),
            BackendKind::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Capabilities that a backend may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendCapability {
    /// Basic add/update/remove/get.
    Crud,
    /// Atomic multi-operation commit.
    Transactions,
    /// Predicates evaluated inside the store.
    PredicatePushdown,
    /// Sorting results.
    Sorting,
    /// Offset-based pagination.
    OffsetPagination,
    /// Count, sum and average computed inside the store.
    Aggregates,
    /// Identity generation for aggregates added without a key.
    KeyGeneration,
}

impl std::fmt::Display for BackendCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BackendCapability::Crud => "crud",
            BackendCapability::Transactions => "transactions",
            BackendCapability::PredicatePushdown => "predicate-pushdown",
            BackendCapability::Sorting => "sorting",
            BackendCapability::OffsetPagination => "offset-pagination",
            BackendCapability::Aggregates => "aggregates",
            BackendCapability::KeyGeneration => "key-generation",
        };
        write!(f, "{}", name)
    }
}

/// Aggregate functions over a numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    /// Sum of numeric values. Integer when every value is an integer.
    Sum,
    /// Arithmetic mean of numeric values.
    Average,
}

/// Tracking state of an entry in an identity map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    /// Matches the durable record as last observed.
    Unchanged,
    /// Staged for insert.
    Added,
    /// Staged for update.
    Modified,
    /// Staged for delete.
    Deleted,
}

impl std::fmt::Display for EntryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryState::Unchanged => write!(f, "unchanged"),
            EntryState::Added => write!(f, "added"),
            EntryState::Modified => write!(f, "modified"),
            EntryState::Deleted => write!(f, "deleted"),
        }
    }
}

/// Snapshot of one tracked entry.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedEntry {
    /// Values as last known to be durable.
    pub original: FieldValues,
    /// Values including pending changes.
    pub current: FieldValues,
    /// Tracking state.
    pub state: EntryState,
    /// Fields marked for write.
    pub modified: WriteSet,
}

/// A backend session's identity tracking.
///
/// At most one entry exists per `(collection, key)`. Attaching a second
/// entry under a tracked key is an identity conflict.
pub trait IdentityTracker: Send + Sync + Debug {
    /// Returns a snapshot of the entry tracked under the key, if any.
    fn try_get_tracked(&self, collection: &str, key: &str)
    -> RepositoryResult<Option<TrackedEntry>>;

    /// Registers a new entry. Fails if the key is already tracked.
    fn attach(
        &self,
        collection: &str,
        key: &str,
        original: FieldValues,
        current: FieldValues,
        state: EntryState,
    ) -> RepositoryResult<()>;

    /// Records values read from the durable store.
    ///
    /// Creates an unchanged entry when none exists and refreshes an unchanged
    /// one; entries with pending changes are left alone.
    fn attach_loaded(&self, collection: &str, key: &str, values: &FieldValues);

    /// Tracks a new aggregate staged for insert.
    fn track_added(&self, collection: &str, key: &str, values: FieldValues)
    -> RepositoryResult<()>;

    /// Marks an entry as staged for delete, tracking it if necessary.
    fn track_removed(&self, collection: &str, key: &str) -> RepositoryResult<()>;

    /// Copies values onto the tracked entry field by field.
    fn set_current(&self, collection: &str, key: &str, values: &FieldValues)
    -> RepositoryResult<()>;

    /// Marks fields of a tracked entry for write.
    fn mark_modified(&self, collection: &str, key: &str, fields: &WriteSet)
    -> RepositoryResult<()>;

    /// Forces the supplied values into modified state, replacing whatever is
    /// tracked. Used as the last-resort reconciliation path.
    fn force_modified(
        &self,
        collection: &str,
        key: &str,
        values: FieldValues,
        fields: &WriteSet,
    ) -> RepositoryResult<()>;

    /// Makes the effect of committed operations the new original state.
    fn accept_changes(&self, committed: &[StagedOperation]);

    /// Drops every pending change.
    fn reject_changes(&self);

    /// Number of tracked entries.
    fn tracked_count(&self) -> usize;
}

/// A per-scope session against one backend store.
///
/// Sessions own their identity tracking; the durable store behind them is
/// shared by every session the same provider opens.
#[async_trait]
pub trait BackendSession: Send + Sync + Debug {
    /// Returns a human-readable name for this backend.
    fn backend_name(&self) -> &'static str;

    /// Returns the kind of backend.
    fn kind(&self) -> BackendKind;

    /// Checks if this backend supports the given capability.
    fn supports(&self, capability: BackendCapability) -> bool;

    /// The session's identity tracking.
    fn tracker(&self) -> &dyn IdentityTracker;

    /// Produces identity for an aggregate added without a key.
    async fn generate_identity(&self, collection: &str) -> RepositoryResult<GeneratedIdentity>;

    /// Reads the durable record under `key`.
    async fn load(&self, collection: &str, key: &str) -> RepositoryResult<Option<FieldValues>>;

    /// Checks whether a durable record exists under `key`.
    async fn exists(&self, collection: &str, key: &str) -> RepositoryResult<bool>;

    /// Executes a query natively against the durable store.
    async fn query(&self, collection: &str, query: &QuerySpec)
    -> RepositoryResult<Vec<FieldValues>>;

    /// Counts durable records matching `predicate`.
    async fn count(&self, collection: &str, predicate: &Predicate) -> RepositoryResult<u64>;

    /// Aggregates the numeric values at `path` over matching records.
    ///
    /// Non-numeric and missing values are ignored. Returns `None` when no
    /// numeric value matched.
    async fn aggregate(
        &self,
        collection: &str,
        predicate: &Predicate,
        path: &str,
        function: AggregateFunction,
    ) -> RepositoryResult<Option<Number>>;

    /// Applies staged operations in order.
    ///
    /// Backends with [`BackendCapability::Transactions`] apply the batch
    /// atomically. Others apply it sequentially, and the first failure aborts
    /// the remaining operations.
    async fn commit(
        &self,
        operations: &[StagedOperation],
        cancel: &CancellationToken,
    ) -> RepositoryResult<CommitReport>;
}

/// A durable store registered under one repository name.
///
/// Providers live as long as the registry. Every session a provider opens
/// has its own identity tracking and shares the provider's durable store.
pub trait BackendProvider: Send + Sync + Debug {
    /// Returns the kind of backend.
    fn kind(&self) -> BackendKind;

    /// Opens a session for one scope.
    fn open_session(&self, options: &RepositoryOptions) -> RepositoryResult<Arc<dyn BackendSession>>;

    /// Write counters accumulated by every session of this provider.
    fn write_stats(&self) -> WriteStats;
}
