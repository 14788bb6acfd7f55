//! Staged operations and commit reports.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{FieldValues, WriteSet};

/// The kind of a staged operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Insert a new record.
    Add,
    /// Write fields of an existing record.
    Update,
    /// Delete a record.
    Remove,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Add => write!(f, "add"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Remove => write!(f, "remove"),
        }
    }
}

/// One reconciled mutation queued in a unit of work, replayed at commit.
#[derive(Debug, Clone, PartialEq)]
pub enum StagedOperation {
    /// Insert `values` under `key`.
    Add {
        collection: String,
        key: String,
        values: FieldValues,
    },
    /// Write the fields in `write_set`, taking their values from `values`.
    Update {
        collection: String,
        key: String,
        values: FieldValues,
        write_set: WriteSet,
    },
    /// Delete the record under `key`.
    Remove { collection: String, key: String },
}

impl StagedOperation {
    /// The operation kind.
    pub fn kind(&self) -> OperationKind {
        match self {
            StagedOperation::Add { .. } => OperationKind::Add,
            StagedOperation::Update { .. } => OperationKind::Update,
            StagedOperation::Remove { .. } => OperationKind::Remove,
        }
    }

    /// The collection (aggregate type) the operation targets.
    pub fn collection(&self) -> &str {
        match self {
            StagedOperation::Add { collection, .. }
            | StagedOperation::Update { collection, .. }
            | StagedOperation::Remove { collection, .. } => collection,
        }
    }

    /// The storage key the operation targets.
    pub fn key(&self) -> &str {
        match self {
            StagedOperation::Add { key, .. }
            | StagedOperation::Update { key, .. }
            | StagedOperation::Remove { key, .. } => key,
        }
    }

    /// The full field values carried by adds and updates.
    pub fn values(&self) -> Option<&FieldValues> {
        match self {
            StagedOperation::Add { values, .. } | StagedOperation::Update { values, .. } => {
                Some(values)
            }
            StagedOperation::Remove { .. } => None,
        }
    }

    /// Describes what was durably written by this operation.
    pub fn applied(&self) -> AppliedOperation {
        AppliedOperation {
            kind: self.kind(),
            collection: self.collection().to_string(),
            key: self.key().to_string(),
            written_fields: match self {
                StagedOperation::Update { write_set, .. } => write_set.field_names(),
                _ => None,
            },
        }
    }
}

impl fmt::Display for StagedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind(), self.collection(), self.key())
    }
}

/// A durably applied operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedOperation {
    /// The operation kind.
    pub kind: OperationKind,
    /// Target collection.
    pub collection: String,
    /// Target key.
    pub key: String,
    /// Fields written by an update; `None` when the whole record was written.
    pub written_fields: Option<Vec<String>>,
}

/// Result of a successful commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReport {
    /// Operations in the order they were applied.
    pub applied: Vec<AppliedOperation>,
    /// Whether the batch was applied as one backend-native transaction.
    pub atomic: bool,
}

impl CommitReport {
    /// Number of applied operations.
    pub fn len(&self) -> usize {
        self.applied.len()
    }

    /// Returns true if nothing was applied.
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Write counters kept by a backend store.
///
/// An update whose write set is empty still counts as an update, and is also
/// counted in `empty_updates`; it writes no fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteStats {
    /// Records inserted.
    pub inserts: u64,
    /// Update operations executed.
    pub updates: u64,
    /// Individual fields written by updates.
    pub field_writes: u64,
    /// Updates that wrote no field.
    pub empty_updates: u64,
    /// Records deleted.
    pub deletes: u64,
}

impl WriteStats {
    /// Adds another set of counters to this one.
    pub fn merge(&mut self, other: &WriteStats) {
        self.inserts += other.inserts;
        self.updates += other.updates;
        self.field_writes += other.field_writes;
        self.empty_updates += other.empty_updates;
        self.deletes += other.deletes;
    }

    /// Counts one update writing `fields` fields.
    pub fn record_update(&mut self, fields: usize) {
        self.updates += 1;
        self.field_writes += fields as u64;
        if fields == 0 {
            self.empty_updates += 1;
        }
    }
}
