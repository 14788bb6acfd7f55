//! Durable state of the in-memory backend.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::{Number, Value};
use uuid::Uuid;

use crate::core::{AggregateFunction, AppliedOperation, StagedOperation, WriteStats};
use crate::error::{RepositoryResult, ResourceError};
use crate::model::{FieldValues, GeneratedIdentity, WriteSet, lookup_path};
use crate::query::Predicate;

/// One stored record.
#[derive(Debug, Clone)]
struct StoredRecord {
    values: FieldValues,
    /// Insertion order, used as the tie-breaker for sorting.
    row: u64,
    version: u64,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Collection {
    records: HashMap<String, StoredRecord>,
    sequence: u64,
}

#[derive(Debug, Default)]
struct Collections {
    by_name: HashMap<String, Collection>,
    next_row: u64,
}

/// The shared document store behind every in-memory session.
///
/// Operations are applied one at a time; the store has no multi-operation
/// transactions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<Collections>,
    stats: Mutex<WriteStats>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .by_name
            .get(collection)
            .map_or(0, |c| c.records.len())
    }

    /// Returns true if `collection` holds no record.
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Version of the record under `key`; 1 after insert, +1 per update.
    pub fn version(&self, collection: &str, key: &str) -> Option<u64> {
        self.collections
            .read()
            .by_name
            .get(collection)
            .and_then(|c| c.records.get(key))
            .map(|r| r.version)
    }

    /// Write counters since the store was created.
    pub fn write_stats(&self) -> WriteStats {
        *self.stats.lock()
    }

    pub(crate) fn next_identity(&self, collection: &str) -> GeneratedIdentity {
        let mut collections = self.collections.write();
        let entry = collections.by_name.entry(collection.to_string()).or_default();
        entry.sequence += 1;
        GeneratedIdentity {
            sequence: entry.sequence,
            uuid: Uuid::new_v4(),
        }
    }

    pub(crate) fn load(&self, collection: &str, key: &str) -> Option<FieldValues> {
        self.collections
            .read()
            .by_name
            .get(collection)
            .and_then(|c| c.records.get(key))
            .map(|r| r.values.clone())
    }

    pub(crate) fn exists(&self, collection: &str, key: &str) -> bool {
        self.collections
            .read()
            .by_name
            .get(collection)
            .is_some_and(|c| c.records.contains_key(key))
    }

    /// Records matching `predicate`, in insertion order.
    pub(crate) fn scan(&self, collection: &str, predicate: &Predicate) -> Vec<FieldValues> {
        let collections = self.collections.read();
        let Some(records) = collections.by_name.get(collection) else {
            return Vec::new();
        };
        let mut matched: Vec<&StoredRecord> = records
            .records
            .values()
            .filter(|r| predicate.matches(&r.values))
            .collect();
        matched.sort_by_key(|r| r.row);
        matched.into_iter().map(|r| r.values.clone()).collect()
    }

    pub(crate) fn count(&self, collection: &str, predicate: &Predicate) -> u64 {
        self.collections
            .read()
            .by_name
            .get(collection)
            .map_or(0, |c| {
                c.records
                    .values()
                    .filter(|r| predicate.matches(&r.values))
                    .count() as u64
            })
    }

    pub(crate) fn aggregate(
        &self,
        collection: &str,
        predicate: &Predicate,
        path: &str,
        function: AggregateFunction,
    ) -> Option<Number> {
        let collections = self.collections.read();
        let records = collections.by_name.get(collection)?;
        let numbers: Vec<&Number> = records
            .records
            .values()
            .filter(|r| predicate.matches(&r.values))
            .filter_map(|r| match lookup_path(&r.values, path) {
                Some(Value::Number(n)) => Some(n),
                _ => None,
            })
            .collect();
        if numbers.is_empty() {
            return None;
        }

        let as_float = || numbers.iter().filter_map(|n| n.as_f64()).sum::<f64>();
        match function {
            AggregateFunction::Sum => {
                let integers: Option<i64> = numbers
                    .iter()
                    .try_fold(0_i64, |acc, n| n.as_i64().and_then(|v| acc.checked_add(v)));
                match integers {
                    Some(total) => Some(Number::from(total)),
                    None => Number::from_f64(as_float()),
                }
            }
            AggregateFunction::Average => Number::from_f64(as_float() / numbers.len() as f64),
        }
    }

    /// Applies one operation.
    pub(crate) fn apply(&self, operation: &StagedOperation) -> RepositoryResult<AppliedOperation> {
        let mut collections = self.collections.write();
        let now = Utc::now();

        match operation {
            StagedOperation::Add {
                collection,
                key,
                values,
            } => {
                let row = collections.next_row;
                let records = &mut collections
                    .by_name
                    .entry(collection.clone())
                    .or_default()
                    .records;
                if records.contains_key(key) {
                    return Err(ResourceError::AlreadyExists {
                        aggregate_type: collection.clone(),
                        key: key.clone(),
                    }
                    .into());
                }
                records.insert(
                    key.clone(),
                    StoredRecord {
                        values: values.clone(),
                        row,
                        version: 1,
                        updated_at: now,
                    },
                );
                collections.next_row += 1;
                self.stats.lock().inserts += 1;
            }
            StagedOperation::Update {
                collection,
                key,
                values,
                write_set,
            } => {
                let record = collections
                    .by_name
                    .get_mut(collection)
                    .and_then(|c| c.records.get_mut(key))
                    .ok_or_else(|| ResourceError::NotFound {
                        aggregate_type: collection.clone(),
                        key: key.clone(),
                    })?;
                write_set.apply(values, &mut record.values);
                record.version += 1;
                record.updated_at = now;
                let written = match write_set {
                    WriteSet::All => values.len(),
                    WriteSet::Fields(fields) => fields.len(),
                };
                self.stats.lock().record_update(written);
            }
            StagedOperation::Remove { collection, key } => {
                let removed = collections
                    .by_name
                    .get_mut(collection)
                    .and_then(|c| c.records.remove(key));
                if removed.is_none() {
                    return Err(ResourceError::NotFound {
                        aggregate_type: collection.clone(),
                        key: key.clone(),
                    }
                    .into());
                }
                self.stats.lock().deletes += 1;
            }
        }

        Ok(operation.applied())
    }

    /// Time of the last write to the record under `key`.
    pub fn updated_at(&self, collection: &str, key: &str) -> Option<DateTime<Utc>> {
        self.collections
            .read()
            .by_name
            .get(collection)
            .and_then(|c| c.records.get(key))
            .map(|r| r.updated_at)
    }
}
