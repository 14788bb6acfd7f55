//! Update reconciliation against backend identity tracking.
//!
//! Every backend shares this one implementation. Given the fields of a
//! caller-supplied aggregate, the [`Reconciler`]:
//!
//! 1. looks up the entry tracked under the same key
//! 2. attaches the supplied values when nothing is tracked (whole-record write)
//! 3. otherwise copies the supplied values onto the tracked entry
//! 4. picks the write set: the explicit properties if given, else the fields
//!    whose value changed
//! 5. collects every non-null referenced aggregate (one level, whole record)
//! 6. forces the supplied values into modified state if steps 1 to 3 fail
//!
//! The references found in step 5 are touched with
//! [`Reconciler::touch_reference`] on the tracker of the session that serves
//! the referenced aggregate type, which need not be the referencing one.
//!
//! The fallback in step 6 is logged at `warn`; it is only surfaced to the
//! caller when forcing the modified state fails as well.

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{IdentityError, RepositoryError, RepositoryResult};
use crate::model::{FieldValues, ReferenceProperty, WriteSet, diff_fields, storage_key_of};

use super::backend::{EntryState, IdentityTracker};
use super::operation::StagedOperation;

/// How the supplied instance was resolved against tracked state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing was tracked; the supplied values were attached.
    Detached,
    /// A tracked entry existed; the supplied values were copied onto it.
    Merged,
    /// The tracked entry already held exactly the supplied values.
    AlreadyTracked,
    /// Tracking failed and the supplied values were forced to modified.
    Recovered,
}

/// A caller-supplied update.
#[derive(Debug, Clone)]
pub struct UpdateRequest<'a> {
    /// Aggregate type of the updated aggregate.
    pub collection: &'a str,
    /// Storage key.
    pub key: &'a str,
    /// Serialized fields of the supplied instance.
    pub values: FieldValues,
    /// Properties to write regardless of change, if any.
    pub explicit: Option<&'a [String]>,
    /// Statically declared references of the aggregate type.
    pub references: &'static [ReferenceProperty],
    /// Durable record read before a first touch.
    pub durable: Option<FieldValues>,
}

/// A referenced aggregate to write whole alongside the primary update.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceTouch {
    /// Aggregate type of the referenced aggregate.
    pub aggregate_type: &'static str,
    /// Storage key of the referenced aggregate.
    pub key: String,
    /// The embedded values, written as the whole record.
    pub values: FieldValues,
}

/// Outcome of one reconciliation.
#[derive(Debug, Clone)]
pub struct Reconciled {
    /// How the primary aggregate was resolved.
    pub outcome: ReconcileOutcome,
    /// Update of the primary aggregate.
    pub operation: StagedOperation,
    /// Referenced aggregates still to be touched.
    pub references: Vec<ReferenceTouch>,
}

impl Reconciled {
    /// The write set of the primary update.
    pub fn write_set(&self) -> Option<&WriteSet> {
        match &self.operation {
            StagedOperation::Update { write_set, .. } => Some(write_set),
            _ => None,
        }
    }
}

/// Reconciles updates against one session's identity tracking.
#[derive(Debug, Clone, Copy)]
pub struct Reconciler<'a> {
    tracker: &'a dyn IdentityTracker,
}

impl<'a> Reconciler<'a> {
    /// Creates a reconciler over the given tracker.
    pub fn new(tracker: &'a dyn IdentityTracker) -> Self {
        Self { tracker }
    }

    /// Reconciles an update and returns the operation to stage along with
    /// the references it touches.
    pub fn reconcile(&self, request: UpdateRequest<'_>) -> RepositoryResult<Reconciled> {
        let explicit = request
            .explicit
            .map(|fields| WriteSet::fields(fields.iter().cloned()));

        let (outcome, write_set) = match self.merge(&request, explicit.as_ref()) {
            Ok(resolved) => resolved,
            Err(err) => {
                let write_set = explicit.clone().unwrap_or(WriteSet::All);
                self.recover(request.collection, request.key, &request.values, &write_set, err)?;
                (ReconcileOutcome::Recovered, write_set)
            }
        };

        debug!(
            collection = request.collection,
            key = request.key,
            outcome = ?outcome,
            write_set = ?write_set,
            "Reconciled update"
        );

        let references = collect_references(&request.values, request.references);
        Ok(Reconciled {
            outcome,
            operation: StagedOperation::Update {
                collection: request.collection.to_string(),
                key: request.key.to_string(),
                values: request.values,
                write_set,
            },
            references,
        })
    }

    /// Steps 1 to 4.
    fn merge(
        &self,
        request: &UpdateRequest<'_>,
        explicit: Option<&WriteSet>,
    ) -> RepositoryResult<(ReconcileOutcome, WriteSet)> {
        let (collection, key, values) = (request.collection, request.key, &request.values);

        let (outcome, write_set) = match self.tracker.try_get_tracked(collection, key)? {
            None => {
                let original = request.durable.clone().unwrap_or_else(|| values.clone());
                self.tracker
                    .attach(collection, key, original, values.clone(), EntryState::Modified)?;
                let write_set = explicit.cloned().unwrap_or(WriteSet::All);
                (ReconcileOutcome::Detached, write_set)
            }
            Some(entry) => {
                // The values before this reconciliation are the diff baseline,
                // so replaying staged updates in order reproduces the final state.
                let before = entry.current;
                let outcome = if before == *values {
                    ReconcileOutcome::AlreadyTracked
                } else {
                    self.tracker.set_current(collection, key, values)?;
                    ReconcileOutcome::Merged
                };
                let write_set = match explicit {
                    Some(fields) => fields.clone(),
                    None => WriteSet::Fields(diff_fields(&before, values)),
                };
                (outcome, write_set)
            }
        };

        self.tracker.mark_modified(collection, key, &write_set)?;
        Ok((outcome, write_set))
    }

    /// Step 6.
    fn recover(
        &self,
        collection: &str,
        key: &str,
        values: &FieldValues,
        write_set: &WriteSet,
        cause: RepositoryError,
    ) -> RepositoryResult<()> {
        warn!(
            collection = collection,
            key = key,
            error = %cause,
            "Identity tracking inconsistent; forcing supplied instance to modified"
        );
        self.tracker
            .force_modified(collection, key, values.clone(), write_set)
            .map_err(|fallback| {
                warn!(
                    collection = collection,
                    key = key,
                    error = %fallback,
                    "Forcing modified state failed"
                );
                RepositoryError::from(IdentityError::Conflict {
                    aggregate_type: collection.to_string(),
                    key: key.to_string(),
                })
            })
    }

    /// Step 5 on this tracker: marks the referenced aggregate modified as a
    /// whole record, regardless of change, and returns its update.
    pub fn touch_reference(&self, touch: &ReferenceTouch) -> RepositoryResult<StagedOperation> {
        let (collection, key) = (touch.aggregate_type, touch.key.as_str());
        if let Err(err) = self.touch(collection, key, &touch.values) {
            self.recover(collection, key, &touch.values, &WriteSet::All, err)?;
        }
        Ok(StagedOperation::Update {
            collection: collection.to_string(),
            key: key.to_string(),
            values: touch.values.clone(),
            write_set: WriteSet::All,
        })
    }

    fn touch(&self, collection: &str, key: &str, nested: &FieldValues) -> RepositoryResult<()> {
        match self.tracker.try_get_tracked(collection, key)? {
            Some(_) => self.tracker.set_current(collection, key, nested)?,
            None => self.tracker.attach(
                collection,
                key,
                nested.clone(),
                nested.clone(),
                EntryState::Modified,
            )?,
        }
        self.tracker.mark_modified(collection, key, &WriteSet::All)
    }
}

/// Non-null references with a key, one level deep.
fn collect_references(
    values: &FieldValues,
    references: &'static [ReferenceProperty],
) -> Vec<ReferenceTouch> {
    let mut touched = Vec::new();
    for reference in references {
        let Some(Value::Object(nested)) = values.get(reference.field) else {
            continue;
        };
        let Some(key) = nested.get(reference.key_field).and_then(storage_key_of) else {
            debug!(
                field = reference.field,
                target = reference.aggregate_type,
                "Referenced aggregate has no key; not touched"
            );
            continue;
        };
        touched.push(ReferenceTouch {
            aggregate_type: reference.aggregate_type,
            key,
            values: nested.clone(),
        });
    }
    touched
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use serde_json::json;

    use super::*;
    use crate::core::backend::TrackedEntry;
    use crate::core::tracking::IdentityMap;

    fn fields(value: Value) -> FieldValues {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn request<'a>(values: FieldValues, explicit: Option<&'a [String]>) -> UpdateRequest<'a> {
        UpdateRequest {
            collection: "Person",
            key: "1",
            values,
            explicit,
            references: &[],
            durable: None,
        }
    }

    /// Identity map whose lookup and force paths can be made to fail.
    #[derive(Debug, Default)]
    struct FaultyTracker {
        inner: IdentityMap,
        fail_lookup: AtomicBool,
        fail_force: AtomicBool,
    }

    impl IdentityTracker for FaultyTracker {
        fn try_get_tracked(
            &self,
            collection: &str,
            key: &str,
        ) -> RepositoryResult<Option<TrackedEntry>> {
            if self.fail_lookup.load(Ordering::SeqCst) {
                return Err(IdentityError::Inconsistent {
                    aggregate_type: collection.to_string(),
                    key: key.to_string(),
                    message: "injected".to_string(),
                }
                .into());
            }
            self.inner.try_get_tracked(collection, key)
        }

        fn attach(
            &self,
            collection: &str,
            key: &str,
            original: FieldValues,
            current: FieldValues,
            state: EntryState,
        ) -> RepositoryResult<()> {
            self.inner.attach(collection, key, original, current, state)
        }

        fn attach_loaded(&self, collection: &str, key: &str, values: &FieldValues) {
            self.inner.attach_loaded(collection, key, values)
        }

        fn track_added(
            &self,
            collection: &str,
            key: &str,
            values: FieldValues,
        ) -> RepositoryResult<()> {
            self.inner.track_added(collection, key, values)
        }

        fn track_removed(&self, collection: &str, key: &str) -> RepositoryResult<()> {
            self.inner.track_removed(collection, key)
        }

        fn set_current(
            &self,
            collection: &str,
            key: &str,
            values: &FieldValues,
        ) -> RepositoryResult<()> {
            self.inner.set_current(collection, key, values)
        }

        fn mark_modified(
            &self,
            collection: &str,
            key: &str,
            fields: &WriteSet,
        ) -> RepositoryResult<()> {
            self.inner.mark_modified(collection, key, fields)
        }

        fn force_modified(
            &self,
            collection: &str,
            key: &str,
            values: FieldValues,
            fields: &WriteSet,
        ) -> RepositoryResult<()> {
            if self.fail_force.load(Ordering::SeqCst) {
                return Err(IdentityError::Inconsistent {
                    aggregate_type: collection.to_string(),
                    key: key.to_string(),
                    message: "injected".to_string(),
                }
                .into());
            }
            self.inner.force_modified(collection, key, values, fields)
        }

        fn accept_changes(&self, committed: &[StagedOperation]) {
            self.inner.accept_changes(committed)
        }

        fn reject_changes(&self) {
            self.inner.reject_changes()
        }

        fn tracked_count(&self) -> usize {
            self.inner.tracked_count()
        }
    }

    #[test]
    fn test_first_touch_writes_whole_record() {
        let tracker = IdentityMap::new();
        let reconciler = Reconciler::new(&tracker);
        let result = reconciler
            .reconcile(request(fields(json!({"id": 1, "age": 50})), None))
            .unwrap();
        assert_eq!(result.outcome, ReconcileOutcome::Detached);
        assert_eq!(result.write_set(), Some(&WriteSet::All));
        assert_eq!(tracker.tracked_count(), 1);
    }

    #[test]
    fn test_detached_copy_merges_without_conflict() {
        let tracker = IdentityMap::new();
        tracker.attach_loaded("Person", "1", &fields(json!({"id": 1, "name": "Ann", "age": 99})));
        let reconciler = Reconciler::new(&tracker);

        let result = reconciler
            .reconcile(request(fields(json!({"id": 1, "name": "Ann", "age": 50})), None))
            .unwrap();

        assert_eq!(result.outcome, ReconcileOutcome::Merged);
        assert_eq!(result.write_set(), Some(&WriteSet::fields(["age"])));
        let entry = tracker.try_get_tracked("Person", "1").unwrap().unwrap();
        assert_eq!(entry.current["age"], json!(50));
        assert_eq!(entry.state, EntryState::Modified);
        assert_eq!(tracker.tracked_count(), 1);
    }

    #[test]
    fn test_identical_update_writes_no_fields() {
        let tracker = IdentityMap::new();
        let values = fields(json!({"id": 1, "name": "Ann", "age": 99}));
        tracker.attach_loaded("Person", "1", &values);
        let result = Reconciler::new(&tracker)
            .reconcile(request(values, None))
            .unwrap();
        assert_eq!(result.outcome, ReconcileOutcome::AlreadyTracked);
        assert!(result.write_set().unwrap().is_empty());
    }

    #[test]
    fn test_explicit_properties_force_write() {
        let tracker = IdentityMap::new();
        let values = fields(json!({"id": 1, "name": "Ann", "age": 99}));
        tracker.attach_loaded("Person", "1", &values);
        let explicit = vec!["name".to_string()];
        let result = Reconciler::new(&tracker)
            .reconcile(request(values, Some(explicit.as_slice())))
            .unwrap();
        assert_eq!(result.write_set(), Some(&WriteSet::fields(["name"])));
    }

    #[test]
    fn test_null_to_value_is_written() {
        let tracker = IdentityMap::new();
        tracker.attach_loaded("Person", "1", &fields(json!({"id": 1, "nickname": null})));
        let result = Reconciler::new(&tracker)
            .reconcile(request(fields(json!({"id": 1, "nickname": "Nan"})), None))
            .unwrap();
        assert_eq!(result.write_set(), Some(&WriteSet::fields(["nickname"])));
    }

    #[test]
    fn test_lookup_failure_is_recovered() {
        let tracker = FaultyTracker::default();
        tracker
            .inner
            .attach_loaded("Person", "1", &fields(json!({"id": 1, "age": 99})));
        tracker.fail_lookup.store(true, Ordering::SeqCst);

        let result = Reconciler::new(&tracker)
            .reconcile(request(fields(json!({"id": 1, "age": 50})), None))
            .unwrap();

        assert_eq!(result.outcome, ReconcileOutcome::Recovered);
        assert_eq!(result.write_set(), Some(&WriteSet::All));
        let entry = tracker.inner.try_get_tracked("Person", "1").unwrap().unwrap();
        assert_eq!(entry.current["age"], json!(50));
        assert_eq!(entry.state, EntryState::Modified);
    }

    #[test]
    fn test_failed_fallback_escalates_as_conflict() {
        let tracker = FaultyTracker::default();
        tracker.fail_lookup.store(true, Ordering::SeqCst);
        tracker.fail_force.store(true, Ordering::SeqCst);

        let err = Reconciler::new(&tracker)
            .reconcile(request(fields(json!({"id": 1})), None))
            .unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Identity(IdentityError::Conflict { .. })
        ));
    }

    #[test]
    fn test_update_of_deleted_entry_escalates() {
        let tracker = IdentityMap::new();
        tracker.attach_loaded("Person", "1", &fields(json!({"id": 1})));
        tracker.track_removed("Person", "1").unwrap();
        let err = Reconciler::new(&tracker)
            .reconcile(request(fields(json!({"id": 1, "age": 3})), None))
            .unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Identity(IdentityError::Conflict { .. })
        ));
    }

    #[test]
    fn test_references_are_touched_one_level() {
        const REFS: &[ReferenceProperty] = &[ReferenceProperty::new("employer", "Company")];
        let tracker = IdentityMap::new();
        let values = fields(json!({
            "id": 1,
            "employer": {"id": 7, "name": "Acme", "owner": {"id": 8}},
            "spouse": null
        }));
        let result = Reconciler::new(&tracker)
            .reconcile(UpdateRequest {
                collection: "Person",
                key: "1",
                values,
                explicit: None,
                references: REFS,
                durable: None,
            })
            .unwrap();

        assert_eq!(result.references.len(), 1);
        assert_eq!(result.references[0].aggregate_type, "Company");
        assert_eq!(result.references[0].key, "7");
        assert_eq!(tracker.tracked_count(), 1);

        // The touch lands on the tracker of the session serving the target.
        let companies = IdentityMap::new();
        let touched = Reconciler::new(&companies)
            .touch_reference(&result.references[0])
            .unwrap();
        match touched {
            StagedOperation::Update {
                collection,
                key,
                write_set,
                ..
            } => {
                assert_eq!(collection, "Company");
                assert_eq!(key, "7");
                assert_eq!(write_set, WriteSet::All);
            }
            other => panic!("unexpected operation {:?}", other),
        }
        assert!(companies.try_get_tracked("Company", "7").unwrap().is_some());
        assert!(tracker.try_get_tracked("Company", "7").unwrap().is_none());
    }

    #[test]
    fn test_null_reference_is_not_touched() {
        const REFS: &[ReferenceProperty] = &[ReferenceProperty::new("employer", "Company")];
        let tracker = IdentityMap::new();
        let result = Reconciler::new(&tracker)
            .reconcile(UpdateRequest {
                collection: "Person",
                key: "1",
                values: fields(json!({"id": 1, "employer": null})),
                explicit: None,
                references: REFS,
                durable: None,
            })
            .unwrap();
        assert!(result.references.is_empty());
    }
}
