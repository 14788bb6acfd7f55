//! The repository contract.
//!
//! [`Repository<A>`] is the uniform operation surface application code uses
//! for one aggregate type. Every backend is reached through the same
//! [`BackendSession`] contract, so the semantics below hold for all of them:
//!
//! - mutations are reconciled against the session's identity tracking and
//!   staged on the scope's [`UnitOfWork`]
//! - with the unit of work disabled, each call commits its own operations
//!   before returning
//! - reads observe the durable store and attach what they load as unchanged
//! - the cancellation token is checked before every backend call

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::{Number, Value};
use tokio_util::sync::CancellationToken;

use crate::error::{
    ArgumentError, BackendError, RepositoryError, RepositoryResult, ResourceError,
};
use crate::model::{
    AggregateKey, AggregateRoot, FieldValues, ReferenceProperty, from_fields, storage_key_of,
    to_fields,
};
use crate::query::{QueryOptions, QuerySpec, Specification, validate_path};

use super::backend::{AggregateFunction, BackendKind, BackendSession, EntryState};
use super::operation::StagedOperation;
use super::reconcile::{Reconciler, UpdateRequest};
use super::scope::ScopedSession;
use super::unit_of_work::UnitOfWork;

/// A numeric type a `sum` can be read into.
pub trait Numeric: Sized {
    /// The sum of no values.
    fn zero() -> Self;

    /// Converts a backend number, or `None` if it does not fit.
    fn from_number(number: &Number) -> Option<Self>;
}

macro_rules! impl_integer_numeric {
    ($($t:ty),*) => {
        $(
            impl Numeric for $t {
                fn zero() -> Self {
                    0
                }

                fn from_number(number: &Number) -> Option<Self> {
                    if let Some(n) = number.as_i64() {
                        return <$t>::try_from(n).ok();
                    }
                    number.as_u64().and_then(|n| <$t>::try_from(n).ok())
                }
            }
        )*
    };
}

impl_integer_numeric!(i32, i64, u32, u64);

impl Numeric for f64 {
    fn zero() -> Self {
        0.0
    }

    fn from_number(number: &Number) -> Option<Self> {
        number.as_f64()
    }
}

impl Numeric for f32 {
    fn zero() -> Self {
        0.0
    }

    fn from_number(number: &Number) -> Option<Self> {
        number.as_f64().map(|n| n as f32)
    }
}

fn check_cancel(cancel: &CancellationToken) -> RepositoryResult<()> {
    if cancel.is_cancelled() {
        return Err(RepositoryError::Cancelled);
    }
    Ok(())
}

/// Repository for aggregate type `A` within one scope.
///
/// Obtained from [`RepositoryScope::repository`](super::RepositoryScope::repository).
/// Cloning yields another handle onto the same session and unit of work.
pub struct Repository<A> {
    scoped: Arc<ScopedSession>,
    _marker: PhantomData<fn() -> A>,
}

impl<A> Clone for Repository<A> {
    fn clone(&self) -> Self {
        Self {
            scoped: Arc::clone(&self.scoped),
            _marker: PhantomData,
        }
    }
}

impl<A: AggregateRoot> fmt::Debug for Repository<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("aggregate_type", &A::AGGREGATE_TYPE)
            .field("name", &self.scoped.name())
            .field("backend", &self.scoped.session().backend_name())
            .finish()
    }
}

impl<A: AggregateRoot> Repository<A> {
    pub(crate) fn new(scoped: Arc<ScopedSession>) -> Self {
        Self {
            scoped,
            _marker: PhantomData,
        }
    }

    /// The repository name this repository was resolved under.
    pub fn name(&self) -> &str {
        self.scoped.name()
    }

    /// The kind of backend behind this repository.
    pub fn backend_kind(&self) -> BackendKind {
        self.session().kind()
    }

    /// The unit of work shared by every repository of this name in the scope.
    pub fn unit_of_work(&self) -> &UnitOfWork {
        self.scoped.unit_of_work()
    }

    /// Number of entries tracked by the underlying session.
    pub fn tracked_count(&self) -> usize {
        self.session().tracker().tracked_count()
    }

    fn session(&self) -> &dyn BackendSession {
        self.scoped.session()
    }

    fn begin(&self, cancel: &CancellationToken) -> RepositoryResult<()> {
        self.scoped.ensure_open()?;
        check_cancel(cancel)
    }

    fn begin_mutation(&self, cancel: &CancellationToken) -> RepositoryResult<&UnitOfWork> {
        self.begin(cancel)?;
        let unit_of_work = self.scoped.unit_of_work();
        unit_of_work.ensure_open()?;
        Ok(unit_of_work)
    }

    /// Commits the call's operations when the unit of work is disabled.
    async fn finish<T>(
        &self,
        result: RepositoryResult<T>,
        cancel: &CancellationToken,
    ) -> RepositoryResult<T> {
        self.finish_touching(result, &[], cancel).await
    }

    /// Like [`finish`](Self::finish), also settling the units of work of
    /// other repository names the call staged reference touches on.
    ///
    /// Disabled units of work among them commit after this repository's own
    /// operations, or drop their pending touches when the call failed.
    async fn finish_touching<T>(
        &self,
        result: RepositoryResult<T>,
        touched: &[Arc<ScopedSession>],
        cancel: &CancellationToken,
    ) -> RepositoryResult<T> {
        let implicit: Vec<&UnitOfWork> = touched
            .iter()
            .map(|scoped| scoped.unit_of_work())
            .filter(|unit_of_work| !unit_of_work.is_enabled())
            .collect();
        let unit_of_work = self.scoped.unit_of_work();

        let value = match result {
            Ok(value) => value,
            Err(err) => {
                if !unit_of_work.is_enabled() {
                    unit_of_work.rollback_pending();
                }
                implicit.iter().for_each(|other| other.rollback_pending());
                return Err(err);
            }
        };
        if !unit_of_work.is_enabled()
            && let Err(err) = unit_of_work.commit_implicit(cancel).await
        {
            implicit.iter().for_each(|other| other.rollback_pending());
            return Err(err);
        }
        for other in implicit {
            other.commit_implicit(cancel).await?;
        }
        Ok(value)
    }

    fn key_of(item: &A) -> RepositoryResult<String> {
        item.id().map(AggregateKey::to_storage_key).ok_or_else(|| {
            ArgumentError::MissingKey {
                aggregate_type: A::AGGREGATE_TYPE.to_string(),
            }
            .into()
        })
    }

    fn not_found(key: &str) -> RepositoryError {
        ResourceError::NotFound {
            aggregate_type: A::AGGREGATE_TYPE.to_string(),
            key: key.to_string(),
        }
        .into()
    }

    // ------------------------------------------------------------------
    // Add
    // ------------------------------------------------------------------

    /// Stages a new aggregate for insert and returns it with its key.
    ///
    /// Aggregates without a key get one generated by the backend. Adding a
    /// key that is already tracked fails with `AlreadyExists`; a key that only
    /// exists durably fails the same way at commit.
    pub async fn add(&self, item: A, cancel: &CancellationToken) -> RepositoryResult<A> {
        let unit_of_work = self.begin_mutation(cancel)?;
        let result = self.stage_add(unit_of_work, item, cancel).await;
        self.finish(result, cancel).await
    }

    /// Stages several aggregates for insert, in order.
    pub async fn add_range(
        &self,
        items: Vec<A>,
        cancel: &CancellationToken,
    ) -> RepositoryResult<Vec<A>> {
        let unit_of_work = self.begin_mutation(cancel)?;
        let result = async {
            let mut added = Vec::with_capacity(items.len());
            for item in items {
                added.push(self.stage_add(unit_of_work, item, cancel).await?);
            }
            Ok::<_, RepositoryError>(added)
        }
        .await;
        self.finish(result, cancel).await
    }

    async fn stage_add(
        &self,
        unit_of_work: &UnitOfWork,
        mut item: A,
        cancel: &CancellationToken,
    ) -> RepositoryResult<A> {
        if item.id().is_none() {
            check_cancel(cancel)?;
            let identity = self.session().generate_identity(A::AGGREGATE_TYPE).await?;
            let key = A::Key::from_generated(&identity).ok_or_else(|| {
                ResourceError::KeyGeneration {
                    aggregate_type: A::AGGREGATE_TYPE.to_string(),
                }
            })?;
            item.set_id(key);
        }

        let key = Self::key_of(&item)?;
        let values = to_fields(&item)?;
        let tracker = self.session().tracker();
        if let Some(entry) = tracker.try_get_tracked(A::AGGREGATE_TYPE, &key)?
            && entry.state != EntryState::Deleted
        {
            return Err(ResourceError::AlreadyExists {
                aggregate_type: A::AGGREGATE_TYPE.to_string(),
                key,
            }
            .into());
        }

        tracker.track_added(A::AGGREGATE_TYPE, &key, values.clone())?;
        unit_of_work.stage(StagedOperation::Add {
            collection: A::AGGREGATE_TYPE.to_string(),
            key,
            values,
        })?;
        Ok(item)
    }

    // ------------------------------------------------------------------
    // Remove
    // ------------------------------------------------------------------

    /// Stages every durable aggregate matching `spec` for delete.
    ///
    /// Returns the number of aggregates staged.
    pub async fn remove(
        &self,
        spec: &Specification<A>,
        cancel: &CancellationToken,
    ) -> RepositoryResult<usize> {
        spec.validate()?;
        let unit_of_work = self.begin_mutation(cancel)?;
        let result = async {
            check_cancel(cancel)?;
            let query = QuerySpec::filter(spec.predicate().clone());
            let rows = self.session().query(A::AGGREGATE_TYPE, &query).await?;
            let mut removed = 0;
            for row in rows {
                let Some(key) = row.get(A::KEY_FIELD).and_then(storage_key_of) else {
                    continue;
                };
                if self.stage_remove(unit_of_work, &key)? {
                    removed += 1;
                }
            }
            Ok::<_, RepositoryError>(removed)
        }
        .await;
        self.finish(result, cancel).await
    }

    /// Stages the aggregate with the given key for delete.
    ///
    /// Fails with `NotFound` if the key is neither durable nor staged for insert.
    pub async fn remove_by_key(
        &self,
        key: &A::Key,
        cancel: &CancellationToken,
    ) -> RepositoryResult<()> {
        let unit_of_work = self.begin_mutation(cancel)?;
        let result = self
            .stage_remove_key(unit_of_work, &key.to_storage_key(), cancel)
            .await;
        self.finish(result, cancel).await
    }

    /// Stages one aggregate for delete.
    pub async fn remove_item(&self, item: &A, cancel: &CancellationToken) -> RepositoryResult<()> {
        let key = Self::key_of(item)?;
        let unit_of_work = self.begin_mutation(cancel)?;
        let result = self.stage_remove_key(unit_of_work, &key, cancel).await;
        self.finish(result, cancel).await
    }

    /// Stages several aggregates for delete, in order.
    ///
    /// Every item must carry a key; nothing is staged otherwise.
    pub async fn remove_range(&self, items: &[A], cancel: &CancellationToken) -> RepositoryResult<()> {
        let keys = items.iter().map(Self::key_of).collect::<RepositoryResult<Vec<_>>>()?;
        let unit_of_work = self.begin_mutation(cancel)?;
        let result = async {
            for key in &keys {
                self.stage_remove_key(unit_of_work, key, cancel).await?;
            }
            Ok::<_, RepositoryError>(())
        }
        .await;
        self.finish(result, cancel).await
    }

    async fn stage_remove_key(
        &self,
        unit_of_work: &UnitOfWork,
        key: &str,
        cancel: &CancellationToken,
    ) -> RepositoryResult<()> {
        let tracked = self.session().tracker().try_get_tracked(A::AGGREGATE_TYPE, key)?;
        match tracked.map(|entry| entry.state) {
            Some(EntryState::Deleted) => return Err(Self::not_found(key)),
            Some(_) => {}
            None => {
                check_cancel(cancel)?;
                if !self.session().exists(A::AGGREGATE_TYPE, key).await? {
                    return Err(Self::not_found(key));
                }
            }
        }
        self.stage_remove(unit_of_work, key)?;
        Ok(())
    }

    /// Returns false if the key is already staged for delete.
    fn stage_remove(&self, unit_of_work: &UnitOfWork, key: &str) -> RepositoryResult<bool> {
        let tracker = self.session().tracker();
        if let Some(entry) = tracker.try_get_tracked(A::AGGREGATE_TYPE, key)?
            && entry.state == EntryState::Deleted
        {
            return Ok(false);
        }
        tracker.track_removed(A::AGGREGATE_TYPE, key)?;
        unit_of_work.stage(StagedOperation::Remove {
            collection: A::AGGREGATE_TYPE.to_string(),
            key: key.to_string(),
        })?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Reconciles `item` against tracked state and stages its changed fields.
    ///
    /// An aggregate that is not tracked yet must exist durably and is written
    /// whole. Referenced aggregates are touched one level deep.
    pub async fn update(&self, item: &A, cancel: &CancellationToken) -> RepositoryResult<()> {
        let key = Self::key_of(item)?;
        let values = to_fields(item)?;
        let unit_of_work = self.begin_mutation(cancel)?;
        let mut touched = Vec::new();
        let result = self
            .stage_update(unit_of_work, key, values, None, &mut touched, cancel)
            .await;
        self.finish_touching(result, &touched, cancel).await
    }

    /// Like [`update`](Self::update), but writes exactly the named properties,
    /// whether or not their values changed.
    ///
    /// The list must be non-empty, must not name the key property, and every
    /// name must be a serialized property of the aggregate.
    pub async fn update_fields(
        &self,
        item: &A,
        properties: &[&str],
        cancel: &CancellationToken,
    ) -> RepositoryResult<()> {
        let key = Self::key_of(item)?;
        let values = to_fields(item)?;
        let explicit = Self::explicit_properties(&values, properties)?;
        let unit_of_work = self.begin_mutation(cancel)?;
        let mut touched = Vec::new();
        let result = self
            .stage_update(
                unit_of_work,
                key,
                values,
                Some(explicit.as_slice()),
                &mut touched,
                cancel,
            )
            .await;
        self.finish_touching(result, &touched, cancel).await
    }

    /// Updates several aggregates, in order.
    ///
    /// Every item must carry a key; nothing is staged otherwise.
    pub async fn update_range(&self, items: &[A], cancel: &CancellationToken) -> RepositoryResult<()> {
        let prepared = items
            .iter()
            .map(|item| -> RepositoryResult<(String, FieldValues)> {
                Ok((Self::key_of(item)?, to_fields(item)?))
            })
            .collect::<RepositoryResult<Vec<_>>>()?;
        let unit_of_work = self.begin_mutation(cancel)?;
        let mut touched = Vec::new();
        let result = async {
            for (key, values) in prepared {
                self.stage_update(unit_of_work, key, values, None, &mut touched, cancel)
                    .await?;
            }
            Ok::<_, RepositoryError>(())
        }
        .await;
        self.finish_touching(result, &touched, cancel).await
    }

    fn explicit_properties(values: &FieldValues, properties: &[&str]) -> RepositoryResult<Vec<String>> {
        if properties.is_empty() {
            return Err(ArgumentError::NoProperties {
                aggregate_type: A::AGGREGATE_TYPE.to_string(),
            }
            .into());
        }
        properties
            .iter()
            .map(|property| -> RepositoryResult<String> {
                if property.is_empty() {
                    return Err(ArgumentError::EmptyProperty {
                        context: format!("update of {}", A::AGGREGATE_TYPE),
                    }
                    .into());
                }
                if *property == A::KEY_FIELD {
                    return Err(ArgumentError::KeyProperty {
                        aggregate_type: A::AGGREGATE_TYPE.to_string(),
                        property: property.to_string(),
                    }
                    .into());
                }
                if !values.contains_key(*property) {
                    return Err(ArgumentError::UnknownProperty {
                        aggregate_type: A::AGGREGATE_TYPE.to_string(),
                        property: property.to_string(),
                    }
                    .into());
                }
                Ok(property.to_string())
            })
            .collect()
    }

    async fn stage_update(
        &self,
        unit_of_work: &UnitOfWork,
        key: String,
        values: FieldValues,
        explicit: Option<&[String]>,
        touched: &mut Vec<Arc<ScopedSession>>,
        cancel: &CancellationToken,
    ) -> RepositoryResult<()> {
        let tracker = self.session().tracker();
        // A failed lookup is left to the reconciler's fallback.
        let durable = match tracker.try_get_tracked(A::AGGREGATE_TYPE, &key) {
            Ok(Some(entry)) if entry.state == EntryState::Deleted => {
                return Err(Self::not_found(&key));
            }
            Ok(None) => {
                check_cancel(cancel)?;
                match self.session().load(A::AGGREGATE_TYPE, &key).await? {
                    Some(durable) => Some(durable),
                    None => return Err(Self::not_found(&key)),
                }
            }
            Ok(Some(_)) | Err(_) => None,
        };

        let reconciled = Reconciler::new(tracker).reconcile(UpdateRequest {
            collection: A::AGGREGATE_TYPE,
            key: &key,
            values,
            explicit,
            references: A::REFERENCES,
            durable,
        })?;
        unit_of_work.stage(reconciled.operation)?;

        for reference in &reconciled.references {
            let target = self.scoped.resolve(reference.aggregate_type)?;
            let operation =
                Reconciler::new(target.session().tracker()).touch_reference(reference)?;
            target.unit_of_work().stage(operation)?;
            if !Arc::ptr_eq(&target, &self.scoped)
                && !touched.iter().any(|other| Arc::ptr_eq(other, &target))
            {
                touched.push(target);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Reads the durable aggregate with the given key.
    pub async fn get(&self, key: &A::Key, cancel: &CancellationToken) -> RepositoryResult<Option<A>> {
        self.begin(cancel)?;
        let key = key.to_storage_key();
        match self.session().load(A::AGGREGATE_TYPE, &key).await? {
            Some(values) => {
                self.session()
                    .tracker()
                    .attach_loaded(A::AGGREGATE_TYPE, &key, &values);
                Ok(Some(from_fields(values)?))
            }
            None => Ok(None),
        }
    }

    /// Checks whether a durable aggregate with the given key exists.
    pub async fn exists(&self, key: &A::Key, cancel: &CancellationToken) -> RepositoryResult<bool> {
        self.begin(cancel)?;
        self.session()
            .exists(A::AGGREGATE_TYPE, &key.to_storage_key())
            .await
    }

    /// Returns the first aggregate matching `spec` after `options` are applied.
    pub async fn find_one(
        &self,
        spec: &Specification<A>,
        options: &QueryOptions<A>,
        cancel: &CancellationToken,
    ) -> RepositoryResult<Option<A>> {
        let references = Self::prepare_query(spec, options)?;
        self.begin(cancel)?;
        let mut query = options.to_query_spec(spec);
        query.take = Some(query.take.map_or(1, |take| take.min(1)));
        let rows = self.fetch(&query, &references, cancel).await?;
        rows.into_iter().next().map(from_fields).transpose()
    }

    /// Returns every aggregate matching `spec`, filtered, sorted and paged by
    /// `options`.
    ///
    /// Included references are refreshed from their own durable records.
    pub async fn find_many(
        &self,
        spec: &Specification<A>,
        options: &QueryOptions<A>,
        cancel: &CancellationToken,
    ) -> RepositoryResult<Vec<A>> {
        let references = Self::prepare_query(spec, options)?;
        self.begin(cancel)?;
        let query = options.to_query_spec(spec);
        let rows = self.fetch(&query, &references, cancel).await?;
        rows.into_iter().map(from_fields).collect()
    }

    /// Counts durable aggregates matching `spec`.
    pub async fn count(&self, spec: &Specification<A>, cancel: &CancellationToken) -> RepositoryResult<usize> {
        let count = self.long_count(spec, cancel).await?;
        usize::try_from(count).map_err(|_| {
            BackendError::QueryError {
                message: format!("count of {} exceeds usize", A::AGGREGATE_TYPE),
            }
            .into()
        })
    }

    /// Counts durable aggregates matching `spec` as a 64-bit value.
    pub async fn long_count(
        &self,
        spec: &Specification<A>,
        cancel: &CancellationToken,
    ) -> RepositoryResult<u64> {
        spec.validate()?;
        self.begin(cancel)?;
        self.session().count(A::AGGREGATE_TYPE, spec.predicate()).await
    }

    /// Sums the numeric values at `path` over matching aggregates.
    ///
    /// Missing and non-numeric values are skipped; the sum of nothing is zero.
    pub async fn sum<N: Numeric>(
        &self,
        spec: &Specification<A>,
        path: &str,
        cancel: &CancellationToken,
    ) -> RepositoryResult<N> {
        match self.aggregate(spec, path, AggregateFunction::Sum, cancel).await? {
            Some(total) => N::from_number(&total).ok_or_else(|| {
                BackendError::QueryError {
                    message: format!(
                        "sum of {}.{} ({}) does not fit the requested type",
                        A::AGGREGATE_TYPE,
                        path,
                        total
                    ),
                }
                .into()
            }),
            None => Ok(N::zero()),
        }
    }

    /// Averages the numeric values at `path` over matching aggregates.
    ///
    /// Returns `None` when no numeric value matched.
    pub async fn average(
        &self,
        spec: &Specification<A>,
        path: &str,
        cancel: &CancellationToken,
    ) -> RepositoryResult<Option<f64>> {
        Ok(self
            .aggregate(spec, path, AggregateFunction::Average, cancel)
            .await?
            .and_then(|mean| mean.as_f64()))
    }

    async fn aggregate(
        &self,
        spec: &Specification<A>,
        path: &str,
        function: AggregateFunction,
        cancel: &CancellationToken,
    ) -> RepositoryResult<Option<Number>> {
        spec.validate()?;
        validate_path(path, "aggregate")?;
        self.begin(cancel)?;
        self.session()
            .aggregate(A::AGGREGATE_TYPE, spec.predicate(), path, function)
            .await
    }

    fn prepare_query(
        spec: &Specification<A>,
        options: &QueryOptions<A>,
    ) -> RepositoryResult<Vec<&'static ReferenceProperty>> {
        let mut references = spec.validate()?;
        options.validate()?;
        if let Some(filter) = options.filter_spec() {
            for reference in filter.validate()? {
                if !references.contains(&reference) {
                    references.push(reference);
                }
            }
        }
        Ok(references)
    }

    /// Runs a query, attaches the rows, and applies includes.
    async fn fetch(
        &self,
        query: &QuerySpec,
        references: &[&'static ReferenceProperty],
        cancel: &CancellationToken,
    ) -> RepositoryResult<Vec<FieldValues>> {
        let mut rows = self.session().query(A::AGGREGATE_TYPE, query).await?;
        let tracker = self.session().tracker();
        for row in &rows {
            if let Some(key) = row.get(A::KEY_FIELD).and_then(storage_key_of) {
                tracker.attach_loaded(A::AGGREGATE_TYPE, &key, row);
            }
        }
        if !references.is_empty() {
            self.apply_includes(&mut rows, references, cancel).await?;
        }
        Ok(rows)
    }

    /// Replaces each included reference with its referenced durable record.
    ///
    /// Records are read through the session serving the referenced aggregate
    /// type, which may belong to another repository name in this scope.
    async fn apply_includes(
        &self,
        rows: &mut [FieldValues],
        references: &[&'static ReferenceProperty],
        cancel: &CancellationToken,
    ) -> RepositoryResult<()> {
        let mut targets: HashMap<&'static str, Arc<ScopedSession>> = HashMap::new();
        for reference in references {
            if !targets.contains_key(reference.aggregate_type) {
                let target = self.scoped.resolve(reference.aggregate_type)?;
                targets.insert(reference.aggregate_type, target);
            }
        }
        let mut loaded: HashMap<(&'static str, String), Option<FieldValues>> = HashMap::new();

        for row in rows.iter_mut() {
            for reference in references {
                let Some(key) = row
                    .get(reference.field)
                    .and_then(Value::as_object)
                    .and_then(|nested| nested.get(reference.key_field))
                    .and_then(storage_key_of)
                else {
                    continue;
                };

                let cache_key = (reference.aggregate_type, key);
                let fresh = match loaded.get(&cache_key).cloned() {
                    Some(cached) => cached,
                    None => {
                        check_cancel(cancel)?;
                        let Some(target) = targets.get(reference.aggregate_type) else {
                            continue;
                        };
                        let session = target.session();
                        let record = session.load(reference.aggregate_type, &cache_key.1).await?;
                        if let Some(values) = &record {
                            session.tracker().attach_loaded(
                                reference.aggregate_type,
                                &cache_key.1,
                                values,
                            );
                        }
                        loaded.insert(cache_key, record.clone());
                        record
                    }
                };

                if let Some(values) = fresh {
                    row.insert(reference.field.to_string(), Value::Object(values));
                }
            }
        }
        Ok(())
    }
}
