//! Pre-commit validation hooks.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::debug;

use crate::error::{
    RepositoryResult, ValidationDetail, ValidationError, ValidationSeverity,
};
use crate::model::{AggregateRoot, FieldValues, from_fields};

use super::operation::StagedOperation;

/// Validates a reconciled aggregate before its unit of work commits.
///
/// Any detail with [`ValidationSeverity::Error`] aborts the commit; warnings
/// are logged and the commit proceeds.
pub trait Validator<A: AggregateRoot>: Send + Sync {
    /// Returns the findings for one aggregate. Empty means valid.
    fn validate(&self, item: &A) -> Vec<ValidationDetail>;
}

impl<A, F> Validator<A> for F
where
    A: AggregateRoot,
    F: Fn(&A) -> Vec<ValidationDetail> + Send + Sync,
{
    fn validate(&self, item: &A) -> Vec<ValidationDetail> {
        self(item)
    }
}

/// A validator for staged field values, with the aggregate type erased.
pub(crate) trait FieldValidator: Send + Sync {
    fn validate_fields(&self, key: &str, values: &FieldValues) -> RepositoryResult<()>;
}

struct TypedValidator<A, V> {
    validator: V,
    _marker: PhantomData<fn(&A)>,
}

impl<A, V> FieldValidator for TypedValidator<A, V>
where
    A: AggregateRoot,
    V: Validator<A>,
{
    fn validate_fields(&self, key: &str, values: &FieldValues) -> RepositoryResult<()> {
        let item: A = from_fields(values.clone()).map_err(|e| ValidationError::Unreadable {
            aggregate_type: A::AGGREGATE_TYPE.to_string(),
            message: e.to_string(),
        })?;

        let details = self.validator.validate(&item);
        for warning in details
            .iter()
            .filter(|d| d.severity == ValidationSeverity::Warning)
        {
            debug!(
                aggregate_type = A::AGGREGATE_TYPE,
                key = key,
                property = %warning.property,
                "Validation warning: {}",
                warning.message
            );
        }

        match details
            .iter()
            .find(|d| d.severity == ValidationSeverity::Error)
        {
            Some(first) => Err(ValidationError::InvalidAggregate {
                aggregate_type: A::AGGREGATE_TYPE.to_string(),
                key: key.to_string(),
                message: format!("{}: {}", first.property, first.message),
                details,
            }
            .into()),
            None => Ok(()),
        }
    }
}

/// Validators registered per aggregate type.
#[derive(Clone, Default)]
pub struct ValidatorSet {
    validators: HashMap<&'static str, Vec<Arc<dyn FieldValidator>>>,
}

impl fmt::Debug for ValidatorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counts: Vec<_> = self
            .validators
            .iter()
            .map(|(name, list)| (*name, list.len()))
            .collect();
        counts.sort();
        f.debug_struct("ValidatorSet")
            .field("validators", &counts)
            .finish()
    }
}

impl ValidatorSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a validator for `A`.
    pub fn add<A, V>(&mut self, validator: V)
    where
        A: AggregateRoot,
        V: Validator<A> + 'static,
    {
        self.validators
            .entry(A::AGGREGATE_TYPE)
            .or_default()
            .push(Arc::new(TypedValidator::<A, V> {
                validator,
                _marker: PhantomData,
            }));
    }

    /// Returns true if no validator is registered.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Runs the validators for every staged add and update.
    ///
    /// Stops at the first failing operation; nothing is applied by validation.
    pub fn validate(&self, operations: &[StagedOperation]) -> RepositoryResult<()> {
        if self.validators.is_empty() {
            return Ok(());
        }
        for op in operations {
            let Some(values) = op.values() else {
                continue;
            };
            if let Some(validators) = self.validators.get(op.collection()) {
                for validator in validators {
                    validator.validate_fields(op.key(), values)?;
                }
            }
        }
        Ok(())
    }
}
