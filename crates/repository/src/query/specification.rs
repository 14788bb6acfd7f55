//! Typed specifications over aggregate roots.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{BitAnd, BitOr, Not};

use serde_json::json;

use crate::error::{ArgumentError, RepositoryResult};
use crate::model::{AggregateRoot, ReferenceProperty, to_fields};

use super::Predicate;

/// A reusable, composable predicate over `A` plus eager-load directives.
///
/// Specifications are pure values: applying the same specification twice
/// always yields the same result.
///
/// ```
/// # use helios_repository::model::AggregateRoot;
/// # use helios_repository::query::{Predicate, Specification};
/// # use serde::{Deserialize, Serialize};
/// # #[derive(Debug, Clone, Serialize, Deserialize)]
/// # struct Person { id: Option<i64>, name: String, age: i32 }
/// # impl AggregateRoot for Person {
/// #     type Key = i64;
/// #     const AGGREGATE_TYPE: &'static str = "Person";
/// #     fn id(&self) -> Option<&i64> { self.id.as_ref() }
/// #     fn set_id(&mut self, key: i64) { self.id = Some(key); }
/// # }
/// let adults = Specification::<Person>::where_(Predicate::ge("age", 18));
/// let named_ann = Specification::<Person>::where_(Predicate::eq("name", "Ann"));
///
/// let spec = adults & !named_ann;
/// let ann = Person { id: Some(1), name: "Ann".into(), age: 40 };
/// assert!(!spec.is_satisfied_by(&ann).unwrap());
/// ```
pub struct Specification<A> {
    predicate: Predicate,
    includes: Vec<String>,
    _marker: PhantomData<fn() -> A>,
}

impl<A> Clone for Specification<A> {
    fn clone(&self) -> Self {
        Self {
            predicate: self.predicate.clone(),
            includes: self.includes.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A> fmt::Debug for Specification<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Specification")
            .field("predicate", &self.predicate)
            .field("includes", &self.includes)
            .finish()
    }
}

impl<A> Default for Specification<A> {
    fn default() -> Self {
        Self::where_(Predicate::True)
    }
}

impl<A> PartialEq for Specification<A> {
    fn eq(&self, other: &Self) -> bool {
        self.predicate == other.predicate && self.includes == other.includes
    }
}

impl<A> Specification<A> {
    /// Wraps a predicate.
    pub fn where_(predicate: Predicate) -> Self {
        Self {
            predicate,
            includes: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Matches every aggregate.
    pub fn all() -> Self {
        Self::where_(Predicate::True)
    }

    /// Matches no aggregate.
    pub fn none() -> Self {
        Self::where_(Predicate::False)
    }

    /// Adds an eager-load directive for a reference property.
    pub fn include(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        if !self.includes.contains(&field) {
            self.includes.push(field);
        }
        self
    }

    /// Both specifications must hold. Includes are merged.
    pub fn and(self, other: Specification<A>) -> Self {
        let mut includes = self.includes;
        for field in other.includes {
            if !includes.contains(&field) {
                includes.push(field);
            }
        }
        Self {
            predicate: self.predicate.and(other.predicate),
            includes,
            _marker: PhantomData,
        }
    }

    /// Either specification must hold. Includes are merged.
    pub fn or(self, other: Specification<A>) -> Self {
        let mut includes = self.includes;
        for field in other.includes {
            if !includes.contains(&field) {
                includes.push(field);
            }
        }
        Self {
            predicate: self.predicate.or(other.predicate),
            includes,
            _marker: PhantomData,
        }
    }

    /// Negates the predicate. Includes are kept.
    pub fn negate(self) -> Self {
        Self {
            predicate: self.predicate.negate(),
            includes: self.includes,
            _marker: PhantomData,
        }
    }

    /// The composed predicate handed to backends.
    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// The eager-load directives.
    pub fn includes(&self) -> &[String] {
        &self.includes
    }
}

impl<A: AggregateRoot> Specification<A> {
    /// Matches the aggregate with the given key.
    pub fn by_key(key: &A::Key) -> Self {
        Self::where_(Predicate::eq(A::KEY_FIELD, json!(key)))
    }

    /// Evaluates the specification against one aggregate in memory.
    pub fn is_satisfied_by(&self, item: &A) -> RepositoryResult<bool> {
        Ok(self.predicate.matches(&to_fields(item)?))
    }

    /// Checks predicate paths and resolves every include to a declared reference.
    pub fn validate(&self) -> RepositoryResult<Vec<&'static ReferenceProperty>> {
        self.predicate.validate()?;
        self.includes
            .iter()
            .map(|field| -> RepositoryResult<&'static ReferenceProperty> {
                if field.is_empty() {
                    return Err(ArgumentError::EmptyProperty {
                        context: format!("include on {}", A::AGGREGATE_TYPE),
                    }
                    .into());
                }
                A::REFERENCES
                    .iter()
                    .find(|r| r.field == field.as_str())
                    .ok_or_else(|| {
                        ArgumentError::UnknownProperty {
                            aggregate_type: A::AGGREGATE_TYPE.to_string(),
                            property: field.clone(),
                        }
                        .into()
                    })
            })
            .collect()
    }
}

impl<A> BitAnd for Specification<A> {
    type Output = Specification<A>;

    fn bitand(self, rhs: Self) -> Self::Output {
        self.and(rhs)
    }
}

impl<A> BitOr for Specification<A> {
    type Output = Specification<A>;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.or(rhs)
    }
}

impl<A> Not for Specification<A> {
    type Output = Specification<A>;

    fn not(self) -> Self::Output {
        self.negate()
    }
}

impl<A> From<Predicate> for Specification<A> {
    fn from(predicate: Predicate) -> Self {
        Self::where_(predicate)
    }
}
