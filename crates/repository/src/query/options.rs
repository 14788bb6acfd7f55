//! Paging, sorting and filter composition.

use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RepositoryResult;
use crate::model::{FieldValues, lookup_path};

use super::predicate::{sort_ordering, validate_path};
use super::{Predicate, Specification};

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Smallest first. Nulls first.
    #[default]
    Ascending,
    /// Largest first. Nulls last.
    Descending,
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortDirective {
    /// Dotted property path.
    pub path: String,
    /// Direction.
    pub direction: SortDirection,
}

impl SortDirective {
    /// Ascending sort on `path`.
    pub fn ascending(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            direction: SortDirection::Ascending,
        }
    }

    /// Descending sort on `path`.
    pub fn descending(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// Anything that exposes field values, so queries can be applied to it.
pub trait Queryable {
    /// The item's field values.
    fn field_values(&self) -> &FieldValues;

    /// Resolves a dotted path.
    fn field(&self, path: &str) -> Option<&Value> {
        lookup_path(self.field_values(), path)
    }
}

impl Queryable for FieldValues {
    fn field_values(&self) -> &FieldValues {
        self
    }
}

impl<T: Queryable> Queryable for &T {
    fn field_values(&self) -> &FieldValues {
        (**self).field_values()
    }
}

/// The untyped query a backend executes: filter, then sort, then skip, then take.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    /// Filter predicate.
    pub predicate: Predicate,
    /// Sort keys, most significant first.
    pub sort: Vec<SortDirective>,
    /// Number of matches to skip.
    pub skip: Option<usize>,
    /// Maximum number of results.
    pub take: Option<usize>,
}

impl QuerySpec {
    /// A query matching `predicate` with no ordering or paging.
    pub fn filter(predicate: Predicate) -> Self {
        Self {
            predicate,
            ..Default::default()
        }
    }

    /// Returns true if the query is the identity transform.
    pub fn is_empty(&self) -> bool {
        self.predicate.is_trivial()
            && self.sort.is_empty()
            && self.skip.unwrap_or(0) == 0
            && self.take.is_none()
    }

    /// Applies the query to an in-memory sequence in insertion order.
    ///
    /// Sorting is stable, so items with equal sort keys keep their order.
    pub fn apply<T: Queryable>(&self, items: Vec<T>) -> Vec<T> {
        if self.is_empty() {
            return items;
        }

        let mut matched: Vec<T> = items
            .into_iter()
            .filter(|item| self.predicate.matches(item.field_values()))
            .collect();

        if !self.sort.is_empty() {
            matched.sort_by(|a, b| {
                for directive in &self.sort {
                    let left = a.field(&directive.path).unwrap_or(&Value::Null);
                    let right = b.field(&directive.path).unwrap_or(&Value::Null);
                    let ordering = match directive.direction {
                        SortDirection::Ascending => sort_ordering(left, right),
                        SortDirection::Descending => sort_ordering(right, left),
                    };
                    if ordering.is_ne() {
                        return ordering;
                    }
                }
                std::cmp::Ordering::Equal
            });
        }

        let skip = self.skip.unwrap_or(0);
        let take = self.take.unwrap_or(usize::MAX);
        matched.into_iter().skip(skip).take(take).collect()
    }
}

/// Filter, sort and paging options for `find_many`.
///
/// A default-constructed value is empty, and applying an empty value to any
/// sequence returns the sequence unchanged.
pub struct QueryOptions<A> {
    filter: Option<Specification<A>>,
    sort: Vec<SortDirective>,
    skip: Option<usize>,
    take: Option<usize>,
    _marker: PhantomData<fn() -> A>,
}

impl<A> Default for QueryOptions<A> {
    fn default() -> Self {
        Self {
            filter: None,
            sort: Vec::new(),
            skip: None,
            take: None,
            _marker: PhantomData,
        }
    }
}

impl<A> Clone for QueryOptions<A> {
    fn clone(&self) -> Self {
        Self {
            filter: self.filter.clone(),
            sort: self.sort.clone(),
            skip: self.skip,
            take: self.take,
            _marker: PhantomData,
        }
    }
}

impl<A> fmt::Debug for QueryOptions<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("filter", &self.filter)
            .field("sort", &self.sort)
            .field("skip", &self.skip)
            .field("take", &self.take)
            .finish()
    }
}

impl<A> QueryOptions<A> {
    /// Empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filter, and-ed with any filter already present.
    pub fn filter(mut self, spec: Specification<A>) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(spec),
            None => spec,
        });
        self
    }

    /// Replaces the sort keys with an ascending sort on `path`.
    pub fn sort_by(mut self, path: impl Into<String>) -> Self {
        self.sort = vec![SortDirective::ascending(path)];
        self
    }

    /// Replaces the sort keys with a descending sort on `path`.
    pub fn sort_by_descending(mut self, path: impl Into<String>) -> Self {
        self.sort = vec![SortDirective::descending(path)];
        self
    }

    /// Appends a secondary sort key.
    pub fn then_by(mut self, directive: SortDirective) -> Self {
        self.sort.push(directive);
        self
    }

    /// Skips the first `count` matches.
    pub fn skip(mut self, count: usize) -> Self {
        self.skip = Some(count);
        self
    }

    /// Returns at most `count` matches.
    pub fn take(mut self, count: usize) -> Self {
        self.take = Some(count);
        self
    }

    /// One-based page of `size` items.
    pub fn paging(self, page: usize, size: usize) -> Self {
        self.skip(page.saturating_sub(1).saturating_mul(size)).take(size)
    }

    /// Returns true if applying these options is the identity transform.
    pub fn is_empty(&self) -> bool {
        self.filter
            .as_ref()
            .is_none_or(|f| f.predicate().is_trivial() && f.includes().is_empty())
            && self.sort.is_empty()
            && self.skip.unwrap_or(0) == 0
            && self.take.is_none()
    }

    /// The filter specification, if any.
    pub fn filter_spec(&self) -> Option<&Specification<A>> {
        self.filter.as_ref()
    }

    /// Sort keys.
    pub fn sort(&self) -> &[SortDirective] {
        &self.sort
    }

    /// Checks the sort paths.
    pub fn validate(&self) -> RepositoryResult<()> {
        if let Some(filter) = &self.filter {
            filter.predicate().validate()?;
        }
        self.sort
            .iter()
            .try_for_each(|s| validate_path(&s.path, "sort"))
    }

    /// Combines a specification with these options into a backend query.
    pub fn to_query_spec(&self, spec: &Specification<A>) -> QuerySpec {
        let predicate = match &self.filter {
            Some(filter) => spec.predicate().clone().and(filter.predicate().clone()),
            None => spec.predicate().clone(),
        };
        QuerySpec {
            predicate,
            sort: self.sort.clone(),
            skip: self.skip,
            take: self.take,
        }
    }

    /// Applies the options to an in-memory sequence.
    pub fn apply<T: Queryable>(&self, items: Vec<T>) -> Vec<T> {
        if self.is_empty() {
            return items;
        }
        self.to_query_spec(&Specification::all()).apply(items)
    }
}
