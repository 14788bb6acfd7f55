//! Specifications and query options.
//!
//! - [`Predicate`] - untyped predicate tree evaluated in memory or pushed down to a backend
//! - [`Specification`] - typed, composable predicate with eager-load directives
//! - [`QueryOptions`] - filter, sort, skip and take, applied in that order
//! - [`QuerySpec`] - the untyped form backends execute

mod options;
mod predicate;
mod specification;

pub use options::{QueryOptions, QuerySpec, Queryable, SortDirection, SortDirective};
pub use predicate::{CompareOp, Predicate};
pub use specification::Specification;

pub(crate) use predicate::validate_path;
