//! Entity model for aggregate roots.
//!
//! - [`AggregateRoot`] - identity, type name and statically declared references
//! - [`AggregateKey`] - comparable, equatable key types
//! - [`FieldValues`] / [`WriteSet`] - the field-level view used by reconciliation

mod aggregate;
mod fields;

pub use aggregate::{AggregateKey, AggregateRoot, GeneratedIdentity, ReferenceProperty};
pub use fields::{
    FieldValues, WriteSet, diff_fields, from_fields, lookup_path, storage_key_of, to_fields,
};

