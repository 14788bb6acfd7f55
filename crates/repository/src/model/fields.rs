//! Field-level views of aggregates.
//!
//! Reconciliation works on the serialized form of an aggregate: a JSON object
//! whose top-level properties are the aggregate's fields.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::error::{ArgumentError, BackendError, RepositoryResult};

use super::AggregateRoot;

/// The serialized fields of one aggregate instance.
pub type FieldValues = Map<String, Value>;

/// Serializes an aggregate into its field values.
pub fn to_fields<A: AggregateRoot>(item: &A) -> RepositoryResult<FieldValues> {
    match serde_json::to_value(item)? {
        Value::Object(fields) => Ok(fields),
        other => Err(ArgumentError::NotAnObject {
            aggregate_type: A::AGGREGATE_TYPE.to_string(),
            found: json_type_name(&other).to_string(),
        }
        .into()),
    }
}

/// Deserializes field values back into an aggregate.
pub fn from_fields<A: AggregateRoot>(fields: FieldValues) -> RepositoryResult<A> {
    serde_json::from_value(Value::Object(fields)).map_err(|e| {
        BackendError::SerializationError {
            message: format!("cannot read {} from stored fields: {}", A::AGGREGATE_TYPE, e),
        }
        .into()
    })
}

/// Computes the fields whose current value differs from the original value.
///
/// A missing property is read as `null`, and `null` is compared like any other
/// value: `null -> 5` and `5 -> null` are both modifications.
pub fn diff_fields(original: &FieldValues, current: &FieldValues) -> BTreeSet<String> {
    original
        .keys()
        .chain(current.keys())
        .filter(|name| {
            let before = original.get(*name).unwrap_or(&Value::Null);
            let after = current.get(*name).unwrap_or(&Value::Null);
            before != after
        })
        .cloned()
        .collect()
}

/// Resolves a dotted path (`address.city`) against field values.
///
/// After the first segment, numeric segments index arrays (`tags.0`) and
/// never name object properties.
pub fn lookup_path<'a>(fields: &'a FieldValues, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = fields.get(segments.next()?)?;
    for segment in segments {
        let index = segment.parse::<usize>().ok();
        current = match (current, index) {
            (Value::Object(map), None) => map.get(segment)?,
            (Value::Array(items), Some(i)) => items.get(i)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Renders a serialized key value as a storage key.
///
/// Matches [`AggregateKey::to_storage_key`](super::AggregateKey::to_storage_key)
/// for the provided key types: strings are used as-is and numbers use their
/// decimal form.
pub fn storage_key_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Returns a short name for the JSON type of a value.
pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// The set of fields a staged update writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteSet {
    /// Every field of the record is written.
    All,
    /// Only the named fields are written. May be empty.
    Fields(BTreeSet<String>),
}

impl WriteSet {
    /// Builds a field write set from names.
    pub fn fields<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        WriteSet::Fields(names.into_iter().map(Into::into).collect())
    }

    /// Returns true if the write set writes nothing.
    pub fn is_empty(&self) -> bool {
        matches!(self, WriteSet::Fields(fields) if fields.is_empty())
    }

    /// Returns true if the named field is written.
    pub fn contains(&self, field: &str) -> bool {
        match self {
            WriteSet::All => true,
            WriteSet::Fields(fields) => fields.contains(field),
        }
    }

    /// Returns the explicit field names, or `None` for a whole-record write.
    pub fn field_names(&self) -> Option<Vec<String>> {
        match self {
            WriteSet::All => None,
            WriteSet::Fields(fields) => Some(fields.iter().cloned().collect()),
        }
    }

    /// Merges another write set into this one.
    pub fn union(&mut self, other: &WriteSet) {
        match (&mut *self, other) {
            (WriteSet::All, _) => {}
            (this, WriteSet::All) => *this = WriteSet::All,
            (WriteSet::Fields(mine), WriteSet::Fields(theirs)) => {
                mine.extend(theirs.iter().cloned());
            }
        }
    }

    /// Copies the written fields from `source` onto `target`.
    pub fn apply(&self, source: &FieldValues, target: &mut FieldValues) {
        match self {
            WriteSet::All => *target = source.clone(),
            WriteSet::Fields(fields) => {
                for field in fields {
                    match source.get(field) {
                        Some(value) => {
                            target.insert(field.clone(), value.clone());
                        }
                        None => {
                            target.remove(field);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> FieldValues {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_diff_detects_changed_fields_only() {
        let original = fields(json!({"id": 1, "name": "Ann", "age": 99}));
        let current = fields(json!({"id": 1, "name": "Ann", "age": 50}));
        let diff = diff_fields(&original, &current);
        assert_eq!(diff.into_iter().collect::<Vec<_>>(), vec!["age"]);
    }

    #[test]
    fn test_diff_treats_null_as_a_value() {
        let original = fields(json!({"nickname": null, "email": "a@b.c"}));
        let current = fields(json!({"nickname": "Nan", "email": null}));
        let diff = diff_fields(&original, &current);
        assert!(diff.contains("nickname"));
        assert!(diff.contains("email"));
    }

    #[test]
    fn test_diff_missing_property_equals_null() {
        let original = fields(json!({"a": null}));
        let current = fields(json!({}));
        assert!(diff_fields(&original, &current).is_empty());
    }

    #[test]
    fn test_diff_of_nested_value_object() {
        let original = fields(json!({"address": {"city": "Berlin", "street": "A"}}));
        let current = fields(json!({"address": {"city": "Hamburg", "street": "A"}}));
        let diff = diff_fields(&original, &current);
        assert_eq!(diff.len(), 1);
        assert!(diff.contains("address"));
    }

    #[test]
    fn test_lookup_path() {
        let values = fields(json!({"address": {"city": "Berlin"}, "tags": ["a", "b"]}));
        assert_eq!(lookup_path(&values, "address.city"), Some(&json!("Berlin")));
        assert_eq!(lookup_path(&values, "tags.1"), Some(&json!("b")));
        assert_eq!(lookup_path(&values, "address.zip"), None);
        assert_eq!(lookup_path(&values, "missing"), None);
    }

    #[test]
    fn test_storage_key_of() {
        assert_eq!(storage_key_of(&json!(42)), Some("42".to_string()));
        assert_eq!(storage_key_of(&json!("abc")), Some("abc".to_string()));
        assert_eq!(storage_key_of(&Value::Null), None);
    }

    #[test]
    fn test_write_set_apply_fields() {
        let source = fields(json!({"name": "Bob", "age": 50}));
        let mut target = fields(json!({"name": "Ann", "age": 99}));
        WriteSet::fields(["age"]).apply(&source, &mut target);
        assert_eq!(target["name"], json!("Ann"));
        assert_eq!(target["age"], json!(50));
    }

    #[test]
    fn test_write_set_union() {
        let mut set = WriteSet::fields(["a"]);
        set.union(&WriteSet::fields(["b"]));
        assert!(set.contains("a") && set.contains("b"));
        set.union(&WriteSet::All);
        assert_eq!(set, WriteSet::All);
        assert!(!set.is_empty());
        assert!(WriteSet::Fields(BTreeSet::new()).is_empty());
    }
}
