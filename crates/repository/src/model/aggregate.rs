//! Aggregate root and key abstractions.

use std::fmt::{Debug, Display};
use std::hash::Hash;

use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// A domain entity with a stable identity that is the unit of persistence.
///
/// Aggregates serialize to a JSON object; the top-level properties of that
/// object are the fields the reconciliation engine diffs and writes. Owned
/// value objects serialize as nested objects and are treated as one field.
///
/// # Example
///
/// ```
/// use helios_repository::model::{AggregateRoot, ReferenceProperty};
/// use serde::{Deserialize, Serialize};
/// use uuid::Uuid;
///
/// #[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// struct Company {
///     id: Option<Uuid>,
///     name: String,
/// }
///
/// impl AggregateRoot for Company {
///     type Key = Uuid;
///     const AGGREGATE_TYPE: &'static str = "Company";
///
///     fn id(&self) -> Option<&Uuid> {
///         self.id.as_ref()
///     }
///
///     fn set_id(&mut self, key: Uuid) {
///         self.id = Some(key);
///     }
/// }
///
/// #[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// struct Employee {
///     id: Option<Uuid>,
///     name: String,
///     company: Option<Company>,
/// }
///
/// impl AggregateRoot for Employee {
///     type Key = Uuid;
///     const AGGREGATE_TYPE: &'static str = "Employee";
///     const REFERENCES: &'static [ReferenceProperty] =
///         &[ReferenceProperty::new("company", "Company")];
///
///     fn id(&self) -> Option<&Uuid> {
///         self.id.as_ref()
///     }
///
///     fn set_id(&mut self, key: Uuid) {
///         self.id = Some(key);
///     }
/// }
/// ```
pub trait AggregateRoot: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// The key type. Immutable once assigned.
    type Key: AggregateKey;

    /// The logical aggregate type name, used as collection name and registry key.
    const AGGREGATE_TYPE: &'static str;

    /// The serialized property that holds the key.
    const KEY_FIELD: &'static str = "id";

    /// Properties that reference other aggregate roots.
    ///
    /// Referenced aggregates are touched (whole-record write) one level deep
    /// whenever this aggregate is updated.
    const REFERENCES: &'static [ReferenceProperty] = &[];

    /// Returns the key, if one has been assigned.
    fn id(&self) -> Option<&Self::Key>;

    /// Assigns the key. Called once, when the backend generates identity on add.
    fn set_id(&mut self, key: Self::Key);
}

/// A property whose value is another aggregate root (a referential link, not ownership).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReferenceProperty {
    /// The serialized property holding the referenced aggregate.
    pub field: &'static str,
    /// The aggregate type name of the referenced aggregate.
    pub aggregate_type: &'static str,
    /// The key property inside the referenced aggregate.
    pub key_field: &'static str,
}

impl ReferenceProperty {
    /// Declares a reference whose target keeps its key under `"id"`.
    pub const fn new(field: &'static str, aggregate_type: &'static str) -> Self {
        Self {
            field,
            aggregate_type,
            key_field: "id",
        }
    }

    /// Overrides the key property of the referenced aggregate.
    pub const fn with_key_field(mut self, key_field: &'static str) -> Self {
        self.key_field = key_field;
        self
    }
}

/// Identity produced by a backend when an aggregate is added without a key.
///
/// Backends provide both a per-collection sequence number and a random UUID;
/// the key type picks whichever form it can represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratedIdentity {
    /// Monotonic per-collection sequence number, starting at 1.
    pub sequence: u64,
    /// Random identity.
    pub uuid: Uuid,
}

/// A comparable, equatable aggregate key.
pub trait AggregateKey:
    Clone + Eq + Ord + Hash + Debug + Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Renders the key as used by identity tracking and storage.
    fn to_storage_key(&self) -> String {
        self.to_string()
    }

    /// Builds a key from a backend-generated identity.
    fn from_generated(identity: &GeneratedIdentity) -> Option<Self>;
}

impl AggregateKey for Uuid {
    fn from_generated(identity: &GeneratedIdentity) -> Option<Self> {
        Some(identity.uuid)
    }
}

impl AggregateKey for String {
    fn from_generated(identity: &GeneratedIdentity) -> Option<Self> {
        Some(identity.uuid.to_string())
    }
}

impl AggregateKey for i64 {
    fn from_generated(identity: &GeneratedIdentity) -> Option<Self> {
        i64::try_from(identity.sequence).ok()
    }
}

impl AggregateKey for u64 {
    fn from_generated(identity: &GeneratedIdentity) -> Option<Self> {
        Some(identity.sequence)
    }
}

impl AggregateKey for i32 {
    fn from_generated(identity: &GeneratedIdentity) -> Option<Self> {
        i32::try_from(identity.sequence).ok()
    }
}
