//! Shared identity map used by every backend session.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::{IdentityError, RepositoryResult};
use crate::model::{FieldValues, WriteSet};

use super::backend::{EntryState, IdentityTracker, TrackedEntry};
use super::operation::StagedOperation;

type EntryKey = (String, String);

fn entry_key(collection: &str, key: &str) -> EntryKey {
    (collection.to_string(), key.to_string())
}

fn not_tracked(collection: &str, key: &str) -> IdentityError {
    IdentityError::NotTracked {
        aggregate_type: collection.to_string(),
        key: key.to_string(),
    }
}

fn inconsistent(collection: &str, key: &str, message: impl Into<String>) -> IdentityError {
    IdentityError::Inconsistent {
        aggregate_type: collection.to_string(),
        key: key.to_string(),
        message: message.into(),
    }
}

/// In-memory identity map keyed by `(collection, key)`.
#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: Mutex<HashMap<EntryKey, TrackedEntry>>,
}

impl IdentityMap {
    /// Creates an empty identity map.
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityTracker for IdentityMap {
    fn try_get_tracked(
        &self,
        collection: &str,
        key: &str,
    ) -> RepositoryResult<Option<TrackedEntry>> {
        Ok(self.entries.lock().get(&entry_key(collection, key)).cloned())
    }

    fn attach(
        &self,
        collection: &str,
        key: &str,
        original: FieldValues,
        current: FieldValues,
        state: EntryState,
    ) -> RepositoryResult<()> {
        let mut entries = self.entries.lock();
        let id = entry_key(collection, key);
        if entries.contains_key(&id) {
            return Err(IdentityError::Conflict {
                aggregate_type: collection.to_string(),
                key: key.to_string(),
            }
            .into());
        }
        let modified = match state {
            EntryState::Unchanged | EntryState::Modified => WriteSet::Fields(Default::default()),
            EntryState::Added | EntryState::Deleted => WriteSet::All,
        };
        entries.insert(
            id,
            TrackedEntry {
                original,
                current,
                state,
                modified,
            },
        );
        Ok(())
    }

    fn attach_loaded(&self, collection: &str, key: &str, values: &FieldValues) {
        let mut entries = self.entries.lock();
        match entries.get_mut(&entry_key(collection, key)) {
            Some(entry) if entry.state == EntryState::Unchanged => {
                entry.original = values.clone();
                entry.current = values.clone();
            }
            Some(_) => {}
            None => {
                entries.insert(
                    entry_key(collection, key),
                    TrackedEntry {
                        original: values.clone(),
                        current: values.clone(),
                        state: EntryState::Unchanged,
                        modified: WriteSet::Fields(Default::default()),
                    },
                );
            }
        }
    }

    fn track_added(
        &self,
        collection: &str,
        key: &str,
        values: FieldValues,
    ) -> RepositoryResult<()> {
        let mut entries = self.entries.lock();
        let id = entry_key(collection, key);
        match entries.get_mut(&id) {
            Some(entry) if entry.state == EntryState::Deleted => {
                // Remove then add under the same key replays as delete + insert.
                entry.current = values;
                entry.state = EntryState::Modified;
                entry.modified = WriteSet::All;
                Ok(())
            }
            Some(_) => Err(IdentityError::Conflict {
                aggregate_type: collection.to_string(),
                key: key.to_string(),
            }
            .into()),
            None => {
                entries.insert(
                    id,
                    TrackedEntry {
                        original: FieldValues::new(),
                        current: values,
                        state: EntryState::Added,
                        modified: WriteSet::All,
                    },
                );
                Ok(())
            }
        }
    }

    fn track_removed(&self, collection: &str, key: &str) -> RepositoryResult<()> {
        let mut entries = self.entries.lock();
        let id = entry_key(collection, key);
        match entries.get_mut(&id) {
            Some(entry) if entry.state == EntryState::Deleted => {
                Err(inconsistent(collection, key, "already staged for delete").into())
            }
            Some(entry) => {
                entry.state = EntryState::Deleted;
                entry.modified = WriteSet::All;
                Ok(())
            }
            None => {
                entries.insert(
                    id,
                    TrackedEntry {
                        original: FieldValues::new(),
                        current: FieldValues::new(),
                        state: EntryState::Deleted,
                        modified: WriteSet::All,
                    },
                );
                Ok(())
            }
        }
    }

    fn set_current(
        &self,
        collection: &str,
        key: &str,
        values: &FieldValues,
    ) -> RepositoryResult<()> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(&entry_key(collection, key))
            .ok_or_else(|| not_tracked(collection, key))?;
        if entry.state == EntryState::Deleted {
            return Err(inconsistent(collection, key, "entry is staged for delete").into());
        }
        for (name, value) in values {
            entry.current.insert(name.clone(), value.clone());
        }
        entry.current.retain(|name, _| values.contains_key(name));
        Ok(())
    }

    fn mark_modified(
        &self,
        collection: &str,
        key: &str,
        fields: &WriteSet,
    ) -> RepositoryResult<()> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(&entry_key(collection, key))
            .ok_or_else(|| not_tracked(collection, key))?;
        match entry.state {
            EntryState::Deleted => {
                Err(inconsistent(collection, key, "entry is staged for delete").into())
            }
            EntryState::Added => Ok(()),
            EntryState::Unchanged => {
                entry.state = EntryState::Modified;
                entry.modified = fields.clone();
                Ok(())
            }
            EntryState::Modified => {
                entry.modified.union(fields);
                Ok(())
            }
        }
    }

    fn force_modified(
        &self,
        collection: &str,
        key: &str,
        values: FieldValues,
        fields: &WriteSet,
    ) -> RepositoryResult<()> {
        let mut entries = self.entries.lock();
        let id = entry_key(collection, key);
        match entries.get_mut(&id) {
            Some(entry) if entry.state == EntryState::Deleted => {
                Err(inconsistent(collection, key, "entry is staged for delete").into())
            }
            Some(entry) => {
                entry.current = values;
                if entry.state != EntryState::Added {
                    entry.state = EntryState::Modified;
                }
                entry.modified.union(fields);
                Ok(())
            }
            None => {
                entries.insert(
                    id,
                    TrackedEntry {
                        original: values.clone(),
                        current: values,
                        state: EntryState::Modified,
                        modified: fields.clone(),
                    },
                );
                Ok(())
            }
        }
    }

    fn accept_changes(&self, committed: &[StagedOperation]) {
        let mut entries = self.entries.lock();
        for op in committed {
            let id = entry_key(op.collection(), op.key());
            match op {
                StagedOperation::Add { values, .. } => {
                    let entry = entries.entry(id).or_insert_with(|| TrackedEntry {
                        original: FieldValues::new(),
                        current: FieldValues::new(),
                        state: EntryState::Unchanged,
                        modified: WriteSet::Fields(Default::default()),
                    });
                    entry.original = values.clone();
                }
                StagedOperation::Update {
                    values, write_set, ..
                } => {
                    if let Some(entry) = entries.get_mut(&id) {
                        write_set.apply(values, &mut entry.original);
                    }
                }
                StagedOperation::Remove { .. } => {
                    entries.remove(&id);
                }
            }
        }
        // Unwritten field changes are dropped so every entry mirrors the store.
        for entry in entries.values_mut() {
            entry.current = entry.original.clone();
            entry.state = EntryState::Unchanged;
            entry.modified = WriteSet::Fields(Default::default());
        }
    }

    fn reject_changes(&self) {
        self.entries
            .lock()
            .retain(|_, entry| entry.state == EntryState::Unchanged);
    }

    fn tracked_count(&self) -> usize {
        self.entries.lock().len()
    }
}
