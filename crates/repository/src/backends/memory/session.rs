//! In-memory backend sessions and provider.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Number;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::{
    AggregateFunction, BackendCapability, BackendKind, BackendProvider, BackendSession,
    CommitReport, IdentityMap, IdentityTracker, StagedOperation, WriteStats,
};
use crate::error::{RepositoryError, RepositoryResult, UnitOfWorkError};
use crate::model::{FieldValues, GeneratedIdentity};
use crate::query::{Predicate, QuerySpec};
use crate::registry::RepositoryOptions;

use super::store::MemoryStore;

/// Provider of in-memory sessions sharing one [`MemoryStore`].
#[derive(Debug, Default, Clone)]
pub struct MemoryProvider {
    store: Arc<MemoryStore>,
}

impl MemoryProvider {
    /// Creates a provider over a fresh, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provider over an existing store.
    pub fn with_store(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    /// The shared store.
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }
}

impl BackendProvider for MemoryProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn open_session(&self, _options: &RepositoryOptions) -> RepositoryResult<Arc<dyn BackendSession>> {
        Ok(Arc::new(MemorySession::new(Arc::clone(&self.store))))
    }

    fn write_stats(&self) -> WriteStats {
        self.store.write_stats()
    }
}

/// A session over the in-memory store with its own identity map.
#[derive(Debug)]
pub struct MemorySession {
    store: Arc<MemoryStore>,
    identity: IdentityMap,
}

impl MemorySession {
    /// Creates a session over `store`.
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            identity: IdentityMap::new(),
        }
    }
}

/// Reports the failure of operation `applied` out of `total`.
fn sequential_failure(applied: usize, total: usize, err: RepositoryError) -> RepositoryError {
    if applied == 0 {
        return err;
    }
    UnitOfWorkError::PartialFailure {
        applied,
        total,
        source: Box::new(err),
    }
    .into()
}

#[async_trait]
impl BackendSession for MemorySession {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn supports(&self, capability: BackendCapability) -> bool {
        !matches!(capability, BackendCapability::Transactions)
    }

    fn tracker(&self) -> &dyn IdentityTracker {
        &self.identity
    }

    async fn generate_identity(&self, collection: &str) -> RepositoryResult<GeneratedIdentity> {
        Ok(self.store.next_identity(collection))
    }

    async fn load(&self, collection: &str, key: &str) -> RepositoryResult<Option<FieldValues>> {
        Ok(self.store.load(collection, key))
    }

    async fn exists(&self, collection: &str, key: &str) -> RepositoryResult<bool> {
        Ok(self.store.exists(collection, key))
    }

    async fn query(
        &self,
        collection: &str,
        query: &QuerySpec,
    ) -> RepositoryResult<Vec<FieldValues>> {
        let matched = self.store.scan(collection, &query.predicate);
        let ordered = QuerySpec {
            predicate: Predicate::True,
            ..query.clone()
        };
        Ok(ordered.apply(matched))
    }

    async fn count(&self, collection: &str, predicate: &Predicate) -> RepositoryResult<u64> {
        Ok(self.store.count(collection, predicate))
    }

    async fn aggregate(
        &self,
        collection: &str,
        predicate: &Predicate,
        path: &str,
        function: AggregateFunction,
    ) -> RepositoryResult<Option<Number>> {
        Ok(self.store.aggregate(collection, predicate, path, function))
    }

    async fn commit(
        &self,
        operations: &[StagedOperation],
        cancel: &CancellationToken,
    ) -> RepositoryResult<CommitReport> {
        let total = operations.len();
        let mut applied = Vec::with_capacity(total);

        for (index, operation) in operations.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(sequential_failure(index, total, RepositoryError::Cancelled));
            }
            match self.store.apply(operation) {
                Ok(done) => applied.push(done),
                Err(err) => {
                    debug!(
                        operation = %operation,
                        applied = index,
                        total = total,
                        error = %err,
                        "Sequential commit aborted"
                    );
                    return Err(sequential_failure(index, total, err));
                }
            }
        }

        Ok(CommitReport {
            applied,
            atomic: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WriteSet;
    use serde_json::{Value, json};

    fn fields(value: Value) -> FieldValues {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn add(key: &str) -> StagedOperation {
        StagedOperation::Add {
            collection: "Person".to_string(),
            key: key.to_string(),
            values: fields(json!({"id": key})),
        }
    }

    #[tokio::test]
    async fn test_sessions_share_the_store() {
        let provider = MemoryProvider::new();
        let options = RepositoryOptions::new("Default");
        let first = provider.open_session(&options).unwrap();
        let second = provider.open_session(&options).unwrap();

        first
            .commit(&[add("1")], &CancellationToken::new())
            .await
            .unwrap();
        assert!(second.exists("Person", "1").await.unwrap());
        assert_eq!(second.tracker().tracked_count(), 0);
        assert!(!second.supports(BackendCapability::Transactions));
    }

    #[tokio::test]
    async fn test_failure_after_first_operation_is_partial() {
        let session = MemorySession::new(Arc::new(MemoryStore::new()));
        let ops = vec![
            add("1"),
            StagedOperation::Update {
                collection: "Person".to_string(),
                key: "missing".to_string(),
                values: FieldValues::new(),
                write_set: WriteSet::All,
            },
            add("2"),
        ];
        let err = session
            .commit(&ops, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            RepositoryError::UnitOfWork(UnitOfWorkError::PartialFailure {
                applied,
                total,
                source,
            }) => {
                assert_eq!(applied, 1);
                assert_eq!(total, 3);
                assert!(source.is_not_found());
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(session.exists("Person", "1").await.unwrap());
        assert!(!session.exists("Person", "2").await.unwrap());
    }

    #[tokio::test]
    async fn test_failure_of_first_operation_is_not_partial() {
        let session = MemorySession::new(Arc::new(MemoryStore::new()));
        let remove = StagedOperation::Remove {
            collection: "Person".to_string(),
            key: "missing".to_string(),
        };
        let err = session
            .commit(&[remove], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_cancelled_before_commit() {
        let session = MemorySession::new(Arc::new(MemoryStore::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = session.commit(&[add("1")], &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(!session.exists("Person", "1").await.unwrap());
    }
}
