//! SQLite sessions.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value as SqlValue;
use rusqlite::{OptionalExtension, Transaction, TransactionBehavior, params, params_from_iter};
use serde_json::Number;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::{
    AggregateFunction, BackendCapability, BackendKind, BackendSession, CommitReport, IdentityMap,
    IdentityTracker, StagedOperation, WriteStats,
};
use crate::error::{BackendError, RepositoryError, RepositoryResult, ResourceError};
use crate::model::{FieldValues, GeneratedIdentity, WriteSet};
use crate::query::{Predicate, QuerySpec};

use super::query::{self, json_path};

/// A session over a pooled SQLite database with its own identity map.
///
/// Commits run in one `BEGIN IMMEDIATE` transaction; any failure rolls the
/// whole batch back.
pub struct SqliteSession {
    pool: Pool<SqliteConnectionManager>,
    identity: IdentityMap,
    stats: Arc<Mutex<WriteStats>>,
}

impl std::fmt::Debug for SqliteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSession")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl SqliteSession {
    pub(crate) fn new(pool: Pool<SqliteConnectionManager>, stats: Arc<Mutex<WriteStats>>) -> Self {
        Self {
            pool,
            identity: IdentityMap::new(),
            stats,
        }
    }

    fn connection(&self) -> RepositoryResult<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| {
            BackendError::ConnectionFailed {
                backend_name: "sqlite".to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }
}

fn decode(data: &str) -> RepositoryResult<FieldValues> {
    Ok(serde_json::from_str(data)?)
}

fn not_found(collection: &str, key: &str) -> RepositoryError {
    ResourceError::NotFound {
        aggregate_type: collection.to_string(),
        key: key.to_string(),
    }
    .into()
}

/// Builds the `data` expression for a field-level update: listed fields
/// present in `values` are set, listed fields absent from `values` removed.
fn patch_expression(fields: &[&String], values: &FieldValues) -> RepositoryResult<(String, Vec<SqlValue>)> {
    let mut expr = "data".to_string();
    let mut params = Vec::new();
    for field in fields {
        params.push(SqlValue::Text(json_path(field)));
        match values.get(field.as_str()) {
            Some(value) => {
                expr = format!("json_set({}, ?, json(?))", expr);
                params.push(SqlValue::Text(serde_json::to_string(value)?));
            }
            None => expr = format!("json_remove({}, ?)", expr),
        }
    }
    Ok((expr, params))
}

fn apply_operation(
    tx: &Transaction<'_>,
    operation: &StagedOperation,
    stats: &mut WriteStats,
) -> RepositoryResult<()> {
    let now = Utc::now().to_rfc3339();
    match operation {
        StagedOperation::Add {
            collection,
            key,
            values,
        } => {
            let exists = tx
                .query_row(
                    "SELECT 1 FROM aggregates WHERE collection = ?1 AND id = ?2",
                    params![collection, key],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if exists {
                return Err(ResourceError::AlreadyExists {
                    aggregate_type: collection.clone(),
                    key: key.clone(),
                }
                .into());
            }
            tx.execute(
                "INSERT INTO aggregates (collection, id, data, version, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4)",
                params![collection, key, serde_json::to_string(values)?, now],
            )?;
            stats.inserts += 1;
        }
        StagedOperation::Update {
            collection,
            key,
            values,
            write_set,
        } => {
            let (expr, mut bound, written) = match write_set {
                WriteSet::All => (
                    "?".to_string(),
                    vec![SqlValue::Text(serde_json::to_string(values)?)],
                    values.len(),
                ),
                WriteSet::Fields(fields) => {
                    let fields: Vec<&String> = fields.iter().collect();
                    let (expr, bound) = patch_expression(&fields, values)?;
                    (expr, bound, fields.len())
                }
            };
            bound.push(SqlValue::Text(now));
            bound.push(SqlValue::Text(collection.clone()));
            bound.push(SqlValue::Text(key.clone()));
            let sql = format!(
                "UPDATE aggregates SET data = {}, version = version + 1, updated_at = ?
                 WHERE collection = ? AND id = ?",
                expr
            );
            if tx.execute(&sql, params_from_iter(bound.iter()))? == 0 {
                return Err(not_found(collection, key));
            }
            stats.record_update(written);
        }
        StagedOperation::Remove { collection, key } => {
            let removed = tx.execute(
                "DELETE FROM aggregates WHERE collection = ?1 AND id = ?2",
                params![collection, key],
            )?;
            if removed == 0 {
                return Err(not_found(collection, key));
            }
            stats.deletes += 1;
        }
    }
    Ok(())
}

#[async_trait]
impl BackendSession for SqliteSession {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn supports(&self, _capability: BackendCapability) -> bool {
        true
    }

    fn tracker(&self) -> &dyn IdentityTracker {
        &self.identity
    }

    async fn generate_identity(&self, collection: &str) -> RepositoryResult<GeneratedIdentity> {
        let conn = self.connection()?;
        let sequence: i64 = conn.query_row(
            "INSERT INTO identity_sequences (collection, next_value) VALUES (?1, 1)
             ON CONFLICT(collection) DO UPDATE SET next_value = next_value + 1
             RETURNING next_value",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(GeneratedIdentity {
            sequence: u64::try_from(sequence).unwrap_or_default(),
            uuid: Uuid::new_v4(),
        })
    }

    async fn load(&self, collection: &str, key: &str) -> RepositoryResult<Option<FieldValues>> {
        let conn = self.connection()?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM aggregates WHERE collection = ?1 AND id = ?2",
                params![collection, key],
                |row| row.get(0),
            )
            .optional()?;
        data.as_deref().map(decode).transpose()
    }

    async fn exists(&self, collection: &str, key: &str) -> RepositoryResult<bool> {
        let conn = self.connection()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM aggregates WHERE collection = ?1 AND id = ?2",
                params![collection, key],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn query(
        &self,
        collection: &str,
        query: &QuerySpec,
    ) -> RepositoryResult<Vec<FieldValues>> {
        let select = query::select(collection, query);
        debug!(sql = %select.sql, "Executing SQLite query");
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&select.sql)?;
        let rows = stmt.query_map(params_from_iter(select.params.iter()), |row| {
            row.get::<_, String>(0)
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(decode(&row?)?);
        }
        Ok(results)
    }

    async fn count(&self, collection: &str, predicate: &Predicate) -> RepositoryResult<u64> {
        let count = query::count(collection, predicate);
        let conn = self.connection()?;
        let n: i64 = conn.query_row(&count.sql, params_from_iter(count.params.iter()), |row| {
            row.get(0)
        })?;
        Ok(u64::try_from(n).unwrap_or_default())
    }

    async fn aggregate(
        &self,
        collection: &str,
        predicate: &Predicate,
        path: &str,
        function: AggregateFunction,
    ) -> RepositoryResult<Option<Number>> {
        let aggregate = query::aggregate(collection, predicate, path, function);
        let conn = self.connection()?;
        let value: SqlValue = conn.query_row(
            &aggregate.sql,
            params_from_iter(aggregate.params.iter()),
            |row| row.get(0),
        )?;
        match value {
            SqlValue::Null => Ok(None),
            SqlValue::Integer(i) => Ok(Some(Number::from(i))),
            SqlValue::Real(f) => Ok(Number::from_f64(f)),
            other => Err(BackendError::QueryError {
                message: format!("unexpected aggregate result {:?}", other),
            }
            .into()),
        }
    }

    async fn commit(
        &self,
        operations: &[StagedOperation],
        cancel: &CancellationToken,
    ) -> RepositoryResult<CommitReport> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut stats = WriteStats::default();
        let mut applied = Vec::with_capacity(operations.len());

        for operation in operations {
            if cancel.is_cancelled() {
                warn!(applied = applied.len(), "Commit cancelled, rolling back");
                return Err(RepositoryError::Cancelled);
            }
            if let Err(err) = apply_operation(&tx, operation, &mut stats) {
                debug!(operation = %operation, error = %err, "Rolling back SQLite commit");
                return Err(err);
            }
            applied.push(operation.applied());
        }

        tx.commit()?;
        self.stats.lock().merge(&stats);
        Ok(CommitReport {
            applied,
            atomic: true,
        })
    }
}
