//! SQLite schema definitions and migrations.

use rusqlite::Connection;
use tracing::info;

use crate::error::{BackendError, RepositoryError, RepositoryResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

fn schema_error(context: &str, err: rusqlite::Error) -> RepositoryError {
    BackendError::MigrationError {
        message: format!("{}: {}", context, err),
    }
    .into()
}

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> RepositoryResult<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        create_schema_v1(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
        info!(version = SCHEMA_VERSION, "Initialized SQLite repository schema");
    } else if current_version > SCHEMA_VERSION {
        return Err(BackendError::MigrationError {
            message: format!(
                "database schema version {} is newer than supported version {}",
                current_version, SCHEMA_VERSION
            ),
        }
        .into());
    }

    Ok(())
}

/// Get the current schema version.
pub fn get_schema_version(conn: &Connection) -> RepositoryResult<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )
    .map_err(|e| schema_error("failed to create schema_version table", e))?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> RepositoryResult<()> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| schema_error("failed to clear schema_version", e))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])
        .map_err(|e| schema_error("failed to set schema_version", e))?;
    Ok(())
}

/// Create the initial schema (version 1).
fn create_schema_v1(conn: &Connection) -> RepositoryResult<()> {
    // One JSON document per aggregate, keyed by collection and storage key.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS aggregates (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            data TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (collection, id)
        )",
        [],
    )
    .map_err(|e| schema_error("failed to create aggregates table", e))?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_aggregates_collection
            ON aggregates (collection, updated_at)",
        [],
    )
    .map_err(|e| schema_error("failed to create aggregates index", e))?;

    // Per-collection identity sequences.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS identity_sequences (
            collection TEXT PRIMARY KEY,
            next_value INTEGER NOT NULL
        )",
        [],
    )
    .map_err(|e| schema_error("failed to create identity_sequences table", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_initialization() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('aggregates', 'identity_sequences')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_schema_version() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 0);
        initialize_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        set_schema_version(&conn, SCHEMA_VERSION + 1).unwrap();
        assert!(initialize_schema(&conn).is_err());
    }
}
