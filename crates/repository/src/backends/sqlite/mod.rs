//! SQLite backend implementation.
//!
//! Aggregates are stored as JSON documents, one row per aggregate, and
//! predicates, sorting, paging and aggregates are pushed down as SQL over
//! `json_extract`. Commits run inside a single `BEGIN IMMEDIATE`
//! transaction, so a failed batch leaves no trace.
//!
//! Both in-memory databases (for tests) and file-based databases are
//! supported. An in-memory database lives as long as its provider.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use helios_repository::backends::sqlite::SqliteProvider;
//! use helios_repository::registry::{RepositoryOptions, RepositoryRegistry};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = SqliteProvider::open("./data/repository.db")?;
//! let registry = RepositoryRegistry::builder()
//!     .repository(RepositoryOptions::new("Default"), Arc::new(provider))
//!     .build()?;
//! # drop(registry);
//! # Ok(())
//! # }
//! ```
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE aggregates (
//!     collection TEXT NOT NULL,
//!     id TEXT NOT NULL,
//!     data TEXT NOT NULL,            -- JSON document
//!     version INTEGER NOT NULL DEFAULT 1,
//!     updated_at TEXT NOT NULL,
//!     PRIMARY KEY (collection, id)
//! );
//!
//! CREATE TABLE identity_sequences (
//!     collection TEXT PRIMARY KEY,
//!     next_value INTEGER NOT NULL
//! );
//! ```

mod backend;
mod query;
mod schema;
mod session;

pub use backend::{MEMORY_PATH, SqliteConfig, SqliteProvider};
pub use schema::SCHEMA_VERSION;
pub use session::SqliteSession;
