//! Backend implementations.
//!
//! Each backend provides a [`BackendProvider`](crate::core::BackendProvider)
//! that opens sessions implementing [`BackendSession`](crate::core::BackendSession).
//! The in-memory backend is always available; others are gated behind
//! feature flags.
//!
//! # Available Backends
//!
//! | Backend | Feature | Transactions | Description |
//! |---------|---------|--------------|-------------|
//! | Memory | (always) | no | Process-local document store, sequential commits |
//! | SQLite | `sqlite` | yes | Embedded database, file or in-memory |
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "sqlite")]
//! use helios_repository::backends::sqlite::SqliteProvider;
//!
//! # #[cfg(feature = "sqlite")]
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Create an in-memory SQLite provider
//! let provider = SqliteProvider::in_memory()?;
//!
//! // Or use a file-based database
//! let provider = SqliteProvider::open("./data/repository.db")?;
//! # Ok(())
//! # }
//! ```

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;
