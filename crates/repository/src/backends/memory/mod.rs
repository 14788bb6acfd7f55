//! In-memory backend.
//!
//! A process-local document store. Records are kept as JSON field maps per
//! collection; queries are evaluated in memory with the same predicate and
//! ordering semantics the SQLite backend pushes down.
//!
//! The store has no multi-operation transactions: a commit applies staged
//! operations one by one, and a failure after the first operation reports
//! how many operations were already applied.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use helios_repository::backends::memory::MemoryProvider;
//! use helios_repository::registry::{RepositoryOptions, RepositoryRegistry};
//!
//! let provider = Arc::new(MemoryProvider::new());
//! let registry = RepositoryRegistry::builder()
//!     .repository(RepositoryOptions::new("Default"), provider.clone())
//!     .build()
//!     .unwrap();
//! assert!(provider.store().is_empty("Person"));
//! # drop(registry);
//! ```

mod session;
mod store;

pub use session::{MemoryProvider, MemorySession};
pub use store::MemoryStore;
