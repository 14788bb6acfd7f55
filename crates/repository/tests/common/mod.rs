//! Test infrastructure for the repository layer.
//!
//! This module provides reusable fixtures, a test context and the
//! [`backend_test!`](crate::backend_test) macro for running the same
//! scenario against every backend and unit-of-work mode.

#![allow(dead_code)]

pub mod fixtures;
pub mod harness;

// Re-export commonly used items
pub use fixtures::*;
pub use harness::*;
