//! Deterministic, pure logic for the commission quality loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod backoff;
pub mod diagnostics;
pub mod policy;
pub mod score;
pub mod state_machine;
pub mod types;
pub mod version_store;
