//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod container;
pub mod environment;
pub mod git_info;
pub mod graph;
pub mod task;
pub mod types;
pub mod variables;
pub mod version;
