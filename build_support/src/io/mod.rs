//! I/O adapters for the orchestrator.

pub mod config;
pub mod dispatch;
pub mod git;
pub mod manifest;
pub mod process;
pub mod signals;
pub mod snapshot;
pub mod stamps;
