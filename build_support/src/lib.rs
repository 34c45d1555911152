//! Build-task orchestration for a containerized Python monorepo.
//!
//! A Makefile names goals; this crate resolves them against a fixed task
//! catalog, checks process rules (ticket docs, feature tests, version
//! format), and runs each task on the host or inside the docker image of its
//! environment.
//!
//! - **[`core`]**: Pure logic: git snapshot types, version rules, the task
//!   graph, container specs. No I/O.
//! - **[`io`]**: Git, docker and subprocesses, config and snapshot files.
//!
//! [`pipeline`] ties the two together for `execute`; [`report`] answers the
//! Makefile's variable queries from the same container specs.

pub mod catalog;
pub mod core;
pub mod errors;
pub mod executor;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod report;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod ticket;
