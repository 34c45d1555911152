//! Stable exit codes for build_support CLI commands.

/// Every requested task passed or was already satisfied.
pub const OK: i32 = 0;
/// A dispatched task exited non-zero (or could not be started).
pub const TASK_FAILED: i32 = 1;
/// Version or ticket workflow rules were violated.
pub const VALIDATION: i32 = 2;
/// A precondition was missing: git, docker, or a built image.
pub const ENVIRONMENT: i32 = 3;
/// Task registration is broken or the goal is unknown.
pub const GRAPH: i32 = 4;
/// Bad command line input, such as an unknown build variable.
pub const USAGE: i32 = 64;
/// The run was interrupted by SIGINT/SIGTERM.
pub const CANCELLED: i32 = 130;
