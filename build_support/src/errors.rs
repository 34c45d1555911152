//! Typed error hierarchy for the build orchestrator.
//!
//! Each subsystem owns one enum so callers can branch on the failure kind:
//! - `GitError`: reading repository state and the release tag precondition
//! - `VersionError`: manifest version gating
//! - `TicketError`: ticket workflow gating (all violations at once)
//! - `GraphError`: task registration and resolution
//! - `DispatchError`: host/container execution
//! - `VariableError`: build variable queries
//!
//! `BuildError` wraps all of them and maps each failure to an [`ErrorCategory`],
//! which in turn decides the process exit code.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::core::environment::Environment;
use crate::core::types::ExecutionReport;
use crate::exit_codes;

/// Errors from reading git state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GitError {
    #[error("git unavailable in {workdir}: {reason} (run from inside a git checkout with `git` on PATH)")]
    GitUnavailable { workdir: PathBuf, reason: String },

    #[error("git fetch failed after {attempts} attempts, using local tags: {reason}")]
    GitFetchFailed { attempts: u32, reason: String },

    #[error("UnstagedChanges: refusing to tag {branch} with unstaged changes in {}", .paths.join(", "))]
    UnstagedChanges { branch: String, paths: Vec<String> },
}

/// Errors from validating the declared project version.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("version {version} is already tagged; bump the version in the project manifest")]
    DuplicateVersionTag { version: String },

    #[error("version {version} is invalid on branch {branch}: expected {expected}")]
    InvalidVersionFormat {
        version: String,
        branch: String,
        expected: &'static str,
    },
}

/// A single ticket workflow rule that was not met.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketViolation {
    MissingTicketDoc { path: PathBuf },
    MissingFeatureTest { path: PathBuf, searched: Vec<PathBuf> },
}

impl fmt::Display for TicketViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingTicketDoc { path } => write!(
                f,
                "MissingTicketDoc: {} must exist and be non-empty",
                path.display()
            ),
            Self::MissingFeatureTest { path, searched } => {
                write!(
                    f,
                    "MissingFeatureTest: {} must exist and define at least one `def test_` function",
                    path.display()
                )?;
                if searched.len() > 1 {
                    let dirs: Vec<String> = searched
                        .iter()
                        .map(|dir| dir.display().to_string())
                        .collect();
                    write!(f, " (searched {})", dirs.join(", "))?;
                }
                Ok(())
            }
        }
    }
}

/// Ticket workflow violations for a branch, reported together.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("ticket workflow check failed for branch {branch}:\n- {}", join_violations(.violations))]
pub struct TicketError {
    pub branch: String,
    pub violations: Vec<TicketViolation>,
}

impl TicketError {
    pub fn has_missing_doc(&self) -> bool {
        self.violations
            .iter()
            .any(|v| matches!(v, TicketViolation::MissingTicketDoc { .. }))
    }

    pub fn has_missing_feature_test(&self) -> bool {
        self.violations
            .iter()
            .any(|v| matches!(v, TicketViolation::MissingFeatureTest { .. }))
    }
}

fn join_violations(violations: &[TicketViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n- ")
}

/// Errors from registering tasks or resolving goals.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("DuplicateTaskName: task `{name}` is registered twice")]
    DuplicateTaskName { name: String },

    #[error("UnknownTask: no task named `{name}` (run `build_support list` for goals)")]
    UnknownTask { name: String },

    #[error("UnknownDependency: task `{task}` depends on unregistered task `{dependency}`")]
    UnknownDependency { task: String, dependency: String },

    #[error("CyclicDependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },
}

/// Errors from running a task on the host or in a container.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("ImageNotFound: image {image} is not built (run {remedy} first)")]
    ImageNotFound { image: String, remedy: String },

    #[error("docker unavailable: {reason} (is the docker daemon running and the socket reachable?)")]
    DockerUnavailable { reason: String },

    #[error("task `{task}` exited with code {exit_code} in {environment}{}", tail_suffix(.output_tail))]
    NonZeroExit {
        task: String,
        environment: Environment,
        exit_code: i32,
        output_tail: String,
    },

    #[error("task `{task}` timed out after {secs}s in {environment}")]
    TimedOut {
        task: String,
        environment: Environment,
        secs: u64,
    },

    #[error("failed to start `{program}` for task `{task}`: {reason}")]
    Spawn {
        task: String,
        program: String,
        reason: String,
    },

    #[error("task `{task}` was cancelled")]
    Cancelled { task: String },
}

fn tail_suffix(tail: &str) -> String {
    if tail.trim().is_empty() {
        String::new()
    } else {
        format!("\n--- output tail ---\n{}", tail.trim_end())
    }
}

/// Errors from the variable query interface.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VariableError {
    #[error("UnknownVariable: `{name}` (known: {})", .known.join(", "))]
    UnknownVariable {
        name: String,
        known: Vec<&'static str>,
    },
}

/// A task that stopped the run, with the report of everything before it.
#[derive(Debug, Error)]
#[error("task `{task}` failed in {environment} environment: {cause}")]
pub struct TaskFailure {
    pub task: String,
    pub environment: Environment,
    #[source]
    pub cause: Box<BuildError>,
    pub report: ExecutionReport,
}

/// Top-level failure surfaced to the CLI.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Ticket(#[from] TicketError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Variable(#[from] VariableError),

    #[error(transparent)]
    TaskFailed(Box<TaskFailure>),

    #[error("run cancelled before task `{task}` started")]
    Cancelled { task: String },

    /// Loading the project (manifest, config, paths) failed.
    #[error(transparent)]
    Setup(anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<TaskFailure> for BuildError {
    fn from(failure: TaskFailure) -> Self {
        Self::TaskFailed(Box::new(failure))
    }
}

/// The four failure families plus the two process-level outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Git, docker or image preconditions.
    Environment,
    /// Version or ticket rules.
    Validation,
    /// A dispatched action exited non-zero.
    TaskExecution,
    /// Task registration mistakes or unknown goals.
    Graph,
    /// Bad CLI input such as an unknown variable name.
    Usage,
    Cancelled,
}

impl ErrorCategory {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Environment => exit_codes::ENVIRONMENT,
            Self::Validation => exit_codes::VALIDATION,
            Self::TaskExecution => exit_codes::TASK_FAILED,
            Self::Graph => exit_codes::GRAPH,
            Self::Usage => exit_codes::USAGE,
            Self::Cancelled => exit_codes::CANCELLED,
        }
    }
}

impl BuildError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Git(GitError::UnstagedChanges { .. }) => ErrorCategory::Validation,
            Self::Git(_) => ErrorCategory::Environment,
            Self::Version(_) | Self::Ticket(_) => ErrorCategory::Validation,
            Self::Graph(_) => ErrorCategory::Graph,
            Self::Dispatch(err) => match err {
                DispatchError::ImageNotFound { .. } | DispatchError::DockerUnavailable { .. } => {
                    ErrorCategory::Environment
                }
                DispatchError::Cancelled { .. } => ErrorCategory::Cancelled,
                DispatchError::NonZeroExit { .. }
                | DispatchError::TimedOut { .. }
                | DispatchError::Spawn { .. } => ErrorCategory::TaskExecution,
            },
            Self::Variable(_) => ErrorCategory::Usage,
            Self::TaskFailed(failure) => failure.cause.category(),
            Self::Cancelled { .. } => ErrorCategory::Cancelled,
            Self::Setup(_) => ErrorCategory::Environment,
            Self::Other(_) => ErrorCategory::TaskExecution,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }

    /// The innermost typed error, looking through a task failure.
    pub fn root(&self) -> &BuildError {
        match self {
            Self::TaskFailed(failure) => failure.cause.root(),
            other => other,
        }
    }
}
