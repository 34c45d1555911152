use std::fmt;

use crate::core::environment::Environment;

/// Outcome of one task in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Passed,
    /// Skipped because `is_satisfied` held.
    Cached,
    Failed,
    Cancelled,
    NotAttempted,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Cached => "cached",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::NotAttempted => "not attempted",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub task: String,
    pub environment: Environment,
    pub status: TaskStatus,
}

/// Per-task outcomes in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub records: Vec<TaskRecord>,
}

impl ExecutionReport {
    pub fn record(&mut self, task: &str, environment: Environment, status: TaskStatus) {
        self.records.push(TaskRecord {
            task: task.to_string(),
            environment,
            status,
        });
    }

    pub fn status_of(&self, task: &str) -> Option<TaskStatus> {
        self.records
            .iter()
            .find(|r| r.task == task)
            .map(|r| r.status)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }

    /// One line: `passed=2 cached=3 failed=0 ...`.
    pub fn summary(&self) -> String {
        [
            TaskStatus::Passed,
            TaskStatus::Cached,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
            TaskStatus::NotAttempted,
        ]
        .iter()
        .map(|status| format!("{}={}", status.as_str().replace(' ', "_"), self.count(*status)))
        .collect::<Vec<_>>()
        .join(" ")
    }
}
