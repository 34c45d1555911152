//! Walks a resolved task order, skipping satisfied tasks and stopping at the
//! first failure.
//!
//! Nothing is retried here and nothing is rolled back. Re-running the same
//! goal is what recovers from a failure: finished work reports itself as
//! satisfied and is skipped.

use tracing::{debug, info, instrument, warn};

use crate::core::task::Task;
use crate::core::types::{ExecutionReport, TaskStatus};
use crate::errors::{BuildError, ErrorCategory, TaskFailure};
use crate::io::signals::CancelToken;

/// Runs individual tasks for the executor.
pub trait TaskRunner {
    /// True when the task's work is already done.
    fn is_satisfied(&self, task: &Task) -> Result<bool, BuildError>;

    fn run(&self, task: &Task) -> Result<(), BuildError>;
}

/// Execute `order` sequentially.
///
/// On failure the failing task is recorded as failed (or cancelled), every
/// later task as not attempted, and the report travels inside the
/// [`TaskFailure`].
#[instrument(skip_all, fields(tasks = order.len()))]
pub fn execute<R>(order: &[&Task], runner: &R, cancel: &CancelToken) -> Result<ExecutionReport, TaskFailure>
where
    R: TaskRunner + ?Sized,
{
    let mut report = ExecutionReport::default();

    for (pos, task) in order.iter().enumerate() {
        if cancel.is_cancelled() {
            warn!(task = %task.name, "cancelled before start");
            let cause = BuildError::Cancelled {
                task: task.name.clone(),
            };
            return Err(stop(order, pos, TaskStatus::Cancelled, cause, report));
        }

        let satisfied = match runner.is_satisfied(task) {
            Ok(satisfied) => satisfied,
            Err(err) => return Err(stop(order, pos, TaskStatus::Failed, err, report)),
        };
        if satisfied {
            info!(task = %task.name, "already satisfied, skipping");
            report.record(&task.name, task.environment, TaskStatus::Cached);
            continue;
        }

        debug!(task = %task.name, environment = %task.environment, "running task");
        if let Err(err) = runner.run(task) {
            let status = if err.category() == ErrorCategory::Cancelled {
                TaskStatus::Cancelled
            } else {
                TaskStatus::Failed
            };
            warn!(task = %task.name, %status, "task did not complete");
            return Err(stop(order, pos, status, err, report));
        }
        report.record(&task.name, task.environment, TaskStatus::Passed);
    }

    info!(summary = %report.summary(), "all tasks complete");
    Ok(report)
}

fn stop(
    order: &[&Task],
    pos: usize,
    status: TaskStatus,
    cause: BuildError,
    mut report: ExecutionReport,
) -> TaskFailure {
    let task = order[pos];
    report.record(&task.name, task.environment, status);
    for later in &order[pos + 1..] {
        report.record(&later.name, later.environment, TaskStatus::NotAttempted);
    }
    TaskFailure {
        task: task.name.clone(),
        environment: task.environment,
        cause: Box::new(cause),
        report,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::environment::Environment;
    use crate::errors::DispatchError;
    use crate::test_support::ScriptedRunner;

    fn tasks(names: &[&str]) -> Vec<Task> {
        names
            .iter()
            .map(|n| Task::new(*n, Environment::Dev))
            .collect()
    }

    #[test]
    fn all_satisfied_is_a_no_op() {
        let tasks = tasks(&["a", "b", "c"]);
        let order: Vec<&Task> = tasks.iter().collect();
        let runner = ScriptedRunner::new().satisfied(["a", "b", "c"]);
        let report = execute(&order, &runner, &CancelToken::new()).expect("run");
        assert!(runner.ran().is_empty());
        assert_eq!(report.count(TaskStatus::Cached), 3);
    }

    #[test]
    fn mixes_cached_and_passed() {
        let tasks = tasks(&["image", "check"]);
        let order: Vec<&Task> = tasks.iter().collect();
        let runner = ScriptedRunner::new().satisfied(["image"]);
        let report = execute(&order, &runner, &CancelToken::new()).expect("run");
        assert_eq!(runner.ran(), vec!["check"]);
        assert_eq!(report.status_of("image"), Some(TaskStatus::Cached));
        assert_eq!(report.status_of("check"), Some(TaskStatus::Passed));
    }

    #[test]
    fn first_failure_stops_the_run() {
        let tasks = tasks(&["a", "b", "c", "d"]);
        let order: Vec<&Task> = tasks.iter().collect();
        let runner = ScriptedRunner::new().failing("b", 2);
        let failure = execute(&order, &runner, &CancelToken::new()).expect_err("fails");

        assert_eq!(failure.task, "b");
        assert_eq!(failure.environment, Environment::Dev);
        assert_eq!(runner.ran(), vec!["a", "b"]);
        assert_eq!(failure.report.status_of("a"), Some(TaskStatus::Passed));
        assert_eq!(failure.report.status_of("b"), Some(TaskStatus::Failed));
        assert_eq!(failure.report.status_of("c"), Some(TaskStatus::NotAttempted));
        assert_eq!(failure.report.status_of("d"), Some(TaskStatus::NotAttempted));
        assert!(matches!(
            *failure.cause,
            BuildError::Dispatch(DispatchError::NonZeroExit { exit_code: 2, .. })
        ));
    }

    #[test]
    fn satisfaction_errors_fail_the_task() {
        let tasks = tasks(&["a", "b"]);
        let order: Vec<&Task> = tasks.iter().collect();
        let runner = ScriptedRunner::new().satisfaction_error("a");
        let failure = execute(&order, &runner, &CancelToken::new()).expect_err("fails");
        assert_eq!(failure.task, "a");
        assert!(runner.ran().is_empty());
        assert_eq!(failure.report.status_of("b"), Some(TaskStatus::NotAttempted));
    }

    #[test]
    fn cancellation_blocks_new_tasks() {
        let tasks = tasks(&["a", "b", "c"]);
        let order: Vec<&Task> = tasks.iter().collect();
        let cancel = CancelToken::new();
        let runner = ScriptedRunner::new().cancel_after("a", cancel.clone());
        let failure = execute(&order, &runner, &cancel).expect_err("cancelled");

        assert_eq!(runner.ran(), vec!["a"]);
        assert_eq!(failure.task, "b");
        assert_eq!(failure.report.status_of("a"), Some(TaskStatus::Passed));
        assert_eq!(failure.report.status_of("b"), Some(TaskStatus::Cancelled));
        assert_eq!(failure.report.status_of("c"), Some(TaskStatus::NotAttempted));
        assert_eq!(failure.cause.category(), ErrorCategory::Cancelled);
    }
}
