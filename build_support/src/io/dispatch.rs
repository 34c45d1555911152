//! Runs task commands on the host or inside the environment's container.
//!
//! Image availability is checked, never repaired: a missing image fails with
//! `ImageNotFound` naming the task that builds it.

use std::cell::Cell;
use std::path::PathBuf;
use std::process::Command;

use tracing::{debug, info, instrument};

use crate::core::container::ContainerSpec;
use crate::core::environment::Environment;
use crate::errors::DispatchError;
use crate::io::process::{CommandOutput, ProcessOptions, run_streaming};
use crate::io::signals::CancelToken;

/// One command of one task, ready to run.
#[derive(Debug, Clone)]
pub struct DispatchRequest<'a> {
    pub task: &'a str,
    pub environment: Environment,
    pub command: &'a [String],
    /// `None` runs the command on the host.
    pub container: Option<&'a ContainerSpec>,
}

/// A successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub exit_code: i32,
    pub output_tail: String,
}

pub trait Dispatcher {
    fn image_exists(&self, image: &str) -> Result<bool, DispatchError>;

    fn dispatch(&self, request: &DispatchRequest<'_>) -> Result<Dispatched, DispatchError>;
}

/// Dispatcher backed by the docker CLI and host subprocesses.
#[derive(Debug)]
pub struct DockerDispatcher {
    workdir: PathBuf,
    options: ProcessOptions,
    cancel: CancelToken,
    launched: Cell<u32>,
}

impl DockerDispatcher {
    pub fn new(workdir: impl Into<PathBuf>, options: ProcessOptions, cancel: CancelToken) -> Self {
        Self {
            workdir: workdir.into(),
            options,
            cancel,
            launched: Cell::new(0),
        }
    }

    /// Unique per process so a graceful stop targets exactly one container.
    fn next_container_name(&self, task: &str) -> String {
        let n = self.launched.get() + 1;
        self.launched.set(n);
        let task: String = task
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        format!("build_support-{}-{n}-{task}", std::process::id())
    }

    fn host_command(&self, command: &[String]) -> Command {
        let mut cmd = Command::new(&command[0]);
        cmd.args(&command[1..]).current_dir(&self.workdir);
        cmd
    }
}

impl Dispatcher for DockerDispatcher {
    #[instrument(skip_all, fields(image))]
    fn image_exists(&self, image: &str) -> Result<bool, DispatchError> {
        let output = Command::new("docker")
            .args(["image", "inspect", "--format", "{{.Id}}", image])
            .output()
            .map_err(|err| DispatchError::DockerUnavailable {
                reason: format!("run docker: {err}"),
            })?;
        if output.status.success() {
            debug!(image, "image present");
            return Ok(true);
        }
        classify_inspect_failure(&String::from_utf8_lossy(&output.stderr))
    }

    #[instrument(skip_all, fields(task = request.task, environment = %request.environment))]
    fn dispatch(&self, request: &DispatchRequest<'_>) -> Result<Dispatched, DispatchError> {
        if request.command.is_empty() {
            return Err(DispatchError::Spawn {
                task: request.task.to_string(),
                program: String::new(),
                reason: "empty command".to_string(),
            });
        }

        let (cmd, stop, program) = match request.container {
            None => (
                self.host_command(request.command),
                None,
                request.command[0].clone(),
            ),
            Some(spec) => {
                if !self.image_exists(&spec.image_tag)? {
                    return Err(DispatchError::ImageNotFound {
                        image: spec.image_tag.clone(),
                        remedy: request
                            .environment
                            .setup_task()
                            .unwrap_or("the image build")
                            .to_string(),
                    });
                }
                let name = self.next_container_name(request.task);
                let mut argv = spec.run_args(Some(&name), false);
                argv.extend(request.command.iter().cloned());

                let mut stop = Command::new("docker");
                stop.args([
                    "stop",
                    "--time",
                    &self.options.stop_grace.as_secs().to_string(),
                    &name,
                ]);
                (self.host_command(&argv), Some(stop), "docker".to_string())
            }
        };

        info!(command = %request.command.join(" "), "dispatching");
        let output = run_streaming(cmd, &self.options, &self.cancel, stop).map_err(|err| {
            let missing = err
                .downcast_ref::<std::io::Error>()
                .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound);
            if missing && program == "docker" {
                DispatchError::DockerUnavailable {
                    reason: "docker binary not found on PATH".to_string(),
                }
            } else {
                DispatchError::Spawn {
                    task: request.task.to_string(),
                    program: program.clone(),
                    reason: format!("{err:#}"),
                }
            }
        })?;
        outcome(request, &output, &self.options)
    }
}

fn outcome(
    request: &DispatchRequest<'_>,
    output: &CommandOutput,
    options: &ProcessOptions,
) -> Result<Dispatched, DispatchError> {
    if output.cancelled {
        return Err(DispatchError::Cancelled {
            task: request.task.to_string(),
        });
    }
    if output.timed_out {
        return Err(DispatchError::TimedOut {
            task: request.task.to_string(),
            environment: request.environment,
            secs: options.timeout.map(|t| t.as_secs()).unwrap_or_default(),
        });
    }
    let exit_code = output.status.code().unwrap_or(-1);
    if !output.status.success() {
        return Err(DispatchError::NonZeroExit {
            task: request.task.to_string(),
            environment: request.environment,
            exit_code,
            output_tail: output.tail_text(),
        });
    }
    Ok(Dispatched {
        exit_code,
        output_tail: output.tail_text(),
    })
}

/// `docker image inspect` failed: a missing image, or docker itself is broken.
fn classify_inspect_failure(stderr: &str) -> Result<bool, DispatchError> {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("no such image") || lower.contains("no such object") {
        return Ok(false);
    }
    Err(DispatchError::DockerUnavailable {
        reason: stderr.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher(workdir: &std::path::Path) -> DockerDispatcher {
        DockerDispatcher::new(
            workdir,
            ProcessOptions {
                echo: false,
                ..ProcessOptions::default()
            },
            CancelToken::new(),
        )
    }

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn missing_image_is_not_an_error() {
        assert_eq!(
            classify_inspect_failure("Error: No such image: demo:dev\n"),
            Ok(false)
        );
        assert!(matches!(
            classify_inspect_failure("Cannot connect to the Docker daemon"),
            Err(DispatchError::DockerUnavailable { .. })
        ));
    }

    #[test]
    fn container_names_are_unique() {
        let temp = tempfile::tempdir().expect("tempdir");
        let d = dispatcher(temp.path());
        let a = d.next_container_name("test_style");
        let b = d.next_container_name("test_style");
        assert_ne!(a, b);
        assert!(a.ends_with("-1-test-style"));
    }

    #[cfg(unix)]
    #[test]
    fn host_command_runs_in_workdir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let d = dispatcher(temp.path());
        let command = argv(&["sh", "-c", "touch marker && echo done"]);
        let result = d
            .dispatch(&DispatchRequest {
                task: "touch",
                environment: Environment::Host,
                command: &command,
                container: None,
            })
            .expect("dispatch");
        assert_eq!(result.exit_code, 0);
        assert!(result.output_tail.contains("done"));
        assert!(temp.path().join("marker").exists());
    }

    #[cfg(unix)]
    #[test]
    fn host_failure_propagates_exit_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        let d = dispatcher(temp.path());
        let command = argv(&["sh", "-c", "echo broken >&2; exit 4"]);
        let err = d
            .dispatch(&DispatchRequest {
                task: "lint",
                environment: Environment::Host,
                command: &command,
                container: None,
            })
            .expect_err("non-zero");
        match err {
            DispatchError::NonZeroExit {
                task,
                exit_code,
                output_tail,
                ..
            } => {
                assert_eq!(task, "lint");
                assert_eq!(exit_code, 4);
                assert!(output_tail.contains("broken"));
            }
            other => panic!("expected NonZeroExit, got {other:?}"),
        }
    }

    #[test]
    fn unknown_host_program_is_a_spawn_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let d = dispatcher(temp.path());
        let command = argv(&["definitely-not-a-real-binary-xyz"]);
        let err = d
            .dispatch(&DispatchRequest {
                task: "ghost",
                environment: Environment::Host,
                command: &command,
                container: None,
            })
            .expect_err("spawn");
        assert!(matches!(err, DispatchError::Spawn { .. }), "{err:?}");
    }
}
