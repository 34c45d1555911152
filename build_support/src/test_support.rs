//! Test-only fixtures: a temporary project, a recording dispatcher and a
//! scripted task runner.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::environment::Environment;
use crate::core::git_info::GitInfo;
use crate::core::task::Task;
use crate::errors::{BuildError, DispatchError};
use crate::executor::TaskRunner;
use crate::io::dispatch::{DispatchRequest, Dispatched, Dispatcher};
use crate::io::signals::CancelToken;

pub fn git_info(branch: &str, tags: &[&str]) -> GitInfo {
    GitInfo::new(branch, tags.iter().map(|t| t.to_string()).collect())
}

/// A project directory with a manifest and a Dockerfile.
pub struct TestProject {
    temp: tempfile::TempDir,
    pub name: String,
}

impl TestProject {
    pub fn new(name: &str, version: &str) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = Self {
            temp,
            name: name.to_string(),
        };
        project.write(
            "pyproject.toml",
            &format!("[project]\nname = \"{name}\"\nversion = \"{version}\"\n"),
        );
        project.write(
            "Dockerfile",
            "FROM python:3.12-slim AS build\nFROM build AS dev\nFROM build AS prod\nFROM build AS pulumi\n",
        );
        project
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.temp.path().join(rel)
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, contents).expect("write file");
    }

    /// Ticket doc plus a feature test for `branch`.
    pub fn add_ticket(&self, branch: &str) {
        let ticket = crate::core::git_info::ticket_id_for_branch(branch);
        self.write(
            &format!("docs/tickets/{}/{branch}.rst", self.name),
            &format!("Ticket {ticket}\n==========\n"),
        );
        self.write(
            &format!(
                "build_support/test/feature_tests/test_{ticket}_{}.py",
                self.name
            ),
            "def test_ticket_feature():\n    assert True\n",
        );
    }
}

/// One call observed by [`RecordingDispatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedDispatch {
    pub task: String,
    pub environment: Environment,
    pub command: Vec<String>,
    pub image: Option<String>,
    pub mounts: Vec<PathBuf>,
}

/// Records dispatches instead of running them.
///
/// `docker build ... -t <tag>` commands register `<tag>` as an existing image.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    images: RefCell<HashSet<String>>,
    failures: HashMap<String, i32>,
    dispatched: RefCell<Vec<RecordedDispatch>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_images<I, S>(self, images: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.images
            .borrow_mut()
            .extend(images.into_iter().map(Into::into));
        self
    }

    pub fn failing(mut self, task: &str, exit_code: i32) -> Self {
        self.failures.insert(task.to_string(), exit_code);
        self
    }

    pub fn dispatched(&self) -> Vec<RecordedDispatch> {
        self.dispatched.borrow().clone()
    }

    pub fn tasks(&self) -> Vec<String> {
        self.dispatched
            .borrow()
            .iter()
            .map(|d| d.task.clone())
            .collect()
    }

    pub fn container_dispatches(&self) -> usize {
        self.dispatched
            .borrow()
            .iter()
            .filter(|d| d.image.is_some())
            .count()
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.images.borrow().contains(image)
    }
}

impl Dispatcher for RecordingDispatcher {
    fn image_exists(&self, image: &str) -> Result<bool, DispatchError> {
        Ok(self.images.borrow().contains(image))
    }

    fn dispatch(&self, request: &DispatchRequest<'_>) -> Result<Dispatched, DispatchError> {
        self.dispatched.borrow_mut().push(RecordedDispatch {
            task: request.task.to_string(),
            environment: request.environment,
            command: request.command.to_vec(),
            image: request.container.map(|spec| spec.image_tag.clone()),
            mounts: request
                .container
                .map(|spec| spec.mounts.iter().map(|m| m.container_path.clone()).collect())
                .unwrap_or_default(),
        });

        if let Some(spec) = request.container
            && !self.images.borrow().contains(&spec.image_tag)
        {
            return Err(DispatchError::ImageNotFound {
                image: spec.image_tag.clone(),
                remedy: request.environment.setup_task().unwrap_or("build").to_string(),
            });
        }
        if let Some(&exit_code) = self.failures.get(request.task) {
            return Err(DispatchError::NonZeroExit {
                task: request.task.to_string(),
                environment: request.environment,
                exit_code,
                output_tail: format!("{} failed\n", request.task),
            });
        }
        if request.command.get(1).map(String::as_str) == Some("build")
            && let Some(pos) = request.command.iter().position(|arg| arg == "-t")
            && let Some(tag) = request.command.get(pos + 1)
        {
            self.images.borrow_mut().insert(tag.clone());
        }
        Ok(Dispatched {
            exit_code: 0,
            output_tail: String::new(),
        })
    }
}

/// Task runner with scripted outcomes.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    satisfied: HashSet<String>,
    failures: HashMap<String, i32>,
    satisfaction_errors: HashSet<String>,
    cancel_after: Option<(String, CancelToken)>,
    ran: RefCell<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn satisfied<I, S>(mut self, tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.satisfied.extend(tasks.into_iter().map(Into::into));
        self
    }

    pub fn failing(mut self, task: &str, exit_code: i32) -> Self {
        self.failures.insert(task.to_string(), exit_code);
        self
    }

    pub fn satisfaction_error(mut self, task: &str) -> Self {
        self.satisfaction_errors.insert(task.to_string());
        self
    }

    /// Trip `token` once `task` has run.
    pub fn cancel_after(mut self, task: &str, token: CancelToken) -> Self {
        self.cancel_after = Some((task.to_string(), token));
        self
    }

    pub fn ran(&self) -> Vec<String> {
        self.ran.borrow().clone()
    }
}

impl TaskRunner for ScriptedRunner {
    fn is_satisfied(&self, task: &Task) -> Result<bool, BuildError> {
        if self.satisfaction_errors.contains(&task.name) {
            return Err(DispatchError::DockerUnavailable {
                reason: "scripted".to_string(),
            }
            .into());
        }
        Ok(self.satisfied.contains(&task.name))
    }

    fn run(&self, task: &Task) -> Result<(), BuildError> {
        self.ran.borrow_mut().push(task.name.clone());
        if let Some((name, token)) = &self.cancel_after
            && name == &task.name
        {
            token.cancel();
        }
        if let Some(&exit_code) = self.failures.get(&task.name) {
            return Err(DispatchError::NonZeroExit {
                task: task.name.clone(),
                environment: task.environment,
                exit_code,
                output_tail: String::new(),
            }
            .into());
        }
        Ok(())
    }
}
