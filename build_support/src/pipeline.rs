//! Goal execution: load the project, plan, snapshot git state, run tasks.
//!
//! The git snapshot is taken once by the caller and threaded through every
//! component; nothing below re-queries git for branch or tags.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::catalog;
use crate::core::container::{ContainerInputs, ContainerSet, ContainerSpec, Credentials, build_image_args};
use crate::core::environment::Environment;
use crate::core::git_info::GitInfo;
use crate::core::graph::TaskGraph;
use crate::core::task::{Access, Action, Builtin, Satisfaction, Task};
use crate::core::types::ExecutionReport;
use crate::core::version;
use crate::errors::{BuildError, GitError, GraphError};
use crate::executor::{self, TaskRunner};
use crate::io::config::{BuildConfig, CONFIG_FILE, load_config};
use crate::io::dispatch::{DispatchRequest, Dispatcher};
use crate::io::git::Git;
use crate::io::manifest::{MANIFEST_FILE, ProjectManifest, load_manifest, lock_file};
use crate::io::signals::CancelToken;
use crate::io::snapshot::write_git_info;
use crate::io::stamps::{
    ImageInputs, TaskInputs, fingerprint, read_stamp, stamp_matches, stamp_path, task_fingerprint,
    task_stamp_path, write_stamp,
};
use crate::ticket::{self, TicketLayout};

/// Remote that release tags and their commits are pushed to.
const REMOTE: &str = "origin";

/// Tool caches removed by `clean`, next to the build directory.
const CACHE_DIRS: [&str; 3] = [".mypy_cache", ".pytest_cache", ".ruff_cache"];

/// Command line inputs shared by every goal.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub project_root: PathBuf,
    /// Where the project root is mounted inside containers.
    pub docker_project_root: PathBuf,
    pub user_id: Option<u32>,
    pub group_id: Option<u32>,
    /// Existing images count as up to date (the orchestrator is under test).
    pub feature_test_mode: bool,
}

/// A loaded project: paths, configuration and manifest.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub options: RunOptions,
    pub config: BuildConfig,
    pub manifest: ProjectManifest,
    pub credentials: Credentials,
}

impl Workspace {
    #[instrument(skip_all, fields(root = %options.project_root.display()))]
    pub fn load(options: RunOptions) -> Result<Self, BuildError> {
        let project_root = fs::canonicalize(&options.project_root)
            .with_context(|| format!("resolve project root {}", options.project_root.display()))
            .map_err(BuildError::Setup)?;
        if !options.docker_project_root.is_absolute() {
            return Err(BuildError::Setup(anyhow!(
                "docker project root must be absolute, got {}",
                options.docker_project_root.display()
            )));
        }
        let config = load_config(&project_root.join(CONFIG_FILE)).map_err(BuildError::Setup)?;
        let manifest = load_manifest(&project_root).map_err(BuildError::Setup)?;
        Ok(Self {
            options: RunOptions {
                project_root,
                ..options
            },
            config,
            manifest,
            credentials: detect_credentials(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.options.project_root
    }

    pub fn docker_root(&self) -> &Path {
        &self.options.docker_project_root
    }

    /// Container specs for this run, shared by dispatch and the reporter.
    pub fn containers(&self, git: &GitInfo) -> ContainerSet {
        let git_info_path = self
            .docker_root()
            .join(&self.config.build_dir)
            .join("git_info.json");
        let inputs = ContainerInputs {
            project_name: &self.manifest.name,
            git,
            host_root: self.root(),
            docker_root: self.docker_root(),
            container_home: &self.config.container_home,
            credentials: &self.credentials,
            git_info_path: Some(git_info_path),
        };
        ContainerSet::new(&inputs, &self.config.layouts())
    }
}

/// Optional host credentials for tasks that run git inside a container.
fn detect_credentials() -> Credentials {
    let Some(home) = std::env::var_os("HOME").map(PathBuf::from) else {
        return Credentials::default();
    };
    let ssh = home.join(".ssh");
    let gitconfig = home.join(".gitconfig");
    Credentials {
        ssh_dir: ssh.is_dir().then_some(ssh),
        gitconfig: gitconfig.is_file().then_some(gitconfig),
    }
}

/// The standard graph and the resolved order for the requested goals.
#[derive(Debug)]
pub struct Plan {
    graph: TaskGraph,
    order: Vec<String>,
}

impl Plan {
    pub fn new<S: AsRef<str>>(config: &BuildConfig, goals: &[S]) -> Result<Self, GraphError> {
        let graph = catalog::standard_graph(config)?;
        Self::from_graph(graph, goals)
    }

    pub fn from_graph<S: AsRef<str>>(graph: TaskGraph, goals: &[S]) -> Result<Self, GraphError> {
        let order = graph
            .resolve_all(goals)?
            .into_iter()
            .map(|task| task.name.clone())
            .collect();
        Ok(Self { graph, order })
    }

    pub fn tasks(&self) -> Vec<&Task> {
        self.order
            .iter()
            .filter_map(|name| self.graph.get(name))
            .collect()
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// `plan: N. task [environment]` lines.
    pub fn render(&self) -> Vec<String> {
        self.tasks()
            .iter()
            .enumerate()
            .map(|(i, task)| format!("plan: {}. {} [{}]", i + 1, task.name, task.environment))
            .collect()
    }
}

/// Run a plan against a git snapshot.
///
/// Writes `git_info.json` before the first task. When uid/gid are given and
/// a container ran, ownership of the project is handed back afterwards.
#[instrument(skip_all, fields(branch = %git.branch, tasks = plan.order.len()))]
pub fn run_plan<D>(
    workspace: &Workspace,
    plan: &Plan,
    git: &GitInfo,
    dispatcher: &D,
    cancel: &CancelToken,
) -> Result<ExecutionReport, BuildError>
where
    D: Dispatcher + ?Sized,
{
    write_git_info(&workspace.config.git_info_path(workspace.root()), git)
        .map_err(BuildError::Setup)?;

    let runner = PipelineRunner {
        workspace,
        git,
        containers: workspace.containers(git),
        dispatcher,
        used_containers: Cell::new(false),
    };
    let result = executor::execute(&plan.tasks(), &runner, cancel);

    if !cancel.is_cancelled() && runner.used_containers.get() {
        runner.restore_ownership();
    }
    result.map_err(BuildError::from)
}

struct PipelineRunner<'a, D: ?Sized> {
    workspace: &'a Workspace,
    git: &'a GitInfo,
    containers: ContainerSet,
    dispatcher: &'a D,
    used_containers: Cell<bool>,
}

impl<D: Dispatcher + ?Sized> TaskRunner for PipelineRunner<'_, D> {
    fn is_satisfied(&self, task: &Task) -> Result<bool, BuildError> {
        match task.satisfied {
            Satisfaction::Never => Ok(false),
            Satisfaction::ImageUpToDate(env) => self.image_up_to_date(env),
            Satisfaction::InputsUnchanged => {
                let Some(digest) = self.pass_fingerprint(task)? else {
                    return Ok(false);
                };
                let fresh = stamp_matches(&self.task_stamp(&task.name), &digest)?;
                debug!(task = %task.name, fresh, "pass stamp checked");
                Ok(fresh)
            }
        }
    }

    fn run(&self, task: &Task) -> Result<(), BuildError> {
        eprintln!("==> {} [{}]", task.name, task.environment);
        match &task.action {
            Action::Group => Ok(()),
            Action::Builtin(builtin) => self.run_builtin(*builtin),
            Action::Commands(commands) => {
                let digest = self.pass_fingerprint(task)?;
                for command in commands {
                    self.dispatch(task, command)?;
                }
                if let Some(digest) = digest {
                    write_stamp(&self.task_stamp(&task.name), &digest)?;
                }
                Ok(())
            }
            Action::BuildImage(target) => self.build_image(task, *target),
        }
    }
}

impl<D: Dispatcher + ?Sized> PipelineRunner<'_, D> {
    fn image_tag(&self, env: Environment) -> Result<String, BuildError> {
        self.containers
            .base(env)
            .map(|spec| spec.image_tag.clone())
            .ok_or_else(|| BuildError::Other(anyhow!("{env} has no image")))
    }

    fn image_fingerprint(&self, env: Environment) -> Result<String, BuildError> {
        let root = self.workspace.root();
        let config = &self.workspace.config;
        let dockerfile = root.join(&config.dockerfile);
        let manifest = root.join(MANIFEST_FILE);
        let lock = lock_file(root);
        let empty = BTreeMap::new();
        let build_args = config
            .environment(env)
            .map(|cfg| &cfg.build_args)
            .unwrap_or(&empty);
        let digest = fingerprint(&ImageInputs {
            dockerfile: &dockerfile,
            manifest: &manifest,
            lock_file: lock.as_deref(),
            target: env.as_str(),
            build_args,
        })?;
        Ok(digest)
    }

    fn stamp(&self, image_tag: &str) -> PathBuf {
        stamp_path(&self.workspace.config.stamps_dir(self.workspace.root()), image_tag)
    }

    fn task_stamp(&self, task: &str) -> PathBuf {
        task_stamp_path(&self.workspace.config.stamps_dir(self.workspace.root()), task)
    }

    /// Digest of what a cached check last passed with, taken before it runs.
    fn pass_fingerprint(&self, task: &Task) -> Result<Option<String>, BuildError> {
        if task.satisfied != Satisfaction::InputsUnchanged {
            return Ok(None);
        }
        let commands: &[Vec<String>] = match &task.action {
            Action::Commands(commands) => commands,
            _ => &[],
        };
        let image_tag = self
            .containers
            .base(task.environment)
            .map(|spec| spec.image_tag.clone());
        let image_stamp = match &image_tag {
            Some(tag) => read_stamp(&self.stamp(tag))?,
            None => None,
        };
        let digest = task_fingerprint(&TaskInputs {
            root: self.workspace.root(),
            paths: &task.inputs,
            commands,
            image_tag: image_tag.as_deref(),
            image_stamp: image_stamp.as_deref(),
        })?;
        Ok(Some(digest))
    }

    fn image_up_to_date(&self, env: Environment) -> Result<bool, BuildError> {
        let tag = self.image_tag(env)?;
        if !self.dispatcher.image_exists(&tag)? {
            debug!(image = %tag, "image missing");
            return Ok(false);
        }
        if self.workspace.options.feature_test_mode {
            debug!(image = %tag, "feature test mode, existing image accepted");
            return Ok(true);
        }
        let digest = self.image_fingerprint(env)?;
        let fresh = stamp_matches(&self.stamp(&tag), &digest)?;
        debug!(image = %tag, fresh, "image stamp checked");
        Ok(fresh)
    }

    fn build_image(&self, task: &Task, target: Environment) -> Result<(), BuildError> {
        let tag = self.image_tag(target)?;
        let stage = target
            .docker_target()
            .ok_or_else(|| BuildError::Other(anyhow!("{target} has no docker stage")))?;
        let context = if task.environment == Environment::Host {
            self.workspace.root()
        } else {
            self.workspace.docker_root()
        };
        let config = &self.workspace.config;
        let build_args = config
            .environment(target)
            .map(|cfg| cfg.build_args.clone())
            .unwrap_or_default();
        let argv = build_image_args(
            &context.join(&config.dockerfile),
            stage,
            &tag,
            context,
            &build_args,
        );
        self.dispatch(task, &argv)?;

        let digest = self.image_fingerprint(target)?;
        write_stamp(&self.stamp(&tag), &digest)?;
        info!(image = %tag, "image built");
        Ok(())
    }

    fn container_for(&self, task: &Task) -> Option<ContainerSpec> {
        self.containers.for_access(task.environment, task.access)
    }

    fn dispatch(&self, task: &Task, command: &[String]) -> Result<(), BuildError> {
        let container = self.container_for(task);
        if container.is_some() {
            self.used_containers.set(true);
        }
        self.dispatcher.dispatch(&DispatchRequest {
            task: &task.name,
            environment: task.environment,
            command,
            container: container.as_ref(),
        })?;
        Ok(())
    }

    fn run_builtin(&self, builtin: Builtin) -> Result<(), BuildError> {
        let ws = self.workspace;
        match builtin {
            Builtin::CheckTickets => {
                let layout = TicketLayout::from_config(ws.root(), &ws.config);
                ticket::validate(self.git, &ws.manifest.name, &layout)?;
            }
            Builtin::CheckVersion => {
                let version = version::validate_declared(&ws.manifest.version, self.git)?;
                info!(%version, "version accepted");
            }
            Builtin::PushTags => {
                version::validate_declared(&ws.manifest.version, self.git)?;
                let tag = ws.manifest.version.trim();
                let repo = Git::new(ws.root());
                let unstaged = repo.unstaged_paths()?;
                if !unstaged.is_empty() {
                    if self.git.is_primary_branch() {
                        return Err(GitError::UnstagedChanges {
                            branch: self.git.branch.clone(),
                            paths: unstaged,
                        }
                        .into());
                    }
                    repo.commit_tracked(&format!("Committing staged changes for {tag}"))?;
                    repo.push_head(REMOTE)?;
                    info!(branch = %self.git.branch, files = unstaged.len(), "tracked changes pushed");
                }
                repo.create_tag(tag)?;
                repo.push_tag(REMOTE, tag)?;
                info!(tag, "tag pushed");
            }
            Builtin::Clean => {
                let root = ws.root();
                let dirs = std::iter::once(root.join(&ws.config.build_dir))
                    .chain(CACHE_DIRS.iter().map(|dir| root.join(dir)));
                for dir in dirs {
                    if dir.exists() {
                        fs::remove_dir_all(&dir)
                            .with_context(|| format!("remove {}", dir.display()))?;
                        debug!(dir = %dir.display(), "removed");
                    }
                }
            }
        }
        Ok(())
    }

    /// Hand files created by containers back to the invoking user.
    fn restore_ownership(&self) {
        let (Some(uid), Some(gid)) = (self.workspace.options.user_id, self.workspace.options.group_id)
        else {
            return;
        };
        let Some(spec) = self.containers.for_access(Environment::Build, Access::NONE) else {
            return;
        };
        let root = self.workspace.docker_root().display().to_string();
        let owner = format!("{uid}:{gid}");
        let command: Vec<String> = [
            "find",
            root.as_str(),
            "-mindepth",
            "1",
            "-maxdepth",
            "1",
            "!",
            "-name",
            ".git",
            "-exec",
            "chown",
            "-R",
            owner.as_str(),
            "{}",
            "+",
        ]
        .iter()
        .map(|arg| arg.to_string())
        .collect();
        let request = DispatchRequest {
            task: "restore_ownership",
            environment: Environment::Build,
            command: &command,
            container: Some(&spec),
        };
        match self.dispatcher.dispatch(&request) {
            Ok(_) => debug!(%owner, "ownership restored"),
            Err(err) => warn!(%err, "could not restore file ownership"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TaskStatus;
    use crate::test_support::{RecordingDispatcher, TestProject, git_info};

    fn workspace(project: &TestProject) -> Workspace {
        let mut ws = Workspace::load(RunOptions {
            project_root: project.root().to_path_buf(),
            docker_project_root: PathBuf::from("/usr/dev"),
            user_id: None,
            group_id: None,
            feature_test_mode: false,
        })
        .expect("load workspace");
        ws.credentials = Credentials::default();
        ws
    }

    #[test]
    fn plan_renders_order_with_environments() {
        let plan = Plan::new(&BuildConfig::default(), &["setup_dev_env"]).expect("plan");
        assert_eq!(
            plan.render(),
            vec![
                "plan: 1. setup_build_env [host]",
                "plan: 2. setup_dev_env [build]"
            ]
        );
    }

    #[test]
    fn unknown_goal_is_a_graph_error() {
        let err = Plan::new(&BuildConfig::default(), &["deploy"]).expect_err("unknown");
        assert_eq!(err, GraphError::UnknownTask { name: "deploy".into() });
    }

    #[test]
    fn workspace_requires_absolute_docker_root() {
        let project = TestProject::new("demo", "0.1.0");
        let err = Workspace::load(RunOptions {
            project_root: project.root().to_path_buf(),
            docker_project_root: PathBuf::from("relative"),
            user_id: None,
            group_id: None,
            feature_test_mode: false,
        })
        .expect_err("relative");
        assert_eq!(err.exit_code(), crate::exit_codes::ENVIRONMENT);
    }

    #[test]
    fn builds_images_then_runs_in_dev_container() {
        let project = TestProject::new("demo", "0.1.0-dev.1");
        let ws = workspace(&project);
        let plan = Plan::new(&ws.config, &["test_types"]).expect("plan");
        let dispatcher = RecordingDispatcher::new();
        let git = git_info("12-types", &[]);

        let report = run_plan(&ws, &plan, &git, &dispatcher, &CancelToken::new()).expect("run");

        assert_eq!(
            dispatcher.tasks(),
            vec!["setup_build_env", "setup_dev_env", "test_types"]
        );
        let calls = dispatcher.dispatched();
        assert_eq!(calls[0].image, None, "build image is built on the host");
        assert_eq!(calls[0].command[..2], ["docker", "build"]);
        assert_eq!(calls[1].image.as_deref(), Some("demo:build-12"));
        assert!(calls[1].mounts.contains(&PathBuf::from("/var/run/docker.sock")));
        assert!(calls[1].command.contains(&"demo:dev-12".to_string()));
        assert_eq!(calls[2].image.as_deref(), Some("demo:dev-12"));
        assert!(!calls[2].mounts.contains(&PathBuf::from("/var/run/docker.sock")));
        assert_eq!(report.count(TaskStatus::Passed), 3);

        let snapshot = project.path("build/git_info.json");
        assert!(snapshot.is_file());
        assert!(project.path("build/stamps/demo_build-12.sha256").is_file());
    }

    #[test]
    fn stale_stamp_rebuilds_existing_image() {
        let project = TestProject::new("demo", "0.1.0-dev.1");
        let ws = workspace(&project);
        let plan = Plan::new(&ws.config, &["setup_build_env"]).expect("plan");
        let dispatcher = RecordingDispatcher::new().with_images(["demo:build-3"]);
        let git = git_info("3-stamps", &[]);

        run_plan(&ws, &plan, &git, &dispatcher, &CancelToken::new()).expect("first");
        assert_eq!(dispatcher.tasks(), vec!["setup_build_env"]);

        run_plan(&ws, &plan, &git, &dispatcher, &CancelToken::new()).expect("second");
        assert_eq!(dispatcher.tasks().len(), 1, "stamp now matches");

        project.write("Dockerfile", "FROM python:3.13-slim AS build\n");
        run_plan(&ws, &plan, &git, &dispatcher, &CancelToken::new()).expect("third");
        assert_eq!(dispatcher.tasks().len(), 2, "Dockerfile change invalidates stamp");
    }

    #[test]
    fn feature_test_mode_accepts_existing_images() {
        let project = TestProject::new("demo", "0.1.0-dev.1");
        let mut ws = workspace(&project);
        ws.options.feature_test_mode = true;
        let plan = Plan::new(&ws.config, &["setup_dev_env"]).expect("plan");
        let dispatcher = RecordingDispatcher::new().with_images(["demo:build-9", "demo:dev-9"]);

        let report =
            run_plan(&ws, &plan, &git_info("9-x", &[]), &dispatcher, &CancelToken::new())
                .expect("run");
        assert!(dispatcher.dispatched().is_empty());
        assert_eq!(report.count(TaskStatus::Cached), 2);
    }

    #[test]
    fn check_version_rejects_release_on_ticket_branch() {
        let project = TestProject::new("demo", "1.0.0");
        let ws = workspace(&project);
        let plan = Plan::new(&ws.config, &["check_version"]).expect("plan");
        let dispatcher = RecordingDispatcher::new();

        let err = run_plan(
            &ws,
            &plan,
            &git_info("8-release", &[]),
            &dispatcher,
            &CancelToken::new(),
        )
        .expect_err("invalid");
        assert!(matches!(
            err.root(),
            BuildError::Version(crate::errors::VersionError::InvalidVersionFormat { .. })
        ));
        assert_eq!(err.exit_code(), crate::exit_codes::VALIDATION);
    }

    #[test]
    fn clean_removes_build_and_caches() {
        let project = TestProject::new("demo", "0.1.0");
        project.write(".ruff_cache/x", "");
        project.write("src/keep.py", "");
        let ws = workspace(&project);
        let plan = Plan::new(&ws.config, &["clean"]).expect("plan");

        run_plan(
            &ws,
            &plan,
            &git_info("main", &[]),
            &RecordingDispatcher::new(),
            &CancelToken::new(),
        )
        .expect("clean");
        assert!(!project.path("build").exists());
        assert!(!project.path(".ruff_cache").exists());
        assert!(project.path("src/keep.py").exists());
    }

    #[test]
    fn ownership_restored_after_container_work() {
        let project = TestProject::new("demo", "0.1.0");
        let mut ws = workspace(&project);
        ws.options.user_id = Some(1000);
        ws.options.group_id = Some(1000);
        let plan = Plan::new(&ws.config, &["lint"]).expect("plan");
        let dispatcher = RecordingDispatcher::new();

        run_plan(&ws, &plan, &git_info("main", &[]), &dispatcher, &CancelToken::new())
            .expect("run");
        let last = dispatcher.dispatched().pop().expect("dispatches");
        assert_eq!(last.task, "restore_ownership");
        assert_eq!(last.image.as_deref(), Some("demo:build"));
        assert!(last.command.contains(&"1000:1000".to_string()));
    }
}
