//! Container invocation specs and docker argument rendering.
//!
//! Specs are computed once per environment per run. Task-specific access (the
//! docker socket, git credentials) is layered on top of the shared spec, so
//! the dispatcher and the interactive shell commands render identical
//! arguments.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::environment::Environment;
use crate::core::git_info::GitInfo;
use crate::core::task::Access;

/// Host docker daemon socket, mounted at the same path inside containers.
pub const DOCKER_SOCKET: &str = "/var/run/docker.sock";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Default,
    Host,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountMode {
    ReadWrite,
    ReadOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host_path: PathBuf,
    pub container_path: PathBuf,
    pub mode: MountMode,
}

impl Mount {
    pub fn read_write(host: impl Into<PathBuf>, container: impl Into<PathBuf>) -> Self {
        Self {
            host_path: host.into(),
            container_path: container.into(),
            mode: MountMode::ReadWrite,
        }
    }

    pub fn read_only(host: impl Into<PathBuf>, container: impl Into<PathBuf>) -> Self {
        Self {
            host_path: host.into(),
            container_path: container.into(),
            mode: MountMode::ReadOnly,
        }
    }

    /// `-v` value: `host:container[:ro]`.
    pub fn volume_arg(&self) -> String {
        let mut arg = format!(
            "{}:{}",
            self.host_path.display(),
            self.container_path.display()
        );
        if self.mode == MountMode::ReadOnly {
            arg.push_str(":ro");
        }
        arg
    }
}

/// Everything needed to start a container for one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image_tag: String,
    pub mounts: Vec<Mount>,
    pub env_vars: BTreeMap<String, String>,
    pub working_dir: String,
    pub network: Network,
}

impl ContainerSpec {
    /// `docker run` arguments up to and including the image tag.
    pub fn run_args(&self, name: Option<&str>, interactive: bool) -> Vec<String> {
        let mut args = vec!["docker".to_string(), "run".to_string(), "--rm".to_string()];
        if let Some(name) = name {
            args.push(format!("--name={name}"));
        }
        args.push(format!("--workdir={}", self.working_dir));
        if self.network == Network::Host {
            args.push("--network=host".to_string());
        }
        for (key, value) in &self.env_vars {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        for mount in &self.mounts {
            args.push("-v".to_string());
            args.push(mount.volume_arg());
        }
        if interactive {
            args.push("-it".to_string());
        }
        args.push(self.image_tag.clone());
        args
    }

    pub fn has_mount(&self, container_path: &Path) -> bool {
        self.mounts.iter().any(|m| m.container_path == container_path)
    }
}

/// Optional credentials discovered on the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub ssh_dir: Option<PathBuf>,
    pub gitconfig: Option<PathBuf>,
}

/// Per-environment settings that shape the container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentLayout {
    /// Project-relative directories exported on `PYTHONPATH`.
    pub python_path: Vec<String>,
    pub network: Network,
}

/// Run-wide inputs for building container specs.
#[derive(Debug, Clone)]
pub struct ContainerInputs<'a> {
    pub project_name: &'a str,
    pub git: &'a GitInfo,
    pub host_root: &'a Path,
    pub docker_root: &'a Path,
    /// Home directory inside the images; credentials mount below it.
    pub container_home: &'a str,
    pub credentials: &'a Credentials,
    /// Container-side path of the git-info snapshot.
    pub git_info_path: Option<PathBuf>,
}

/// Container specs for every image environment of a run.
#[derive(Debug, Clone)]
pub struct ContainerSet {
    specs: BTreeMap<Environment, ContainerSpec>,
    credential_mounts: Vec<Mount>,
}

impl ContainerSet {
    pub fn new(inputs: &ContainerInputs<'_>, layouts: &BTreeMap<Environment, EnvironmentLayout>) -> Self {
        let mut specs = BTreeMap::new();
        for env in Environment::CONTAINERS {
            let Some(image_tag) = env.image_tag(inputs.project_name, inputs.git) else {
                continue;
            };
            let layout = layouts.get(&env).cloned().unwrap_or_default();
            specs.insert(env, base_spec(inputs, image_tag, &layout));
        }

        let mut credential_mounts = Vec::new();
        let home = Path::new(inputs.container_home);
        if let Some(ssh) = &inputs.credentials.ssh_dir {
            credential_mounts.push(Mount::read_only(ssh, home.join(".ssh")));
        }
        if let Some(gitconfig) = &inputs.credentials.gitconfig {
            credential_mounts.push(Mount::read_only(gitconfig, home.join(".gitconfig")));
        }

        Self {
            specs,
            credential_mounts,
        }
    }

    /// Shared spec for an environment, `None` for the host.
    pub fn base(&self, env: Environment) -> Option<&ContainerSpec> {
        self.specs.get(&env)
    }

    /// Spec for a task with the given access needs.
    pub fn for_access(&self, env: Environment, access: Access) -> Option<ContainerSpec> {
        let mut spec = self.specs.get(&env)?.clone();
        if access.docker_socket {
            spec.mounts
                .push(Mount::read_write(DOCKER_SOCKET, DOCKER_SOCKET));
        }
        if access.git_credentials {
            spec.mounts.extend(self.credential_mounts.iter().cloned());
        }
        Some(spec)
    }

    /// Shell command for an interactive session in an environment.
    pub fn interactive_command(&self, env: Environment) -> Option<String> {
        let spec = self.for_access(env, Access::ALL)?;
        Some(spec.run_args(None, true).join(" "))
    }
}

fn base_spec(inputs: &ContainerInputs<'_>, image_tag: String, layout: &EnvironmentLayout) -> ContainerSpec {
    let python_path = layout
        .python_path
        .iter()
        .map(|dir| inputs.docker_root.join(dir).display().to_string())
        .collect::<Vec<_>>()
        .join(":");

    let mut env_vars = BTreeMap::new();
    if !python_path.is_empty() {
        env_vars.insert("PYTHONPATH".to_string(), python_path.clone());
        env_vars.insert("MYPYPATH".to_string(), python_path);
    }
    if let Some(path) = &inputs.git_info_path {
        env_vars.insert("BUILD_SUPPORT_GIT_INFO".to_string(), path.display().to_string());
    }

    ContainerSpec {
        image_tag,
        mounts: vec![Mount::read_write(inputs.host_root, inputs.docker_root)],
        env_vars,
        working_dir: inputs.docker_root.display().to_string(),
        network: layout.network,
    }
}

/// `docker build` arguments for one Dockerfile stage.
pub fn build_image_args(
    dockerfile: &Path,
    target: &str,
    image_tag: &str,
    context_dir: &Path,
    build_args: &BTreeMap<String, String>,
) -> Vec<String> {
    let mut args = vec![
        "docker".to_string(),
        "build".to_string(),
        "-f".to_string(),
        dockerfile.display().to_string(),
        "--target".to_string(),
        target.to_string(),
        "--build-arg".to_string(),
        "BUILDKIT_INLINE_CACHE=1".to_string(),
    ];
    for (key, value) in build_args {
        args.push("--build-arg".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push("-t".to_string());
    args.push(image_tag.to_string());
    args.push(context_dir.display().to_string());
    args
}
