//! Orchestrator configuration stored in `build_support.toml` at the project root.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::container::{EnvironmentLayout, Network};
use crate::core::environment::Environment;

pub const CONFIG_FILE: &str = "build_support.toml";

/// Orchestrator configuration (TOML).
///
/// Every field is optional; a project without the file gets the defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildConfig {
    /// Dockerfile path, relative to the project root.
    pub dockerfile: PathBuf,

    /// Build output directory; holds `git_info.json` and image stamps.
    pub build_dir: PathBuf,

    /// Root of per-project ticket documents.
    pub tickets_dir: PathBuf,

    /// Directories searched for a ticket's feature test, in order.
    pub feature_test_dirs: Vec<PathBuf>,

    /// Refresh tags from the remote before reading them.
    pub fetch_tags: bool,

    /// Bytes of task output kept for failure reports.
    pub output_tail_bytes: usize,

    /// Per-task wall-clock limit. Unset means no limit.
    pub task_timeout_secs: Option<u64>,

    /// Seconds a cancelled container gets to stop before it is killed.
    pub stop_grace_secs: u64,

    /// Home directory inside the images (credentials are mounted below it).
    pub container_home: String,

    pub environments: EnvironmentsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EnvironmentsConfig {
    pub build: EnvironmentConfig,
    pub dev: EnvironmentConfig,
    pub prod: EnvironmentConfig,
    pub pulumi: EnvironmentConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Project-relative directories exported as `PYTHONPATH`.
    pub python_path: Vec<String>,
    pub network: Network,
    /// Extra `--build-arg` values for this image.
    pub build_args: BTreeMap<String, String>,
}

impl EnvironmentConfig {
    fn with_python_path(dirs: &[&str]) -> Self {
        Self {
            python_path: dirs.iter().map(|d| d.to_string()).collect(),
            ..Self::default()
        }
    }
}

impl Default for EnvironmentsConfig {
    fn default() -> Self {
        Self {
            build: EnvironmentConfig::with_python_path(&["build_support/src"]),
            dev: EnvironmentConfig::with_python_path(&[
                "build_support/src",
                "build_support/test",
                "pypi_package/src",
                "pypi_package/test",
                "pulumi",
            ]),
            prod: EnvironmentConfig::with_python_path(&["pypi_package/src"]),
            pulumi: EnvironmentConfig::with_python_path(&["pulumi"]),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            dockerfile: PathBuf::from("Dockerfile"),
            build_dir: PathBuf::from("build"),
            tickets_dir: PathBuf::from("docs/tickets"),
            feature_test_dirs: vec![
                PathBuf::from("build_support/test/feature_tests"),
                PathBuf::from("pypi_package/test/feature_tests"),
            ],
            fetch_tags: true,
            output_tail_bytes: 4000,
            task_timeout_secs: None,
            stop_grace_secs: 10,
            container_home: "/root".to_string(),
            environments: EnvironmentsConfig::default(),
        }
    }
}

impl BuildConfig {
    pub fn validate(&self) -> Result<()> {
        if self.output_tail_bytes == 0 {
            return Err(anyhow!("output_tail_bytes must be > 0"));
        }
        if self.task_timeout_secs == Some(0) {
            return Err(anyhow!("task_timeout_secs must be > 0 when set"));
        }
        if self.feature_test_dirs.is_empty() {
            return Err(anyhow!("feature_test_dirs must list at least one directory"));
        }
        for (label, path) in [
            ("dockerfile", &self.dockerfile),
            ("build_dir", &self.build_dir),
            ("tickets_dir", &self.tickets_dir),
        ] {
            if path.is_absolute() {
                return Err(anyhow!("{label} must be relative to the project root"));
            }
        }
        if !self.container_home.starts_with('/') {
            return Err(anyhow!("container_home must be an absolute container path"));
        }
        Ok(())
    }

    pub fn environment(&self, env: Environment) -> Option<&EnvironmentConfig> {
        match env {
            Environment::Host => None,
            Environment::Build => Some(&self.environments.build),
            Environment::Dev => Some(&self.environments.dev),
            Environment::Prod => Some(&self.environments.prod),
            Environment::Pulumi => Some(&self.environments.pulumi),
        }
    }

    /// Container layouts for every image environment.
    pub fn layouts(&self) -> BTreeMap<Environment, EnvironmentLayout> {
        Environment::CONTAINERS
            .into_iter()
            .filter_map(|env| {
                self.environment(env).map(|cfg| {
                    (
                        env,
                        EnvironmentLayout {
                            python_path: cfg.python_path.clone(),
                            network: cfg.network,
                        },
                    )
                })
            })
            .collect()
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }

    pub fn git_info_path(&self, root: &Path) -> PathBuf {
        root.join(&self.build_dir).join("git_info.json")
    }

    pub fn stamps_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.build_dir).join("stamps")
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `BuildConfig::default()`.
pub fn load_config(path: &Path) -> Result<BuildConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        let cfg = BuildConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: BuildConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid {}", path.display()))?;
    Ok(cfg)
}
