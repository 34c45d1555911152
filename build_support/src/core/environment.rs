//! Execution environments and the image tags that back them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::git_info::GitInfo;

/// Where a task runs: directly on the host, or inside one of the project images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Host,
    Build,
    Dev,
    Prod,
    Pulumi,
}

impl Environment {
    pub const CONTAINERS: [Environment; 4] = [
        Environment::Build,
        Environment::Dev,
        Environment::Prod,
        Environment::Pulumi,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Build => "build",
            Self::Dev => "dev",
            Self::Prod => "prod",
            Self::Pulumi => "pulumi",
        }
    }

    /// Dockerfile stage name, `None` for the host.
    pub fn docker_target(self) -> Option<&'static str> {
        match self {
            Self::Host => None,
            other => Some(other.as_str()),
        }
    }

    /// Name of the task that builds this environment's image.
    pub fn setup_task(self) -> Option<&'static str> {
        match self {
            Self::Host => None,
            Self::Build => Some("setup_build_env"),
            Self::Dev => Some("setup_dev_env"),
            Self::Prod => Some("setup_prod_env"),
            Self::Pulumi => Some("setup_pulumi_env"),
        }
    }

    /// `{project}:{target}` before any branch suffix.
    pub fn base_tag(self, project_name: &str) -> Option<String> {
        let target = self.docker_target()?;
        Some(format!("{}:{target}", repository_name(project_name)))
    }

    /// Fully qualified image tag for the current branch.
    pub fn image_tag(self, project_name: &str, git: &GitInfo) -> Option<String> {
        self.base_tag(project_name)
            .map(|base| image_tag(&base, git))
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "host" => Ok(Self::Host),
            "build" => Ok(Self::Build),
            "dev" => Ok(Self::Dev),
            "prod" => Ok(Self::Prod),
            "pulumi" => Ok(Self::Pulumi),
            other => Err(format!("unknown environment '{other}'")),
        }
    }
}

/// Branch-qualified tag: `{base_tag}` without a ticket, `{base_tag}-{ticket}` otherwise.
///
/// Both the dispatcher and the variable reporter go through this function.
pub fn image_tag(base_tag: &str, git: &GitInfo) -> String {
    match git.ticket_id() {
        Some(ticket) => format!("{base_tag}-{}", sanitize_tag_component(ticket)),
        None => base_tag.to_string(),
    }
}

/// Docker repository names must be lowercase.
fn repository_name(project_name: &str) -> String {
    project_name.trim().to_ascii_lowercase()
}

/// Replace characters docker rejects in a tag (`[A-Za-z0-9_.-]` only).
fn sanitize_tag_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
