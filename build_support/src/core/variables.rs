//! The fixed set of values the variable-report CLI can print.

use std::fmt;
use std::str::FromStr;

use crate::core::environment::Environment;
use crate::errors::VariableError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildVariable {
    /// Branch-qualified image tag of an environment.
    ImageTag(Environment),
    /// `docker run -it ...` for a shell in an environment.
    InteractiveCommand(Environment),
    ProjectVersion,
}

impl BuildVariable {
    pub const ALL: [BuildVariable; 9] = [
        BuildVariable::ImageTag(Environment::Build),
        BuildVariable::ImageTag(Environment::Dev),
        BuildVariable::ImageTag(Environment::Prod),
        BuildVariable::ImageTag(Environment::Pulumi),
        BuildVariable::InteractiveCommand(Environment::Build),
        BuildVariable::InteractiveCommand(Environment::Dev),
        BuildVariable::InteractiveCommand(Environment::Prod),
        BuildVariable::InteractiveCommand(Environment::Pulumi),
        BuildVariable::ProjectVersion,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ImageTag(Environment::Build) => "build-docker-image",
            Self::ImageTag(Environment::Dev) => "dev-docker-image",
            Self::ImageTag(Environment::Prod) => "prod-docker-image",
            Self::ImageTag(Environment::Pulumi) => "pulumi-docker-image",
            Self::InteractiveCommand(Environment::Build) => "interactive-build-docker-command",
            Self::InteractiveCommand(Environment::Dev) => "interactive-dev-docker-command",
            Self::InteractiveCommand(Environment::Prod) => "interactive-prod-docker-command",
            Self::InteractiveCommand(Environment::Pulumi) => "interactive-pulumi-docker-command",
            Self::ImageTag(Environment::Host) | Self::InteractiveCommand(Environment::Host) => {
                "host"
            }
            Self::ProjectVersion => "project-version",
        }
    }

    pub fn known_names() -> Vec<&'static str> {
        Self::ALL.iter().map(|v| v.name()).collect()
    }
}

impl fmt::Display for BuildVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BuildVariable {
    type Err = VariableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.name() == s.trim())
            .ok_or_else(|| VariableError::UnknownVariable {
                name: s.to_string(),
                known: Self::known_names(),
            })
    }
}
