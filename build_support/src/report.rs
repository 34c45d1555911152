//! Build variables for the Makefile.
//!
//! Values come from the same [`ContainerSet`](crate::core::container::ContainerSet)
//! the dispatcher uses, so `make shell` and `make test` agree on image tags
//! and mounts.

use tracing::instrument;

use crate::core::git_info::GitInfo;
use crate::core::variables::BuildVariable;
use crate::errors::VariableError;
use crate::pipeline::Workspace;

/// Render one variable as a single line, without the trailing newline.
#[instrument(skip_all, fields(variable = %variable, branch = %git.branch))]
pub fn report(variable: BuildVariable, git: &GitInfo, workspace: &Workspace) -> Result<String, VariableError> {
    let value = match variable {
        BuildVariable::ProjectVersion => Some(workspace.manifest.version.trim().to_string()),
        BuildVariable::ImageTag(env) => env.image_tag(&workspace.manifest.name, git),
        BuildVariable::InteractiveCommand(env) => workspace.containers(git).interactive_command(env),
    };
    value.ok_or_else(|| VariableError::UnknownVariable {
        name: variable.name().to_string(),
        known: BuildVariable::known_names(),
    })
}
