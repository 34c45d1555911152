//! Project manifest (`pyproject.toml`) reader.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

pub const MANIFEST_FILE: &str = "pyproject.toml";

/// Lock files whose content feeds the image stamps, first match wins.
const LOCK_FILES: [&str; 2] = ["uv.lock", "poetry.lock"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectManifest {
    pub name: String,
    /// Version exactly as declared.
    pub version: String,
}

/// Read name and version from `[project]`, falling back to `[tool.poetry]`.
pub fn load_manifest(project_root: &Path) -> Result<ProjectManifest> {
    let path = project_root.join(MANIFEST_FILE);
    let contents = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let manifest = parse_manifest(&contents).with_context(|| format!("parse {}", path.display()))?;
    debug!(name = %manifest.name, version = %manifest.version, "manifest loaded");
    Ok(manifest)
}

fn parse_manifest(contents: &str) -> Result<ProjectManifest> {
    let doc: toml::Table = toml::from_str(contents).context("invalid toml")?;
    let sections = [
        doc.get("project").and_then(|v| v.as_table()),
        doc.get("tool")
            .and_then(|v| v.get("poetry"))
            .and_then(|v| v.as_table()),
    ];
    for section in sections.into_iter().flatten() {
        let name = section.get("name").and_then(|v| v.as_str());
        let version = section.get("version").and_then(|v| v.as_str());
        if let (Some(name), Some(version)) = (name, version) {
            if name.trim().is_empty() {
                return Err(anyhow!("project name is empty"));
            }
            return Ok(ProjectManifest {
                name: name.trim().to_string(),
                version: version.trim().to_string(),
            });
        }
    }
    Err(anyhow!("no name/version found in [project] or [tool.poetry]"))
}

/// The project's dependency lock file, if one exists.
pub fn lock_file(project_root: &Path) -> Option<PathBuf> {
    LOCK_FILES
        .iter()
        .map(|name| project_root.join(name))
        .find(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_project_table() {
        let manifest = parse_manifest(
            r#"
[project]
name = "demo"
version = "0.3.0-dev.1"
"#,
        )
        .expect("parse");
        assert_eq!(
            manifest,
            ProjectManifest {
                name: "demo".into(),
                version: "0.3.0-dev.1".into()
            }
        );
    }

    #[test]
    fn falls_back_to_poetry() {
        let manifest = parse_manifest(
            r#"
[tool.poetry]
name = "legacy"
version = "1.0.0"
"#,
        )
        .expect("parse");
        assert_eq!(manifest.name, "legacy");
    }

    #[test]
    fn missing_version_is_an_error() {
        let err = parse_manifest("[project]\nname = \"demo\"\n").expect_err("missing");
        assert!(err.to_string().contains("no name/version"));
    }

    #[test]
    fn finds_lock_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(lock_file(temp.path()), None);
        fs::write(temp.path().join("poetry.lock"), "").expect("write");
        assert_eq!(lock_file(temp.path()), Some(temp.path().join("poetry.lock")));
    }
}
