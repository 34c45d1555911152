//! The `git_info.json` snapshot written once per run.
//!
//! Tasks read the snapshot instead of querying git again; it is never
//! rewritten mid-run.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::git_info::GitInfo;

pub fn load_git_info(path: &Path) -> Result<GitInfo> {
    debug!(path = %path.display(), "loading git info");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read git info {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse git info {}", path.display()))
}

/// Atomically write the snapshot (temp file + rename).
pub fn write_git_info(path: &Path, info: &GitInfo) -> Result<()> {
    debug!(path = %path.display(), branch = %info.branch, tags = info.tags.len(), "writing git info");
    let mut buf = serde_json::to_string_pretty(info).context("serialize git info")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
