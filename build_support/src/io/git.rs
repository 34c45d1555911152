//! Git adapter and the reader that captures [`GitInfo`] for a run.
//!
//! Only the reader talks to the network (`git fetch --tags`), and it retries
//! that once. Every other call is a local query.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::git_info::GitInfo;
use crate::errors::GitError;

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// True when the workdir is inside a git work tree.
    pub fn is_work_tree(&self) -> Result<bool> {
        let out = self.run(&["rev-parse", "--is-inside-work-tree"])?;
        Ok(out.status.success() && String::from_utf8_lossy(&out.stdout).trim() == "true")
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (check out a branch first)"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Local tags in git's listing order.
    pub fn tags(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&["tag", "--list"])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Fetch tags from the default remote.
    #[instrument(skip_all)]
    pub fn fetch_tags(&self) -> Result<()> {
        self.run_checked(&["fetch", "--tags", "--quiet"])?;
        Ok(())
    }

    /// Tracked files with changes not yet staged (`git diff`).
    pub fn unstaged_paths(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&["diff", "--name-only"])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Stage every tracked change and commit it.
    #[instrument(skip_all)]
    pub fn commit_tracked(&self, message: &str) -> Result<()> {
        self.run_checked(&["add", "-u"])?;
        self.run_checked(&["commit", "-q", "-m", message])?;
        debug!("tracked changes committed");
        Ok(())
    }

    /// Push the current branch to `remote` under the same name.
    #[instrument(skip_all, fields(remote))]
    pub fn push_head(&self, remote: &str) -> Result<()> {
        self.run_checked(&["push", "-q", remote, "HEAD"])?;
        Ok(())
    }

    /// Create a lightweight tag at HEAD.
    #[instrument(skip_all, fields(tag))]
    pub fn create_tag(&self, tag: &str) -> Result<()> {
        debug!(tag, "creating tag");
        self.run_checked(&["tag", tag])?;
        Ok(())
    }

    #[instrument(skip_all, fields(remote, tag))]
    pub fn push_tag(&self, remote: &str, tag: &str) -> Result<()> {
        debug!(remote, tag, "pushing tag");
        self.run_checked(&["push", remote, tag])?;
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

/// Whether the reader refreshes tags from the remote first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPolicy {
    Fetch,
    LocalOnly,
}

/// Result of reading git state: the snapshot plus a non-fatal fetch failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitState {
    pub info: GitInfo,
    pub fetch_failure: Option<GitError>,
}

/// Captures branch and tags once per run.
#[derive(Debug, Clone)]
pub struct GitStateReader {
    git: Git,
}

impl GitStateReader {
    pub const FETCH_ATTEMPTS: u32 = 2;

    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            git: Git::new(workdir),
        }
    }

    pub fn git(&self) -> &Git {
        &self.git
    }

    /// Read branch and tags.
    ///
    /// A failed fetch is retried once and then reported in
    /// [`GitState::fetch_failure`]; local tags are used either way.
    #[instrument(skip_all, fields(workdir = %self.git.workdir().display()))]
    pub fn read(&self, policy: FetchPolicy) -> Result<GitState, GitError> {
        let unavailable = |err: anyhow::Error| GitError::GitUnavailable {
            workdir: self.git.workdir().to_path_buf(),
            reason: format!("{err:#}"),
        };

        if !self.git.is_work_tree().map_err(unavailable)? {
            return Err(GitError::GitUnavailable {
                workdir: self.git.workdir().to_path_buf(),
                reason: "not a git repository".to_string(),
            });
        }

        let fetch_failure = match policy {
            FetchPolicy::LocalOnly => None,
            FetchPolicy::Fetch => retry_fetch(Self::FETCH_ATTEMPTS, || self.git.fetch_tags()).err(),
        };
        if let Some(err) = &fetch_failure {
            warn!(%err, "continuing with local tags");
        }

        let branch = self.git.current_branch().map_err(unavailable)?;
        let tags = self.git.tags().map_err(unavailable)?;
        debug!(branch = %branch, tags = tags.len(), "git state read");
        Ok(GitState {
            info: GitInfo::new(branch, tags),
            fetch_failure,
        })
    }
}

/// Run `fetch` up to `attempts` times, stopping at the first success.
fn retry_fetch<F>(attempts: u32, mut fetch: F) -> Result<(), GitError>
where
    F: FnMut() -> Result<()>,
{
    let mut last = String::new();
    for attempt in 1..=attempts {
        match fetch() {
            Ok(()) => return Ok(()),
            Err(err) => {
                debug!(attempt, err = %format!("{err:#}"), "git fetch failed");
                last = format!("{err:#}");
            }
        }
    }
    Err(GitError::GitFetchFailed {
        attempts,
        reason: last,
    })
}
