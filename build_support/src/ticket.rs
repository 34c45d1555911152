//! Ticket workflow gate.
//!
//! Every ticket branch must carry a ticket document and a feature test:
//!
//! - `{tickets_dir}/{project}/{branch}.rst`, non-empty
//! - `test_{ticket}_{project}.py` in one of the feature test directories,
//!   defining at least one `test_` function
//!
//! Long-lived branches are exempt.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument};

use crate::core::git_info::GitInfo;
use crate::errors::{TicketError, TicketViolation};
use crate::io::config::BuildConfig;

static TEST_FUNCTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:async\s+)?def\s+test_\w*\s*\(").expect("test marker regex is valid")
});

/// Where ticket artifacts live, resolved against the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketLayout {
    pub tickets_dir: PathBuf,
    pub feature_test_dirs: Vec<PathBuf>,
}

impl TicketLayout {
    pub fn from_config(project_root: &Path, config: &BuildConfig) -> Self {
        Self {
            tickets_dir: project_root.join(&config.tickets_dir),
            feature_test_dirs: config
                .feature_test_dirs
                .iter()
                .map(|dir| project_root.join(dir))
                .collect(),
        }
    }
}

/// The files a ticket branch is expected to carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketRecord {
    pub ticket_id: String,
    pub doc_path: PathBuf,
    /// First existing candidate, or the first directory's candidate.
    pub feature_test_path: PathBuf,
}

pub fn feature_test_file_name(ticket_id: &str, project_name: &str) -> String {
    format!("test_{ticket_id}_{project_name}.py")
}

/// Expected ticket files, `None` on exempt branches.
pub fn ticket_record(git: &GitInfo, project_name: &str, layout: &TicketLayout) -> Option<TicketRecord> {
    let ticket_id = git.ticket_id()?;
    let doc_path = layout
        .tickets_dir
        .join(project_name)
        .join(format!("{}.rst", git.branch));
    let file_name = feature_test_file_name(ticket_id, project_name);
    let candidates: Vec<PathBuf> = layout
        .feature_test_dirs
        .iter()
        .map(|dir| dir.join(&file_name))
        .collect();
    let feature_test_path = candidates
        .iter()
        .find(|path| path.is_file())
        .or_else(|| candidates.first())
        .cloned()
        .unwrap_or_else(|| PathBuf::from(&file_name));
    Some(TicketRecord {
        ticket_id: ticket_id.to_string(),
        doc_path,
        feature_test_path,
    })
}

/// Check both ticket artifacts, reporting every violation at once.
#[instrument(skip_all, fields(branch = %git.branch, project = project_name))]
pub fn validate(git: &GitInfo, project_name: &str, layout: &TicketLayout) -> Result<(), TicketError> {
    let Some(record) = ticket_record(git, project_name, layout) else {
        debug!("exempt branch, skipping ticket checks");
        return Ok(());
    };

    let mut violations = Vec::new();
    if !has_content(&record.doc_path) {
        violations.push(TicketViolation::MissingTicketDoc {
            path: record.doc_path.clone(),
        });
    }
    if !has_test_function(&record.feature_test_path) {
        violations.push(TicketViolation::MissingFeatureTest {
            path: record.feature_test_path.clone(),
            searched: layout.feature_test_dirs.clone(),
        });
    }

    if violations.is_empty() {
        debug!(ticket = %record.ticket_id, "ticket workflow satisfied");
        return Ok(());
    }
    Err(TicketError {
        branch: git.branch.clone(),
        violations,
    })
}

/// Exists and holds more than whitespace.
fn has_content(path: &Path) -> bool {
    fs::read_to_string(path)
        .map(|text| !text.trim().is_empty())
        .unwrap_or(false)
}

fn has_test_function(path: &Path) -> bool {
    fs::read_to_string(path)
        .map(|text| contains_test_function(&text))
        .unwrap_or(false)
}

pub fn contains_test_function(source: &str) -> bool {
    TEST_FUNCTION_RE.is_match(source)
}
