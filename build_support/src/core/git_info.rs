//! Git context captured once per invocation.

use serde::{Deserialize, Serialize};

/// Branch that releases are cut from.
pub const PRIMARY_BRANCH: &str = "main";

/// Long-lived branches that carry no ticket and skip ticket checks.
pub const EXEMPT_BRANCHES: [&str; 3] = ["main", "master", "develop"];

/// Snapshot of the repository state the run is based on.
///
/// Serialized as `{"branch": .., "tags": [..]}`; the ticket id is always
/// derived from the branch, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitInfo {
    pub branch: String,
    pub tags: Vec<String>,
}

impl GitInfo {
    pub fn new(branch: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            branch: branch.into(),
            tags,
        }
    }

    pub fn is_primary_branch(&self) -> bool {
        self.branch == PRIMARY_BRANCH
    }

    pub fn is_exempt_branch(&self) -> bool {
        EXEMPT_BRANCHES.contains(&self.branch.as_str())
    }

    /// Ticket id for the branch, or `None` on main/master/develop.
    pub fn ticket_id(&self) -> Option<&str> {
        if self.is_exempt_branch() {
            return None;
        }
        Some(ticket_id_for_branch(&self.branch))
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// First hyphen-delimited segment of `branch`, or the whole name.
pub fn ticket_id_for_branch(branch: &str) -> &str {
    match branch.split_once('-') {
        Some((head, _)) if !head.is_empty() => head,
        _ => branch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_id_is_first_hyphen_segment() {
        let git = GitInfo::new("100-add-uv", vec![]);
        assert_eq!(git.ticket_id(), Some("100"));
    }

    #[test]
    fn ticket_id_is_whole_branch_without_hyphen() {
        let git = GitInfo::new("TEST001", vec![]);
        assert_eq!(git.ticket_id(), Some("TEST001"));
    }

    #[test]
    fn long_lived_branches_have_no_ticket() {
        for branch in ["main", "master", "develop"] {
            let git = GitInfo::new(branch, vec![]);
            assert_eq!(git.ticket_id(), None, "{branch}");
            assert!(git.is_exempt_branch());
        }
        assert!(GitInfo::new("main", vec![]).is_primary_branch());
        assert!(!GitInfo::new("master", vec![]).is_primary_branch());
    }

    #[test]
    fn leading_hyphen_keeps_whole_branch() {
        assert_eq!(ticket_id_for_branch("-oops"), "-oops");
    }

    #[test]
    fn serializes_branch_and_tags_only() {
        let git = GitInfo::new("55-fix-bug", vec!["0.1.0".into()]);
        let json = serde_json::to_string(&git).expect("serialize");
        assert_eq!(json, r#"{"branch":"55-fix-bug","tags":["0.1.0"]}"#);
    }
}
