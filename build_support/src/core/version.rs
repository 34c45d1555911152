//! Project version parsing and branch-specific release rules.
//!
//! Releases on the primary branch use `MAJOR.MINOR.PATCH`. Every other branch
//! must carry a development attempt: `MAJOR.MINOR.PATCH-dev.ATTEMPT`.

use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::git_info::GitInfo;
use crate::errors::VersionError;

pub const RELEASE_PATTERN: &str = "MAJOR.MINOR.PATCH";
pub const DEV_PATTERN: &str = "MAJOR.MINOR.PATCH-dev.ATTEMPT";

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\.(\d+)\.(\d+)(?:-dev\.(\d+))?$").expect("version regex is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub dev_attempt: Option<u64>,
}

impl Version {
    /// Parse `MAJOR.MINOR.PATCH` or `MAJOR.MINOR.PATCH-dev.N`.
    pub fn parse(raw: &str) -> Option<Self> {
        let caps = VERSION_RE.captures(raw.trim())?;
        let number = |idx: usize| caps.get(idx).and_then(|m| m.as_str().parse::<u64>().ok());
        Some(Self {
            major: number(1)?,
            minor: number(2)?,
            patch: number(3)?,
            dev_attempt: match caps.get(4) {
                Some(m) => Some(m.as_str().parse().ok()?),
                None => None,
            },
        })
    }

    pub fn is_dev(&self) -> bool {
        self.dev_attempt.is_some()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(attempt) = self.dev_attempt {
            write!(f, "-dev.{attempt}")?;
        }
        Ok(())
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (self.dev_attempt, other.dev_attempt) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(&b),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn expected_pattern(git: &GitInfo) -> &'static str {
    if git.is_primary_branch() {
        RELEASE_PATTERN
    } else {
        DEV_PATTERN
    }
}

/// Check a parsed version against the tags and the branch format rule.
///
/// The duplicate-tag check runs first.
pub fn validate(version: &Version, git: &GitInfo) -> Result<(), VersionError> {
    let text = version.to_string();
    if git.has_tag(&text) {
        return Err(VersionError::DuplicateVersionTag { version: text });
    }
    if version.is_dev() == git.is_primary_branch() {
        return Err(VersionError::InvalidVersionFormat {
            version: text,
            branch: git.branch.clone(),
            expected: expected_pattern(git),
        });
    }
    Ok(())
}

/// Validate the version string exactly as declared in the manifest.
///
/// The tag comparison uses the declared text, so `01.2.3` only collides with
/// a tag spelled `01.2.3`.
pub fn validate_declared(raw: &str, git: &GitInfo) -> Result<Version, VersionError> {
    let declared = raw.trim();
    if git.has_tag(declared) {
        return Err(VersionError::DuplicateVersionTag {
            version: declared.to_string(),
        });
    }
    let invalid = || VersionError::InvalidVersionFormat {
        version: declared.to_string(),
        branch: git.branch.clone(),
        expected: expected_pattern(git),
    };
    let version = Version::parse(declared).ok_or_else(invalid)?;
    if version.is_dev() == git.is_primary_branch() {
        return Err(invalid());
    }
    Ok(version)
}
