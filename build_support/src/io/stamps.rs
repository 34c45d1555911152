//! Content stamps that let image builds and passing checks be skipped on
//! re-runs.
//!
//! An image stamp is the SHA-256 of everything that shapes an image: the
//! Dockerfile, the manifest, the lock file, the stage name and the build args.
//! A build task is satisfied when its stamp matches and the image still exists.
//!
//! A pass stamp is written when a check succeeds. It hashes the check's input
//! files, its commands and the image it ran in, so editing a source or test
//! file (or rebuilding the image) makes the check run again.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::io::snapshot::write_atomic;

/// Inputs hashed into an image stamp.
#[derive(Debug, Clone)]
pub struct ImageInputs<'a> {
    pub dockerfile: &'a Path,
    pub manifest: &'a Path,
    pub lock_file: Option<&'a Path>,
    pub target: &'a str,
    pub build_args: &'a BTreeMap<String, String>,
}

/// Hex SHA-256 over the image inputs.
pub fn fingerprint(inputs: &ImageInputs<'_>) -> Result<String> {
    let mut hasher = Sha256::new();
    hash_file(&mut hasher, "dockerfile", inputs.dockerfile)?;
    hash_file(&mut hasher, "manifest", inputs.manifest)?;
    if let Some(lock) = inputs.lock_file {
        hash_file(&mut hasher, "lock", lock)?;
    }
    hasher.update(b"target\0");
    hasher.update(inputs.target.as_bytes());
    for (key, value) in inputs.build_args {
        hasher.update(b"\0arg\0");
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
    }
    Ok(hex::encode(hasher.finalize()))
}

fn hash_file(hasher: &mut Sha256, label: &str, path: &Path) -> Result<()> {
    let bytes = fs::read(path).with_context(|| format!("read {} {}", label, path.display()))?;
    hasher.update(label.as_bytes());
    hasher.update(b"\0");
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(&bytes);
    Ok(())
}

/// Directories never hashed as task inputs.
const SKIPPED_DIRS: [&str; 5] = [
    "__pycache__",
    ".mypy_cache",
    ".pytest_cache",
    ".ruff_cache",
    ".git",
];

/// Inputs hashed into a pass stamp.
#[derive(Debug, Clone)]
pub struct TaskInputs<'a> {
    pub root: &'a Path,
    /// Files or directories relative to `root`. Missing ones hash as absent.
    pub paths: &'a [String],
    pub commands: &'a [Vec<String>],
    pub image_tag: Option<&'a str>,
    /// Current stamp of `image_tag`, if any.
    pub image_stamp: Option<&'a str>,
}

/// Hex SHA-256 over a task's inputs.
pub fn task_fingerprint(inputs: &TaskInputs<'_>) -> Result<String> {
    let mut hasher = Sha256::new();
    for command in inputs.commands {
        hasher.update(b"command\0");
        hasher.update(command.join("\0").as_bytes());
        hasher.update(b"\0");
    }
    hasher.update(b"image\0");
    hasher.update(inputs.image_tag.unwrap_or("-").as_bytes());
    hasher.update(b"\0");
    hasher.update(inputs.image_stamp.unwrap_or("-").as_bytes());
    for rel in inputs.paths {
        let path = inputs.root.join(rel);
        if !path.exists() {
            hasher.update(b"\0absent\0");
            hasher.update(rel.as_bytes());
            continue;
        }
        let walker = WalkDir::new(&path)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !is_skipped(entry));
        for entry in walker {
            let entry = entry.with_context(|| format!("walk {}", path.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(inputs.root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            hash_file(&mut hasher, &rel, entry.path())?;
        }
    }
    Ok(hex::encode(hasher.finalize()))
}

fn is_skipped(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED_DIRS.contains(&name))
}

/// Pass stamp file for a task under `stamps_dir`.
pub fn task_stamp_path(stamps_dir: &Path, task: &str) -> PathBuf {
    stamps_dir.join("tasks").join(format!("{task}.sha256"))
}

/// Stamp file for an image tag under `stamps_dir`.
pub fn stamp_path(stamps_dir: &Path, image_tag: &str) -> PathBuf {
    let file: String = image_tag
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    stamps_dir.join(format!("{file}.sha256"))
}

pub fn read_stamp(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents.trim().to_string())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read stamp {}", path.display())),
    }
}

pub fn write_stamp(path: &Path, digest: &str) -> Result<()> {
    debug!(path = %path.display(), "writing stamp");
    write_atomic(path, &format!("{digest}\n"))
}

pub fn stamp_matches(path: &Path, digest: &str) -> Result<bool> {
    Ok(read_stamp(path)?.as_deref() == Some(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        _temp: tempfile::TempDir,
        dockerfile: PathBuf,
        manifest: PathBuf,
    }

    fn fixture() -> Fixture {
        let temp = tempfile::tempdir().expect("tempdir");
        let dockerfile = temp.path().join("Dockerfile");
        let manifest = temp.path().join("pyproject.toml");
        fs::write(&dockerfile, "FROM python:3.12 AS dev\n").expect("write");
        fs::write(&manifest, "[project]\nname = \"demo\"\nversion = \"0.1.0\"\n").expect("write");
        Fixture {
            _temp: temp,
            dockerfile,
            manifest,
        }
    }

    fn digest(fx: &Fixture, target: &str) -> String {
        fingerprint(&ImageInputs {
            dockerfile: &fx.dockerfile,
            manifest: &fx.manifest,
            lock_file: None,
            target,
            build_args: &BTreeMap::new(),
        })
        .expect("fingerprint")
    }

    #[test]
    fn fingerprint_is_stable_and_target_specific() {
        let fx = fixture();
        assert_eq!(digest(&fx, "dev"), digest(&fx, "dev"));
        assert_ne!(digest(&fx, "dev"), digest(&fx, "prod"));
        assert_eq!(digest(&fx, "dev").len(), 64);
    }

    #[test]
    fn fingerprint_changes_with_dockerfile() {
        let fx = fixture();
        let before = digest(&fx, "dev");
        fs::write(&fx.dockerfile, "FROM python:3.13 AS dev\n").expect("write");
        assert_ne!(before, digest(&fx, "dev"));
    }

    fn task_digest(root: &Path, image_stamp: Option<&str>) -> String {
        task_fingerprint(&TaskInputs {
            root,
            paths: &["pkg".to_string(), "missing".to_string()],
            commands: &[vec!["pytest".to_string(), "pkg/test".to_string()]],
            image_tag: Some("demo:dev-7"),
            image_stamp,
        })
        .expect("fingerprint")
    }

    #[test]
    fn task_fingerprint_tracks_sources_but_not_caches() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::create_dir_all(root.join("pkg/test/__pycache__")).expect("mkdir");
        fs::write(root.join("pkg/mod.py"), "x = 1\n").expect("write");
        fs::write(root.join("pkg/test/test_mod.py"), "def test_x(): pass\n").expect("write");
        let before = task_digest(root, Some("abc"));

        fs::write(root.join("pkg/test/__pycache__/test_mod.pyc"), "junk").expect("write");
        assert_eq!(before, task_digest(root, Some("abc")));
        assert_ne!(before, task_digest(root, Some("def")), "image rebuilt");

        fs::write(root.join("pkg/test/conftest.py"), "").expect("write");
        assert_ne!(before, task_digest(root, Some("abc")), "new conftest");
    }

    #[test]
    fn task_stamps_live_under_tasks() {
        let path = task_stamp_path(Path::new("build/stamps"), "test_pypi");
        assert_eq!(path, Path::new("build/stamps/tasks/test_pypi.sha256"));
    }

    #[test]
    fn stamp_round_trip_and_mismatch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = stamp_path(&temp.path().join("stamps"), "demo:dev-55");
        assert!(path.ends_with("demo_dev-55.sha256"));
        assert!(!stamp_matches(&path, "abc").expect("missing is fine"));
        write_stamp(&path, "abc").expect("write");
        assert!(stamp_matches(&path, "abc").expect("read"));
        assert!(!stamp_matches(&path, "def").expect("read"));
    }
}
