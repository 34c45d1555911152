//! CLI tests: spawn the binary and check output and exit codes.

use std::path::Path;
use std::process::{Command, Output};

use build_support::exit_codes;
use build_support::test_support::TestProject;

fn build_support(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_build_support"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("spawn build_support")
}

fn root_args(root: &Path) -> Vec<String> {
    vec![
        "--project-root".to_string(),
        root.display().to_string(),
        "--docker-project-root".to_string(),
        "/usr/dev".to_string(),
    ]
}

fn with_roots<'a>(args: &[&'a str], roots: &'a [String]) -> Vec<&'a str> {
    args.iter()
        .copied()
        .chain(roots.iter().map(String::as_str))
        .collect()
}

fn git(root: &Path, args: &[&str]) -> bool {
    Command::new("git")
        .args(args)
        .current_dir(root)
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[test]
fn unknown_variable_is_a_usage_error() {
    let project = TestProject::new("demo", "0.1.0");
    let roots = root_args(project.root());
    let out = build_support(&with_roots(
        &["report", "--build-variable-to-report", "docker-image"],
        &roots,
    ));

    assert_eq!(out.status.code(), Some(exit_codes::USAGE));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("UnknownVariable: `docker-image`"), "{stderr}");
    assert!(stderr.contains("dev-docker-image"), "{stderr}");
    assert!(out.stdout.is_empty());
}

#[test]
fn report_prints_branch_qualified_tag() {
    let project = TestProject::new("demo", "0.1.0-dev.1");
    let root = project.root();
    let ready = git(root, &["init", "-q"])
        && git(root, &["config", "user.email", "test@example.com"])
        && git(root, &["config", "user.name", "test"])
        && git(root, &["checkout", "-q", "-b", "107-docker-tags"])
        && git(root, &["add", "pyproject.toml"])
        && git(root, &["commit", "-q", "-m", "chore: init"]);
    if !ready {
        eprintln!("git unavailable, skipping");
        return;
    }

    let roots = root_args(root);
    let out = build_support(&with_roots(
        &["report", "--build-variable-to-report", "dev-docker-image"],
        &roots,
    ));
    assert_eq!(out.status.code(), Some(exit_codes::OK), "{out:?}");
    assert_eq!(String::from_utf8_lossy(&out.stdout), "demo:dev-107\n");

    let out = build_support(&with_roots(
        &["report", "--build-variable-to-report", "project-version"],
        &roots,
    ));
    assert_eq!(String::from_utf8_lossy(&out.stdout), "0.1.0-dev.1\n");
}

#[test]
fn report_outside_git_is_an_environment_error() {
    let project = TestProject::new("demo", "0.1.0");
    let roots = root_args(project.root());
    let out = build_support(&with_roots(
        &["report", "--build-variable-to-report", "prod-docker-image"],
        &roots,
    ));
    // A temp dir nested in some outer repository would still resolve.
    if out.status.success() {
        return;
    }
    assert_eq!(out.status.code(), Some(exit_codes::ENVIRONMENT));
    assert!(String::from_utf8_lossy(&out.stderr).contains("git unavailable"));
}

#[test]
fn list_shows_every_standard_task() {
    let out = build_support(&["list"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&out.stdout);
    for task in ["check_process", "setup_build_env", "test_feature", "push_pypi"] {
        assert!(stdout.contains(task), "{task} missing from:\n{stdout}");
    }
    assert!(stdout.contains("setup_dev_env"));
    assert!(stdout.contains("<- setup_build_env"));
}

#[test]
fn unknown_goal_is_a_graph_error() {
    let project = TestProject::new("demo", "0.1.0");
    let roots = root_args(project.root());
    let out = build_support(&with_roots(&["execute", "deploy"], &roots));

    assert_eq!(out.status.code(), Some(exit_codes::GRAPH));
    assert!(String::from_utf8_lossy(&out.stderr).contains("UnknownTask"));
}

#[test]
fn dry_run_prints_the_plan_only() {
    let project = TestProject::new("demo", "0.1.0");
    let roots = root_args(project.root());
    let out = build_support(&with_roots(&["execute", "test_types", "--dry-run"], &roots));

    assert_eq!(out.status.code(), Some(exit_codes::OK), "{out:?}");
    assert_eq!(
        String::from_utf8_lossy(&out.stdout),
        "plan: 1. setup_build_env [host]\nplan: 2. setup_dev_env [build]\nplan: 3. test_types [dev]\n"
    );
    assert!(!project.path("build").exists());
}

#[test]
fn missing_manifest_is_an_environment_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let roots = root_args(temp.path());
    let out = build_support(&with_roots(&["execute", "test", "--dry-run"], &roots));
    assert_eq!(out.status.code(), Some(exit_codes::ENVIRONMENT));
}

#[test]
fn bad_flags_exit_with_usage() {
    let out = build_support(&["execute", "--no-such-flag"]);
    assert_eq!(out.status.code(), Some(exit_codes::USAGE));
}
