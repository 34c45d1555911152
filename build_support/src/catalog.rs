//! The standard task catalog: every goal the Makefile can request.
//!
//! Registration order matters: it breaks ties during resolution. The gates
//! (`check_process`, `check_version`) are registered first, and every gated
//! task that needs an image depends on its gate directly, so a goal that fails
//! a gate does so before an image is built or a container started.
//!
//! The build image is produced by a host task with no dependencies, which
//! keeps the graph rooted outside every container.

use crate::core::environment::Environment;
use crate::core::graph::TaskGraph;
use crate::core::task::{Action, Builtin, Task};
use crate::errors::GraphError;
use crate::io::config::BuildConfig;
use crate::io::manifest::MANIFEST_FILE;

/// Build and validate the standard graph.
pub fn standard_graph(config: &BuildConfig) -> Result<TaskGraph, GraphError> {
    let mut graph = TaskGraph::new();
    for task in standard_tasks(config) {
        graph.register(task)?;
    }
    graph.validate()?;
    Ok(graph)
}

pub fn standard_tasks(config: &BuildConfig) -> Vec<Task> {
    let feature_dirs: Vec<String> = config
        .feature_test_dirs
        .iter()
        .map(|dir| dir.display().to_string())
        .collect();
    let mut feature_cmd = vec!["pytest"];
    feature_cmd.extend(feature_dirs.iter().map(String::as_str));

    vec![
        // Gates and housekeeping.
        Task::new("check_process", Environment::Host)
            .describe("Require the ticket document and feature test for this branch")
            .action(Action::Builtin(Builtin::CheckTickets)),
        Task::new("check_version", Environment::Host)
            .describe("Require an untagged version that fits the branch")
            .action(Action::Builtin(Builtin::CheckVersion)),
        Task::new("clean", Environment::Host)
            .describe("Remove build output and tool caches")
            .action(Action::Builtin(Builtin::Clean)),
        // Images.
        Task::new("setup_build_env", Environment::Host)
            .describe("Build the build image")
            .builds_image(Environment::Build),
        Task::new("setup_dev_env", Environment::Build)
            .describe("Build the dev image")
            .depends_on(["setup_build_env"])
            .builds_image(Environment::Dev)
            .with_docker_socket(),
        Task::new("setup_prod_env", Environment::Build)
            .describe("Build the prod image")
            .depends_on(["setup_build_env"])
            .builds_image(Environment::Prod)
            .with_docker_socket(),
        Task::new("setup_pulumi_env", Environment::Build)
            .describe("Build the pulumi image")
            .depends_on(["setup_build_env"])
            .builds_image(Environment::Pulumi)
            .with_docker_socket(),
        // Checks.
        Task::new("test_style", Environment::Dev)
            .describe("Check formatting and lint rules")
            .depends_on(["setup_dev_env"])
            .run(&["ruff", "format", "--check", "."])
            .run(&["ruff", "check", "."]),
        Task::new("test_types", Environment::Dev)
            .describe("Type-check all python sources")
            .depends_on(["setup_dev_env"])
            .run(&["mypy", "--explicit-package-bases", "."]),
        Task::new("test_security", Environment::Dev)
            .describe("Scan sources for security issues")
            .depends_on(["setup_dev_env"])
            .run(&["bandit", "-r", "-c", "pyproject.toml", "-q", "."]),
        Task::new("test_build_support", Environment::Dev)
            .describe("Run build_support unit tests")
            .depends_on(["setup_dev_env"])
            .run(&["pytest", "build_support/test", "--ignore=build_support/test/feature_tests"])
            .cached_on(["build_support", MANIFEST_FILE]),
        Task::new("test_pypi", Environment::Dev)
            .describe("Run package unit tests")
            .depends_on(["setup_dev_env"])
            .run(&["pytest", "pypi_package/test", "--ignore=pypi_package/test/feature_tests"])
            .cached_on(["pypi_package", MANIFEST_FILE]),
        Task::new("test_feature", Environment::Dev)
            .describe("Run feature tests (they drive docker and git themselves)")
            .depends_on(["setup_dev_env"])
            .run(&feature_cmd)
            .cached_on(["build_support", "pypi_package", MANIFEST_FILE])
            .with_docker_socket()
            .with_git_credentials(),
        Task::group(
            "test",
            [
                "check_process",
                "test_style",
                "test_types",
                "test_security",
                "test_build_support",
                "test_pypi",
                "test_feature",
            ],
        )
        .describe("Run every check"),
        // Fixers.
        Task::new("lint", Environment::Dev)
            .describe("Format sources in place")
            .depends_on(["setup_dev_env"])
            .run(&["ruff", "format", "."]),
        Task::new("ruff_fix_safe", Environment::Dev)
            .describe("Apply safe lint fixes")
            .depends_on(["lint"])
            .run(&["ruff", "check", "--fix", "."]),
        Task::new("apply_unsafe_ruff_fixes", Environment::Dev)
            .describe("Apply unsafe lint fixes")
            .depends_on(["ruff_fix_safe"])
            .run(&["ruff", "check", "--fix", "--unsafe-fixes", "."]),
        // The release tag is registered ahead of every artifact so it is
        // pushed before anything is built for publishing.
        Task::new("push_tags", Environment::Host)
            .describe("Tag the manifest version and push the tag")
            .depends_on(["check_version", "test"])
            .action(Action::Builtin(Builtin::PushTags))
            .with_git_credentials(),
        // Artifacts.
        Task::new("build_docs", Environment::Dev)
            .describe("Build the sphinx documentation")
            .depends_on(["check_process", "setup_dev_env"])
            .run(&["sphinx-build", "-W", "docs", "build/docs"]),
        Task::new("build_pypi", Environment::Prod)
            .describe("Build the package distribution")
            .depends_on(["check_process", "test", "setup_prod_env"])
            .run(&["uv", "build", "pypi_package", "--out-dir", "build/dist"]),
        Task::group("build", ["build_docs", "build_pypi"]).describe("Build docs and package"),
        // Release.
        Task::new("push_pypi", Environment::Prod)
            .describe("Publish the package distribution")
            .depends_on(["check_version", "push_tags", "build_pypi"])
            .run(&["uv", "publish", "build/dist/*"])
            .with_git_credentials(),
        Task::group("push", ["push_tags", "push_pypi"]).describe("Tag and publish the release"),
    ]
}
