//! `build_support` CLI: run goals, report build variables, list tasks.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::info;

use build_support::catalog;
use build_support::core::variables::BuildVariable;
use build_support::errors::BuildError;
use build_support::exit_codes;
use build_support::io::config::BuildConfig;
use build_support::io::dispatch::DockerDispatcher;
use build_support::io::git::{FetchPolicy, GitStateReader};
use build_support::io::process::ProcessOptions;
use build_support::io::signals::{self, CancelToken};
use build_support::logging;
use build_support::pipeline::{Plan, RunOptions, Workspace, run_plan};
use build_support::report::report;

#[derive(Parser)]
#[command(
    name = "build_support",
    version,
    about = "Task orchestration for the containerized build"
)]
struct Cli {
    /// Debug-level tracing on stderr (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one or more goals and their dependencies.
    Execute(ExecuteArgs),
    /// Print one build variable for the Makefile.
    Report(ReportArgs),
    /// List every registered task.
    List,
}

#[derive(Args)]
struct RootArgs {
    /// Project root on the host.
    #[arg(long, visible_alias = "non-docker-project-root")]
    project_root: PathBuf,

    /// Where the project root is mounted inside containers.
    #[arg(long)]
    docker_project_root: PathBuf,
}

#[derive(Args)]
struct ExecuteArgs {
    /// Goals to run, in order.
    #[arg(required = true)]
    goals: Vec<String>,

    #[command(flatten)]
    roots: RootArgs,

    /// Host uid that should own files written by containers.
    #[arg(long)]
    user_id: Option<u32>,

    /// Host gid that should own files written by containers.
    #[arg(long)]
    group_id: Option<u32>,

    /// Accept existing images without checking their stamps.
    #[arg(long)]
    ci_cd_feature_test_mode: bool,

    /// Print the plan without running anything.
    #[arg(long)]
    dry_run: bool,

    /// Use local tags only.
    #[arg(long)]
    no_fetch: bool,
}

#[derive(Args)]
struct ReportArgs {
    #[arg(long)]
    build_variable_to_report: String,

    #[command(flatten)]
    roots: RootArgs,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                exit_codes::USAGE
            } else {
                exit_codes::OK
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };
    logging::init(cli.verbose);

    if let Err(err) = run(cli.command) {
        eprintln!("error: {err:#}");
        std::process::exit(err.exit_code());
    }
}

fn run(command: Command) -> Result<(), BuildError> {
    match command {
        Command::Execute(args) => cmd_execute(args),
        Command::Report(args) => cmd_report(args),
        Command::List => cmd_list(),
    }
}

fn run_options(roots: RootArgs) -> RunOptions {
    RunOptions {
        project_root: roots.project_root,
        docker_project_root: roots.docker_project_root,
        user_id: None,
        group_id: None,
        feature_test_mode: false,
    }
}

fn cmd_execute(args: ExecuteArgs) -> Result<(), BuildError> {
    let options = RunOptions {
        user_id: args.user_id,
        group_id: args.group_id,
        feature_test_mode: args.ci_cd_feature_test_mode,
        ..run_options(args.roots)
    };
    let workspace = Workspace::load(options)?;
    let plan = Plan::new(&workspace.config, args.goals.as_slice())?;
    for line in plan.render() {
        println!("{line}");
    }
    if args.dry_run {
        return Ok(());
    }

    let cancel = CancelToken::new();
    signals::install(cancel.clone()).map_err(BuildError::Setup)?;

    let policy = if args.no_fetch || !workspace.config.fetch_tags {
        FetchPolicy::LocalOnly
    } else {
        FetchPolicy::Fetch
    };
    let state = GitStateReader::new(workspace.root()).read(policy)?;
    if let Some(err) = &state.fetch_failure {
        eprintln!("warning: {err}; using local tags");
    }
    info!(branch = %state.info.branch, tags = state.info.tags.len(), "git state captured");

    let config = &workspace.config;
    let dispatcher = DockerDispatcher::new(
        workspace.root(),
        ProcessOptions {
            timeout: config.task_timeout(),
            tail_bytes: config.output_tail_bytes,
            stop_grace: Duration::from_secs(config.stop_grace_secs),
            echo: true,
        },
        cancel.clone(),
    );

    match run_plan(&workspace, &plan, &state.info, &dispatcher, &cancel) {
        Ok(report) => {
            println!("summary: {}", report.summary());
            Ok(())
        }
        Err(BuildError::TaskFailed(failure)) => {
            for record in &failure.report.records {
                eprintln!("  {} [{}]: {}", record.task, record.environment, record.status);
            }
            println!("summary: {}", failure.report.summary());
            Err(BuildError::TaskFailed(failure))
        }
        Err(err) => Err(err),
    }
}

fn cmd_report(args: ReportArgs) -> Result<(), BuildError> {
    let variable: BuildVariable = args.build_variable_to_report.parse()?;
    let workspace = Workspace::load(run_options(args.roots))?;
    let state = GitStateReader::new(workspace.root()).read(FetchPolicy::LocalOnly)?;
    let value = report(variable, &state.info, &workspace)?;
    println!("{value}");
    Ok(())
}

fn cmd_list() -> Result<(), BuildError> {
    let graph = catalog::standard_graph(&BuildConfig::default())?;
    for task in graph.tasks() {
        let deps = if task.dependencies.is_empty() {
            String::new()
        } else {
            format!(" <- {}", task.dependencies.join(", "))
        };
        println!("{:<24} [{}] {}{deps}", task.name, task.environment, task.description);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_execute_with_several_goals() {
        let cli = Cli::parse_from([
            "build_support",
            "execute",
            "test",
            "build",
            "--project-root",
            ".",
            "--docker-project-root",
            "/usr/dev",
            "--user-id",
            "1000",
            "--group-id",
            "1000",
        ]);
        let Command::Execute(args) = cli.command else {
            panic!("expected execute");
        };
        assert_eq!(args.goals, vec!["test", "build"]);
        assert_eq!(args.user_id, Some(1000));
        assert!(!args.dry_run);
        assert!(!args.ci_cd_feature_test_mode);
    }

    #[test]
    fn parse_legacy_root_alias() {
        let cli = Cli::parse_from([
            "build_support",
            "report",
            "--build-variable-to-report",
            "dev-docker-image",
            "--non-docker-project-root",
            "/home/me/demo",
            "--docker-project-root",
            "/usr/dev",
        ]);
        let Command::Report(args) = cli.command else {
            panic!("expected report");
        };
        assert_eq!(args.roots.project_root, PathBuf::from("/home/me/demo"));
    }

    #[test]
    fn execute_requires_a_goal() {
        let err = Cli::try_parse_from([
            "build_support",
            "execute",
            "--project-root",
            ".",
            "--docker-project-root",
            "/usr/dev",
        ])
        .err()
        .expect("missing goal");
        assert!(err.use_stderr());
    }

    #[test]
    fn verbose_is_global() {
        let cli = Cli::parse_from(["build_support", "list", "--verbose"]);
        assert!(cli.verbose);
    }
}
