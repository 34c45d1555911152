//! Diagnostic tracing for the orchestrator.
//!
//! Tracing output goes to stderr so stdout stays reserved for product output:
//! the plan and summary of `execute`, and the single line printed by `report`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn`, or `build_support=debug` when
/// `verbose` is set.
///
/// # Example
/// ```bash
/// RUST_LOG=build_support=debug build_support execute test --project-root . --docker-project-root /src
/// ```
pub fn init(verbose: bool) {
    let fallback = if verbose { "build_support=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
