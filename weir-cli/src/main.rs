//! Weir CLI - run a dataflow specification.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use weir_core::flow::FlowSpec;
use weir_runtime::observability::{TracingConfig, init_tracing};
use weir_runtime::registry::{DEFAULT_PLUGIN_DIR, StageRegistry};
use weir_runtime::runtime::Runtime;
use weir_runtime::stages;

/// Declarative multi-stage dataflow runtime.
#[derive(Parser)]
#[command(name = "weir")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the flow specification file (YAML or JSON by extension)
    flow: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Directory searched for stage plugin libraries
    #[arg(long, default_value = DEFAULT_PLUGIN_DIR)]
    plugin_dir: PathBuf,
}

fn setup_logging(verbosity: u8) -> Result<()> {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // Respect WEIR_LOG / RUST_LOG and the format auto-detection; the
    // verbosity flag only provides the fallback filter.
    let mut config = TracingConfig::from_env();
    if std::env::var("WEIR_LOG").is_err() && std::env::var("RUST_LOG").is_err() {
        config = config.with_filter(filter);
    }

    init_tracing(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    let registry = Arc::new(StageRegistry::with_plugin_dir(&cli.plugin_dir));
    stages::register_builtins(&registry);

    let spec = FlowSpec::from_file(&cli.flow)
        .with_context(|| format!("failed to load flow '{}'", cli.flow.display()))?;

    Runtime::new(registry)
        .run(&spec)
        .with_context(|| format!("flow '{}' failed", spec.name))?;

    Ok(())
}
