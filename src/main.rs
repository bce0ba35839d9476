//! # convoy
//!
//! Entry point for the convoy reconciler.
//!
//! ## Exit codes
//!
//! - `0`: every workload stopped cleanly, or the runtime closed its event feed
//! - `1`: a workload failed or exited with a non-zero code, the event feed
//!   broke, the catalog was invalid, or the run was aborted (fail-fast or a
//!   second Ctrl-C)

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use convoy::cli::{Cli, Commands};
use convoy::convoy_core::Catalog;
use convoy::convoy_reconciler::{ReconcilerConfig, Registry, RunReport};
use convoy::convoy_runtime::{DockerRuntime, InMemoryRuntime, RuntimeClient};
use convoy::{render_table, run_catalog};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            catalog,
            dry_run,
            fail_fast,
            json,
            keep_containers,
            no_logs,
        } => {
            let config = ReconcilerConfig {
                fail_fast,
                keep_containers,
                follow_logs: !no_logs,
            };
            run(&catalog, dry_run, config, json).await
        }
        Commands::Validate { catalog } => validate(&catalog),
    }
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(
    path: &Path,
    dry_run: bool,
    config: ReconcilerConfig,
    json: bool,
) -> Result<ExitCode> {
    let catalog = load_catalog(path)?;

    let runtime: Arc<dyn RuntimeClient> = if dry_run {
        info!("Dry run: using the in-memory runtime");
        InMemoryRuntime::new_arc()
    } else {
        Arc::new(DockerRuntime::connect().context("Failed to connect to Docker")?)
    };

    let report = run_catalog(&catalog, runtime, config)
        .await
        .context("Reconciliation failed")?;

    print_report(&report, json)?;
    Ok(ExitCode::from(report.exit_code()))
}

fn validate(path: &Path) -> Result<ExitCode> {
    let catalog = load_catalog(path)?;
    let registry = Registry::from_catalog(&catalog)
        .with_context(|| format!("Catalog {} cannot be registered", path.display()))?;

    print!("{}", render_table(registry.list()));
    info!(workloads = registry.len(), "Catalog is valid");
    Ok(ExitCode::SUCCESS)
}

fn load_catalog(path: &Path) -> Result<Catalog> {
    Catalog::load(path).with_context(|| format!("Failed to load catalog {}", path.display()))
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        let text = serde_json::to_string_pretty(report).context("Failed to encode report")?;
        println!("{text}");
    } else {
        print!("{}", render_table(&report.workloads));
        info!(
            termination = %report.termination,
            failed = report.failed().count(),
            "Run finished"
        );
    }
    Ok(())
}
