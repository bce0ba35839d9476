//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// convoy - container lifecycle reconciler
#[derive(Parser, Debug)]
#[command(name = "convoy")]
#[command(version)]
#[command(about = "Create, start and stop a catalog of containers until nothing is left to do")]
#[command(
    long_about = "convoy registers every service and driver in a catalog, drives each through \
                  create, start and confirm, then stops them all once none can advance. \
                  Container deaths reported by the runtime stop the matching workload. \
                  Containers are removed when the run ends."
)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile a catalog until quiescence
    Run {
        /// Catalog file (YAML)
        catalog: PathBuf,

        /// Use the in-memory runtime instead of Docker
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Abort on the first failed runtime call
        #[arg(long, default_value_t = false)]
        fail_fast: bool,

        /// Print the final report as JSON
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Leave containers in place after the run
        #[arg(long, default_value_t = false)]
        keep_containers: bool,

        /// Do not print container output
        #[arg(long, default_value_t = false)]
        no_logs: bool,
    },

    /// Load and register a catalog without running it
    Validate {
        /// Catalog file (YAML)
        catalog: PathBuf,
    },
}
