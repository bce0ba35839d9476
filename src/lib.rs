//! # convoy
//!
//! Container-lifecycle reconciler. Loads a workload catalog, creates and
//! starts a container for every workload, watches the runtime's event feed
//! and stops everything once nothing is left to advance.
//!
//! This library wires the workspace crates together for the `convoy` binary
//! and re-exports them for convenience.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::fmt::Write as _;
use std::sync::Arc;

use convoy_core::{Catalog, Workload};
use convoy_events::EventWatcher;
use convoy_reconciler::{
    Error, ReconcilerBuilder, ReconcilerConfig, ReconcilerHandle, Registry, RunReport, Result,
    WorkloadLog,
};
use convoy_runtime::RuntimeClient;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use convoy_core;
pub use convoy_events;
pub use convoy_reconciler;
pub use convoy_runtime;

pub mod cli;

/// Reconcile every workload in `catalog` against `runtime` until quiescence.
///
/// The event subscription is opened before the first runtime call so no
/// `die` event for a workload can be missed. Ctrl-C requests draining; a
/// second Ctrl-C aborts. With `follow_logs` set, container output is
/// printed to stderr prefixed with the workload name.
///
/// # Errors
///
/// - [`Error::Registry`] if the catalog cannot be registered
/// - [`Error::EventStream`] if the event feed cannot be opened or breaks
/// - any error [`convoy_reconciler::Reconciler::run`] returns
pub async fn run_catalog(
    catalog: &Catalog,
    runtime: Arc<dyn RuntimeClient>,
    config: ReconcilerConfig,
) -> Result<RunReport> {
    if catalog.is_empty() {
        warn!("Catalog has no workloads");
    }
    let registry = Registry::from_catalog(catalog)?;
    info!(workloads = registry.len(), "Catalog registered");

    let watcher = EventWatcher::subscribe(&*runtime)
        .await
        .map_err(|e| Error::event_stream(e.to_string()))?;

    let follow_logs = config.follow_logs;
    let reconciler = ReconcilerBuilder::new()
        .with_registry(registry)
        .with_runtime(runtime)
        .with_config(config)
        .build()?;

    let log_task: Option<JoinHandle<()>> =
        follow_logs.then(|| tokio::spawn(print_logs(reconciler.subscribe_logs())));
    let handle = reconciler.handle();
    let watch_task = watcher.spawn(handle.clone());
    let interrupt_task = tokio::spawn(forward_interrupts(handle));

    let result = reconciler.run().await;

    watch_task.abort();
    interrupt_task.abort();
    if let Some(task) = log_task {
        // The feed closes once the reconciler is gone.
        if let Err(e) = task.await {
            debug!(error = %e, "Log printer ended abnormally");
        }
    }
    result
}

/// Print followed container output until the feed closes.
async fn print_logs(mut logs: broadcast::Receiver<WorkloadLog>) {
    loop {
        match logs.recv().await {
            Ok(log) => eprintln!("{log}"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Log output fell behind, lines dropped");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Turn every Ctrl-C into a reconciler interrupt.
async fn forward_interrupts(handle: ReconcilerHandle) {
    loop {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C");
            return;
        }
        debug!("Ctrl-C received");
        if !handle.interrupt() {
            return;
        }
    }
}

/// Render workloads as a plain-text table.
pub fn render_table(workloads: &[Workload]) -> String {
    let width = workloads
        .iter()
        .map(|w| w.id().as_str().len())
        .chain(std::iter::once("WORKLOAD".len()))
        .max()
        .unwrap_or_default();

    let mut out = format!(
        "{:<width$}  {:<7}  {:<8}  {:<4}  {:<12}  HISTORY\n",
        "WORKLOAD", "KIND", "STATE", "EXIT", "CONTAINER"
    );
    for workload in workloads {
        let container = workload
            .container()
            .map_or_else(|| "-".to_string(), ToString::to_string);
        let exit = workload
            .exit_code()
            .map_or_else(|| "-".to_string(), |code| code.to_string());
        let history = workload
            .history()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" > ");
        // Writing to a String cannot fail.
        let _ = writeln!(
            out,
            "{:<width$}  {:<7}  {:<8}  {:<4}  {:<12}  {history}",
            workload.id().as_str(),
            workload.kind().to_string(),
            workload.state().to_string(),
            exit,
            container,
        );
    }
    out
}
