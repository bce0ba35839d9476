//! Container lifecycle reconciler for convoy.
//!
//! Every declared workload walks one state machine:
//!
//! ```text
//! New -> Creating -> Created -> Starting -> Started -> Running -> Stopping -> Stopped
//! ```
//!
//! with `Failed` as a second terminal state when a runtime call fails.
//!
//! # Key Concepts
//!
//! ## Ticks
//!
//! A tick plans one step for every workload from its current state:
//! `New` creates, `Created` starts, `Started` confirms. When nothing can
//! advance and no runtime call is outstanding, every `Running` workload is
//! stopped (the shutdown path). Once all are `Stopped` or `Failed`, the run
//! is quiescent and ends.
//!
//! ## Events
//!
//! `ContainerDied` forces a live workload to `Stopped`; `Stopped` and
//! `Failed` workloads keep their state. A runtime completion that arrives
//! afterwards no longer matches the state it expects and is discarded. A
//! non-zero exit code of a container that died on its own is recorded and
//! fails the run.
//!
//! ## Cleanup
//!
//! When the run ends, every container it created is removed, unless
//! `keep_containers` is set. Containers created after their workload had
//! already stopped are never attached and are always removed.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use convoy_core::Catalog;
//! use convoy_reconciler::{Reconciler, ReconcilerConfig, Registry};
//! use convoy_runtime::InMemoryRuntime;
//!
//! let registry = Registry::from_catalog(&Catalog::load("convoy.yml")?)?;
//! let reconciler = Reconciler::new(
//!     registry,
//!     InMemoryRuntime::new_arc(),
//!     ReconcilerConfig::default(),
//! );
//! let report = reconciler.run().await?;
//! ```

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod error;
pub mod plan;
pub mod reconciler;
pub mod registry;
pub mod types;

// Re-export main types
pub use error::{Error, Result};
pub use plan::{TickPlan, next_action, plan};
pub use reconciler::{Reconciler, ReconcilerBuilder, ReconcilerConfig, ReconcilerHandle};
pub use registry::Registry;
pub use types::{
    Completion, ReconcileAction, ReconcilerMessage, RunReport, Termination, Transition,
    WorkloadLog,
};
