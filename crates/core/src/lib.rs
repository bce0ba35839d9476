//! Core types for convoy.
//!
//! - [`Workload`]: a declared unit (service or driver) run as one container,
//!   with its lifecycle [`WorkloadState`] and owned [`ContainerHandle`].
//! - [`Catalog`]: the YAML declaration the workload set is loaded from.
//! - [`Error`]: registry and catalog failures.

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod catalog;
pub mod error;
pub mod workload;

pub use catalog::{Catalog, CatalogEntry};
pub use error::{Error, Result};
pub use workload::{
    CheckSpec, ContainerHandle, Workload, WorkloadId, WorkloadKind, WorkloadSpec, WorkloadState,
};
