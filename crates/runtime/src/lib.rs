//! Container runtime boundary.
//!
//! The reconciler only ever talks to a [`RuntimeClient`]. Two implementations
//! ship with the crate:
//!
//! - [`DockerRuntime`]: the Docker Engine API through `bollard`.
//! - [`InMemoryRuntime`]: containers as map entries, used for dry runs and
//!   tests. Supports fault injection and call gating.

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod client;
pub mod docker;
pub mod error;
pub mod memory;

pub use client::{
    ContainerSpec, EventStream, LogLine, LogSource, LogStream, RawEvent, RuntimeClient,
};
pub use docker::DockerRuntime;
pub use error::{Result, RuntimeError};
pub use memory::{CallKind, Gate, InMemoryRuntime, RuntimeCall};
