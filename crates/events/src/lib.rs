//! Runtime events for convoy.
//!
//! The runtime's feed is reduced to three [`DomainEvent`]s:
//!
//! - `ContainerCreated { name }` from `create`
//! - `ContainerStarted { name }` from `start`
//! - `ContainerDied { name, exit_code }` from `die`
//!
//! Everything else is ignored; recognised events without an actor name are
//! dropped. The [`EventWatcher`] pumps a subscription into an [`EventSink`].

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod error;
pub mod event;
pub mod watcher;

pub use error::{EventError, Result};
pub use event::DomainEvent;
pub use watcher::{EventSink, EventWatcher, WatchOutcome};
