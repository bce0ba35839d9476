//! Error types for the reconciler crate.

use convoy_runtime::RuntimeError;
use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Error)]
pub enum Error {
    /// Registry or catalog failure.
    #[error(transparent)]
    Registry(#[from] convoy_core::Error),

    /// A runtime call failed and the run was configured to abort.
    #[error("runtime call for '{workload}' failed: {source}")]
    Runtime {
        workload: String,
        #[source]
        source: RuntimeError,
    },

    /// The runtime event stream could not be opened or broke.
    #[error("runtime event stream failed: {reason}")]
    EventStream { reason: String },

    /// A workload that should own a container has none.
    #[error("workload '{workload}' has no container")]
    MissingContainer { workload: String },

    /// Interrupted a second time while draining.
    #[error("interrupted while draining")]
    Interrupted,

    /// Every sender to the reconciler's mailbox is gone.
    #[error("reconciler mailbox closed")]
    MailboxClosed,

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Create a runtime error for a workload.
    pub fn runtime(workload: impl Into<String>, source: RuntimeError) -> Self {
        Self::Runtime {
            workload: workload.into(),
            source,
        }
    }

    /// Create an event stream error.
    pub fn event_stream(reason: impl Into<String>) -> Self {
        Self::EventStream {
            reason: reason.into(),
        }
    }

    /// Create a missing container error.
    pub fn missing_container(workload: impl Into<String>) -> Self {
        Self::MissingContainer {
            workload: workload.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}
