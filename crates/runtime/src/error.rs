//! Error types for container runtime calls.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Failure of a call across the runtime boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("failed to connect to container runtime: {reason}")]
    Connect { reason: String },

    #[error("failed to create container '{name}': {reason}")]
    Create { name: String, reason: String },

    #[error("failed to start container '{container}': {reason}")]
    Start { container: String, reason: String },

    #[error("failed to kill container '{container}': {reason}")]
    Stop { container: String, reason: String },

    #[error("failed to pull image '{image}': {reason}")]
    Pull { image: String, reason: String },

    #[error("failed to remove container '{container}': {reason}")]
    Remove { container: String, reason: String },

    #[error("failed to read logs of container '{container}': {reason}")]
    Logs { container: String, reason: String },

    #[error("event stream error: {reason}")]
    Events { reason: String },
}

impl RuntimeError {
    /// Create a connect error.
    pub fn connect(reason: impl Into<String>) -> Self {
        Self::Connect {
            reason: reason.into(),
        }
    }

    /// Create a create error.
    pub fn create(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Create {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a start error.
    pub fn start(container: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Start {
            container: container.into(),
            reason: reason.into(),
        }
    }

    /// Create a stop error.
    pub fn stop(container: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Stop {
            container: container.into(),
            reason: reason.into(),
        }
    }

    /// Create a pull error.
    pub fn pull(image: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Pull {
            image: image.into(),
            reason: reason.into(),
        }
    }

    /// Create a remove error.
    pub fn remove(container: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Remove {
            container: container.into(),
            reason: reason.into(),
        }
    }

    /// Create a logs error.
    pub fn logs(container: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Logs {
            container: container.into(),
            reason: reason.into(),
        }
    }

    /// Create an event stream error.
    pub fn events(reason: impl Into<String>) -> Self {
        Self::Events {
            reason: reason.into(),
        }
    }
}
