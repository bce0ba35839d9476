//! Error types for the events crate.

use thiserror::Error;

/// Result type alias for event operations.
pub type Result<T> = std::result::Result<T, EventError>;

/// Event translation error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventError {
    /// A recognised event arrived without the attributes needed to act on it.
    #[error("malformed '{status}' event: {reason}")]
    Malformed { status: String, reason: String },
}

impl EventError {
    /// Create a malformed event error.
    pub fn malformed(status: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            status: status.into(),
            reason: reason.into(),
        }
    }
}
