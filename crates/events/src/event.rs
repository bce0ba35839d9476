//! Domain events derived from the runtime's raw event feed.

use convoy_runtime::RawEvent;
use serde::{Deserialize, Serialize};

use crate::error::{EventError, Result};

const STATUS_CREATE: &str = "create";
const STATUS_START: &str = "start";
const STATUS_DIE: &str = "die";

/// Container lifecycle event about a named container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    ContainerCreated {
        name: String,
    },
    ContainerStarted {
        name: String,
    },
    ContainerDied {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i64>,
    },
}

impl DomainEvent {
    /// Create a container created event.
    pub fn created(name: impl Into<String>) -> Self {
        Self::ContainerCreated { name: name.into() }
    }

    /// Create a container started event.
    pub fn started(name: impl Into<String>) -> Self {
        Self::ContainerStarted { name: name.into() }
    }

    /// Create a container died event without an exit code.
    pub fn died(name: impl Into<String>) -> Self {
        Self::ContainerDied {
            name: name.into(),
            exit_code: None,
        }
    }

    /// Create a container died event carrying the exit code.
    pub fn exited(name: impl Into<String>, code: i64) -> Self {
        Self::ContainerDied {
            name: name.into(),
            exit_code: Some(code),
        }
    }

    /// Name of the container the event is about.
    pub fn name(&self) -> &str {
        match self {
            Self::ContainerCreated { name }
            | Self::ContainerStarted { name }
            | Self::ContainerDied { name, .. } => name,
        }
    }

    /// Get the event type as a string.
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::ContainerCreated { .. } => "container_created",
            Self::ContainerStarted { .. } => "container_started",
            Self::ContainerDied { .. } => "container_died",
        }
    }

    /// Translate a raw runtime event.
    ///
    /// Returns `Ok(None)` for statuses outside `create`, `start` and `die`.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Malformed`] when a recognised status carries no
    /// actor name.
    pub fn translate(raw: &RawEvent) -> Result<Option<Self>> {
        if !matches!(
            raw.status.as_str(),
            STATUS_CREATE | STATUS_START | STATUS_DIE
        ) {
            return Ok(None);
        }

        let name = match raw.actor_name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => return Err(EventError::malformed(&raw.status, "missing actor name")),
        };

        Ok(Some(match raw.status.as_str() {
            STATUS_CREATE => Self::ContainerCreated { name },
            STATUS_START => Self::ContainerStarted { name },
            _ => Self::ContainerDied {
                name,
                exit_code: raw.exit_code,
            },
        }))
    }
}

impl std::fmt::Display for DomainEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.event_type(), self.name())
    }
}
