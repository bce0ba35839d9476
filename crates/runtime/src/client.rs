//! The runtime capability consumed by the reconciler and the event watcher.

use async_trait::async_trait;
use convoy_core::{ContainerHandle, Workload};
use futures::stream::BoxStream;

use crate::error::{Result, RuntimeError};

/// What to create: image, container name and command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub name: String,
    pub command: Vec<String>,
}

impl ContainerSpec {
    /// Build the create request for a workload. The container is named after
    /// the workload id.
    pub fn for_workload(workload: &Workload) -> Self {
        Self {
            image: workload.image().to_string(),
            name: workload.id().to_string(),
            command: workload.command().to_vec(),
        }
    }
}

/// A runtime event before translation: its status, the actor's name and,
/// for `die`, the container's exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub status: String,
    pub actor_name: Option<String>,
    pub exit_code: Option<i64>,
}

impl RawEvent {
    /// Create an event about a named container.
    pub fn new(status: impl Into<String>, actor_name: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            actor_name: Some(actor_name.into()),
            exit_code: None,
        }
    }

    /// Create an event without actor attributes.
    pub fn anonymous(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            actor_name: None,
            exit_code: None,
        }
    }

    /// Attach the container's exit code.
    #[must_use]
    pub const fn with_exit_code(mut self, code: i64) -> Self {
        self.exit_code = Some(code);
        self
    }
}

/// Live feed of runtime events. Ends when the runtime closes the feed.
pub type EventStream = BoxStream<'static, std::result::Result<RawEvent, RuntimeError>>;

/// Output stream a log line was written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogSource {
    Stdout,
    Stderr,
}

impl std::fmt::Display for LogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// One line of container output, without its trailing newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub source: LogSource,
    pub text: String,
}

impl LogLine {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            source: LogSource::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            source: LogSource::Stderr,
            text: text.into(),
        }
    }
}

/// Followed container output. Ends when the container goes away.
pub type LogStream = BoxStream<'static, std::result::Result<LogLine, RuntimeError>>;

/// Container runtime capability.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Create a container, returning the handle that owns it. The image is
    /// pulled first if the runtime does not have it.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle>;

    /// Start a created container.
    async fn start_container(&self, handle: &ContainerHandle) -> Result<()>;

    /// Kill a running container.
    async fn kill_container(&self, handle: &ContainerHandle) -> Result<()>;

    /// Remove a container, killing it first if it still runs.
    async fn remove_container(&self, handle: &ContainerHandle) -> Result<()>;

    /// Follow a container's stdout and stderr from its start.
    async fn container_logs(&self, handle: &ContainerHandle) -> Result<LogStream>;

    /// Subscribe to runtime events emitted at or after `since` (epoch seconds).
    async fn subscribe_events(&self, since: i64) -> Result<EventStream>;
}
