//! Workload model: identity, launch spec, lifecycle state and container ownership.

use std::borrow::Borrow;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Unique identifier of a workload.
///
/// The id doubles as the runtime-visible container name, so it has to be a
/// valid container name: `[A-Za-z0-9][A-Za-z0-9_.-]*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkloadId(String);

impl WorkloadId {
    /// Parse and validate a workload id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidWorkloadId`] if the id is empty or is not a
    /// valid container name.
    pub fn parse(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let mut chars = id.chars();
        match chars.next() {
            None => Err(Error::invalid_workload_id(id, "must not be empty")),
            Some(first) if !first.is_ascii_alphanumeric() => Err(Error::invalid_workload_id(
                id,
                "must start with an ASCII letter or digit",
            )),
            Some(_) => {
                if chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')) {
                    Ok(Self(id))
                } else {
                    Err(Error::invalid_workload_id(
                        id,
                        "may only contain ASCII letters, digits, '_', '.' and '-'",
                    ))
                }
            }
        }
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for WorkloadId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of workload. Descriptive only: the state machine treats both alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadKind {
    /// Long-running workload.
    Service,
    /// Run-once workload.
    Driver,
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Service => "service",
            Self::Driver => "driver",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle state of a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadState {
    /// Declared, no container yet.
    New,
    /// Create call in flight.
    Creating,
    /// Container exists, not started.
    Created,
    /// Start call in flight.
    Starting,
    /// Start call succeeded, not yet confirmed running.
    Started,
    /// Confirmed alive.
    Running,
    /// Kill call in flight.
    Stopping,
    /// Terminated, normally or abnormally.
    Stopped,
    /// A runtime call for this workload failed.
    Failed,
}

impl WorkloadState {
    /// Every state, in lifecycle order.
    pub const ALL: [Self; 9] = [
        Self::New,
        Self::Creating,
        Self::Created,
        Self::Starting,
        Self::Started,
        Self::Running,
        Self::Stopping,
        Self::Stopped,
        Self::Failed,
    ];

    /// Check if this is a terminal state.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// Check if a runtime call is expected to be in flight in this state.
    pub const fn is_in_flight(self) -> bool {
        matches!(self, Self::Creating | Self::Starting | Self::Stopping)
    }
}

impl std::fmt::Display for WorkloadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Creating => "creating",
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Health-check descriptor, carried verbatim from the catalog.
///
/// Nothing in the lifecycle consumes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckSpec(serde_yaml::Value);

impl CheckSpec {
    /// Wrap a raw descriptor.
    pub const fn new(value: serde_yaml::Value) -> Self {
        Self(value)
    }

    /// Get the raw descriptor.
    pub const fn as_value(&self) -> &serde_yaml::Value {
        &self.0
    }
}

/// Handle to a container owned by a workload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerHandle(String);

impl ContainerHandle {
    /// Create a handle from a runtime container id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the runtime container id.
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Declared launch spec of a workload, as read from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    /// Image to run.
    pub image: String,
    /// Command override; empty means the image default.
    #[serde(default)]
    pub command: Vec<String>,
    /// Optional health-check descriptor.
    #[serde(default)]
    pub check: Option<CheckSpec>,
    /// Declared dependencies. Stored, never consulted.
    #[serde(default, alias = "dependencies")]
    pub depends_on: Vec<String>,
}

impl WorkloadSpec {
    /// Create a spec for an image with the default command.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            command: Vec::new(),
            check: None,
            depends_on: Vec::new(),
        }
    }

    /// Set the command.
    #[must_use]
    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Set the health-check descriptor.
    #[must_use]
    pub fn with_check(mut self, check: CheckSpec) -> Self {
        self.check = Some(check);
        self
    }

    /// Add a declared dependency.
    #[must_use]
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }
}

/// A declared unit of orchestration.
#[derive(Debug, Clone, Serialize)]
pub struct Workload {
    id: WorkloadId,
    kind: WorkloadKind,
    image: String,
    command: Vec<String>,
    check: Option<CheckSpec>,
    dependencies: Vec<WorkloadId>,
    state: WorkloadState,
    container: Option<ContainerHandle>,
    history: Vec<WorkloadState>,
    /// Exit code of a container that died on its own.
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<i64>,
    /// Last runtime error seen for this workload.
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Workload {
    /// Create a workload in state `New`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidWorkloadId`] if a declared dependency is not a
    /// valid workload id.
    pub fn new(id: WorkloadId, kind: WorkloadKind, spec: WorkloadSpec) -> Result<Self> {
        let dependencies = spec
            .depends_on
            .into_iter()
            .map(WorkloadId::parse)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            id,
            kind,
            image: spec.image,
            command: spec.command,
            check: spec.check,
            dependencies,
            state: WorkloadState::New,
            container: None,
            history: vec![WorkloadState::New],
            exit_code: None,
            error: None,
        })
    }

    pub const fn id(&self) -> &WorkloadId {
        &self.id
    }

    pub const fn kind(&self) -> WorkloadKind {
        self.kind
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub const fn check(&self) -> Option<&CheckSpec> {
        self.check.as_ref()
    }

    pub fn dependencies(&self) -> &[WorkloadId] {
        &self.dependencies
    }

    pub const fn state(&self) -> WorkloadState {
        self.state
    }

    pub const fn container(&self) -> Option<&ContainerHandle> {
        self.container.as_ref()
    }

    /// States this workload has been in, oldest first.
    pub fn history(&self) -> &[WorkloadState] {
        &self.history
    }

    pub const fn exit_code(&self) -> Option<i64> {
        self.exit_code
    }

    /// Whether the container died on its own with a non-zero exit code.
    pub const fn exited_abnormally(&self) -> bool {
        matches!(self.exit_code, Some(code) if code != 0)
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Record the exit code of a container that died on its own.
    pub const fn record_exit(&mut self, code: i64) {
        self.exit_code = Some(code);
    }

    /// Record a runtime error, replacing any earlier one.
    pub fn record_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    /// Move to `next` only if the current state is `expected`.
    ///
    /// Returns whether the transition was applied.
    pub fn transition(&mut self, expected: WorkloadState, next: WorkloadState) -> bool {
        if self.state != expected {
            return false;
        }
        self.set_state(next);
        true
    }

    /// Move to `next` regardless of the current state. Returns the prior state.
    pub fn force(&mut self, next: WorkloadState) -> WorkloadState {
        let prior = self.state;
        if prior != next {
            self.set_state(next);
        }
        prior
    }

    /// Take ownership of a freshly created container.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandleAlreadyAttached`] if the workload already owns
    /// a container.
    pub fn attach_container(&mut self, handle: ContainerHandle) -> Result<()> {
        match &self.container {
            Some(existing) => Err(Error::HandleAlreadyAttached {
                id: self.id.to_string(),
                container: existing.to_string(),
            }),
            None => {
                self.container = Some(handle);
                Ok(())
            }
        }
    }

    /// Release the owned container, returning it if one was attached.
    pub fn release_container(&mut self) -> Option<ContainerHandle> {
        self.container.take()
    }

    fn set_state(&mut self, next: WorkloadState) {
        self.state = next;
        self.history.push(next);
    }
}
