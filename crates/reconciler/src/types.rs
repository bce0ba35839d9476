//! Core types for the reconciler.

use chrono::{DateTime, Utc};
use convoy_core::{ContainerHandle, Workload, WorkloadId, WorkloadState};
use convoy_events::DomainEvent;
use convoy_runtime::{LogLine, RuntimeError};
use serde::Serialize;

/// Actions the reconciler can take on one workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReconcileAction {
    /// Create the container (`New` to `Creating`).
    CreateContainer { workload: WorkloadId },
    /// Start the owned container (`Created` to `Starting`).
    StartContainer { workload: WorkloadId },
    /// Confirm a started container is alive (`Started` to `Running`).
    ConfirmRunning { workload: WorkloadId },
    /// Kill the owned container (`Running` to `Stopping`).
    StopContainer { workload: WorkloadId },
    /// Drop a workload that was never created (`New` to `Stopped`).
    Withdraw { workload: WorkloadId },
}

impl ReconcileAction {
    /// Get the workload this action targets.
    pub const fn workload_id(&self) -> &WorkloadId {
        match self {
            Self::CreateContainer { workload }
            | Self::StartContainer { workload }
            | Self::ConfirmRunning { workload }
            | Self::StopContainer { workload }
            | Self::Withdraw { workload } => workload,
        }
    }

    /// State the workload must be in for this action to apply.
    pub const fn expected_state(&self) -> WorkloadState {
        match self {
            Self::CreateContainer { .. } | Self::Withdraw { .. } => WorkloadState::New,
            Self::StartContainer { .. } => WorkloadState::Created,
            Self::ConfirmRunning { .. } => WorkloadState::Started,
            Self::StopContainer { .. } => WorkloadState::Running,
        }
    }

    /// Whether this action issues a runtime call.
    pub const fn calls_runtime(&self) -> bool {
        matches!(
            self,
            Self::CreateContainer { .. } | Self::StartContainer { .. } | Self::StopContainer { .. }
        )
    }

    /// Get a description of the action.
    pub fn description(&self) -> String {
        match self {
            Self::CreateContainer { workload } => format!("create container {workload}"),
            Self::StartContainer { workload } => format!("start container {workload}"),
            Self::ConfirmRunning { workload } => format!("confirm {workload} running"),
            Self::StopContainer { workload } => format!("stop container {workload}"),
            Self::Withdraw { workload } => format!("withdraw {workload}"),
        }
    }
}

/// Outcome of a runtime call, posted back to the reconciler's mailbox.
#[derive(Debug, Clone)]
pub enum Completion {
    Created {
        workload: WorkloadId,
        result: Result<ContainerHandle, RuntimeError>,
    },
    Started {
        workload: WorkloadId,
        result: Result<(), RuntimeError>,
    },
    Killed {
        workload: WorkloadId,
        result: Result<(), RuntimeError>,
    },
}

impl Completion {
    pub const fn workload_id(&self) -> &WorkloadId {
        match self {
            Self::Created { workload, .. }
            | Self::Started { workload, .. }
            | Self::Killed { workload, .. } => workload,
        }
    }
}

/// Everything the reconciler reacts to.
#[derive(Debug, Clone)]
pub enum ReconcilerMessage {
    /// Run one reconciliation pass.
    Tick,
    /// A translated runtime event.
    Event(DomainEvent),
    /// A runtime call finished.
    Completed(Completion),
    /// The runtime event feed closed.
    EventStreamEnded,
    /// The runtime event feed broke.
    EventStreamFailed { reason: String },
    /// Operator interrupt.
    Interrupt,
}

/// One applied state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub workload: WorkloadId,
    pub from: WorkloadState,
    pub to: WorkloadState,
}

/// One line of output from a workload's container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadLog {
    pub workload: WorkloadId,
    pub line: LogLine,
}

impl std::fmt::Display for WorkloadLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.workload, self.line.text)
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Every workload is `Stopped` or `Failed` and nothing is in flight.
    Quiescent,
    /// The runtime event feed closed before quiescence.
    EventStreamClosed,
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Quiescent => write!(f, "quiescent"),
            Self::EventStreamClosed => write!(f, "event stream closed"),
        }
    }
}

/// Final state of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub termination: Termination,
    pub workloads: Vec<Workload>,
    /// Reconciliation passes executed.
    pub ticks: u64,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Create a report stamped now.
    pub fn new(termination: Termination, workloads: Vec<Workload>, ticks: u64) -> Self {
        Self {
            termination,
            workloads,
            ticks,
            finished_at: Utc::now(),
        }
    }

    /// Find a workload by id.
    pub fn workload(&self, id: &str) -> Option<&Workload> {
        self.workloads.iter().find(|w| w.id().as_str() == id)
    }

    /// Workloads that ended `Failed`.
    pub fn failed(&self) -> impl Iterator<Item = &Workload> {
        self.workloads
            .iter()
            .filter(|w| w.state() == WorkloadState::Failed)
    }

    /// Workloads whose container died on its own with a non-zero exit code.
    pub fn exited_abnormally(&self) -> impl Iterator<Item = &Workload> {
        self.workloads.iter().filter(|w| w.exited_abnormally())
    }

    /// Process exit code: 1 when the run reached quiescence with a failed
    /// workload or an abnormal container exit, 0 otherwise.
    pub fn exit_code(&self) -> u8 {
        let unhealthy =
            self.failed().next().is_some() || self.exited_abnormally().next().is_some();
        match self.termination {
            Termination::Quiescent if unhealthy => 1,
            Termination::Quiescent | Termination::EventStreamClosed => 0,
        }
    }
}
