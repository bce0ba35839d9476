//! Tick planning.
//!
//! Pure function of the registry, the set of workloads with an outstanding
//! runtime call and the draining flag. The reconciler dispatches whatever
//! comes out; nothing here touches the runtime.

use std::collections::HashSet;

use convoy_core::{Workload, WorkloadId, WorkloadState};
use itertools::Itertools;

use crate::registry::Registry;
use crate::types::ReconcileAction;

/// Result of one planning pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickPlan {
    /// Advance workloads by one step each.
    Dispatch(Vec<ReconcileAction>),
    /// Nothing left to advance: stop every running workload.
    Shutdown(Vec<ReconcileAction>),
    /// Runtime calls are outstanding; wait for their completions.
    Wait,
    /// Every workload is `Stopped` or `Failed` and nothing is outstanding.
    Quiescent,
}

impl TickPlan {
    pub fn actions(&self) -> &[ReconcileAction] {
        match self {
            Self::Dispatch(actions) | Self::Shutdown(actions) => actions,
            Self::Wait | Self::Quiescent => &[],
        }
    }
}

/// Step implied by a workload's state, if any.
///
/// While draining, workloads that were never created are withdrawn instead.
pub fn next_action(workload: &Workload, draining: bool) -> Option<ReconcileAction> {
    let id = workload.id().clone();
    match workload.state() {
        WorkloadState::New if draining => Some(ReconcileAction::Withdraw { workload: id }),
        WorkloadState::New => Some(ReconcileAction::CreateContainer { workload: id }),
        WorkloadState::Created => Some(ReconcileAction::StartContainer { workload: id }),
        WorkloadState::Started => Some(ReconcileAction::ConfirmRunning { workload: id }),
        WorkloadState::Creating
        | WorkloadState::Starting
        | WorkloadState::Running
        | WorkloadState::Stopping
        | WorkloadState::Stopped
        | WorkloadState::Failed => None,
    }
}

/// Plan one tick.
pub fn plan(registry: &Registry, outstanding: &HashSet<WorkloadId>, draining: bool) -> TickPlan {
    let actions = registry
        .iter()
        .filter(|w| !outstanding.contains(w.id()))
        .filter_map(|w| next_action(w, draining))
        .collect_vec();

    if !actions.is_empty() {
        return TickPlan::Dispatch(actions);
    }

    if !outstanding.is_empty() {
        return TickPlan::Wait;
    }

    let stops = registry
        .iter()
        .filter(|w| w.state() == WorkloadState::Running)
        .map(|w| ReconcileAction::StopContainer {
            workload: w.id().clone(),
        })
        .collect_vec();

    if !stops.is_empty() {
        return TickPlan::Shutdown(stops);
    }

    if registry.iter().all(|w| w.state().is_terminal()) {
        TickPlan::Quiescent
    } else {
        TickPlan::Wait
    }
}
