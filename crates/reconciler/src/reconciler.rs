//! Reconciler actor.
//!
//! One task owns the [`Registry`] and drains a single mailbox of
//! [`ReconcilerMessage`]s. Runtime calls run on spawned tasks that post a
//! [`Completion`] back; every completion-driven transition is a compare-and-set
//! against the in-flight state it expects, so a `ContainerDied` that lands
//! first wins and the late completion is discarded.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use convoy_core::{ContainerHandle, WorkloadId, WorkloadState};
use convoy_events::{DomainEvent, EventSink, WatchOutcome};
use convoy_runtime::{ContainerSpec, RuntimeClient, RuntimeError};
use futures::StreamExt;
use futures::future::join_all;
use itertools::Itertools;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::plan::{TickPlan, plan};
use crate::registry::Registry;
use crate::types::{
    Completion, ReconcileAction, ReconcilerMessage, RunReport, Termination, Transition,
    WorkloadLog,
};

const TRANSITION_CAPACITY: usize = 1024;
const LOG_CAPACITY: usize = 1024;
/// How long finished runs wait for log streams to drain.
const LOG_DRAIN: Duration = Duration::from_secs(1);

/// Configuration for the reconciler.
#[derive(Debug, Clone, Default)]
pub struct ReconcilerConfig {
    /// Abort the run on the first failed runtime call instead of marking the
    /// workload `Failed`.
    pub fail_fast: bool,
    /// Leave the containers of this run in place when it ends.
    pub keep_containers: bool,
    /// Follow each container's output once it starts.
    pub follow_logs: bool,
}

/// Cloneable sender into a reconciler's mailbox.
///
/// Doubles as the [`EventSink`] for an `EventWatcher`.
#[derive(Debug, Clone)]
pub struct ReconcilerHandle {
    tx: mpsc::UnboundedSender<ReconcilerMessage>,
}

impl ReconcilerHandle {
    /// Deliver a domain event. Returns `false` once the reconciler is gone.
    pub fn event(&self, event: DomainEvent) -> bool {
        self.send(ReconcilerMessage::Event(event))
    }

    /// Request draining; a second request aborts the run.
    pub fn interrupt(&self) -> bool {
        self.send(ReconcilerMessage::Interrupt)
    }

    /// Request a reconciliation pass.
    pub fn tick(&self) -> bool {
        self.send(ReconcilerMessage::Tick)
    }

    fn send(&self, message: ReconcilerMessage) -> bool {
        self.tx.send(message).is_ok()
    }
}

impl EventSink for ReconcilerHandle {
    fn deliver(&self, event: DomainEvent) -> bool {
        self.event(event)
    }

    fn finish(&self, outcome: &WatchOutcome) {
        let message = match outcome {
            WatchOutcome::StreamEnded => ReconcilerMessage::EventStreamEnded,
            WatchOutcome::StreamFailed { reason } => ReconcilerMessage::EventStreamFailed {
                reason: reason.clone(),
            },
            WatchOutcome::SinkClosed => return,
        };
        self.send(message);
    }
}

/// A container created during this run.
#[derive(Debug, Clone)]
struct CreatedContainer {
    workload: WorkloadId,
    handle: ContainerHandle,
    /// Created after its workload had moved on, so never attached.
    orphan: bool,
}

/// Container lifecycle reconciler.
pub struct Reconciler {
    registry: Registry,
    runtime: Arc<dyn RuntimeClient>,
    config: ReconcilerConfig,
    tx: mpsc::UnboundedSender<ReconcilerMessage>,
    rx: mpsc::UnboundedReceiver<ReconcilerMessage>,
    transitions: broadcast::Sender<Transition>,
    logs: broadcast::Sender<WorkloadLog>,
    /// Workloads with a runtime call in flight.
    outstanding: HashSet<WorkloadId>,
    /// Every container created so far, for cleanup.
    containers: Vec<CreatedContainer>,
    log_tasks: Vec<JoinHandle<()>>,
    tick_scheduled: bool,
    draining: bool,
    ticks: u64,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(
        registry: Registry,
        runtime: Arc<dyn RuntimeClient>,
        config: ReconcilerConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        let (logs, _) = broadcast::channel(LOG_CAPACITY);
        Self {
            registry,
            runtime,
            config,
            tx,
            rx,
            transitions,
            logs,
            outstanding: HashSet::new(),
            containers: Vec::new(),
            log_tasks: Vec::new(),
            tick_scheduled: false,
            draining: false,
            ticks: 0,
        }
    }

    /// Get a handle for feeding events and interrupts into the mailbox.
    pub fn handle(&self) -> ReconcilerHandle {
        ReconcilerHandle {
            tx: self.tx.clone(),
        }
    }

    /// Subscribe to every state change applied from now on.
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }

    /// Subscribe to container output. Only fed when `follow_logs` is set.
    pub fn subscribe_logs(&self) -> broadcast::Receiver<WorkloadLog> {
        self.logs.subscribe()
    }

    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Get the configuration.
    pub const fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Drive every workload to `Stopped` or `Failed`, then remove the
    /// containers this run created.
    ///
    /// Returns once the registry is quiescent or the event feed closes.
    /// Cleanup runs on every exit path, errors included.
    ///
    /// # Errors
    ///
    /// - [`Error::EventStream`] if the event feed breaks
    /// - [`Error::Runtime`] on a failed runtime call with `fail_fast` set
    /// - [`Error::Interrupted`] on a second interrupt
    /// - [`Error::Registry`] / [`Error::MissingContainer`] on a broken
    ///   registry invariant
    pub async fn run(mut self) -> Result<RunReport> {
        info!(workloads = self.registry.len(), "Starting reconciliation");
        self.schedule_tick();

        let outcome = self.drive().await;
        self.drain_logs().await;
        self.cleanup().await;

        let termination = outcome?;
        info!(
            termination = %termination,
            ticks = self.ticks,
            "Reconciliation finished"
        );
        Ok(RunReport::new(
            termination,
            self.registry.into_workloads(),
            self.ticks,
        ))
    }

    async fn drive(&mut self) -> Result<Termination> {
        loop {
            let Some(message) = self.rx.recv().await else {
                return Err(Error::MailboxClosed);
            };

            if let Some(termination) = self.handle_message(message)? {
                return Ok(termination);
            }
        }
    }

    fn handle_message(&mut self, message: ReconcilerMessage) -> Result<Option<Termination>> {
        match message {
            ReconcilerMessage::Tick => {
                self.tick_scheduled = false;
                self.tick()
            }
            ReconcilerMessage::Event(event) => {
                self.handle_event(&event);
                Ok(None)
            }
            ReconcilerMessage::Completed(completion) => {
                self.complete(completion)?;
                Ok(None)
            }
            ReconcilerMessage::EventStreamEnded => {
                warn!("Runtime event stream ended");
                Ok(Some(Termination::EventStreamClosed))
            }
            ReconcilerMessage::EventStreamFailed { reason } => {
                error!(reason = %reason, "Runtime event stream failed");
                Err(Error::event_stream(reason))
            }
            ReconcilerMessage::Interrupt => {
                self.interrupt()?;
                Ok(None)
            }
        }
    }

    fn tick(&mut self) -> Result<Option<Termination>> {
        self.ticks = self.ticks.saturating_add(1);

        let plan = plan(&self.registry, &self.outstanding, self.draining);
        match &plan {
            TickPlan::Dispatch(actions) => {
                debug!(tick = self.ticks, actions = actions.len(), "Dispatching actions");
            }
            TickPlan::Shutdown(actions) => {
                info!(running = actions.len(), "Nothing left to advance, stopping workloads");
            }
            TickPlan::Wait => {
                debug!(
                    tick = self.ticks,
                    outstanding = self.outstanding.len(),
                    "Waiting for runtime calls"
                );
            }
            TickPlan::Quiescent => return Ok(Some(Termination::Quiescent)),
        }

        for action in plan.actions() {
            self.dispatch(action)?;
        }
        Ok(None)
    }

    fn dispatch(&mut self, action: &ReconcileAction) -> Result<()> {
        let id = action.workload_id().clone();
        if action.calls_runtime() && self.outstanding.contains(&id) {
            warn!(
                workload = %id,
                action = %action.description(),
                "Runtime call outstanding, skipping"
            );
            return Ok(());
        }
        debug!(workload = %id, action = %action.description(), "Applying action");

        match action {
            ReconcileAction::CreateContainer { .. } => {
                let spec = ContainerSpec::for_workload(self.registry.get(id.as_str())?);
                if !self.apply(&id, WorkloadState::New, WorkloadState::Creating)? {
                    return Ok(());
                }
                let runtime = Arc::clone(&self.runtime);
                let workload = id.clone();
                self.spawn_call(&id, async move {
                    let result = runtime.create_container(&spec).await;
                    Completion::Created { workload, result }
                });
            }
            ReconcileAction::StartContainer { .. } => {
                let handle = self.owned_container(&id)?;
                if !self.apply(&id, WorkloadState::Created, WorkloadState::Starting)? {
                    return Ok(());
                }
                let runtime = Arc::clone(&self.runtime);
                let workload = id.clone();
                self.spawn_call(&id, async move {
                    let result = runtime.start_container(&handle).await;
                    Completion::Started { workload, result }
                });
            }
            ReconcileAction::StopContainer { .. } => {
                let handle = self.owned_container(&id)?;
                if !self.apply(&id, WorkloadState::Running, WorkloadState::Stopping)? {
                    return Ok(());
                }
                let runtime = Arc::clone(&self.runtime);
                let workload = id.clone();
                self.spawn_call(&id, async move {
                    let result = runtime.kill_container(&handle).await;
                    Completion::Killed { workload, result }
                });
            }
            ReconcileAction::ConfirmRunning { .. } => {
                if self.apply(&id, WorkloadState::Started, WorkloadState::Running)? {
                    info!(workload = %id, "Workload running");
                    self.schedule_tick();
                }
            }
            ReconcileAction::Withdraw { .. } => {
                if self.apply(&id, WorkloadState::New, WorkloadState::Stopped)? {
                    info!(workload = %id, "Withdrew workload before creation");
                    self.schedule_tick();
                }
            }
        }
        Ok(())
    }

    fn owned_container(&self, id: &WorkloadId) -> Result<ContainerHandle> {
        self.registry
            .get(id.as_str())?
            .container()
            .cloned()
            .ok_or_else(|| Error::missing_container(id.as_str()))
    }

    /// Run a runtime call on its own task and post its completion back.
    fn spawn_call<F>(&mut self, id: &WorkloadId, call: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        self.outstanding.insert(id.clone());
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let completion = call.await;
            // The reconciler may already have returned.
            let _ = tx.send(ReconcilerMessage::Completed(completion));
        });
    }

    fn complete(&mut self, completion: Completion) -> Result<()> {
        let id = completion.workload_id().clone();
        self.outstanding.remove(&id);

        match completion {
            Completion::Created {
                result: Ok(handle), ..
            } => {
                self.container_created(&id, handle)?;
            }
            Completion::Started { result: Ok(()), .. } => {
                if self.apply(&id, WorkloadState::Starting, WorkloadState::Started)? {
                    info!(workload = %id, "Container started");
                    if self.config.follow_logs {
                        self.follow_logs(&id)?;
                    }
                } else {
                    self.discard(&id, "start");
                }
            }
            Completion::Killed { result: Ok(()), .. } => {
                self.registry.get_mut(id.as_str())?.release_container();
                if self.apply(&id, WorkloadState::Stopping, WorkloadState::Stopped)? {
                    info!(workload = %id, "Container stopped");
                } else {
                    debug!(workload = %id, "Workload already stopped");
                }
            }
            Completion::Created { result: Err(e), .. } => {
                self.runtime_failed(&id, WorkloadState::Creating, e)?;
            }
            Completion::Started { result: Err(e), .. } => {
                self.runtime_failed(&id, WorkloadState::Starting, e)?;
            }
            Completion::Killed { result: Err(e), .. } => {
                self.runtime_failed(&id, WorkloadState::Stopping, e)?;
            }
        }

        self.schedule_tick();
        Ok(())
    }

    /// Attach a new container, or leave it unattached when the workload
    /// moved on while the create call was in flight.
    fn container_created(&mut self, id: &WorkloadId, handle: ContainerHandle) -> Result<()> {
        let state = self.registry.get(id.as_str())?.state();
        let orphan = state != WorkloadState::Creating;
        self.containers.push(CreatedContainer {
            workload: id.clone(),
            handle: handle.clone(),
            orphan,
        });

        if orphan {
            warn!(
                workload = %id,
                container = %handle,
                state = %state,
                "Container created after the workload moved on, leaving it unattached"
            );
            return Ok(());
        }

        let container = handle.to_string();
        self.registry.get_mut(id.as_str())?.attach_container(handle)?;
        if self.apply(id, WorkloadState::Creating, WorkloadState::Created)? {
            info!(workload = %id, container = %container, "Container created");
        }
        Ok(())
    }

    /// Mark the workload `Failed` if the call's state still holds; otherwise
    /// the failure lost the race against a death and is only recorded.
    fn runtime_failed(
        &mut self,
        id: &WorkloadId,
        expected: WorkloadState,
        error: RuntimeError,
    ) -> Result<()> {
        self.registry
            .get_mut(id.as_str())?
            .record_error(error.to_string());

        if !self.apply(id, expected, WorkloadState::Failed)? {
            let state = self.registry.get(id.as_str())?.state();
            warn!(
                workload = %id,
                state = %state,
                error = %error,
                "Runtime call failed after the workload moved on"
            );
            return Ok(());
        }

        if self.config.fail_fast {
            error!(workload = %id, error = %error, "Runtime call failed, aborting");
            return Err(Error::runtime(id.as_str(), error));
        }
        warn!(workload = %id, error = %error, "Workload failed");
        Ok(())
    }

    fn discard(&self, id: &WorkloadId, call: &str) {
        let state = self
            .registry
            .get(id.as_str())
            .map(|w| w.state().to_string())
            .unwrap_or_default();
        warn!(workload = %id, call, state = %state, "Discarding late completion");
    }

    fn handle_event(&mut self, event: &DomainEvent) {
        match event {
            DomainEvent::ContainerDied { name, exit_code } => {
                self.container_died(name, *exit_code);
            }
            DomainEvent::ContainerCreated { name } | DomainEvent::ContainerStarted { name } => {
                debug!(
                    event = %event,
                    known = self.registry.contains(name),
                    "Observed runtime event"
                );
            }
        }
    }

    /// Force a live workload to `Stopped`. `Stopped` and `Failed` are kept.
    fn container_died(&mut self, name: &str, exit_code: Option<i64>) {
        let workload = match self.registry.get_mut(name) {
            Ok(workload) => workload,
            Err(e) => {
                debug!(error = %e, "Ignoring event for unknown container");
                return;
            }
        };

        let prior = workload.state();
        if prior.is_terminal() {
            debug!(workload = %name, state = %prior, "Container died after the workload ended");
            return;
        }

        // A death while Stopping is our own kill.
        if prior != WorkloadState::Stopping {
            if let Some(code) = exit_code {
                workload.record_exit(code);
            }
        }
        workload.force(WorkloadState::Stopped);
        let abnormal = workload.exited_abnormally();
        let id = workload.id().clone();

        if abnormal {
            warn!(
                workload = %id,
                prior = %prior,
                exit_code = ?exit_code,
                "Container exited abnormally"
            );
        } else {
            info!(workload = %id, prior = %prior, "Container died");
        }
        self.announce(id, prior, WorkloadState::Stopped);
        self.schedule_tick();
    }

    /// Forward a started container's output into the log feed.
    fn follow_logs(&mut self, id: &WorkloadId) -> Result<()> {
        let handle = self.owned_container(id)?;
        let runtime = Arc::clone(&self.runtime);
        let logs = self.logs.clone();
        let workload = id.clone();

        self.log_tasks.push(tokio::spawn(async move {
            let mut lines = match runtime.container_logs(&handle).await {
                Ok(lines) => lines,
                Err(e) => {
                    warn!(workload = %workload, error = %e, "Cannot follow container logs");
                    return;
                }
            };
            while let Some(item) = lines.next().await {
                match item {
                    Ok(line) => {
                        // No subscribers is fine.
                        let _ = logs.send(WorkloadLog {
                            workload: workload.clone(),
                            line,
                        });
                    }
                    Err(e) => {
                        debug!(workload = %workload, error = %e, "Container log stream failed");
                        return;
                    }
                }
            }
        }));
        Ok(())
    }

    /// Give log streams a moment to finish, then close what is left.
    async fn drain_logs(&mut self) {
        let tasks = std::mem::take(&mut self.log_tasks);
        if tasks.is_empty() {
            return;
        }
        let aborts = tasks.iter().map(JoinHandle::abort_handle).collect_vec();
        if timeout(LOG_DRAIN, join_all(tasks)).await.is_err() {
            debug!(streams = aborts.len(), "Closing open log streams");
            for abort in aborts {
                abort.abort();
            }
        }
    }

    /// Remove the containers this run created. Unattached containers are
    /// removed even with `keep_containers` set.
    async fn cleanup(&mut self) {
        if !self.outstanding.is_empty() {
            warn!(
                outstanding = self.outstanding.len(),
                "Runtime calls still outstanding at cleanup"
            );
        }

        let keep = self.config.keep_containers;
        let (targets, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.containers)
            .into_iter()
            .partition(|container| container.orphan || !keep);
        if !kept.is_empty() {
            info!(containers = kept.len(), "Keeping containers");
        }
        if targets.is_empty() {
            return;
        }

        info!(containers = targets.len(), "Removing containers");
        let runtime = &self.runtime;
        let removals = targets.into_iter().map(|container| async move {
            let result = runtime.remove_container(&container.handle).await;
            (container, result)
        });
        let results = join_all(removals).await;

        for (container, result) in results {
            match result {
                Ok(()) => {
                    debug!(
                        workload = %container.workload,
                        container = %container.handle,
                        "Container removed"
                    );
                    if let Ok(workload) = self.registry.get_mut(container.workload.as_str()) {
                        if workload.container() == Some(&container.handle) {
                            workload.release_container();
                        }
                    }
                }
                Err(e) => warn!(
                    workload = %container.workload,
                    container = %container.handle,
                    error = %e,
                    "Failed to remove container"
                ),
            }
        }
    }

    fn interrupt(&mut self) -> Result<()> {
        if self.draining {
            warn!("Interrupted again while draining, aborting");
            return Err(Error::Interrupted);
        }
        info!(
            outstanding = self.outstanding.len(),
            "Interrupt received, draining workloads"
        );
        self.draining = true;
        self.schedule_tick();
        Ok(())
    }

    /// Compare-and-set a workload's state, announcing the change if applied.
    fn apply(
        &mut self,
        id: &WorkloadId,
        expected: WorkloadState,
        next: WorkloadState,
    ) -> Result<bool> {
        let applied = self.registry.get_mut(id.as_str())?.transition(expected, next);
        if applied {
            self.announce(id.clone(), expected, next);
        }
        Ok(applied)
    }

    fn announce(&self, workload: WorkloadId, from: WorkloadState, to: WorkloadState) {
        debug!(workload = %workload, from = %from, to = %to, "State transition");
        // No subscribers is fine.
        let _ = self.transitions.send(Transition { workload, from, to });
    }

    /// Queue a tick unless one is already queued.
    fn schedule_tick(&mut self) {
        if self.tick_scheduled {
            return;
        }
        self.tick_scheduled = self.tx.send(ReconcilerMessage::Tick).is_ok();
    }
}

/// Builder for Reconciler.
pub struct ReconcilerBuilder {
    registry: Registry,
    runtime: Option<Arc<dyn RuntimeClient>>,
    config: ReconcilerConfig,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            runtime: None,
            config: ReconcilerConfig::default(),
        }
    }

    /// Set the workload registry.
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    /// Set the runtime client.
    pub fn with_runtime(mut self, runtime: Arc<dyn RuntimeClient>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable/disable fail-fast.
    pub fn fail_fast(mut self, enabled: bool) -> Self {
        self.config.fail_fast = enabled;
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if no runtime was set.
    pub fn build(self) -> Result<Reconciler> {
        let runtime = self
            .runtime
            .ok_or_else(|| Error::invalid_config("runtime client is required"))?;

        Ok(Reconciler::new(self.registry, runtime, self.config))
    }
}

impl Default for ReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
