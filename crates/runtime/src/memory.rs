//! In-memory runtime for dry runs and tests.
//!
//! Every call is recorded. Successful calls emit the same events a real
//! daemon would (`create`, `start`, `die`, `destroy`) to all subscribers.
//! Calls can be made to fail or held at a [`Gate`] until released.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use convoy_core::ContainerHandle;
use futures::StreamExt;
use tokio::sync::{Mutex, Notify, mpsc};
use tracing::debug;

use crate::client::{ContainerSpec, EventStream, LogLine, LogStream, RawEvent, RuntimeClient};
use crate::error::{Result, RuntimeError};

/// Exit code reported for a killed container (128 + SIGKILL).
const KILLED_EXIT_CODE: i64 = 137;

/// Kind of runtime call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Create,
    Start,
    Kill,
    Remove,
}

/// One recorded call, keyed by container name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeCall {
    pub kind: CallKind,
    pub name: String,
}

/// Holds a call until opened.
#[derive(Debug, Clone)]
pub struct Gate {
    notify: Arc<Notify>,
}

impl Gate {
    /// Let the held call complete. Opening before the call arrives is fine.
    pub fn open(&self) {
        self.notify.notify_one();
    }
}

type EventSender = mpsc::UnboundedSender<std::result::Result<RawEvent, RuntimeError>>;

#[derive(Default)]
struct State {
    calls: Vec<RuntimeCall>,
    /// Container id to container name.
    containers: HashMap<String, String>,
    /// Ids of started containers that have not died.
    running: HashSet<String>,
    /// Canned output per container name.
    logs: HashMap<String, Vec<LogLine>>,
    failures: HashSet<(CallKind, String)>,
    gates: HashMap<(CallKind, String), Arc<Notify>>,
    in_flight: HashMap<String, usize>,
    max_in_flight: HashMap<String, usize>,
    subscribers: Vec<EventSender>,
    next_id: u64,
}

impl State {
    fn broadcast(&mut self, event: &RawEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(Ok(event.clone())).is_ok());
    }

    fn name_of(&self, handle: &ContainerHandle) -> Option<String> {
        self.containers.get(handle.id()).cloned()
    }
}

/// Runtime that keeps containers as entries in a map.
#[derive(Default)]
pub struct InMemoryRuntime {
    state: Mutex<State>,
}

impl InMemoryRuntime {
    /// Create an empty runtime.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty runtime wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make every `kind` call for container `name` fail.
    pub async fn fail_on(&self, kind: CallKind, name: impl Into<String>) {
        self.state.lock().await.failures.insert((kind, name.into()));
    }

    /// Hold the next `kind` call for container `name` until the gate opens.
    pub async fn hold(&self, kind: CallKind, name: impl Into<String>) -> Gate {
        let notify = Arc::new(Notify::new());
        self.state
            .lock()
            .await
            .gates
            .insert((kind, name.into()), Arc::clone(&notify));
        Gate { notify }
    }

    /// Output returned when the logs of container `name` are followed.
    pub async fn set_logs<I>(&self, name: impl Into<String>, lines: I)
    where
        I: IntoIterator<Item = LogLine>,
    {
        self.state
            .lock()
            .await
            .logs
            .insert(name.into(), lines.into_iter().collect());
    }

    /// Push an arbitrary event to every subscriber.
    pub async fn emit(&self, event: RawEvent) {
        self.state.lock().await.broadcast(&event);
    }

    /// End every open event stream.
    pub async fn close_events(&self) {
        self.state.lock().await.subscribers.clear();
    }

    /// Report a transport error on every open event stream, then end them.
    pub async fn fail_events(&self, reason: impl Into<String>) {
        let error = RuntimeError::events(reason);
        let mut state = self.state.lock().await;
        for subscriber in state.subscribers.drain(..) {
            let _ = subscriber.send(Err(error.clone()));
        }
    }

    /// All calls so far, in issue order.
    pub async fn calls(&self) -> Vec<RuntimeCall> {
        self.state.lock().await.calls.clone()
    }

    /// Number of `kind` calls issued for container `name`.
    pub async fn call_count(&self, kind: CallKind, name: &str) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|call| call.kind == kind && call.name == name)
            .count()
    }

    /// Highest number of simultaneous calls ever seen for container `name`.
    pub async fn max_in_flight(&self, name: &str) -> usize {
        self.state
            .lock()
            .await
            .max_in_flight
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Number of containers that exist, running or not.
    pub async fn container_count(&self) -> usize {
        self.state.lock().await.containers.len()
    }

    /// Number of open event subscriptions.
    pub async fn subscriber_count(&self) -> usize {
        self.state.lock().await.subscribers.len()
    }

    /// Record the call and return its gate, if one was set.
    async fn enter(&self, kind: CallKind, name: &str) -> Option<Arc<Notify>> {
        let mut state = self.state.lock().await;
        state.calls.push(RuntimeCall {
            kind,
            name: name.to_string(),
        });

        let current = state.in_flight.entry(name.to_string()).or_insert(0);
        *current = current.saturating_add(1);
        let current = *current;
        let max = state.max_in_flight.entry(name.to_string()).or_insert(0);
        *max = (*max).max(current);

        state.gates.remove(&(kind, name.to_string()))
    }

    /// Wait at the gate, then finish the call. Returns the locked state when
    /// the call should succeed, or the injected failure.
    async fn complete(
        &self,
        kind: CallKind,
        name: &str,
        gate: Option<Arc<Notify>>,
    ) -> std::result::Result<tokio::sync::MutexGuard<'_, State>, String> {
        if let Some(gate) = gate {
            debug!(container = %name, ?kind, "Holding runtime call");
            gate.notified().await;
        }

        let mut state = self.state.lock().await;
        if let Some(current) = state.in_flight.get_mut(name) {
            *current = current.saturating_sub(1);
        }

        if state.failures.contains(&(kind, name.to_string())) {
            return Err("injected failure".to_string());
        }
        Ok(state)
    }
}

#[async_trait]
impl RuntimeClient for InMemoryRuntime {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        let gate = self.enter(CallKind::Create, &spec.name).await;
        let mut state = self
            .complete(CallKind::Create, &spec.name, gate)
            .await
            .map_err(|reason| RuntimeError::create(&spec.name, reason))?;

        if state.containers.values().any(|name| name == &spec.name) {
            return Err(RuntimeError::create(
                &spec.name,
                "container name already in use",
            ));
        }

        state.next_id = state.next_id.saturating_add(1);
        let id = format!("mem-{:06}", state.next_id);
        state.containers.insert(id.clone(), spec.name.clone());
        state.broadcast(&RawEvent::new("create", spec.name.as_str()));

        Ok(ContainerHandle::new(id))
    }

    async fn start_container(&self, handle: &ContainerHandle) -> Result<()> {
        let name = self
            .state
            .lock()
            .await
            .name_of(handle)
            .ok_or_else(|| RuntimeError::start(handle.id(), "no such container"))?;

        let gate = self.enter(CallKind::Start, &name).await;
        let mut state = self
            .complete(CallKind::Start, &name, gate)
            .await
            .map_err(|reason| RuntimeError::start(handle.id(), reason))?;

        state.running.insert(handle.id().to_string());
        state.broadcast(&RawEvent::new("start", name.as_str()));
        Ok(())
    }

    async fn kill_container(&self, handle: &ContainerHandle) -> Result<()> {
        let name = self
            .state
            .lock()
            .await
            .name_of(handle)
            .ok_or_else(|| RuntimeError::stop(handle.id(), "no such container"))?;

        let gate = self.enter(CallKind::Kill, &name).await;
        let mut state = self
            .complete(CallKind::Kill, &name, gate)
            .await
            .map_err(|reason| RuntimeError::stop(handle.id(), reason))?;

        if !state.running.remove(handle.id()) {
            return Err(RuntimeError::stop(handle.id(), "container is not running"));
        }
        state.broadcast(&RawEvent::new("die", name.as_str()).with_exit_code(KILLED_EXIT_CODE));
        Ok(())
    }

    async fn remove_container(&self, handle: &ContainerHandle) -> Result<()> {
        let name = self
            .state
            .lock()
            .await
            .name_of(handle)
            .ok_or_else(|| RuntimeError::remove(handle.id(), "no such container"))?;

        let gate = self.enter(CallKind::Remove, &name).await;
        let mut state = self
            .complete(CallKind::Remove, &name, gate)
            .await
            .map_err(|reason| RuntimeError::remove(handle.id(), reason))?;

        if state.running.remove(handle.id()) {
            state.broadcast(&RawEvent::new("die", name.as_str()).with_exit_code(KILLED_EXIT_CODE));
        }
        state.containers.remove(handle.id());
        state.broadcast(&RawEvent::new("destroy", name.as_str()));
        Ok(())
    }

    async fn container_logs(&self, handle: &ContainerHandle) -> Result<LogStream> {
        let state = self.state.lock().await;
        let name = state
            .name_of(handle)
            .ok_or_else(|| RuntimeError::logs(handle.id(), "no such container"))?;
        let lines = state.logs.get(&name).cloned().unwrap_or_default();
        Ok(futures::stream::iter(lines.into_iter().map(Ok)).boxed())
    }

    async fn subscribe_events(&self, since: i64) -> Result<EventStream> {
        debug!(since, "Subscribing to in-memory events");
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().await.subscribers.push(tx);

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use std::time::Duration;

    use super::*;

    fn spec(name: &str) -> ContainerSpec {
        ContainerSpec {
            image: "debian:stretch-slim".to_string(),
            name: name.to_string(),
            command: vec!["echo".to_string(), "hello".to_string()],
        }
    }

    #[tokio::test]
    async fn test_lifecycle_emits_events() {
        let runtime = InMemoryRuntime::new();
        let mut events = runtime.subscribe_events(0).await.unwrap();

        let handle = runtime.create_container(&spec("hello")).await.unwrap();
        runtime.start_container(&handle).await.unwrap();
        runtime.kill_container(&handle).await.unwrap();

        runtime.remove_container(&handle).await.unwrap();

        let mut statuses = Vec::new();
        for _ in 0..4 {
            let event = events.next().await.unwrap().unwrap();
            assert_eq!(event.actor_name.as_deref(), Some("hello"));
            if event.status == "die" {
                assert_eq!(event.exit_code, Some(KILLED_EXIT_CODE));
            }
            statuses.push(event.status);
        }
        assert_eq!(statuses, vec!["create", "start", "die", "destroy"]);
        assert_eq!(runtime.calls().await.len(), 4);
        assert_eq!(runtime.container_count().await, 0);
    }

    #[tokio::test]
    async fn test_removed_name_can_be_reused() {
        let runtime = InMemoryRuntime::new();
        let first = runtime.create_container(&spec("db")).await.unwrap();
        runtime.remove_container(&first).await.unwrap();

        let second = runtime.create_container(&spec("db")).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(runtime.container_count().await, 1);
    }

    #[tokio::test]
    async fn test_removing_running_container_kills_it() {
        let runtime = InMemoryRuntime::new();
        let mut events = runtime.subscribe_events(0).await.unwrap();
        let handle = runtime.create_container(&spec("db")).await.unwrap();
        runtime.start_container(&handle).await.unwrap();
        runtime.remove_container(&handle).await.unwrap();

        let mut statuses = Vec::new();
        for _ in 0..4 {
            statuses.push(events.next().await.unwrap().unwrap().status);
        }
        assert_eq!(statuses, vec!["create", "start", "die", "destroy"]);
    }

    #[tokio::test]
    async fn test_kill_of_stopped_container_fails() {
        let runtime = InMemoryRuntime::new();
        let handle = runtime.create_container(&spec("db")).await.unwrap();

        let err = runtime.kill_container(&handle).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Stop { .. }));
    }

    #[tokio::test]
    async fn test_logs_replay_canned_output() {
        let runtime = InMemoryRuntime::new();
        runtime
            .set_logs("hello", [LogLine::stdout("hello world")])
            .await;
        let handle = runtime.create_container(&spec("hello")).await.unwrap();

        let lines: Vec<_> = runtime
            .container_logs(&handle)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(lines, vec![Ok(LogLine::stdout("hello world"))]);

        let unknown = runtime
            .container_logs(&ContainerHandle::new("mem-999999"))
            .await;
        assert!(matches!(unknown, Err(RuntimeError::Logs { .. })));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let runtime = InMemoryRuntime::new();
        runtime.fail_on(CallKind::Create, "db").await;

        let err = runtime.create_container(&spec("db")).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Create { .. }));
        assert_eq!(runtime.call_count(CallKind::Create, "db").await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_name_is_rejected() {
        let runtime = InMemoryRuntime::new();
        runtime.create_container(&spec("db")).await.unwrap();
        assert!(runtime.create_container(&spec("db")).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_handle_fails_start() {
        let runtime = InMemoryRuntime::new();
        let err = runtime
            .start_container(&ContainerHandle::new("mem-999999"))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Start { .. }));
    }

    #[tokio::test]
    async fn test_gate_holds_call_until_opened() {
        let runtime = Arc::new(InMemoryRuntime::new());
        let gate = runtime.hold(CallKind::Create, "db").await;

        let task = {
            let runtime = Arc::clone(&runtime);
            tokio::spawn(async move { runtime.create_container(&spec("db")).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());
        assert_eq!(runtime.max_in_flight("db").await, 1);

        gate.open();
        let handle = task.await.unwrap().unwrap();
        assert!(handle.id().starts_with("mem-"));
    }

    #[tokio::test]
    async fn test_close_and_fail_events() {
        let runtime = InMemoryRuntime::new();
        let mut first = runtime.subscribe_events(0).await.unwrap();
        runtime.close_events().await;
        assert!(first.next().await.is_none());

        let mut second = runtime.subscribe_events(0).await.unwrap();
        runtime.fail_events("daemon went away").await;
        assert!(matches!(
            second.next().await,
            Some(Err(RuntimeError::Events { .. }))
        ));
        assert!(second.next().await.is_none());
        assert_eq!(runtime.subscriber_count().await, 0);
    }
}
