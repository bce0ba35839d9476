//! Full reconciliation runs against the in-memory runtime.
//!
//! Each test wires the real pieces together: an `EventWatcher` subscribed to
//! the runtime feeds the reconciler's mailbox while the reconciler drives
//! create, start, kill and remove calls.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use convoy_core::{WorkloadId, WorkloadKind, WorkloadSpec, WorkloadState};
use convoy_events::{DomainEvent, EventWatcher};
use convoy_reconciler::{
    Error, Reconciler, ReconcilerConfig, ReconcilerHandle, Registry, RunReport, Termination,
    Transition,
};
use convoy_runtime::{CallKind, InMemoryRuntime, LogLine, RawEvent};
use tokio::sync::broadcast;
use tokio::time::timeout;

const DEADLINE: Duration = Duration::from_secs(5);

struct Harness {
    runtime: Arc<InMemoryRuntime>,
    reconciler: Reconciler,
    handle: ReconcilerHandle,
}

fn registry(workloads: &[(&str, WorkloadKind)]) -> Registry {
    let mut registry = Registry::new();
    for (name, kind) in workloads {
        registry
            .put(
                WorkloadId::parse(*name).unwrap(),
                *kind,
                WorkloadSpec::new("alpine").with_command(["echo", "hello world"]),
            )
            .unwrap();
    }
    registry
}

async fn harness(registry: Registry, config: ReconcilerConfig) -> Harness {
    harness_on(InMemoryRuntime::new_arc(), registry, config).await
}

async fn harness_on(
    runtime: Arc<InMemoryRuntime>,
    registry: Registry,
    config: ReconcilerConfig,
) -> Harness {
    let watcher = EventWatcher::subscribe(&*runtime).await.unwrap();
    let reconciler = Reconciler::new(registry, runtime.clone(), config);
    let handle = reconciler.handle();
    watcher.spawn(handle.clone());
    Harness {
        runtime,
        reconciler,
        handle,
    }
}

async fn finish(reconciler: Reconciler) -> Result<RunReport, Error> {
    timeout(DEADLINE, reconciler.run())
        .await
        .expect("run did not terminate")
}

async fn wait_for(
    transitions: &mut broadcast::Receiver<Transition>,
    workload: &str,
    to: WorkloadState,
) {
    timeout(DEADLINE, async {
        loop {
            let transition = transitions.recv().await.unwrap();
            if transition.workload.as_str() == workload && transition.to == to {
                return;
            }
        }
    })
    .await
    .expect("transition not observed");
}

#[tokio::test]
async fn test_hello_driver_walks_the_full_lifecycle() {
    let harness = harness(
        registry(&[("hello", WorkloadKind::Driver)]),
        ReconcilerConfig::default(),
    )
    .await;

    let report = finish(harness.reconciler).await.unwrap();

    assert_eq!(report.termination, Termination::Quiescent);
    assert_eq!(report.exit_code(), 0);

    let hello = report.workload("hello").unwrap();
    assert_eq!(
        hello.history(),
        &[
            WorkloadState::New,
            WorkloadState::Creating,
            WorkloadState::Created,
            WorkloadState::Starting,
            WorkloadState::Started,
            WorkloadState::Running,
            WorkloadState::Stopping,
            WorkloadState::Stopped,
        ]
    );
    assert!(hello.container().is_none());

    let runtime = harness.runtime;
    assert_eq!(runtime.call_count(CallKind::Create, "hello").await, 1);
    assert_eq!(runtime.call_count(CallKind::Start, "hello").await, 1);
    assert_eq!(runtime.call_count(CallKind::Kill, "hello").await, 1);
    assert_eq!(runtime.call_count(CallKind::Remove, "hello").await, 1);
    assert_eq!(runtime.container_count().await, 0);
}

#[tokio::test]
async fn test_died_while_starting_is_not_resurrected() {
    let harness = harness(
        registry(&[("db", WorkloadKind::Service)]),
        ReconcilerConfig::default(),
    )
    .await;
    let runtime = harness.runtime;
    let gate = runtime.hold(CallKind::Start, "db").await;
    let mut transitions = harness.reconciler.subscribe_transitions();

    let run = tokio::spawn(finish(harness.reconciler));

    wait_for(&mut transitions, "db", WorkloadState::Starting).await;
    runtime.emit(RawEvent::new("die", "db")).await;
    wait_for(&mut transitions, "db", WorkloadState::Stopped).await;
    gate.open();

    let report = run.await.unwrap().unwrap();
    let db = report.workload("db").unwrap();

    assert_eq!(db.state(), WorkloadState::Stopped);
    assert_eq!(
        db.history(),
        &[
            WorkloadState::New,
            WorkloadState::Creating,
            WorkloadState::Created,
            WorkloadState::Starting,
            WorkloadState::Stopped,
        ]
    );
    assert_eq!(runtime.call_count(CallKind::Kill, "db").await, 0);
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn test_independent_workloads_reach_quiescence_together() {
    let harness = harness(
        registry(&[
            ("db", WorkloadKind::Service),
            ("web", WorkloadKind::Service),
            ("migrate", WorkloadKind::Driver),
        ]),
        ReconcilerConfig::default(),
    )
    .await;

    let report = finish(harness.reconciler).await.unwrap();

    assert_eq!(report.termination, Termination::Quiescent);
    assert!(report
        .workloads
        .iter()
        .all(|w| w.state() == WorkloadState::Stopped));

    for name in ["db", "web", "migrate"] {
        assert_eq!(harness.runtime.call_count(CallKind::Create, name).await, 1);
        assert_eq!(harness.runtime.call_count(CallKind::Start, name).await, 1);
        assert_eq!(harness.runtime.call_count(CallKind::Kill, name).await, 1);
        assert!(harness.runtime.max_in_flight(name).await <= 1);
    }
}

#[tokio::test]
async fn test_shutdown_waits_for_slow_workloads() {
    let harness = harness(
        registry(&[("db", WorkloadKind::Service), ("web", WorkloadKind::Service)]),
        ReconcilerConfig::default(),
    )
    .await;
    let runtime = harness.runtime;
    let gate = runtime.hold(CallKind::Create, "db").await;
    let mut transitions = harness.reconciler.subscribe_transitions();

    let run = tokio::spawn(finish(harness.reconciler));

    wait_for(&mut transitions, "web", WorkloadState::Running).await;
    // web sits in Running while db's create is held.
    assert_eq!(runtime.call_count(CallKind::Kill, "web").await, 0);
    gate.open();

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.exit_code(), 0);
    assert_eq!(runtime.call_count(CallKind::Kill, "web").await, 1);
    assert_eq!(runtime.call_count(CallKind::Kill, "db").await, 1);
}

#[tokio::test]
async fn test_died_event_for_unknown_container_is_ignored() {
    let harness = harness(
        registry(&[("hello", WorkloadKind::Driver)]),
        ReconcilerConfig::default(),
    )
    .await;
    assert!(harness.handle.event(DomainEvent::died("ghost")));
    harness.runtime.emit(RawEvent::new("die", "other-project")).await;

    let report = finish(harness.reconciler).await.unwrap();

    assert_eq!(report.exit_code(), 0);
    assert!(report.workload("ghost").is_none());
    assert_eq!(
        report.workload("hello").unwrap().state(),
        WorkloadState::Stopped
    );
}

#[tokio::test]
async fn test_create_failure_marks_workload_failed() {
    let harness = harness(
        registry(&[("db", WorkloadKind::Service), ("web", WorkloadKind::Service)]),
        ReconcilerConfig::default(),
    )
    .await;
    harness.runtime.fail_on(CallKind::Create, "db").await;

    let report = finish(harness.reconciler).await.unwrap();

    assert_eq!(report.termination, Termination::Quiescent);
    assert_eq!(report.workload("db").unwrap().state(), WorkloadState::Failed);
    assert_eq!(report.workload("web").unwrap().state(), WorkloadState::Stopped);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(harness.runtime.call_count(CallKind::Start, "db").await, 0);
}

#[tokio::test]
async fn test_fail_fast_aborts_the_run() {
    let harness = harness(
        registry(&[("db", WorkloadKind::Service)]),
        ReconcilerConfig {
            fail_fast: true,
            ..ReconcilerConfig::default()
        },
    )
    .await;
    harness.runtime.fail_on(CallKind::Start, "db").await;

    let err = finish(harness.reconciler).await.unwrap_err();

    assert!(matches!(err, Error::Runtime { ref workload, .. } if workload == "db"));
    // Cleanup still runs on the error path.
    assert_eq!(harness.runtime.container_count().await, 0);
}

#[tokio::test]
async fn test_event_stream_end_terminates_run() {
    let harness = harness(
        registry(&[("db", WorkloadKind::Service)]),
        ReconcilerConfig::default(),
    )
    .await;
    let runtime = harness.runtime;
    let _gate = runtime.hold(CallKind::Create, "db").await;
    let mut transitions = harness.reconciler.subscribe_transitions();

    let run = tokio::spawn(finish(harness.reconciler));
    wait_for(&mut transitions, "db", WorkloadState::Creating).await;
    runtime.close_events().await;

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.termination, Termination::EventStreamClosed);
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn test_event_stream_failure_is_fatal() {
    let harness = harness(
        registry(&[("db", WorkloadKind::Service)]),
        ReconcilerConfig::default(),
    )
    .await;
    let runtime = harness.runtime;
    let _gate = runtime.hold(CallKind::Create, "db").await;
    let mut transitions = harness.reconciler.subscribe_transitions();

    let run = tokio::spawn(finish(harness.reconciler));
    wait_for(&mut transitions, "db", WorkloadState::Creating).await;
    runtime.fail_events("connection reset by peer").await;

    let err = run.await.unwrap().unwrap_err();
    assert!(
        matches!(err, Error::EventStream { ref reason } if reason.contains("connection reset"))
    );
}

#[tokio::test]
async fn test_interrupt_before_creation_withdraws_everything() {
    let harness = harness(
        registry(&[("db", WorkloadKind::Service), ("hello", WorkloadKind::Driver)]),
        ReconcilerConfig::default(),
    )
    .await;
    assert!(harness.handle.interrupt());

    let report = finish(harness.reconciler).await.unwrap();

    assert_eq!(report.exit_code(), 0);
    for workload in &report.workloads {
        assert_eq!(
            workload.history(),
            &[WorkloadState::New, WorkloadState::Stopped]
        );
    }
    assert!(harness.runtime.calls().await.is_empty());
}

#[tokio::test]
async fn test_interrupt_lets_in_flight_workloads_finish_and_stop() {
    let harness = harness(
        registry(&[("db", WorkloadKind::Service)]),
        ReconcilerConfig::default(),
    )
    .await;
    let runtime = harness.runtime;
    let gate = runtime.hold(CallKind::Start, "db").await;
    let mut transitions = harness.reconciler.subscribe_transitions();
    let handle = harness.handle;

    let run = tokio::spawn(finish(harness.reconciler));
    wait_for(&mut transitions, "db", WorkloadState::Starting).await;
    assert!(handle.interrupt());
    gate.open();

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.workload("db").unwrap().state(), WorkloadState::Stopped);
    assert_eq!(runtime.call_count(CallKind::Kill, "db").await, 1);
}

#[tokio::test]
async fn test_second_interrupt_aborts() {
    let harness = harness(
        registry(&[("db", WorkloadKind::Service)]),
        ReconcilerConfig::default(),
    )
    .await;
    assert!(harness.handle.interrupt());
    assert!(harness.handle.interrupt());

    let err = finish(harness.reconciler).await.unwrap_err();
    assert!(matches!(err, Error::Interrupted));
}

#[tokio::test]
async fn test_death_after_failure_keeps_workload_failed() {
    let harness = harness(
        registry(&[("db", WorkloadKind::Service), ("web", WorkloadKind::Service)]),
        ReconcilerConfig::default(),
    )
    .await;
    let runtime = harness.runtime;
    runtime.fail_on(CallKind::Start, "db").await;
    let gate = runtime.hold(CallKind::Create, "web").await;
    let mut transitions = harness.reconciler.subscribe_transitions();

    let run = tokio::spawn(finish(harness.reconciler));
    wait_for(&mut transitions, "db", WorkloadState::Failed).await;
    assert!(harness.handle.event(DomainEvent::exited("db", 1)));
    gate.open();

    let report = run.await.unwrap().unwrap();
    let db = report.workload("db").unwrap();
    assert_eq!(db.state(), WorkloadState::Failed);
    assert_eq!(db.history().last(), Some(&WorkloadState::Failed));
    assert_eq!(report.exit_code(), 1);
}

async fn run_with_start_failing_after_death(fail_fast: bool) -> RunReport {
    let harness = harness(
        registry(&[("db", WorkloadKind::Service)]),
        ReconcilerConfig {
            fail_fast,
            ..ReconcilerConfig::default()
        },
    )
    .await;
    let runtime = harness.runtime;
    runtime.fail_on(CallKind::Start, "db").await;
    let gate = runtime.hold(CallKind::Start, "db").await;
    let mut transitions = harness.reconciler.subscribe_transitions();

    let run = tokio::spawn(finish(harness.reconciler));
    wait_for(&mut transitions, "db", WorkloadState::Starting).await;
    runtime.emit(RawEvent::new("die", "db")).await;
    wait_for(&mut transitions, "db", WorkloadState::Stopped).await;
    gate.open();

    run.await.unwrap().unwrap()
}

#[tokio::test]
async fn test_start_failure_after_death_is_recorded_in_both_modes() {
    for fail_fast in [false, true] {
        let report = run_with_start_failing_after_death(fail_fast).await;
        let db = report.workload("db").unwrap();

        assert_eq!(db.state(), WorkloadState::Stopped, "fail_fast={fail_fast}");
        assert!(db.error().unwrap().contains("injected failure"));
        assert_eq!(report.exit_code(), 0);
    }
}

#[tokio::test]
async fn test_kill_failure_after_death_does_not_abort_fail_fast_run() {
    let harness = harness(
        registry(&[("db", WorkloadKind::Service)]),
        ReconcilerConfig {
            fail_fast: true,
            ..ReconcilerConfig::default()
        },
    )
    .await;
    let runtime = harness.runtime;
    runtime.fail_on(CallKind::Kill, "db").await;
    let gate = runtime.hold(CallKind::Kill, "db").await;
    let mut transitions = harness.reconciler.subscribe_transitions();

    let run = tokio::spawn(finish(harness.reconciler));
    wait_for(&mut transitions, "db", WorkloadState::Stopping).await;
    runtime
        .emit(RawEvent::new("die", "db").with_exit_code(137))
        .await;
    wait_for(&mut transitions, "db", WorkloadState::Stopped).await;
    gate.open();

    let report = run.await.unwrap().unwrap();
    let db = report.workload("db").unwrap();
    assert_eq!(db.state(), WorkloadState::Stopped);
    assert_eq!(db.exit_code(), None);
    assert!(db.error().unwrap().contains("injected failure"));
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn test_died_while_creating_leaves_late_container_unattached() {
    let harness = harness(
        registry(&[("db", WorkloadKind::Service)]),
        ReconcilerConfig::default(),
    )
    .await;
    let runtime = harness.runtime;
    let gate = runtime.hold(CallKind::Create, "db").await;
    let mut transitions = harness.reconciler.subscribe_transitions();

    let run = tokio::spawn(finish(harness.reconciler));
    wait_for(&mut transitions, "db", WorkloadState::Creating).await;
    runtime.emit(RawEvent::new("die", "db")).await;
    wait_for(&mut transitions, "db", WorkloadState::Stopped).await;
    gate.open();

    let report = run.await.unwrap().unwrap();
    let db = report.workload("db").unwrap();
    assert_eq!(
        db.history(),
        &[
            WorkloadState::New,
            WorkloadState::Creating,
            WorkloadState::Stopped
        ]
    );
    assert!(db.container().is_none());
    assert_eq!(runtime.call_count(CallKind::Start, "db").await, 0);
    assert_eq!(runtime.call_count(CallKind::Remove, "db").await, 1);
    assert_eq!(runtime.container_count().await, 0);
}

#[tokio::test]
async fn test_second_run_reuses_container_names() {
    let runtime = InMemoryRuntime::new_arc();

    for _ in 0..2 {
        let harness = harness_on(
            runtime.clone(),
            registry(&[("db", WorkloadKind::Service)]),
            ReconcilerConfig::default(),
        )
        .await;
        let report = finish(harness.reconciler).await.unwrap();

        assert_eq!(report.exit_code(), 0);
        assert_eq!(runtime.container_count().await, 0);
    }
    assert_eq!(runtime.call_count(CallKind::Create, "db").await, 2);
    assert_eq!(runtime.call_count(CallKind::Remove, "db").await, 2);
}

#[tokio::test]
async fn test_keep_containers_skips_cleanup() {
    let harness = harness(
        registry(&[("hello", WorkloadKind::Driver)]),
        ReconcilerConfig {
            keep_containers: true,
            ..ReconcilerConfig::default()
        },
    )
    .await;

    let report = finish(harness.reconciler).await.unwrap();

    assert_eq!(report.exit_code(), 0);
    assert_eq!(harness.runtime.call_count(CallKind::Remove, "hello").await, 0);
    assert_eq!(harness.runtime.container_count().await, 1);
}

#[tokio::test]
async fn test_abnormal_driver_exit_fails_the_run() {
    let harness = harness(
        registry(&[("db", WorkloadKind::Service), ("hello", WorkloadKind::Driver)]),
        ReconcilerConfig::default(),
    )
    .await;
    let runtime = harness.runtime;
    let gate = runtime.hold(CallKind::Create, "db").await;
    let mut transitions = harness.reconciler.subscribe_transitions();

    let run = tokio::spawn(finish(harness.reconciler));
    wait_for(&mut transitions, "hello", WorkloadState::Running).await;
    runtime
        .emit(RawEvent::new("die", "hello").with_exit_code(3))
        .await;
    wait_for(&mut transitions, "hello", WorkloadState::Stopped).await;
    gate.open();

    let report = run.await.unwrap().unwrap();
    let hello = report.workload("hello").unwrap();
    assert_eq!(hello.state(), WorkloadState::Stopped);
    assert_eq!(hello.exit_code(), Some(3));
    assert_eq!(report.failed().count(), 0);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(runtime.call_count(CallKind::Kill, "hello").await, 0);
}

#[tokio::test]
async fn test_followed_logs_reach_subscribers() {
    let harness = harness(
        registry(&[("hello", WorkloadKind::Driver)]),
        ReconcilerConfig {
            follow_logs: true,
            ..ReconcilerConfig::default()
        },
    )
    .await;
    harness
        .runtime
        .set_logs(
            "hello",
            [LogLine::stdout("hello world"), LogLine::stderr("bye")],
        )
        .await;
    let mut logs = harness.reconciler.subscribe_logs();

    finish(harness.reconciler).await.unwrap();

    let first = logs.try_recv().unwrap();
    assert_eq!(first.workload.as_str(), "hello");
    assert_eq!(first.line, LogLine::stdout("hello world"));
    assert_eq!(logs.try_recv().unwrap().line, LogLine::stderr("bye"));
}

#[tokio::test]
async fn test_logs_are_not_followed_by_default() {
    let harness = harness(
        registry(&[("hello", WorkloadKind::Driver)]),
        ReconcilerConfig::default(),
    )
    .await;
    harness
        .runtime
        .set_logs("hello", [LogLine::stdout("hello world")])
        .await;
    let mut logs = harness.reconciler.subscribe_logs();

    finish(harness.reconciler).await.unwrap();

    assert!(logs.try_recv().is_err());
}
