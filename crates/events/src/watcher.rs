//! Runtime event watcher.
//!
//! Holds one long-lived subscription to the runtime's event feed, translates
//! raw events into [`DomainEvent`]s and pushes them, one at a time and in
//! feed order, into an [`EventSink`]. Delivery never waits for the sink to
//! react.
//!
//! There is no reconnect: the end of the feed and a transport error are both
//! reported to the sink as the watcher's final word.

use chrono::Utc;
use convoy_runtime::{EventStream, RuntimeClient, RuntimeError};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

use crate::event::DomainEvent;

/// How a watcher finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The runtime closed the feed.
    StreamEnded,
    /// The feed reported a transport error.
    StreamFailed { reason: String },
    /// The sink stopped accepting events.
    SinkClosed,
}

/// Receiver of translated events.
pub trait EventSink: Send + Sync {
    /// Hand over one event without blocking. Returns `false` once the sink
    /// no longer accepts events.
    fn deliver(&self, event: DomainEvent) -> bool;

    /// Called once when the feed ends or fails.
    fn finish(&self, outcome: &WatchOutcome);
}

/// Watcher over one event subscription.
pub struct EventWatcher {
    stream: EventStream,
    since: i64,
}

impl EventWatcher {
    /// Subscribe to the runtime's feed starting now.
    ///
    /// # Errors
    ///
    /// Returns the runtime's error if the subscription cannot be opened.
    pub async fn subscribe(runtime: &dyn RuntimeClient) -> Result<Self, RuntimeError> {
        Self::subscribe_since(runtime, Utc::now().timestamp()).await
    }

    /// Subscribe to the runtime's feed starting at `since` (epoch seconds).
    ///
    /// # Errors
    ///
    /// Returns the runtime's error if the subscription cannot be opened.
    pub async fn subscribe_since(
        runtime: &dyn RuntimeClient,
        since: i64,
    ) -> Result<Self, RuntimeError> {
        let stream = runtime.subscribe_events(since).await?;
        debug!(since, "Subscribed to runtime events");
        Ok(Self { stream, since })
    }

    /// Wrap an already open stream.
    pub fn from_stream(stream: EventStream) -> Self {
        Self {
            stream,
            since: Utc::now().timestamp(),
        }
    }

    /// Start of the subscription, in epoch seconds.
    pub const fn since(&self) -> i64 {
        self.since
    }

    /// Pump the feed into `sink` until it ends, fails or the sink closes.
    pub async fn run<S: EventSink + ?Sized>(mut self, sink: &S) -> WatchOutcome {
        while let Some(item) = self.stream.next().await {
            let raw = match item {
                Ok(raw) => raw,
                Err(e) => {
                    error!(error = %e, "Runtime event stream failed");
                    let outcome = WatchOutcome::StreamFailed {
                        reason: e.to_string(),
                    };
                    sink.finish(&outcome);
                    return outcome;
                }
            };

            match DomainEvent::translate(&raw) {
                Ok(Some(event)) => {
                    trace!(event = %event, "Delivering event");
                    if !sink.deliver(event) {
                        debug!("Event sink closed, stopping watcher");
                        return WatchOutcome::SinkClosed;
                    }
                }
                Ok(None) => trace!(status = %raw.status, "Ignoring event"),
                Err(e) => debug!(error = %e, "Dropping malformed event"),
            }
        }

        info!("Runtime event stream ended");
        let outcome = WatchOutcome::StreamEnded;
        sink.finish(&outcome);
        outcome
    }

    /// Run the watcher on its own task.
    pub fn spawn<S: EventSink + 'static>(self, sink: S) -> JoinHandle<WatchOutcome> {
        tokio::spawn(async move { self.run(&sink).await })
    }
}
