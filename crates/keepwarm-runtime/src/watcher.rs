//! Activity watcher: a detached background task that reads the instance's
//! event stream and renews the idle timer on activity.
//!
//! ```text
//! start_watching(handle) ──spawn──► loop {
//!                                    open GET /global/event
//!                                    for each decoded event:
//!                                      session.updated ─► sink.record_activity()
//!                                      anything else   ─► log only
//!                                    EOF   ─► Ended  (no reconnect)
//!                                    error ─► Failed (or bounded reconnect)
//!                                  }
//! ```
//!
//! Nothing here ever reaches the request path: errors are logged and end
//! the session. There is no external cancellation; the task ends when its
//! stream does.

use std::sync::{Arc, Mutex, PoisonError};

use futures_util::StreamExt;
use keepwarm_core::defaults::EVENT_PATH;
use keepwarm_core::{Activity, Event, EventClassifier, ReconnectPolicy};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::backend::LifecycleBackend;
use crate::controller::InstanceHandle;
use crate::error::WatchError;
use crate::stream::{Decoded, decode_events};

/// Receives activity signals from the watcher.
///
/// Called inline from the decode loop, so it must be O(1) and never block.
pub trait ActivitySink: Send + Sync + 'static {
    fn record_activity(&self, handle: &InstanceHandle);
}

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub event_path: String,
    pub classifier: EventClassifier,
    pub reconnect: ReconnectPolicy,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            event_path: EVENT_PATH.to_owned(),
            classifier: EventClassifier::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchPhase {
    #[default]
    Connecting,
    Streaming,
    /// Stream reached EOF.
    Ended,
    /// Connection or read error; see `error`.
    Failed,
}

impl WatchPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::Failed)
    }
}

/// Diagnostic view of one watch session.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct WatchStatus {
    pub phase: WatchPhase,
    pub events: u64,
    pub renewals: u64,
    /// Malformed records skipped.
    pub dropped: u64,
    pub reconnects: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

type SharedStatus = Arc<Mutex<WatchStatus>>;

fn update(status: &SharedStatus, f: impl FnOnce(&mut WatchStatus)) {
    let mut guard = status.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard);
}

/// The in-flight background task and its outcome. Diagnostics only.
#[derive(Debug)]
pub struct WatchSession {
    status: SharedStatus,
    task: JoinHandle<()>,
}

impl WatchSession {
    pub fn status(&self) -> WatchStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[derive(Clone)]
pub struct ActivityWatcher {
    backend: Arc<dyn LifecycleBackend>,
    sink: Arc<dyn ActivitySink>,
    config: WatchConfig,
}

impl ActivityWatcher {
    pub fn new(
        backend: Arc<dyn LifecycleBackend>,
        sink: Arc<dyn ActivitySink>,
        config: WatchConfig,
    ) -> Self {
        Self {
            backend,
            sink,
            config,
        }
    }

    /// Spawn the watch loop for `handle` and return immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_watching(&self, handle: InstanceHandle) -> WatchSession {
        let status = SharedStatus::default();
        let task = tokio::spawn(self.clone().run(handle, Arc::clone(&status)));
        WatchSession { status, task }
    }

    async fn run(self, handle: InstanceHandle, status: SharedStatus) {
        let mut attempt = 0u32;
        loop {
            match self.watch_once(&handle, &status).await {
                Ok(()) => {
                    tracing::info!(instance = %handle.name(), "event stream ended");
                    update(&status, |s| s.phase = WatchPhase::Ended);
                    return;
                }
                Err(e) => {
                    tracing::error!(instance = %handle.name(), "event stream connection error: {e}");
                    attempt += 1;
                    if !self.config.reconnect.allows(attempt) || !self.backend.is_running(handle.id()) {
                        update(&status, |s| {
                            s.phase = WatchPhase::Failed;
                            s.error = Some(e.to_string());
                        });
                        return;
                    }
                    let delay = self.config.reconnect.delay_for(attempt);
                    tracing::info!(
                        instance = %handle.name(),
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "reconnecting to event stream"
                    );
                    update(&status, |s| s.reconnects = attempt);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One watch session: open, drain until EOF or error.
    async fn watch_once(&self, handle: &InstanceHandle, status: &SharedStatus) -> Result<(), WatchError> {
        update(status, |s| s.phase = WatchPhase::Connecting);
        let body = self
            .backend
            .open_event_stream(handle.id(), &self.config.event_path)
            .await
            .map_err(WatchError::Connect)?;

        update(status, |s| s.phase = WatchPhase::Streaming);
        tracing::info!(instance = %handle.name(), path = %self.config.event_path, "watching instance events");

        let mut events = Box::pin(decode_events(body));
        while let Some(item) = events.next().await {
            match item? {
                Decoded::Event(event) => self.on_event(handle, &event, status),
                Decoded::Malformed(err) => {
                    tracing::debug!(instance = %handle.name(), "skipping malformed event record: {err}");
                    update(status, |s| s.dropped += 1);
                }
            }
        }
        Ok(())
    }

    fn on_event(&self, handle: &InstanceHandle, event: &Event, status: &SharedStatus) {
        let activity = self.config.classifier.classify(event);
        if activity == Activity::Renew {
            self.sink.record_activity(handle);
            tracing::info!(instance = %handle.name(), "renewed instance activity timeout");
        }
        match activity {
            Activity::Quiet => {
                tracing::trace!(
                    instance = %handle.name(),
                    kind = %event.kind,
                    activity = activity.as_str(),
                    "instance event"
                );
            }
            Activity::Renew | Activity::Observe => {
                tracing::info!(
                    instance = %handle.name(),
                    kind = %event.kind,
                    activity = activity.as_str(),
                    payload = %event.payload,
                    "instance event"
                );
            }
        }
        update(status, |s| {
            s.events += 1;
            if activity == Activity::Renew {
                s.renewals += 1;
            }
        });
    }
}
