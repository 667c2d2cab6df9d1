//! Instance lifecycle controller.
//!
//! Owns the per-instance state machine and idle clock, starts instances
//! lazily on first forward, and hands every new idle deadline to the
//! backend, which is the only thing that actually suspends anything.
//!
//! State flow:
//! ```text
//!   stopped ──forward──► starting ──ok──► running ◄──renew── idle-pending-sleep
//!      ▲                    │                │                      │
//!      └──────start err─────┘                └──deadline passed─────┘
//!      ▲                                                            │
//!      └───────────────backend suspended (reconcile)────────────────┘
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use keepwarm_core::defaults::{DEFAULT_IDLE_TIMEOUT, DEFAULT_PORT};
use keepwarm_core::{IdleClock, InstanceState, ObjectId, Placement, SingletonKey};
use serde::Serialize;

use crate::backend::{ForwardRequest, ForwardResponse, LifecycleBackend};
use crate::env::EnvVars;
use crate::error::{FailureStage, LifecycleError};
use crate::registry::InstanceRegistry;
use crate::watcher::{ActivitySink, ActivityWatcher, WatchConfig, WatchSession, WatchStatus};

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub idle_timeout: Duration,
    /// Injected into the instance environment as `PORT`.
    pub port: u16,
    /// Passed through verbatim at start.
    pub env: EnvVars,
    pub watch: WatchConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            port: DEFAULT_PORT,
            env: EnvVars::new(),
            watch: WatchConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// InstanceHandle
// ---------------------------------------------------------------------------

struct InstanceRecord {
    state: InstanceState,
    idle: IdleClock,
    last_activity_at: Option<DateTime<Utc>>,
    watch: Option<WatchSession>,
    starts: u32,
}

impl InstanceRecord {
    /// Move to `next` if the transition is legal. Same-state moves are no-ops.
    fn set_state(&mut self, instance: &SingletonKey, next: InstanceState) -> bool {
        if self.state == next {
            return true;
        }
        if !self.state.can_transition_to(next) {
            tracing::warn!(%instance, from = %self.state, to = %next, "refusing illegal state transition");
            return false;
        }
        tracing::debug!(%instance, from = %self.state, to = %next, "instance state changed");
        self.state = next;
        true
    }
}

struct ManagedInstance {
    key: SingletonKey,
    id: ObjectId,
    placement: Placement,
    record: Mutex<InstanceRecord>,
    /// Serializes starts so concurrent forwards share one.
    start_gate: tokio::sync::Mutex<()>,
}

/// Cheap, cloneable reference to one managed instance.
#[derive(Clone)]
pub struct InstanceHandle(Arc<ManagedInstance>);

impl InstanceHandle {
    pub fn new(key: SingletonKey, id: ObjectId, placement: Placement, idle_timeout: Duration) -> Self {
        Self(Arc::new(ManagedInstance {
            key,
            id,
            placement,
            record: Mutex::new(InstanceRecord {
                state: InstanceState::Stopped,
                idle: IdleClock::new(idle_timeout),
                last_activity_at: None,
                watch: None,
                starts: 0,
            }),
            start_gate: tokio::sync::Mutex::new(()),
        }))
    }

    pub fn key(&self) -> &SingletonKey {
        &self.0.key
    }

    pub fn name(&self) -> &str {
        self.0.key.as_str()
    }

    pub fn id(&self) -> &ObjectId {
        &self.0.id
    }

    pub fn placement(&self) -> &Placement {
        &self.0.placement
    }

    pub fn state(&self) -> InstanceState {
        self.record().state
    }

    /// Number of successful starts so far.
    pub fn starts(&self) -> u32 {
        self.record().starts
    }

    /// Both handles point at the same managed instance.
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn record(&self) -> MutexGuard<'_, InstanceRecord> {
        self.0.record.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceHandle")
            .field("key", &self.0.key)
            .field("id", &self.0.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Serializable view of an instance for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceSnapshot {
    pub name: String,
    pub id: ObjectId,
    pub state: InstanceState,
    pub starts: u32,
    pub idle_timeout_ms: u64,
    /// Time left before the backend may suspend the instance.
    pub idle_remaining_ms: Option<u64>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub watch: Option<WatchStatus>,
}

// ---------------------------------------------------------------------------
// InstanceController
// ---------------------------------------------------------------------------

pub struct InstanceController {
    backend: Arc<dyn LifecycleBackend>,
    registry: InstanceRegistry,
    config: ControllerConfig,
}

impl InstanceController {
    pub fn new(backend: Arc<dyn LifecycleBackend>, config: ControllerConfig) -> Arc<Self> {
        Arc::new(Self {
            backend,
            registry: InstanceRegistry::new(),
            config,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    /// Return the handle for `key`, creating it through the backend on first
    /// use. Concurrent first callers share a single creation.
    pub async fn resolve(&self, key: &SingletonKey, placement: &Placement) -> Result<InstanceHandle, LifecycleError> {
        self.registry
            .get_or_create(key, move || async move {
                let id = self.backend.id_from_name(key.as_str());
                self.backend.get(&id, placement).await.map_err(|e| {
                    tracing::error!(instance = %key, %id, "failed to create instance: {e}");
                    LifecycleError::unavailable(key.as_str(), FailureStage::Create, e)
                })?;
                tracing::info!(
                    instance = %key,
                    %id,
                    location_hint = placement.location_hint.as_deref().unwrap_or("-"),
                    "created instance handle"
                );
                Ok::<_, LifecycleError>(InstanceHandle::new(
                    key.clone(),
                    id,
                    placement.clone(),
                    self.config.idle_timeout,
                ))
            })
            .await
    }

    /// Deliver `request`, starting the instance first if it is not running.
    /// The response comes back unmodified. Backend failures are not retried.
    pub async fn forward(
        self: &Arc<Self>,
        handle: &InstanceHandle,
        request: ForwardRequest,
    ) -> Result<ForwardResponse, LifecycleError> {
        self.ensure_started(handle).await?;
        self.renew_idle_timer(handle);

        tracing::debug!(instance = %handle.name(), method = %request.method(), uri = %request.uri(), "forwarding request");
        self.backend.fetch(handle.id(), request).await.map_err(|e| {
            tracing::warn!(instance = %handle.name(), "forward failed: {e}");
            LifecycleError::unavailable(handle.name(), FailureStage::Forward, e)
        })
    }

    /// Push the idle deadline to now + timeout. No-op unless the instance is
    /// running.
    pub fn renew_idle_timer(&self, handle: &InstanceHandle) {
        let now = Instant::now();
        let mut record = handle.record();
        if !record.state.is_live() {
            tracing::debug!(instance = %handle.name(), state = %record.state, "idle renewal ignored; instance not running");
            return;
        }
        if record.state == InstanceState::IdlePendingSleep {
            record.set_state(handle.key(), InstanceState::Running);
        }
        let deadline = record.idle.renew(now);
        record.last_activity_at = Some(Utc::now());
        // Under the record lock so racing renewals reach the backend in order.
        self.backend.renew_activity_timeout(handle.id(), deadline);
    }

    pub fn snapshot(&self, handle: &InstanceHandle) -> InstanceSnapshot {
        let now = Instant::now();
        let record = handle.record();
        InstanceSnapshot {
            name: handle.name().to_owned(),
            id: handle.id().clone(),
            state: record.state,
            starts: record.starts,
            idle_timeout_ms: duration_ms(record.idle.timeout()),
            idle_remaining_ms: record.idle.remaining(now).map(duration_ms),
            last_activity_at: record.last_activity_at,
            watch: record.watch.as_ref().map(WatchSession::status),
        }
    }

    /// Status of the current (or last) watch session, if any was started.
    pub fn watch_status(&self, handle: &InstanceHandle) -> Option<WatchStatus> {
        handle.record().watch.as_ref().map(WatchSession::status)
    }

    async fn ensure_started(self: &Arc<Self>, handle: &InstanceHandle) -> Result<(), LifecycleError> {
        if self.reconcile(handle).is_live() {
            return Ok(());
        }

        let _gate = handle.0.start_gate.lock().await;
        // Another forward may have finished the start while we waited.
        if self.reconcile(handle).is_live() {
            return Ok(());
        }

        // A `Starting` left behind by a cancelled forward is restarted as-is.
        handle.record().set_state(handle.key(), InstanceState::Starting);
        let env = self.config.env.clone().with_port(self.config.port);
        tracing::info!(instance = %handle.name(), id = %handle.id(), port = self.config.port, "starting instance");

        if let Err(e) = self.backend.start(handle.id(), &env).await {
            tracing::error!(instance = %handle.name(), "failed to start instance: {e}");
            handle.record().set_state(handle.key(), InstanceState::Stopped);
            return Err(LifecycleError::unavailable(handle.name(), FailureStage::Start, e));
        }

        {
            let mut record = handle.record();
            record.set_state(handle.key(), InstanceState::Running);
            record.starts += 1;
            let deadline = record.idle.renew(Instant::now());
            record.last_activity_at = Some(Utc::now());
            self.backend.renew_activity_timeout(handle.id(), deadline);
        }
        tracing::info!(instance = %handle.name(), "instance running");

        // Detached; the start above does not wait on it.
        let session = self.watcher().start_watching(handle.clone());
        handle.record().watch = Some(session);
        Ok(())
    }

    /// Bring the recorded state in line with the backend and the idle clock.
    fn reconcile(&self, handle: &InstanceHandle) -> InstanceState {
        let running = self.backend.is_running(handle.id());
        let now = Instant::now();
        let mut record = handle.record();
        if record.state.is_live() && !running {
            tracing::info!(instance = %handle.name(), "instance was suspended by the backend");
            record.set_state(handle.key(), InstanceState::Stopped);
            record.idle.clear();
        } else if record.state == InstanceState::Running && record.idle.is_expired(now) {
            record.set_state(handle.key(), InstanceState::IdlePendingSleep);
        }
        record.state
    }

    fn watcher(self: &Arc<Self>) -> ActivityWatcher {
        let sink: Arc<dyn ActivitySink> = Arc::clone(self) as Arc<dyn ActivitySink>;
        ActivityWatcher::new(Arc::clone(&self.backend), sink, self.config.watch.clone())
    }
}

impl ActivitySink for InstanceController {
    fn record_activity(&self, handle: &InstanceHandle) {
        self.renew_idle_timer(handle);
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> InstanceHandle {
        let key = SingletonKey::global();
        let id = ObjectId::from_name(key.as_str());
        InstanceHandle::new(key, id, Placement::preferred(), Duration::from_secs(600))
    }

    #[test]
    fn new_handle_is_stopped() {
        let h = handle();
        assert_eq!(h.state(), InstanceState::Stopped);
        assert_eq!(h.starts(), 0);
        assert_eq!(h.name(), "cf-singleton-container");
        assert_eq!(h.placement().location_hint.as_deref(), Some("wnam"));
    }

    #[test]
    fn clones_share_instance() {
        let a = handle();
        let b = a.clone();
        assert!(a.same_instance(&b));
        assert!(!a.same_instance(&handle()));
    }

    #[test]
    fn illegal_transition_is_refused() {
        let h = handle();
        let mut record = h.record();
        assert!(!record.set_state(h.key(), InstanceState::Running));
        assert_eq!(record.state, InstanceState::Stopped);
        assert!(record.set_state(h.key(), InstanceState::Starting));
        assert!(record.set_state(h.key(), InstanceState::Starting));
        assert_eq!(record.state, InstanceState::Starting);
    }

    #[test]
    fn default_config_uses_compile_time_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.port, 2633);
        assert_eq!(config.idle_timeout, Duration::from_secs(600));
        assert_eq!(config.watch.event_path, "/global/event");
        assert_eq!(config.watch.reconnect.max_attempts, 0);
    }
}
