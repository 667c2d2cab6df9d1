//! Local process backend: one child process per instance, reachable over
//! HTTP on a fixed loopback port.
//!
//! Each running child gets a reaper task that sleeps until the current idle
//! deadline and kills the child when it passes unrenewed. Renewals move the
//! deadline through a `watch` channel, so the reaper always acts on the
//! latest one.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use keepwarm_core::defaults::DEFAULT_PORT;
use keepwarm_core::{ObjectId, Placement};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{EventByteStream, ForwardRequest, ForwardResponse, LifecycleBackend};
use crate::env::EnvVars;
use crate::error::BackendError;
use crate::fabric;

pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on connect plus the wait for a response head from the child.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// What to run and where it listens.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub program: String,
    pub args: Vec<String>,
    pub host: IpAddr,
    pub port: u16,
    pub startup_timeout: Duration,
    pub response_timeout: Duration,
}

impl ProcessConfig {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

struct RunningProcess {
    alive: Arc<AtomicBool>,
    /// Dropping the sender makes the reaper kill the child.
    deadline: watch::Sender<Option<Instant>>,
    reaper: JoinHandle<()>,
}

#[derive(Default)]
struct Slot {
    running: Option<RunningProcess>,
}

pub struct ProcessBackend {
    config: ProcessConfig,
    slots: Mutex<HashMap<ObjectId, Slot>>,
    shutdown: CancellationToken,
}

impl ProcessBackend {
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            slots: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// Kill every child and wait for the reapers to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let reapers: Vec<JoinHandle<()>> = {
            let mut slots = self.slots();
            slots
                .values_mut()
                .filter_map(|slot| slot.running.take())
                .map(|p| p.reaper)
                .collect()
        };
        for reaper in reapers {
            let _ = reaper.await;
        }
        tracing::info!("process backend shut down");
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<ObjectId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_running(&self, id: &ObjectId) -> Result<SocketAddr, BackendError> {
        let slots = self.slots();
        let slot = slots.get(id).ok_or_else(|| BackendError::UnknownInstance(id.clone()))?;
        match &slot.running {
            Some(p) if p.alive.load(Ordering::SeqCst) => Ok(self.config.addr()),
            _ => Err(BackendError::NotRunning(id.clone())),
        }
    }

    fn spawn_child(&self, env: &EnvVars) -> Result<Child, BackendError> {
        Command::new(&self.config.program)
            .args(&self.config.args)
            .env_clear()
            .envs(env.iter())
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackendError::StartFailed(format!("spawning {}: {e}", self.config.program)))
    }

    /// Poll until the child accepts TCP on its port, exits, or the startup
    /// timeout passes.
    async fn wait_ready(&self, child: &mut Child) -> Result<(), BackendError> {
        let addr = self.config.addr();
        let deadline = tokio::time::Instant::now() + self.config.startup_timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Err(BackendError::StartFailed(format!(
                    "{} exited during startup ({status})",
                    self.config.program
                )));
            }
            if TcpStream::connect(addr).await.is_ok() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BackendError::StartupTimeout {
                    port: self.config.port,
                    timeout: self.config.startup_timeout,
                });
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl LifecycleBackend for ProcessBackend {
    fn id_from_name(&self, name: &str) -> ObjectId {
        ObjectId::from_name(name)
    }

    async fn get(&self, id: &ObjectId, placement: &Placement) -> Result<(), BackendError> {
        let mut slots = self.slots();
        if !slots.contains_key(id) {
            tracing::info!(
                %id,
                location_hint = placement.location_hint.as_deref().unwrap_or("-"),
                "registered instance slot"
            );
            slots.insert(id.clone(), Slot::default());
        }
        Ok(())
    }

    async fn start(&self, id: &ObjectId, env: &EnvVars) -> Result<(), BackendError> {
        {
            let slots = self.slots();
            let slot = slots.get(id).ok_or_else(|| BackendError::UnknownInstance(id.clone()))?;
            if slot.running.as_ref().is_some_and(|p| p.alive.load(Ordering::SeqCst)) {
                return Ok(());
            }
        }

        let mut child = self.spawn_child(env)?;
        tracing::info!(%id, pid = child.id(), program = %self.config.program, "spawned instance process");

        if let Err(e) = self.wait_ready(&mut child).await {
            if let Err(kill_err) = child.kill().await {
                tracing::debug!(%id, "kill after failed startup: {kill_err}");
            }
            return Err(e);
        }

        let alive = Arc::new(AtomicBool::new(true));
        let (tx, rx) = watch::channel(None);
        let reaper = tokio::spawn(reap(
            child,
            rx,
            self.shutdown.child_token(),
            Arc::clone(&alive),
            id.clone(),
        ));

        let mut slots = self.slots();
        let slot = slots.entry(id.clone()).or_default();
        slot.running = Some(RunningProcess {
            alive,
            deadline: tx,
            reaper,
        });
        Ok(())
    }

    fn is_running(&self, id: &ObjectId) -> bool {
        self.slots()
            .get(id)
            .and_then(|slot| slot.running.as_ref())
            .is_some_and(|p| p.alive.load(Ordering::SeqCst))
    }

    async fn fetch(&self, id: &ObjectId, request: ForwardRequest) -> Result<ForwardResponse, BackendError> {
        let addr = self.ensure_running(id)?;
        fabric::send(addr, request, self.config.response_timeout).await
    }

    async fn open_event_stream(&self, id: &ObjectId, path: &str) -> Result<EventByteStream, BackendError> {
        let addr = self.ensure_running(id)?;
        fabric::open_stream(addr, path, self.config.response_timeout).await
    }

    fn renew_activity_timeout(&self, id: &ObjectId, deadline: Instant) {
        let slots = self.slots();
        if let Some(p) = slots.get(id).and_then(|slot| slot.running.as_ref()) {
            p.deadline.send_replace(Some(deadline));
        }
    }
}

/// Wait on the child and kill it at the idle deadline.
async fn reap(
    mut child: Child,
    mut deadline: watch::Receiver<Option<Instant>>,
    stop: CancellationToken,
    alive: Arc<AtomicBool>,
    id: ObjectId,
) {
    loop {
        let current = *deadline.borrow_and_update();
        let expire = async move {
            match current {
                Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            status = child.wait() => {
                match status {
                    Ok(status) => tracing::info!(%id, %status, "instance process exited"),
                    Err(e) => tracing::warn!(%id, "waiting on instance process failed: {e}"),
                }
                break;
            }
            changed = deadline.changed() => {
                if changed.is_err() {
                    tracing::debug!(%id, "instance slot released; stopping process");
                    kill(&mut child, &id).await;
                    break;
                }
            }
            () = expire => {
                tracing::info!(%id, "idle timeout reached; suspending instance");
                kill(&mut child, &id).await;
                break;
            }
            () = stop.cancelled() => {
                kill(&mut child, &id).await;
                break;
            }
        }
    }
    alive.store(false, Ordering::SeqCst);
}

async fn kill(child: &mut Child, id: &ObjectId) {
    if let Err(e) = child.kill().await {
        tracing::warn!(%id, "failed to kill instance process: {e}");
    }
}
