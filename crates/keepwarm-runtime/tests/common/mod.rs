//! In-memory lifecycle backend shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use keepwarm_core::{ObjectId, Placement};
use keepwarm_runtime::backend::{EventByteStream, ForwardRequest, ForwardResponse, full_body};
use keepwarm_runtime::{
    ActivitySink, BackendError, ControllerConfig, EnvVars, InstanceController, InstanceHandle, LifecycleBackend,
};
use tokio::sync::mpsc;

/// What the next `open_event_stream` call returns.
pub enum StreamScript {
    /// These chunks, then EOF.
    Body(Vec<Bytes>),
    /// Chunks pushed by the test; EOF when the sender is dropped.
    Live(mpsc::UnboundedReceiver<io::Result<Bytes>>),
    /// Connection refused.
    Refuse,
}

#[derive(Default)]
pub struct MockBackend {
    pub gets: AtomicUsize,
    pub starts: AtomicUsize,
    pub fetches: AtomicUsize,
    pub streams_opened: AtomicUsize,
    pub fail_get: AtomicBool,
    pub fail_start: AtomicBool,
    pub fail_fetch: AtomicBool,
    running: AtomicBool,
    delay: Mutex<Duration>,
    scripts: Mutex<VecDeque<StreamScript>>,
    deadlines: Mutex<Vec<Instant>>,
    envs: Mutex<Vec<EnvVars>>,
    ops: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Delay applied to `get` and `start`, widening race windows.
    pub fn with_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.delay.lock().unwrap() = delay;
        self
    }

    pub fn script(&self, script: StreamScript) {
        self.scripts.lock().unwrap().push_back(script);
    }

    /// Script a body made of SSE `data:` records for these payloads.
    pub fn script_events(&self, payloads: &[&str]) {
        let body = payloads
            .iter()
            .map(|p| Bytes::from(format!("data: {p}\n\n")))
            .collect();
        self.script(StreamScript::Body(body));
    }

    /// Open a live stream the test can push into.
    pub fn script_live(&self) -> mpsc::UnboundedSender<io::Result<Bytes>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.script(StreamScript::Live(rx));
        tx
    }

    /// The backend enforced the idle timeout behind the controller's back.
    pub fn suspend(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.ops.lock().unwrap().push("suspend".into());
    }

    pub fn deadlines(&self) -> Vec<Instant> {
        self.deadlines.lock().unwrap().clone()
    }

    pub fn envs(&self) -> Vec<EnvVars> {
        self.envs.lock().unwrap().clone()
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn delay(&self) -> Duration {
        *self.delay.lock().unwrap()
    }
}

#[async_trait]
impl LifecycleBackend for MockBackend {
    fn id_from_name(&self, name: &str) -> ObjectId {
        ObjectId::from_name(name)
    }

    async fn get(&self, _id: &ObjectId, placement: &Placement) -> Result<(), BackendError> {
        tokio::time::sleep(self.delay()).await;
        self.gets.fetch_add(1, Ordering::SeqCst);
        let hint = placement.location_hint.clone().unwrap_or_default();
        self.ops.lock().unwrap().push(format!("get {hint}"));
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(BackendError::Transport("placement unavailable".into()));
        }
        Ok(())
    }

    async fn start(&self, _id: &ObjectId, env: &EnvVars) -> Result<(), BackendError> {
        tokio::time::sleep(self.delay()).await;
        self.ops.lock().unwrap().push("start".into());
        self.envs.lock().unwrap().push(env.clone());
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(BackendError::StartFailed("image pull failed".into()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self, _id: &ObjectId) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn fetch(&self, id: &ObjectId, request: ForwardRequest) -> Result<ForwardResponse, BackendError> {
        if !self.is_running(id) {
            return Err(BackendError::NotRunning(id.clone()));
        }
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(BackendError::Transport("connection reset".into()));
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let path = request.uri().path().to_owned();
        self.ops.lock().unwrap().push(format!("fetch {path}"));
        let generation = self.starts.load(Ordering::SeqCst);
        Ok(http::Response::builder()
            .status(200)
            .header("x-generation", generation.to_string())
            .body(full_body(format!("{path} {}", String::from_utf8_lossy(request.body()))))
            .unwrap())
    }

    async fn open_event_stream(&self, _id: &ObjectId, path: &str) -> Result<EventByteStream, BackendError> {
        self.streams_opened.fetch_add(1, Ordering::SeqCst);
        self.ops.lock().unwrap().push(format!("stream {path}"));
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            None => Ok(Box::pin(futures_util::stream::empty())),
            Some(StreamScript::Body(chunks)) => Ok(Box::pin(futures_util::stream::iter(
                chunks.into_iter().map(Ok),
            ))),
            Some(StreamScript::Live(rx)) => Ok(Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            }))),
            Some(StreamScript::Refuse) => Err(BackendError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))),
        }
    }

    fn renew_activity_timeout(&self, _id: &ObjectId, deadline: Instant) {
        self.deadlines.lock().unwrap().push(deadline);
    }
}

/// Counts activity callbacks instead of renewing anything.
#[derive(Default)]
pub struct CountingSink {
    pub renewals: AtomicUsize,
}

impl ActivitySink for CountingSink {
    fn record_activity(&self, _handle: &InstanceHandle) {
        self.renewals.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn test_config() -> ControllerConfig {
    ControllerConfig {
        idle_timeout: Duration::from_secs(600),
        env: EnvVars::from_pairs([("API_KEY", "secret"), ("PORT", "80")]),
        ..ControllerConfig::default()
    }
}

pub fn controller(backend: &Arc<MockBackend>) -> Arc<InstanceController> {
    InstanceController::new(backend.clone(), test_config())
}

/// Poll `cond` every 10ms for up to 2s.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
