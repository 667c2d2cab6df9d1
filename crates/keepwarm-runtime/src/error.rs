//! Error types for the lifecycle backend, the controller and the watcher.

use std::fmt;
use std::time::Duration;

use keepwarm_core::ObjectId;
use thiserror::Error;

/// Failures reported by a [`LifecycleBackend`](crate::backend::LifecycleBackend).
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("unknown instance {0}")]
    UnknownInstance(ObjectId),

    #[error("instance {0} is not running")]
    NotRunning(ObjectId),

    #[error("failed to start instance: {0}")]
    StartFailed(String),

    #[error("instance did not accept connections on port {port} within {timeout:?}")]
    StartupTimeout { port: u16, timeout: Duration },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("instance did not answer within {timeout:?}")]
    ResponseTimeout { timeout: Duration },

    #[error("event endpoint answered HTTP {0}")]
    EventStreamStatus(u16),

    #[error("backend io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which request-path step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Create,
    Start,
    Forward,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Start => "start",
            Self::Forward => "forward",
        })
    }
}

/// Error surfaced to request callers. Never retried internally.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("instance {instance} unavailable ({stage}): {source}")]
    Unavailable {
        instance: String,
        stage: FailureStage,
        #[source]
        source: BackendError,
    },
}

impl LifecycleError {
    pub fn unavailable(instance: impl Into<String>, stage: FailureStage, source: BackendError) -> Self {
        Self::Unavailable {
            instance: instance.into(),
            stage,
            source,
        }
    }

    pub fn stage(&self) -> FailureStage {
        match self {
            Self::Unavailable { stage, .. } => *stage,
        }
    }
}

/// Failure inside a watch session. Logged at the watcher boundary, never
/// propagated to request handling.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to open event stream: {0}")]
    Connect(#[source] BackendError),

    #[error("event stream read failed: {0}")]
    Read(#[from] std::io::Error),
}
