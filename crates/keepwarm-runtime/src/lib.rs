//! keepwarm-runtime: async side of the keepalive supervisor.
//!
//! The lifecycle backend boundary and its local process implementation, the
//! HTTP forwarding fabric, the singleton registry and controller, the
//! activity watcher, the router and the front server.

pub mod backend;
pub mod controller;
pub mod env;
pub mod error;
pub mod fabric;
pub mod front;
pub mod registry;
pub mod router;
pub mod stream;
pub mod watcher;

pub use backend::{LifecycleBackend, ProcessBackend, ProcessConfig};
pub use controller::{ControllerConfig, InstanceController, InstanceHandle, InstanceSnapshot};
pub use env::EnvVars;
pub use error::{BackendError, FailureStage, LifecycleError, WatchError};
pub use front::FrontServer;
pub use registry::InstanceRegistry;
pub use router::SingletonRouter;
pub use watcher::{ActivitySink, ActivityWatcher, WatchConfig, WatchPhase, WatchSession, WatchStatus};
