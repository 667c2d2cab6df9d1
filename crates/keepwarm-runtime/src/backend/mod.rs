//! Lifecycle backend boundary: addressing, start, delivery, event stream and
//! idle-timeout enforcement for supervised instances.
//!
//! The controller only talks to this trait. [`ProcessBackend`] is the local
//! implementation; tests inject an in-memory one.

use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use keepwarm_core::{ObjectId, Placement};

use crate::env::EnvVars;
use crate::error::BackendError;

pub mod process;

pub use process::{ProcessBackend, ProcessConfig};

/// Request delivered to an instance. Request bodies are fully buffered.
pub type ForwardRequest = http::Request<Bytes>;

pub type BodyError = Box<dyn std::error::Error + Send + Sync>;

/// Response body as the instance streams it; frames pass through as they
/// arrive.
pub type ResponseBody = UnsyncBoxBody<Bytes, BodyError>;

/// Response from an instance, returned to the caller unmodified.
pub type ForwardResponse = http::Response<ResponseBody>;

/// A response body that is already complete.
pub fn full_body(bytes: impl Into<Bytes>) -> ResponseBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Raw response body of the event endpoint.
pub type EventByteStream = BoxStream<'static, std::io::Result<Bytes>>;

#[async_trait]
pub trait LifecycleBackend: Send + Sync + 'static {
    /// Address for `name`. The same name always yields the same id.
    fn id_from_name(&self, name: &str) -> ObjectId;

    /// Obtain the instance behind `id`, creating it if needed.
    /// The placement hint is advisory.
    async fn get(&self, id: &ObjectId, placement: &Placement) -> Result<(), BackendError>;

    /// Start the instance with `env`. Ok once it accepts requests.
    async fn start(&self, id: &ObjectId, env: &EnvVars) -> Result<(), BackendError>;

    /// Whether the instance is currently up. Must not block.
    fn is_running(&self, id: &ObjectId) -> bool;

    async fn fetch(
        &self,
        id: &ObjectId,
        request: ForwardRequest,
    ) -> Result<ForwardResponse, BackendError>;

    /// Issue one GET against `path` and return the body as bytes.
    async fn open_event_stream(
        &self,
        id: &ObjectId,
        path: &str,
    ) -> Result<EventByteStream, BackendError>;

    /// Move the suspend deadline to `deadline`, replacing any earlier one.
    /// Must not block. Ignored when the instance is not running.
    fn renew_activity_timeout(&self, id: &ObjectId, deadline: Instant);
}
