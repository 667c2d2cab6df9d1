//! keepwarm-core: pure keepalive logic for a single supervised instance.
//! Event-stream decoding, activity classification, idle-deadline math and
//! lifecycle state rules. No async and no IO; the runtime crate owns those.

pub mod defaults;
pub mod error;
pub mod event;
pub mod idle;
pub mod lifecycle;
pub mod reconnect;
pub mod sse;
pub mod types;

pub use error::{DecodeError, ParseDurationError};
pub use event::{Activity, Event, EventClassifier};
pub use idle::{IdleClock, parse_duration};
pub use lifecycle::InstanceState;
pub use reconnect::ReconnectPolicy;
pub use sse::{SseDecoder, SseRecord};
pub use types::{ObjectId, Placement, SingletonKey};
