//! Compile-time defaults for the supervised instance.
//!
//! None of these are user-configurable; the CLI only picks the command to
//! supervise and where to listen.

use std::time::Duration;

/// Port the supervised process listens on. Injected as `PORT`.
pub const DEFAULT_PORT: u16 = 2633;

/// Idle window before the instance may be suspended, in `sleepAfter` form.
pub const DEFAULT_SLEEP_AFTER: &str = "10m";

/// [`DEFAULT_SLEEP_AFTER`] as a `Duration`.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Name every caller resolves to. Identical for all callers, forever.
pub const SINGLETON_INSTANCE_NAME: &str = "cf-singleton-container";

/// Placement hint passed when the instance is first obtained (US west).
pub const DEFAULT_LOCATION_HINT: &str = "wnam";

/// Streamed-event endpoint exposed by the supervised process.
pub const EVENT_PATH: &str = "/global/event";

/// Event kind that proves the instance is in active use.
pub const ACTIVITY_EVENT_KIND: &str = "session.updated";

/// High-volume kinds kept out of the info log.
pub const QUIET_EVENT_KINDS: &[&str] = &["message.part.updated"];

/// Upper bound on one buffered event-stream record.
pub const MAX_RECORD_BYTES: usize = 1024 * 1024;
