//! Idle-deadline bookkeeping and `sleepAfter` duration parsing.
//!
//! Pure: every operation takes `now` as a parameter. Enforcement (actually
//! suspending the instance) belongs to the lifecycle backend.

use std::time::{Duration, Instant};

use crate::error::ParseDurationError;

/// Tracks when an instance becomes eligible for suspension.
#[derive(Debug, Clone)]
pub struct IdleClock {
    timeout: Duration,
    deadline: Option<Instant>,
    last_activity: Option<Instant>,
}

impl IdleClock {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
            last_activity: None,
        }
    }

    /// Record activity at `now`: the deadline becomes `now + timeout`,
    /// overwriting any earlier or later deadline. Returns the new deadline.
    pub fn renew(&mut self, now: Instant) -> Instant {
        let deadline = now + self.timeout;
        self.deadline = Some(deadline);
        self.last_activity = Some(now);
        deadline
    }

    /// Forget the deadline (instance stopped).
    pub fn clear(&mut self) {
        self.deadline = None;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn last_activity(&self) -> Option<Instant> {
        self.last_activity
    }

    /// True once a deadline exists and `now` has reached it.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    /// Time left before the deadline; zero once passed, `None` if unset.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(now))
    }
}

/// Parse a `sleepAfter`-style duration: `"30s"`, `"10m"`, `"1h"`, `"250ms"`.
/// A bare number is seconds.
pub fn parse_duration(input: &str) -> Result<Duration, ParseDurationError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(ParseDurationError::Empty);
    }

    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    if num.is_empty() {
        return Err(ParseDurationError::InvalidNumber(input.to_owned()));
    }
    let value: u64 = num
        .parse()
        .map_err(|_| ParseDurationError::InvalidNumber(input.to_owned()))?;

    let multiplier_ms: u64 = match unit.trim() {
        "ms" => 1,
        "" | "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        other => {
            return Err(ParseDurationError::UnknownUnit {
                input: input.to_owned(),
                unit: other.to_owned(),
            });
        }
    };

    value
        .checked_mul(multiplier_ms)
        .map(Duration::from_millis)
        .ok_or_else(|| ParseDurationError::Overflow(input.to_owned()))
}
