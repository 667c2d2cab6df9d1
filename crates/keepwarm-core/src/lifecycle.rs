//! Instance lifecycle states and legal transitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the supervised instance.
///
/// ```text
///   stopped ──► starting ──► running ◄──► idle-pending-sleep
///      ▲           │            │                │
///      └───────────┴────────────┴────────────────┘
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    #[default]
    Stopped,
    Starting,
    Running,
    /// Deadline passed; the backend has not suspended the process yet.
    IdlePendingSleep,
}

impl InstanceState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::IdlePendingSleep => "idle-pending-sleep",
        }
    }

    /// Running or waiting to be put to sleep; requests can be delivered.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Running | Self::IdlePendingSleep)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use InstanceState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Stopped)
                | (Running, IdlePendingSleep)
                | (IdlePendingSleep, Running)
                | (Running, Stopped)
                | (IdlePendingSleep, Stopped)
        )
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
