//! Controller lifecycle phases.

use serde::{Deserialize, Serialize};

/// Lifecycle phase of a room's controller.
///
/// Transitions are monotonic within a session:
/// `Idle -> Running -> (Paused <-> Running)* -> Stopping -> Stopped`.
/// Stopped is terminal for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Phase {
    Idle = 0,
    Running = 1,
    Paused = 2,
    Stopping = 3,
    Stopped = 4,
}

impl Phase {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Paused,
            3 => Self::Stopping,
            4 => Self::Stopped,
            _ => {
                debug_assert!(false, "invalid phase byte: {v}");
                tracing::error!(phase_byte = v, "invalid phase byte");
                Self::Stopped
            }
        }
    }

    /// Whether the legal transition graph permits `self -> to`.
    pub fn can_transition_to(self, to: Phase) -> bool {
        matches!(
            (self, to),
            (Self::Idle, Self::Running)
                | (Self::Running, Self::Paused)
                | (Self::Running, Self::Stopping)
                | (Self::Paused, Self::Running)
                | (Self::Paused, Self::Stopping)
                | (Self::Idle, Self::Stopping)
                | (Self::Stopping, Self::Stopped)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
