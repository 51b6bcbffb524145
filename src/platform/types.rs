//! Platform data types shared by clients and the orchestration core.

use serde::{Deserialize, Serialize};

/// A provisioned service instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceInstance {
    /// Platform identifier.
    pub guid: String,
    /// Instance name.
    pub name: String,
}

/// Reported state of one application instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    /// Instance is running.
    Running,
    /// Instance is starting.
    Starting,
    /// Instance crashed.
    Crashed,
    /// Instance is down.
    Down,
    /// Unrecognized state.
    #[default]
    #[serde(other)]
    Unknown,
}

impl InstanceState {
    /// Parses a state string reported by the API.
    #[must_use]
    pub fn from_api(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "RUNNING" => Self::Running,
            "STARTING" => Self::Starting,
            "CRASHED" => Self::Crashed,
            "DOWN" => Self::Down,
            _ => Self::Unknown,
        }
    }

    /// Returns true if the instance is running.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "RUNNING",
            Self::Starting => "STARTING",
            Self::Crashed => "CRASHED",
            Self::Down => "DOWN",
            Self::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

/// Counts running instances.
#[must_use]
pub fn running_count(states: &[InstanceState]) -> usize {
    states.iter().filter(|s| s.is_running()).count()
}
