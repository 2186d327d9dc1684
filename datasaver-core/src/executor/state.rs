//! Run state and the status snapshot shared with health checks.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Stage of a backup run. `Failed` and `Cancelled` are reachable from every
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Connecting,
    Dumping,
    Compressing,
    Checksumming,
    Persisting,
    Verifying,
    Done,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Connecting => "connecting",
            RunState::Dumping => "dumping",
            RunState::Compressing => "compressing",
            RunState::Checksumming => "checksumming",
            RunState::Persisting => "persisting",
            RunState::Verifying => "verifying",
            RunState::Done => "done",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed | RunState::Cancelled)
    }

    /// A run is in flight.
    pub fn is_active(&self) -> bool {
        !self.is_terminal() && *self != RunState::Idle
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the engine, read concurrently with a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStatus {
    pub state: RunState,
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity() {
        assert!(!RunState::Idle.is_active());
        assert!(RunState::Dumping.is_active());
        assert!(RunState::Failed.is_terminal());
        assert!(!RunState::Failed.is_active());
        assert!(RunState::Cancelled.is_terminal());
    }

    #[test]
    fn test_serialized_names() {
        assert_eq!(serde_json::to_value(RunState::Checksumming).unwrap(), "checksumming");
        assert_eq!(RunState::Persisting.to_string(), "persisting");
        assert_eq!(serde_json::to_value(RunState::Cancelled).unwrap(), "cancelled");
    }
}
