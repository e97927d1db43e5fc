//! Run lifecycle, run statistics and per-node inspection views

use crate::ledger::NodeCounters;
use flow_types::{NodeId, NodeKind, NodeState, Tick};
use serde::{Deserialize, Serialize};

/// Engine lifecycle.
///
/// `Uninitialized → Initialized → Running ⇄ Paused → Completed | Aborted`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Uninitialized,
    Initialized,
    Running,
    Paused,
    Completed,
    Aborted,
}

impl EngineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }

    /// Whether events may still be processed
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            Self::Initialized | Self::Running | Self::Paused | Self::Completed
        )
    }
}

impl std::fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why the last `run` returned
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The queue emptied
    Drained,
    StepLimit,
    TickLimit,
    /// `stop()` was requested
    Stopped,
    /// `abort()` was requested
    Aborted,
}

/// Identifier for one initialized run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub uuid::Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// Snapshot of engine progress
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub run_id: Option<RunId>,
    pub status: EngineStatus,
    pub is_running: bool,
    /// Steps taken since initialize
    pub steps: u64,
    pub start_tick: Tick,
    pub current_tick: Tick,
    pub events_processed: u64,
    pub events_enqueued: u64,
    pub pending_events: usize,
    pub activities_logged: usize,
    pub processing_errors: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
}

/// Everything known about one node
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub id: NodeId,
    pub kind: NodeKind,
    pub state: NodeState,
    /// Counters derived from this node's ledger slice
    pub counters: NodeCounters,
    /// Queued events addressed to this node
    pub pending_events: usize,
    pub trigger_pending: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_liveness() {
        assert!(EngineStatus::Paused.is_live());
        assert!(EngineStatus::Completed.is_live());
        assert!(!EngineStatus::Aborted.is_live());
        assert!(!EngineStatus::Uninitialized.is_live());
        assert_eq!(EngineStatus::Running.to_string(), "running");
    }

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
        assert!(RunId::new().to_string().starts_with("run-"));
    }
}
