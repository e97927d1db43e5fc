//! Activity records: what processors report, and what the ledger keeps

use crate::{CorrelationId, CorrelationSet, NodeId, Tick};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a node did
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Received,
    Rejected,
    ProcessingStarted,
    ProcessingComplete,
    Emitted,
    Consumed,
    Transitioned,
    Error,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Rejected => "rejected",
            Self::ProcessingStarted => "processing_started",
            Self::ProcessingComplete => "processing_complete",
            Self::Emitted => "emitted",
            Self::Consumed => "consumed",
            Self::Transitioned => "transitioned",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An activity as reported by a processor, before the ledger sequences it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub timestamp: Tick,
    pub node_id: NodeId,
    pub action: ActivityAction,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub correlation_ids: CorrelationSet,
}

impl ActivityRecord {
    pub fn new(timestamp: Tick, node_id: NodeId, action: ActivityAction, value: Value) -> Self {
        Self {
            timestamp,
            node_id,
            action,
            value,
            correlation_ids: CorrelationSet::new(),
        }
    }

    pub fn with_correlations(mut self, ids: CorrelationSet) -> Self {
        self.correlation_ids = ids;
        self
    }
}

/// One ledger line. `seq` is dense, starts at 1, and is never reused
/// within a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub seq: u64,
    pub timestamp: Tick,
    pub node_id: NodeId,
    pub action: ActivityAction,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub correlation_ids: CorrelationSet,
}

impl ActivityEntry {
    pub fn from_record(seq: u64, record: ActivityRecord) -> Self {
        Self {
            seq,
            timestamp: record.timestamp,
            node_id: record.node_id,
            action: record.action,
            value: record.value,
            correlation_ids: record.correlation_ids,
        }
    }

    pub fn involves(&self, correlation_id: &CorrelationId) -> bool {
        self.correlation_ids.contains(correlation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_names() {
        assert_eq!(ActivityAction::ProcessingStarted.to_string(), "processing_started");
        assert_eq!(
            serde_json::to_value(ActivityAction::Transitioned).unwrap(),
            json!("transitioned")
        );
    }

    #[test]
    fn test_entry_from_record() {
        let mut ids = CorrelationSet::new();
        ids.insert("c".into());
        let record =
            ActivityRecord::new(4, NodeId::new("p"), ActivityAction::Emitted, json!(20))
                .with_correlations(ids);
        let entry = ActivityEntry::from_record(7, record);
        assert_eq!(entry.seq, 7);
        assert_eq!(entry.timestamp, 4);
        assert!(entry.involves(&CorrelationId::new("c")));
    }
}
