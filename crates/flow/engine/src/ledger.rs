//! Activity ledger: the append-only system of record
//!
//! Every activity any processor reports is appended here with a dense
//! sequence number. Lineage views (`find_tokens`, `token_journey`) and
//! per-node counters are derived from the entries; there is no second
//! copy of history. Per-node and per-correlation indexes are maintained
//! on append so those views never rescan the full log.

use flow_types::{
    ActivityAction, ActivityEntry, ActivityRecord, CorrelationId, FlowResult, NodeId, Tick,
    ValidationReport,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Counts by action and by node
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSummary {
    pub total: usize,
    pub by_action: BTreeMap<ActivityAction, usize>,
    pub by_node: BTreeMap<NodeId, usize>,
    pub correlations: usize,
}

/// Per-node counters replayed from the node's ledger slice
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCounters {
    pub received: usize,
    pub consumed: usize,
    pub emitted: usize,
    pub rejected: usize,
    pub errors: usize,
    pub firings: usize,
    /// State-machine transitions, not counting entry into the initial state
    pub transitions: usize,
}

/// Criteria for [`ActivityLedger::find_tokens`]. Unset fields match anything.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenQuery {
    pub node_id: Option<NodeId>,
    pub correlation_id: Option<CorrelationId>,
    pub action: Option<ActivityAction>,
    pub value: Option<Value>,
    pub from_tick: Option<Tick>,
    pub to_tick: Option<Tick>,
}

impl TokenQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at_node(mut self, node: NodeId) -> Self {
        self.node_id = Some(node);
        self
    }

    pub fn with_correlation(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn with_action(mut self, action: ActivityAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn between(mut self, from: Tick, to: Tick) -> Self {
        self.from_tick = Some(from);
        self.to_tick = Some(to);
        self
    }

    pub fn matches(&self, entry: &ActivityEntry) -> bool {
        self.node_id.as_ref().map_or(true, |n| &entry.node_id == n)
            && self
                .correlation_id
                .as_ref()
                .map_or(true, |c| entry.correlation_ids.contains(c))
            && self.action.map_or(true, |a| entry.action == a)
            && self.value.as_ref().map_or(true, |v| &entry.value == v)
            && self.from_tick.map_or(true, |t| entry.timestamp >= t)
            && self.to_tick.map_or(true, |t| entry.timestamp <= t)
    }
}

/// A token lineage reconstructed from the ledger
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub correlation_id: CorrelationId,
    /// Node of the first entry carrying this correlation id
    pub origin: NodeId,
    /// Node of the most recent entry
    pub last_node: NodeId,
    pub last_action: ActivityAction,
    pub first_seen: Tick,
    pub last_seen: Tick,
    /// Most recent value recorded for this lineage
    pub latest_value: Value,
    pub entries: usize,
}

/// One hop of a token's journey
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneyStep {
    pub seq: u64,
    pub timestamp: Tick,
    pub node_id: NodeId,
    pub action: ActivityAction,
    pub value: Value,
}

/// Append-only, strictly sequenced activity log
#[derive(Clone, Debug, Default)]
pub struct ActivityLedger {
    entries: Vec<ActivityEntry>,
    by_node: BTreeMap<NodeId, Vec<usize>>,
    by_correlation: BTreeMap<CorrelationId, Vec<usize>>,
}

impl ActivityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, assigning the next sequence number
    pub fn log(&mut self, record: ActivityRecord) -> u64 {
        let seq = self.entries.len() as u64 + 1;
        let entry = ActivityEntry::from_record(seq, record);
        let idx = self.entries.len();

        self.by_node
            .entry(entry.node_id.clone())
            .or_default()
            .push(idx);
        for cid in &entry.correlation_ids {
            self.by_correlation.entry(cid.clone()).or_default().push(idx);
        }

        self.entries.push(entry);
        seq
    }

    pub fn activities(&self) -> &[ActivityEntry] {
        &self.entries
    }

    pub fn activities_by_node(&self, node: &NodeId) -> Vec<&ActivityEntry> {
        self.indexed(self.by_node.get(node))
    }

    pub fn activities_by_correlation(&self, id: &CorrelationId) -> Vec<&ActivityEntry> {
        self.indexed(self.by_correlation.get(id))
    }

    fn indexed(&self, indexes: Option<&Vec<usize>>) -> Vec<&ActivityEntry> {
        indexes
            .map(|idx| idx.iter().map(|&i| &self.entries[i]).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&ActivityEntry> {
        self.entries.last()
    }

    pub fn summary(&self) -> LedgerSummary {
        let mut by_action = BTreeMap::new();
        for entry in &self.entries {
            *by_action.entry(entry.action).or_insert(0) += 1;
        }
        LedgerSummary {
            total: self.entries.len(),
            by_action,
            by_node: self
                .by_node
                .iter()
                .map(|(node, idx)| (node.clone(), idx.len()))
                .collect(),
            correlations: self.by_correlation.len(),
        }
    }

    /// Counters for one node, replayed from its slice of the ledger
    pub fn node_counters(&self, node: &NodeId) -> NodeCounters {
        let mut counters = NodeCounters::default();
        for entry in self.activities_by_node(node) {
            match entry.action {
                ActivityAction::Received => counters.received += 1,
                ActivityAction::Consumed => counters.consumed += 1,
                ActivityAction::Emitted => counters.emitted += 1,
                ActivityAction::Rejected => counters.rejected += 1,
                ActivityAction::Error => counters.errors += 1,
                ActivityAction::ProcessingStarted => counters.firings += 1,
                ActivityAction::Transitioned => {
                    if !entry.value.get("from").map_or(true, Value::is_null) {
                        counters.transitions += 1;
                    }
                }
                ActivityAction::ProcessingComplete => {}
            }
        }
        counters
    }

    // ── Lineage ──────────────────────────────────────────────────────

    /// Token lineages with at least one entry matching `query`, ordered
    /// by correlation id
    pub fn find_tokens(&self, query: &TokenQuery) -> Vec<TokenRecord> {
        let candidates: Vec<(&CorrelationId, &Vec<usize>)> = match &query.correlation_id {
            Some(id) => self.by_correlation.get_key_value(id).into_iter().collect(),
            None => self.by_correlation.iter().collect(),
        };

        candidates
            .into_iter()
            .filter(|(_, idx)| idx.iter().any(|&i| query.matches(&self.entries[i])))
            .filter_map(|(cid, idx)| self.token_record(cid, idx))
            .collect()
    }

    fn token_record(&self, id: &CorrelationId, idx: &[usize]) -> Option<TokenRecord> {
        let first = &self.entries[*idx.first()?];
        let last = &self.entries[*idx.last()?];
        let latest_value = idx
            .iter()
            .rev()
            .map(|&i| &self.entries[i])
            .find(|e| !e.value.is_null() && e.action != ActivityAction::Transitioned)
            .map(|e| e.value.clone())
            .unwrap_or(Value::Null);

        Some(TokenRecord {
            correlation_id: id.clone(),
            origin: first.node_id.clone(),
            last_node: last.node_id.clone(),
            last_action: last.action,
            first_seen: first.timestamp,
            last_seen: last.timestamp,
            latest_value,
            entries: idx.len(),
        })
    }

    /// Every ledger entry carrying `id`, in sequence order
    pub fn token_journey(&self, id: &CorrelationId) -> Vec<JourneyStep> {
        self.activities_by_correlation(id)
            .into_iter()
            .map(|e| JourneyStep {
                seq: e.seq,
                timestamp: e.timestamp,
                node_id: e.node_id.clone(),
                action: e.action,
                value: e.value.clone(),
            })
            .collect()
    }

    // ── Integrity ────────────────────────────────────────────────────

    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::new();

        for (i, entry) in self.entries.iter().enumerate() {
            let expected = i as u64 + 1;
            if entry.seq != expected {
                report.push(
                    "ledger",
                    format!("entry {} has seq {}, expected {}", i, entry.seq, expected),
                );
            }
        }

        for pair in self.entries.windows(2) {
            if pair[1].timestamp < pair[0].timestamp {
                report.push(
                    "ledger",
                    format!(
                        "seq {} at tick {} precedes seq {} at tick {}",
                        pair[1].seq, pair[1].timestamp, pair[0].seq, pair[0].timestamp
                    ),
                );
            }
        }

        let indexed: usize = self.by_node.values().map(Vec::len).sum();
        if indexed != self.entries.len() {
            report.push(
                "ledger",
                format!(
                    "node index covers {} entries, ledger has {}",
                    indexed,
                    self.entries.len()
                ),
            );
        }

        report
    }

    /// The only operation that removes entries
    pub fn reset(&mut self) {
        self.entries.clear();
        self.by_node.clear();
        self.by_correlation.clear();
    }

    /// The activity stream as a JSON array
    pub fn export_json(&self) -> FlowResult<String> {
        Ok(serde_json::to_string(&self.entries)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_types::CorrelationSet;
    use proptest::prelude::*;
    use serde_json::json;

    fn record(ts: Tick, node: &str, action: ActivityAction, value: Value, cids: &[&str]) -> ActivityRecord {
        let ids: CorrelationSet = cids.iter().map(|c| CorrelationId::new(*c)).collect();
        ActivityRecord::new(ts, NodeId::new(node), action, value).with_correlations(ids)
    }

    fn sample() -> ActivityLedger {
        let mut ledger = ActivityLedger::new();
        ledger.log(record(0, "d", ActivityAction::Received, json!(10), &["t1"]));
        ledger.log(record(0, "d", ActivityAction::Emitted, json!(10), &["t1"]));
        ledger.log(record(1, "p", ActivityAction::Received, json!(10), &["t1"]));
        ledger.log(record(2, "p", ActivityAction::ProcessingStarted, json!({"in": 10}), &["t1"]));
        ledger.log(record(3, "p", ActivityAction::ProcessingComplete, json!(20), &["t1"]));
        ledger.log(record(4, "s", ActivityAction::Received, json!(20), &["t1"]));
        ledger.log(record(4, "d", ActivityAction::Received, json!(7), &["t2"]));
        ledger
    }

    #[test]
    fn test_sequence_numbers_dense() {
        let ledger = sample();
        let seqs: Vec<u64> = ledger.activities().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, (1..=7).collect::<Vec<_>>());
        assert!(ledger.validate().is_ok());
    }

    #[test]
    fn test_by_node_index() {
        let ledger = sample();
        assert_eq!(ledger.activities_by_node(&NodeId::new("d")).len(), 3);
        assert_eq!(ledger.activities_by_node(&NodeId::new("p")).len(), 3);
        assert!(ledger.activities_by_node(&NodeId::new("zzz")).is_empty());
    }

    #[test]
    fn test_summary() {
        let summary = sample().summary();
        assert_eq!(summary.total, 7);
        assert_eq!(summary.by_action[&ActivityAction::Received], 4);
        assert_eq!(summary.by_node[&NodeId::new("s")], 1);
        assert_eq!(summary.correlations, 2);
    }

    #[test]
    fn test_token_journey() {
        let journey = sample().token_journey(&CorrelationId::new("t1"));
        let hops: Vec<(&str, ActivityAction)> = journey
            .iter()
            .map(|s| (s.node_id.as_str(), s.action))
            .collect();
        assert_eq!(
            hops,
            vec![
                ("d", ActivityAction::Received),
                ("d", ActivityAction::Emitted),
                ("p", ActivityAction::Received),
                ("p", ActivityAction::ProcessingStarted),
                ("p", ActivityAction::ProcessingComplete),
                ("s", ActivityAction::Received),
            ]
        );
    }

    #[test]
    fn test_find_tokens() {
        let ledger = sample();

        let all = ledger.find_tokens(&TokenQuery::new());
        assert_eq!(all.len(), 2);

        let at_sink = ledger.find_tokens(&TokenQuery::new().at_node(NodeId::new("s")));
        assert_eq!(at_sink.len(), 1);
        let t1 = &at_sink[0];
        assert_eq!(t1.correlation_id, CorrelationId::new("t1"));
        assert_eq!(t1.origin, NodeId::new("d"));
        assert_eq!(t1.last_node, NodeId::new("s"));
        assert_eq!(t1.latest_value, json!(20));
        assert_eq!(t1.entries, 6);

        let by_value = ledger.find_tokens(&TokenQuery::new().with_value(json!(7)));
        assert_eq!(by_value[0].correlation_id, CorrelationId::new("t2"));

        let windowed = ledger.find_tokens(&TokenQuery::new().between(4, 4).with_action(ActivityAction::Received));
        assert_eq!(windowed.len(), 2);

        let none = ledger.find_tokens(&TokenQuery::new().with_correlation(CorrelationId::new("nope")));
        assert!(none.is_empty());
    }

    #[test]
    fn test_node_counters_skip_initial_entry() {
        let mut ledger = ActivityLedger::new();
        ledger.log(record(0, "m", ActivityAction::Transitioned, json!({"from": null, "to": "idle"}), &[]));
        ledger.log(record(1, "m", ActivityAction::Received, json!(1), &["a"]));
        ledger.log(record(1, "m", ActivityAction::Transitioned, json!({"from": "idle", "to": "busy"}), &["a"]));
        ledger.log(record(1, "m", ActivityAction::Emitted, json!(1), &["a"]));

        let counters = ledger.node_counters(&NodeId::new("m"));
        assert_eq!(counters.transitions, 1);
        assert_eq!(counters.received, 1);
        assert_eq!(counters.emitted, 1);
    }

    #[test]
    fn test_reset_clears_indexes() {
        let mut ledger = sample();
        ledger.reset();
        assert!(ledger.is_empty());
        assert!(ledger.find_tokens(&TokenQuery::new()).is_empty());
        assert_eq!(ledger.log(record(0, "d", ActivityAction::Received, json!(1), &[])), 1);
    }

    #[test]
    fn test_export_json() {
        let exported = sample().export_json().unwrap();
        let parsed: Vec<ActivityEntry> = serde_json::from_str(&exported).unwrap();
        assert_eq!(parsed.len(), 7);
        assert_eq!(parsed[4].action, ActivityAction::ProcessingComplete);
    }

    proptest! {
        #[test]
        fn prop_indexes_partition_entries(nodes in prop::collection::vec(0usize..4, 0..50)) {
            let mut ledger = ActivityLedger::new();
            for (i, n) in nodes.iter().enumerate() {
                ledger.log(record(i as Tick, &format!("n{}", n), ActivityAction::Received, json!(i), &[]));
            }
            let per_node: usize = (0..4)
                .map(|n| ledger.activities_by_node(&NodeId::new(format!("n{}", n))).len())
                .sum();
            prop_assert_eq!(per_node, nodes.len());
            prop_assert!(ledger.validate().is_ok());
        }
    }
}
