//! Activity queue: timestamp-ordered pending events with snapshot history

use flow_types::{Event, EventId, EventKind, NodeId, Scenario, Tick, ValidationReport};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordering key for queued events.
///
/// Events are ordered by:
/// 1. Timestamp (earlier first)
/// 2. Insertion sequence (FIFO within a tick)
///
/// Field order is the ordering; the derive relies on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey {
    pub timestamp: Tick,
    pub sequence: u64,
}

/// Pending-work state captured after a processed step
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub step: u64,
    pub tick: Tick,
    pub processed_count: u64,
    pub total_count: u64,
    pub pending_events: Vec<Event>,
}

/// Pending events, dequeued in non-decreasing timestamp order
#[derive(Clone, Debug)]
pub struct ActivityQueue {
    pending: BTreeMap<EventKey, Event>,
    next_sequence: u64,
    processed: u64,
    total: u64,
    snapshots: Vec<QueueSnapshot>,
    retain_history: bool,
}

impl Default for ActivityQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityQueue {
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            next_sequence: 0,
            processed: 0,
            total: 0,
            snapshots: Vec::new(),
            retain_history: true,
        }
    }

    /// Keep only the latest snapshot instead of the full history
    pub fn without_history(mut self) -> Self {
        self.retain_history = false;
        self
    }

    /// Add an event, assigning its id if it has none. Returns the id.
    pub fn enqueue(&mut self, mut event: Event) -> EventId {
        self.next_sequence += 1;
        if !event.id.is_assigned() {
            event.id = EventId(self.next_sequence);
        }
        let id = event.id;
        let key = EventKey {
            timestamp: event.timestamp,
            sequence: self.next_sequence,
        };
        self.pending.insert(key, event);
        self.total += 1;
        id
    }

    /// Remove and return the earliest event
    pub fn dequeue(&mut self) -> Option<Event> {
        let (_, event) = self.pending.pop_first()?;
        self.processed += 1;
        Some(event)
    }

    pub fn peek(&self) -> Option<&Event> {
        self.pending.values().next()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn size(&self) -> usize {
        self.pending.len()
    }

    /// Pending events in dequeue order
    pub fn pending(&self) -> impl Iterator<Item = &Event> {
        self.pending.values()
    }

    pub fn events_by_kind(&self, kind: EventKind) -> Vec<&Event> {
        self.pending().filter(|e| e.kind() == kind).collect()
    }

    pub fn events_for_node(&self, node: &NodeId) -> Vec<&Event> {
        self.pending()
            .filter(|e| &e.target_node_id == node)
            .collect()
    }

    pub fn processed_count(&self) -> u64 {
        self.processed
    }

    pub fn total_count(&self) -> u64 {
        self.total
    }

    // ── Snapshots ────────────────────────────────────────────────────

    /// Capture the pending set after `step`
    pub fn snapshot(&mut self, step: u64, tick: Tick) -> QueueSnapshot {
        let snapshot = QueueSnapshot {
            step,
            tick,
            processed_count: self.processed,
            total_count: self.total,
            pending_events: self.pending.values().cloned().collect(),
        };
        if !self.retain_history {
            self.snapshots.clear();
        }
        self.snapshots.push(snapshot.clone());
        snapshot
    }

    /// Snapshot history, oldest first
    pub fn snapshots(&self) -> &[QueueSnapshot] {
        &self.snapshots
    }

    /// The snapshot taken after `step`, if retained
    pub fn snapshot_at(&self, step: u64) -> Option<&QueueSnapshot> {
        self.snapshots
            .binary_search_by_key(&step, |s| s.step)
            .ok()
            .map(|idx| &self.snapshots[idx])
    }

    /// Drop pending events, counters and history
    pub fn clear(&mut self) {
        let retain_history = self.retain_history;
        *self = Self::new();
        self.retain_history = retain_history;
    }

    // ── Validation ───────────────────────────────────────────────────

    pub fn validate(&self, scenario: &Scenario) -> ValidationReport {
        let mut report = ValidationReport::new();

        for event in self.pending.values() {
            if event.timestamp < 0 {
                report.push(
                    "queue",
                    format!("{} has negative timestamp {}", event.id, event.timestamp),
                );
            }
            for node in event.referenced_nodes() {
                if !scenario.contains(node) {
                    report.push(
                        "queue",
                        format!("{} references unknown node {}", event.id, node),
                    );
                }
            }
        }

        if self.processed > self.total {
            report.push(
                "queue",
                format!(
                    "processed count {} exceeds total count {}",
                    self.processed, self.total
                ),
            );
        }
        if self.total - self.processed.min(self.total) != self.pending.len() as u64 {
            report.push(
                "queue",
                format!(
                    "{} pending events but counters imply {}",
                    self.pending.len(),
                    self.total.saturating_sub(self.processed)
                ),
            );
        }

        report
    }
}
