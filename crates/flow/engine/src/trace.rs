//! Engine trace sink
//!
//! Processors never log. The engine reports what it does through a
//! [`TraceSink`] passed in at construction; the default forwards to
//! `tracing`.

use crate::stats::{EngineStatus, StopReason};
use flow_types::{EventId, EventKind, NodeId, Tick};
use serde::Serialize;
use std::sync::Mutex;

/// Something the engine did
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    Initialized {
        nodes: usize,
        edges: usize,
        seeded: usize,
        start_tick: Tick,
    },
    Injected {
        event_id: EventId,
        node: NodeId,
        tick: Tick,
    },
    Stepped {
        step: u64,
        tick: Tick,
        event_id: EventId,
        kind: EventKind,
        node: NodeId,
    },
    Routed {
        from: NodeId,
        output: String,
        destinations: usize,
    },
    Triggered {
        node: NodeId,
        tick: Tick,
    },
    ProcessingFailed {
        node: NodeId,
        event_id: EventId,
        error: String,
    },
    StatusChanged {
        from: EngineStatus,
        to: EngineStatus,
    },
    RunFinished {
        steps: u64,
        tick: Tick,
        reason: StopReason,
    },
    Reset,
}

/// Receiver for engine trace events
pub trait TraceSink: Send + Sync {
    fn record(&self, event: &TraceEvent);
}

/// Forwards trace events to `tracing`
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn record(&self, event: &TraceEvent) {
        match event {
            TraceEvent::Initialized {
                nodes,
                edges,
                seeded,
                start_tick,
            } => tracing::info!(
                nodes = nodes,
                edges = edges,
                seeded = seeded,
                start_tick = start_tick,
                "Scenario initialized"
            ),
            TraceEvent::Injected {
                event_id,
                node,
                tick,
            } => tracing::info!(event_id = %event_id, node = %node, tick = tick, "External event injected"),
            TraceEvent::Stepped {
                step,
                tick,
                event_id,
                kind,
                node,
            } => tracing::debug!(
                step = step,
                tick = tick,
                event_id = %event_id,
                kind = %kind,
                node = %node,
                "Event processed"
            ),
            TraceEvent::Routed {
                from,
                output,
                destinations,
            } => tracing::debug!(from = %from, output = %output, destinations = destinations, "Emit routed"),
            TraceEvent::Triggered { node, tick } => {
                tracing::debug!(node = %node, tick = tick, "Node eligible, trigger scheduled")
            }
            TraceEvent::ProcessingFailed {
                node,
                event_id,
                error,
            } => tracing::warn!(node = %node, event_id = %event_id, error = %error, "Processing failed"),
            TraceEvent::StatusChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Engine status changed")
            }
            TraceEvent::RunFinished {
                steps,
                tick,
                reason,
            } => tracing::info!(steps = steps, tick = tick, reason = ?reason, "Run finished"),
            TraceEvent::Reset => tracing::info!("Engine reset"),
        }
    }
}

/// Keeps every trace event in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TraceEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl TraceSink for RecordingSink {
    fn record(&self, event: &TraceEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Discards everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl TraceSink for NullSink {
    fn record(&self, _event: &TraceEvent) {}
}
