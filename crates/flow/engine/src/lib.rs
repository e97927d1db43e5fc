//! Token-Flow Engine
//!
//! A deterministic, single-run execution kernel for small data-flow
//! scenarios. External data enters through source nodes, travels along
//! edges as tokens, and is transformed, routed, batched, joined and finally
//! absorbed by sinks. Every change is recorded in an append-only ledger.
//!
//! # Architecture
//!
//! The [`FlowEngine`] composes:
//!
//! - [`ActivityQueue`]: pending events ordered by `(timestamp, sequence)`
//! - [`ActivityLedger`]: sequence-numbered activity entries with node and
//!   correlation indexes
//! - [`NodeProcessor`]: one pure processor per node kind
//! - [`TraceSink`]: where the engine reports what it does
//!
//! Given the same scenario, the same injected events and a fixed start
//! tick, two runs produce byte-identical ledgers.
//!
//! # Example
//!
//! ```rust
//! use flow_engine::{FlowEngine, NullSink};
//! use flow_types::{ExternalEvent, NodeId, Scenario};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let scenario = Scenario::from_value(json!({
//!     "nodes": [
//!         {"id": "d", "kind": "source", "outputs": [{"name": "out"}]},
//!         {"id": "p", "kind": "transform",
//!          "inputs": [{"name": "in", "required": true}],
//!          "outputs": [{"name": "out", "formula": "value * 2"}]},
//!         {"id": "s", "kind": "sink", "inputs": [{"name": "in", "required": true}]}
//!     ],
//!     "edges": [
//!         {"sourceNodeId": "d", "sourceOutput": "out", "targetNodeId": "p", "targetInput": "in"},
//!         {"sourceNodeId": "p", "sourceOutput": "out", "targetNodeId": "s", "targetInput": "in"}
//!     ]
//! }))
//! .unwrap();
//!
//! let mut engine = FlowEngine::default().with_trace_sink(Arc::new(NullSink));
//! engine.initialize(scenario).unwrap();
//! engine
//!     .inject(ExternalEvent::new("order-1", 0, NodeId::new("d"), json!(10)))
//!     .unwrap();
//! while engine.step().unwrap().is_some() {}
//!
//! assert_eq!(engine.ledger().last().unwrap().value, json!(20));
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod engine;
pub mod ledger;
pub mod processors;
pub mod queue;
pub mod stats;
pub mod trace;

pub use config::{EngineConfig, RunLimits, StartTime};
pub use engine::{FlowEngine, StopHandle};
pub use ledger::{ActivityLedger, JourneyStep, LedgerSummary, NodeCounters, TokenQuery, TokenRecord};
pub use processors::{build_processor, NodeProcessor, ProcessOutcome};
pub use queue::{ActivityQueue, EventKey, QueueSnapshot};
pub use stats::{EngineStatus, NodeInfo, RunId, RunStats, StopReason};
pub use trace::{NullSink, RecordingSink, TraceEvent, TraceSink, TracingSink};

pub use flow_expr;
pub use flow_types;
