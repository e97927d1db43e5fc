#![allow(dead_code)]

use flow_engine::{EngineConfig, FlowEngine, NullSink};
use flow_types::{
    ActivityAction, ActivityEntry, EdgeConfig, Event, ExternalEvent, NodeConfig, NodeId, NodeKind,
    Scenario,
};
use serde_json::{json, Value};
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Route engine traces to the test writer; `RUST_LOG=flow_engine=debug`
/// shows every step
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

pub fn engine_for(scenario: Scenario) -> FlowEngine {
    init_tracing();
    let mut engine = FlowEngine::new(EngineConfig::default());
    engine.initialize(scenario).expect("scenario should load");
    engine
}

pub fn quiet_engine_for(scenario: Scenario) -> FlowEngine {
    let mut engine = FlowEngine::default().with_trace_sink(Arc::new(NullSink));
    engine.initialize(scenario).expect("scenario should load");
    engine
}

pub fn inject(engine: &mut FlowEngine, id: &str, source: &str, value: Value) {
    engine
        .inject(ExternalEvent::new(id, 0, NodeId::new(source), value))
        .expect("injection should be accepted");
}

/// Step until the queue is empty, returning every processed event
pub fn drain(engine: &mut FlowEngine) -> Vec<Event> {
    let mut processed = Vec::new();
    while let Some(event) = engine.step().expect("engine should be live") {
        processed.push(event);
    }
    processed
}

pub fn entries_at<'a>(
    engine: &'a FlowEngine,
    node: &str,
    action: ActivityAction,
) -> Vec<&'a ActivityEntry> {
    engine
        .ledger()
        .activities_by_node(&NodeId::new(node))
        .into_iter()
        .filter(|e| e.action == action)
        .collect()
}

// ── Scenarios ────────────────────────────────────────────────────────

/// Source `d` → transform `p` (doubles, takes `delay` ticks) → sink `s`
pub fn sequential(delay: u64) -> Scenario {
    Scenario::new()
        .with_node(NodeConfig::new("d", NodeKind::Source).with_output("out"))
        .with_node(
            NodeConfig::new("p", NodeKind::Transform)
                .with_input("in", true)
                .with_formula_output("out", "value * 2")
                .with_processing_config(json!({ "processingTime": delay })),
        )
        .with_node(NodeConfig::new("s", NodeKind::Sink).with_input("in", true))
        .with_edge(EdgeConfig::new("d", "out", "p", "in"))
        .with_edge(EdgeConfig::new("p", "out", "s", "in"))
}

/// Sources `a` and `b` feed the required inputs of join `j`, which feeds sink `s`
pub fn join() -> Scenario {
    Scenario::new()
        .with_node(NodeConfig::new("a", NodeKind::Source).with_output("out"))
        .with_node(NodeConfig::new("b", NodeKind::Source).with_output("out"))
        .with_node(
            NodeConfig::new("j", NodeKind::Join)
                .with_input("a", true)
                .with_input("b", true)
                .with_formula_output("out", "[a, b]"),
        )
        .with_node(NodeConfig::new("s", NodeKind::Sink).with_input("in", true))
        .with_edge(EdgeConfig::new("a", "out", "j", "a"))
        .with_edge(EdgeConfig::new("b", "out", "j", "b"))
        .with_edge(EdgeConfig::new("j", "out", "s", "in"))
}

/// Transform `p` with two formula outputs over inputs `a` and `b`
pub fn multi_output() -> Scenario {
    Scenario::new()
        .with_node(NodeConfig::new("a", NodeKind::Source).with_output("out"))
        .with_node(NodeConfig::new("b", NodeKind::Source).with_output("out"))
        .with_node(
            NodeConfig::new("p", NodeKind::Transform)
                .with_input("a", true)
                .with_input("b", true)
                .with_formula_output("sum", "a + b")
                .with_formula_output("avg", "(a + b) / 2"),
        )
        .with_node(NodeConfig::new("total", NodeKind::Sink).with_input("in", true))
        .with_node(NodeConfig::new("mean", NodeKind::Sink).with_input("in", true))
        .with_edge(EdgeConfig::new("a", "out", "p", "a"))
        .with_edge(EdgeConfig::new("b", "out", "p", "b"))
        .with_edge(EdgeConfig::new("p", "sum", "total", "in"))
        .with_edge(EdgeConfig::new("p", "avg", "mean", "in"))
}

/// Every trigger-driven and state-machine kind in one graph:
///
/// ```text
/// orders ─▶ triage ─high─▶ batch ─▶ big
///                  └─low──▶ hold ─▶ tag ─▶ small
/// ```
pub fn mixed() -> Scenario {
    Scenario::from_value(json!({
        "nodes": [
            {"id": "orders", "kind": "source", "outputs": [{"name": "out"}]},
            {"id": "triage", "kind": "router",
             "inputs": [{"name": "in", "required": true}],
             "outputs": [{"name": "high"}, {"name": "low"}],
             "processingConfig": {
                 "routes": [{"output": "high", "condition": "value >= 10"}],
                 "defaultOutput": "low"
             }},
            {"id": "batch", "kind": "batcher",
             "inputs": [{"name": "in", "required": true}],
             "outputs": [{"name": "out"}],
             "processingConfig": {"batchSize": 2, "timeout": 5, "aggregate": "sum(batch)"}},
            {"id": "hold", "kind": "buffer",
             "inputs": [{"name": "in", "required": true}],
             "outputs": [{"name": "out"}],
             "processingConfig": {"capacity": 8}},
            {"id": "tag", "kind": "state_machine_transform",
             "inputs": [{"name": "in", "required": true}],
             "outputs": [{"name": "out"}],
             "processingConfig": {
                 "initialState": "fresh",
                 "transitions": [
                     {"from": "fresh", "to": "seen", "formula": "value + 1000"},
                     {"from": "seen", "to": "seen", "formula": "value + 2000"}
                 ]
             }},
            {"id": "big", "kind": "sink", "inputs": [{"name": "in", "required": true}]},
            {"id": "small", "kind": "sink", "inputs": [{"name": "in", "required": true}]}
        ],
        "edges": [
            {"sourceNodeId": "orders", "sourceOutput": "out", "targetNodeId": "triage", "targetInput": "in"},
            {"sourceNodeId": "triage", "sourceOutput": "high", "targetNodeId": "batch", "targetInput": "in"},
            {"sourceNodeId": "triage", "sourceOutput": "low", "targetNodeId": "hold", "targetInput": "in"},
            {"sourceNodeId": "batch", "sourceOutput": "out", "targetNodeId": "big", "targetInput": "in"},
            {"sourceNodeId": "hold", "sourceOutput": "out", "targetNodeId": "tag", "targetInput": "in"},
            {"sourceNodeId": "tag", "sourceOutput": "out", "targetNodeId": "small", "targetInput": "in"}
        ]
    }))
    .expect("mixed scenario should parse")
}
