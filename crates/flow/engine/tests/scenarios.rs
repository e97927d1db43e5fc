//! End-to-end scenarios: sequential transform, join, multi-output

mod common;

use common::*;
use flow_engine::TokenQuery;
use flow_types::{ActivityAction, CorrelationId, EventPayload, NodeId};
use serde_json::json;

#[test]
fn sequential_transform_ledger_order() {
    let mut engine = engine_for(sequential(3));
    inject(&mut engine, "order-1", "d", json!(10));
    drain(&mut engine);

    let milestones: Vec<(String, ActivityAction, serde_json::Value)> = engine
        .ledger()
        .activities()
        .iter()
        .filter(|e| {
            matches!(
                (e.node_id.as_str(), e.action),
                ("d", ActivityAction::Received)
                    | ("p", ActivityAction::ProcessingStarted)
                    | ("p", ActivityAction::ProcessingComplete)
                    | ("s", ActivityAction::Received)
            )
        })
        .map(|e| (e.node_id.to_string(), e.action, e.value.clone()))
        .collect();

    assert_eq!(milestones.len(), 4);
    assert_eq!(milestones[0], ("d".into(), ActivityAction::Received, json!(10)));
    assert_eq!(milestones[1].0, "p");
    assert_eq!(milestones[1].1, ActivityAction::ProcessingStarted);
    assert_eq!(
        milestones[2],
        ("p".into(), ActivityAction::ProcessingComplete, json!(20))
    );
    assert_eq!(milestones[3], ("s".into(), ActivityAction::Received, json!(20)));

    let started = entries_at(&engine, "p", ActivityAction::ProcessingStarted)[0].timestamp;
    let completed = entries_at(&engine, "p", ActivityAction::ProcessingComplete)[0].timestamp;
    assert_eq!(completed - started, 3);
}

#[test]
fn sequential_transform_lineage() {
    let mut engine = engine_for(sequential(1));
    inject(&mut engine, "order-1", "d", json!(10));
    drain(&mut engine);

    let journey = engine.token_journey(&CorrelationId::new("order-1"));
    let nodes: Vec<&str> = journey.iter().map(|s| s.node_id.as_str()).collect();
    assert_eq!(nodes.first(), Some(&"d"));
    assert_eq!(nodes.last(), Some(&"s"));

    let records = engine.find_tokens(&TokenQuery::new().at_node(NodeId::new("s")));
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].latest_value, json!(20));
    assert_eq!(records[0].origin, NodeId::new("d"));
}

#[test]
fn join_waits_for_every_required_input() {
    let mut engine = engine_for(join());

    inject(&mut engine, "left", "a", json!(1));
    drain(&mut engine);
    assert!(entries_at(&engine, "j", ActivityAction::ProcessingStarted).is_empty());
    let info = engine.node_info(&NodeId::new("j")).unwrap();
    assert_eq!(info.state.buffer_len("a"), 1);
    assert!(!info.trigger_pending);

    inject(&mut engine, "right", "b", json!(2));

    // step until the token lands on input b
    loop {
        let event = engine.step().unwrap().expect("arrival at j.b should happen");
        if matches!(&event.payload, EventPayload::TokenArrival { input, .. } if input == "b")
            && event.target_node_id == NodeId::new("j")
        {
            break;
        }
    }
    let landed_at = engine.current_tick();
    assert!(engine.node_info(&NodeId::new("j")).unwrap().trigger_pending);

    drain(&mut engine);
    let started = entries_at(&engine, "j", ActivityAction::ProcessingStarted);
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].timestamp, landed_at + 1);

    let consumed = entries_at(&engine, "j", ActivityAction::Consumed);
    let inputs: Vec<&serde_json::Value> = consumed.iter().map(|e| &e.value["input"]).collect();
    assert_eq!(inputs, vec![&json!("a"), &json!("b")]);

    let info = engine.node_info(&NodeId::new("j")).unwrap();
    assert_eq!(info.state.buffered(), 0);
    assert_eq!(info.counters.firings, 1);

    let delivered = entries_at(&engine, "s", ActivityAction::Received);
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].value, json!([1, 2]));
    assert!(delivered[0].correlation_ids.contains(&CorrelationId::new("left")));
    assert!(delivered[0].correlation_ids.contains(&CorrelationId::new("right")));
}

#[test]
fn multi_output_emits_once_per_output() {
    let mut engine = engine_for(multi_output());
    inject(&mut engine, "x", "a", json!(4));
    inject(&mut engine, "y", "b", json!(6));
    let processed = drain(&mut engine);

    let emits: Vec<(String, serde_json::Value, usize)> = processed
        .iter()
        .filter(|e| e.target_node_id == NodeId::new("p"))
        .filter_map(|e| match &e.payload {
            EventPayload::Emit { output, token } => {
                assert!(token.correlation_ids.contains(&CorrelationId::new("x")));
                assert!(token.correlation_ids.contains(&CorrelationId::new("y")));
                Some((output.clone(), token.value.clone(), token.correlation_ids.len()))
            }
            _ => None,
        })
        .collect();

    assert_eq!(
        emits,
        vec![
            ("sum".to_string(), json!(10), 2),
            ("avg".to_string(), json!(5), 2)
        ]
    );
    assert_eq!(entries_at(&engine, "total", ActivityAction::Received)[0].value, json!(10));
    assert_eq!(entries_at(&engine, "mean", ActivityAction::Received)[0].value, json!(5));
}

#[test]
fn mixed_graph_routes_batches_and_tags() {
    let mut engine = engine_for(mixed());
    for (i, value) in [12, 3, 15, 4, 30].iter().enumerate() {
        inject(&mut engine, &format!("o{}", i), "orders", json!(value));
    }
    drain(&mut engine);

    // 12 and 15 batch together, 30 waits out the timeout alone
    let big: Vec<_> = entries_at(&engine, "big", ActivityAction::Received)
        .into_iter()
        .map(|e| e.value.clone())
        .collect();
    assert_eq!(big, vec![json!(27), json!(30)]);

    let small: Vec<_> = entries_at(&engine, "small", ActivityAction::Received)
        .into_iter()
        .map(|e| e.value.clone())
        .collect();
    assert_eq!(small, vec![json!(1003), json!(2004)]);

    let tag = engine.node_info(&NodeId::new("tag")).unwrap();
    assert_eq!(tag.counters.transitions, 2);
    assert!(engine.validate_state().is_ok());
}

#[test]
fn router_keeps_routing_after_a_bad_token() {
    let scenario = flow_types::Scenario::from_value(json!({
        "nodes": [
            {"id": "in", "kind": "source", "outputs": [{"name": "out"}]},
            {"id": "r", "kind": "router",
             "inputs": [{"name": "in", "required": true}],
             "outputs": [{"name": "high"}, {"name": "low"}],
             "processingConfig": {
                 "routes": [{"output": "high", "condition": "value > 10"}],
                 "defaultOutput": "low"
             }},
            {"id": "high", "kind": "sink", "inputs": [{"name": "in", "required": true}]},
            {"id": "low", "kind": "sink", "inputs": [{"name": "in", "required": true}]}
        ],
        "edges": [
            {"sourceNodeId": "in", "sourceOutput": "out", "targetNodeId": "r", "targetInput": "in"},
            {"sourceNodeId": "r", "sourceOutput": "high", "targetNodeId": "high", "targetInput": "in"},
            {"sourceNodeId": "r", "sourceOutput": "low", "targetNodeId": "low", "targetInput": "in"}
        ]
    }))
    .unwrap();
    let mut engine = engine_for(scenario);

    for (i, value) in [json!("abc"), json!(20), json!(21), json!(22)].into_iter().enumerate() {
        inject(&mut engine, &format!("t{}", i), "in", value);
        drain(&mut engine);
    }

    let errors = entries_at(&engine, "r", ActivityAction::Error);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].value["value"], json!("abc"));
    assert_eq!(entries_at(&engine, "high", ActivityAction::Received).len(), 3);
    assert!(entries_at(&engine, "low", ActivityAction::Received).is_empty());
    assert_eq!(engine.node_info(&NodeId::new("r")).unwrap().state.buffered(), 0);
    assert_eq!(engine.stats().processing_errors, 0);
}
