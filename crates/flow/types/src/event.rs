//! Events: timestamped units of pending work
//!
//! Processing and routing are separate, separately observable steps: a
//! node first produces an `Emit`, and only after its producer has seen it
//! is the `Emit` fanned out into one `TokenArrival` per destination.

use crate::{union_correlations, CorrelationSet, EventId, NodeId, Tick, Token};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Canonical event kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A token is delivered to a node's named input
    TokenArrival,
    /// A node produced an output token that has not been routed yet
    Emit,
    /// A scheduled transformation finished
    ProcessingComplete,
    /// The eligibility sweep (or a node's own timer) asserts a node may fire
    ProcessingTrigger,
    /// One-time self-initialization
    RunStart,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::TokenArrival => "TokenArrival",
            Self::Emit => "Emit",
            Self::ProcessingComplete => "ProcessingComplete",
            Self::ProcessingTrigger => "ProcessingTrigger",
            Self::RunStart => "RunStart",
        };
        write!(f, "{}", name)
    }
}

/// Why a `ProcessingTrigger` was scheduled
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    /// The eligibility sweep found the firing condition satisfied
    Eligible,
    /// A node-scheduled deadline (e.g. a batch timeout) elapsed
    Timer,
}

/// Tokens consumed by one firing, grouped by the input they came from
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsumedBatch {
    pub inputs: BTreeMap<String, Vec<Token>>,
}

impl ConsumedBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, input: impl Into<String>, token: Token) {
        self.inputs.entry(input.into()).or_default().push(token);
    }

    /// All consumed tokens, grouped by input name in name order
    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.inputs.values().flatten()
    }

    pub fn input(&self, name: &str) -> &[Token] {
        self.inputs.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn values(&self) -> Vec<Value> {
        self.tokens().map(|t| t.value.clone()).collect()
    }

    pub fn first(&self) -> Option<&Token> {
        self.tokens().next()
    }

    pub fn len(&self) -> usize {
        self.inputs.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn correlations(&self) -> CorrelationSet {
        union_correlations(self.tokens())
    }
}

/// Kind-specific event payload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EventPayload {
    TokenArrival { input: String, token: Token },
    Emit { output: String, token: Token },
    ProcessingComplete { batch: ConsumedBatch },
    ProcessingTrigger { reason: TriggerReason },
    RunStart,
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::TokenArrival { .. } => EventKind::TokenArrival,
            Self::Emit { .. } => EventKind::Emit,
            Self::ProcessingComplete { .. } => EventKind::ProcessingComplete,
            Self::ProcessingTrigger { .. } => EventKind::ProcessingTrigger,
            Self::RunStart => EventKind::RunStart,
        }
    }
}

/// A queued unit of work
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: EventId,
    pub timestamp: Tick,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_node_id: Option<NodeId>,
    pub target_node_id: NodeId,
    pub payload: EventPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caused_by: Option<EventId>,
    #[serde(default)]
    pub correlation_ids: CorrelationSet,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Event {
    fn with_payload(timestamp: Tick, target: NodeId, payload: EventPayload) -> Self {
        Self {
            id: EventId::UNASSIGNED,
            timestamp,
            source_node_id: None,
            target_node_id: target,
            payload,
            caused_by: None,
            correlation_ids: CorrelationSet::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// A token delivered to `target`'s named `input`
    pub fn token_arrival(
        timestamp: Tick,
        source: Option<NodeId>,
        target: NodeId,
        input: impl Into<String>,
        token: Token,
    ) -> Self {
        let correlation_ids = token.correlation_ids.clone();
        let mut event = Self::with_payload(
            timestamp,
            target,
            EventPayload::TokenArrival {
                input: input.into(),
                token,
            },
        );
        event.source_node_id = source;
        event.correlation_ids = correlation_ids;
        event
    }

    /// `node` produced `token` on `output`; addressed back to the producer
    pub fn emit(timestamp: Tick, node: NodeId, output: impl Into<String>, token: Token) -> Self {
        let correlation_ids = token.correlation_ids.clone();
        let mut event = Self::with_payload(
            timestamp,
            node.clone(),
            EventPayload::Emit {
                output: output.into(),
                token,
            },
        );
        event.source_node_id = Some(node);
        event.correlation_ids = correlation_ids;
        event
    }

    pub fn processing_complete(timestamp: Tick, node: NodeId, batch: ConsumedBatch) -> Self {
        let correlation_ids = batch.correlations();
        let mut event = Self::with_payload(
            timestamp,
            node.clone(),
            EventPayload::ProcessingComplete { batch },
        );
        event.source_node_id = Some(node);
        event.correlation_ids = correlation_ids;
        event
    }

    pub fn processing_trigger(timestamp: Tick, node: NodeId, reason: TriggerReason) -> Self {
        Self::with_payload(timestamp, node, EventPayload::ProcessingTrigger { reason })
    }

    pub fn run_start(timestamp: Tick, node: NodeId) -> Self {
        Self::with_payload(timestamp, node, EventPayload::RunStart)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_cause(mut self, cause: EventId) -> Self {
        self.caused_by = Some(cause);
        self
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// The token carried by arrival and emit events
    pub fn token(&self) -> Option<&Token> {
        match &self.payload {
            EventPayload::TokenArrival { token, .. } | EventPayload::Emit { token, .. } => {
                Some(token)
            }
            _ => None,
        }
    }

    /// Every node this event references
    pub fn referenced_nodes(&self) -> impl Iterator<Item = &NodeId> {
        std::iter::once(&self.target_node_id).chain(self.source_node_id.iter())
    }
}

/// An event injected from outside the engine (UI/API layer).
/// Only source nodes accept these.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalEvent {
    pub id: String,
    pub timestamp: Tick,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub payload: Value,
    pub target_node_id: NodeId,
}

impl ExternalEvent {
    pub fn new(id: impl Into<String>, timestamp: Tick, target: NodeId, payload: Value) -> Self {
        Self {
            id: id.into(),
            timestamp,
            kind: "data".into(),
            source: "external".into(),
            payload,
            target_node_id: target,
        }
    }
}
