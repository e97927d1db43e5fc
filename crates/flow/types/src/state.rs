//! Per-node mutable state
//!
//! Input buffers are common to every kind; everything else lives in a
//! tagged union so that each processor only sees the shape it owns.

use crate::{Tick, Token};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// State of one node for the life of one run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeState {
    /// FIFO buffer per named input
    pub input_buffers: BTreeMap<String, VecDeque<Token>>,
    /// Tokens produced whose `Emit` has not been handled yet
    pub output_buffer: VecDeque<Token>,
    /// Kind-specific variables
    pub variables: NodeVariables,
}

impl NodeState {
    pub fn new(variables: NodeVariables) -> Self {
        Self {
            input_buffers: BTreeMap::new(),
            output_buffer: VecDeque::new(),
            variables,
        }
    }

    /// Pre-create an empty buffer for each named input
    pub fn with_inputs<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        for name in names {
            self.input_buffers.entry(name.to_string()).or_default();
        }
        self
    }

    pub fn buffer(&self, input: &str) -> Option<&VecDeque<Token>> {
        self.input_buffers.get(input)
    }

    pub fn buffer_mut(&mut self, input: &str) -> &mut VecDeque<Token> {
        self.input_buffers.entry(input.to_string()).or_default()
    }

    pub fn buffer_len(&self, input: &str) -> usize {
        self.input_buffers.get(input).map(VecDeque::len).unwrap_or(0)
    }

    /// Total tokens waiting across all input buffers
    pub fn buffered(&self) -> usize {
        self.input_buffers.values().map(VecDeque::len).sum()
    }

    /// Hold a produced token until its `Emit` comes back to the producer
    pub fn stage_output(&mut self, token: Token) {
        self.output_buffer.push_back(token);
    }

    /// Drop the staged copy of `token`; false when it was never staged
    pub fn release_output(&mut self, token: &Token) -> bool {
        match self.output_buffer.iter().position(|t| t == token) {
            Some(at) => self.output_buffer.remove(at).is_some(),
            None => false,
        }
    }

    /// All buffered tokens, in input-name order
    pub fn buffered_tokens(&self) -> impl Iterator<Item = &Token> {
        self.input_buffers.values().flatten()
    }
}

/// Kind-specific node variables
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeVariables {
    Source(SourceState),
    /// Shared by transform and join nodes
    Transform(TransformState),
    /// Shared by both state-machine kinds
    StateMachine(StateMachineState),
    Router(RouterState),
    Batcher(BatcherState),
    Buffer(BufferState),
    Sink(SinkState),
}

impl NodeVariables {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Source(_) => "source",
            Self::Transform(_) => "transform",
            Self::StateMachine(_) => "state_machine",
            Self::Router(_) => "router",
            Self::Batcher(_) => "batcher",
            Self::Buffer(_) => "buffer",
            Self::Sink(_) => "sink",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceState {
    /// Sequence used to mint correlation ids for anonymous injections
    pub next_sequence: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformState {
    /// A consumed batch is in flight awaiting `ProcessingComplete`
    pub processing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Tick>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMachineState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
    /// Set once the machine has entered its initial state
    pub started: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_output: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatcherState {
    /// Tick at which the currently accumulating batch received its first token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<Tick>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferState {
    pub high_water_mark: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_received_at: Option<Tick>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeId;
    use serde_json::json;

    #[test]
    fn test_buffers() {
        let mut state =
            NodeState::new(NodeVariables::Transform(TransformState::default())).with_inputs(["a", "b"]);
        assert_eq!(state.input_buffers.len(), 2);
        assert_eq!(state.buffered(), 0);

        state
            .buffer_mut("a")
            .push_back(Token::new(json!(1), NodeId::new("x"), 0));
        assert_eq!(state.buffer_len("a"), 1);
        assert_eq!(state.buffer_len("b"), 0);
        assert_eq!(state.buffer_len("missing"), 0);
        assert_eq!(state.buffered(), 1);
    }

    #[test]
    fn test_staged_outputs() {
        let mut state = NodeState::new(NodeVariables::Sink(SinkState::default()));
        let first = Token::new(json!(1), NodeId::new("p"), 3);
        let second = Token::new(json!(2), NodeId::new("p"), 3);
        state.stage_output(first.clone());
        state.stage_output(second.clone());

        assert!(state.release_output(&second));
        assert!(!state.release_output(&second));
        assert_eq!(state.output_buffer, VecDeque::from([first]));
        // outputs never count as buffered input
        assert_eq!(state.buffered(), 0);
    }

    #[test]
    fn test_variables_tagged_serialization() {
        let state = NodeState::new(NodeVariables::StateMachine(StateMachineState {
            current: Some("idle".into()),
            started: true,
        }));
        let encoded = serde_json::to_value(&state).unwrap();
        assert_eq!(encoded["variables"]["kind"], json!("state_machine"));
        assert_eq!(encoded["variables"]["current"], json!("idle"));
        let decoded: NodeState = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, state);
    }
}
