//! Scenarios: the immutable workflow graph
//!
//! A scenario is loaded once per run and never mutated afterwards. The
//! engine and every processor read it concurrently, so it carries no
//! behaviour beyond graph queries and structural validation.

use crate::{ConfigurationError, NodeId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// Pseudo-input on which source nodes receive externally injected tokens
pub const EXTERNAL_INPUT: &str = "external";

// ── Node kinds ───────────────────────────────────────────────────────

/// The closed set of node kinds the engine knows how to process
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Source,
    Transform,
    StateMachine,
    StateMachineTransform,
    Router,
    Batcher,
    Buffer,
    Join,
    Sink,
}

impl NodeKind {
    pub const ALL: [NodeKind; 9] = [
        NodeKind::Source,
        NodeKind::Transform,
        NodeKind::StateMachine,
        NodeKind::StateMachineTransform,
        NodeKind::Router,
        NodeKind::Batcher,
        NodeKind::Buffer,
        NodeKind::Join,
        NodeKind::Sink,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Transform => "transform",
            Self::StateMachine => "state_machine",
            Self::StateMachineTransform => "state_machine_transform",
            Self::Router => "router",
            Self::Batcher => "batcher",
            Self::Buffer => "buffer",
            Self::Join => "join",
            Self::Sink => "sink",
        }
    }

    /// State-machine kinds fire directly on token arrival
    pub fn is_state_machine(&self) -> bool {
        matches!(self, Self::StateMachine | Self::StateMachineTransform)
    }

    /// Kinds that need a `RunStart` event to initialize themselves
    pub fn self_initializes(&self) -> bool {
        matches!(self, Self::StateMachine)
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for NodeKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(|c: char| c == '-' || c == ' ', "_");
        let kind = match normalized.as_str() {
            "source" | "data_source" | "datasource" => Self::Source,
            "transform" | "process" | "process_node" | "processnode" => Self::Transform,
            "state_machine" | "statemachine" | "fsm" => Self::StateMachine,
            "state_machine_transform" | "statemachinetransform" | "fsm_transform" => Self::StateMachineTransform,
            "router" => Self::Router,
            "batcher" => Self::Batcher,
            "buffer" | "queue" => Self::Buffer,
            "join" => Self::Join,
            "sink" => Self::Sink,
            _ => return Err(ConfigurationError::UnknownNodeKind(s.to_string())),
        };
        Ok(kind)
    }
}

// ── Node configuration ───────────────────────────────────────────────

/// A named node input
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub required: bool,
}

impl InputConfig {
    pub fn new(name: impl Into<String>, required: bool) -> Self {
        Self {
            name: name.into(),
            required,
        }
    }
}

/// A named node output, optionally wired to a destination and carrying
/// the formula that computes its value
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
}

impl OutputConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            destination_node_id: None,
            destination_input: None,
            formula: None,
        }
    }

    pub fn with_formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = Some(formula.into());
        self
    }

    pub fn to_destination(mut self, node: NodeId, input: impl Into<String>) -> Self {
        self.destination_node_id = Some(node);
        self.destination_input = Some(input.into());
        self
    }
}

/// Configuration of one node in the scenario graph
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    #[serde(default = "empty_node_id")]
    pub id: NodeId,
    /// Kind name; parsed into [`NodeKind`] during validation so that an
    /// unknown kind is a configuration error rather than a decode error
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub inputs: Vec<InputConfig>,
    #[serde(default)]
    pub outputs: Vec<OutputConfig>,
    /// Kind-specific processing configuration
    #[serde(default)]
    pub processing_config: Value,
}

fn empty_node_id() -> NodeId {
    NodeId::new("")
}

impl NodeConfig {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: NodeId::new(id),
            kind: kind.as_str().to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            processing_config: Value::Null,
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, required: bool) -> Self {
        self.inputs.push(InputConfig::new(name, required));
        self
    }

    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(OutputConfig::new(name));
        self
    }

    pub fn with_formula_output(mut self, name: impl Into<String>, formula: impl Into<String>) -> Self {
        self.outputs.push(OutputConfig::new(name).with_formula(formula));
        self
    }

    pub fn with_processing_config(mut self, config: Value) -> Self {
        self.processing_config = config;
        self
    }

    /// Parse the declared kind
    pub fn node_kind(&self) -> Result<NodeKind, ConfigurationError> {
        self.kind.parse()
    }

    pub fn input(&self, name: &str) -> Option<&InputConfig> {
        self.inputs.iter().find(|i| i.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&OutputConfig> {
        self.outputs.iter().find(|o| o.name == name)
    }

    /// Inputs flagged as required
    pub fn required_inputs(&self) -> impl Iterator<Item = &InputConfig> {
        self.inputs.iter().filter(|i| i.required)
    }

    pub fn has_required_inputs(&self) -> bool {
        self.inputs.iter().any(|i| i.required)
    }

    /// Read a typed field out of `processing_config`, if present
    pub fn config_field(&self, field: &str) -> Option<&Value> {
        self.processing_config.get(field)
    }
}

// ── Edges ────────────────────────────────────────────────────────────

/// A directed edge from one node output to another node input
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeConfig {
    #[serde(default = "empty_node_id")]
    pub source_node_id: NodeId,
    #[serde(default)]
    pub source_output: String,
    #[serde(default = "empty_node_id")]
    pub target_node_id: NodeId,
    #[serde(default)]
    pub target_input: String,
}

impl EdgeConfig {
    pub fn new(
        source: impl Into<String>,
        output: impl Into<String>,
        target: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        Self {
            source_node_id: NodeId::new(source),
            source_output: output.into(),
            target_node_id: NodeId::new(target),
            target_input: input.into(),
        }
    }
}

/// A resolved routing destination: node plus named input
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub target_node_id: NodeId,
    pub target_input: String,
}

// ── Scenario ─────────────────────────────────────────────────────────

/// The workflow graph
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub edges: Vec<EdgeConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl Scenario {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a scenario from its JSON interchange format
    pub fn from_json(input: &str) -> Result<Self, ConfigurationError> {
        serde_json::from_str(input).map_err(|e| ConfigurationError::Malformed(e.to_string()))
    }

    pub fn from_value(value: Value) -> Result<Self, ConfigurationError> {
        serde_json::from_value(value).map_err(|e| ConfigurationError::Malformed(e.to_string()))
    }

    pub fn with_node(mut self, node: NodeConfig) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_edge(mut self, edge: EdgeConfig) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    // ── Graph queries ────────────────────────────────────────────────

    pub fn node(&self, id: &NodeId) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.iter().any(|n| &n.id == id)
    }

    /// Nodes whose declared kind parses to `kind`, in declaration order
    pub fn nodes_by_kind(&self, kind: NodeKind) -> Vec<&NodeConfig> {
        self.nodes
            .iter()
            .filter(|n| n.node_kind().map(|k| k == kind).unwrap_or(false))
            .collect()
    }

    pub fn outgoing_edges(&self, id: &NodeId) -> Vec<&EdgeConfig> {
        self.edges.iter().filter(|e| &e.source_node_id == id).collect()
    }

    pub fn incoming_edges(&self, id: &NodeId) -> Vec<&EdgeConfig> {
        self.edges.iter().filter(|e| &e.target_node_id == id).collect()
    }

    /// Downstream neighbours of a node, deduplicated, in first-seen order.
    /// Includes destinations declared directly on outputs.
    pub fn neighbors(&self, id: &NodeId) -> Vec<&NodeId> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for edge in self.outgoing_edges(id) {
            if seen.insert(&edge.target_node_id) {
                out.push(&edge.target_node_id);
            }
        }
        if let Some(node) = self.node(id) {
            for output in &node.outputs {
                if let Some(dest) = &output.destination_node_id {
                    if seen.insert(dest) {
                        out.push(dest);
                    }
                }
            }
        }
        out
    }

    /// Destinations of one node output: explicit edges first, then the
    /// output's own destination when no edge already covers it
    pub fn routes_from(&self, id: &NodeId, output: &str) -> Vec<Route> {
        let mut routes: Vec<Route> = self
            .edges
            .iter()
            .filter(|e| &e.source_node_id == id && e.source_output == output)
            .map(|e| Route {
                target_node_id: e.target_node_id.clone(),
                target_input: e.target_input.clone(),
            })
            .collect();

        let declared = self
            .node(id)
            .and_then(|n| n.output(output))
            .and_then(|o| match (&o.destination_node_id, &o.destination_input) {
                (Some(node), Some(input)) => Some(Route {
                    target_node_id: node.clone(),
                    target_input: input.clone(),
                }),
                _ => None,
            });
        if let Some(route) = declared {
            if !routes.contains(&route) {
                routes.push(route);
            }
        }
        routes
    }

    // ── Validation ───────────────────────────────────────────────────

    /// Validate the graph for structural correctness.
    ///
    /// Checks node ids, kinds, input/output naming, and that every edge and
    /// declared output destination references an existing node port.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.nodes.is_empty() {
            return Err(ConfigurationError::MissingField("nodes".into()));
        }

        let mut seen_ids = HashSet::new();
        for node in &self.nodes {
            if node.id.0.trim().is_empty() {
                return Err(ConfigurationError::MissingField("node.id".into()));
            }
            if !seen_ids.insert(&node.id) {
                return Err(ConfigurationError::DuplicateNodeId(node.id.clone()));
            }
            if node.kind.trim().is_empty() {
                return Err(ConfigurationError::MissingField(format!(
                    "kind of node '{}'",
                    node.id
                )));
            }
            node.node_kind()?;

            let mut input_names = HashSet::new();
            for input in &node.inputs {
                if input.name.is_empty() {
                    return Err(ConfigurationError::MissingField(format!(
                        "input name on node '{}'",
                        node.id
                    )));
                }
                if !input_names.insert(input.name.as_str()) {
                    return Err(ConfigurationError::DuplicatePort {
                        node: node.id.clone(),
                        port: input.name.clone(),
                    });
                }
            }

            let mut output_names = HashSet::new();
            for output in &node.outputs {
                if output.name.is_empty() {
                    return Err(ConfigurationError::MissingField(format!(
                        "output name on node '{}'",
                        node.id
                    )));
                }
                if !output_names.insert(output.name.as_str()) {
                    return Err(ConfigurationError::DuplicatePort {
                        node: node.id.clone(),
                        port: output.name.clone(),
                    });
                }
            }
        }

        for edge in &self.edges {
            self.validate_edge(edge)?;
        }

        for node in &self.nodes {
            for output in &node.outputs {
                match (&output.destination_node_id, &output.destination_input) {
                    (None, None) => {}
                    (Some(target), Some(input)) => {
                        self.validate_edge(&EdgeConfig {
                            source_node_id: node.id.clone(),
                            source_output: output.name.clone(),
                            target_node_id: target.clone(),
                            target_input: input.clone(),
                        })?;
                    }
                    _ => {
                        return Err(ConfigurationError::MalformedEdge(format!(
                            "output '{}' on node '{}' must declare both destination node and input",
                            output.name, node.id
                        )))
                    }
                }
            }
        }

        Ok(())
    }

    fn validate_edge(&self, edge: &EdgeConfig) -> Result<(), ConfigurationError> {
        if edge.source_node_id.0.is_empty()
            || edge.target_node_id.0.is_empty()
            || edge.source_output.is_empty()
            || edge.target_input.is_empty()
        {
            return Err(ConfigurationError::MalformedEdge(format!(
                "{}.{} -> {}.{}: every endpoint field is required",
                edge.source_node_id, edge.source_output, edge.target_node_id, edge.target_input
            )));
        }

        let source = self
            .node(&edge.source_node_id)
            .ok_or_else(|| ConfigurationError::UnknownNode(edge.source_node_id.clone()))?;
        let target = self
            .node(&edge.target_node_id)
            .ok_or_else(|| ConfigurationError::UnknownNode(edge.target_node_id.clone()))?;

        if source.output(&edge.source_output).is_none() {
            return Err(ConfigurationError::MalformedEdge(format!(
                "node '{}' has no output '{}'",
                source.id, edge.source_output
            )));
        }
        if target.input(&edge.target_input).is_none() {
            return Err(ConfigurationError::MalformedEdge(format!(
                "node '{}' has no input '{}'",
                target.id, edge.target_input
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pipeline() -> Scenario {
        Scenario::new()
            .with_node(NodeConfig::new("src", NodeKind::Source).with_output("out"))
            .with_node(
                NodeConfig::new("proc", NodeKind::Transform)
                    .with_input("in", true)
                    .with_formula_output("out", "in * 2"),
            )
            .with_node(NodeConfig::new("sink", NodeKind::Sink).with_input("in", false))
            .with_edge(EdgeConfig::new("src", "out", "proc", "in"))
            .with_edge(EdgeConfig::new("proc", "out", "sink", "in"))
    }

    #[test]
    fn test_valid_pipeline() {
        assert!(pipeline().validate().is_ok());
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("source".parse::<NodeKind>().unwrap(), NodeKind::Source);
        assert_eq!("process-node".parse::<NodeKind>().unwrap(), NodeKind::Transform);
        assert_eq!(
            "state-machine".parse::<NodeKind>().unwrap(),
            NodeKind::StateMachine
        );
        assert!(matches!(
            "teleporter".parse::<NodeKind>(),
            Err(ConfigurationError::UnknownNodeKind(_))
        ));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut scenario = pipeline();
        scenario.nodes[1].kind = "wormhole".into();
        assert!(matches!(
            scenario.validate(),
            Err(ConfigurationError::UnknownNodeKind(k)) if k == "wormhole"
        ));
    }

    #[test]
    fn test_edge_to_unknown_node() {
        let scenario = pipeline().with_edge(EdgeConfig::new("proc", "out", "ghost", "in"));
        assert!(matches!(
            scenario.validate(),
            Err(ConfigurationError::UnknownNode(id)) if id == NodeId::new("ghost")
        ));
    }

    #[test]
    fn test_edge_to_undeclared_input() {
        let scenario = pipeline().with_edge(EdgeConfig::new("src", "out", "sink", "side"));
        assert!(matches!(
            scenario.validate(),
            Err(ConfigurationError::MalformedEdge(_))
        ));
    }

    #[test]
    fn test_duplicate_node() {
        let scenario = pipeline().with_node(NodeConfig::new("src", NodeKind::Source));
        assert!(matches!(
            scenario.validate(),
            Err(ConfigurationError::DuplicateNodeId(_))
        ));
    }

    #[test]
    fn test_empty_scenario() {
        assert!(matches!(
            Scenario::new().validate(),
            Err(ConfigurationError::MissingField(_))
        ));
    }

    #[test]
    fn test_from_json_camel_case() {
        let scenario = Scenario::from_json(
            r#"{
                "nodes": [
                    {"id": "d", "kind": "source", "outputs": [{"name": "out"}]},
                    {"id": "s", "kind": "sink", "inputs": [{"name": "in"}]}
                ],
                "edges": [
                    {"sourceNodeId": "d", "sourceOutput": "out", "targetNodeId": "s", "targetInput": "in"}
                ],
                "metadata": {"title": "tiny"}
            }"#,
        )
        .unwrap();

        assert_eq!(scenario.nodes.len(), 2);
        assert_eq!(scenario.metadata["title"], json!("tiny"));
        assert!(scenario.validate().is_ok());
    }

    #[test]
    fn test_missing_edge_field_is_configuration_error() {
        let scenario = Scenario::from_json(
            r#"{
                "nodes": [
                    {"id": "d", "kind": "source", "outputs": [{"name": "out"}]},
                    {"id": "s", "kind": "sink", "inputs": [{"name": "in"}]}
                ],
                "edges": [{"sourceNodeId": "d", "targetNodeId": "s", "targetInput": "in"}]
            }"#,
        )
        .unwrap();
        assert!(matches!(
            scenario.validate(),
            Err(ConfigurationError::MalformedEdge(_))
        ));
    }

    #[test]
    fn test_routes_include_output_destinations() {
        let scenario = Scenario::new()
            .with_node(
                NodeConfig {
                    outputs: vec![OutputConfig::new("out").to_destination(NodeId::new("b"), "in")],
                    ..NodeConfig::new("a", NodeKind::Source)
                },
            )
            .with_node(NodeConfig::new("b", NodeKind::Sink).with_input("in", false))
            .with_node(NodeConfig::new("c", NodeKind::Sink).with_input("in", false))
            .with_edge(EdgeConfig::new("a", "out", "c", "in"))
            .with_edge(EdgeConfig::new("a", "out", "b", "in"));

        assert!(scenario.validate().is_ok());
        let routes = scenario.routes_from(&NodeId::new("a"), "out");
        // explicit edges first, declared destination deduplicated
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].target_node_id, NodeId::new("c"));
        assert_eq!(routes[1].target_node_id, NodeId::new("b"));
        assert_eq!(scenario.neighbors(&NodeId::new("a")).len(), 2);
    }

    #[test]
    fn test_nodes_by_kind() {
        let scenario = pipeline();
        assert_eq!(scenario.nodes_by_kind(NodeKind::Source).len(), 1);
        assert_eq!(scenario.nodes_by_kind(NodeKind::Join).len(), 0);
        assert_eq!(scenario.incoming_edges(&NodeId::new("proc")).len(), 1);
        assert_eq!(scenario.outgoing_edges(&NodeId::new("proc")).len(), 1);
    }
}
