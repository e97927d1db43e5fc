//! Error taxonomy for the token-flow engine

use crate::{EventKind, NodeId};

/// Scenario problems detected before any event is processed.
/// Fatal at `initialize`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Malformed scenario: {0}")]
    Malformed(String),

    #[error("Unknown node kind: '{0}'")]
    UnknownNodeKind(String),

    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Duplicate node ID: {0}")]
    DuplicateNodeId(NodeId),

    #[error("Duplicate port '{port}' on node {node}")]
    DuplicatePort { node: NodeId, port: String },

    #[error("Malformed edge: {0}")]
    MalformedEdge(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid processing config for node {node}: {message}")]
    InvalidProcessingConfig { node: NodeId, message: String },

    #[error("Invalid expression on node {node}: {message}")]
    InvalidExpression { node: NodeId, message: String },
}

/// Failure while one processor handles one event. Recorded as an `error`
/// activity; the failing event's state delta is discarded.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProcessingError {
    #[error("Node {node} does not handle {kind} events")]
    UnsupportedEvent { node: NodeId, kind: EventKind },

    #[error("Node {node} has state of kind '{found}', expected '{expected}'")]
    StateMismatch {
        node: NodeId,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Unknown input '{input}' on node {node}")]
    UnknownInput { node: NodeId, input: String },

    #[error("Expression evaluation failed on node {node}: {message}")]
    Expression { node: NodeId, message: String },

    #[error("No processor registered for node {0}")]
    NoProcessor(NodeId),
}

impl ProcessingError {
    pub fn node(&self) -> &NodeId {
        match self {
            Self::UnsupportedEvent { node, .. }
            | Self::StateMismatch { node, .. }
            | Self::UnknownInput { node, .. }
            | Self::Expression { node, .. } => node,
            Self::NoProcessor(node) => node,
        }
    }
}

/// Top-level engine errors
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),

    #[error("Engine is {actual}, operation requires {expected}")]
    InvalidLifecycle {
        expected: &'static str,
        actual: String,
    },

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("External events may only target source nodes; {0} is not a source")]
    NotASource(NodeId),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for engine operations
pub type FlowResult<T> = Result<T, FlowError>;

/// Result type alias for processor calls
pub type ProcessResult<T> = Result<T, ProcessingError>;

// ── Validation diagnostics ───────────────────────────────────────────

/// A single non-fatal inconsistency
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ValidationIssue {
    /// Component that reported it (`queue`, `ledger`, `scenario`, `engine`)
    pub component: String,
    pub message: String,
}

/// Outcome of a `validate()` call: `(ok, issues)`
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn push(&mut self, component: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            component: component.into(),
            message: message.into(),
        });
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.issues.extend(other.issues);
    }
}
