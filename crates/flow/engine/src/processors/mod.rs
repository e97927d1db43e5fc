//! Node processors, one per node kind
//!
//! A processor maps `(event, node config, node state)` to a new state,
//! newly produced events and activity records. It never mutates the state
//! it is given and never touches the queue or ledger itself; the engine
//! applies the outcome, or discards it entirely when `process` fails.

mod batcher;
mod buffer;
mod scope;
mod sink;
mod source;
mod state_machine;
mod transform;
mod router;

pub use batcher::BatcherProcessor;
pub use buffer::BufferProcessor;
pub use router::RouterProcessor;
pub use scope::BatchScope;
pub use sink::SinkProcessor;
pub use source::SourceProcessor;
pub use state_machine::StateMachineProcessor;
pub use transform::{FiringPolicy, TransformProcessor};

use flow_expr::{Bindings, Program};
use flow_types::{
    ActivityAction, ActivityRecord, ConfigurationError, CorrelationSet, Event, EventPayload,
    NodeConfig, NodeKind, NodeState, ProcessResult, ProcessingError, Tick, Token,
};
use serde_json::Value;

/// Result of one `process` call
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessOutcome {
    pub new_state: NodeState,
    pub new_events: Vec<Event>,
    pub activities: Vec<ActivityRecord>,
}

impl ProcessOutcome {
    pub fn new(new_state: NodeState) -> Self {
        Self {
            new_state,
            new_events: Vec::new(),
            activities: Vec::new(),
        }
    }

    pub fn log(&mut self, record: ActivityRecord) {
        self.activities.push(record);
    }

    /// Queue `event`; an `Emit` also stages its token on the producer
    pub fn schedule(&mut self, event: Event) {
        if let EventPayload::Emit { token, .. } = &event.payload {
            self.new_state.stage_output(token.clone());
        }
        self.new_events.push(event);
    }
}

/// The per-kind processing contract
pub trait NodeProcessor: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> NodeKind;

    /// Fresh state for this node at the start of a run
    fn initialize_state(&self, config: &NodeConfig) -> NodeState;

    /// Handle one event addressed to this node
    fn process(
        &self,
        event: &Event,
        config: &NodeConfig,
        state: &NodeState,
    ) -> ProcessResult<ProcessOutcome>;

    /// Whether the node's firing condition holds at `now`. Only consulted
    /// for trigger-driven kinds.
    fn is_ready(&self, _config: &NodeConfig, _state: &NodeState, _now: Tick) -> bool {
        false
    }

    /// Whether the eligibility sweep should schedule triggers for this node
    fn fires_on_trigger(&self) -> bool {
        true
    }
}

/// Build the processor for a node, compiling its formulas
pub fn build_processor(
    config: &NodeConfig,
) -> Result<Box<dyn NodeProcessor>, ConfigurationError> {
    let processor: Box<dyn NodeProcessor> = match config.node_kind()? {
        NodeKind::Source => Box::new(SourceProcessor::new()),
        NodeKind::Transform => Box::new(TransformProcessor::from_config(config, false)?),
        NodeKind::Join => Box::new(TransformProcessor::from_config(config, true)?),
        NodeKind::StateMachine => Box::new(StateMachineProcessor::from_config(config, false)?),
        NodeKind::StateMachineTransform => {
            Box::new(StateMachineProcessor::from_config(config, true)?)
        }
        NodeKind::Router => Box::new(RouterProcessor::from_config(config)?),
        NodeKind::Batcher => Box::new(BatcherProcessor::from_config(config)?),
        NodeKind::Buffer => Box::new(BufferProcessor::from_config(config)?),
        NodeKind::Sink => Box::new(SinkProcessor::new()),
    };
    Ok(processor)
}

// ── Shared helpers ───────────────────────────────────────────────────

pub(crate) fn unsupported(config: &NodeConfig, event: &Event) -> ProcessingError {
    ProcessingError::UnsupportedEvent {
        node: config.id.clone(),
        kind: event.kind(),
    }
}

pub(crate) fn state_mismatch(
    config: &NodeConfig,
    expected: &'static str,
    state: &NodeState,
) -> ProcessingError {
    ProcessingError::StateMismatch {
        node: config.id.clone(),
        expected,
        found: state.variables.name(),
    }
}

pub(crate) fn expression_failed(config: &NodeConfig, err: flow_expr::ExprError) -> ProcessingError {
    ProcessingError::Expression {
        node: config.id.clone(),
        message: err.to_string(),
    }
}

pub(crate) fn record(
    event: &Event,
    config: &NodeConfig,
    action: ActivityAction,
    value: Value,
    correlation_ids: CorrelationSet,
) -> ActivityRecord {
    ActivityRecord::new(event.timestamp, config.id.clone(), action, value)
        .with_correlations(correlation_ids)
}

/// Log an `Emit` addressed back to its producer
pub(crate) fn emitted(
    event: &Event,
    config: &NodeConfig,
    state: &NodeState,
) -> ProcessResult<ProcessOutcome> {
    let token = event.token().ok_or_else(|| unsupported(config, event))?;
    let mut outcome = ProcessOutcome::new(state.clone());
    outcome.new_state.release_output(token);
    outcome.log(record(
        event,
        config,
        ActivityAction::Emitted,
        token.value.clone(),
        token.correlation_ids.clone(),
    ));
    Ok(outcome)
}

/// One `Emit` per declared output, all carrying `token`
pub(crate) fn emit_on_all_outputs(
    outcome: &mut ProcessOutcome,
    event: &Event,
    config: &NodeConfig,
    token: &Token,
) {
    for output in &config.outputs {
        outcome.schedule(
            Event::emit(event.timestamp, config.id.clone(), &output.name, token.clone())
                .with_cause(event.id),
        );
    }
}

/// Reject tokens for inputs the node does not declare
pub(crate) fn check_input(config: &NodeConfig, input: &str) -> ProcessResult<()> {
    if config.input(input).is_none() {
        return Err(ProcessingError::UnknownInput {
            node: config.id.clone(),
            input: input.to_string(),
        });
    }
    Ok(())
}

pub(crate) fn compile(
    config: &NodeConfig,
    source: &str,
    bindings: &Bindings,
) -> Result<Program, ConfigurationError> {
    Program::compile(source, bindings).map_err(|e| ConfigurationError::InvalidExpression {
        node: config.id.clone(),
        message: format!("'{}': {}", source, e),
    })
}

pub(crate) fn invalid_config(config: &NodeConfig, message: impl Into<String>) -> ConfigurationError {
    ConfigurationError::InvalidProcessingConfig {
        node: config.id.clone(),
        message: message.into(),
    }
}

/// Optional non-negative integer setting
pub(crate) fn config_u64(config: &NodeConfig, field: &str) -> Result<Option<u64>, ConfigurationError> {
    match config.config_field(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| invalid_config(config, format!("'{}' must be a non-negative integer", field))),
    }
}

/// Optional tick-count setting; must fit the signed clock
pub(crate) fn config_ticks(config: &NodeConfig, field: &str) -> Result<Option<Tick>, ConfigurationError> {
    config_u64(config, field)?
        .map(|n| {
            Tick::try_from(n)
                .map_err(|_| invalid_config(config, format!("'{}' is out of range", field)))
        })
        .transpose()
}

pub(crate) fn config_str<'a>(
    config: &'a NodeConfig,
    field: &str,
) -> Result<Option<&'a str>, ConfigurationError> {
    match config.config_field(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(invalid_config(config, format!("'{}' must be a string", field))),
    }
}

/// Require `output` to be declared on the node
pub(crate) fn check_output(config: &NodeConfig, output: &str) -> Result<(), ConfigurationError> {
    if config.output(output).is_none() {
        return Err(invalid_config(
            config,
            format!("references undeclared output '{}'", output),
        ));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by the processor unit tests

    use flow_types::{CorrelationId, Event, EventId, NodeId, Tick, Token, TriggerReason};
    use serde_json::Value;

    pub fn token(value: Value, cid: &str) -> Token {
        Token::new(value, NodeId::new("upstream"), 0).with_correlation(CorrelationId::new(cid))
    }

    pub fn arrival(ts: Tick, node: &str, input: &str, token: Token) -> Event {
        let mut event = Event::token_arrival(ts, Some(NodeId::new("upstream")), NodeId::new(node), input, token);
        event.id = EventId(ts as u64 + 100);
        event
    }

    pub fn trigger(ts: Tick, node: &str) -> Event {
        Event::processing_trigger(ts, NodeId::new(node), TriggerReason::Eligible)
    }
}
