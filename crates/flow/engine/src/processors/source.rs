//! Source: turns injected external data into tokens

use super::{emit_on_all_outputs, emitted, record, state_mismatch, unsupported, NodeProcessor, ProcessOutcome};
use flow_types::{
    ActivityAction, CorrelationId, Event, EventPayload, NodeConfig, NodeKind, NodeState,
    NodeVariables, ProcessResult, SourceState,
};

/// Emits only in response to injected events, never on a timer
#[derive(Clone, Copy, Debug, Default)]
pub struct SourceProcessor;

impl SourceProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl NodeProcessor for SourceProcessor {
    fn kind(&self) -> NodeKind {
        NodeKind::Source
    }

    fn initialize_state(&self, _config: &NodeConfig) -> NodeState {
        NodeState::new(NodeVariables::Source(SourceState::default()))
    }

    fn process(
        &self,
        event: &Event,
        config: &NodeConfig,
        state: &NodeState,
    ) -> ProcessResult<ProcessOutcome> {
        match &event.payload {
            EventPayload::TokenArrival { token, .. } => {
                let mut outcome = ProcessOutcome::new(state.clone());
                if token.internal {
                    return Ok(outcome);
                }

                let NodeVariables::Source(vars) = &mut outcome.new_state.variables else {
                    return Err(state_mismatch(config, "source", state));
                };
                vars.next_sequence += 1;

                let mut produced = token.derive(token.value.clone(), &config.id, event.timestamp);
                if produced.correlation_ids.is_empty() {
                    produced = produced.with_correlation(CorrelationId::new(format!(
                        "{}-{}",
                        config.id, vars.next_sequence
                    )));
                }

                outcome.log(record(
                    event,
                    config,
                    ActivityAction::Received,
                    produced.value.clone(),
                    produced.correlation_ids.clone(),
                ));
                emit_on_all_outputs(&mut outcome, event, config, &produced);
                Ok(outcome)
            }
            EventPayload::Emit { .. } => emitted(event, config, state),
            _ => Err(unsupported(config, event)),
        }
    }

    fn fires_on_trigger(&self) -> bool {
        false
    }
}
