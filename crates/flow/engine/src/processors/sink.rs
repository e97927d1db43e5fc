//! Sink: terminal node, records what reaches it

use super::{check_input, record, state_mismatch, unsupported, NodeProcessor, ProcessOutcome};
use flow_types::{
    ActivityAction, Event, EventPayload, NodeConfig, NodeKind, NodeState, NodeVariables,
    ProcessResult, SinkState,
};

#[derive(Clone, Copy, Debug, Default)]
pub struct SinkProcessor;

impl SinkProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl NodeProcessor for SinkProcessor {
    fn kind(&self) -> NodeKind {
        NodeKind::Sink
    }

    fn initialize_state(&self, _config: &NodeConfig) -> NodeState {
        NodeState::new(NodeVariables::Sink(SinkState::default()))
    }

    fn process(
        &self,
        event: &Event,
        config: &NodeConfig,
        state: &NodeState,
    ) -> ProcessResult<ProcessOutcome> {
        let EventPayload::TokenArrival { input, token } = &event.payload else {
            return Err(unsupported(config, event));
        };
        check_input(config, input)?;
        let mut outcome = ProcessOutcome::new(state.clone());
        if token.internal {
            return Ok(outcome);
        }
        let NodeVariables::Sink(vars) = &mut outcome.new_state.variables else {
            return Err(state_mismatch(config, "sink", state));
        };
        vars.last_received_at = Some(event.timestamp);

        for action in [ActivityAction::Received, ActivityAction::Consumed] {
            outcome.log(record(
                event,
                config,
                action,
                token.value.clone(),
                token.correlation_ids.clone(),
            ));
        }
        Ok(outcome)
    }

    fn fires_on_trigger(&self) -> bool {
        false
    }
}
