//! Buffer: FIFO holding area, releases one token per trigger

use super::{
    check_input, config_u64, emit_on_all_outputs, emitted, invalid_config, record, state_mismatch,
    unsupported, NodeProcessor, ProcessOutcome,
};
use flow_types::{
    ActivityAction, BufferState, ConfigurationError, Event, EventPayload, NodeConfig, NodeKind,
    NodeState, NodeVariables, ProcessResult, Tick,
};
use serde_json::json;

#[derive(Clone, Debug, Default)]
pub struct BufferProcessor {
    capacity: Option<usize>,
}

impl BufferProcessor {
    pub fn from_config(config: &NodeConfig) -> Result<Self, ConfigurationError> {
        let capacity = match config_u64(config, "capacity")? {
            Some(0) => return Err(invalid_config(config, "'capacity' must be at least 1")),
            other => other.map(|c| c as usize),
        };
        Ok(Self { capacity })
    }

    fn release(
        &self,
        event: &Event,
        config: &NodeConfig,
        state: &NodeState,
    ) -> ProcessResult<ProcessOutcome> {
        let mut outcome = ProcessOutcome::new(state.clone());
        let next = outcome
            .new_state
            .input_buffers
            .iter_mut()
            .find_map(|(name, buffer)| buffer.pop_front().map(|token| (name.clone(), token)));
        let Some((input, token)) = next else {
            return Ok(outcome);
        };

        outcome.log(record(
            event,
            config,
            ActivityAction::Consumed,
            json!({ "input": input, "value": token.value }),
            token.correlation_ids.clone(),
        ));
        let produced = token.derive(token.value.clone(), &config.id, event.timestamp);
        emit_on_all_outputs(&mut outcome, event, config, &produced);
        Ok(outcome)
    }
}

impl NodeProcessor for BufferProcessor {
    fn kind(&self) -> NodeKind {
        NodeKind::Buffer
    }

    fn initialize_state(&self, config: &NodeConfig) -> NodeState {
        NodeState::new(NodeVariables::Buffer(BufferState::default()))
            .with_inputs(config.inputs.iter().map(|i| i.name.as_str()))
    }

    fn process(
        &self,
        event: &Event,
        config: &NodeConfig,
        state: &NodeState,
    ) -> ProcessResult<ProcessOutcome> {
        if !matches!(state.variables, NodeVariables::Buffer(_)) {
            return Err(state_mismatch(config, "buffer", state));
        }
        match &event.payload {
            EventPayload::TokenArrival { input, token } => {
                check_input(config, input)?;
                let mut outcome = ProcessOutcome::new(state.clone());
                if token.internal {
                    return Ok(outcome);
                }
                if self.capacity.is_some_and(|cap| state.buffered() >= cap) {
                    outcome.log(record(
                        event,
                        config,
                        ActivityAction::Rejected,
                        json!({ "value": token.value, "reason": "buffer full" }),
                        token.correlation_ids.clone(),
                    ));
                    return Ok(outcome);
                }

                outcome.new_state.buffer_mut(input).push_back(token.clone());
                let held = outcome.new_state.buffered();
                if let NodeVariables::Buffer(vars) = &mut outcome.new_state.variables {
                    vars.high_water_mark = vars.high_water_mark.max(held);
                }
                outcome.log(record(
                    event,
                    config,
                    ActivityAction::Received,
                    token.value.clone(),
                    token.correlation_ids.clone(),
                ));
                Ok(outcome)
            }
            EventPayload::ProcessingTrigger { .. } => self.release(event, config, state),
            EventPayload::Emit { .. } => emitted(event, config, state),
            _ => Err(unsupported(config, event)),
        }
    }

    fn is_ready(&self, _config: &NodeConfig, state: &NodeState, _now: Tick) -> bool {
        state.buffered() > 0
    }
}
