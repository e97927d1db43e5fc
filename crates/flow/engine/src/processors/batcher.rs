//! Batcher: groups tokens by count, or flushes a partial batch on timeout

use super::scope::{formula_bindings, BatchScope};
use super::{
    check_input, compile, config_str, config_ticks, config_u64, emit_on_all_outputs, emitted,
    expression_failed, invalid_config, record, state_mismatch, unsupported, NodeProcessor,
    ProcessOutcome,
};
use flow_expr::Program;
use flow_types::{
    union_correlations, ActivityAction, BatcherState, ConfigurationError, ConsumedBatch, Event,
    EventPayload, NodeConfig, NodeKind, NodeState, NodeVariables, ProcessResult, Tick, Token,
    TriggerReason,
};
use serde_json::{json, Value};

pub const DEFAULT_BATCH_SIZE: usize = 10;

#[derive(Clone, Debug)]
pub struct BatcherProcessor {
    batch_size: usize,
    timeout: Option<Tick>,
    aggregate: Option<Program>,
}

impl BatcherProcessor {
    pub fn from_config(config: &NodeConfig) -> Result<Self, ConfigurationError> {
        let batch_size = match config_u64(config, "batchSize")? {
            None => DEFAULT_BATCH_SIZE,
            Some(0) => return Err(invalid_config(config, "'batchSize' must be at least 1")),
            Some(n) => n as usize,
        };
        let timeout = match config_ticks(config, "timeout")? {
            None => None,
            Some(0) => return Err(invalid_config(config, "'timeout' must be at least 1")),
            Some(t) => Some(t),
        };
        let aggregate = config_str(config, "aggregate")?
            .map(|source| compile(config, source, &formula_bindings(config)))
            .transpose()?;
        Ok(Self {
            batch_size,
            timeout,
            aggregate,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn opened_at(state: &NodeState) -> Option<Tick> {
        match &state.variables {
            NodeVariables::Batcher(vars) => vars.opened_at,
            _ => None,
        }
    }

    /// Start the batch window at `now` and arm its timer
    fn open(&self, outcome: &mut ProcessOutcome, config: &NodeConfig, now: Tick) {
        outcome.new_state.variables = NodeVariables::Batcher(BatcherState {
            opened_at: Some(now),
        });
        if let Some(timeout) = self.timeout {
            outcome.schedule(Event::processing_trigger(
                now.saturating_add(timeout),
                config.id.clone(),
                TriggerReason::Timer,
            ));
        }
    }

    /// Drain up to `batch_size` tokens, inputs in name order
    fn take(&self, state: &mut NodeState) -> ConsumedBatch {
        let mut batch = ConsumedBatch::new();
        for (name, buffer) in state.input_buffers.iter_mut() {
            while batch.len() < self.batch_size {
                match buffer.pop_front() {
                    Some(token) => batch.push(name.as_str(), token),
                    None => break,
                }
            }
        }
        batch
    }

    fn flush(
        &self,
        event: &Event,
        config: &NodeConfig,
        state: &NodeState,
    ) -> ProcessResult<ProcessOutcome> {
        let mut outcome = ProcessOutcome::new(state.clone());
        let batch = self.take(&mut outcome.new_state);

        for (input, tokens) in &batch.inputs {
            for token in tokens {
                outcome.log(record(
                    event,
                    config,
                    ActivityAction::Consumed,
                    json!({ "input": input, "value": token.value }),
                    token.correlation_ids.clone(),
                ));
            }
        }

        let value = match &self.aggregate {
            Some(program) => program
                .evaluate(&BatchScope::new(&batch))
                .map_err(|e| expression_failed(config, e)),
            None => Ok(Value::Array(batch.values())),
        };
        let correlations = union_correlations(batch.tokens());
        match value {
            Ok(value) => {
                outcome.log(record(
                    event,
                    config,
                    ActivityAction::ProcessingComplete,
                    json!({ "size": batch.len(), "value": value }),
                    correlations.clone(),
                ));
                let produced = Token::new(value, config.id.clone(), event.timestamp)
                    .with_correlations(correlations);
                emit_on_all_outputs(&mut outcome, event, config, &produced);
            }
            // the batch stays consumed so the tokens behind it can flush
            Err(err) => outcome.log(record(
                event,
                config,
                ActivityAction::Error,
                json!({ "size": batch.len(), "values": batch.values(), "error": err.to_string() }),
                correlations,
            )),
        }

        if outcome.new_state.buffered() > 0 {
            self.open(&mut outcome, config, event.timestamp);
        } else {
            outcome.new_state.variables = NodeVariables::Batcher(BatcherState::default());
        }
        Ok(outcome)
    }

    fn on_trigger(
        &self,
        event: &Event,
        config: &NodeConfig,
        state: &NodeState,
        reason: TriggerReason,
    ) -> ProcessResult<ProcessOutcome> {
        if !matches!(state.variables, NodeVariables::Batcher(_)) {
            return Err(state_mismatch(config, "batcher", state));
        }
        let due = match reason {
            TriggerReason::Eligible => state.buffered() >= self.batch_size,
            TriggerReason::Timer => match (Self::opened_at(state), self.timeout) {
                (Some(opened), Some(timeout)) => {
                    event.timestamp >= opened.saturating_add(timeout) && state.buffered() > 0
                }
                _ => false,
            },
        };
        if !due {
            // stale timer or a trigger that lost a race
            return Ok(ProcessOutcome::new(state.clone()));
        }
        self.flush(event, config, state)
    }
}

impl NodeProcessor for BatcherProcessor {
    fn kind(&self) -> NodeKind {
        NodeKind::Batcher
    }

    fn initialize_state(&self, config: &NodeConfig) -> NodeState {
        NodeState::new(NodeVariables::Batcher(BatcherState::default()))
            .with_inputs(config.inputs.iter().map(|i| i.name.as_str()))
    }

    fn process(
        &self,
        event: &Event,
        config: &NodeConfig,
        state: &NodeState,
    ) -> ProcessResult<ProcessOutcome> {
        match &event.payload {
            EventPayload::TokenArrival { input, token } => {
                check_input(config, input)?;
                if !matches!(state.variables, NodeVariables::Batcher(_)) {
                    return Err(state_mismatch(config, "batcher", state));
                }
                let mut outcome = ProcessOutcome::new(state.clone());
                if token.internal {
                    return Ok(outcome);
                }
                outcome.new_state.buffer_mut(input).push_back(token.clone());
                outcome.log(record(
                    event,
                    config,
                    ActivityAction::Received,
                    token.value.clone(),
                    token.correlation_ids.clone(),
                ));
                if Self::opened_at(state).is_none() {
                    self.open(&mut outcome, config, event.timestamp);
                }
                Ok(outcome)
            }
            EventPayload::ProcessingTrigger { reason } => {
                self.on_trigger(event, config, state, *reason)
            }
            EventPayload::Emit { .. } => emitted(event, config, state),
            _ => Err(unsupported(config, event)),
        }
    }

    fn is_ready(&self, _config: &NodeConfig, state: &NodeState, _now: Tick) -> bool {
        state.buffered() >= self.batch_size
    }
}
