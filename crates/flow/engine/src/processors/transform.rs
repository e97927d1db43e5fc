//! Transform and Join: consume a batch, wait out the processing time, then
//! evaluate one formula per output

use super::scope::{formula_bindings, BatchScope};
use super::{
    check_input, compile, config_ticks, config_u64, emitted, expression_failed, invalid_config,
    record, state_mismatch, unsupported, NodeProcessor, ProcessOutcome,
};
use flow_expr::Program;
use flow_types::{
    ActivityAction, ConfigurationError, ConsumedBatch, Event, EventPayload, NodeConfig, NodeKind,
    NodeState, NodeVariables, ProcessResult, Tick, Token, TransformState,
};
use serde_json::{Map, Value};

/// When a transform may fire
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FiringPolicy {
    /// Every required input holds a token. Consumes one token per required
    /// input plus one from each optional input that has any.
    Join {
        required: Vec<String>,
        optional: Vec<String>,
    },
    /// Some single input holds `batch_size` tokens; consumes that many from it
    Batch { batch_size: usize },
}

impl FiringPolicy {
    /// Join nodes always synchronize; when no input is flagged, all are
    /// required. Transforms synchronize only when some input is flagged.
    pub fn for_node(config: &NodeConfig, join: bool) -> Result<Self, ConfigurationError> {
        if join || config.has_required_inputs() {
            if config.inputs.is_empty() {
                return Err(invalid_config(config, "join requires at least one input"));
            }
            let all_required = !config.has_required_inputs();
            let (required, optional): (Vec<_>, Vec<_>) = config
                .inputs
                .iter()
                .partition(|input| all_required || input.required);
            return Ok(Self::Join {
                required: required.into_iter().map(|i| i.name.clone()).collect(),
                optional: optional.into_iter().map(|i| i.name.clone()).collect(),
            });
        }

        let batch_size = config_u64(config, "batchSize")?.unwrap_or(1);
        if batch_size == 0 {
            return Err(invalid_config(config, "'batchSize' must be at least 1"));
        }
        Ok(Self::Batch {
            batch_size: batch_size as usize,
        })
    }

    fn is_satisfied(&self, state: &NodeState) -> bool {
        match self {
            Self::Join { required, .. } => required.iter().all(|name| state.buffer_len(name) > 0),
            Self::Batch { batch_size } => state
                .input_buffers
                .values()
                .any(|buffer| buffer.len() >= *batch_size),
        }
    }

    /// Remove the tokens for one firing from `state`
    fn take(&self, state: &mut NodeState) -> ConsumedBatch {
        let mut batch = ConsumedBatch::new();
        match self {
            Self::Join { required, optional } => {
                for name in required.iter().chain(optional) {
                    if let Some(token) = state.buffer_mut(name).pop_front() {
                        batch.push(name.as_str(), token);
                    }
                }
            }
            Self::Batch { batch_size } => {
                let ready = state
                    .input_buffers
                    .iter_mut()
                    .find(|(_, buffer)| buffer.len() >= *batch_size);
                if let Some((name, buffer)) = ready {
                    for token in buffer.drain(..*batch_size) {
                        batch.push(name.as_str(), token);
                    }
                }
            }
        }
        batch
    }
}

#[derive(Clone, Debug)]
struct OutputFormula {
    name: String,
    program: Option<Program>,
}

/// Transform (and Join) processor
#[derive(Clone, Debug)]
pub struct TransformProcessor {
    join: bool,
    policy: FiringPolicy,
    processing_time: Tick,
    outputs: Vec<OutputFormula>,
}

impl TransformProcessor {
    pub fn from_config(config: &NodeConfig, join: bool) -> Result<Self, ConfigurationError> {
        let policy = FiringPolicy::for_node(config, join)?;
        let processing_time = config_ticks(config, "processingTime")?.unwrap_or(1);

        let bindings = formula_bindings(config);
        let outputs = config
            .outputs
            .iter()
            .map(|output| {
                let program = output
                    .formula
                    .as_deref()
                    .filter(|f| !f.trim().is_empty())
                    .map(|f| compile(config, f, &bindings))
                    .transpose()?;
                Ok(OutputFormula {
                    name: output.name.clone(),
                    program,
                })
            })
            .collect::<Result<Vec<_>, ConfigurationError>>()?;

        Ok(Self {
            join,
            policy,
            processing_time,
            outputs,
        })
    }

    pub fn policy(&self) -> &FiringPolicy {
        &self.policy
    }

    pub fn processing_time(&self) -> Tick {
        self.processing_time
    }

    /// A batch is in flight and its completion tick has not been reached
    fn in_flight(&self, vars: &TransformState, now: Tick) -> bool {
        vars.processing
            && vars
                .started_at
                .map_or(true, |started| now < started.saturating_add(self.processing_time))
    }

    fn fire(
        &self,
        event: &Event,
        config: &NodeConfig,
        state: &NodeState,
    ) -> ProcessResult<ProcessOutcome> {
        let mut outcome = ProcessOutcome::new(state.clone());
        let NodeVariables::Transform(vars) = &state.variables else {
            return Err(state_mismatch(config, "transform", state));
        };
        if self.in_flight(vars, event.timestamp) || !self.policy.is_satisfied(state) {
            return Ok(outcome);
        }

        let batch = self.policy.take(&mut outcome.new_state);
        for (input, tokens) in &batch.inputs {
            for token in tokens {
                outcome.log(record(
                    event,
                    config,
                    ActivityAction::Consumed,
                    serde_json::json!({ "input": input, "value": token.value }),
                    token.correlation_ids.clone(),
                ));
            }
        }
        outcome.log(record(
            event,
            config,
            ActivityAction::ProcessingStarted,
            BatchScope::new(&batch).inputs_object(),
            batch.correlations(),
        ));

        outcome.new_state.variables = NodeVariables::Transform(TransformState {
            processing: true,
            started_at: Some(event.timestamp),
        });
        outcome.schedule(
            Event::processing_complete(
                event.timestamp.saturating_add(self.processing_time),
                config.id.clone(),
                batch,
            )
            .with_cause(event.id),
        );
        Ok(outcome)
    }

    fn complete(
        &self,
        event: &Event,
        config: &NodeConfig,
        state: &NodeState,
        batch: &ConsumedBatch,
    ) -> ProcessResult<ProcessOutcome> {
        let scope = BatchScope::new(batch);
        let mut values = Vec::with_capacity(self.outputs.len());
        for output in &self.outputs {
            let value = match &output.program {
                Some(program) => program
                    .evaluate(&scope)
                    .map_err(|e| expression_failed(config, e))?,
                None => scope.default_value(),
            };
            values.push((output.name.as_str(), value));
        }

        let correlation_ids = batch.correlations();
        let logged = match values.as_slice() {
            [] => scope.default_value(),
            [(_, single)] => single.clone(),
            many => Value::Object(
                many.iter()
                    .map(|(name, value)| (name.to_string(), value.clone()))
                    .collect::<Map<_, _>>(),
            ),
        };

        let mut outcome = ProcessOutcome::new(state.clone());
        outcome.new_state.variables = NodeVariables::Transform(TransformState::default());
        outcome.log(record(
            event,
            config,
            ActivityAction::ProcessingComplete,
            logged,
            correlation_ids.clone(),
        ));
        for (name, value) in values {
            let token = Token::new(value, config.id.clone(), event.timestamp)
                .with_correlations(correlation_ids.clone());
            outcome.schedule(
                Event::emit(event.timestamp, config.id.clone(), name, token).with_cause(event.id),
            );
        }
        Ok(outcome)
    }
}

impl NodeProcessor for TransformProcessor {
    fn kind(&self) -> NodeKind {
        if self.join {
            NodeKind::Join
        } else {
            NodeKind::Transform
        }
    }

    fn initialize_state(&self, config: &NodeConfig) -> NodeState {
        NodeState::new(NodeVariables::Transform(TransformState::default()))
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
                Ok(outcome)
            }
            EventPayload::ProcessingTrigger { .. } => self.fire(event, config, state),
            EventPayload::ProcessingComplete { batch } => self.complete(event, config, state, batch),
            EventPayload::Emit { .. } => emitted(event, config, state),
            EventPayload::RunStart => Err(unsupported(config, event)),
        }
    }

    fn is_ready(&self, _config: &NodeConfig, state: &NodeState, now: Tick) -> bool {
        let NodeVariables::Transform(vars) = &state.variables else {
            return false;
        };
        !self.in_flight(vars, now) && self.policy.is_satisfied(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::testing::{arrival, token, trigger};
    use flow_types::{CorrelationId, EventKind, NodeId, ProcessingError};
    use serde_json::json;

    fn join_config() -> NodeConfig {
        NodeConfig::new("j", NodeKind::Join)
            .with_input("a", false)
            .with_input("b", false)
            .with_formula_output("sum", "a + b")
            .with_formula_output("avg", "(a + b) / 2")
    }

    fn apply(
        processor: &TransformProcessor,
        config: &NodeConfig,
        state: &NodeState,
        event: &Event,
    ) -> ProcessOutcome {
        processor.process(event, config, state).unwrap()
    }

    #[test]
    fn test_join_policy_from_unflagged_inputs() {
        let processor = TransformProcessor::from_config(&join_config(), true).unwrap();
        assert_eq!(
            processor.policy(),
            &FiringPolicy::Join {
                required: vec!["a".into(), "b".into()],
                optional: vec![],
            }
        );
        assert_eq!(processor.kind(), NodeKind::Join);
    }

    #[test]
    fn test_transform_policy_selection() {
        let mixed = NodeConfig::new("p", NodeKind::Transform)
            .with_input("a", true)
            .with_input("hint", false)
            .with_output("out");
        assert_eq!(
            TransformProcessor::from_config(&mixed, false).unwrap().policy(),
            &FiringPolicy::Join {
                required: vec!["a".into()],
                optional: vec!["hint".into()],
            }
        );

        let legacy = NodeConfig::new("p", NodeKind::Transform)
            .with_input("in", false)
            .with_output("out")
            .with_processing_config(json!({"batchSize": 3}));
        assert_eq!(
            TransformProcessor::from_config(&legacy, false).unwrap().policy(),
            &FiringPolicy::Batch { batch_size: 3 }
        );
    }

    #[test]
    fn test_join_waits_for_every_input() {
        let config = join_config();
        let processor = TransformProcessor::from_config(&config, true).unwrap();
        let state = processor.initialize_state(&config);

        let after_a = apply(&processor, &config, &state, &arrival(1, "j", "a", token(json!(4), "x")));
        assert!(!processor.is_ready(&config, &after_a.new_state, 1));

        // a premature trigger is a no-op
        let early = apply(&processor, &config, &after_a.new_state, &trigger(2, "j"));
        assert!(early.activities.is_empty());
        assert_eq!(early.new_state, after_a.new_state);

        let after_b = apply(&processor, &config, &after_a.new_state, &arrival(2, "j", "b", token(json!(6), "y")));
        assert!(processor.is_ready(&config, &after_b.new_state, 2));
    }

    #[test]
    fn test_fire_then_complete_multi_output() {
        let config = join_config();
        let processor = TransformProcessor::from_config(&config, true).unwrap();
        let mut state = processor.initialize_state(&config);
        state.buffer_mut("a").push_back(token(json!(4), "x"));
        state.buffer_mut("b").push_back(token(json!(6), "y"));

        let fired = apply(&processor, &config, &state, &trigger(3, "j"));
        let actions: Vec<ActivityAction> = fired.activities.iter().map(|a| a.action).collect();
        assert_eq!(
            actions,
            vec![
                ActivityAction::Consumed,
                ActivityAction::Consumed,
                ActivityAction::ProcessingStarted
            ]
        );
        assert_eq!(fired.new_state.buffered(), 0);
        assert!(!processor.is_ready(&config, &fired.new_state, 3));

        let complete = &fired.new_events[0];
        assert_eq!(complete.kind(), EventKind::ProcessingComplete);
        assert_eq!(complete.timestamp, 4);

        let done = apply(&processor, &config, &fired.new_state, complete);
        assert_eq!(done.activities[0].action, ActivityAction::ProcessingComplete);
        assert_eq!(done.activities[0].value, json!({"sum": 10, "avg": 5}));

        let values: Vec<_> = done.new_events.iter().map(|e| e.token().unwrap().value.clone()).collect();
        assert_eq!(values, vec![json!(10), json!(5)]);
        for event in &done.new_events {
            let ids = &event.token().unwrap().correlation_ids;
            assert!(ids.contains(&CorrelationId::new("x")));
            assert!(ids.contains(&CorrelationId::new("y")));
        }
        assert_eq!(
            done.new_state.variables,
            NodeVariables::Transform(TransformState::default())
        );
    }

    #[test]
    fn test_legacy_batch_mode() {
        let config = NodeConfig::new("p", NodeKind::Transform)
            .with_input("in", false)
            .with_formula_output("total", "sum(batch)")
            .with_processing_config(json!({"batchSize": 2, "processingTime": 5}));
        let processor = TransformProcessor::from_config(&config, false).unwrap();
        let mut state = processor.initialize_state(&config);
        state.buffer_mut("in").push_back(token(json!(1), "a"));
        assert!(!processor.is_ready(&config, &state, 0));
        state.buffer_mut("in").push_back(token(json!(2), "b"));
        state.buffer_mut("in").push_back(token(json!(3), "c"));
        assert!(processor.is_ready(&config, &state, 0));

        let fired = apply(&processor, &config, &state, &trigger(0, "p"));
        assert_eq!(fired.new_state.buffer_len("in"), 1);
        assert_eq!(fired.new_events[0].timestamp, 5);

        let done = apply(&processor, &config, &fired.new_state, &fired.new_events[0]);
        assert_eq!(done.new_events[0].token().unwrap().value, json!(3));
    }

    #[test]
    fn test_default_output_passes_value_through() {
        let config = NodeConfig::new("p", NodeKind::Transform)
            .with_input("in", true)
            .with_output("out");
        let processor = TransformProcessor::from_config(&config, false).unwrap();
        let mut state = processor.initialize_state(&config);
        state.buffer_mut("in").push_back(token(json!({"k": 1}), "a"));

        let fired = apply(&processor, &config, &state, &trigger(0, "p"));
        let done = apply(&processor, &config, &fired.new_state, &fired.new_events[0]);
        assert_eq!(done.new_events[0].token().unwrap().value, json!({"k": 1}));
    }

    #[test]
    fn test_formula_error_is_processing_error() {
        let config = NodeConfig::new("p", NodeKind::Transform)
            .with_input("in", true)
            .with_formula_output("out", "in / 0");
        let processor = TransformProcessor::from_config(&config, false).unwrap();
        let mut state = processor.initialize_state(&config);
        state.buffer_mut("in").push_back(token(json!(1), "a"));

        let fired = apply(&processor, &config, &state, &trigger(0, "p"));
        let err = processor
            .process(&fired.new_events[0], &config, &fired.new_state)
            .unwrap_err();
        assert!(matches!(err, ProcessingError::Expression { .. }));

        // once the completion tick has passed the node is free again
        let mut stale = fired.new_state.clone();
        stale.buffer_mut("in").push_back(token(json!(2), "b"));
        assert!(!processor.is_ready(&config, &stale, 0));
        assert!(processor.is_ready(&config, &stale, 1));
    }

    #[test]
    fn test_invalid_configs() {
        let bad_formula = NodeConfig::new("p", NodeKind::Transform)
            .with_input("a", true)
            .with_formula_output("out", "a + missing");
        assert!(matches!(
            TransformProcessor::from_config(&bad_formula, false),
            Err(ConfigurationError::InvalidExpression { .. })
        ));

        let empty_join = NodeConfig::new("j", NodeKind::Join).with_output("out");
        assert!(TransformProcessor::from_config(&empty_join, true).is_err());

        let zero_batch = NodeConfig::new("p", NodeKind::Transform)
            .with_input("in", false)
            .with_processing_config(json!({"batchSize": 0}));
        assert!(TransformProcessor::from_config(&zero_batch, false).is_err());

        let endless = NodeConfig::new("p", NodeKind::Transform)
            .with_input("in", true)
            .with_processing_config(json!({"processingTime": u64::MAX}));
        assert!(matches!(
            TransformProcessor::from_config(&endless, false),
            Err(ConfigurationError::InvalidProcessingConfig { .. })
        ));
    }

    #[test]
    fn test_unknown_input_rejected() {
        let config = join_config();
        let processor = TransformProcessor::from_config(&config, true).unwrap();
        let state = processor.initialize_state(&config);
        let err = processor
            .process(&arrival(0, "j", "zzz", token(json!(1), "x")), &config, &state)
            .unwrap_err();
        assert!(matches!(err, ProcessingError::UnknownInput { .. }));
        assert_eq!(err.node(), &NodeId::new("j"));
    }
}
