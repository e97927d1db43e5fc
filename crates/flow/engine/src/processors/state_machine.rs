//! StateMachine and StateMachineTransform: transition on every arrival

use super::scope::{formula_bindings, BatchScope};
use super::{
    check_input, check_output, compile, config_str, emit_on_all_outputs, emitted,
    expression_failed, invalid_config, record, state_mismatch, unsupported, NodeProcessor,
    ProcessOutcome,
};
use flow_expr::{value::truthy, Program};
use flow_types::{
    ActivityAction, ConfigurationError, ConsumedBatch, CorrelationSet, Event, EventPayload,
    NodeConfig, NodeKind, NodeState, NodeVariables, ProcessResult, StateMachineState,
};
use serde::Deserialize;
use serde_json::json;

/// Matches any current state in a transition's `from`
pub const ANY_STATE: &str = "*";

const DEFAULT_INITIAL_STATE: &str = "idle";

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransitionSpec {
    from: String,
    to: String,
    #[serde(default)]
    when: Option<String>,
    #[serde(default)]
    formula: Option<String>,
    #[serde(default)]
    output: Option<String>,
}

#[derive(Clone, Debug)]
struct Transition {
    from: String,
    to: String,
    guard: Option<Program>,
    formula: Option<Program>,
    output: Option<String>,
}

impl Transition {
    fn leaves(&self, state: &str) -> bool {
        self.from == ANY_STATE || self.from == state
    }
}

/// Processor for both state-machine kinds. Only the transform variant
/// rewrites emitted values; only the plain variant self-initializes.
#[derive(Clone, Debug)]
pub struct StateMachineProcessor {
    transforming: bool,
    initial_state: String,
    transitions: Vec<Transition>,
}

impl StateMachineProcessor {
    pub fn from_config(config: &NodeConfig, transforming: bool) -> Result<Self, ConfigurationError> {
        let specs: Vec<TransitionSpec> = match config.config_field("transitions") {
            None => Vec::new(),
            Some(raw) => serde_json::from_value(raw.clone())
                .map_err(|e| invalid_config(config, format!("invalid 'transitions': {}", e)))?,
        };

        let bindings = formula_bindings(config);
        let mut transitions = Vec::with_capacity(specs.len());
        for spec in specs {
            if spec.formula.is_some() && !transforming {
                return Err(invalid_config(
                    config,
                    "transition formulas require a state_machine_transform node",
                ));
            }
            if let Some(output) = &spec.output {
                check_output(config, output)?;
            }
            transitions.push(Transition {
                guard: spec.when.as_deref().map(|w| compile(config, w, &bindings)).transpose()?,
                formula: spec
                    .formula
                    .as_deref()
                    .map(|f| compile(config, f, &bindings))
                    .transpose()?,
                from: spec.from,
                to: spec.to,
                output: spec.output,
            });
        }

        let initial_state = match config_str(config, "initialState")? {
            Some(s) => s.to_string(),
            None => transitions
                .iter()
                .map(|t| t.from.as_str())
                .find(|from| *from != ANY_STATE)
                .unwrap_or(DEFAULT_INITIAL_STATE)
                .to_string(),
        };

        Ok(Self {
            transforming,
            initial_state,
            transitions,
        })
    }

    pub fn initial_state(&self) -> &str {
        &self.initial_state
    }

    /// Enter the initial state if the machine has not started yet
    fn ensure_started(&self, event: &Event, config: &NodeConfig, outcome: &mut ProcessOutcome) {
        if let NodeVariables::StateMachine(vars) = &mut outcome.new_state.variables {
            if vars.started {
                return;
            }
            vars.started = true;
            vars.current = Some(self.initial_state.clone());
        }
        outcome.log(record(
            event,
            config,
            ActivityAction::Transitioned,
            json!({ "from": null, "to": self.initial_state }),
            CorrelationSet::new(),
        ));
    }

    fn on_arrival(
        &self,
        event: &Event,
        config: &NodeConfig,
        state: &NodeState,
        input: &str,
    ) -> ProcessResult<ProcessOutcome> {
        check_input(config, input)?;
        let token = event.token().ok_or_else(|| unsupported(config, event))?;
        let mut outcome = ProcessOutcome::new(state.clone());
        if token.internal {
            return Ok(outcome);
        }
        if !matches!(state.variables, NodeVariables::StateMachine(_)) {
            return Err(state_mismatch(config, "state_machine", state));
        }

        outcome.log(record(
            event,
            config,
            ActivityAction::Received,
            token.value.clone(),
            token.correlation_ids.clone(),
        ));
        self.ensure_started(event, config, &mut outcome);

        let current = match &outcome.new_state.variables {
            NodeVariables::StateMachine(vars) => vars
                .current
                .clone()
                .unwrap_or_else(|| self.initial_state.clone()),
            _ => return Err(state_mismatch(config, "state_machine", state)),
        };

        let mut batch = ConsumedBatch::new();
        batch.push(input, token.clone());
        let scope = BatchScope::new(&batch).with_state(Some(&current));

        let mut selected = None;
        for transition in self.transitions.iter().filter(|t| t.leaves(&current)) {
            let passes = match &transition.guard {
                Some(guard) => truthy(
                    &guard
                        .evaluate(&scope)
                        .map_err(|e| expression_failed(config, e))?,
                ),
                None => true,
            };
            if passes {
                selected = Some(transition);
                break;
            }
        }

        let Some(transition) = selected else {
            outcome.log(record(
                event,
                config,
                ActivityAction::Rejected,
                json!({ "value": token.value, "state": current }),
                token.correlation_ids.clone(),
            ));
            return Ok(outcome);
        };

        let value = match (&transition.formula, self.transforming) {
            (Some(formula), true) => formula
                .evaluate(&scope)
                .map_err(|e| expression_failed(config, e))?,
            _ => token.value.clone(),
        };

        outcome.log(record(
            event,
            config,
            ActivityAction::Consumed,
            token.value.clone(),
            token.correlation_ids.clone(),
        ));
        outcome.log(record(
            event,
            config,
            ActivityAction::Transitioned,
            json!({ "from": current, "to": transition.to }),
            token.correlation_ids.clone(),
        ));
        outcome.new_state.variables = NodeVariables::StateMachine(StateMachineState {
            current: Some(transition.to.clone()),
            started: true,
        });

        let produced = token.derive(value, &config.id, event.timestamp);
        match &transition.output {
            Some(output) => outcome.schedule(
                Event::emit(event.timestamp, config.id.clone(), output, produced).with_cause(event.id),
            ),
            None => emit_on_all_outputs(&mut outcome, event, config, &produced),
        }
        Ok(outcome)
    }
}

impl NodeProcessor for StateMachineProcessor {
    fn kind(&self) -> NodeKind {
        if self.transforming {
            NodeKind::StateMachineTransform
        } else {
            NodeKind::StateMachine
        }
    }

    fn initialize_state(&self, config: &NodeConfig) -> NodeState {
        NodeState::new(NodeVariables::StateMachine(StateMachineState::default()))
            .with_inputs(config.inputs.iter().map(|i| i.name.as_str()))
    }

    fn process(
        &self,
        event: &Event,
        config: &NodeConfig,
        state: &NodeState,
    ) -> ProcessResult<ProcessOutcome> {
        match &event.payload {
            EventPayload::RunStart => {
                if !matches!(state.variables, NodeVariables::StateMachine(_)) {
                    return Err(state_mismatch(config, "state_machine", state));
                }
                let mut outcome = ProcessOutcome::new(state.clone());
                self.ensure_started(event, config, &mut outcome);
                Ok(outcome)
            }
            EventPayload::TokenArrival { input, .. } => self.on_arrival(event, config, state, input),
            EventPayload::Emit { .. } => emitted(event, config, state),
            _ => Err(unsupported(config, event)),
        }
    }

    fn fires_on_trigger(&self) -> bool {
        false
    }
}
