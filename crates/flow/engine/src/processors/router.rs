//! Router: forwards each token to the first output whose condition holds

use super::scope::{formula_bindings, BatchScope};
use super::{
    check_input, check_output, compile, config_str, emitted, expression_failed, invalid_config,
    record, state_mismatch, unsupported, NodeProcessor, ProcessOutcome,
};
use flow_expr::{value::truthy, Program};
use flow_types::{
    ActivityAction, ConfigurationError, ConsumedBatch, Event, EventPayload, NodeConfig, NodeKind,
    NodeState, NodeVariables, ProcessResult, RouterState, Tick,
};
use serde::Deserialize;
use serde_json::json;

#[derive(Clone, Debug, Deserialize)]
struct RouteSpec {
    output: String,
    condition: String,
}

#[derive(Clone, Debug)]
struct RouteRule {
    output: String,
    condition: Program,
}

#[derive(Clone, Debug)]
pub struct RouterProcessor {
    routes: Vec<RouteRule>,
    default_output: Option<String>,
}

impl RouterProcessor {
    pub fn from_config(config: &NodeConfig) -> Result<Self, ConfigurationError> {
        let specs: Vec<RouteSpec> = match config.config_field("routes") {
            None => Vec::new(),
            Some(raw) => serde_json::from_value(raw.clone())
                .map_err(|e| invalid_config(config, format!("invalid 'routes': {}", e)))?,
        };
        let default_output = config_str(config, "defaultOutput")?.map(str::to_string);
        if specs.is_empty() && default_output.is_none() {
            return Err(invalid_config(
                config,
                "router needs at least one route or a defaultOutput",
            ));
        }

        let bindings = formula_bindings(config);
        let mut routes = Vec::with_capacity(specs.len());
        for spec in specs {
            check_output(config, &spec.output)?;
            routes.push(RouteRule {
                condition: compile(config, &spec.condition, &bindings)?,
                output: spec.output,
            });
        }
        if let Some(output) = &default_output {
            check_output(config, output)?;
        }

        Ok(Self {
            routes,
            default_output,
        })
    }

    /// Output for one token, or `None` when nothing matches
    fn select(&self, config: &NodeConfig, batch: &ConsumedBatch) -> ProcessResult<Option<&str>> {
        let scope = BatchScope::new(batch);
        for route in &self.routes {
            let hit = route
                .condition
                .evaluate(&scope)
                .map_err(|e| expression_failed(config, e))?;
            if truthy(&hit) {
                return Ok(Some(route.output.as_str()));
            }
        }
        Ok(self.default_output.as_deref())
    }

    fn route_buffered(
        &self,
        event: &Event,
        config: &NodeConfig,
        state: &NodeState,
    ) -> ProcessResult<ProcessOutcome> {
        if !matches!(state.variables, NodeVariables::Router(_)) {
            return Err(state_mismatch(config, "router", state));
        }
        let mut outcome = ProcessOutcome::new(state.clone());
        let mut last_output = None;

        let drained: Vec<(String, _)> = outcome
            .new_state
            .input_buffers
            .iter_mut()
            .flat_map(|(name, buffer)| {
                buffer
                    .drain(..)
                    .map(|token| (name.clone(), token))
                    .collect::<Vec<_>>()
            })
            .collect();

        for (input, token) in drained {
            outcome.log(record(
                event,
                config,
                ActivityAction::Consumed,
                json!({ "input": input, "value": token.value }),
                token.correlation_ids.clone(),
            ));

            let mut batch = ConsumedBatch::new();
            batch.push(input.as_str(), token.clone());
            // a failing condition costs only its own token
            match self.select(config, &batch) {
                Ok(Some(output)) => {
                    let produced = token.derive(token.value.clone(), &config.id, event.timestamp);
                    outcome.schedule(
                        Event::emit(event.timestamp, config.id.clone(), output, produced)
                            .with_cause(event.id),
                    );
                    last_output = Some(output.to_string());
                }
                Ok(None) => outcome.log(record(
                    event,
                    config,
                    ActivityAction::Rejected,
                    json!({ "value": token.value, "reason": "no matching route" }),
                    token.correlation_ids.clone(),
                )),
                Err(err) => outcome.log(record(
                    event,
                    config,
                    ActivityAction::Error,
                    json!({ "value": token.value, "error": err.to_string() }),
                    token.correlation_ids.clone(),
                )),
            }
        }

        if let Some(output) = last_output {
            outcome.new_state.variables = NodeVariables::Router(RouterState {
                last_output: Some(output),
            });
        }
        Ok(outcome)
    }
}

impl NodeProcessor for RouterProcessor {
    fn kind(&self) -> NodeKind {
        NodeKind::Router
    }

    fn initialize_state(&self, config: &NodeConfig) -> NodeState {
        NodeState::new(NodeVariables::Router(RouterState::default()))
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
            EventPayload::ProcessingTrigger { .. } => self.route_buffered(event, config, state),
            EventPayload::Emit { .. } => emitted(event, config, state),
            _ => Err(unsupported(config, event)),
        }
    }

    fn is_ready(&self, _config: &NodeConfig, state: &NodeState, _now: Tick) -> bool {
        state.buffered() > 0
    }
}
