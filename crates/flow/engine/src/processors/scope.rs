//! Formula scope over a consumed batch

use flow_expr::{Bindings, Scope};
use flow_types::{ConsumedBatch, NodeConfig, Token};
use serde_json::{Map, Value};

/// Names every node formula may read besides its input names
pub const RESERVED_NAMES: [&str; 4] = ["value", "batch", "inputs", "state"];

/// Identifiers available to formulas on `config`
pub fn formula_bindings(config: &NodeConfig) -> Bindings {
    config
        .inputs
        .iter()
        .fold(Bindings::new(RESERVED_NAMES), |b, input| b.with(&input.name))
}

/// Read-only formula view of the tokens consumed by one firing.
///
/// - an input name resolves to that input's value (an array when the
///   input contributed several tokens, `null` when it contributed none)
/// - `value` is the first consumed token's value
/// - `batch` is every consumed value in input order
/// - `inputs` is an object of the per-input views
/// - `state` is the node's current state-machine state, if any
#[derive(Clone, Copy, Debug)]
pub struct BatchScope<'a> {
    batch: &'a ConsumedBatch,
    state: Option<&'a str>,
}

impl<'a> BatchScope<'a> {
    pub fn new(batch: &'a ConsumedBatch) -> Self {
        Self { batch, state: None }
    }

    pub fn with_state(mut self, state: Option<&'a str>) -> Self {
        self.state = state;
        self
    }

    pub fn input_value(&self, name: &str) -> Value {
        input_view(self.batch.input(name))
    }

    /// Object keyed by input name
    pub fn inputs_object(&self) -> Value {
        let map: Map<String, Value> = self
            .batch
            .inputs
            .iter()
            .map(|(name, tokens)| (name.clone(), input_view(tokens)))
            .collect();
        Value::Object(map)
    }

    /// Output value when an output declares no formula: the single value,
    /// an object by input for multi-input firings, else the array of values
    pub fn default_value(&self) -> Value {
        if self.batch.len() == 1 {
            return self.batch.first().map(|t| t.value.clone()).unwrap_or(Value::Null);
        }
        if self.batch.inputs.len() > 1 {
            return self.inputs_object();
        }
        Value::Array(self.batch.values())
    }
}

impl Scope for BatchScope<'_> {
    fn resolve(&self, name: &str) -> Option<Value> {
        let value = match name {
            "value" => self
                .batch
                .first()
                .map(|t| t.value.clone())
                .unwrap_or(Value::Null),
            "batch" => Value::Array(self.batch.values()),
            "inputs" => self.inputs_object(),
            "state" => self
                .state
                .map(|s| Value::String(s.to_string()))
                .unwrap_or(Value::Null),
            other => self.input_value(other),
        };
        Some(value)
    }
}

fn input_view(tokens: &[Token]) -> Value {
    match tokens {
        [] => Value::Null,
        [single] => single.value.clone(),
        many => Value::Array(many.iter().map(|t| t.value.clone()).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::testing::token;
    use flow_expr::Program;
    use flow_types::NodeKind;
    use serde_json::json;

    fn join_batch() -> ConsumedBatch {
        let mut batch = ConsumedBatch::new();
        batch.push("a", token(json!(4), "x"));
        batch.push("b", token(json!(6), "y"));
        batch
    }

    #[test]
    fn test_resolve_names() {
        let batch = join_batch();
        let scope = BatchScope::new(&batch).with_state(Some("idle"));
        assert_eq!(scope.resolve("a"), Some(json!(4)));
        assert_eq!(scope.resolve("value"), Some(json!(4)));
        assert_eq!(scope.resolve("batch"), Some(json!([4, 6])));
        assert_eq!(scope.resolve("inputs"), Some(json!({"a": 4, "b": 6})));
        assert_eq!(scope.resolve("state"), Some(json!("idle")));
        assert_eq!(scope.resolve("optional"), Some(json!(null)));
    }

    #[test]
    fn test_default_values() {
        let batch = join_batch();
        assert_eq!(BatchScope::new(&batch).default_value(), json!({"a": 4, "b": 6}));

        let mut single = ConsumedBatch::new();
        single.push("in", token(json!(10), "x"));
        assert_eq!(BatchScope::new(&single).default_value(), json!(10));

        let mut many = ConsumedBatch::new();
        many.push("in", token(json!(1), "x"));
        many.push("in", token(json!(2), "y"));
        assert_eq!(BatchScope::new(&many).default_value(), json!([1, 2]));
        assert_eq!(BatchScope::new(&many).resolve("in"), Some(json!([1, 2])));
    }

    #[test]
    fn test_bindings_cover_inputs() {
        let config = NodeConfig::new("p", NodeKind::Transform)
            .with_input("a", true)
            .with_input("b", true);
        let bindings = formula_bindings(&config);
        let program = Program::compile("sum(batch) + a - b + count(inputs)", &bindings).unwrap();
        let batch = join_batch();
        assert_eq!(program.evaluate(&BatchScope::new(&batch)).unwrap(), json!(10));
        assert!(Program::compile("c", &bindings).is_err());
    }
}
