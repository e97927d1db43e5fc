//! Compiler: turns a parsed expression into a tree of closures
//!
//! Name resolution and arity are checked once, when the program is
//! compiled; evaluation only ever fails on runtime type errors.

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::errors::{ExprError, ExprResult};
use crate::parser::Parser;
use crate::value;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Read-only view of the names a formula may reference
pub trait Scope {
    fn resolve(&self, name: &str) -> Option<Value>;
}

impl Scope for BTreeMap<String, Value> {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl Scope for HashMap<String, Value> {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl Scope for serde_json::Map<String, Value> {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

/// The set of identifiers a program is allowed to read
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bindings {
    names: BTreeSet<String>,
}

impl Bindings {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with(mut self, name: impl Into<String>) -> Self {
        self.names.insert(name.into());
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

type Eval = Box<dyn Fn(&dyn Scope) -> ExprResult<Value> + Send + Sync>;

/// A compiled formula. Cheap to clone and safe to share across threads.
#[derive(Clone)]
pub struct Program {
    source: String,
    eval: Arc<Eval>,
}

impl Program {
    /// Parse and compile `source`, rejecting identifiers outside `bindings`
    pub fn compile(source: &str, bindings: &Bindings) -> ExprResult<Self> {
        let expr = Parser::parse(source)?;
        let eval = compile_expr(&expr, bindings)?;
        Ok(Self {
            source: source.to_string(),
            eval: Arc::new(eval),
        })
    }

    pub fn evaluate(&self, scope: &dyn Scope) -> ExprResult<Value> {
        (self.eval)(scope)
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("source", &self.source)
            .finish()
    }
}

fn compile_expr(expr: &Expr, bindings: &Bindings) -> ExprResult<Eval> {
    match expr {
        Expr::Literal(v) => {
            let v = v.clone();
            Ok(Box::new(move |_: &dyn Scope| Ok(v.clone())))
        }
        Expr::Identifier(name) => {
            if !bindings.contains(name) {
                return Err(ExprError::UnknownIdentifier(name.clone()));
            }
            let name = name.clone();
            Ok(Box::new(move |scope: &dyn Scope| {
                scope
                    .resolve(&name)
                    .ok_or_else(|| ExprError::Unbound(name.clone()))
            }))
        }
        Expr::List(items) => {
            let items = compile_all(items, bindings)?;
            Ok(Box::new(move |scope: &dyn Scope| {
                items
                    .iter()
                    .map(|item| item(scope))
                    .collect::<ExprResult<Vec<_>>>()
                    .map(Value::Array)
            }))
        }
        Expr::Field { target, name } => {
            let target = compile_expr(target, bindings)?;
            let name = name.clone();
            Ok(Box::new(move |scope: &dyn Scope| value::field(&target(scope)?, &name)))
        }
        Expr::Index { target, index } => {
            let target = compile_expr(target, bindings)?;
            let index = compile_expr(index, bindings)?;
            Ok(Box::new(move |scope: &dyn Scope| {
                value::index(&target(scope)?, &index(scope)?)
            }))
        }
        Expr::Unary { op, operand } => {
            let operand = compile_expr(operand, bindings)?;
            let eval: Eval = match op {
                UnaryOp::Not => Box::new(move |scope: &dyn Scope| {
                    Ok(Value::Bool(!value::truthy(&operand(scope)?)))
                }),
                UnaryOp::Neg => Box::new(move |scope: &dyn Scope| {
                    value::number(-value::as_number("-", &operand(scope)?)?)
                }),
            };
            Ok(eval)
        }
        Expr::Binary { op, lhs, rhs } => compile_binary(*op, lhs, rhs, bindings),
        Expr::Call { function, args } => compile_call(function, args, bindings),
    }
}

fn compile_all(exprs: &[Expr], bindings: &Bindings) -> ExprResult<Vec<Eval>> {
    exprs.iter().map(|e| compile_expr(e, bindings)).collect()
}

fn compile_binary(op: BinaryOp, lhs: &Expr, rhs: &Expr, bindings: &Bindings) -> ExprResult<Eval> {
    let lhs = compile_expr(lhs, bindings)?;
    let rhs = compile_expr(rhs, bindings)?;

    // Logical operators short-circuit
    match op {
        BinaryOp::And => {
            return Ok(Box::new(move |scope: &dyn Scope| {
                Ok(Value::Bool(
                    value::truthy(&lhs(scope)?) && value::truthy(&rhs(scope)?),
                ))
            }))
        }
        BinaryOp::Or => {
            return Ok(Box::new(move |scope: &dyn Scope| {
                Ok(Value::Bool(
                    value::truthy(&lhs(scope)?) || value::truthy(&rhs(scope)?),
                ))
            }))
        }
        _ => {}
    }

    Ok(Box::new(move |scope: &dyn Scope| {
        let a = lhs(scope)?;
        let b = rhs(scope)?;
        apply_binary(op, &a, &b)
    }))
}

fn apply_binary(op: BinaryOp, a: &Value, b: &Value) -> ExprResult<Value> {
    let sym = op.symbol();
    match op {
        BinaryOp::Add => value::add(a, b),
        BinaryOp::Sub => value::number(value::as_number(sym, a)? - value::as_number(sym, b)?),
        BinaryOp::Mul => value::number(value::as_number(sym, a)? * value::as_number(sym, b)?),
        BinaryOp::Div | BinaryOp::Rem => {
            let (x, y) = (value::as_number(sym, a)?, value::as_number(sym, b)?);
            if y == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            value::number(if op == BinaryOp::Div { x / y } else { x % y })
        }
        BinaryOp::Eq => Ok(Value::Bool(value::loose_eq(a, b))),
        BinaryOp::NotEq => Ok(Value::Bool(!value::loose_eq(a, b))),
        BinaryOp::Less => Ok(Value::Bool(value::compare(sym, a, b)? == Ordering::Less)),
        BinaryOp::LessEq => Ok(Value::Bool(value::compare(sym, a, b)? != Ordering::Greater)),
        BinaryOp::Greater => Ok(Value::Bool(value::compare(sym, a, b)? == Ordering::Greater)),
        BinaryOp::GreaterEq => Ok(Value::Bool(value::compare(sym, a, b)? != Ordering::Less)),
        BinaryOp::And => Ok(Value::Bool(value::truthy(a) && value::truthy(b))),
        BinaryOp::Or => Ok(Value::Bool(value::truthy(a) || value::truthy(b))),
    }
}

// ── Builtin functions ────────────────────────────────────────────────

struct Builtin {
    name: &'static str,
    min: usize,
    max: Option<usize>,
    apply: fn(&[Value]) -> ExprResult<Value>,
}

impl Builtin {
    fn arity(&self) -> String {
        match self.max {
            Some(max) if max == self.min => self.min.to_string(),
            Some(max) => format!("{} to {}", self.min, max),
            None => format!("at least {}", self.min),
        }
    }

    fn accepts(&self, n: usize) -> bool {
        n >= self.min && self.max.map_or(true, |max| n <= max)
    }
}

const BUILTINS: &[Builtin] = &[
    Builtin { name: "sum", min: 1, max: None, apply: fn_sum },
    Builtin { name: "avg", min: 1, max: None, apply: fn_avg },
    Builtin { name: "min", min: 1, max: None, apply: fn_min },
    Builtin { name: "max", min: 1, max: None, apply: fn_max },
    Builtin { name: "count", min: 1, max: None, apply: fn_count },
    Builtin { name: "len", min: 1, max: Some(1), apply: fn_len },
    Builtin { name: "abs", min: 1, max: Some(1), apply: fn_abs },
    Builtin { name: "round", min: 1, max: Some(2), apply: fn_round },
    Builtin { name: "floor", min: 1, max: Some(1), apply: fn_floor },
    Builtin { name: "ceil", min: 1, max: Some(1), apply: fn_ceil },
    Builtin { name: "first", min: 1, max: Some(1), apply: fn_first },
    Builtin { name: "last", min: 1, max: Some(1), apply: fn_last },
    Builtin { name: "concat", min: 1, max: None, apply: fn_concat },
];

/// Names of all callable functions, including the lazy `if`
pub fn builtin_names() -> impl Iterator<Item = &'static str> {
    BUILTINS.iter().map(|b| b.name).chain(std::iter::once("if"))
}

fn compile_call(function: &str, args: &[Expr], bindings: &Bindings) -> ExprResult<Eval> {
    if function == "if" {
        if args.len() != 3 {
            return Err(ExprError::Arity {
                function: "if".into(),
                expected: "3".into(),
                found: args.len(),
            });
        }
        let [cond, then, otherwise]: [Eval; 3] =
            compile_all(args, bindings)?
                .try_into()
                .map_err(|rest: Vec<Eval>| ExprError::Arity {
                    function: "if".into(),
                    expected: "3".into(),
                    found: rest.len(),
                })?;
        return Ok(Box::new(move |scope: &dyn Scope| {
            if value::truthy(&cond(scope)?) {
                then(scope)
            } else {
                otherwise(scope)
            }
        }));
    }

    let builtin = BUILTINS
        .iter()
        .find(|b| b.name == function)
        .ok_or_else(|| ExprError::UnknownFunction(function.to_string()))?;
    if !builtin.accepts(args.len()) {
        return Err(ExprError::Arity {
            function: function.to_string(),
            expected: builtin.arity(),
            found: args.len(),
        });
    }

    let args = compile_all(args, bindings)?;
    let apply = builtin.apply;
    Ok(Box::new(move |scope: &dyn Scope| {
        let values = args
            .iter()
            .map(|arg| arg(scope))
            .collect::<ExprResult<Vec<_>>>()?;
        apply(&values)
    }))
}

/// A single array argument spreads into its elements
fn spread(args: &[Value]) -> &[Value] {
    match args {
        [Value::Array(items)] => items.as_slice(),
        _ => args,
    }
}

fn numbers(op: &str, args: &[Value]) -> ExprResult<Vec<f64>> {
    spread(args)
        .iter()
        .map(|v| value::as_number(op, v))
        .collect()
}

fn single_number(op: &str, args: &[Value]) -> ExprResult<f64> {
    value::as_number(op, &args[0])
}

fn fn_sum(args: &[Value]) -> ExprResult<Value> {
    value::number(numbers("sum", args)?.iter().sum())
}

fn fn_avg(args: &[Value]) -> ExprResult<Value> {
    let xs = numbers("avg", args)?;
    if xs.is_empty() {
        return Ok(Value::Null);
    }
    value::number(xs.iter().sum::<f64>() / xs.len() as f64)
}

fn fn_min(args: &[Value]) -> ExprResult<Value> {
    match numbers("min", args)?.into_iter().reduce(f64::min) {
        Some(m) => value::number(m),
        None => Ok(Value::Null),
    }
}

fn fn_max(args: &[Value]) -> ExprResult<Value> {
    match numbers("max", args)?.into_iter().reduce(f64::max) {
        Some(m) => value::number(m),
        None => Ok(Value::Null),
    }
}

fn fn_count(args: &[Value]) -> ExprResult<Value> {
    let n = match args {
        [Value::Array(items)] => items.len(),
        [Value::Object(map)] => map.len(),
        [Value::Null] => 0,
        _ => args.len(),
    };
    Ok(Value::from(n))
}

fn fn_len(args: &[Value]) -> ExprResult<Value> {
    let n = match &args[0] {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::Null => 0,
        other => {
            return Err(ExprError::type_mismatch(
                "len",
                format!("{} has no length", value::type_name(other)),
            ))
        }
    };
    Ok(Value::from(n))
}

fn fn_abs(args: &[Value]) -> ExprResult<Value> {
    value::number(single_number("abs", args)?.abs())
}

fn fn_round(args: &[Value]) -> ExprResult<Value> {
    let x = single_number("round", args)?;
    let digits = match args.get(1) {
        Some(d) => value::as_number("round", d)? as i32,
        None => 0,
    };
    let scale = 10f64.powi(digits);
    value::number((x * scale).round() / scale)
}

fn fn_floor(args: &[Value]) -> ExprResult<Value> {
    value::number(single_number("floor", args)?.floor())
}

fn fn_ceil(args: &[Value]) -> ExprResult<Value> {
    value::number(single_number("ceil", args)?.ceil())
}

fn fn_first(args: &[Value]) -> ExprResult<Value> {
    match &args[0] {
        Value::Array(items) => Ok(items.first().cloned().unwrap_or(Value::Null)),
        Value::Null => Ok(Value::Null),
        other => Err(ExprError::type_mismatch(
            "first",
            format!("expected an array, found {}", value::type_name(other)),
        )),
    }
}

fn fn_last(args: &[Value]) -> ExprResult<Value> {
    match &args[0] {
        Value::Array(items) => Ok(items.last().cloned().unwrap_or(Value::Null)),
        Value::Null => Ok(Value::Null),
        other => Err(ExprError::type_mismatch(
            "last",
            format!("expected an array, found {}", value::type_name(other)),
        )),
    }
}

fn fn_concat(args: &[Value]) -> ExprResult<Value> {
    if args.iter().all(Value::is_array) {
        let items = args
            .iter()
            .filter_map(Value::as_array)
            .flatten()
            .cloned()
            .collect();
        return Ok(Value::Array(items));
    }
    Ok(Value::String(args.iter().map(value::display).collect()))
}
