//! Token-Flow Formula Language
//!
//! Node formulas (transform outputs, router conditions, state-machine
//! guards, batch aggregates) are written in a small, fixed grammar and
//! compiled once, when a scenario is loaded, into a tree of closures.
//! There is no way to call into host code from a formula.
//!
//! # Grammar
//!
//! - Literals: numbers, `'strings'` or `"strings"`, `true`, `false`, `null`,
//!   `[list, of, values]`
//! - Identifiers bound by the caller (input names, `value`, `batch`, ...)
//! - Field access `value.amount`, indexing `batch[0]`, `value["key"]`
//! - Arithmetic `+ - * / %`, comparison `== != < <= > >=`, logic `&& || !`
//! - Functions: `sum avg min max count len abs round floor ceil first last
//!   concat if`
//!
//! ```
//! use flow_expr::{Bindings, Program};
//! use serde_json::{json, Value};
//! use std::collections::BTreeMap;
//!
//! let program = Program::compile("(a + b) / 2", &Bindings::new(["a", "b"])).unwrap();
//! let scope: BTreeMap<String, Value> =
//!     [("a".to_string(), json!(4)), ("b".to_string(), json!(6))].into();
//! assert_eq!(program.evaluate(&scope).unwrap(), json!(5));
//! ```

#![deny(unsafe_code)]

pub mod ast;
mod compiler;
mod errors;
pub mod lexer;
pub mod parser;
pub mod value;

pub use compiler::{builtin_names, Bindings, Program, Scope};
pub use errors::{ExprError, ExprResult};
