//! Expression error types

/// Errors raised while lexing, parsing, compiling or evaluating a formula
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    #[error("Parse error at column {col}: {message}")]
    ParseError { col: usize, message: String },

    #[error("Unexpected token at column {col}: expected {expected}, found '{found}'")]
    UnexpectedToken {
        col: usize,
        expected: String,
        found: String,
    },

    #[error("Unexpected end of expression: expected {0}")]
    UnexpectedEof(String),

    #[error("Unknown identifier: '{0}'")]
    UnknownIdentifier(String),

    #[error("Unknown function: '{0}'")]
    UnknownFunction(String),

    #[error("Function '{function}' expects {expected} argument(s), got {found}")]
    Arity {
        function: String,
        expected: String,
        found: usize,
    },

    #[error("Type mismatch in '{op}': {message}")]
    TypeMismatch { op: String, message: String },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Result is not a finite number")]
    NonFinite,

    #[error("Unbound identifier at evaluation time: '{0}'")]
    Unbound(String),
}

impl ExprError {
    /// Whether the error was detected before evaluation
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            Self::ParseError { .. }
                | Self::UnexpectedToken { .. }
                | Self::UnexpectedEof(_)
                | Self::UnknownIdentifier(_)
                | Self::UnknownFunction(_)
                | Self::Arity { .. }
        )
    }

    pub(crate) fn type_mismatch(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            op: op.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for expression operations
pub type ExprResult<T> = Result<T, ExprError>;
