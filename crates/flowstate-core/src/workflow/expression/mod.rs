//! Expression language used by `{% ... %}` templates and Choice conditions.
//!
//! A JSONata subset: literals, `$states.*` and `$variable` references, field
//! paths, array indexes, object/array constructors, arithmetic, `&`
//! concatenation, comparisons, `and`/`or`, the ternary operator and a small
//! set of built-in functions.
//!
//! Evaluation is pure. Results are `Option<Value>` where `None` is JSONata's
//! "undefined" (a missing field), which differs from JSON `null`.

mod eval;
mod functions;
mod lexer;
mod parser;

use thiserror::Error;

pub use eval::{evaluate, stringify, truthy, Bindings};
pub use parser::{parse, BinaryOp, Expr};

/// Errors raised while parsing or evaluating an expression.
///
/// Expression errors are never matched by `Retry` or `Catch`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("unknown variable '${0}'")]
    UnknownVariable(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("undefined operand for '{0}'")]
    Undefined(String),

    #[error("${function} expects {expected} argument(s), got {got}")]
    Arity {
        function: String,
        expected: String,
        got: usize,
    },

    #[error("arithmetic error: {0}")]
    Arithmetic(String),
}

/// Built-in function names, without the `$` prefix.
pub const BUILTINS: &[&str] = &[
    "exists",
    "lookup",
    "string",
    "number",
    "boolean",
    "not",
    "count",
    "length",
    "uppercase",
    "lowercase",
    "trim",
    "contains",
    "split",
    "join",
];

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}
