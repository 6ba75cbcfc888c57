use std::fmt;

use strum::{Display, EnumString, IntoStaticStr};

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RunError>;

/// The error kinds the interpreter can surface.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>`
/// implementations. The string representation matches the variant name exactly
/// (e.g., `UnboundVariable` -> "UnboundVariable").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ErrorKind {
    /// Malformed source or syntax tree: an empty combination, a malformed
    /// special form, or an improper list where a proper list was required.
    SyntaxError,
    /// A symbol lookup found no binding in any enclosing frame.
    UnboundVariable,
    /// Attempt to call a value that is not a special form, builtin, or closure.
    NotApplicable,
    /// Arity mismatch at a call site.
    WrongArgCount,
    /// A builtin argument failed a type predicate.
    WrongArgType,
    /// Division by exact zero, modulus by zero, or a non-integer where an
    /// integer was required.
    NumericError,
    /// Internal capacity exhausted: evaluation-stack, repr-stack, or
    /// collector-queue overflow.
    InternalError,
}

/// A runtime error: a kind plus a host-facing message.
///
/// Errors propagate upward through the evaluator, unwinding the evaluation
/// stack down to the top-level driver. Partial side effects (bindings already
/// installed, pairs already mutated) are not rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RunError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SyntaxError, message)
    }

    pub fn unbound(name: &str) -> Self {
        Self::new(ErrorKind::UnboundVariable, format!("unbound variable: {name}"))
    }

    pub fn not_applicable(what: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotApplicable, what)
    }

    pub fn arg_count(name: &str, expected: &str, got: usize) -> Self {
        Self::new(
            ErrorKind::WrongArgCount,
            format!("{name}: expected {expected} argument(s), got {got}"),
        )
    }

    pub fn arg_type(name: &str, expected: &str) -> Self {
        Self::new(ErrorKind::WrongArgType, format!("{name}: expected {expected}"))
    }

    pub fn numeric(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NumericError, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, message)
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RunError {}
