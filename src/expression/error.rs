//! Error types for expression evaluation.

use crate::runtime::Type;
use std::fmt;

/// Errors that can occur while evaluating a native expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    /// Type mismatch in operation
    TypeMismatch {
        expected: Type,
        actual: Type,
        context: String,
    },

    /// Invalid operand types for operator
    InvalidOperandTypes {
        operator: String,
        left_type: Option<Type>,
        right_type: Option<Type>,
    },

    /// Division by zero
    DivisionByZero,

    /// Checked arithmetic or conversion overflowed
    Overflow { context: String },

    /// Null value where an instance was required
    UnexpectedNull { context: String },

    /// Member or method not found on a type
    UnknownMember { type_name: String, member: String },

    /// Wrong number of arguments
    ArgumentCount {
        function: String,
        expected: usize,
        actual: usize,
    },

    /// A parameter was referenced outside the scope that binds it
    UnboundParameter { name: String },

    /// A goto escaped every enclosing label
    UndefinedLabel { name: String },

    /// Conversion between incompatible types
    InvalidCast { from: Type, to: Type },

    /// Sequence index out of range
    IndexOutOfRange { index: i64, len: usize },

    /// A remote data source cannot be enumerated in this process
    RemoteResource { name: String },

    /// Extension node with no reduction
    NotReducible { name: String },

    /// An exception thrown by the evaluated code and never caught
    Thrown { type_name: String, message: String },

    /// Generic evaluation error
    EvaluationError { message: String },
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::TypeMismatch {
                expected,
                actual,
                context,
            } => {
                write!(
                    f,
                    "Type mismatch in {}: expected {}, got {}",
                    context, expected, actual
                )
            }

            EvalError::InvalidOperandTypes {
                operator,
                left_type,
                right_type,
            } => {
                let show = |t: &Option<Type>| match t {
                    Some(t) => t.to_string(),
                    None => "none".to_string(),
                };
                write!(
                    f,
                    "Invalid operand types for operator {}: left={}, right={}",
                    operator,
                    show(left_type),
                    show(right_type)
                )
            }

            EvalError::DivisionByZero => write!(f, "Division by zero"),

            EvalError::Overflow { context } => write!(f, "Arithmetic overflow in {}", context),

            EvalError::UnexpectedNull { context } => {
                write!(f, "Unexpected null value in {}", context)
            }

            EvalError::UnknownMember { type_name, member } => {
                write!(f, "Type {} has no member {}", type_name, member)
            }

            EvalError::ArgumentCount {
                function,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Function {} expects {} arguments, got {}",
                    function, expected, actual
                )
            }

            EvalError::UnboundParameter { name } => {
                write!(f, "Parameter '{}' is not bound in this scope", name)
            }

            EvalError::UndefinedLabel { name } => {
                write!(f, "Jump to label '{}' has no target", name)
            }

            EvalError::InvalidCast { from, to } => {
                write!(f, "Cannot convert {} to {}", from, to)
            }

            EvalError::IndexOutOfRange { index, len } => {
                write!(f, "Index {} out of range for sequence of length {}", index, len)
            }

            EvalError::RemoteResource { name } => {
                write!(f, "Remote resource '{}' cannot be enumerated locally", name)
            }

            EvalError::NotReducible { name } => {
                write!(f, "Extension node {} cannot be reduced", name)
            }

            EvalError::Thrown { type_name, message } => write!(f, "{}: {}", type_name, message),

            EvalError::EvaluationError { message } => {
                write!(f, "Expression evaluation error: {}", message)
            }
        }
    }
}

impl std::error::Error for EvalError {}

/// Result type for expression evaluation
pub type EvalResult<T> = Result<T, EvalError>;
