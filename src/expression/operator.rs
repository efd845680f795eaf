//! Operator and node-kind definitions for expressions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary operators supported in expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOperator {
    // Arithmetic
    Add,
    AddChecked,
    Subtract,
    SubtractChecked,
    Multiply,
    MultiplyChecked,
    Divide,
    Modulo,
    Power,

    // Comparison
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,

    // Bitwise or eager logical
    And,
    Or,
    ExclusiveOr,

    // Short-circuit logical
    AndAlso,
    OrElse,

    Coalesce,
    ArrayIndex,
    Assign,
}

impl BinaryOperator {
    /// Whether the operator always yields a boolean
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Equal
                | BinaryOperator::NotEqual
                | BinaryOperator::LessThan
                | BinaryOperator::LessThanOrEqual
                | BinaryOperator::GreaterThan
                | BinaryOperator::GreaterThanOrEqual
        )
    }

    pub fn is_checked(&self) -> bool {
        matches!(
            self,
            BinaryOperator::AddChecked
                | BinaryOperator::SubtractChecked
                | BinaryOperator::MultiplyChecked
        )
    }

    /// Get the display string for this operator
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOperator::Add | BinaryOperator::AddChecked => "+",
            BinaryOperator::Subtract | BinaryOperator::SubtractChecked => "-",
            BinaryOperator::Multiply | BinaryOperator::MultiplyChecked => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulo => "%",
            BinaryOperator::Power => "**",
            BinaryOperator::Equal => "==",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessThanOrEqual => "<=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::GreaterThanOrEqual => ">=",
            BinaryOperator::And => "&",
            BinaryOperator::Or => "|",
            BinaryOperator::ExclusiveOr => "^",
            BinaryOperator::AndAlso => "&&",
            BinaryOperator::OrElse => "||",
            BinaryOperator::Coalesce => "??",
            BinaryOperator::ArrayIndex => "[]",
            BinaryOperator::Assign => "=",
        }
    }
}

/// Unary operators supported in expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOperator {
    Negate,
    Plus,
    /// Logical not for booleans, bitwise complement for integers
    Not,
    Convert,
    ConvertChecked,
    /// Cast that yields null instead of failing
    TypeAs,
    ArrayLength,
    /// Wrap a lambda as an expression-tree value
    Quote,
    Throw,
}

impl UnaryOperator {
    /// Get the display string for this operator
    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOperator::Negate => "-",
            UnaryOperator::Plus => "+",
            UnaryOperator::Not => "!",
            UnaryOperator::Convert => "convert",
            UnaryOperator::ConvertChecked => "checked convert",
            UnaryOperator::TypeAs => "as",
            UnaryOperator::ArrayLength => "length",
            UnaryOperator::Quote => "quote",
            UnaryOperator::Throw => "throw",
        }
    }
}

/// Node kinds of the native expression tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExprKind {
    Binary,
    Unary,
    Convert,
    ConvertChecked,
    Quote,
    Throw,
    Constant,
    Captured,
    Parameter,
    MemberAccess,
    Call,
    New,
    NewArray,
    ListInit,
    MemberInit,
    Lambda,
    Invoke,
    Conditional,
    TypeIs,
    Block,
    Default,
    Label,
    Goto,
    Loop,
    Switch,
    Try,
    Extension,
}

impl fmt::Display for ExprKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
