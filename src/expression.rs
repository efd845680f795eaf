//! Native expression trees and their interpreter.
//!
//! This module provides:
//! - The native expression tree with identity-bearing variables and labels
//! - Operators and node kinds
//! - A tree-walking interpreter behind the `EvaluationStrategy` trait

pub mod error;
pub mod eval;
pub mod expr;
pub mod operator;

pub use error::{EvalError, EvalResult};
pub use eval::{evaluate_expression, EvaluationStrategy, Interpreter};
pub use expr::{
    CatchBlock, ElementInit, Expr, Extension, ExtensionNode, GotoKind, LabelTarget, MemberBinding,
    NewArrayKind, SwitchCase, Variable,
};
pub use operator::{BinaryOperator, ExprKind, UnaryOperator};
