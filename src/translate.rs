// Translation between native and portable expression trees

pub mod forward;
pub mod mapper;
pub mod partial_eval;
pub mod resolver;
pub mod reverse;

pub use forward::ForwardTranslator;
pub use mapper::DynamicObjectMapper;
pub use partial_eval::{LocalPredicate, Nomination, PartialEvaluator};
pub use resolver::{RegistryResolver, SubstitutingResolver, TypeResolver};
pub use reverse::ReverseTranslator;

use crate::expression::{EvalError, Expr};
use crate::portable::PortableExpr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranslationError {
    #[error("Unsupported expression: {kind}")]
    UnsupportedExpression { kind: String },

    #[error("Cannot resolve {reference}")]
    TypeResolution { reference: String },

    #[error("Cannot determine element type of {ty}")]
    ElementType { ty: String },

    #[error("Unsupported value of type {ty}: {reason}")]
    UnsupportedValue { ty: String, reason: String },

    #[error(transparent)]
    Evaluation(#[from] EvalError),
}

pub type Result<T> = std::result::Result<T, TranslationError>;

/// Partially evaluate `expr` with the default evaluator, then translate it
pub fn to_portable(expr: &Expr) -> Result<PortableExpr> {
    to_portable_with(expr, &PartialEvaluator::new())
}

pub fn to_portable_with(expr: &Expr, evaluator: &PartialEvaluator) -> Result<PortableExpr> {
    let evaluated = evaluator.evaluate(expr)?;
    ForwardTranslator::new().translate(&evaluated)
}

/// Rebuild a native tree, resolving references through `resolver`
pub fn from_portable(expr: &PortableExpr, resolver: &dyn TypeResolver) -> Result<Expr> {
    ReverseTranslator::new(resolver).translate(expr)
}
