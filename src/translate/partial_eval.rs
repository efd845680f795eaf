use crate::expression::{EvaluationStrategy, Expr, ExprKind, Interpreter};
use crate::runtime::{Sequence, SequenceKind, Type, Value};
use crate::translate::{Result, TranslationError};
use log::debug;
use std::fmt;
use std::sync::Arc;

/// Caller-supplied "can this node be evaluated locally" test
pub type LocalPredicate = Arc<dyn Fn(&Expr) -> bool + Send + Sync>;

/// Both predicates must hold
pub fn and(first: LocalPredicate, second: LocalPredicate) -> LocalPredicate {
    Arc::new(move |expr: &Expr| first(expr) && second(expr))
}

/// Either predicate may hold
pub fn or(first: LocalPredicate, second: LocalPredicate) -> LocalPredicate {
    Arc::new(move |expr: &Expr| first(expr) || second(expr))
}

/// Result of nomination for one node, mirroring [`Expr::children`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nomination {
    pub evaluable: bool,
    pub children: Vec<Nomination>,
}

impl Nomination {
    /// Number of maximal nominated sub-trees
    pub fn candidates(&self) -> usize {
        if self.evaluable {
            1
        } else {
            self.children.iter().map(Nomination::candidates).sum()
        }
    }
}

/// Collapses locally computable sub-trees into captured values
#[derive(Clone)]
pub struct PartialEvaluator {
    predicate: Option<LocalPredicate>,
    strategy: Arc<dyn EvaluationStrategy>,
}

impl Default for PartialEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PartialEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartialEvaluator")
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

impl PartialEvaluator {
    pub fn new() -> Self {
        Self {
            predicate: None,
            strategy: Arc::new(Interpreter::new()),
        }
    }

    /// Restrict nomination further; ANDed with the built-in rules
    pub fn with_predicate(mut self, predicate: LocalPredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn EvaluationStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Post-order pass: a node is evaluable when it passes both predicates and
    /// all of its children are evaluable
    pub fn nominate(&self, expr: &Expr) -> Nomination {
        let children: Vec<Nomination> = expr
            .children()
            .into_iter()
            .map(|child| self.nominate(child))
            .collect();
        let evaluable = children.iter().all(|c| c.evaluable)
            && can_evaluate_locally(expr)
            && self.predicate.as_ref().map_or(true, |p| p(expr));
        Nomination {
            evaluable,
            children,
        }
    }

    /// Replace every maximal nominated sub-tree with its value.
    ///
    /// Nominated siblings are evaluated left to right.
    pub fn evaluate(&self, expr: &Expr) -> Result<Expr> {
        let nomination = self.nominate(expr);
        debug!(
            "partial evaluation: {} nodes, {} candidate sub-trees",
            expr.node_count(),
            nomination.candidates()
        );
        self.rewrite(expr, &nomination)
    }

    fn rewrite(&self, expr: &Expr, nomination: &Nomination) -> Result<Expr> {
        if nomination.evaluable {
            return self.capture(expr);
        }
        let mut nominations = nomination.children.iter();
        expr.try_map_children(&mut |child| match nominations.next() {
            Some(n) => self.rewrite(child, n),
            None => Ok(child.clone()),
        })
    }

    fn capture(&self, expr: &Expr) -> Result<Expr> {
        if let Expr::Constant { .. } = expr {
            return Ok(expr.clone());
        }
        let ty = expr.ty();
        let value = self.strategy.evaluate(expr)?;
        debug!("captured {} sub-tree of type {}", expr.kind(), ty);
        let value = match value {
            Value::Expression(tree) => return Ok((*tree).clone()),
            Value::Sequence(_) | Value::Deferred(_) => materialize(value, &ty)?,
            other => other,
        };
        Ok(Expr::Captured { value, ty })
    }
}

/// Force sequence results so no open handle is left in the tree
fn materialize(value: Value, ty: &Type) -> Result<Value> {
    let element = match (ty.non_nullable().element_type(), &value) {
        (Some(element), _) => element.clone(),
        (None, Value::Sequence(seq)) if *ty == Type::Object => seq.element().clone(),
        (None, Value::Deferred(deferred)) if *ty == Type::Object => deferred.element().clone(),
        _ => {
            return Err(TranslationError::ElementType {
                ty: ty.to_string(),
            })
        }
    };
    let items = value.to_items()?;
    if ty.is_assignable_from(&Type::array(element.clone())) {
        return Ok(Value::Sequence(Sequence::array(element, items.to_vec())));
    }
    let is_query = match &value {
        Value::Sequence(seq) => seq.kind() == SequenceKind::Queryable,
        _ => true,
    };
    if is_query && ty.is_assignable_from(&Type::queryable(element.clone())) {
        return Ok(Value::Sequence(Sequence::queryable(element, items.to_vec())));
    }
    Ok(value)
}

/// Built-in nomination rules
fn can_evaluate_locally(expr: &Expr) -> bool {
    match expr.kind() {
        ExprKind::Block
        | ExprKind::Convert
        | ExprKind::ConvertChecked
        | ExprKind::Default
        | ExprKind::Label
        | ExprKind::Goto
        | ExprKind::Lambda
        | ExprKind::Loop
        | ExprKind::Parameter
        | ExprKind::Quote
        | ExprKind::Throw
        | ExprKind::Captured => return false,
        _ => {}
    }
    match expr {
        Expr::Constant { value, .. } => !matches!(value, Value::Resource(_)),
        Expr::Call { method, args, .. } => {
            let on_resource = matches!(method.declaring_type(), "Queryable" | "Enumerable")
                && matches!(
                    args.first(),
                    Some(Expr::Constant {
                        value: Value::Resource(_),
                        ..
                    })
                );
            !on_resource && method.return_type() != Type::Void
        }
        Expr::Invoke { .. } | Expr::Binary { .. } => expr.ty() != Type::Void,
        Expr::Unary { ty, .. } => *ty != Type::Void,
        Expr::Extension(ext) => ext.0.reduce().is_some(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{EvalError, EvalResult, Variable};
    use crate::runtime::{ResourceDescriptor, TypeRegistry};
    use parking_lot::Mutex;

    fn int(n: i32) -> Expr {
        Expr::constant(Value::Int32(n))
    }

    fn captured(expr: &Expr) -> Option<&Value> {
        match expr {
            Expr::Captured { value, .. } => Some(value),
            _ => None,
        }
    }

    #[test]
    fn test_local_arithmetic_collapses() {
        let expr = Expr::add(int(1), Expr::multiply(int(2), int(3)));
        let result = PartialEvaluator::new().evaluate(&expr).unwrap();
        assert_eq!(captured(&result), Some(&Value::Int32(7)));
        assert_eq!(result.ty(), Type::Int32);
    }

    #[test]
    fn test_parameter_blocks_nomination() {
        let p = Variable::new("p", Type::Int32);
        let body = Expr::greater_than(Expr::parameter(&p), Expr::add(int(20), int(10)));
        let lambda = Expr::lambda(vec![p.clone()], body);

        let nomination = PartialEvaluator::new().nominate(&lambda);
        assert!(!nomination.evaluable);
        let comparison = &nomination.children[0];
        assert!(!comparison.evaluable);
        assert!(!comparison.children[0].evaluable);
        assert!(comparison.children[1].evaluable);

        let result = PartialEvaluator::new().evaluate(&lambda).unwrap();
        let Expr::Lambda { body, .. } = &result else {
            panic!("expected a lambda, got {:?}", result);
        };
        let Expr::Binary { left, right, .. } = body.as_ref() else {
            panic!("expected a comparison, got {:?}", body);
        };
        assert_eq!(**left, Expr::parameter(&p));
        assert_eq!(captured(right), Some(&Value::Int32(30)));
    }

    #[test]
    fn test_resource_poisons_ancestors_not_siblings() {
        let registry = TypeRegistry::with_builtins();
        let take = registry.method("Queryable", "take", &[Type::Int32]).unwrap();
        let source = Expr::constant(Value::Resource(ResourceDescriptor::of(Type::Int32)));
        let call = Expr::call_static(take, vec![source.clone(), Expr::add(int(2), int(3))]);

        let nomination = PartialEvaluator::new().nominate(&call);
        assert!(!nomination.evaluable);
        assert!(!nomination.children[0].evaluable);
        assert!(nomination.children[1].evaluable);

        let result = PartialEvaluator::new().evaluate(&call).unwrap();
        let Expr::Call { args, .. } = &result else {
            panic!("expected a call, got {:?}", result);
        };
        assert_eq!(args[0], source);
        assert_eq!(captured(&args[1]), Some(&Value::Int32(5)));
    }

    #[test]
    fn test_second_run_changes_nothing() {
        let p = Variable::new("p", Type::Int32);
        let lambda = Expr::lambda(
            vec![p.clone()],
            Expr::less_than(Expr::parameter(&p), Expr::add(int(1), int(1))),
        );
        let evaluator = PartialEvaluator::new();
        let once = evaluator.evaluate(&lambda).unwrap();
        let twice = evaluator.evaluate(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_caller_predicate_restricts() {
        let expr = Expr::add(int(1), int(2));
        let no_binary: LocalPredicate = Arc::new(|e: &Expr| !matches!(e, Expr::Binary { .. }));
        let evaluator = PartialEvaluator::new().with_predicate(and(Arc::new(|_: &Expr| true), no_binary));
        assert_eq!(evaluator.evaluate(&expr).unwrap(), expr);

        let never: LocalPredicate = Arc::new(|_: &Expr| false);
        let always: LocalPredicate = Arc::new(|_: &Expr| true);
        let evaluator = PartialEvaluator::new().with_predicate(or(never, always));
        assert!(captured(&evaluator.evaluate(&expr).unwrap()).is_some());
    }

    struct Recording {
        seen: Mutex<Vec<Value>>,
    }

    impl EvaluationStrategy for Recording {
        fn evaluate(&self, expr: &Expr) -> EvalResult<Value> {
            let value = Interpreter::new().evaluate(expr)?;
            self.seen.lock().push(value.clone());
            Ok(value)
        }
    }

    #[test]
    fn test_siblings_evaluate_left_to_right() {
        let p = Variable::new("p", Type::Int32);
        let expr = Expr::lambda(
            vec![p.clone()],
            Expr::new_array(
                Type::Int32,
                vec![
                    Expr::add(int(1), int(0)),
                    Expr::parameter(&p),
                    Expr::add(int(2), int(0)),
                    Expr::add(int(3), int(0)),
                ],
            ),
        );
        let strategy = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
        });
        PartialEvaluator::new()
            .with_strategy(strategy.clone())
            .evaluate(&expr)
            .unwrap();
        assert_eq!(
            *strategy.seen.lock(),
            vec![Value::Int32(1), Value::Int32(2), Value::Int32(3)]
        );
    }

    #[test]
    fn test_failures_propagate_unchanged() {
        let expr = Expr::divide(int(1), int(0));
        let err = PartialEvaluator::new().evaluate(&expr).unwrap_err();
        assert_eq!(err, TranslationError::Evaluation(EvalError::DivisionByZero));
    }

    #[test]
    fn test_sequences_materialize_as_arrays() {
        let expr = Expr::new_array(Type::Int32, vec![int(1), int(2)]);
        let result = PartialEvaluator::new().evaluate(&expr).unwrap();
        match captured(&result) {
            Some(Value::Sequence(seq)) => {
                assert_eq!(seq.kind(), SequenceKind::Array);
                assert_eq!(seq.len(), 2);
            }
            other => panic!("expected a sequence, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_element_type() {
        let value = Value::Sequence(Sequence::array(Type::Int32, vec![Value::Int32(1)]));
        let err = materialize(value, &Type::Int32).unwrap_err();
        assert!(matches!(err, TranslationError::ElementType { .. }));
    }
}
