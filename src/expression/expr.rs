//! Native expression tree definitions.

use crate::expression::operator::{BinaryOperator, ExprKind, UnaryOperator};
use crate::runtime::{Constructor, Member, Method, Type, Value};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

struct Named {
    name: String,
    ty: Type,
}

/// A bound variable: lambda parameter, block variable or catch variable.
///
/// Two `Variable`s are the same variable only if they are clones of one
/// another; the name is for display.
#[derive(Clone)]
pub struct Variable(Arc<Named>);

impl Variable {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self(Arc::new(Named {
            name: name.into(),
            ty,
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn ty(&self) -> &Type {
        &self.0.ty
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Variable {}

impl Hash for Variable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.0.name, self.0.ty)
    }
}

/// Jump target of labels and gotos. Identity semantics as for [`Variable`].
#[derive(Clone)]
pub struct LabelTarget(Arc<Named>);

impl LabelTarget {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self(Arc::new(Named {
            name: name.into(),
            ty,
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn ty(&self) -> &Type {
        &self.0.ty
    }
}

impl PartialEq for LabelTarget {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for LabelTarget {}

impl Hash for LabelTarget {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Debug for LabelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "label {}: {}", self.0.name, self.0.ty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GotoKind {
    Goto,
    Return,
    Break,
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NewArrayKind {
    /// Array of the given elements
    Init,
    /// Array of default values, sized by the single i32 operand
    Bounds,
}

/// One `add` call of a collection initializer
#[derive(Debug, Clone, PartialEq)]
pub struct ElementInit {
    pub add_method: Method,
    pub args: Vec<Expr>,
}

/// Member initializer of a `MemberInit` node
#[derive(Debug, Clone, PartialEq)]
pub enum MemberBinding {
    /// `member = expr`
    Assignment { member: Member, expr: Expr },
    /// Nested initializer applied to the member's current value
    Member {
        member: Member,
        bindings: Vec<MemberBinding>,
    },
    /// Collection initializer applied to the member's current value
    List {
        member: Member,
        initializers: Vec<ElementInit>,
    },
}

impl MemberBinding {
    pub fn member(&self) -> &Member {
        match self {
            MemberBinding::Assignment { member, .. }
            | MemberBinding::Member { member, .. }
            | MemberBinding::List { member, .. } => member,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub test_values: Vec<Expr>,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchBlock {
    /// Exception type handled by this block
    pub test: Type,
    pub variable: Option<Variable>,
    pub filter: Option<Expr>,
    pub body: Expr,
}

/// A user-defined node kind. Nodes that can reduce to standard nodes are
/// evaluable; the rest are opaque.
pub trait ExtensionNode: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn ty(&self) -> Type;

    fn reduce(&self) -> Option<Expr> {
        None
    }
}

/// Shared handle to an extension node, compared by identity
#[derive(Clone)]
pub struct Extension(pub Arc<dyn ExtensionNode>);

impl PartialEq for Extension {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Expression tree node
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Binary {
        op: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
        ty: Type,
        /// Operator implementation, when not built in
        method: Option<Method>,
    },

    Unary {
        op: UnaryOperator,
        operand: Box<Expr>,
        ty: Type,
        method: Option<Method>,
    },

    Constant {
        value: Value,
        ty: Type,
    },

    /// A value computed on this side by the partial evaluator
    Captured {
        value: Value,
        ty: Type,
    },

    Parameter(Variable),

    MemberAccess {
        target: Box<Expr>,
        member: Member,
    },

    Call {
        /// `None` for static methods
        target: Option<Box<Expr>>,
        method: Method,
        args: Vec<Expr>,
    },

    New {
        constructor: Constructor,
        args: Vec<Expr>,
    },

    NewArray {
        kind: NewArrayKind,
        element: Type,
        exprs: Vec<Expr>,
    },

    ListInit {
        new: Box<Expr>,
        initializers: Vec<ElementInit>,
    },

    MemberInit {
        new: Box<Expr>,
        bindings: Vec<MemberBinding>,
    },

    Lambda {
        ty: Type,
        params: Vec<Variable>,
        body: Arc<Expr>,
    },

    Invoke {
        target: Box<Expr>,
        args: Vec<Expr>,
    },

    Conditional {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
        ty: Type,
    },

    TypeIs {
        operand: Box<Expr>,
        type_operand: Type,
    },

    Block {
        ty: Type,
        variables: Vec<Variable>,
        exprs: Vec<Expr>,
    },

    Default(Type),

    Label {
        target: LabelTarget,
        default: Option<Box<Expr>>,
    },

    Goto {
        kind: GotoKind,
        target: LabelTarget,
        value: Option<Box<Expr>>,
        ty: Type,
    },

    Loop {
        body: Box<Expr>,
        break_label: Option<LabelTarget>,
        continue_label: Option<LabelTarget>,
    },

    Switch {
        ty: Type,
        value: Box<Expr>,
        cases: Vec<SwitchCase>,
        default: Option<Box<Expr>>,
        comparison: Option<Method>,
    },

    Try {
        ty: Type,
        body: Box<Expr>,
        handlers: Vec<CatchBlock>,
        finally: Option<Box<Expr>>,
        fault: Option<Box<Expr>>,
    },

    Extension(Extension),
}

impl Expr {
    /// Create a constant typed by its value
    pub fn constant(value: Value) -> Self {
        let ty = value.runtime_type();
        Expr::Constant { value, ty }
    }

    /// Create a constant with an explicit static type
    pub fn constant_typed(value: Value, ty: Type) -> Self {
        Expr::Constant { value, ty }
    }

    pub fn parameter(variable: &Variable) -> Self {
        Expr::Parameter(variable.clone())
    }

    /// Create a binary expression with the built-in result type
    pub fn binary(op: BinaryOperator, left: Expr, right: Expr) -> Self {
        let ty = match op {
            _ if op.is_comparison() => Type::Bool,
            BinaryOperator::AndAlso | BinaryOperator::OrElse => Type::Bool,
            BinaryOperator::Coalesce => right.ty(),
            BinaryOperator::ArrayIndex => left
                .ty()
                .element_type()
                .cloned()
                .unwrap_or(Type::Object),
            _ => left.ty(),
        };
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            ty,
            method: None,
        }
    }

    /// Create a binary expression implemented by `method`
    pub fn binary_with(op: BinaryOperator, left: Expr, right: Expr, method: Method) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            ty: method.return_type(),
            method: Some(method),
        }
    }

    pub fn equal(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOperator::Equal, left, right)
    }

    pub fn not_equal(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOperator::NotEqual, left, right)
    }

    pub fn less_than(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOperator::LessThan, left, right)
    }

    pub fn greater_than(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOperator::GreaterThan, left, right)
    }

    pub fn greater_than_or_equal(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOperator::GreaterThanOrEqual, left, right)
    }

    pub fn and_also(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOperator::AndAlso, left, right)
    }

    pub fn or_else(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOperator::OrElse, left, right)
    }

    pub fn add(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOperator::Add, left, right)
    }

    pub fn subtract(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOperator::Subtract, left, right)
    }

    pub fn multiply(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOperator::Multiply, left, right)
    }

    pub fn divide(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOperator::Divide, left, right)
    }

    pub fn assign(variable: &Variable, value: Expr) -> Self {
        Self::binary(BinaryOperator::Assign, Expr::parameter(variable), value)
    }

    pub fn unary(op: UnaryOperator, operand: Expr, ty: Type) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
            ty,
            method: None,
        }
    }

    pub fn not(operand: Expr) -> Self {
        let ty = operand.ty();
        Self::unary(UnaryOperator::Not, operand, ty)
    }

    pub fn negate(operand: Expr) -> Self {
        let ty = operand.ty();
        Self::unary(UnaryOperator::Negate, operand, ty)
    }

    pub fn convert(operand: Expr, ty: Type) -> Self {
        Self::unary(UnaryOperator::Convert, operand, ty)
    }

    /// Quote a lambda so it is passed as an expression tree rather than a delegate
    pub fn quote(lambda: Expr) -> Self {
        let ty = Type::expression(lambda.ty());
        Self::unary(UnaryOperator::Quote, lambda, ty)
    }

    pub fn throw(exception: Expr) -> Self {
        Self::unary(UnaryOperator::Throw, exception, Type::Void)
    }

    pub fn member(target: Expr, member: Member) -> Self {
        Expr::MemberAccess {
            target: Box::new(target),
            member,
        }
    }

    pub fn call(target: Expr, method: Method, args: Vec<Expr>) -> Self {
        Expr::Call {
            target: Some(Box::new(target)),
            method,
            args,
        }
    }

    pub fn call_static(method: Method, args: Vec<Expr>) -> Self {
        Expr::Call {
            target: None,
            method,
            args,
        }
    }

    pub fn new_object(constructor: Constructor, args: Vec<Expr>) -> Self {
        Expr::New { constructor, args }
    }

    pub fn new_array(element: Type, exprs: Vec<Expr>) -> Self {
        Expr::NewArray {
            kind: NewArrayKind::Init,
            element,
            exprs,
        }
    }

    /// Create a lambda whose function type follows from its parameters and body
    pub fn lambda(params: Vec<Variable>, body: Expr) -> Self {
        let ty = Type::function(params.iter().map(|p| p.ty().clone()).collect(), body.ty());
        Expr::Lambda {
            ty,
            params,
            body: Arc::new(body),
        }
    }

    pub fn invoke(target: Expr, args: Vec<Expr>) -> Self {
        Expr::Invoke {
            target: Box::new(target),
            args,
        }
    }

    pub fn condition(test: Expr, if_true: Expr, if_false: Expr) -> Self {
        let ty = if_true.ty();
        Expr::Conditional {
            test: Box::new(test),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
            ty,
        }
    }

    /// One-armed conditional in statement position
    pub fn if_then(test: Expr, if_true: Expr) -> Self {
        Expr::Conditional {
            test: Box::new(test),
            if_true: Box::new(if_true),
            if_false: Box::new(Expr::Default(Type::Void)),
            ty: Type::Void,
        }
    }

    pub fn type_is(operand: Expr, type_operand: Type) -> Self {
        Expr::TypeIs {
            operand: Box::new(operand),
            type_operand,
        }
    }

    /// Create a block typed by its last expression
    pub fn block(variables: Vec<Variable>, exprs: Vec<Expr>) -> Self {
        let ty = exprs.last().map(Expr::ty).unwrap_or(Type::Void);
        Expr::Block {
            ty,
            variables,
            exprs,
        }
    }

    pub fn label(target: &LabelTarget, default: Option<Expr>) -> Self {
        Expr::Label {
            target: target.clone(),
            default: default.map(Box::new),
        }
    }

    pub fn goto(kind: GotoKind, target: &LabelTarget, value: Option<Expr>) -> Self {
        Expr::Goto {
            kind,
            target: target.clone(),
            value: value.map(Box::new),
            ty: Type::Void,
        }
    }

    pub fn break_to(target: &LabelTarget, value: Option<Expr>) -> Self {
        Self::goto(GotoKind::Break, target, value)
    }

    pub fn continue_to(target: &LabelTarget) -> Self {
        Self::goto(GotoKind::Continue, target, None)
    }

    pub fn return_to(target: &LabelTarget, value: Option<Expr>) -> Self {
        Self::goto(GotoKind::Return, target, value)
    }

    pub fn loop_with(
        body: Expr,
        break_label: Option<&LabelTarget>,
        continue_label: Option<&LabelTarget>,
    ) -> Self {
        Expr::Loop {
            body: Box::new(body),
            break_label: break_label.cloned(),
            continue_label: continue_label.cloned(),
        }
    }

    pub fn switch(value: Expr, cases: Vec<SwitchCase>, default: Option<Expr>) -> Self {
        let ty = cases
            .first()
            .map(|c| c.body.ty())
            .or_else(|| default.as_ref().map(Expr::ty))
            .unwrap_or(Type::Void);
        Expr::Switch {
            ty,
            value: Box::new(value),
            cases,
            default: default.map(Box::new),
            comparison: None,
        }
    }

    pub fn try_catch(body: Expr, handlers: Vec<CatchBlock>) -> Self {
        Expr::Try {
            ty: body.ty(),
            body: Box::new(body),
            handlers,
            finally: None,
            fault: None,
        }
    }

    pub fn try_finally(body: Expr, handlers: Vec<CatchBlock>, finally: Expr) -> Self {
        Expr::Try {
            ty: body.ty(),
            body: Box::new(body),
            handlers,
            finally: Some(Box::new(finally)),
            fault: None,
        }
    }

    pub fn extension(node: Arc<dyn ExtensionNode>) -> Self {
        Expr::Extension(Extension(node))
    }

    /// Static type of the expression
    pub fn ty(&self) -> Type {
        match self {
            Expr::Binary { ty, .. }
            | Expr::Unary { ty, .. }
            | Expr::Constant { ty, .. }
            | Expr::Captured { ty, .. }
            | Expr::Lambda { ty, .. }
            | Expr::Conditional { ty, .. }
            | Expr::Block { ty, .. }
            | Expr::Goto { ty, .. }
            | Expr::Switch { ty, .. }
            | Expr::Try { ty, .. } => ty.clone(),
            Expr::Default(ty) => ty.clone(),
            Expr::Parameter(variable) => variable.ty().clone(),
            Expr::MemberAccess { member, .. } => member.ty().clone(),
            Expr::Call { method, .. } => method.return_type(),
            Expr::New { constructor, .. } => constructor.ty().clone(),
            Expr::NewArray { element, .. } => Type::array(element.clone()),
            Expr::ListInit { new, .. } | Expr::MemberInit { new, .. } => new.ty(),
            Expr::Invoke { target, .. } => target
                .ty()
                .signature()
                .map(|(_, ret)| ret.clone())
                .unwrap_or(Type::Object),
            Expr::TypeIs { .. } => Type::Bool,
            Expr::Label { target, .. } => target.ty().clone(),
            Expr::Loop { break_label, .. } => break_label
                .as_ref()
                .map(|l| l.ty().clone())
                .unwrap_or(Type::Void),
            Expr::Extension(ext) => ext.0.ty(),
        }
    }

    pub fn kind(&self) -> ExprKind {
        match self {
            Expr::Binary { .. } => ExprKind::Binary,
            Expr::Unary { op, .. } => match op {
                UnaryOperator::Convert => ExprKind::Convert,
                UnaryOperator::ConvertChecked => ExprKind::ConvertChecked,
                UnaryOperator::Quote => ExprKind::Quote,
                UnaryOperator::Throw => ExprKind::Throw,
                _ => ExprKind::Unary,
            },
            Expr::Constant { .. } => ExprKind::Constant,
            Expr::Captured { .. } => ExprKind::Captured,
            Expr::Parameter(_) => ExprKind::Parameter,
            Expr::MemberAccess { .. } => ExprKind::MemberAccess,
            Expr::Call { .. } => ExprKind::Call,
            Expr::New { .. } => ExprKind::New,
            Expr::NewArray { .. } => ExprKind::NewArray,
            Expr::ListInit { .. } => ExprKind::ListInit,
            Expr::MemberInit { .. } => ExprKind::MemberInit,
            Expr::Lambda { .. } => ExprKind::Lambda,
            Expr::Invoke { .. } => ExprKind::Invoke,
            Expr::Conditional { .. } => ExprKind::Conditional,
            Expr::TypeIs { .. } => ExprKind::TypeIs,
            Expr::Block { .. } => ExprKind::Block,
            Expr::Default(_) => ExprKind::Default,
            Expr::Label { .. } => ExprKind::Label,
            Expr::Goto { .. } => ExprKind::Goto,
            Expr::Loop { .. } => ExprKind::Loop,
            Expr::Switch { .. } => ExprKind::Switch,
            Expr::Try { .. } => ExprKind::Try,
            Expr::Extension(_) => ExprKind::Extension,
        }
    }

    /// Direct sub-expressions, in evaluation order.
    ///
    /// Declarations (lambda parameters, block and catch variables, labels) are
    /// not children. [`Expr::try_map_children`] visits the same nodes in the
    /// same order.
    pub fn children(&self) -> Vec<&Expr> {
        let mut out = Vec::new();
        match self {
            Expr::Binary { left, right, .. } => {
                out.push(left.as_ref());
                out.push(right.as_ref());
            }
            Expr::Unary { operand, .. } => out.push(operand),
            Expr::Constant { .. }
            | Expr::Captured { .. }
            | Expr::Parameter(_)
            | Expr::Default(_)
            | Expr::Extension(_) => {}
            Expr::MemberAccess { target, .. } => out.push(target),
            Expr::Call { target, args, .. } => {
                if let Some(target) = target {
                    out.push(target);
                }
                out.extend(args.iter());
            }
            Expr::New { args, .. } => out.extend(args.iter()),
            Expr::NewArray { exprs, .. } => out.extend(exprs.iter()),
            Expr::ListInit { new, initializers } => {
                out.push(new);
                for init in initializers {
                    out.extend(init.args.iter());
                }
            }
            Expr::MemberInit { new, bindings } => {
                out.push(new);
                push_binding_children(bindings, &mut out);
            }
            Expr::Lambda { body, .. } => out.push(body),
            Expr::Invoke { target, args } => {
                out.push(target);
                out.extend(args.iter());
            }
            Expr::Conditional {
                test,
                if_true,
                if_false,
                ..
            } => {
                out.push(test);
                out.push(if_true);
                out.push(if_false);
            }
            Expr::TypeIs { operand, .. } => out.push(operand),
            Expr::Block { exprs, .. } => out.extend(exprs.iter()),
            Expr::Label { default, .. } => out.extend(default.as_deref()),
            Expr::Goto { value, .. } => out.extend(value.as_deref()),
            Expr::Loop { body, .. } => out.push(body),
            Expr::Switch {
                value,
                cases,
                default,
                ..
            } => {
                out.push(value);
                for case in cases {
                    out.extend(case.test_values.iter());
                    out.push(&case.body);
                }
                out.extend(default.as_deref());
            }
            Expr::Try {
                body,
                handlers,
                finally,
                fault,
                ..
            } => {
                out.push(body);
                for handler in handlers {
                    out.extend(handler.filter.as_ref());
                    out.push(&handler.body);
                }
                out.extend(finally.as_deref());
                out.extend(fault.as_deref());
            }
        }
        out
    }

    /// Rebuild this node with every child replaced by `f(child)`, visiting
    /// children left to right in [`Expr::children`] order.
    pub fn try_map_children<E>(
        &self,
        f: &mut dyn FnMut(&Expr) -> Result<Expr, E>,
    ) -> Result<Expr, E> {
        let expr = match self {
            Expr::Binary {
                op,
                left,
                right,
                ty,
                method,
            } => Expr::Binary {
                op: *op,
                left: boxed(left, f)?,
                right: boxed(right, f)?,
                ty: ty.clone(),
                method: method.clone(),
            },
            Expr::Unary {
                op,
                operand,
                ty,
                method,
            } => Expr::Unary {
                op: *op,
                operand: boxed(operand, f)?,
                ty: ty.clone(),
                method: method.clone(),
            },
            Expr::Constant { .. }
            | Expr::Captured { .. }
            | Expr::Parameter(_)
            | Expr::Default(_)
            | Expr::Extension(_) => self.clone(),
            Expr::MemberAccess { target, member } => Expr::MemberAccess {
                target: boxed(target, f)?,
                member: member.clone(),
            },
            Expr::Call {
                target,
                method,
                args,
            } => Expr::Call {
                target: match target {
                    Some(t) => Some(boxed(t, f)?),
                    None => None,
                },
                method: method.clone(),
                args: map_all(args, f)?,
            },
            Expr::New { constructor, args } => Expr::New {
                constructor: constructor.clone(),
                args: map_all(args, f)?,
            },
            Expr::NewArray {
                kind,
                element,
                exprs,
            } => Expr::NewArray {
                kind: *kind,
                element: element.clone(),
                exprs: map_all(exprs, f)?,
            },
            Expr::ListInit { new, initializers } => Expr::ListInit {
                new: boxed(new, f)?,
                initializers: map_initializers(initializers, f)?,
            },
            Expr::MemberInit { new, bindings } => Expr::MemberInit {
                new: boxed(new, f)?,
                bindings: map_bindings(bindings, f)?,
            },
            Expr::Lambda { ty, params, body } => Expr::Lambda {
                ty: ty.clone(),
                params: params.clone(),
                body: Arc::new(f(body)?),
            },
            Expr::Invoke { target, args } => Expr::Invoke {
                target: boxed(target, f)?,
                args: map_all(args, f)?,
            },
            Expr::Conditional {
                test,
                if_true,
                if_false,
                ty,
            } => Expr::Conditional {
                test: boxed(test, f)?,
                if_true: boxed(if_true, f)?,
                if_false: boxed(if_false, f)?,
                ty: ty.clone(),
            },
            Expr::TypeIs {
                operand,
                type_operand,
            } => Expr::TypeIs {
                operand: boxed(operand, f)?,
                type_operand: type_operand.clone(),
            },
            Expr::Block {
                ty,
                variables,
                exprs,
            } => Expr::Block {
                ty: ty.clone(),
                variables: variables.clone(),
                exprs: map_all(exprs, f)?,
            },
            Expr::Label { target, default } => Expr::Label {
                target: target.clone(),
                default: match default {
                    Some(d) => Some(boxed(d, f)?),
                    None => None,
                },
            },
            Expr::Goto {
                kind,
                target,
                value,
                ty,
            } => Expr::Goto {
                kind: *kind,
                target: target.clone(),
                value: match value {
                    Some(v) => Some(boxed(v, f)?),
                    None => None,
                },
                ty: ty.clone(),
            },
            Expr::Loop {
                body,
                break_label,
                continue_label,
            } => Expr::Loop {
                body: boxed(body, f)?,
                break_label: break_label.clone(),
                continue_label: continue_label.clone(),
            },
            Expr::Switch {
                ty,
                value,
                cases,
                default,
                comparison,
            } => {
                let value = boxed(value, f)?;
                let mut mapped = Vec::with_capacity(cases.len());
                for case in cases {
                    mapped.push(SwitchCase {
                        test_values: map_all(&case.test_values, f)?,
                        body: f(&case.body)?,
                    });
                }
                Expr::Switch {
                    ty: ty.clone(),
                    value,
                    cases: mapped,
                    default: match default {
                        Some(d) => Some(boxed(d, f)?),
                        None => None,
                    },
                    comparison: comparison.clone(),
                }
            }
            Expr::Try {
                ty,
                body,
                handlers,
                finally,
                fault,
            } => {
                let body = boxed(body, f)?;
                let mut mapped = Vec::with_capacity(handlers.len());
                for handler in handlers {
                    let filter = match &handler.filter {
                        Some(filter) => Some(f(filter)?),
                        None => None,
                    };
                    mapped.push(CatchBlock {
                        test: handler.test.clone(),
                        variable: handler.variable.clone(),
                        filter,
                        body: f(&handler.body)?,
                    });
                }
                Expr::Try {
                    ty: ty.clone(),
                    body,
                    handlers: mapped,
                    finally: match finally {
                        Some(e) => Some(boxed(e, f)?),
                        None => None,
                    },
                    fault: match fault {
                        Some(e) => Some(boxed(e, f)?),
                        None => None,
                    },
                }
            }
        };
        Ok(expr)
    }

    /// Variables referenced but not declared inside this expression, in first-use order
    pub fn free_variables(&self) -> Vec<Variable> {
        let mut bound = Vec::new();
        let mut free = Vec::new();
        self.collect_free(&mut bound, &mut free);
        free
    }

    fn collect_free(&self, bound: &mut Vec<Variable>, free: &mut Vec<Variable>) {
        match self {
            Expr::Parameter(v) => {
                if !bound.contains(v) && !free.contains(v) {
                    free.push(v.clone());
                }
            }
            Expr::Lambda { params, body, .. } => {
                let mark = bound.len();
                bound.extend(params.iter().cloned());
                body.collect_free(bound, free);
                bound.truncate(mark);
            }
            Expr::Block {
                variables, exprs, ..
            } => {
                let mark = bound.len();
                bound.extend(variables.iter().cloned());
                for e in exprs {
                    e.collect_free(bound, free);
                }
                bound.truncate(mark);
            }
            Expr::Try {
                body,
                handlers,
                finally,
                fault,
                ..
            } => {
                body.collect_free(bound, free);
                for handler in handlers {
                    let mark = bound.len();
                    bound.extend(handler.variable.iter().cloned());
                    if let Some(filter) = &handler.filter {
                        filter.collect_free(bound, free);
                    }
                    handler.body.collect_free(bound, free);
                    bound.truncate(mark);
                }
                for e in finally.iter().chain(fault.iter()) {
                    e.collect_free(bound, free);
                }
            }
            other => {
                for child in other.children() {
                    child.collect_free(bound, free);
                }
            }
        }
    }

    /// Replace parameter references for which `f` yields a substitute
    pub fn replace_parameters(&self, f: &dyn Fn(&Variable) -> Option<Expr>) -> Expr {
        if let Expr::Parameter(v) = self {
            if let Some(replacement) = f(v) {
                return replacement;
            }
        }
        let mapped: Result<Expr, Infallible> =
            self.try_map_children(&mut |child| Ok(child.replace_parameters(f)));
        match mapped {
            Ok(expr) => expr,
            Err(never) => match never {},
        }
    }

    /// Number of nodes in the tree
    pub fn node_count(&self) -> usize {
        1 + self
            .children()
            .into_iter()
            .map(Expr::node_count)
            .sum::<usize>()
    }
}

fn boxed<E>(e: &Expr, f: &mut dyn FnMut(&Expr) -> Result<Expr, E>) -> Result<Box<Expr>, E> {
    f(e).map(Box::new)
}

fn push_binding_children<'a>(bindings: &'a [MemberBinding], out: &mut Vec<&'a Expr>) {
    for binding in bindings {
        match binding {
            MemberBinding::Assignment { expr, .. } => out.push(expr),
            MemberBinding::Member { bindings, .. } => push_binding_children(bindings, out),
            MemberBinding::List { initializers, .. } => {
                for init in initializers {
                    out.extend(init.args.iter());
                }
            }
        }
    }
}

fn map_all<E>(
    exprs: &[Expr],
    f: &mut dyn FnMut(&Expr) -> Result<Expr, E>,
) -> Result<Vec<Expr>, E> {
    let mut out = Vec::with_capacity(exprs.len());
    for e in exprs {
        out.push(f(e)?);
    }
    Ok(out)
}

fn map_initializers<E>(
    initializers: &[ElementInit],
    f: &mut dyn FnMut(&Expr) -> Result<Expr, E>,
) -> Result<Vec<ElementInit>, E> {
    let mut out = Vec::with_capacity(initializers.len());
    for init in initializers {
        out.push(ElementInit {
            add_method: init.add_method.clone(),
            args: map_all(&init.args, f)?,
        });
    }
    Ok(out)
}

fn map_bindings<E>(
    bindings: &[MemberBinding],
    f: &mut dyn FnMut(&Expr) -> Result<Expr, E>,
) -> Result<Vec<MemberBinding>, E> {
    let mut out = Vec::with_capacity(bindings.len());
    for binding in bindings {
        out.push(match binding {
            MemberBinding::Assignment { member, expr } => MemberBinding::Assignment {
                member: member.clone(),
                expr: f(expr)?,
            },
            MemberBinding::Member { member, bindings } => MemberBinding::Member {
                member: member.clone(),
                bindings: map_bindings(bindings, f)?,
            },
            MemberBinding::List {
                member,
                initializers,
            } => MemberBinding::List {
                member: member.clone(),
                initializers: map_initializers(initializers, f)?,
            },
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_identity() {
        let a = Variable::new("x", Type::Int32);
        let b = Variable::new("x", Type::Int32);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a.name(), "x");
    }

    #[test]
    fn test_builder_types() {
        let x = Variable::new("x", Type::Int32);
        let cmp = Expr::greater_than(Expr::parameter(&x), Expr::constant(Value::Int32(1)));
        assert_eq!(cmp.ty(), Type::Bool);
        assert_eq!(cmp.kind(), ExprKind::Binary);

        let lambda = Expr::lambda(vec![x.clone()], cmp);
        assert_eq!(lambda.ty(), Type::function(vec![Type::Int32], Type::Bool));

        let quoted = Expr::quote(lambda);
        assert_eq!(quoted.kind(), ExprKind::Quote);
        assert_eq!(
            quoted.ty(),
            Type::expression(Type::function(vec![Type::Int32], Type::Bool))
        );

        let one_armed = Expr::if_then(Expr::constant(Value::Bool(true)), Expr::Default(Type::Void));
        assert_eq!(one_armed.ty(), Type::Void);
    }

    #[test]
    fn test_children_order_matches_map() {
        let x = Variable::new("x", Type::Int32);
        let expr = Expr::condition(
            Expr::greater_than(Expr::parameter(&x), Expr::constant(Value::Int32(0))),
            Expr::constant(Value::Int32(1)),
            Expr::constant(Value::Int32(2)),
        );
        let kinds: Vec<ExprKind> = expr.children().iter().map(|c| c.kind()).collect();
        assert_eq!(
            kinds,
            vec![ExprKind::Binary, ExprKind::Constant, ExprKind::Constant]
        );

        let mut seen = Vec::new();
        let rebuilt: Result<Expr, Infallible> = expr.try_map_children(&mut |child| {
            seen.push(child.kind());
            Ok(child.clone())
        });
        assert_eq!(seen, kinds);
        assert_eq!(rebuilt.unwrap(), expr);
    }

    #[test]
    fn test_free_variables_respect_scopes() {
        let outer = Variable::new("outer", Type::Int32);
        let inner = Variable::new("inner", Type::Int32);
        let body = Expr::add(Expr::parameter(&inner), Expr::parameter(&outer));
        let lambda = Expr::lambda(vec![inner.clone()], body);
        assert_eq!(lambda.free_variables(), vec![outer.clone()]);

        let replaced = lambda.replace_parameters(&|v| {
            (v == &outer).then(|| Expr::constant(Value::Int32(5)))
        });
        assert!(replaced.free_variables().is_empty());
        assert_eq!(replaced.node_count(), 4);
    }
}
