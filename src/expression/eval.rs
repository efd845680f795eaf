//! Tree-walking interpreter for native expression trees.
//!
//! "Compiling" an expression checks that it is closed and wraps it in a
//! [`Function`] thunk; the tree is walked each time the thunk is invoked.

use crate::expression::{
    BinaryOperator, CatchBlock, EvalError, EvalResult, Expr, LabelTarget, MemberBinding,
    NewArrayKind, UnaryOperator, Variable,
};
use crate::runtime::builtins::{exception_from_error, exception_message};
use crate::runtime::{Function, Object, Sequence, Type, Value};
use num_bigint::BigInt;
use num_complex::Complex64;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

/// Strategy used to turn an isolated sub-tree into a value
pub trait EvaluationStrategy: Send + Sync {
    /// Evaluate a closed expression
    fn evaluate(&self, expr: &Expr) -> EvalResult<Value>;
}

/// The default evaluation strategy
#[derive(Debug, Default, Clone, Copy)]
pub struct Interpreter;

impl Interpreter {
    pub fn new() -> Self {
        Self
    }

    /// Compile a closed expression into a parameterless thunk
    pub fn compile(&self, expr: &Expr) -> EvalResult<Function> {
        if let Some(free) = expr.free_variables().first() {
            return Err(EvalError::UnboundParameter {
                name: free.name().to_string(),
            });
        }
        let expr = Arc::new(expr.clone());
        let ty = Type::function(Vec::new(), expr.ty());
        Ok(Function::new(ty, move |_| Frame::default().run(&expr)))
    }

    /// Compile a lambda, or a quoted lambda, into a callable delegate
    pub fn compile_lambda(&self, expr: &Expr) -> EvalResult<Function> {
        match expr {
            Expr::Unary {
                op: UnaryOperator::Quote,
                operand,
                ..
            } => self.compile_lambda(operand),
            Expr::Lambda { ty, params, body } => {
                if let Some(free) = expr.free_variables().first() {
                    return Err(EvalError::UnboundParameter {
                        name: free.name().to_string(),
                    });
                }
                Ok(Frame::default().closure(ty, params, body))
            }
            other => Err(EvalError::TypeMismatch {
                expected: Type::function(Vec::new(), Type::Object),
                actual: other.ty(),
                context: "lambda compilation".to_string(),
            }),
        }
    }
}

impl EvaluationStrategy for Interpreter {
    fn evaluate(&self, expr: &Expr) -> EvalResult<Value> {
        self.compile(expr)?.call(&[])
    }
}

/// Evaluate a closed expression with the default interpreter
pub fn evaluate_expression(expr: &Expr) -> EvalResult<Value> {
    Interpreter.evaluate(expr)
}

/// Turn a delegate or quoted lambda value into something callable
pub fn as_function(value: &Value) -> EvalResult<Function> {
    match value {
        Value::Function(f) => Ok(f.clone()),
        Value::Expression(expr) => Interpreter.compile_lambda(expr),
        Value::Null => Err(EvalError::UnexpectedNull {
            context: "delegate invocation".to_string(),
        }),
        other => Err(EvalError::TypeMismatch {
            expected: Type::function(Vec::new(), Type::Object),
            actual: other.runtime_type(),
            context: "delegate invocation".to_string(),
        }),
    }
}

/// Non-local exits while walking the tree
enum Interrupt {
    Jump { target: LabelTarget, value: Value },
    Thrown(Value),
    Error(EvalError),
}

impl From<EvalError> for Interrupt {
    fn from(error: EvalError) -> Self {
        Interrupt::Error(error)
    }
}

type Flow<T> = Result<T, Interrupt>;

fn escape(interrupt: Interrupt) -> EvalError {
    match interrupt {
        Interrupt::Jump { target, .. } => EvalError::UndefinedLabel {
            name: target.name().to_string(),
        },
        Interrupt::Thrown(exception) => EvalError::Thrown {
            type_name: exception.runtime_type().to_string(),
            message: exception_message(&exception),
        },
        Interrupt::Error(error) => error,
    }
}

/// Variable bindings of one activation
#[derive(Default, Clone)]
struct Frame {
    vars: HashMap<Variable, Value>,
    /// Exception being handled, for rethrow
    exception: Option<Value>,
}

impl Frame {
    fn run(&mut self, expr: &Expr) -> EvalResult<Value> {
        self.eval(expr).map_err(escape)
    }

    /// Build a delegate that runs `body` over a snapshot of this frame
    fn closure(&self, ty: &Type, params: &[Variable], body: &Arc<Expr>) -> Function {
        let captured = self.clone();
        let params = params.to_vec();
        let body = body.clone();
        Function::new(ty.clone(), move |args| {
            if args.len() != params.len() {
                return Err(EvalError::ArgumentCount {
                    function: "lambda".to_string(),
                    expected: params.len(),
                    actual: args.len(),
                });
            }
            let mut frame = captured.clone();
            for (param, arg) in params.iter().zip(args) {
                frame.vars.insert(param.clone(), arg.clone());
            }
            match frame.eval(&body) {
                Ok(value) => Ok(value),
                Err(Interrupt::Jump { target, value }) if is_label(&body, &target) => Ok(value),
                Err(interrupt) => Err(escape(interrupt)),
            }
        })
    }

    fn eval(&mut self, expr: &Expr) -> Flow<Value> {
        match expr {
            Expr::Constant { value, .. } | Expr::Captured { value, .. } => Ok(value.clone()),

            Expr::Parameter(variable) => self.vars.get(variable).cloned().ok_or_else(|| {
                Interrupt::Error(EvalError::UnboundParameter {
                    name: variable.name().to_string(),
                })
            }),

            Expr::Binary {
                op,
                left,
                right,
                method,
                ..
            } => self.eval_binary(*op, left, right, method.as_ref()),

            Expr::Unary {
                op,
                operand,
                ty,
                method,
            } => match op {
                UnaryOperator::Quote => Ok(self.quote(operand)),
                UnaryOperator::Throw => {
                    let exception = self.eval(operand)?;
                    if exception.is_null() {
                        return match &self.exception {
                            Some(current) => Err(Interrupt::Thrown(current.clone())),
                            None => Err(EvalError::UnexpectedNull {
                                context: "throw".to_string(),
                            }
                            .into()),
                        };
                    }
                    Err(Interrupt::Thrown(exception))
                }
                _ => {
                    let value = self.eval(operand)?;
                    match method {
                        Some(method) => Ok(method.invoke(None, &[value])?),
                        None => Ok(unary_value(*op, value, ty)?),
                    }
                }
            },

            Expr::MemberAccess { target, member } => {
                let target = self.eval(target)?;
                Ok(member.get(&target)?)
            }

            Expr::Call {
                target,
                method,
                args,
            } => {
                let target = match target {
                    Some(t) => Some(self.eval(t)?),
                    None => None,
                };
                let args = self.eval_all(args)?;
                Ok(method.invoke(target.as_ref(), &args)?)
            }

            Expr::New { constructor, args } => {
                let args = self.eval_all(args)?;
                Ok(constructor.invoke(&args)?)
            }

            Expr::NewArray {
                kind,
                element,
                exprs,
            } => {
                let items = match kind {
                    NewArrayKind::Init => self.eval_all(exprs)?,
                    NewArrayKind::Bounds => {
                        let size = match exprs.first() {
                            Some(bound) => self.eval(bound)?.as_i32()?,
                            None => 0,
                        };
                        if size < 0 {
                            return Err(EvalError::Overflow {
                                context: "array bounds".to_string(),
                            }
                            .into());
                        }
                        vec![Value::default_for(element); size as usize]
                    }
                };
                Ok(Value::Sequence(Sequence::array(element.clone(), items)))
            }

            Expr::ListInit { new, initializers } => {
                let mut collection = self.eval(new)?;
                for init in initializers {
                    let args = self.eval_all(&init.args)?;
                    collection = init.add_method.invoke(Some(&collection), &args)?;
                }
                Ok(collection)
            }

            Expr::MemberInit { new, bindings } => match self.eval(new)? {
                Value::Object(object) => {
                    let object = self.apply_bindings((*object).clone(), bindings)?;
                    Ok(Value::object(object))
                }
                other => Err(EvalError::TypeMismatch {
                    expected: new.ty(),
                    actual: other.runtime_type(),
                    context: "member initialization".to_string(),
                }
                .into()),
            },

            Expr::Lambda { ty, params, body } => {
                Ok(Value::Function(self.closure(ty, params, body)))
            }

            Expr::Invoke { target, args } => {
                let function = as_function(&self.eval(target)?)?;
                let args = self.eval_all(args)?;
                Ok(function.call(&args)?)
            }

            Expr::Conditional {
                test,
                if_true,
                if_false,
                ..
            } => {
                if self.eval(test)?.as_bool()? {
                    self.eval(if_true)
                } else {
                    self.eval(if_false)
                }
            }

            Expr::TypeIs {
                operand,
                type_operand,
            } => {
                let value = self.eval(operand)?;
                Ok(Value::Bool(
                    !value.is_null() && type_operand.is_assignable_from(&value.runtime_type()),
                ))
            }

            Expr::Block {
                variables, exprs, ..
            } => {
                let saved: Vec<(Variable, Option<Value>)> = variables
                    .iter()
                    .map(|v| {
                        let previous = self.vars.insert(v.clone(), Value::default_for(v.ty()));
                        (v.clone(), previous)
                    })
                    .collect();
                let result = self.run_statements(exprs);
                for (variable, previous) in saved.into_iter().rev() {
                    match previous {
                        Some(value) => self.vars.insert(variable, value),
                        None => self.vars.remove(&variable),
                    };
                }
                result
            }

            Expr::Default(ty) => Ok(Value::default_for(ty)),

            Expr::Label { target, default } => match default {
                Some(default) => self.eval(default),
                None => Ok(Value::default_for(target.ty())),
            },

            Expr::Goto { target, value, .. } => {
                let value = match value {
                    Some(v) => self.eval(v)?,
                    None => Value::Null,
                };
                Err(Interrupt::Jump {
                    target: target.clone(),
                    value,
                })
            }

            Expr::Loop {
                body,
                break_label,
                continue_label,
            } => loop {
                match self.eval(body) {
                    Ok(_) => {}
                    Err(Interrupt::Jump { target, value }) => {
                        if break_label.as_ref() == Some(&target) {
                            return Ok(value);
                        }
                        if continue_label.as_ref() != Some(&target) {
                            return Err(Interrupt::Jump { target, value });
                        }
                    }
                    Err(other) => return Err(other),
                }
            },

            Expr::Switch {
                value,
                cases,
                default,
                comparison,
                ..
            } => {
                let value = self.eval(value)?;
                for case in cases {
                    for test in &case.test_values {
                        let candidate = self.eval(test)?;
                        let matched = match comparison {
                            Some(method) => method.invoke(None, &[value.clone(), candidate])?.as_bool()?,
                            None => value == candidate,
                        };
                        if matched {
                            return self.eval(&case.body);
                        }
                    }
                }
                match default {
                    Some(default) => self.eval(default),
                    None => Ok(Value::Null),
                }
            }

            Expr::Try {
                body,
                handlers,
                finally,
                fault,
                ..
            } => {
                let mut outcome = match self.eval(body) {
                    Err(Interrupt::Thrown(exception)) => match self.catch(handlers, &exception) {
                        Some(handled) => handled,
                        None => Err(Interrupt::Thrown(exception)),
                    },
                    Err(Interrupt::Error(error)) => {
                        let exception = exception_from_error(&error);
                        match self.catch(handlers, &exception) {
                            Some(handled) => handled,
                            None => Err(Interrupt::Error(error)),
                        }
                    }
                    other => other,
                };
                if outcome.is_err() {
                    if let Some(fault) = fault {
                        if let Err(interrupt) = self.eval(fault) {
                            outcome = Err(interrupt);
                        }
                    }
                }
                if let Some(finally) = finally {
                    self.eval(finally)?;
                }
                outcome
            }

            Expr::Extension(ext) => match ext.0.reduce() {
                Some(reduced) => self.eval(&reduced),
                None => Err(EvalError::NotReducible {
                    name: ext.0.name().to_string(),
                }
                .into()),
            },
        }
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> Flow<Vec<Value>> {
        let mut values = Vec::with_capacity(exprs.len());
        for e in exprs {
            values.push(self.eval(e)?);
        }
        Ok(values)
    }

    fn eval_binary(
        &mut self,
        op: BinaryOperator,
        left: &Expr,
        right: &Expr,
        method: Option<&crate::runtime::Method>,
    ) -> Flow<Value> {
        match op {
            BinaryOperator::AndAlso => {
                if !self.eval(left)?.as_bool()? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval(right)?.as_bool()?))
            }
            BinaryOperator::OrElse => {
                if self.eval(left)?.as_bool()? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.eval(right)?.as_bool()?))
            }
            BinaryOperator::Coalesce => {
                let value = self.eval(left)?;
                if value.is_null() {
                    self.eval(right)
                } else {
                    Ok(value)
                }
            }
            BinaryOperator::Assign => match left {
                Expr::Parameter(variable) => {
                    let value = self.eval(right)?;
                    self.vars.insert(variable.clone(), value.clone());
                    Ok(value)
                }
                other => Err(EvalError::EvaluationError {
                    message: format!("cannot assign to {} expression", other.kind()),
                }
                .into()),
            },
            _ => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                match method {
                    Some(method) => Ok(method.invoke(None, &[l, r])?),
                    None => Ok(binary_values(op, &l, &r)?),
                }
            }
        }
    }

    /// Run block statements, resuming after a label when a jump targets it
    fn run_statements(&mut self, exprs: &[Expr]) -> Flow<Value> {
        let mut index = 0;
        let mut last = Value::Null;
        while index < exprs.len() {
            match self.eval(&exprs[index]) {
                Ok(value) => {
                    last = value;
                    index += 1;
                }
                Err(Interrupt::Jump { target, value }) => {
                    match exprs.iter().position(|e| is_label(e, &target)) {
                        Some(position) => {
                            last = value;
                            index = position + 1;
                        }
                        None => return Err(Interrupt::Jump { target, value }),
                    }
                }
                Err(other) => return Err(other),
            }
        }
        Ok(last)
    }

    fn apply_bindings(&mut self, mut object: Object, bindings: &[MemberBinding]) -> Flow<Object> {
        for binding in bindings {
            match binding {
                MemberBinding::Assignment { member, expr } => {
                    let value = self.eval(expr)?;
                    object = member.set(&object, value)?;
                }
                MemberBinding::Member { member, bindings } => {
                    match member.get(&Value::object(object.clone()))? {
                        Value::Object(inner) => {
                            let inner = self.apply_bindings((*inner).clone(), bindings)?;
                            object = member.set(&object, Value::object(inner))?;
                        }
                        other => {
                            return Err(EvalError::TypeMismatch {
                                expected: member.ty().clone(),
                                actual: other.runtime_type(),
                                context: format!("nested initializer of {}", member.name()),
                            }
                            .into())
                        }
                    }
                }
                MemberBinding::List {
                    member,
                    initializers,
                } => {
                    let mut collection = member.get(&Value::object(object.clone()))?;
                    for init in initializers {
                        let args = self.eval_all(&init.args)?;
                        collection = init.add_method.invoke(Some(&collection), &args)?;
                    }
                    object = member.set(&object, collection)?;
                }
            }
        }
        Ok(object)
    }

    /// Find the first handler accepting `exception` and run it
    fn catch(&mut self, handlers: &[CatchBlock], exception: &Value) -> Option<Flow<Value>> {
        let ty = exception.runtime_type();
        for handler in handlers {
            if !handler.test.is_assignable_from(&ty) {
                continue;
            }
            let saved = handler
                .variable
                .as_ref()
                .map(|v| (v.clone(), self.vars.insert(v.clone(), exception.clone())));
            let previous = self.exception.replace(exception.clone());

            let passes = match &handler.filter {
                Some(filter) => self
                    .eval(filter)
                    .and_then(|v| v.as_bool().map_err(Interrupt::from)),
                None => Ok(true),
            };
            let result = match passes {
                Ok(true) => Some(self.eval(&handler.body)),
                Ok(false) => None,
                Err(interrupt) => Some(Err(interrupt)),
            };

            self.exception = previous;
            if let Some((variable, previous)) = saved {
                match previous {
                    Some(value) => self.vars.insert(variable, value),
                    None => self.vars.remove(&variable),
                };
            }
            if result.is_some() {
                return result;
            }
        }
        None
    }

    /// Quote a lambda, freezing the variables it closes over
    fn quote(&self, operand: &Expr) -> Value {
        let free = operand.free_variables();
        let quoted = if free.is_empty() {
            operand.clone()
        } else {
            let vars = &self.vars;
            operand.replace_parameters(&|v| {
                if !free.contains(v) {
                    return None;
                }
                vars.get(v)
                    .map(|value| Expr::constant_typed(value.clone(), v.ty().clone()))
            })
        };
        Value::Expression(Arc::new(quoted))
    }
}

fn is_label(expr: &Expr, target: &LabelTarget) -> bool {
    matches!(expr, Expr::Label { target: t, .. } if t == target)
}

fn invalid_operands(op: &str, left: &Value, right: &Value) -> EvalError {
    EvalError::InvalidOperandTypes {
        operator: op.to_string(),
        left_type: Some(left.runtime_type()),
        right_type: Some(right.runtime_type()),
    }
}

fn overflow(context: &str) -> EvalError {
    EvalError::Overflow {
        context: context.to_string(),
    }
}

macro_rules! integer_op {
    ($op:expr, $a:expr, $b:expr, $left:expr, $right:expr) => {
        match $op {
            BinaryOperator::Add => Ok($a.wrapping_add($b)),
            BinaryOperator::Subtract => Ok($a.wrapping_sub($b)),
            BinaryOperator::Multiply => Ok($a.wrapping_mul($b)),
            BinaryOperator::AddChecked => $a.checked_add($b).ok_or_else(|| overflow("addition")),
            BinaryOperator::SubtractChecked => {
                $a.checked_sub($b).ok_or_else(|| overflow("subtraction"))
            }
            BinaryOperator::MultiplyChecked => {
                $a.checked_mul($b).ok_or_else(|| overflow("multiplication"))
            }
            BinaryOperator::Divide if $b == 0 => Err(EvalError::DivisionByZero),
            BinaryOperator::Divide => Ok($a.wrapping_div($b)),
            BinaryOperator::Modulo if $b == 0 => Err(EvalError::DivisionByZero),
            BinaryOperator::Modulo => Ok($a.wrapping_rem($b)),
            BinaryOperator::Power if $b < 0 => Err(overflow("power")),
            BinaryOperator::Power => Ok($a.wrapping_pow($b as u32)),
            BinaryOperator::And => Ok($a & $b),
            BinaryOperator::Or => Ok($a | $b),
            BinaryOperator::ExclusiveOr => Ok($a ^ $b),
            other => Err(invalid_operands(other.as_str(), $left, $right)),
        }
    };
}

/// Apply a strict (non short-circuit) binary operator to two values
pub fn binary_values(op: BinaryOperator, left: &Value, right: &Value) -> EvalResult<Value> {
    match op {
        BinaryOperator::Equal => return Ok(Value::Bool(left == right)),
        BinaryOperator::NotEqual => return Ok(Value::Bool(left != right)),
        _ if op.is_comparison() => {
            if left.is_null() || right.is_null() {
                return Ok(Value::Bool(false));
            }
            let ordering = compare_values(left, right)
                .ok_or_else(|| invalid_operands(op.as_str(), left, right))?;
            let result = match op {
                BinaryOperator::LessThan => ordering == Ordering::Less,
                BinaryOperator::LessThanOrEqual => ordering != Ordering::Greater,
                BinaryOperator::GreaterThan => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            return Ok(Value::Bool(result));
        }
        BinaryOperator::ArrayIndex => {
            let items = left.to_items()?;
            let index = right.as_i32()?;
            return usize::try_from(index)
                .ok()
                .and_then(|i| items.get(i).cloned())
                .ok_or(EvalError::IndexOutOfRange {
                    index: index as i64,
                    len: items.len(),
                });
        }
        _ => {}
    }

    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    let sym = op.as_str();
    match (left, right) {
        (Value::Int32(a), Value::Int32(b)) => {
            integer_op!(op, *a, *b, left, right).map(Value::Int32)
        }
        (Value::Int64(a), Value::Int64(b)) => {
            integer_op!(op, *a, *b, left, right).map(Value::Int64)
        }
        (Value::Float64(a), Value::Float64(b)) => match op {
            BinaryOperator::Add | BinaryOperator::AddChecked => Ok(Value::Float64(a + b)),
            BinaryOperator::Subtract | BinaryOperator::SubtractChecked => Ok(Value::Float64(a - b)),
            BinaryOperator::Multiply | BinaryOperator::MultiplyChecked => Ok(Value::Float64(a * b)),
            BinaryOperator::Divide => Ok(Value::Float64(a / b)),
            BinaryOperator::Modulo => Ok(Value::Float64(a % b)),
            BinaryOperator::Power => Ok(Value::Float64(a.powf(*b))),
            _ => Err(invalid_operands(sym, left, right)),
        },
        (Value::Decimal(a), Value::Decimal(b)) => {
            let result = match op {
                BinaryOperator::Add | BinaryOperator::AddChecked => a.checked_add(*b),
                BinaryOperator::Subtract | BinaryOperator::SubtractChecked => a.checked_sub(*b),
                BinaryOperator::Multiply | BinaryOperator::MultiplyChecked => a.checked_mul(*b),
                BinaryOperator::Divide | BinaryOperator::Modulo if b.is_zero() => {
                    return Err(EvalError::DivisionByZero)
                }
                BinaryOperator::Divide => a.checked_div(*b),
                BinaryOperator::Modulo => a.checked_rem(*b),
                _ => return Err(invalid_operands(sym, left, right)),
            };
            result.map(Value::Decimal).ok_or_else(|| overflow("decimal arithmetic"))
        }
        (Value::BigInt(a), Value::BigInt(b)) => match op {
            BinaryOperator::Add | BinaryOperator::AddChecked => Ok(Value::BigInt(a + b)),
            BinaryOperator::Subtract | BinaryOperator::SubtractChecked => Ok(Value::BigInt(a - b)),
            BinaryOperator::Multiply | BinaryOperator::MultiplyChecked => Ok(Value::BigInt(a * b)),
            BinaryOperator::Divide | BinaryOperator::Modulo if *b == BigInt::default() => {
                Err(EvalError::DivisionByZero)
            }
            BinaryOperator::Divide => Ok(Value::BigInt(a / b)),
            BinaryOperator::Modulo => Ok(Value::BigInt(a % b)),
            _ => Err(invalid_operands(sym, left, right)),
        },
        (Value::Complex(a), Value::Complex(b)) => match op {
            BinaryOperator::Add | BinaryOperator::AddChecked => Ok(Value::Complex(a + b)),
            BinaryOperator::Subtract | BinaryOperator::SubtractChecked => Ok(Value::Complex(a - b)),
            BinaryOperator::Multiply | BinaryOperator::MultiplyChecked => Ok(Value::Complex(a * b)),
            BinaryOperator::Divide if *b == Complex64::default() => Err(EvalError::DivisionByZero),
            BinaryOperator::Divide => Ok(Value::Complex(a / b)),
            _ => Err(invalid_operands(sym, left, right)),
        },
        (Value::Bool(a), Value::Bool(b)) => match op {
            BinaryOperator::And => Ok(Value::Bool(*a & *b)),
            BinaryOperator::Or => Ok(Value::Bool(*a | *b)),
            BinaryOperator::ExclusiveOr => Ok(Value::Bool(*a ^ *b)),
            _ => Err(invalid_operands(sym, left, right)),
        },
        (Value::String(a), Value::String(b)) if op == BinaryOperator::Add => {
            Ok(Value::String(format!("{}{}", a, b)))
        }
        (Value::DateTime(a), Value::TimeSpan(b)) => match op {
            BinaryOperator::Add => a.checked_add_signed(*b),
            BinaryOperator::Subtract => a.checked_sub_signed(*b),
            _ => return Err(invalid_operands(sym, left, right)),
        }
        .map(Value::DateTime)
        .ok_or_else(|| overflow("date arithmetic")),
        (Value::DateTime(a), Value::DateTime(b)) if op == BinaryOperator::Subtract => {
            Ok(Value::TimeSpan(a.signed_duration_since(*b)))
        }
        (Value::TimeSpan(a), Value::TimeSpan(b)) => match op {
            BinaryOperator::Add => a.checked_add(b),
            BinaryOperator::Subtract => a.checked_sub(b),
            _ => return Err(invalid_operands(sym, left, right)),
        }
        .map(Value::TimeSpan)
        .ok_or_else(|| overflow("time span arithmetic")),
        _ => Err(invalid_operands(sym, left, right)),
    }
}

/// Ordering between two values of the same primitive type
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Char(a), Value::Char(b)) => Some(a.cmp(b)),
        (Value::Int32(a), Value::Int32(b)) => Some(a.cmp(b)),
        (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
        (Value::Float64(a), Value::Float64(b)) => a.partial_cmp(b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
        (Value::TimeSpan(a), Value::TimeSpan(b)) => Some(a.cmp(b)),
        (Value::Guid(a), Value::Guid(b)) => Some(a.cmp(b)),
        (Value::Decimal(a), Value::Decimal(b)) => Some(a.cmp(b)),
        (Value::BigInt(a), Value::BigInt(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn unary_value(op: UnaryOperator, value: Value, ty: &Type) -> EvalResult<Value> {
    match op {
        UnaryOperator::Convert => return convert_value(value, ty, false),
        UnaryOperator::ConvertChecked => return convert_value(value, ty, true),
        UnaryOperator::TypeAs => {
            let keep = !value.is_null() && ty.is_assignable_from(&value.runtime_type());
            return Ok(if keep { value } else { Value::Null });
        }
        _ => {}
    }
    if value.is_null() {
        return Ok(Value::Null);
    }
    let invalid = |v: &Value| EvalError::InvalidOperandTypes {
        operator: op.as_str().to_string(),
        left_type: None,
        right_type: Some(v.runtime_type()),
    };
    match (op, &value) {
        (UnaryOperator::Plus, _) => Ok(value),
        (UnaryOperator::Negate, Value::Int32(n)) => Ok(Value::Int32(n.wrapping_neg())),
        (UnaryOperator::Negate, Value::Int64(n)) => Ok(Value::Int64(n.wrapping_neg())),
        (UnaryOperator::Negate, Value::Float64(n)) => Ok(Value::Float64(-n)),
        (UnaryOperator::Negate, Value::Decimal(n)) => Ok(Value::Decimal(-*n)),
        (UnaryOperator::Negate, Value::BigInt(n)) => Ok(Value::BigInt(-n)),
        (UnaryOperator::Negate, Value::Complex(c)) => Ok(Value::Complex(-c)),
        (UnaryOperator::Negate, Value::TimeSpan(t)) => Ok(Value::TimeSpan(-*t)),
        (UnaryOperator::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOperator::Not, Value::Int32(n)) => Ok(Value::Int32(!n)),
        (UnaryOperator::Not, Value::Int64(n)) => Ok(Value::Int64(!n)),
        (UnaryOperator::ArrayLength, Value::Sequence(s)) => Ok(Value::Int32(s.len() as i32)),
        _ => Err(invalid(&value)),
    }
}

/// Convert a value to `target`, with overflow checks when `checked` is set
pub fn convert_value(value: Value, target: &Type, checked: bool) -> EvalResult<Value> {
    if value.is_null() {
        return if target.accepts_null() {
            Ok(Value::Null)
        } else {
            Err(EvalError::InvalidCast {
                from: Type::Object,
                to: target.clone(),
            })
        };
    }
    let source = value.runtime_type();
    if target.is_assignable_from(&source) {
        return Ok(value);
    }
    let cast_error = || EvalError::InvalidCast {
        from: source.clone(),
        to: target.clone(),
    };
    let narrowed = |ok: bool| if ok || !checked { Ok(()) } else { Err(overflow("conversion")) };

    let converted = match (target.non_nullable(), &value) {
        (Type::Int32, Value::Int64(n)) => {
            narrowed(i32::try_from(*n).is_ok())?;
            Value::Int32(*n as i32)
        }
        (Type::Int32, Value::Float64(f)) => {
            narrowed(f.trunc() >= i32::MIN as f64 && f.trunc() <= i32::MAX as f64)?;
            Value::Int32(*f as i32)
        }
        (Type::Int32, Value::Char(c)) => Value::Int32(*c as u32 as i32),
        (Type::Int32, Value::Decimal(d)) => Value::Int32(d.to_i32().ok_or_else(|| overflow("conversion"))?),
        (Type::Int32, Value::BigInt(n)) => {
            Value::Int32(i32::try_from(n).map_err(|_| overflow("conversion"))?)
        }
        (Type::Int64, Value::Int32(n)) => Value::Int64(*n as i64),
        (Type::Int64, Value::Float64(f)) => {
            narrowed(f.trunc() >= i64::MIN as f64 && f.trunc() <= i64::MAX as f64)?;
            Value::Int64(*f as i64)
        }
        (Type::Int64, Value::Char(c)) => Value::Int64(*c as u32 as i64),
        (Type::Int64, Value::Decimal(d)) => Value::Int64(d.to_i64().ok_or_else(|| overflow("conversion"))?),
        (Type::Int64, Value::BigInt(n)) => {
            Value::Int64(i64::try_from(n).map_err(|_| overflow("conversion"))?)
        }
        (Type::Float64, Value::Int32(n)) => Value::Float64(*n as f64),
        (Type::Float64, Value::Int64(n)) => Value::Float64(*n as f64),
        (Type::Float64, Value::Decimal(d)) => Value::Float64(d.to_f64().ok_or_else(cast_error)?),
        (Type::Float64, Value::BigInt(n)) => Value::Float64(n.to_f64().ok_or_else(cast_error)?),
        (Type::Decimal, Value::Int32(n)) => Value::Decimal(Decimal::from(*n)),
        (Type::Decimal, Value::Int64(n)) => Value::Decimal(Decimal::from(*n)),
        (Type::Decimal, Value::Float64(f)) => {
            Value::Decimal(Decimal::from_f64(*f).ok_or_else(|| overflow("conversion"))?)
        }
        (Type::BigInt, Value::Int32(n)) => Value::BigInt(BigInt::from(*n)),
        (Type::BigInt, Value::Int64(n)) => Value::BigInt(BigInt::from(*n)),
        (Type::Complex, Value::Int32(n)) => Value::Complex(Complex64::new(f64::from(*n), 0.0)),
        (Type::Complex, Value::Int64(n)) => Value::Complex(Complex64::new(*n as f64, 0.0)),
        (Type::Complex, Value::Float64(f)) => Value::Complex(Complex64::new(*f, 0.0)),
        (Type::Char, Value::Int32(n)) => {
            Value::Char(u32::try_from(*n).ok().and_then(char::from_u32).ok_or_else(cast_error)?)
        }
        _ => return Err(cast_error()),
    };
    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{CatchBlock, GotoKind, SwitchCase};
    use crate::runtime::builtins::exception_class;
    use crate::runtime::{Constructor, TypeRegistry};

    fn int(n: i32) -> Expr {
        Expr::constant(Value::Int32(n))
    }

    #[test]
    fn test_arithmetic_and_comparison() {
        let expr = Expr::multiply(Expr::add(int(2), int(3)), int(4));
        assert_eq!(evaluate_expression(&expr).unwrap(), Value::Int32(20));

        let cmp = Expr::greater_than(int(5), int(3));
        assert_eq!(evaluate_expression(&cmp).unwrap(), Value::Bool(true));

        let div = Expr::divide(int(1), int(0));
        assert_eq!(evaluate_expression(&div), Err(EvalError::DivisionByZero));

        let concat = Expr::add(
            Expr::constant(Value::string("ab")),
            Expr::constant(Value::string("cd")),
        );
        assert_eq!(evaluate_expression(&concat).unwrap(), Value::string("abcd"));
    }

    #[test]
    fn test_checked_arithmetic_overflows() {
        let expr = Expr::binary(BinaryOperator::AddChecked, int(i32::MAX), int(1));
        assert!(matches!(
            evaluate_expression(&expr),
            Err(EvalError::Overflow { .. })
        ));
        let wrapping = Expr::add(int(i32::MAX), int(1));
        assert_eq!(evaluate_expression(&wrapping).unwrap(), Value::Int32(i32::MIN));
    }

    #[test]
    fn test_short_circuit() {
        // the right operand would divide by zero
        let expr = Expr::or_else(
            Expr::constant(Value::Bool(true)),
            Expr::equal(Expr::divide(int(1), int(0)), int(0)),
        );
        assert_eq!(evaluate_expression(&expr).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_unbound_parameter_is_rejected() {
        let x = Variable::new("x", Type::Int32);
        let err = Interpreter.compile(&Expr::parameter(&x)).unwrap_err();
        assert_eq!(
            err,
            EvalError::UnboundParameter {
                name: "x".to_string()
            }
        );
    }

    #[test]
    fn test_lambda_and_invoke() {
        let x = Variable::new("x", Type::Int32);
        let square = Expr::lambda(
            vec![x.clone()],
            Expr::multiply(Expr::parameter(&x), Expr::parameter(&x)),
        );
        let call = Expr::invoke(square.clone(), vec![int(7)]);
        assert_eq!(evaluate_expression(&call).unwrap(), Value::Int32(49));

        let compiled = Interpreter.compile_lambda(&Expr::quote(square)).unwrap();
        assert_eq!(compiled.call(&[Value::Int32(3)]).unwrap(), Value::Int32(9));
    }

    #[test]
    fn test_closure_captures_enclosing_parameter() {
        let x = Variable::new("x", Type::Int32);
        let y = Variable::new("y", Type::Int32);
        let inner = Expr::lambda(
            vec![y.clone()],
            Expr::add(Expr::parameter(&x), Expr::parameter(&y)),
        );
        let outer = Expr::lambda(vec![x.clone()], Expr::invoke(inner, vec![int(1)]));
        let call = Expr::invoke(outer, vec![int(41)]);
        assert_eq!(evaluate_expression(&call).unwrap(), Value::Int32(42));
    }

    #[test]
    fn test_loop_with_labelled_break() {
        // i = 0; sum = 0; loop { if (i >= 5) break sum; sum = sum + i; i = i + 1 }
        let i = Variable::new("i", Type::Int32);
        let sum = Variable::new("sum", Type::Int32);
        let brk = LabelTarget::new("done", Type::Int32);
        let body = Expr::block(
            vec![],
            vec![
                Expr::if_then(
                    Expr::greater_than_or_equal(Expr::parameter(&i), int(5)),
                    Expr::break_to(&brk, Some(Expr::parameter(&sum))),
                ),
                Expr::assign(&sum, Expr::add(Expr::parameter(&sum), Expr::parameter(&i))),
                Expr::assign(&i, Expr::add(Expr::parameter(&i), int(1))),
            ],
        );
        let program = Expr::block(
            vec![i.clone(), sum.clone()],
            vec![Expr::loop_with(body, Some(&brk), None)],
        );
        assert_eq!(evaluate_expression(&program).unwrap(), Value::Int32(10));
    }

    #[test]
    fn test_goto_forward_within_block() {
        let x = Variable::new("x", Type::Int32);
        let skip = LabelTarget::new("skip", Type::Void);
        let program = Expr::block(
            vec![x.clone()],
            vec![
                Expr::assign(&x, int(1)),
                Expr::goto(GotoKind::Goto, &skip, None),
                Expr::assign(&x, int(2)),
                Expr::label(&skip, None),
                Expr::parameter(&x),
            ],
        );
        assert_eq!(evaluate_expression(&program).unwrap(), Value::Int32(1));
    }

    #[test]
    fn test_return_label_in_lambda() {
        let x = Variable::new("x", Type::Int32);
        let ret = LabelTarget::new("return", Type::Int32);
        let body = Expr::block(
            vec![],
            vec![
                Expr::if_then(
                    Expr::less_than(Expr::parameter(&x), int(0)),
                    Expr::return_to(&ret, Some(int(0))),
                ),
                Expr::label(&ret, Some(Expr::parameter(&x))),
            ],
        );
        let abs_floor = Expr::lambda(vec![x.clone()], body);
        let f = Interpreter.compile_lambda(&abs_floor).unwrap();
        assert_eq!(f.call(&[Value::Int32(-5)]).unwrap(), Value::Int32(0));
        assert_eq!(f.call(&[Value::Int32(5)]).unwrap(), Value::Int32(5));
    }

    #[test]
    fn test_switch() {
        let switch = |n: i32| {
            Expr::switch(
                int(n),
                vec![
                    SwitchCase {
                        test_values: vec![int(1), int(2)],
                        body: Expr::constant(Value::string("small")),
                    },
                    SwitchCase {
                        test_values: vec![int(3)],
                        body: Expr::constant(Value::string("three")),
                    },
                ],
                Some(Expr::constant(Value::string("other"))),
            )
        };
        assert_eq!(evaluate_expression(&switch(2)).unwrap(), Value::string("small"));
        assert_eq!(evaluate_expression(&switch(3)).unwrap(), Value::string("three"));
        assert_eq!(evaluate_expression(&switch(9)).unwrap(), Value::string("other"));
    }

    #[test]
    fn test_try_catch_runtime_error() {
        let e = Variable::new("e", Type::Class(exception_class("Exception")));
        let expr = Expr::try_catch(
            Expr::divide(int(1), int(0)),
            vec![CatchBlock {
                test: Type::Class(exception_class("DivideByZeroException")),
                variable: Some(e),
                filter: None,
                body: int(-1),
            }],
        );
        assert_eq!(evaluate_expression(&expr).unwrap(), Value::Int32(-1));
    }

    #[test]
    fn test_throw_uncaught_and_finally() {
        let registry = TypeRegistry::with_builtins();
        let class = exception_class("InvalidOperationException");
        let ctor = Constructor::with_fields(&class, &["message"]).unwrap();
        let throw = Expr::throw(Expr::new_object(
            ctor,
            vec![Expr::constant(Value::string("not found"))],
        ));
        let counter = Variable::new("counter", Type::Int32);
        let program = Expr::block(
            vec![counter.clone()],
            vec![Expr::try_finally(
                Expr::block(vec![], vec![throw, int(0)]),
                vec![],
                Expr::assign(&counter, int(1)),
            )],
        );
        let err = evaluate_expression(&program).unwrap_err();
        assert_eq!(
            err,
            EvalError::Thrown {
                type_name: "InvalidOperationException".to_string(),
                message: "not found".to_string(),
            }
        );
        assert!(registry.class("InvalidOperationException").is_some());
    }

    #[test]
    fn test_catch_filter_and_rethrow() {
        let class = exception_class("ArgumentException");
        let ctor = Constructor::with_fields(&class, &["message"]).unwrap();
        let throw = Expr::throw(Expr::new_object(
            ctor,
            vec![Expr::constant(Value::string("bad"))],
        ));
        let inner = Expr::try_catch(
            Expr::block(vec![], vec![throw, int(0)]),
            vec![CatchBlock {
                test: Type::Class(exception_class("Exception")),
                variable: None,
                filter: Some(Expr::constant(Value::Bool(true))),
                body: Expr::block(
                    vec![],
                    vec![
                        Expr::throw(Expr::Default(Type::Class(exception_class("Exception")))),
                        int(1),
                    ],
                ),
            }],
        );
        let outer = Expr::try_catch(
            inner,
            vec![CatchBlock {
                test: Type::Class(class),
                variable: None,
                filter: None,
                body: int(2),
            }],
        );
        assert_eq!(evaluate_expression(&outer).unwrap(), Value::Int32(2));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(
            convert_value(Value::Int32(5), &Type::Int64, false).unwrap(),
            Value::Int64(5)
        );
        assert_eq!(
            convert_value(Value::Int64(1 << 40), &Type::Int32, false).unwrap(),
            Value::Int32(0)
        );
        assert!(convert_value(Value::Int64(1 << 40), &Type::Int32, true).is_err());
        assert_eq!(
            convert_value(Value::Int32(5), &Type::nullable(Type::Int32), true).unwrap(),
            Value::Int32(5)
        );
        assert!(matches!(
            convert_value(Value::string("x"), &Type::Int32, false),
            Err(EvalError::InvalidCast { .. })
        ));
    }

    #[test]
    fn test_complex_arithmetic() {
        let a = Expr::constant(Value::Complex(Complex64::new(1.0, 2.0)));
        let b = Expr::convert(Expr::constant(Value::Float64(3.0)), Type::Complex);
        let product = evaluate_expression(&Expr::multiply(a.clone(), b)).unwrap();
        assert_eq!(product, Value::Complex(Complex64::new(3.0, 6.0)));

        let zero = Expr::constant(Value::Complex(Complex64::default()));
        assert_eq!(
            evaluate_expression(&Expr::divide(a, zero)).unwrap_err(),
            EvalError::DivisionByZero
        );
    }
}
