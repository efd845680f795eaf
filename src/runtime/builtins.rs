//! Builtin classes, query operators and string members.

use crate::expression::eval::{as_function, binary_values, compare_values};
use crate::expression::{BinaryOperator, EvalError, EvalResult};
use crate::runtime::registry::{Method, MethodDef, PropertyDef, TypeRegistry};
use crate::runtime::types::{ClassInfo, FieldInfo, Type};
use crate::runtime::value::{Deferred, Object, Sequence, SequenceKind, Value};
use std::cmp::Ordering;
use std::sync::Arc;

/// Root of the exception hierarchy
pub const EXCEPTION: &str = "Exception";

const EXCEPTION_CLASSES: &[&str] = &[
    "InvalidOperationException",
    "ArgumentException",
    "DivideByZeroException",
    "NullReferenceException",
    "InvalidCastException",
    "OverflowException",
];

/// Class handle for an exception type. Every exception derives from
/// [`EXCEPTION`] and carries a `message` field.
pub fn exception_class(name: &str) -> Arc<ClassInfo> {
    let root = ClassInfo::new(EXCEPTION, vec![FieldInfo::new("message", Type::String)]);
    if name == EXCEPTION {
        root
    } else {
        ClassInfo::derived(name, &root, Vec::new())
    }
}

/// Build an exception object
pub fn exception(name: &str, message: impl Into<String>) -> Value {
    let mut object = Object::new(exception_class(name));
    // the root class always declares `message`
    let _ = object.set("message", Value::String(message.into()));
    Value::object(object)
}

/// The exception a caught runtime error is presented as
pub fn exception_from_error(error: &EvalError) -> Value {
    match error {
        EvalError::Thrown { type_name, message } => exception(type_name, message.clone()),
        EvalError::DivisionByZero => exception("DivideByZeroException", error.to_string()),
        EvalError::UnexpectedNull { .. } => exception("NullReferenceException", error.to_string()),
        EvalError::InvalidCast { .. } => exception("InvalidCastException", error.to_string()),
        EvalError::Overflow { .. } => exception("OverflowException", error.to_string()),
        other => exception("InvalidOperationException", other.to_string()),
    }
}

/// Message carried by an exception value
pub fn exception_message(exception: &Value) -> String {
    match exception {
        Value::Object(object) => match object.get("message") {
            Some(Value::String(message)) => message.clone(),
            _ => exception.to_string(),
        },
        other => other.to_string(),
    }
}

/// Register every builtin into `registry`
pub fn install(registry: &mut TypeRegistry) {
    registry.register_class(exception_class(EXCEPTION));
    for name in EXCEPTION_CLASSES {
        registry.register_class(exception_class(name));
    }
    for flavor in [Flavor::Queryable, Flavor::Enumerable] {
        install_operators(registry, flavor);
    }
    install_string_members(registry);
    install_collection_members(registry);
}

/// Which query surface an operator belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    /// Operators take quoted lambdas and run eagerly over in-memory queryables
    Queryable,
    /// Operators take delegates and produce deferred sequences
    Enumerable,
}

impl Flavor {
    fn key(self) -> &'static str {
        match self {
            Flavor::Queryable => "Queryable",
            Flavor::Enumerable => "Enumerable",
        }
    }

    fn sequence(self, element: &Type) -> Type {
        match self {
            Flavor::Queryable => Type::queryable(element.clone()),
            Flavor::Enumerable => Type::enumerable(element.clone()),
        }
    }

    fn lambda(self, params: Vec<Type>, ret: Type) -> Type {
        let function = Type::function(params, ret);
        match self {
            Flavor::Queryable => Type::expression(function),
            Flavor::Enumerable => function,
        }
    }

    fn wrap<F>(self, element: Type, produce: F) -> EvalResult<Value>
    where
        F: Fn() -> EvalResult<Vec<Value>> + Send + Sync + 'static,
    {
        match self {
            Flavor::Queryable => Ok(Value::Sequence(Sequence::queryable(element, produce()?))),
            Flavor::Enumerable => Ok(Value::Deferred(Deferred::new(element, produce))),
        }
    }
}

fn static_method<S, B>(declaring_type: &str, name: &str, generic_arity: usize, signature: S, body: B) -> MethodDef
where
    S: Fn(&[Type]) -> (Vec<Type>, Type) + Send + Sync + 'static,
    B: Fn(&Method, Option<&Value>, &[Value]) -> EvalResult<Value> + Send + Sync + 'static,
{
    MethodDef {
        declaring_type: declaring_type.to_string(),
        name: name.to_string(),
        generic_arity,
        is_static: true,
        signature: Arc::new(signature),
        body: Arc::new(body),
    }
}

fn instance_method<S, B>(declaring_type: &str, name: &str, generic_arity: usize, signature: S, body: B) -> MethodDef
where
    S: Fn(&[Type]) -> (Vec<Type>, Type) + Send + Sync + 'static,
    B: Fn(&Method, Option<&Value>, &[Value]) -> EvalResult<Value> + Send + Sync + 'static,
{
    MethodDef {
        is_static: false,
        ..static_method(declaring_type, name, generic_arity, signature, body)
    }
}

fn generic(m: &Method, index: usize) -> Type {
    m.generic_args().get(index).cloned().unwrap_or(Type::Object)
}

/// Null sorts first; values of different types compare equal
fn compare_keys(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

fn install_operators(registry: &mut TypeRegistry, flavor: Flavor) {
    let key = flavor.key();

    registry.register_method(static_method(
        key,
        "where",
        1,
        move |g| {
            let t = &g[0];
            (
                vec![flavor.sequence(t), flavor.lambda(vec![t.clone()], Type::Bool)],
                flavor.sequence(t),
            )
        },
        move |m, _, args| {
            let source = args[0].clone();
            let predicate = as_function(&args[1])?;
            flavor.wrap(generic(m, 0), move || {
                let mut out = Vec::new();
                for item in source.to_items()?.iter() {
                    if predicate.call(std::slice::from_ref(item))?.as_bool()? {
                        out.push(item.clone());
                    }
                }
                Ok(out)
            })
        },
    ));

    registry.register_method(static_method(
        key,
        "select",
        2,
        move |g| {
            (
                vec![flavor.sequence(&g[0]), flavor.lambda(vec![g[0].clone()], g[1].clone())],
                flavor.sequence(&g[1]),
            )
        },
        move |m, _, args| {
            let source = args[0].clone();
            let selector = as_function(&args[1])?;
            flavor.wrap(generic(m, 1), move || {
                source
                    .to_items()?
                    .iter()
                    .map(|item| selector.call(std::slice::from_ref(item)))
                    .collect()
            })
        },
    ));

    for (name, descending) in [("order_by", false), ("order_by_descending", true)] {
        registry.register_method(static_method(
            key,
            name,
            2,
            move |g| {
                (
                    vec![flavor.sequence(&g[0]), flavor.lambda(vec![g[0].clone()], g[1].clone())],
                    flavor.sequence(&g[0]),
                )
            },
            move |m, _, args| {
                let source = args[0].clone();
                let key_selector = as_function(&args[1])?;
                flavor.wrap(generic(m, 0), move || {
                    let items = source.to_items()?;
                    let mut keyed = Vec::with_capacity(items.len());
                    for item in items.iter() {
                        keyed.push((key_selector.call(std::slice::from_ref(item))?, item.clone()));
                    }
                    keyed.sort_by(|(a, _), (b, _)| {
                        let ordering = compare_keys(a, b);
                        if descending {
                            ordering.reverse()
                        } else {
                            ordering
                        }
                    });
                    Ok(keyed.into_iter().map(|(_, item)| item).collect())
                })
            },
        ));
    }

    for (name, skip) in [("take", false), ("skip", true)] {
        registry.register_method(static_method(
            key,
            name,
            1,
            move |g| (vec![flavor.sequence(&g[0]), Type::Int32], flavor.sequence(&g[0])),
            move |m, _, args| {
                let source = args[0].clone();
                let count = args[1].as_i32()?.max(0) as usize;
                flavor.wrap(generic(m, 0), move || {
                    let items = source.to_items()?;
                    let selected = if skip {
                        items.iter().skip(count).cloned().collect()
                    } else {
                        items.iter().take(count).cloned().collect()
                    };
                    Ok(selected)
                })
            },
        ));
    }

    registry.register_method(static_method(
        key,
        "count",
        1,
        move |g| (vec![flavor.sequence(&g[0])], Type::Int32),
        |_, _, args| Ok(Value::Int32(args[0].to_items()?.len() as i32)),
    ));

    registry.register_method(static_method(
        key,
        "any",
        1,
        move |g| (vec![flavor.sequence(&g[0])], Type::Bool),
        |_, _, args| Ok(Value::Bool(!args[0].to_items()?.is_empty())),
    ));

    registry.register_method(static_method(
        key,
        "first",
        1,
        move |g| (vec![flavor.sequence(&g[0])], g[0].clone()),
        |_, _, args| {
            args[0]
                .to_items()?
                .first()
                .cloned()
                .ok_or_else(|| EvalError::EvaluationError {
                    message: "Sequence contains no elements".to_string(),
                })
        },
    ));

    registry.register_method(static_method(
        key,
        "contains",
        1,
        move |g| (vec![flavor.sequence(&g[0]), g[0].clone()], Type::Bool),
        |_, _, args| Ok(Value::Bool(args[0].to_items()?.contains(&args[1]))),
    ));

    registry.register_method(static_method(
        key,
        "sum",
        1,
        move |g| (vec![flavor.sequence(&g[0])], g[0].clone()),
        |m, _, args| {
            let mut total = Value::default_for(&generic(m, 0));
            for item in args[0].to_items()?.iter() {
                total = binary_values(BinaryOperator::Add, &total, item)?;
            }
            Ok(total)
        },
    ));

    registry.register_method(static_method(
        key,
        "to_array",
        1,
        move |g| (vec![flavor.sequence(&g[0])], Type::array(g[0].clone())),
        |m, _, args| {
            let items = args[0].to_items()?;
            Ok(Value::Sequence(Sequence::array(generic(m, 0), items.to_vec())))
        },
    ));

    if flavor == Flavor::Queryable {
        registry.register_method(static_method(
            key,
            "as_queryable",
            1,
            |g| (vec![Type::enumerable(g[0].clone())], Type::queryable(g[0].clone())),
            |m, _, args| match &args[0] {
                Value::Resource(_) => Ok(args[0].clone()),
                other => {
                    let items = other.to_items()?;
                    Ok(Value::Sequence(Sequence::queryable(generic(m, 0), items.to_vec())))
                }
            },
        ));
    }
}

fn target_str<'a>(target: Option<&'a Value>) -> EvalResult<&'a str> {
    match target {
        Some(value) => value.as_str(),
        None => Err(EvalError::UnexpectedNull {
            context: "string method".to_string(),
        }),
    }
}

fn install_string_members(registry: &mut TypeRegistry) {
    let predicates: [(&str, fn(&str, &str) -> bool); 3] = [
        ("starts_with", |s, p| s.starts_with(p)),
        ("ends_with", |s, p| s.ends_with(p)),
        ("contains", |s, p| s.contains(p)),
    ];
    for (name, test) in predicates {
        registry.register_method(instance_method(
            "string",
            name,
            0,
            |_| (vec![Type::String], Type::Bool),
            move |_, target, args| Ok(Value::Bool(test(target_str(target)?, args[0].as_str()?))),
        ));
    }

    let transforms: [(&str, fn(&str) -> String); 3] = [
        ("to_upper", |s| s.to_uppercase()),
        ("to_lower", |s| s.to_lowercase()),
        ("trim", |s| s.trim().to_string()),
    ];
    for (name, transform) in transforms {
        registry.register_method(instance_method(
            "string",
            name,
            0,
            |_| (Vec::new(), Type::String),
            move |_, target, _| Ok(Value::String(transform(target_str(target)?))),
        ));
    }

    registry.register_property(
        "string",
        "length",
        PropertyDef {
            ty: Type::Int32,
            getter: Arc::new(|target| Ok(Value::Int32(target.as_str()?.chars().count() as i32))),
        },
    );
}

fn install_collection_members(registry: &mut TypeRegistry) {
    // functional add: returns the extended list
    registry.register_method(instance_method(
        "List",
        "add",
        1,
        |g| (vec![g[0].clone()], Type::list(g[0].clone())),
        |m, target, args| {
            let items = match target {
                Some(list) => list.to_items()?,
                None => Arc::new(Vec::new()),
            };
            let mut extended = items.to_vec();
            extended.push(args[0].clone());
            Ok(Value::Sequence(Sequence::new(
                SequenceKind::List,
                generic(m, 0),
                extended,
            )))
        },
    ));

    let count = PropertyDef {
        ty: Type::Int32,
        getter: Arc::new(|target| Ok(Value::Int32(target.to_items()?.len() as i32))),
    };
    registry.register_property("List", "count", count.clone());
    registry.register_property("[]", "length", count);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::eval::evaluate_expression;
    use crate::expression::{Expr, Interpreter, Variable};

    fn numbers(kind: SequenceKind) -> Value {
        Value::Sequence(Sequence::new(
            kind,
            Type::Int32,
            (1..=5).map(Value::Int32).collect(),
        ))
    }

    #[test]
    fn test_exception_hierarchy() {
        let base = Type::Class(exception_class(EXCEPTION));
        let derived = Type::Class(exception_class("ArgumentException"));
        assert!(base.is_assignable_from(&derived));
        let value = exception_from_error(&EvalError::DivisionByZero);
        assert_eq!(
            value.runtime_type(),
            Type::Class(exception_class("DivideByZeroException"))
        );
        assert_eq!(exception_message(&value), "Division by zero");
    }

    #[test]
    fn test_queryable_where_with_quoted_lambda() {
        let registry = TypeRegistry::with_builtins();
        let n = Variable::new("n", Type::Int32);
        let predicate = Expr::quote(Expr::lambda(
            vec![n.clone()],
            Expr::greater_than(Expr::parameter(&n), Expr::constant(Value::Int32(3))),
        ));
        let quoted = evaluate_expression(&predicate).unwrap();
        assert!(matches!(quoted, Value::Expression(_)));
        let method = registry.method("Queryable", "where", &[Type::Int32]).unwrap();
        let result = method
            .invoke(None, &[numbers(SequenceKind::Queryable), quoted])
            .unwrap();
        let items = result.to_items().unwrap();
        assert_eq!(items.as_slice(), &[Value::Int32(4), Value::Int32(5)]);
    }

    #[test]
    fn test_enumerable_operators_are_deferred() {
        let registry = TypeRegistry::with_builtins();
        let n = Variable::new("n", Type::Int32);
        let double = Interpreter::new()
            .compile_lambda(&Expr::lambda(
                vec![n.clone()],
                Expr::multiply(Expr::parameter(&n), Expr::constant(Value::Int32(2))),
            ))
            .unwrap();
        let select = registry
            .method("Enumerable", "select", &[Type::Int32, Type::Int32])
            .unwrap();
        let result = select
            .invoke(None, &[numbers(SequenceKind::Array), Value::Function(double)])
            .unwrap();
        assert!(matches!(result, Value::Deferred(_)));

        let sum = registry.method("Enumerable", "sum", &[Type::Int32]).unwrap();
        assert_eq!(sum.invoke(None, &[result]).unwrap(), Value::Int32(30));
    }

    #[test]
    fn test_ordering_take_skip() {
        let registry = TypeRegistry::with_builtins();
        let n = Variable::new("n", Type::Int32);
        let key = Interpreter::new()
            .compile_lambda(&Expr::lambda(vec![n.clone()], Expr::parameter(&n)))
            .unwrap();
        let ordered = registry
            .method("Queryable", "order_by_descending", &[Type::Int32, Type::Int32])
            .unwrap()
            .invoke(None, &[numbers(SequenceKind::Queryable), Value::Function(key)])
            .unwrap();
        let skipped = registry
            .method("Queryable", "skip", &[Type::Int32])
            .unwrap()
            .invoke(None, &[ordered, Value::Int32(1)])
            .unwrap();
        let taken = registry
            .method("Queryable", "take", &[Type::Int32])
            .unwrap()
            .invoke(None, &[skipped, Value::Int32(2)])
            .unwrap();
        assert_eq!(
            taken.to_items().unwrap().as_slice(),
            &[Value::Int32(4), Value::Int32(3)]
        );
    }

    #[test]
    fn test_first_on_empty_sequence_fails() {
        let registry = TypeRegistry::with_builtins();
        let first = registry.method("Queryable", "first", &[Type::Int32]).unwrap();
        let empty = Value::Sequence(Sequence::queryable(Type::Int32, Vec::new()));
        assert!(first.invoke(None, &[empty]).is_err());
    }

    #[test]
    fn test_string_members() {
        let registry = TypeRegistry::with_builtins();
        let starts = registry.method("string", "starts_with", &[]).unwrap();
        let result = starts
            .invoke(Some(&Value::string("Berlin")), &[Value::string("Ber")])
            .unwrap();
        assert_eq!(result, Value::Bool(true));

        let length = registry.member(&Type::String, "length").unwrap();
        assert_eq!(length.get(&Value::string("héllo")).unwrap(), Value::Int32(5));
    }

    #[test]
    fn test_list_add_is_functional() {
        let registry = TypeRegistry::with_builtins();
        let add = registry.method("List", "add", &[Type::Int32]).unwrap();
        let list = numbers(SequenceKind::List);
        let extended = add.invoke(Some(&list), &[Value::Int32(6)]).unwrap();
        assert_eq!(list.to_items().unwrap().len(), 5);
        assert_eq!(extended.to_items().unwrap().len(), 6);
    }
}
