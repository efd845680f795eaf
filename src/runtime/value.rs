//! Runtime values of the native runtime.

use crate::expression::{EvalError, EvalResult, Expr};
use crate::runtime::types::{ClassInfo, Type};
use chrono::{NaiveDateTime, TimeDelta};
use num_bigint::BigInt;
use num_complex::Complex64;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Values produced and consumed by the interpreter
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Char(char),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    DateTime(NaiveDateTime),
    TimeSpan(TimeDelta),
    Guid(Uuid),
    Decimal(Decimal),
    BigInt(BigInt),
    Complex(Complex64),
    /// A type handle used as a value
    Type(Type),
    Object(Arc<Object>),
    /// A materialized sequence
    Sequence(Sequence),
    /// A sequence that is computed when enumerated
    Deferred(Deferred),
    /// Marker for a data source that only exists on the remote side
    Resource(ResourceDescriptor),
    Function(Function),
    /// A quoted expression tree
    Expression(Arc<Expr>),
}

/// An instance of a registered class
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    class: Arc<ClassInfo>,
    fields: Vec<Value>,
}

impl Object {
    /// Create an instance with every field at its default value
    pub fn new(class: Arc<ClassInfo>) -> Self {
        let fields = class
            .fields()
            .iter()
            .map(|f| Value::default_for(&f.ty))
            .collect();
        Self { class, fields }
    }

    /// Create an instance from `(field, value)` pairs; unnamed fields keep their defaults
    pub fn with_fields<I, S>(class: Arc<ClassInfo>, values: I) -> EvalResult<Self>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: AsRef<str>,
    {
        let mut object = Self::new(class);
        for (name, value) in values {
            object.set(name.as_ref(), value)?;
        }
        Ok(object)
    }

    pub fn class(&self) -> &Arc<ClassInfo> {
        &self.class
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.class.field(name).map(|(index, _)| &self.fields[index])
    }

    pub fn set(&mut self, name: &str, value: Value) -> EvalResult<()> {
        match self.class.field(name) {
            Some((index, _)) => {
                self.fields[index] = value;
                Ok(())
            }
            None => Err(EvalError::UnknownMember {
                type_name: self.class.name().to_string(),
                member: name.to_string(),
            }),
        }
    }

    /// Fields in declaration order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.class
            .fields()
            .iter()
            .map(|f| f.name.as_str())
            .zip(self.fields.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceKind {
    Array,
    List,
    Enumerable,
    /// An in-memory queryable over materialized items
    Queryable,
}

#[derive(Debug, Clone)]
pub struct Sequence {
    kind: SequenceKind,
    element: Type,
    items: Arc<Vec<Value>>,
}

impl Sequence {
    pub fn new(kind: SequenceKind, element: Type, items: Vec<Value>) -> Self {
        Self {
            kind,
            element,
            items: Arc::new(items),
        }
    }

    pub fn array(element: Type, items: Vec<Value>) -> Self {
        Self::new(SequenceKind::Array, element, items)
    }

    pub fn queryable(element: Type, items: Vec<Value>) -> Self {
        Self::new(SequenceKind::Queryable, element, items)
    }

    /// Same items, different kind
    pub fn with_kind(&self, kind: SequenceKind) -> Self {
        Self {
            kind,
            element: self.element.clone(),
            items: self.items.clone(),
        }
    }

    pub fn kind(&self) -> SequenceKind {
        self.kind
    }

    pub fn element(&self) -> &Type {
        &self.element
    }

    pub fn items(&self) -> &Arc<Vec<Value>> {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ty(&self) -> Type {
        let element = self.element.clone();
        match self.kind {
            SequenceKind::Array => Type::array(element),
            SequenceKind::List => Type::list(element),
            SequenceKind::Enumerable => Type::enumerable(element),
            SequenceKind::Queryable => Type::queryable(element),
        }
    }
}

/// Producer behind a deferred sequence
pub type SequenceSource = Arc<dyn Fn() -> EvalResult<Vec<Value>> + Send + Sync>;

#[derive(Clone)]
pub struct Deferred {
    element: Type,
    source: SequenceSource,
}

impl Deferred {
    pub fn new<F>(element: Type, source: F) -> Self
    where
        F: Fn() -> EvalResult<Vec<Value>> + Send + Sync + 'static,
    {
        Self {
            element,
            source: Arc::new(source),
        }
    }

    pub fn element(&self) -> &Type {
        &self.element
    }

    /// Run the producer. Every call enumerates again.
    pub fn materialize(&self) -> EvalResult<Vec<Value>> {
        (self.source)()
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Deferred<{}>", self.element)
    }
}

/// Body of a callable value
pub type Callable = Arc<dyn Fn(&[Value]) -> EvalResult<Value> + Send + Sync>;

/// A compiled delegate
#[derive(Clone)]
pub struct Function {
    ty: Type,
    body: Callable,
}

impl Function {
    pub fn new<F>(ty: Type, body: F) -> Self
    where
        F: Fn(&[Value]) -> EvalResult<Value> + Send + Sync + 'static,
    {
        Self {
            ty,
            body: Arc::new(body),
        }
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn call(&self, args: &[Value]) -> EvalResult<Value> {
        (self.body)(args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function<{}>", self.ty)
    }
}

/// Descriptor of a remote data source, identified by name
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDescriptor {
    pub name: String,
    pub element: Type,
}

impl ResourceDescriptor {
    /// A resource named after its element type
    pub fn of(element: Type) -> Self {
        Self {
            name: element.to_string(),
            element,
        }
    }
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn object(object: Object) -> Self {
        Value::Object(Arc::new(object))
    }

    /// Default value of a type
    pub fn default_for(ty: &Type) -> Self {
        match ty {
            Type::Bool => Value::Bool(false),
            Type::Char => Value::Char('\0'),
            Type::Int32 => Value::Int32(0),
            Type::Int64 => Value::Int64(0),
            Type::Float64 => Value::Float64(0.0),
            Type::DateTime => Value::DateTime(NaiveDateTime::default()),
            Type::TimeSpan => Value::TimeSpan(TimeDelta::zero()),
            Type::Guid => Value::Guid(Uuid::nil()),
            Type::Decimal => Value::Decimal(Decimal::ZERO),
            Type::BigInt => Value::BigInt(BigInt::default()),
            Type::Complex => Value::Complex(Complex64::default()),
            _ => Value::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Type of the value itself, as opposed to the static type of an expression producing it
    pub fn runtime_type(&self) -> Type {
        match self {
            Value::Null => Type::Object,
            Value::Bool(_) => Type::Bool,
            Value::Char(_) => Type::Char,
            Value::Int32(_) => Type::Int32,
            Value::Int64(_) => Type::Int64,
            Value::Float64(_) => Type::Float64,
            Value::String(_) => Type::String,
            Value::DateTime(_) => Type::DateTime,
            Value::TimeSpan(_) => Type::TimeSpan,
            Value::Guid(_) => Type::Guid,
            Value::Decimal(_) => Type::Decimal,
            Value::BigInt(_) => Type::BigInt,
            Value::Complex(_) => Type::Complex,
            Value::Type(_) => Type::Type,
            Value::Object(o) => Type::Class(o.class().clone()),
            Value::Sequence(s) => s.ty(),
            Value::Deferred(d) => Type::enumerable(d.element().clone()),
            Value::Resource(r) => Type::queryable(r.element.clone()),
            Value::Function(f) => f.ty().clone(),
            Value::Expression(e) => Type::expression(e.ty()),
        }
    }

    /// Address of the shared allocation behind reference-like values
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::Object(o) => Some(Arc::as_ptr(o) as usize),
            Value::Sequence(s) => Some(Arc::as_ptr(s.items()) as usize),
            Value::Expression(e) => Some(Arc::as_ptr(e) as usize),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> EvalResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(EvalError::TypeMismatch {
                expected: Type::Bool,
                actual: other.runtime_type(),
                context: "boolean test".to_string(),
            }),
        }
    }

    pub fn as_i32(&self) -> EvalResult<i32> {
        match self {
            Value::Int32(n) => Ok(*n),
            other => Err(EvalError::TypeMismatch {
                expected: Type::Int32,
                actual: other.runtime_type(),
                context: "integer argument".to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> EvalResult<&str> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(EvalError::TypeMismatch {
                expected: Type::String,
                actual: other.runtime_type(),
                context: "string argument".to_string(),
            }),
        }
    }

    /// Enumerate a sequence-like value
    pub fn to_items(&self) -> EvalResult<Arc<Vec<Value>>> {
        match self {
            Value::Sequence(s) => Ok(s.items().clone()),
            Value::Deferred(d) => Ok(Arc::new(d.materialize()?)),
            Value::Resource(r) => Err(EvalError::RemoteResource {
                name: r.name.clone(),
            }),
            Value::Null => Err(EvalError::UnexpectedNull {
                context: "sequence enumeration".to_string(),
            }),
            other => Err(EvalError::EvaluationError {
                message: format!("value of type {} is not a sequence", other.runtime_type()),
            }),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Float64(a), Value::Float64(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::TimeSpan(a), Value::TimeSpan(b)) => a == b,
            (Value::Guid(a), Value::Guid(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::Complex(a), Value::Complex(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b) || a == b,
            (Value::Sequence(a), Value::Sequence(b)) => {
                a.kind() == b.kind() && a.element() == b.element() && a.items() == b.items()
            }
            (Value::Resource(a), Value::Resource(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(&a.body, &b.body),
            (Value::Expression(a), Value::Expression(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Char(c) => write!(f, "'{}'", c),
            Value::Int32(n) => write!(f, "{}", n),
            Value::Int64(n) => write!(f, "{}L", n),
            Value::Float64(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::DateTime(d) => write!(f, "{}", d),
            Value::TimeSpan(t) => write!(f, "{}", t),
            Value::Guid(g) => write!(f, "{}", g),
            Value::Decimal(d) => write!(f, "{}m", d),
            Value::BigInt(n) => write!(f, "{}n", n),
            Value::Complex(c) => write!(f, "({})", c),
            Value::Type(t) => write!(f, "typeof({})", t),
            Value::Object(o) => {
                write!(f, "{} {{", o.class().name())?;
                for (i, (name, value)) in o.fields().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {}: {}", name, value)?;
                }
                write!(f, " }}")
            }
            Value::Sequence(s) => write!(f, "{}[{} items]", s.ty(), s.len()),
            Value::Deferred(d) => write!(f, "{:?}", d),
            Value::Resource(r) => write!(f, "resource({})", r.name),
            Value::Function(func) => write!(f, "{:?}", func),
            Value::Expression(e) => write!(f, "expression({})", e.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::types::FieldInfo;

    fn point() -> Arc<ClassInfo> {
        ClassInfo::new(
            "demo.Point",
            vec![
                FieldInfo::new("x", Type::Int32),
                FieldInfo::new("y", Type::Int32),
                FieldInfo::new("label", Type::String),
            ],
        )
    }

    #[test]
    fn test_object_defaults_and_fields() {
        let mut p = Object::new(point());
        assert_eq!(p.get("x"), Some(&Value::Int32(0)));
        assert_eq!(p.get("label"), Some(&Value::Null));
        p.set("y", Value::Int32(7)).unwrap();
        assert_eq!(p.get("y"), Some(&Value::Int32(7)));
        assert!(matches!(
            p.set("z", Value::Int32(1)),
            Err(EvalError::UnknownMember { .. })
        ));

        let names: Vec<&str> = p.fields().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["x", "y", "label"]);
    }

    #[test]
    fn test_structural_equality() {
        let a = Object::with_fields(point(), [("x", Value::Int32(1))]).unwrap();
        let b = Object::with_fields(point(), [("x", Value::Int32(1))]).unwrap();
        assert_eq!(Value::object(a), Value::object(b));
        assert_ne!(Value::Int32(1), Value::Int64(1));
    }

    #[test]
    fn test_runtime_types() {
        assert_eq!(Value::Null.runtime_type(), Type::Object);
        let seq = Sequence::array(Type::Int32, vec![Value::Int32(1)]);
        assert_eq!(Value::Sequence(seq).runtime_type(), Type::array(Type::Int32));
        let res = ResourceDescriptor::of(Type::String);
        assert_eq!(res.name, "string");
        assert_eq!(
            Value::Resource(res).runtime_type(),
            Type::queryable(Type::String)
        );
    }

    #[test]
    fn test_deferred_enumerates_on_demand() {
        let deferred = Deferred::new(Type::Int32, || Ok(vec![Value::Int32(1), Value::Int32(2)]));
        let items = Value::Deferred(deferred).to_items().unwrap();
        assert_eq!(items.len(), 2);
        assert!(matches!(
            Value::Resource(ResourceDescriptor::of(Type::Int32)).to_items(),
            Err(EvalError::RemoteResource { .. })
        ));
    }
}
