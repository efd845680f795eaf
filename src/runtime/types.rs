//! Live type handles of the native runtime.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A field declared on a class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldInfo {
    pub name: String,
    pub ty: Type,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A registered class: a named record type with an optional base class.
///
/// Identity is the qualified name; two `ClassInfo`s with the same name are the
/// same class, which is what lets a class resolved in another process stand in
/// for the original.
pub struct ClassInfo {
    name: String,
    base: Option<Arc<ClassInfo>>,
    fields: Vec<FieldInfo>,
}

impl ClassInfo {
    pub fn new(name: impl Into<String>, fields: Vec<FieldInfo>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            base: None,
            fields,
        })
    }

    /// Create a class deriving from `base`. The base fields come first.
    pub fn derived(
        name: impl Into<String>,
        base: &Arc<ClassInfo>,
        extra_fields: Vec<FieldInfo>,
    ) -> Arc<Self> {
        let mut fields = base.fields.clone();
        fields.extend(extra_fields);
        Arc::new(Self {
            name: name.into(),
            base: Some(base.clone()),
            fields,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> Option<&Arc<ClassInfo>> {
        self.base.as_ref()
    }

    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    /// Look up a field and its position
    pub fn field(&self, name: &str) -> Option<(usize, &FieldInfo)> {
        self.fields.iter().enumerate().find(|(_, f)| f.name == name)
    }

    /// Whether this class is `other` or derives from it
    pub fn derives_from(&self, other: &ClassInfo) -> bool {
        if self.name == other.name {
            return true;
        }
        match &self.base {
            Some(base) => base.derives_from(other),
            None => false,
        }
    }
}

impl PartialEq for ClassInfo {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ClassInfo {}

impl Hash for ClassInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Debug for ClassInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class {}", self.name)
    }
}

/// Type handle
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    /// Top type, assignable from every non-void type
    Object,
    Bool,
    Char,
    Int32,
    Int64,
    Float64,
    String,
    DateTime,
    TimeSpan,
    Guid,
    Decimal,
    BigInt,
    Complex,
    /// The type of type handles
    Type,
    Nullable(Box<Type>),
    Array(Box<Type>),
    List(Box<Type>),
    Enumerable(Box<Type>),
    Queryable(Box<Type>),
    /// A quoted expression tree whose lambda has the given function type
    Expression(Box<Type>),
    Function {
        params: Vec<Type>,
        ret: Box<Type>,
    },
    Class(Arc<ClassInfo>),
}

impl Type {
    pub fn nullable(inner: Type) -> Self {
        match inner {
            Type::Nullable(_) => inner,
            other => Type::Nullable(Box::new(other)),
        }
    }

    pub fn array(element: Type) -> Self {
        Type::Array(Box::new(element))
    }

    pub fn list(element: Type) -> Self {
        Type::List(Box::new(element))
    }

    pub fn enumerable(element: Type) -> Self {
        Type::Enumerable(Box::new(element))
    }

    pub fn queryable(element: Type) -> Self {
        Type::Queryable(Box::new(element))
    }

    pub fn expression(function: Type) -> Self {
        Type::Expression(Box::new(function))
    }

    pub fn function(params: Vec<Type>, ret: Type) -> Self {
        Type::Function {
            params,
            ret: Box::new(ret),
        }
    }

    /// Whether values of this type travel as plain primitives
    pub fn is_primitive(&self) -> bool {
        match self {
            Type::Bool
            | Type::Char
            | Type::Int32
            | Type::Int64
            | Type::Float64
            | Type::String
            | Type::DateTime
            | Type::TimeSpan
            | Type::Guid
            | Type::Decimal
            | Type::BigInt
            | Type::Complex => true,
            Type::Nullable(inner) => inner.is_primitive(),
            _ => false,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self.non_nullable(),
            Type::Int32
                | Type::Int64
                | Type::Float64
                | Type::Decimal
                | Type::BigInt
                | Type::Complex
        )
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, Type::Nullable(_))
    }

    /// Whether `null` is a legal value of this type
    pub fn accepts_null(&self) -> bool {
        !matches!(
            self,
            Type::Void
                | Type::Bool
                | Type::Char
                | Type::Int32
                | Type::Int64
                | Type::Float64
                | Type::DateTime
                | Type::TimeSpan
                | Type::Guid
                | Type::Decimal
                | Type::BigInt
                | Type::Complex
        )
    }

    pub fn non_nullable(&self) -> &Type {
        match self {
            Type::Nullable(inner) => inner,
            other => other,
        }
    }

    /// Element type of sequence-like types
    pub fn element_type(&self) -> Option<&Type> {
        match self {
            Type::Array(e) | Type::List(e) | Type::Enumerable(e) | Type::Queryable(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_sequence(&self) -> bool {
        self.element_type().is_some()
    }

    pub fn class(&self) -> Option<&Arc<ClassInfo>> {
        match self {
            Type::Class(class) => Some(class),
            _ => None,
        }
    }

    /// Parameter and return types of a function type, looking through `Expression<F>`
    pub fn signature(&self) -> Option<(&[Type], &Type)> {
        match self {
            Type::Function { params, ret } => Some((params, ret)),
            Type::Expression(inner) => inner.signature(),
            _ => None,
        }
    }

    /// Whether a value of type `other` can be stored where `self` is expected
    pub fn is_assignable_from(&self, other: &Type) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (_, Type::Void) | (Type::Void, _) => false,
            (Type::Object, _) => true,
            (Type::Nullable(inner), other) => inner.is_assignable_from(other.non_nullable()),
            (Type::Class(target), Type::Class(source)) => source.derives_from(target),
            (Type::Enumerable(target), other) => other
                .element_type()
                .map(|source| target.is_assignable_from(source))
                .unwrap_or(false),
            (Type::Queryable(target), Type::Queryable(source)) => target.is_assignable_from(source),
            (Type::Array(target), Type::Array(source)) => {
                !source.is_primitive() && target.is_assignable_from(source)
            }
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Object => write!(f, "object"),
            Type::Bool => write!(f, "bool"),
            Type::Char => write!(f, "char"),
            Type::Int32 => write!(f, "i32"),
            Type::Int64 => write!(f, "i64"),
            Type::Float64 => write!(f, "f64"),
            Type::String => write!(f, "string"),
            Type::DateTime => write!(f, "datetime"),
            Type::TimeSpan => write!(f, "timespan"),
            Type::Guid => write!(f, "guid"),
            Type::Decimal => write!(f, "decimal"),
            Type::BigInt => write!(f, "bigint"),
            Type::Complex => write!(f, "complex"),
            Type::Type => write!(f, "type"),
            Type::Nullable(inner) => write!(f, "{}?", inner),
            Type::Array(e) => write!(f, "{}[]", e),
            Type::List(e) => write!(f, "List<{}>", e),
            Type::Enumerable(e) => write!(f, "Enumerable<{}>", e),
            Type::Queryable(e) => write!(f, "Queryable<{}>", e),
            Type::Expression(func) => write!(f, "Expression<{}>", func),
            Type::Function { params, ret } => {
                write!(f, "Func<")?;
                for p in params {
                    write!(f, "{}, ", p)?;
                }
                write!(f, "{}>", ret)
            }
            Type::Class(class) => write!(f, "{}", class.name()),
        }
    }
}
