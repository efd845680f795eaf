//! Registry of classes, methods, properties and constructors.
//!
//! Methods, members and constructors are live handles: they carry the code
//! that runs them. Portable references name them by declaring type key and
//! member name, and both processes are expected to register the same names.

use crate::expression::{EvalError, EvalResult};
use crate::runtime::types::{ClassInfo, FieldInfo, Type};
use crate::runtime::value::{Object, Sequence, SequenceKind, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Computes `(parameters, return type)` from generic arguments
pub type SignatureFn = Arc<dyn Fn(&[Type]) -> (Vec<Type>, Type) + Send + Sync>;

/// Native body of a method: receives the instantiated handle, the target and the arguments
pub type MethodBody = Arc<dyn Fn(&Method, Option<&Value>, &[Value]) -> EvalResult<Value> + Send + Sync>;

/// Reads a property off a target value
pub type Getter = Arc<dyn Fn(&Value) -> EvalResult<Value> + Send + Sync>;

/// Key under which members of `ty` are registered
pub fn type_key(ty: &Type) -> String {
    match ty {
        Type::Nullable(inner) => type_key(inner),
        Type::Array(_) => "[]".to_string(),
        Type::List(_) => "List".to_string(),
        Type::Enumerable(_) => "Enumerable".to_string(),
        Type::Queryable(_) => "Queryable".to_string(),
        Type::Expression(_) => "Expression".to_string(),
        Type::Function { .. } => "Func".to_string(),
        other => other.to_string(),
    }
}

/// A method definition, possibly generic
pub struct MethodDef {
    pub declaring_type: String,
    pub name: String,
    pub generic_arity: usize,
    pub is_static: bool,
    pub signature: SignatureFn,
    pub body: MethodBody,
}

/// A method instantiated with concrete generic arguments
#[derive(Clone)]
pub struct Method {
    def: Arc<MethodDef>,
    generic_args: Vec<Type>,
}

impl Method {
    pub fn new(def: Arc<MethodDef>, generic_args: Vec<Type>) -> EvalResult<Self> {
        if def.generic_arity != generic_args.len() {
            return Err(EvalError::ArgumentCount {
                function: format!("{}.{} generic arguments", def.declaring_type, def.name),
                expected: def.generic_arity,
                actual: generic_args.len(),
            });
        }
        Ok(Self { def, generic_args })
    }

    pub fn declaring_type(&self) -> &str {
        &self.def.declaring_type
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn is_static(&self) -> bool {
        self.def.is_static
    }

    pub fn generic_args(&self) -> &[Type] {
        &self.generic_args
    }

    /// Parameter types, not counting the instance target
    pub fn parameters(&self) -> Vec<Type> {
        (self.def.signature)(&self.generic_args).0
    }

    pub fn return_type(&self) -> Type {
        (self.def.signature)(&self.generic_args).1
    }

    pub fn invoke(&self, target: Option<&Value>, args: &[Value]) -> EvalResult<Value> {
        let expected = self.parameters().len();
        if args.len() != expected {
            return Err(EvalError::ArgumentCount {
                function: format!("{}.{}", self.declaring_type(), self.name()),
                expected,
                actual: args.len(),
            });
        }
        if !self.is_static() && target.map(Value::is_null).unwrap_or(true) {
            return Err(EvalError::UnexpectedNull {
                context: format!("call to {}", self.name()),
            });
        }
        (self.def.body)(self, target, args)
    }
}

impl PartialEq for Method {
    fn eq(&self, other: &Self) -> bool {
        self.def.declaring_type == other.def.declaring_type
            && self.def.name == other.def.name
            && self.generic_args == other.generic_args
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.def.declaring_type, self.def.name)?;
        if !self.generic_args.is_empty() {
            let args: Vec<String> = self.generic_args.iter().map(|t| t.to_string()).collect();
            write!(f, "<{}>", args.join(", "))?;
        }
        Ok(())
    }
}

/// A read-only computed property
#[derive(Clone)]
pub struct PropertyDef {
    pub ty: Type,
    pub getter: Getter,
}

#[derive(Clone)]
pub enum MemberKind {
    Field,
    Property(PropertyDef),
}

/// A field or property of a type
#[derive(Clone)]
pub struct Member {
    declaring_type: Type,
    name: String,
    ty: Type,
    kind: MemberKind,
}

impl Member {
    pub fn field(class: &Arc<ClassInfo>, name: &str) -> EvalResult<Self> {
        let (_, field) = class.field(name).ok_or_else(|| EvalError::UnknownMember {
            type_name: class.name().to_string(),
            member: name.to_string(),
        })?;
        Ok(Self {
            declaring_type: Type::Class(class.clone()),
            name: field.name.clone(),
            ty: field.ty.clone(),
            kind: MemberKind::Field,
        })
    }

    pub fn declaring_type(&self) -> &Type {
        &self.declaring_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn is_field(&self) -> bool {
        matches!(self.kind, MemberKind::Field)
    }

    pub fn get(&self, target: &Value) -> EvalResult<Value> {
        match (&self.kind, target) {
            (_, Value::Null) => Err(EvalError::UnexpectedNull {
                context: format!("access to member {}", self.name),
            }),
            (MemberKind::Field, Value::Object(object)) => {
                object
                    .get(&self.name)
                    .cloned()
                    .ok_or_else(|| EvalError::UnknownMember {
                        type_name: object.class().name().to_string(),
                        member: self.name.clone(),
                    })
            }
            (MemberKind::Field, other) => Err(EvalError::TypeMismatch {
                expected: self.declaring_type.clone(),
                actual: other.runtime_type(),
                context: format!("access to field {}", self.name),
            }),
            (MemberKind::Property(property), target) => (property.getter)(target),
        }
    }

    /// Store into a field, producing the updated object
    pub fn set(&self, target: &Object, value: Value) -> EvalResult<Object> {
        match self.kind {
            MemberKind::Field => {
                let mut updated = target.clone();
                updated.set(&self.name, value)?;
                Ok(updated)
            }
            MemberKind::Property(_) => Err(EvalError::EvaluationError {
                message: format!("property {} is read-only", self.name),
            }),
        }
    }
}

impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        self.declaring_type == other.declaring_type && self.name == other.name
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.declaring_type, self.name)
    }
}

/// A constructor: instantiates a type from arguments bound to named fields
#[derive(Debug, Clone, PartialEq)]
pub struct Constructor {
    ty: Type,
    parameters: Vec<FieldInfo>,
}

impl Constructor {
    /// Parameterless constructor of a class or list type
    pub fn default_for(ty: Type) -> EvalResult<Self> {
        match ty {
            Type::Class(_) | Type::List(_) => Ok(Self {
                ty,
                parameters: Vec::new(),
            }),
            other => Err(EvalError::UnknownMember {
                type_name: other.to_string(),
                member: "constructor".to_string(),
            }),
        }
    }

    /// Constructor assigning its arguments to the named fields, in order
    pub fn with_fields(class: &Arc<ClassInfo>, names: &[&str]) -> EvalResult<Self> {
        let parameters = names
            .iter()
            .map(|name| {
                class
                    .field(name)
                    .map(|(_, f)| f.clone())
                    .ok_or_else(|| EvalError::UnknownMember {
                        type_name: class.name().to_string(),
                        member: name.to_string(),
                    })
            })
            .collect::<EvalResult<Vec<_>>>()?;
        Ok(Self {
            ty: Type::Class(class.clone()),
            parameters,
        })
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn parameters(&self) -> &[FieldInfo] {
        &self.parameters
    }

    pub fn invoke(&self, args: &[Value]) -> EvalResult<Value> {
        if args.len() != self.parameters.len() {
            return Err(EvalError::ArgumentCount {
                function: format!("{} constructor", self.ty),
                expected: self.parameters.len(),
                actual: args.len(),
            });
        }
        match &self.ty {
            Type::Class(class) => {
                let object = Object::with_fields(
                    class.clone(),
                    self.parameters
                        .iter()
                        .map(|p| p.name.as_str())
                        .zip(args.iter().cloned()),
                )?;
                Ok(Value::object(object))
            }
            Type::List(element) => Ok(Value::Sequence(Sequence::new(
                SequenceKind::List,
                (**element).clone(),
                Vec::new(),
            ))),
            other => Err(EvalError::UnknownMember {
                type_name: other.to_string(),
                member: "constructor".to_string(),
            }),
        }
    }
}

/// Registry of classes and their callable members
#[derive(Default)]
pub struct TypeRegistry {
    classes: HashMap<String, Arc<ClassInfo>>,
    methods: HashMap<(String, String), Vec<Arc<MethodDef>>>,
    properties: HashMap<(String, String), PropertyDef>,
}

impl TypeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the builtin operators, string methods and exception classes
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::runtime::builtins::install(&mut registry);
        registry
    }

    pub fn register_class(&mut self, class: Arc<ClassInfo>) -> Arc<ClassInfo> {
        self.classes
            .insert(class.name().to_string(), class.clone());
        class
    }

    pub fn register_method(&mut self, def: MethodDef) {
        self.methods
            .entry((def.declaring_type.clone(), def.name.clone()))
            .or_default()
            .push(Arc::new(def));
    }

    pub fn register_property(&mut self, declaring_type: &str, name: &str, property: PropertyDef) {
        self.properties
            .insert((declaring_type.to_string(), name.to_string()), property);
    }

    pub fn class(&self, name: &str) -> Option<&Arc<ClassInfo>> {
        self.classes.get(name)
    }

    /// Resolve a type that carries no generic arguments by its key
    pub fn simple_type(&self, name: &str) -> Option<Type> {
        let ty = match name {
            "void" => Type::Void,
            "object" => Type::Object,
            "bool" => Type::Bool,
            "char" => Type::Char,
            "i32" => Type::Int32,
            "i64" => Type::Int64,
            "f64" => Type::Float64,
            "string" => Type::String,
            "datetime" => Type::DateTime,
            "timespan" => Type::TimeSpan,
            "guid" => Type::Guid,
            "decimal" => Type::Decimal,
            "bigint" => Type::BigInt,
            "complex" => Type::Complex,
            "type" => Type::Type,
            other => return self.class(other).cloned().map(Type::Class),
        };
        Some(ty)
    }

    /// Find a method by declaring type, name and generic arguments.
    ///
    /// When `parameters` is given it must match the instantiated signature,
    /// which picks between overloads.
    pub fn find_method(
        &self,
        declaring_type: &str,
        name: &str,
        generic_args: &[Type],
        parameters: Option<&[Type]>,
    ) -> EvalResult<Method> {
        let candidates = self
            .methods
            .get(&(declaring_type.to_string(), name.to_string()))
            .map(|defs| defs.as_slice())
            .unwrap_or(&[]);
        for def in candidates {
            if def.generic_arity != generic_args.len() {
                continue;
            }
            let method = Method::new(def.clone(), generic_args.to_vec())?;
            match parameters {
                Some(expected) if method.parameters() != expected => continue,
                _ => return Ok(method),
            }
        }
        Err(EvalError::UnknownMember {
            type_name: declaring_type.to_string(),
            member: name.to_string(),
        })
    }

    /// Shorthand for a method with no overload disambiguation
    pub fn method(&self, declaring_type: &str, name: &str, generic_args: &[Type]) -> EvalResult<Method> {
        self.find_method(declaring_type, name, generic_args, None)
    }

    /// Find a field or property of a type
    pub fn member(&self, ty: &Type, name: &str) -> EvalResult<Member> {
        if let Type::Class(class) = ty {
            if class.field(name).is_some() {
                return Member::field(class, name);
            }
        }
        let key = type_key(ty);
        match self.properties.get(&(key.clone(), name.to_string())) {
            Some(property) => Ok(Member {
                declaring_type: ty.clone(),
                name: name.to_string(),
                ty: property.ty.clone(),
                kind: MemberKind::Property(property.clone()),
            }),
            None => Err(EvalError::UnknownMember {
                type_name: key,
                member: name.to_string(),
            }),
        }
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("classes", &self.classes.len())
            .field("methods", &self.methods.len())
            .field("properties", &self.properties.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer() -> Arc<ClassInfo> {
        ClassInfo::new(
            "demo.Customer",
            vec![
                FieldInfo::new("name", Type::String),
                FieldInfo::new("city", Type::String),
            ],
        )
    }

    #[test]
    fn test_type_keys() {
        assert_eq!(type_key(&Type::queryable(Type::Int32)), "Queryable");
        assert_eq!(type_key(&Type::nullable(Type::Int32)), "i32");
        assert_eq!(type_key(&Type::Class(customer())), "demo.Customer");
    }

    #[test]
    fn test_simple_type_lookup() {
        let mut registry = TypeRegistry::new();
        registry.register_class(customer());
        assert_eq!(registry.simple_type("i64"), Some(Type::Int64));
        assert_eq!(
            registry.simple_type("demo.Customer"),
            Some(Type::Class(customer()))
        );
        assert_eq!(registry.simple_type("demo.Missing"), None);
    }

    #[test]
    fn test_field_member_and_constructor() {
        let registry = TypeRegistry::new();
        let class = customer();
        let ctor = Constructor::with_fields(&class, &["name", "city"]).unwrap();
        let value = ctor
            .invoke(&[Value::string("Ada"), Value::string("Berlin")])
            .unwrap();

        let city = registry.member(&Type::Class(class.clone()), "city").unwrap();
        assert!(city.is_field());
        assert_eq!(city.get(&value).unwrap(), Value::string("Berlin"));
        assert!(registry.member(&Type::Class(class), "zip").is_err());
    }

    #[test]
    fn test_find_method_checks_generic_arity() {
        let registry = TypeRegistry::with_builtins();
        assert!(registry
            .method("Queryable", "where", &[Type::Int32])
            .is_ok());
        assert!(registry.method("Queryable", "where", &[]).is_err());
        let select = registry
            .method("Queryable", "select", &[Type::Int32, Type::String])
            .unwrap();
        assert_eq!(select.return_type(), Type::queryable(Type::String));
    }
}
