//! Structural references to types, methods, constructors and members.

use crate::runtime::{type_key, Constructor, Member, Method, Type};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Structural descriptor of a type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeRef {
    /// Registry key: a primitive name, a class name, or a generic type name
    pub name: String,
    pub generic_args: Vec<TypeRef>,
    pub array_rank: Option<u32>,
    pub is_nullable: bool,
}

impl TypeRef {
    /// A non-generic reference by name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            generic_args: Vec::new(),
            array_rank: None,
            is_nullable: false,
        }
    }

    fn generic(name: &str, generic_args: Vec<TypeRef>) -> Self {
        Self {
            generic_args,
            ..Self::named(name)
        }
    }

    /// Describe a live type
    pub fn of(ty: &Type) -> Self {
        match ty {
            Type::Nullable(inner) => Self {
                is_nullable: true,
                ..Self::of(inner)
            },
            Type::Array(element) => Self {
                array_rank: Some(1),
                ..Self::generic("[]", vec![Self::of(element)])
            },
            Type::List(e) | Type::Enumerable(e) | Type::Queryable(e) | Type::Expression(e) => {
                Self::generic(&type_key(ty), vec![Self::of(e)])
            }
            Type::Function { params, ret } => {
                let mut args: Vec<TypeRef> = params.iter().map(Self::of).collect();
                args.push(Self::of(ret));
                Self::generic("Func", args)
            }
            other => Self::named(type_key(other)),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.array_rank.is_some() {
            match self.generic_args.first() {
                Some(element) => write!(f, "{}[]", element)?,
                None => write!(f, "[]")?,
            }
        } else {
            write!(f, "{}", self.name)?;
            if !self.generic_args.is_empty() {
                let args: Vec<String> = self.generic_args.iter().map(|a| a.to_string()).collect();
                write!(f, "<{}>", args.join(", "))?;
            }
        }
        if self.is_nullable {
            write!(f, "?")?;
        }
        Ok(())
    }
}

/// Reference to a method, instantiated with generic arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodRef {
    pub declaring_type: TypeRef,
    pub name: String,
    pub generic_args: Vec<TypeRef>,
    /// Instantiated parameter types, used to pick between overloads
    pub parameters: Vec<TypeRef>,
}

impl MethodRef {
    pub fn of(method: &Method) -> Self {
        Self {
            declaring_type: TypeRef::named(method.declaring_type()),
            name: method.name().to_string(),
            generic_args: method.generic_args().iter().map(TypeRef::of).collect(),
            parameters: method.parameters().iter().map(TypeRef::of).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterRef {
    pub name: String,
    pub ty: TypeRef,
}

/// Reference to a constructor by declaring type and named parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstructorRef {
    pub declaring_type: TypeRef,
    pub parameters: Vec<ParameterRef>,
}

impl ConstructorRef {
    pub fn of(constructor: &Constructor) -> Self {
        Self {
            declaring_type: TypeRef::of(constructor.ty()),
            parameters: constructor
                .parameters()
                .iter()
                .map(|p| ParameterRef {
                    name: p.name.clone(),
                    ty: TypeRef::of(&p.ty),
                })
                .collect(),
        }
    }
}

/// Reference to a field or property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRef {
    pub declaring_type: TypeRef,
    pub name: String,
}

impl MemberRef {
    pub fn of(member: &Member) -> Self {
        Self {
            declaring_type: TypeRef::of(member.declaring_type()),
            name: member.name().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ClassInfo, FieldInfo, TypeRegistry};

    #[test]
    fn test_type_ref_shapes() {
        let r = TypeRef::of(&Type::array(Type::nullable(Type::Int64)));
        assert_eq!(r.name, "[]");
        assert_eq!(r.array_rank, Some(1));
        assert!(r.generic_args[0].is_nullable);
        assert_eq!(r.to_string(), "i64?[]");

        let f = TypeRef::of(&Type::expression(Type::function(vec![Type::String], Type::Bool)));
        assert_eq!(f.to_string(), "Expression<Func<string, bool>>");

        let class = ClassInfo::new("demo.Person", vec![FieldInfo::new("age", Type::Int32)]);
        assert_eq!(TypeRef::of(&Type::Class(class)), TypeRef::named("demo.Person"));
    }

    #[test]
    fn test_method_ref_records_instantiation() {
        let registry = TypeRegistry::with_builtins();
        let select = registry
            .method("Queryable", "select", &[Type::Int32, Type::String])
            .unwrap();
        let r = MethodRef::of(&select);
        assert_eq!(r.declaring_type.name, "Queryable");
        assert_eq!(r.generic_args.len(), 2);
        assert_eq!(r.parameters[0], TypeRef::of(&Type::queryable(Type::Int32)));
    }

    #[test]
    fn test_type_ref_serde_shape() {
        let json = serde_json::to_value(TypeRef::of(&Type::nullable(Type::Int32))).unwrap();
        assert_eq!(json["name"], "i32");
        assert_eq!(json["is_nullable"], true);
        assert!(json["array_rank"].is_null());
    }
}
