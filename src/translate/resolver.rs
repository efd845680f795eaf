use crate::portable::{ConstructorRef, MemberRef, MethodRef, TypeRef};
use crate::runtime::{type_key, Constructor, Member, Method, Type, TypeRegistry};
use crate::translate::{Result, TranslationError};
use std::collections::HashMap;
use std::sync::Arc;

/// Maps structural references back to live types and members.
///
/// Only [`TypeResolver::registry`] is required. Member lookups go through
/// [`TypeResolver::resolve_type`], so overriding type resolution is enough to
/// redirect a whole tree to different types.
pub trait TypeResolver: Send + Sync {
    fn registry(&self) -> &TypeRegistry;

    fn resolve_type(&self, reference: &TypeRef) -> Result<Type> {
        resolve_structural(self, reference)
    }

    /// Methods are looked up under the resolved declaring type. Holders that
    /// are not types themselves, like `Queryable`, are looked up by name.
    fn resolve_method(&self, reference: &MethodRef) -> Result<Method> {
        let declaring_type = match self.resolve_type(&reference.declaring_type) {
            Ok(ty) => type_key(&ty),
            Err(_) => reference.declaring_type.name.clone(),
        };
        let generic_args = self.resolve_all(&reference.generic_args)?;
        let parameters = self.resolve_all(&reference.parameters)?;
        self.registry()
            .find_method(
                &declaring_type,
                &reference.name,
                &generic_args,
                Some(&parameters),
            )
            .map_err(|_| unresolved(format!(
                "method {}.{}",
                reference.declaring_type, reference.name
            )))
    }

    fn resolve_constructor(&self, reference: &ConstructorRef) -> Result<Constructor> {
        let ty = self.resolve_type(&reference.declaring_type)?;
        let constructor = match &ty {
            Type::Class(class) => {
                let names: Vec<&str> = reference.parameters.iter().map(|p| p.name.as_str()).collect();
                Constructor::with_fields(class, &names)
            }
            _ => Constructor::default_for(ty.clone()),
        }
        .map_err(|_| unresolved(format!("constructor of {}", reference.declaring_type)))?;

        for (param, expected) in constructor.parameters().iter().zip(&reference.parameters) {
            if param.ty != self.resolve_type(&expected.ty)? {
                return Err(unresolved(format!(
                    "constructor of {} with parameter {}: {}",
                    reference.declaring_type, expected.name, expected.ty
                )));
            }
        }
        Ok(constructor)
    }

    fn resolve_member(&self, reference: &MemberRef) -> Result<Member> {
        let ty = self.resolve_type(&reference.declaring_type)?;
        self.registry()
            .member(&ty, &reference.name)
            .map_err(|_| unresolved(format!("member {}.{}", reference.declaring_type, reference.name)))
    }

    fn resolve_all(&self, references: &[TypeRef]) -> Result<Vec<Type>> {
        references.iter().map(|r| self.resolve_type(r)).collect()
    }
}

fn unresolved(reference: String) -> TranslationError {
    TranslationError::TypeResolution { reference }
}

/// Resolve a reference by its shape: arrays and the generic sequence,
/// expression and function types are rebuilt from their arguments, anything
/// else is looked up by name.
pub fn resolve_structural<R>(resolver: &R, reference: &TypeRef) -> Result<Type>
where
    R: TypeResolver + ?Sized,
{
    let args = resolver.resolve_all(&reference.generic_args)?;
    let ty = if reference.array_rank.is_some() {
        match <[Type; 1]>::try_from(args) {
            Ok([element]) => Type::array(element),
            Err(_) => return Err(unresolved(format!("type {}", reference))),
        }
    } else {
        match (reference.name.as_str(), args.len()) {
            ("List", 1) => Type::list(single(args)),
            ("Enumerable", 1) => Type::enumerable(single(args)),
            ("Queryable", 1) => Type::queryable(single(args)),
            ("Expression", 1) => Type::expression(single(args)),
            ("Func", n) if n > 0 => {
                let mut params = args;
                let ret = params.pop().unwrap_or(Type::Void);
                Type::function(params, ret)
            }
            (name, 0) => resolver
                .registry()
                .simple_type(name)
                .ok_or_else(|| unresolved(format!("type {}", reference)))?,
            _ => return Err(unresolved(format!("type {}", reference))),
        }
    };
    Ok(if reference.is_nullable {
        Type::nullable(ty)
    } else {
        ty
    })
}

fn single(mut args: Vec<Type>) -> Type {
    args.pop().unwrap_or(Type::Object)
}

/// Resolves against a registry as-is
#[derive(Debug, Clone)]
pub struct RegistryResolver {
    registry: Arc<TypeRegistry>,
}

impl RegistryResolver {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self { registry }
    }
}

impl TypeResolver for RegistryResolver {
    fn registry(&self) -> &TypeRegistry {
        &self.registry
    }
}

/// Resolves some type names to other registered types.
///
/// Used to run a tree written against one set of classes over another set
/// with the same shape.
#[derive(Debug, Clone)]
pub struct SubstitutingResolver {
    registry: Arc<TypeRegistry>,
    substitutions: HashMap<String, String>,
}

impl SubstitutingResolver {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            substitutions: HashMap::new(),
        }
    }

    pub fn substitute(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.substitutions.insert(from.into(), to.into());
        self
    }
}

impl TypeResolver for SubstitutingResolver {
    fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    fn resolve_type(&self, reference: &TypeRef) -> Result<Type> {
        match self.substitutions.get(&reference.name) {
            Some(target) => {
                let substituted = TypeRef {
                    name: target.clone(),
                    ..reference.clone()
                };
                resolve_structural(self, &substituted)
            }
            None => resolve_structural(self, reference),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ClassInfo, FieldInfo, MethodDef, Value};

    fn greeting(declaring_type: &str, text: &'static str) -> MethodDef {
        MethodDef {
            declaring_type: declaring_type.to_string(),
            name: "greet".to_string(),
            generic_arity: 0,
            is_static: false,
            signature: Arc::new(|_: &[Type]| (Vec::new(), Type::String)),
            body: Arc::new(move |_: &Method, _: Option<&Value>, _: &[Value]| Ok(Value::string(text))),
        }
    }

    fn registry() -> Arc<TypeRegistry> {
        let mut registry = TypeRegistry::with_builtins();
        registry.register_method(greeting("demo.Person", "hello"));
        registry.register_method(greeting("demo.PersonView", "hi"));
        registry.register_class(ClassInfo::new(
            "demo.Person",
            vec![
                FieldInfo::new("name", Type::String),
                FieldInfo::new("age", Type::Int32),
            ],
        ));
        registry.register_class(ClassInfo::new(
            "demo.PersonView",
            vec![
                FieldInfo::new("name", Type::String),
                FieldInfo::new("age", Type::Int32),
            ],
        ));
        Arc::new(registry)
    }

    #[test]
    fn test_resolve_type_shapes() {
        let registry = registry();
        let resolver = RegistryResolver::new(registry.clone());
        let person = Type::Class(registry.class("demo.Person").unwrap().clone());
        for ty in [
            Type::Int32,
            Type::nullable(Type::Int64),
            Type::array(Type::String),
            Type::queryable(person.clone()),
            Type::expression(Type::function(vec![person.clone()], Type::Bool)),
            Type::list(Type::nullable(Type::Guid)),
        ] {
            assert_eq!(resolver.resolve_type(&TypeRef::of(&ty)).unwrap(), ty);
        }
    }

    #[test]
    fn test_unknown_type_fails() {
        let resolver = RegistryResolver::new(registry());
        let err = resolver
            .resolve_type(&TypeRef::named("demo.Missing"))
            .unwrap_err();
        assert!(matches!(err, TranslationError::TypeResolution { .. }));
        assert_eq!(err.to_string(), "Cannot resolve type demo.Missing");
    }

    #[test]
    fn test_resolve_method_picks_instantiation() {
        let registry = registry();
        let resolver = RegistryResolver::new(registry.clone());
        let take = registry.method("Queryable", "take", &[Type::Int32]).unwrap();
        let resolved = resolver.resolve_method(&MethodRef::of(&take)).unwrap();
        assert_eq!(resolved, take);
    }

    #[test]
    fn test_resolve_member_and_constructor() {
        let registry = registry();
        let resolver = RegistryResolver::new(registry.clone());
        let person = registry.class("demo.Person").unwrap().clone();

        let age = Member::field(&person, "age").unwrap();
        assert_eq!(resolver.resolve_member(&MemberRef::of(&age)).unwrap(), age);

        let length = registry.member(&Type::String, "length").unwrap();
        assert_eq!(resolver.resolve_member(&MemberRef::of(&length)).unwrap(), length);

        let ctor = Constructor::with_fields(&person, &["name", "age"]).unwrap();
        assert_eq!(resolver.resolve_constructor(&ConstructorRef::of(&ctor)).unwrap(), ctor);
    }

    #[test]
    fn test_substitution_redirects_members() {
        let registry = registry();
        let resolver =
            SubstitutingResolver::new(registry.clone()).substitute("demo.Person", "demo.PersonView");
        let person = registry.class("demo.Person").unwrap().clone();

        let ty = resolver
            .resolve_type(&TypeRef::of(&Type::queryable(Type::Class(person.clone()))))
            .unwrap();
        assert_eq!(ty.element_type().unwrap().to_string(), "demo.PersonView");

        let member = resolver
            .resolve_member(&MemberRef::of(&Member::field(&person, "name").unwrap()))
            .unwrap();
        assert_eq!(member.declaring_type().to_string(), "demo.PersonView");
    }

    #[test]
    fn test_substitution_redirects_methods() {
        let registry = registry();
        let greet = registry.method("demo.Person", "greet", &[]).unwrap();

        let plain = RegistryResolver::new(registry.clone());
        assert_eq!(plain.resolve_method(&MethodRef::of(&greet)).unwrap().declaring_type(), "demo.Person");

        let resolver =
            SubstitutingResolver::new(registry.clone()).substitute("demo.Person", "demo.PersonView");
        let redirected = resolver.resolve_method(&MethodRef::of(&greet)).unwrap();
        assert_eq!(redirected.declaring_type(), "demo.PersonView");

        let target = Value::string("someone");
        assert_eq!(redirected.invoke(Some(&target), &[]).unwrap(), Value::string("hi"));
    }
}
