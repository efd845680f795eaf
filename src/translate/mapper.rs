use crate::portable::{DynValue, PortableExpr, Primitive, PropertyBag, ResourceRef, TypeRef};
use crate::runtime::{Object, ResourceDescriptor, Sequence, SequenceKind, Type, Value};
use crate::translate::resolver::TypeResolver;
use crate::translate::{Result, TranslationError};
use chrono::{NaiveDateTime, TimeDelta};
use num_bigint::BigInt;
use num_complex::Complex64;
use rust_decimal::Decimal;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Converts live values to loosely typed [`DynValue`]s and back.
///
/// Primitives travel as-is, objects are decomposed into property bags tagged
/// with their runtime type, sequences become lists.
#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicObjectMapper;

impl DynamicObjectMapper {
    pub fn new() -> Self {
        Self
    }

    /// The allowlisted primitive form of a value, if it has one
    pub fn primitive(&self, value: &Value) -> Option<Primitive> {
        let primitive = match value {
            Value::Bool(b) => Primitive::Bool(*b),
            Value::Char(c) => Primitive::Char(*c),
            Value::Int32(n) => Primitive::Int32(*n),
            Value::Int64(n) => Primitive::Int64(*n),
            Value::Float64(x) => Primitive::Float64(*x),
            Value::String(s) => Primitive::String(s.clone()),
            Value::DateTime(dt) => Primitive::DateTime(*dt),
            Value::TimeSpan(span) => Primitive::TimeSpan {
                seconds: span.num_seconds(),
                nanos: span.subsec_nanos(),
            },
            Value::Guid(id) => Primitive::Guid(*id),
            Value::Decimal(d) => Primitive::Decimal(d.to_string()),
            Value::BigInt(n) => Primitive::BigInt(n.to_string()),
            Value::Complex(c) => Primitive::Complex { re: c.re, im: c.im },
            _ => return None,
        };
        Some(primitive)
    }

    /// Rebuild a primitive, parsing strings sent for a non-string declared type
    pub fn from_primitive(&self, primitive: &Primitive, target: &Type) -> Result<Value> {
        let target = target.non_nullable();
        match (primitive, target) {
            (Primitive::String(s), t) if t.is_primitive() && *t != Type::String => parse_as(s, t),
            (Primitive::Int32(n), Type::Int64) => Ok(Value::Int64(i64::from(*n))),
            (Primitive::Bool(b), _) => Ok(Value::Bool(*b)),
            (Primitive::Char(c), _) => Ok(Value::Char(*c)),
            (Primitive::Int32(n), _) => Ok(Value::Int32(*n)),
            (Primitive::Int64(n), _) => Ok(Value::Int64(*n)),
            (Primitive::Float64(x), _) => Ok(Value::Float64(*x)),
            (Primitive::String(s), _) => Ok(Value::String(s.clone())),
            (Primitive::DateTime(dt), _) => Ok(Value::DateTime(*dt)),
            (Primitive::TimeSpan { seconds, nanos }, _) => TimeDelta::try_seconds(*seconds)
                .map(|span| Value::TimeSpan(span + TimeDelta::nanoseconds(i64::from(*nanos))))
                .ok_or_else(|| unsupported(&Type::TimeSpan, "duration out of range")),
            (Primitive::Guid(id), _) => Ok(Value::Guid(*id)),
            (Primitive::Decimal(s), _) => parse_as(s, &Type::Decimal),
            (Primitive::BigInt(s), _) => parse_as(s, &Type::BigInt),
            (Primitive::Complex { re, im }, _) => Ok(Value::Complex(Complex64::new(*re, *im))),
        }
    }

    /// Decompose an object, mapping each field through `nested`
    pub fn decompose_with(
        &self,
        object: &Object,
        nested: &mut dyn FnMut(&Value, &Type) -> Result<DynValue>,
    ) -> Result<PropertyBag> {
        let properties = object
            .class()
            .fields()
            .iter()
            .zip(object.fields())
            .map(|(field, (name, value))| Ok((name.to_string(), nested(value, &field.ty)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(PropertyBag {
            type_tag: TypeRef::of(&Type::Class(object.class().clone())),
            properties,
        })
    }

    /// Convert a value holding no expression trees
    pub fn to_dyn(&self, value: &Value) -> Result<DynValue> {
        if let Some(primitive) = self.primitive(value) {
            return Ok(DynValue::Primitive(primitive));
        }
        match value {
            Value::Null => Ok(DynValue::Null),
            Value::Type(ty) => Ok(DynValue::Type(TypeRef::of(ty))),
            Value::Resource(resource) => Ok(DynValue::Resource(ResourceRef {
                name: resource.name.clone(),
                element: TypeRef::of(&resource.element),
            })),
            Value::Sequence(_) | Value::Deferred(_) => {
                let items = value.to_items()?;
                Ok(DynValue::List(
                    items.iter().map(|item| self.to_dyn(item)).collect::<Result<_>>()?,
                ))
            }
            Value::Object(object) => {
                let bag = self.decompose_with(object, &mut |v, _| self.to_dyn(v))?;
                Ok(DynValue::Bag(Arc::new(bag)))
            }
            other => Err(unsupported(&other.runtime_type(), "not a data value")),
        }
    }

    /// Rebuild a value of type `target`; nested trees are handed to `nested`
    pub fn from_dyn_with(
        &self,
        value: &DynValue,
        target: &Type,
        resolver: &dyn TypeResolver,
        nested: &mut dyn FnMut(&PortableExpr) -> Result<Value>,
    ) -> Result<Value> {
        match value {
            DynValue::Null => Ok(Value::Null),
            DynValue::Primitive(p) => self.from_primitive(p, target),
            DynValue::Type(reference) => Ok(Value::Type(resolver.resolve_type(reference)?)),
            DynValue::Resource(resource) => Ok(Value::Resource(ResourceDescriptor {
                name: resource.name.clone(),
                element: resolver.resolve_type(&resource.element)?,
            })),
            DynValue::List(items) => {
                let target = target.non_nullable();
                let element = target.element_type().cloned().unwrap_or(Type::Object);
                let kind = match target {
                    Type::List(_) => SequenceKind::List,
                    Type::Enumerable(_) => SequenceKind::Enumerable,
                    Type::Queryable(_) => SequenceKind::Queryable,
                    _ => SequenceKind::Array,
                };
                let items = items
                    .iter()
                    .map(|item| self.from_dyn_with(item, &element, resolver, nested))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Sequence(Sequence::new(kind, element, items)))
            }
            DynValue::Bag(bag) => self.reconstruct_with(bag, target, resolver, nested),
            DynValue::Expression(expr) => nested(expr),
        }
    }

    /// Rebuild an object from a bag.
    ///
    /// When the tagged type is not assignable to `target` but `target` is a
    /// class, the bag's properties are mapped onto `target` by name instead.
    pub fn reconstruct_with(
        &self,
        bag: &PropertyBag,
        target: &Type,
        resolver: &dyn TypeResolver,
        nested: &mut dyn FnMut(&PortableExpr) -> Result<Value>,
    ) -> Result<Value> {
        let tagged = resolver.resolve_type(&bag.type_tag)?;
        let target = target.non_nullable();
        let (class, coerced) = if target.is_assignable_from(&tagged) {
            match tagged.class() {
                Some(class) => (class.clone(), false),
                None => return Err(unsupported(&tagged, "property bags describe class instances")),
            }
        } else {
            match target.class() {
                Some(class) => (class.clone(), true),
                None => {
                    return Err(unsupported(
                        &tagged,
                        &format!("not convertible to {}", target),
                    ))
                }
            }
        };

        let mut object = Object::new(class.clone());
        for (name, dyn_value) in &bag.properties {
            let field_ty = match class.field(name) {
                Some((_, field)) => field.ty.clone(),
                None if coerced => continue,
                None => {
                    return Err(TranslationError::TypeResolution {
                        reference: format!("member {}.{}", class.name(), name),
                    })
                }
            };
            let value = self.from_dyn_with(dyn_value, &field_ty, resolver, nested)?;
            object.set(name, value)?;
        }
        Ok(Value::object(object))
    }

    /// Rebuild a value holding no expression trees
    pub fn from_dyn(&self, value: &DynValue, target: &Type, resolver: &dyn TypeResolver) -> Result<Value> {
        self.from_dyn_with(value, target, resolver, &mut |expr| {
            Err(TranslationError::UnsupportedValue {
                ty: "Expression".to_string(),
                reason: format!("nested {} tree needs a translator", expr.kind_name()),
            })
        })
    }

    /// Render as JSON, for deserializing rows into caller-defined types.
    ///
    /// Bags become objects keyed by property name; type tags are dropped.
    pub fn to_json(&self, value: &DynValue) -> Result<serde_json::Value> {
        let json = match value {
            DynValue::Null => serde_json::Value::Null,
            DynValue::Primitive(p) => match p {
                Primitive::Bool(b) => json!(b),
                Primitive::Char(c) => json!(c.to_string()),
                Primitive::Int32(n) => json!(n),
                Primitive::Int64(n) => json!(n),
                Primitive::Float64(x) => json!(x),
                Primitive::String(s) => json!(s),
                Primitive::DateTime(dt) => json!(dt),
                Primitive::TimeSpan { seconds, nanos } => json!({ "seconds": seconds, "nanos": nanos }),
                Primitive::Guid(id) => json!(id),
                Primitive::Decimal(s) | Primitive::BigInt(s) => json!(s),
                Primitive::Complex { re, im } => json!({ "re": re, "im": im }),
            },
            DynValue::Type(ty) => json!(ty.to_string()),
            DynValue::Resource(resource) => json!(resource.name),
            DynValue::Bag(bag) => {
                let mut map = serde_json::Map::new();
                for (name, property) in &bag.properties {
                    map.insert(name.clone(), self.to_json(property)?);
                }
                serde_json::Value::Object(map)
            }
            DynValue::List(items) => serde_json::Value::Array(
                items.iter().map(|item| self.to_json(item)).collect::<Result<_>>()?,
            ),
            DynValue::Expression(expr) => {
                return Err(TranslationError::UnsupportedValue {
                    ty: "Expression".to_string(),
                    reason: format!("{} tree has no JSON form", expr.kind_name()),
                })
            }
        };
        Ok(json)
    }
}

fn unsupported(ty: &Type, reason: &str) -> TranslationError {
    TranslationError::UnsupportedValue {
        ty: ty.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_as(text: &str, target: &Type) -> Result<Value> {
    let parsed = match target {
        Type::Bool => bool::from_str(text).ok().map(Value::Bool),
        Type::Char => {
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Some(Value::Char(c)),
                _ => None,
            }
        }
        Type::Int32 => i32::from_str(text).ok().map(Value::Int32),
        Type::Int64 => i64::from_str(text).ok().map(Value::Int64),
        Type::Float64 => f64::from_str(text).ok().map(Value::Float64),
        Type::DateTime => NaiveDateTime::from_str(text).ok().map(Value::DateTime),
        Type::Guid => Uuid::parse_str(text).ok().map(Value::Guid),
        Type::Decimal => Decimal::from_str(text).ok().map(Value::Decimal),
        Type::BigInt => BigInt::from_str(text).ok().map(Value::BigInt),
        Type::Complex => Complex64::from_str(text).ok().map(Value::Complex),
        _ => None,
    };
    parsed.ok_or_else(|| unsupported(target, &format!("cannot parse {:?}", text)))
}
