//! Constant payloads of the portable model.

use crate::portable::node::PortableExpr;
use crate::portable::type_ref::TypeRef;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Values that travel without decomposition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Primitive {
    Bool(bool),
    Char(char),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    DateTime(NaiveDateTime),
    TimeSpan { seconds: i64, nanos: i32 },
    Guid(Uuid),
    /// Canonical decimal text
    Decimal(String),
    /// Base-10 digits
    BigInt(String),
    Complex { re: f64, im: f64 },
}

/// Marker for a remote data source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub name: String,
    pub element: TypeRef,
}

/// Loosely typed value: a primitive, a decomposed object, or a nested tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DynValue {
    Null,
    Primitive(Primitive),
    Type(TypeRef),
    Resource(ResourceRef),
    Bag(Arc<PropertyBag>),
    List(Vec<DynValue>),
    Expression(Box<PortableExpr>),
}

/// Payload of a portable constant
pub type ConstantValue = DynValue;

/// A decomposed object: its type tag and its properties in declaration order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyBag {
    pub type_tag: TypeRef,
    pub properties: Vec<(String, DynValue)>,
}

impl PropertyBag {
    pub fn get(&self, name: &str) -> Option<&DynValue> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortableConstant {
    pub declared_type: TypeRef,
    /// Runtime type of the value, when it differs from the declared type
    pub concrete_type: Option<TypeRef>,
    pub value: ConstantValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_bag_lookup() {
        let bag = PropertyBag {
            type_tag: TypeRef::named("demo.Customer"),
            properties: vec![
                ("name".to_string(), DynValue::Primitive(Primitive::String("Ada".into()))),
                ("city".to_string(), DynValue::Null),
            ],
        };
        assert_eq!(bag.get("city"), Some(&DynValue::Null));
        assert!(bag.get("zip").is_none());
    }

    #[test]
    fn test_constant_wire_shape() {
        let constant = PortableConstant {
            declared_type: TypeRef::named("object"),
            concrete_type: Some(TypeRef::named("i32")),
            value: DynValue::Primitive(Primitive::Int32(30)),
        };
        let json = serde_json::to_value(&constant).unwrap();
        assert_eq!(json["declared_type"]["name"], "object");
        assert_eq!(json["concrete_type"]["name"], "i32");
        assert_eq!(json["value"]["Primitive"]["Int32"], 30);

        let bytes = bincode::serialize(&constant).unwrap();
        let back: PortableConstant = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, constant);
    }
}
