//! Sample customer data used by the server binary and tests.

use super::{DataStore, QueryService};
use crate::expression::Expr;
use crate::runtime::{ClassInfo, FieldInfo, Object, ResourceDescriptor, Type, TypeRegistry, Value};
use anyhow::Context;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

pub const CUSTOMER: &str = "demo.Customer";

pub fn customer_class() -> Arc<ClassInfo> {
    ClassInfo::new(
        CUSTOMER,
        vec![
            FieldInfo::new("id", Type::Guid),
            FieldInfo::new("name", Type::String),
            FieldInfo::new("city", Type::String),
            FieldInfo::new("age", Type::Int32),
            FieldInfo::new("balance", Type::Decimal),
        ],
    )
}

pub fn customer_type() -> Type {
    Type::Class(customer_class())
}

/// Builtins plus the customer class
pub fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::with_builtins();
    registry.register_class(customer_class());
    registry
}

/// Resource marker for the remote customer collection
pub fn customers() -> Expr {
    let element = customer_type();
    Expr::constant_typed(
        Value::Resource(ResourceDescriptor::of(element.clone())),
        Type::queryable(element),
    )
}

pub fn customer_rows() -> anyhow::Result<Vec<Value>> {
    let class = customer_class();
    let rows = [
        (1u128, "Ada", "Berlin", 36, Decimal::new(120050, 2)),
        (2, "Bruno", "Munich", 28, Decimal::new(31000, 2)),
        (3, "Chen", "Berlin", 41, Decimal::new(8725, 2)),
        (4, "Dana", "Hamburg", 19, Decimal::ZERO),
        (5, "Emil", "Berlin", 30, Decimal::new(45510, 2)),
    ];
    rows.into_iter()
        .map(|(id, name, city, age, balance)| {
            let object = Object::with_fields(
                class.clone(),
                [
                    ("id", Value::Guid(Uuid::from_u128(id))),
                    ("name", Value::string(name)),
                    ("city", Value::string(city)),
                    ("age", Value::Int32(age)),
                    ("balance", Value::Decimal(balance)),
                ],
            )
            .with_context(|| format!("building customer {}", name))?;
            Ok(Value::object(object))
        })
        .collect()
}

pub fn store() -> anyhow::Result<DataStore> {
    let store = DataStore::new();
    let element = customer_type();
    store.insert(
        ResourceDescriptor::of(element.clone()).name,
        element,
        customer_rows()?,
    );
    Ok(store)
}

/// A service over the demo registry with the customer rows loaded
pub fn service() -> anyhow::Result<QueryService> {
    Ok(QueryService::new(Arc::new(registry()), Arc::new(store()?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_is_keyed_by_element_name() {
        let store = store().unwrap();
        assert_eq!(store.names(), vec![CUSTOMER.to_string()]);
        assert_eq!(store.get(CUSTOMER).unwrap().len(), 5);
    }
}
