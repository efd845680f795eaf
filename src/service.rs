//! Remote side: executes portable queries against in-memory data.

pub mod demo;

use crate::expression::{EvalError, EvaluationStrategy, Expr, Interpreter};
use crate::network::RemoteFault;
use crate::portable::{DynValue, PortableExpr};
use crate::runtime::{Sequence, SequenceKind, Type, TypeRegistry, Value};
use crate::translate::{
    from_portable, DynamicObjectMapper, RegistryResolver, TranslationError, TypeResolver,
};
use dashmap::DashMap;
use log::{debug, info};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("resource '{0}' not found")]
    ResourceNotFound(String),

    #[error(transparent)]
    Translation(#[from] TranslationError),

    #[error(transparent)]
    Evaluation(#[from] EvalError),
}

/// Named collections that resource markers are bound to
#[derive(Debug, Default)]
pub struct DataStore {
    resources: DashMap<String, Sequence>,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `rows` under `name`, replacing any previous contents
    pub fn insert(&self, name: impl Into<String>, element: Type, rows: Vec<Value>) {
        let name = name.into();
        info!("storing {} rows as '{}'", rows.len(), name);
        self.resources
            .insert(name, Sequence::new(SequenceKind::Queryable, element, rows));
    }

    pub fn get(&self, name: &str) -> Option<Sequence> {
        self.resources.get(name).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, name: &str) -> bool {
        self.resources.remove(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.resources.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

/// Rebuilds portable trees, binds their resources to stored data, runs
/// them and decomposes the result into rows
pub struct QueryService {
    registry: Arc<TypeRegistry>,
    resolver: Arc<dyn TypeResolver>,
    store: Arc<DataStore>,
    strategy: Arc<dyn EvaluationStrategy>,
    mapper: DynamicObjectMapper,
}

impl QueryService {
    pub fn new(registry: Arc<TypeRegistry>, store: Arc<DataStore>) -> Self {
        Self {
            resolver: Arc::new(RegistryResolver::new(registry.clone())),
            registry,
            store,
            strategy: Arc::new(Interpreter::new()),
            mapper: DynamicObjectMapper::new(),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn TypeResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn EvaluationStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<DataStore> {
        &self.store
    }

    /// Execute a query; every failure is reported as a fault
    pub fn execute(&self, expr: &PortableExpr) -> Result<DynValue, RemoteFault> {
        self.run(expr).map_err(|e| RemoteFault::error(e.to_string()))
    }

    pub fn run(&self, expr: &PortableExpr) -> Result<DynValue, ServiceError> {
        let native = from_portable(expr, self.resolver.as_ref())?;
        let bound = self.bind_resources(&native)?;
        let value = self.strategy.evaluate(&bound)?;
        let result = self.mapper.to_dyn(&value)?;
        debug!("query over {} nodes produced {}", expr.node_count(), value.runtime_type());
        Ok(result)
    }

    /// Replace resource markers with the stored collections they name
    fn bind_resources(&self, expr: &Expr) -> Result<Expr, ServiceError> {
        match expr {
            Expr::Constant {
                value: Value::Resource(resource),
                ty,
            } => {
                let data = self
                    .store
                    .get(&resource.name)
                    .ok_or_else(|| ServiceError::ResourceNotFound(resource.name.clone()))?;
                Ok(Expr::Constant {
                    value: Value::Sequence(data.with_kind(SequenceKind::Queryable)),
                    ty: ty.clone(),
                })
            }
            other => other.try_map_children(&mut |child| self.bind_resources(child)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portable::Primitive;
    use crate::runtime::ResourceDescriptor;
    use crate::translate::to_portable;

    #[test]
    fn test_data_store() {
        let store = DataStore::new();
        store.insert("numbers", Type::Int32, vec![Value::Int32(1), Value::Int32(2)]);
        assert_eq!(store.get("numbers").unwrap().len(), 2);
        assert_eq!(store.names(), vec!["numbers".to_string()]);
        assert!(store.remove("numbers"));
        assert!(store.get("numbers").is_none());
    }

    #[test]
    fn test_count_over_stored_rows() {
        let service = demo::service().unwrap();
        let count = service
            .registry()
            .method("Queryable", "count", &[demo::customer_type()])
            .unwrap();
        let query = Expr::call_static(count, vec![demo::customers()]);
        let result = service.execute(&to_portable(&query).unwrap()).unwrap();
        assert_eq!(result, DynValue::Primitive(Primitive::Int32(5)));
    }

    #[test]
    fn test_missing_resource_faults() {
        let service = QueryService::new(Arc::new(TypeRegistry::with_builtins()), Arc::new(DataStore::new()));
        let query = Expr::constant_typed(
            Value::Resource(ResourceDescriptor::of(Type::Int32)),
            Type::queryable(Type::Int32),
        );
        let fault = service.execute(&to_portable(&query).unwrap()).unwrap_err();
        assert!(fault.is_error);
        assert_eq!(fault.message, "resource 'i32' not found");
    }
}
