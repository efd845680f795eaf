//! Client side of remote queries.
//!
//! A [`RemoteQuery`] holds a native tree rooted at a resource marker. Running
//! it partially evaluates the tree, translates it to the portable form, ships
//! it over a [`Transport`] and maps the returned rows into the caller's type.

use crate::expression::{EvalError, EvaluationStrategy, Expr, Interpreter};
use crate::network::{NetworkError, QueryRequest, QueryResponse, Transport};
use crate::portable::{DynValue, PortableExpr};
use crate::runtime::{Method, ResourceDescriptor, Type, TypeRegistry, Value};
use crate::translate::{
    to_portable_with, DynamicObjectMapper, LocalPredicate, PartialEvaluator, TranslationError,
};
use crate::network::ResponseStream;
use futures::stream::{self, BoxStream, StreamExt};
use log::{debug, warn};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Translation error: {0}")]
    Translation(#[from] TranslationError),

    #[error("Remote execution failed: {message}")]
    RemoteExecution { message: String },

    #[error("Protocol error: {0}")]
    Protocol(#[from] NetworkError),

    #[error("Query cancelled")]
    Cancelled,

    #[error("Cannot map row: {0}")]
    RowMapping(String),
}

impl From<EvalError> for QueryError {
    fn from(e: EvalError) -> Self {
        QueryError::Translation(e.into())
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;

/// Stream of mapped rows
pub type RowStream<T> = BoxStream<'static, Result<T>>;

/// Lifecycle of one query run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Built,
    Dispatched,
    Materialized,
    Faulted,
}

/// How a provider prepares trees before sending them
#[derive(Clone, Default)]
pub struct ProviderOptions {
    /// Extra restriction on which sub-trees may be evaluated locally
    pub predicate: Option<LocalPredicate>,
    pub strategy: Option<Arc<dyn EvaluationStrategy>>,
}

impl ProviderOptions {
    pub fn with_predicate(mut self, predicate: LocalPredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn EvaluationStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn evaluator(&self) -> PartialEvaluator {
        let evaluator = PartialEvaluator::new().with_strategy(
            self.strategy
                .clone()
                .unwrap_or_else(|| Arc::new(Interpreter::new())),
        );
        match &self.predicate {
            Some(predicate) => evaluator.with_predicate(predicate.clone()),
            None => evaluator,
        }
    }
}

impl fmt::Debug for ProviderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderOptions")
            .field("predicate", &self.predicate.is_some())
            .field("strategy", &self.strategy.is_some())
            .finish()
    }
}

/// Entry point for building queries against one remote endpoint
#[derive(Clone)]
pub struct RemoteQueryProvider {
    transport: Arc<dyn Transport>,
    registry: Arc<TypeRegistry>,
    options: ProviderOptions,
}

impl RemoteQueryProvider {
    pub fn new(transport: Arc<dyn Transport>, registry: Arc<TypeRegistry>) -> Self {
        Self {
            transport,
            registry,
            options: ProviderOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ProviderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// A query over the remote collection of `element`, with rows mapped into `T`
    pub fn query<T: DeserializeOwned>(&self, element: Type) -> RemoteQuery<T> {
        let root = Expr::constant_typed(
            Value::Resource(ResourceDescriptor::of(element.clone())),
            Type::queryable(element.clone()),
        );
        RemoteQuery::new(self.clone(), root, element)
    }

    /// Translate `expr` for sending, honouring `cancel` on both sides of translation
    pub fn prepare(&self, expr: &Expr, cancel: &CancellationToken) -> Result<PortableExpr> {
        if cancel.is_cancelled() {
            return Err(QueryError::Cancelled);
        }
        let portable = to_portable_with(expr, &self.options.evaluator())?;
        if cancel.is_cancelled() {
            return Err(QueryError::Cancelled);
        }
        Ok(portable)
    }
}

/// A query whose rows deserialize into `T`
pub struct RemoteQuery<T> {
    provider: RemoteQueryProvider,
    expr: Expr,
    element: Type,
    cancel: CancellationToken,
    state: Arc<Mutex<QueryState>>,
    _row: PhantomData<fn() -> T>,
}

impl<T> Clone for RemoteQuery<T> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            expr: self.expr.clone(),
            element: self.element.clone(),
            cancel: self.cancel.clone(),
            state: Arc::new(Mutex::new(QueryState::Built)),
            _row: PhantomData,
        }
    }
}

impl<T> fmt::Debug for RemoteQuery<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteQuery")
            .field("element", &self.element)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl<T: DeserializeOwned> RemoteQuery<T> {
    fn new(provider: RemoteQueryProvider, expr: Expr, element: Type) -> Self {
        Self {
            provider,
            expr,
            element,
            cancel: CancellationToken::new(),
            state: Arc::new(Mutex::new(QueryState::Built)),
            _row: PhantomData,
        }
    }

    fn derive<U: DeserializeOwned>(&self, expr: Expr, element: Type) -> RemoteQuery<U> {
        RemoteQuery::new(self.provider.clone(), expr, element).with_cancellation(self.cancel.clone())
    }

    fn operator(&self, name: &str, generic_args: &[Type]) -> Result<Method> {
        Ok(self.provider.registry.method("Queryable", name, generic_args)?)
    }

    /// Cancel through `token` instead of a private one
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn expression(&self) -> &Expr {
        &self.expr
    }

    pub fn element_type(&self) -> &Type {
        &self.element
    }

    pub fn state(&self) -> QueryState {
        *self.state.lock()
    }

    /// Keep rows for which `predicate`, a one-parameter lambda, holds
    pub fn filter(&self, predicate: Expr) -> Result<RemoteQuery<T>> {
        let method = self.operator("where", &[self.element.clone()])?;
        let expr = Expr::call_static(method, vec![self.expr.clone(), Expr::quote(predicate)]);
        Ok(self.derive(expr, self.element.clone()))
    }

    /// Project every row through `selector`; `U` is the projected row type
    pub fn select<U: DeserializeOwned>(&self, selector: Expr) -> Result<RemoteQuery<U>> {
        let projected = lambda_return(&selector)?;
        let method = self.operator("select", &[self.element.clone(), projected.clone()])?;
        let expr = Expr::call_static(method, vec![self.expr.clone(), Expr::quote(selector)]);
        Ok(self.derive(expr, projected))
    }

    pub fn order_by(&self, key: Expr) -> Result<RemoteQuery<T>> {
        self.ordered("order_by", key)
    }

    pub fn order_by_descending(&self, key: Expr) -> Result<RemoteQuery<T>> {
        self.ordered("order_by_descending", key)
    }

    fn ordered(&self, name: &str, key: Expr) -> Result<RemoteQuery<T>> {
        let key_type = lambda_return(&key)?;
        let method = self.operator(name, &[self.element.clone(), key_type])?;
        let expr = Expr::call_static(method, vec![self.expr.clone(), Expr::quote(key)]);
        Ok(self.derive(expr, self.element.clone()))
    }

    pub fn take(&self, count: i32) -> Result<RemoteQuery<T>> {
        self.partitioned("take", count)
    }

    pub fn skip(&self, count: i32) -> Result<RemoteQuery<T>> {
        self.partitioned("skip", count)
    }

    fn partitioned(&self, name: &str, count: i32) -> Result<RemoteQuery<T>> {
        let method = self.operator(name, &[self.element.clone()])?;
        let expr = Expr::call_static(
            method,
            vec![self.expr.clone(), Expr::constant(Value::Int32(count))],
        );
        Ok(self.derive(expr, self.element.clone()))
    }

    /// Run the query and collect every row
    pub async fn to_vec(&self) -> Result<Vec<T>> {
        let value = self.dispatch(&self.expr).await?;
        let rows = match value {
            DynValue::List(rows) => rows,
            DynValue::Null => Vec::new(),
            single => vec![single],
        };
        let mapped = rows
            .iter()
            .map(|row| self.map_row(row))
            .collect::<Result<Vec<T>>>();
        self.settle(mapped)
    }

    /// Run the query and yield rows as they arrive
    pub async fn stream(&self) -> Result<RowStream<T>>
    where
        T: Send + 'static,
    {
        let portable = self.provider.prepare(&self.expr, &self.cancel);
        let request = QueryRequest::new(self.fail_on_error(portable)?);
        self.set_state(QueryState::Dispatched);
        debug!("streaming request {}", request.request_id);
        let responses = self
            .provider
            .transport
            .execute_stream(request, self.cancel.clone())
            .await;
        let responses = self.fail_on_error(responses.map_err(QueryError::from))?;

        let feed = RowFeed {
            responses: Some(responses),
            cancel: self.cancel.clone(),
            state: self.state.clone(),
            mapper: DynamicObjectMapper::new(),
        };
        let rows = stream::unfold(feed, |mut feed| async move {
            let row = feed.next_row::<T>().await?;
            Some((row, feed))
        });
        Ok(rows.boxed())
    }

    /// Number of rows the query produces, counted remotely
    pub async fn count(&self) -> Result<i64> {
        let method = self.operator("count", &[self.element.clone()])?;
        let expr = Expr::call_static(method, vec![self.expr.clone()]);
        let value = self.dispatch(&expr).await?;
        let count = map_row::<i64>(&DynamicObjectMapper::new(), &value);
        self.settle(count)
    }

    /// The first row; a remote fault when there is none
    pub async fn first(&self) -> Result<T> {
        let method = self.operator("first", &[self.element.clone()])?;
        let expr = Expr::call_static(method, vec![self.expr.clone()]);
        let value = self.dispatch(&expr).await?;
        let row = self.map_row(&value);
        self.settle(row)
    }

    async fn dispatch(&self, expr: &Expr) -> Result<DynValue> {
        let portable = self.fail_on_error(self.provider.prepare(expr, &self.cancel))?;
        let request = QueryRequest::new(portable);
        debug!(
            "dispatching request {} ({} nodes)",
            request.request_id,
            request.expression.node_count()
        );
        self.set_state(QueryState::Dispatched);
        let response = self.provider.transport.execute(request).await;
        match self.fail_on_error(response.map_err(QueryError::from))? {
            QueryResponse::Value(value) => Ok(value),
            QueryResponse::Fault(fault) => {
                warn!("remote query faulted: {}", fault.message);
                self.set_state(QueryState::Faulted);
                Err(QueryError::RemoteExecution {
                    message: fault.message,
                })
            }
        }
    }

    fn map_row(&self, row: &DynValue) -> Result<T> {
        map_row(&DynamicObjectMapper::new(), row)
    }

    fn set_state(&self, state: QueryState) {
        *self.state.lock() = state;
    }

    fn fail_on_error<R>(&self, outcome: Result<R>) -> Result<R> {
        if outcome.is_err() {
            self.set_state(QueryState::Faulted);
        }
        outcome
    }

    fn settle<R>(&self, outcome: Result<R>) -> Result<R> {
        self.set_state(match outcome {
            Ok(_) => QueryState::Materialized,
            Err(_) => QueryState::Faulted,
        });
        outcome
    }
}

/// Pulls responses for a streamed query and keeps its state current.
///
/// Cancellation is checked before every row and again when the transport
/// runs dry, so a cancelled run always ends with `QueryError::Cancelled`.
struct RowFeed {
    responses: Option<ResponseStream>,
    cancel: CancellationToken,
    state: Arc<Mutex<QueryState>>,
    mapper: DynamicObjectMapper,
}

impl RowFeed {
    async fn next_row<R: DeserializeOwned>(&mut self) -> Option<Result<R>> {
        let responses = self.responses.as_mut()?;
        if self.cancel.is_cancelled() {
            return Some(self.fault(QueryError::Cancelled));
        }
        match responses.next().await {
            Some(Ok(QueryResponse::Value(row))) => match map_row(&self.mapper, &row) {
                Ok(row) => Some(Ok(row)),
                Err(e) => Some(self.fault(e)),
            },
            Some(Ok(QueryResponse::Fault(fault))) => Some(self.fault(QueryError::RemoteExecution {
                message: fault.message,
            })),
            Some(Err(e)) => Some(self.fault(e.into())),
            None if self.cancel.is_cancelled() => Some(self.fault(QueryError::Cancelled)),
            None => {
                self.responses = None;
                *self.state.lock() = QueryState::Materialized;
                None
            }
        }
    }

    /// End the feed with `error`
    fn fault<R>(&mut self, error: QueryError) -> Result<R> {
        self.responses = None;
        *self.state.lock() = QueryState::Faulted;
        Err(error)
    }
}

fn map_row<R: DeserializeOwned>(mapper: &DynamicObjectMapper, row: &DynValue) -> Result<R> {
    let json = mapper.to_json(row)?;
    serde_json::from_value(json).map_err(|e| QueryError::RowMapping(e.to_string()))
}

fn lambda_return(lambda: &Expr) -> Result<Type> {
    match lambda.ty().signature() {
        Some((_, ret)) => Ok(ret.clone()),
        None => Err(TranslationError::UnsupportedExpression {
            kind: format!("{} where a lambda was expected", lambda.kind()),
        }
        .into()),
    }
}
