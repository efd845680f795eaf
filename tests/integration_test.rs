use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vibequery::expression::{evaluate_expression, BinaryOperator, Expr, ExprKind, UnaryOperator, Variable};
use vibequery::network::{LocalTransport, QueryServer, ServerConfig, TcpTransport};
use vibequery::portable::{DynValue, PortableExpr, Primitive};
use vibequery::query::{ProviderOptions, QueryError, QueryState, RemoteQueryProvider};
use vibequery::runtime::{ClassInfo, FieldInfo, Member, Object, Sequence, Type, Value};
use vibequery::service::demo;
use vibequery::translate::{
    from_portable, to_portable, DynamicObjectMapper, PartialEvaluator, RegistryResolver,
};

#[derive(Debug, Deserialize, PartialEq)]
struct Customer {
    name: String,
    age: i32,
}

fn local_provider() -> RemoteQueryProvider {
    let service = Arc::new(demo::service().unwrap());
    let registry = service.registry().clone();
    RemoteQueryProvider::new(Arc::new(LocalTransport::new(service)), registry)
}

fn field(name: &str) -> Member {
    Member::field(&demo::customer_class(), name).unwrap()
}

fn lives_in(city: &str) -> Expr {
    let c = Variable::new("c", demo::customer_type());
    Expr::lambda(
        vec![c.clone()],
        Expr::equal(
            Expr::member(Expr::parameter(&c), field("city")),
            Expr::constant(Value::string(city)),
        ),
    )
}

fn name_of() -> Expr {
    let c = Variable::new("c", demo::customer_type());
    Expr::lambda(vec![c.clone()], Expr::member(Expr::parameter(&c), field("name")))
}

/// `c => c.age >= closure.min_age`, with `min_age` held by a local closure object
fn older_than_captured(min_age: i32) -> Expr {
    let closure_class = ClassInfo::new("closure.Locals", vec![FieldInfo::new("min_age", Type::Int32)]);
    let closure = Object::with_fields(closure_class.clone(), [("min_age", Value::Int32(min_age))]).unwrap();
    let min_age = Member::field(&closure_class, "min_age").unwrap();
    let c = Variable::new("c", demo::customer_type());
    Expr::lambda(
        vec![c.clone()],
        Expr::greater_than_or_equal(
            Expr::member(Expr::parameter(&c), field("age")),
            Expr::member(Expr::constant(Value::object(closure)), min_age),
        ),
    )
}

fn parameter_names(expr: &PortableExpr) -> Vec<String> {
    let mut names = Vec::new();
    expr.walk(&mut |node| {
        if let PortableExpr::Parameter(p) = node {
            names.push(p.name.clone());
        }
    });
    names
}

/// Swap the customer resource marker for the in-memory rows
fn bind_customers(expr: &Expr) -> anyhow::Result<Expr> {
    match expr {
        Expr::Constant {
            value: Value::Resource(_),
            ty,
        } => Ok(Expr::constant_typed(
            Value::Sequence(Sequence::queryable(demo::customer_type(), demo::customer_rows()?)),
            ty.clone(),
        )),
        other => other.try_map_children(&mut |child| bind_customers(child)),
    }
}

fn run_locally(expr: &Expr) -> DynValue {
    let value = evaluate_expression(&bind_customers(expr).unwrap()).unwrap();
    DynamicObjectMapper::new().to_dyn(&value).unwrap()
}

fn method_name(expr: &PortableExpr) -> Option<&str> {
    match expr {
        PortableExpr::Call { method, .. } => Some(method.name.as_str()),
        _ => None,
    }
}

#[tokio::test]
async fn test_filter_by_city_and_project_names() {
    let query = local_provider()
        .query::<Customer>(demo::customer_type())
        .filter(lives_in("Berlin"))
        .unwrap()
        .select::<String>(name_of())
        .unwrap();

    // select(where(customers, quote(c => c.city == "Berlin")), quote(c => c.name))
    let portable = to_portable(query.expression()).unwrap();
    assert_eq!(method_name(&portable), Some("select"));
    let PortableExpr::Call { args, .. } = &portable else {
        unreachable!()
    };
    let source = &args[0];
    assert_eq!(method_name(source), Some("where"));
    let PortableExpr::Call { args, .. } = source else {
        unreachable!()
    };
    match &args[1] {
        PortableExpr::Unary {
            op: UnaryOperator::Quote,
            operand,
            ..
        } => match operand.as_ref() {
            PortableExpr::Lambda { body, .. } => match body.as_ref() {
                PortableExpr::Binary {
                    op: BinaryOperator::Equal,
                    right,
                    ..
                } => match right.as_ref() {
                    PortableExpr::Constant(constant) => assert_eq!(
                        constant.value,
                        DynValue::Primitive(Primitive::String("Berlin".to_string()))
                    ),
                    other => panic!("expected a constant, got {:?}", other),
                },
                other => panic!("expected an equality, got {:?}", other),
            },
            other => panic!("expected a lambda, got {:?}", other),
        },
        other => panic!("expected a quoted predicate, got {:?}", other),
    }

    // The rebuilt tree runs the same as the tree it came from
    let resolver = RegistryResolver::new(Arc::new(demo::registry()));
    let rebuilt = from_portable(&portable, &resolver).unwrap();
    let expected = DynValue::List(
        ["Ada", "Chen", "Emil"]
            .iter()
            .map(|name| DynValue::Primitive(Primitive::String(name.to_string())))
            .collect(),
    );
    assert_eq!(run_locally(query.expression()), expected);
    assert_eq!(run_locally(&rebuilt), expected);

    let names = query.to_vec().await.unwrap();
    assert_eq!(names, vec!["Ada", "Chen", "Emil"]);
}

#[tokio::test]
async fn test_captured_local_travels_as_constant() {
    let query = local_provider()
        .query::<Customer>(demo::customer_type())
        .filter(older_than_captured(30))
        .unwrap();

    let portable = to_portable(query.expression()).unwrap();
    assert_eq!(parameter_names(&portable), vec!["c"]);
    let mut thirty = false;
    portable.walk(&mut |node| {
        if let PortableExpr::Constant(constant) = node {
            thirty |= constant.value == DynValue::Primitive(Primitive::Int32(30));
        }
    });
    assert!(thirty);

    let rows = query.to_vec().await.unwrap();
    let names: Vec<&str> = rows.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Ada", "Chen", "Emil"]);
    assert!(rows.iter().all(|c| c.age >= 30));
}

#[tokio::test]
async fn test_missing_resource_surfaces_remote_fault() {
    let query = local_provider().query::<i32>(Type::Int32);
    match query.to_vec().await {
        Err(QueryError::RemoteExecution { message }) => {
            assert!(message.contains("not found"), "{}", message)
        }
        other => panic!("expected remote fault, got {:?}", other),
    }
    assert_eq!(query.state(), QueryState::Faulted);
}

#[tokio::test]
async fn test_predicate_keeps_closure_remote() {
    let no_members = Arc::new(|e: &Expr| e.kind() != ExprKind::MemberAccess);
    let provider = local_provider().with_options(ProviderOptions::default().with_predicate(no_members));
    let result = provider
        .query::<Customer>(demo::customer_type())
        .filter(older_than_captured(30))
        .unwrap()
        .to_vec()
        .await;
    // The closure class only exists on this side
    match result {
        Err(QueryError::RemoteExecution { message }) => {
            assert!(message.contains("closure.Locals"), "{}", message)
        }
        other => panic!("expected remote fault, got {:?}", other),
    }
}

#[test]
fn test_portable_tree_survives_the_wire() {
    let query = local_provider()
        .query::<Customer>(demo::customer_type())
        .filter(lives_in("Hamburg"))
        .unwrap();
    let portable = to_portable(query.expression()).unwrap();

    let bytes = bincode::serialize(&portable).unwrap();
    let decoded: PortableExpr = bincode::deserialize(&bytes).unwrap();
    assert_eq!(decoded, portable);

    let resolver = RegistryResolver::new(Arc::new(demo::registry()));
    let rebuilt = from_portable(&decoded, &resolver).unwrap();
    assert_eq!(to_portable(&rebuilt).unwrap(), portable);
}

#[test]
fn test_partial_evaluation_is_idempotent() {
    let lambda = older_than_captured(41);
    let evaluator = PartialEvaluator::new();
    let once = evaluator.evaluate(&lambda).unwrap();
    let twice = evaluator.evaluate(&once).unwrap();
    assert_eq!(to_portable(&once).unwrap(), to_portable(&twice).unwrap());
}

#[tokio::test]
async fn test_queries_over_tcp() {
    let service = Arc::new(demo::service().unwrap());
    let registry = service.registry().clone();
    let server = QueryServer::new(
        service,
        ServerConfig {
            addr: ([127, 0, 0, 1], 0).into(),
            max_connections: 4,
        },
    );
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let server_task = tokio::spawn(async move { server.serve(listener, token).await });

    let provider = RemoteQueryProvider::new(Arc::new(TcpTransport::new(addr)), registry);
    let berlin = provider
        .query::<Customer>(demo::customer_type())
        .filter(lives_in("Berlin"))
        .unwrap();
    assert_eq!(berlin.count().await.unwrap(), 3);

    let mut streamed = Vec::new();
    let mut rows = berlin.stream().await.unwrap();
    while let Some(row) = futures::StreamExt::next(&mut rows).await {
        streamed.push(row.unwrap().name);
    }
    assert_eq!(streamed, vec!["Ada", "Chen", "Emil"]);

    let missing = provider.query::<i32>(Type::Int32).to_vec().await;
    assert!(matches!(missing, Err(QueryError::RemoteExecution { .. })));

    shutdown.cancel();
    assert!(server_task.await.unwrap().is_ok());
}
