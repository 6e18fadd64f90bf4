//! Client, adapter and server binaries talking over real stdio pipes.

use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

use toolbridge_mcp::{
    adapt, call_operation_once, discover_tools, list_operations_once, ClientState, McpClient,
    McpError, ServerParams, SharedInvoker, Timeouts,
};
use toolbridge_tool_runtime::{InvocationResult, Tool};

fn timeouts() -> Timeouts {
    Timeouts {
        handshake: Duration::from_secs(10),
        request: Duration::from_secs(10),
        shutdown: Duration::from_secs(5),
    }
}

fn calculator() -> ServerParams {
    ServerParams::new(env!("CARGO_BIN_EXE_calculator-server"), Vec::<String>::new())
        .with_env("RUST_LOG", "warn")
        .with_timeouts(timeouts())
}

fn employee_server(db: &std::path::Path) -> ServerParams {
    ServerParams::new(env!("CARGO_BIN_EXE_employee-server"), Vec::<String>::new())
        .with_env("EMPLOYEE_DB", db.to_string_lossy())
        .with_env("RUST_LOG", "warn")
        .with_timeouts(timeouts())
}

fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

#[tokio::test]
async fn test_list_calculator_operations() {
    let tools = list_operations_once(&calculator()).await.unwrap();
    let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["add", "subtract", "multiply", "divide", "power"]);
}

#[tokio::test]
async fn test_paginated_listing_is_complete() {
    let params = calculator().with_env("CALCULATOR_PAGE_SIZE", "2");
    let tools = list_operations_once(&params).await.unwrap();
    assert_eq!(tools.len(), 5);
    assert_eq!(tools[4].name, "power");
}

#[tokio::test]
async fn test_read_square_resource() {
    let mut client = McpClient::new(calculator());
    client.connect().await.unwrap();

    let templates = client.list_resource_templates().await.unwrap();
    let uris: Vec<_> = templates.iter().map(|t| t.uri_template.as_str()).collect();
    assert_eq!(uris, ["calculator://square/{number}"]);

    let text = client.read_resource("calculator://square/3").await.unwrap();
    assert_eq!(text, "9.0");

    let err = client
        .read_resource("calculator://cube/3")
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::Rpc { code: -32602, .. }), "{err:?}");

    // A failed read leaves the session usable.
    let sum = client
        .invoke("add", object(json!({"a": 1, "b": 1})))
        .await
        .unwrap();
    assert_eq!(sum.as_f64(), Some(2.0));
    client.close().await;
}

#[tokio::test]
async fn test_add_and_divide_by_zero() {
    let mut client = McpClient::new(calculator());
    client.connect().await.unwrap();
    assert_eq!(client.server_info().unwrap().name, "calculator_server");

    let sum = client
        .invoke("add", object(json!({"a": 2, "b": 2})))
        .await
        .unwrap();
    assert_eq!(sum.as_f64(), Some(4.0));

    let outcome = client
        .call_tool("divide", object(json!({"a": 10, "b": 0})))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        InvocationResult::Failure {
            message: "Cannot divide by zero.".to_string()
        }
    );

    let err = client
        .invoke("divide", object(json!({"a": 10, "b": 0})))
        .await
        .unwrap_err();
    assert!(err.is_application(), "{err:?}");

    client.ping().await.unwrap();
    client.close().await;
    client.close().await;
    assert_eq!(client.state(), ClientState::Closed);
}

#[tokio::test]
async fn test_request_faults_are_rpc_errors() {
    let mut client = McpClient::new(calculator());
    client.connect().await.unwrap();

    let err = client.invoke("sqrt", object(json!({"a": 4}))).await.unwrap_err();
    assert!(matches!(err, McpError::Rpc { code: -32602, .. }), "{err:?}");

    let err = client
        .invoke("add", object(json!({"a": "two", "b": 2})))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::Rpc { code: -32602, .. }), "{err:?}");

    client.close().await;
}

#[tokio::test]
async fn test_connect_twice_is_rejected() {
    let mut client = McpClient::new(calculator());
    client.connect().await.unwrap();
    assert!(matches!(client.connect().await, Err(McpError::AlreadyConnected)));
    client.close().await;
}

#[tokio::test]
async fn test_employee_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let params = employee_server(&dir.path().join("employees.db"));

    let added = call_operation_once(
        &params,
        "add_employee",
        object(json!({"name": "Alice", "role": "Data Scientist", "salary": 120000})),
    )
    .await
    .unwrap();
    let id = added["id"].as_i64().unwrap();

    let fetched = call_operation_once(&params, "get_employee_by_id", object(json!({"emp_id": id})))
        .await
        .unwrap();
    assert_eq!(fetched["name"], "Alice");
    assert_eq!(fetched["role"], "Data Scientist");
    assert_eq!(fetched["salary"].as_f64(), Some(120000.0));

    let err = call_operation_once(
        &params,
        "get_employee_by_id",
        object(json!({"emp_id": id + 1000})),
    )
    .await
    .unwrap_err();
    assert!(err.is_application());
    assert_eq!(err.to_string(), format!("Employee with ID {} not found", id + 1000));
}

#[tokio::test]
async fn test_adapted_tools_spawn_per_call() {
    let adaptation = discover_tools(&calculator()).await.unwrap();
    assert!(adaptation.errors.is_empty());
    assert_eq!(adaptation.tools.len(), 5);

    let multiply = adaptation
        .tools
        .iter()
        .find(|t| t.name() == "multiply")
        .unwrap();
    let product = multiply.call(r#"{"a": 3, "b": 4}"#).await.unwrap();
    assert_eq!(product.as_f64(), Some(12.0));

    let err = multiply.call(r#"{"a": 3, "b": 4, "c": 5}"#).await.unwrap_err();
    assert!(matches!(err, McpError::InvalidParams(_)));
}

#[tokio::test]
async fn test_adapted_tools_share_a_client() {
    let mut client = McpClient::new(calculator());
    client.connect().await.unwrap();
    let descriptors = client.list_operations().await.unwrap();

    let invoker = SharedInvoker::new(client);
    let adaptation = adapt(descriptors, Arc::new(invoker.clone()));

    let divide = adaptation.tools.iter().find(|t| t.name() == "divide").unwrap();
    let result = divide.execute(json!({"a": 1, "b": 0})).await.unwrap();
    assert!(result.is_error);
    assert_eq!(result.content, "Cannot divide by zero.");

    let power = adaptation.tools.iter().find(|t| t.name() == "power").unwrap();
    let result = power.execute(json!({"a": 2, "b": 3})).await.unwrap();
    assert!(!result.is_error);
    assert_eq!(result.content, "8.0");

    invoker.0.lock().await.close().await;
}

#[tokio::test]
async fn test_parallel_sessions_are_independent() {
    let calc_a = calculator();
    let calc_b = calculator();
    let a = call_operation_once(&calc_a, "add", object(json!({"a": 1, "b": 2})));
    let b = call_operation_once(&calc_b, "subtract", object(json!({"a": 1, "b": 2})));
    let (a, b) = tokio::join!(a, b);
    assert_eq!(a.unwrap().as_f64(), Some(3.0));
    assert_eq!(b.unwrap().as_f64(), Some(-1.0));
}
