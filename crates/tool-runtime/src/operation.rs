//! Operations: the server-side unit of work.
//!
//! An operation is a descriptor (name, description, [`InputSchema`]) paired
//! with an [`OperationHandler`]. Handlers report application problems through
//! [`OperationError`]; the registry turns those into
//! [`InvocationResult::Failure`] instead of protocol faults.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;

use crate::schema::InputSchema;

/// Immutable metadata published for one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
}

impl OperationDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: InputSchema,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

impl fmt::Display for OperationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.description)
    }
}

/// Outcome of running an operation's handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvocationResult {
    Success { value: Value },
    Failure { message: String },
}

impl InvocationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, InvocationResult::Success { .. })
    }

    /// Convert into a `Result`, keeping the failure message as the error.
    pub fn into_result(self) -> Result<Value, String> {
        match self {
            InvocationResult::Success { value } => Ok(value),
            InvocationResult::Failure { message } => Err(message),
        }
    }
}

/// Arguments handed to an operation handler, already validated against the
/// operation's schema.
#[derive(Debug, Clone, Default)]
pub struct Arguments(Map<String, Value>);

impl Arguments {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Deserialize the arguments into a typed struct.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, OperationError> {
        serde_json::from_value(Value::Object(self.0.clone()))
            .map_err(|e| OperationError::InvalidInput(e.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Arguments {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Application-level failure raised by a handler.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("{0}")]
    Failed(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Executes one operation.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn call(&self, args: Arguments) -> Result<Value, OperationError>;
}

/// Adapter turning an async closure into an [`OperationHandler`].
pub struct FnHandler<F>(F);

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Arguments) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, OperationError>> + Send,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> OperationHandler for FnHandler<F>
where
    F: Fn(Arguments) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, OperationError>> + Send,
{
    async fn call(&self, args: Arguments) -> Result<Value, OperationError> {
        (self.0)(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ParamKind, ParamSpec};
    use serde_json::json;

    #[derive(Deserialize)]
    struct Pair {
        a: f64,
        b: f64,
    }

    #[test]
    fn test_descriptor_wire_shape() {
        let desc = OperationDescriptor::new(
            "add",
            "Add two numbers.",
            InputSchema::new().param("a", ParamSpec::required(ParamKind::Float)),
        );
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["name"], "add");
        assert_eq!(json["inputSchema"]["properties"]["a"]["type"], "number");
        let back: OperationDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back, desc);
    }

    #[test]
    fn test_invocation_result_variants() {
        let ok = InvocationResult::Success { value: json!(4.0) };
        assert!(ok.is_success());
        assert_eq!(ok.into_result(), Ok(json!(4.0)));

        let failed = InvocationResult::Failure {
            message: "Cannot divide by zero.".into(),
        };
        assert!(!failed.is_success());
        assert_eq!(failed.into_result(), Err("Cannot divide by zero.".to_string()));
    }

    #[test]
    fn test_arguments_parse() {
        let args = Arguments::new(json!({"a": 1, "b": 2.5}).as_object().cloned().unwrap());
        let pair: Pair = args.parse().unwrap();
        assert_eq!(pair.a + pair.b, 3.5);

        let bad = Arguments::new(json!({"a": "x"}).as_object().cloned().unwrap());
        assert!(matches!(bad.parse::<Pair>(), Err(OperationError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_handler_fn() {
        let handler = handler_fn(|args: Arguments| async move {
            let pair: Pair = args.parse()?;
            Ok::<_, OperationError>(json!(pair.a * pair.b))
        });
        let out = handler
            .call(Arguments::new(json!({"a": 3, "b": 4}).as_object().cloned().unwrap()))
            .await
            .unwrap();
        assert_eq!(out.as_f64(), Some(12.0));
    }

    #[test]
    fn test_operation_error_messages() {
        assert_eq!(
            OperationError::Failed("Cannot divide by zero.".into()).to_string(),
            "Cannot divide by zero."
        );
        assert_eq!(
            OperationError::NotFound("Employee with ID 9".into()).to_string(),
            "Employee with ID 9 not found"
        );
    }
}
