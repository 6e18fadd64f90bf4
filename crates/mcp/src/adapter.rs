//! Tool adapter.
//!
//! Turns the descriptors a server publishes into [`ToolCallable`]s that an
//! agent framework can hold next to its local tools. Each callable validates
//! its arguments against a strict copy of the operation's schema and forwards
//! the call through a [`ToolInvoker`].

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

use toolbridge_tool_runtime::{
    InputSchema, SchemaError, Tool, ToolDefinition, ToolError, ToolResult,
};

use crate::client::{call_operation_once, list_operations_once, McpClient};
use crate::error::McpError;
use crate::session::ServerParams;
use crate::types::{render_value, ToolInfo};

/// Where a callable sends its invocations.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, name: &str, arguments: Map<String, Value>) -> Result<Value, McpError>;
}

/// Opens a fresh session for every call and closes it afterwards.
#[derive(Debug, Clone)]
pub struct SpawnInvoker(pub ServerParams);

#[async_trait]
impl ToolInvoker for SpawnInvoker {
    async fn invoke(&self, name: &str, arguments: Map<String, Value>) -> Result<Value, McpError> {
        call_operation_once(&self.0, name, arguments).await
    }
}

/// Forwards calls to an already connected client, one at a time.
#[derive(Clone)]
pub struct SharedInvoker(pub Arc<Mutex<McpClient>>);

impl SharedInvoker {
    pub fn new(client: McpClient) -> Self {
        Self(Arc::new(Mutex::new(client)))
    }
}

#[async_trait]
impl ToolInvoker for SharedInvoker {
    async fn invoke(&self, name: &str, arguments: Map<String, Value>) -> Result<Value, McpError> {
        self.0.lock().await.invoke(name, arguments).await
    }
}

/// A remote operation packaged as a callable tool.
pub struct ToolCallable {
    name: String,
    description: String,
    schema: InputSchema,
    json_schema: Value,
    invoker: Arc<dyn ToolInvoker>,
}

impl ToolCallable {
    /// Build a callable from a wire descriptor.
    ///
    /// The parsed schema is made strict: arguments it does not declare are
    /// rejected.
    pub fn from_info(info: &ToolInfo, invoker: Arc<dyn ToolInvoker>) -> Result<Self, SchemaError> {
        let schema = InputSchema::from_json_schema(&info.input_schema)?.deny_unknown();
        Ok(Self {
            name: info.name.clone(),
            description: info.description.clone(),
            json_schema: schema.to_json_schema(),
            schema,
            invoker,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn schema(&self) -> &InputSchema {
        &self.schema
    }

    /// The strict JSON Schema (`additionalProperties: false`).
    pub fn json_schema(&self) -> &Value {
        &self.json_schema
    }

    /// Invoke with arguments given as JSON text. Blank text means no
    /// arguments.
    pub async fn call(&self, raw_arguments: &str) -> Result<Value, McpError> {
        let arguments = if raw_arguments.trim().is_empty() {
            Map::new()
        } else {
            match serde_json::from_str::<Value>(raw_arguments) {
                Ok(Value::Object(map)) => map,
                Ok(other) => {
                    return Err(McpError::InvalidParams(format!(
                        "arguments for '{}' must be a JSON object, got {other}",
                        self.name
                    )))
                }
                Err(e) => {
                    return Err(McpError::InvalidParams(format!(
                        "arguments for '{}' are not valid JSON: {e}",
                        self.name
                    )))
                }
            }
        };
        self.call_args(arguments).await
    }

    /// Invoke with already decoded arguments.
    pub async fn call_args(&self, arguments: Map<String, Value>) -> Result<Value, McpError> {
        self.schema
            .validate(&arguments)
            .map_err(|e| McpError::InvalidParams(format!("{}: {e}", self.name)))?;
        tracing::debug!(tool = %self.name, "Invoking remote operation");
        self.invoker.invoke(&self.name, arguments).await
    }

    /// OpenAI-style function declaration.
    pub fn to_function_schema(&self) -> Value {
        self.definition().to_function_schema()
    }
}

impl std::fmt::Debug for ToolCallable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCallable")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("json_schema", &self.json_schema)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Tool for ToolCallable {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.json_schema.clone(),
        }
    }

    async fn execute(&self, input: Value) -> Result<ToolResult, ToolError> {
        let arguments = match input {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(ToolError::InvalidInput(format!(
                    "expected a JSON object, got {other}"
                )))
            }
        };

        match self.call_args(arguments).await {
            Ok(value) => Ok(ToolResult::success(render_value(&value))),
            Err(McpError::Application(message)) => Ok(ToolResult::error(message)),
            Err(McpError::InvalidParams(message)) => Err(ToolError::InvalidInput(message)),
            Err(McpError::Timeout(after)) => Err(ToolError::Timeout(after)),
            Err(e) => Err(ToolError::ExecutionFailed(e.to_string())),
        }
    }
}

/// A descriptor whose schema could not be turned into a callable.
#[derive(Debug, thiserror::Error)]
#[error("cannot adapt operation '{operation}': {reason}")]
pub struct SchemaAdaptationError {
    pub operation: String,
    #[source]
    pub reason: SchemaError,
}

/// Outcome of [`adapt`]: one entry per descriptor, in either list.
#[derive(Debug, Default)]
pub struct Adaptation {
    pub tools: Vec<ToolCallable>,
    pub errors: Vec<SchemaAdaptationError>,
}

/// Wrap every descriptor in a callable sharing `invoker`.
///
/// Descriptors with malformed schemas are reported in `errors`; the rest
/// still adapt.
pub fn adapt(descriptors: Vec<ToolInfo>, invoker: Arc<dyn ToolInvoker>) -> Adaptation {
    let mut adaptation = Adaptation::default();

    for info in descriptors {
        match ToolCallable::from_info(&info, Arc::clone(&invoker)) {
            Ok(tool) => adaptation.tools.push(tool),
            Err(reason) => {
                tracing::warn!(operation = %info.name, error = %reason, "Skipping operation with malformed schema");
                adaptation.errors.push(SchemaAdaptationError {
                    operation: info.name,
                    reason,
                });
            }
        }
    }

    tracing::info!(
        tools = adaptation.tools.len(),
        errors = adaptation.errors.len(),
        "Adapted remote operations"
    );
    adaptation
}

/// List a server's operations in a scoped session and adapt them with a
/// [`SpawnInvoker`] for the same server.
pub async fn discover_tools(params: &ServerParams) -> Result<Adaptation, McpError> {
    let descriptors = list_operations_once(params).await?;
    Ok(adapt(descriptors, Arc::new(SpawnInvoker(params.clone()))))
}
