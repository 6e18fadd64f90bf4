//! MCP server implementation.
//!
//! Wraps an `OperationRegistry` and exposes its operations over the MCP
//! protocol. Handles JSON-RPC requests and dispatches them to the registry.
//! Resource templates registered alongside the operations are published
//! through `resources/templates/list` and served by `resources/read`.

use serde_json::{Map, Value};
use std::sync::Arc;

use toolbridge_tool_runtime::{InvocationResult, OperationRegistry, RegistryError};

use crate::error::McpError;
use crate::transport::McpTransport;
use crate::types::*;

/// MCP server that bridges an `OperationRegistry` to MCP clients.
pub struct McpServer {
    registry: Arc<OperationRegistry>,
    server_name: String,
    server_version: String,
    initialized: bool,
    page_size: Option<usize>,
}

impl McpServer {
    /// Create a new MCP server over the given registry.
    pub fn new(registry: impl Into<Arc<OperationRegistry>>) -> Self {
        Self {
            registry: registry.into(),
            server_name: "toolbridge".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            initialized: false,
            page_size: None,
        }
    }

    /// Set the server name reported during the handshake.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    /// Split `tools/list` and `resources/templates/list` into pages of at
    /// most `size` entries.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size.max(1));
        self
    }

    /// Run the server loop, reading from and writing to the transport.
    ///
    /// Processes JSON-RPC requests until the transport is closed.
    pub async fn run<T: McpTransport>(&mut self, transport: &mut T) -> Result<(), McpError> {
        tracing::info!(server = %self.server_name, operations = self.registry.len(), "MCP server starting");

        while let Some(line) = transport.receive().await? {
            tracing::debug!(message = %line, "Received message");

            // Requests carry an "id"; notifications do not.
            let raw: Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse JSON");
                    let err = McpError::JsonParse(e).to_rpc_error();
                    let resp = JsonRpcResponse::error(RpcId::Null, err.code, err.message);
                    transport.send(&serde_json::to_string(&resp)?).await?;
                    continue;
                }
            };

            if raw.get("id").is_none() {
                if let Ok(notif) = serde_json::from_value::<JsonRpcNotification>(raw) {
                    self.handle_notification(&notif);
                }
                continue;
            }

            let request: JsonRpcRequest = match serde_json::from_value(raw.clone()) {
                Ok(req) => req,
                Err(e) => {
                    tracing::warn!(error = %e, "Malformed JSON-RPC request");
                    let id = raw
                        .get("id")
                        .and_then(|id| serde_json::from_value(id.clone()).ok())
                        .unwrap_or(RpcId::Null);
                    let err = McpError::Protocol(e.to_string()).to_rpc_error();
                    let resp = JsonRpcResponse::error(id, err.code, err.message);
                    transport.send(&serde_json::to_string(&resp)?).await?;
                    continue;
                }
            };

            let response = self.handle_request(&request).await;
            let json = serde_json::to_string(&response)?;
            tracing::debug!(response = %json, "Sending response");
            transport.send(&json).await?;
        }

        tracing::info!("Transport closed, shutting down");
        Ok(())
    }

    /// Handle a single JSON-RPC request and produce a response.
    pub async fn handle_request(&mut self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();

        let outcome = match request.method.as_str() {
            "initialize" => self.handle_initialize(&request.params),
            "ping" => Ok(Value::Object(Map::new())),
            _ if !self.initialized => Err(McpError::NotInitialized),
            "tools/list" => self.handle_list_tools(&request.params),
            "tools/call" => self.handle_call_tool(&request.params).await,
            "resources/list" => Ok(serde_json::json!({ "resources": [] })),
            "resources/templates/list" => self.handle_list_resource_templates(&request.params),
            "resources/read" => self.handle_read_resource(&request.params).await,
            method => {
                tracing::warn!(method = %method, "Unknown method");
                Err(McpError::MethodNotFound(method.to_string()))
            }
        };

        match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => {
                let err = e.to_rpc_error();
                JsonRpcResponse::error(id, err.code, err.message)
            }
        }
    }

    fn handle_notification(&mut self, notif: &JsonRpcNotification) {
        match notif.method.as_str() {
            "notifications/initialized" => {
                tracing::info!("Client confirmed initialization");
            }
            "notifications/cancelled" => {
                tracing::debug!("Client cancelled a request");
            }
            method => {
                tracing::debug!(method = %method, "Unknown notification, ignoring");
            }
        }
    }

    fn handle_initialize(&mut self, params: &Option<Value>) -> Result<Value, McpError> {
        let params: InitializeParams = serde_json::from_value(params.clone().unwrap_or(Value::Null))
            .map_err(|e| McpError::InvalidParams(e.to_string()))?;
        tracing::info!(
            client = %params.client_info.name,
            protocol = %params.protocol_version,
            "Handling initialize"
        );
        self.initialized = true;

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
                resources: (!self.registry.resource_templates().is_empty())
                    .then(ResourcesCapability::default),
            },
            server_info: ServerInfo {
                name: self.server_name.clone(),
                version: Some(self.server_version.clone()),
            },
        };
        Ok(serde_json::to_value(result)?)
    }

    fn handle_list_tools(&self, params: &Option<Value>) -> Result<Value, McpError> {
        tracing::debug!("Handling tools/list");

        let params: ListToolsParams = match params {
            Some(p) if !p.is_null() => serde_json::from_value(p.clone())
                .map_err(|e| McpError::InvalidParams(e.to_string()))?,
            _ => ListToolsParams::default(),
        };
        let (tools, next_cursor) = self.page(self.registry.list(), params.cursor.as_deref())?;
        let tools = tools.into_iter().map(ToolInfo::from).collect();

        Ok(serde_json::to_value(ListToolsResult { tools, next_cursor })?)
    }

    fn handle_list_resource_templates(&self, params: &Option<Value>) -> Result<Value, McpError> {
        tracing::debug!("Handling resources/templates/list");

        let params: ListResourceTemplatesParams = match params {
            Some(p) if !p.is_null() => serde_json::from_value(p.clone())
                .map_err(|e| McpError::InvalidParams(e.to_string()))?,
            _ => ListResourceTemplatesParams::default(),
        };
        let (templates, next_cursor) =
            self.page(self.registry.resource_templates(), params.cursor.as_deref())?;
        let resource_templates = templates.into_iter().map(ResourceTemplateInfo::from).collect();

        Ok(serde_json::to_value(ListResourceTemplatesResult {
            resource_templates,
            next_cursor,
        })?)
    }

    async fn handle_read_resource(&self, params: &Option<Value>) -> Result<Value, McpError> {
        let params: ReadResourceParams =
            serde_json::from_value(params.clone().unwrap_or(Value::Null))
                .map_err(|e| McpError::InvalidParams(e.to_string()))?;

        tracing::debug!(uri = %params.uri, "Handling resources/read");

        let outcome = self
            .registry
            .read_resource(&params.uri)
            .await
            .map_err(|e| match e {
                RegistryError::UnknownResource(uri) => McpError::ResourceNotFound(uri),
                other => McpError::InvalidParams(other.to_string()),
            })?;

        match outcome {
            InvocationResult::Success { value } => {
                let mime_type = self
                    .registry
                    .resource_templates()
                    .into_iter()
                    .find(|t| t.match_uri(&params.uri).is_some())
                    .and_then(|t| t.mime_type);
                Ok(serde_json::to_value(ReadResourceResult::text(
                    params.uri, mime_type, &value,
                ))?)
            }
            InvocationResult::Failure { message } => Err(McpError::Application(message)),
        }
    }

    /// One page of `items` starting at the offset encoded in `cursor`.
    fn page<T>(
        &self,
        items: Vec<T>,
        cursor: Option<&str>,
    ) -> Result<(Vec<T>, Option<String>), McpError> {
        let start = match cursor {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| McpError::InvalidParams(format!("invalid cursor '{cursor}'")))?,
            None => 0,
        };
        let end = match self.page_size {
            Some(size) => items.len().min(start.saturating_add(size)),
            None => items.len(),
        };
        let next_cursor = (end < items.len()).then(|| end.to_string());
        let page = items
            .into_iter()
            .skip(start)
            .take(end.saturating_sub(start))
            .collect();
        Ok((page, next_cursor))
    }

    async fn handle_call_tool(&self, params: &Option<Value>) -> Result<Value, McpError> {
        let params = params
            .as_ref()
            .ok_or_else(|| McpError::InvalidParams("missing params".to_string()))?;
        let call_params: CallToolParams = serde_json::from_value(params.clone())
            .map_err(|e| McpError::InvalidParams(e.to_string()))?;

        let arguments = match call_params.arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(McpError::InvalidParams(format!(
                    "arguments must be an object, got {other}"
                )))
            }
        };

        tracing::debug!(tool = %call_params.name, "Handling tools/call");

        let outcome = self
            .registry
            .invoke(&call_params.name, arguments)
            .await
            .map_err(|e| match e {
                RegistryError::UnknownOperation(name) => McpError::ToolNotFound(name),
                other => McpError::InvalidParams(other.to_string()),
            })?;

        Ok(serde_json::to_value(CallToolResult::from(outcome))?)
    }
}
