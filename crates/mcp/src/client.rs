//! MCP client implementation.
//!
//! Connects to a server subprocess over stdio, performs the `initialize`
//! handshake, and exposes the two client-visible actions: listing operations
//! and invoking one by name. Servers that publish resource templates can also
//! be read by URI.

use serde_json::{Map, Value};
use std::time::Duration;
use tokio::time::Instant;

use toolbridge_tool_runtime::InvocationResult;

use crate::error::McpError;
use crate::session::{ChildSession, CloseHandle, ServerParams};
use crate::types::*;

/// Client lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Unconnected,
    Connected,
    Closed,
}

/// An MCP client bound to one server subprocess.
///
/// Calls are strictly sequential: every method takes `&mut self` and waits
/// for its response (bounded by the configured timeouts) before returning.
pub struct McpClient {
    params: ServerParams,
    session: Option<ChildSession>,
    state: ClientState,
    next_id: i64,
    server_info: Option<ServerInfo>,
}

impl McpClient {
    /// Create an unconnected client. Nothing is spawned until
    /// [`connect`](Self::connect).
    pub fn new(params: ServerParams) -> Self {
        Self {
            params,
            session: None,
            state: ClientState::Unconnected,
            next_id: 1,
            server_info: None,
        }
    }

    /// Spawn the server and complete the handshake.
    pub async fn connect(&mut self) -> Result<(), McpError> {
        match self.state {
            ClientState::Connected => return Err(McpError::AlreadyConnected),
            ClientState::Closed => return Err(McpError::SessionClosed),
            ClientState::Unconnected => {}
        }

        let mut session = ChildSession::start(&self.params)?;
        match self.handshake(&mut session).await {
            Ok(result) => {
                tracing::info!(
                    server = %result.server_info.name,
                    protocol = %result.protocol_version,
                    "MCP client initialized"
                );
                self.server_info = Some(result.server_info);
                self.session = Some(session);
                self.state = ClientState::Connected;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(program = %self.params.command, error = %e, "Handshake failed");
                session.close().await;
                Err(e)
            }
        }
    }

    async fn handshake(&mut self, session: &mut ChildSession) -> Result<InitializeResult, McpError> {
        session.begin_handshake()?;

        let params = serde_json::to_value(InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: "toolbridge-client".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            },
        })?;

        let id = self.next_request_id();
        let timeout = self.params.timeouts.handshake;
        let response = exchange(session, id, "initialize", Some(params), timeout, true)
            .await
            .map_err(|e| match e {
                McpError::Timeout(_) => McpError::HandshakeTimeout(timeout),
                McpError::ServerExited(reason) => McpError::ProcessLaunch {
                    program: self.params.command.clone(),
                    reason: format!("exited before completing the handshake: {reason}"),
                },
                McpError::Protocol(msg) => McpError::HandshakeProtocol(msg),
                McpError::JsonParse(e) => {
                    McpError::HandshakeProtocol(format!("unparseable acknowledgment: {e}"))
                }
                McpError::Transport(e) => {
                    McpError::HandshakeProtocol(format!("unreadable acknowledgment: {e}"))
                }
                other => other,
            })?;

        if let Some(err) = response.error {
            return Err(McpError::HandshakeProtocol(format!(
                "server rejected initialize ({}): {}",
                err.code, err.message
            )));
        }
        let result = response.result.ok_or_else(|| {
            McpError::HandshakeProtocol("acknowledgment carries no result".to_string())
        })?;
        let result: InitializeResult = serde_json::from_value(result)
            .map_err(|e| McpError::HandshakeProtocol(format!("malformed acknowledgment: {e}")))?;

        if result.capabilities.tools.is_none() {
            tracing::warn!(server = %result.server_info.name, "Server does not advertise tools");
        }

        let initialized = JsonRpcNotification::new("notifications/initialized", None);
        session
            .notify(&serde_json::to_string(&initialized)?)
            .await
            .map_err(|e| match e {
                McpError::Transport(e) => McpError::HandshakeProtocol(format!(
                    "failed to confirm initialization: {e}"
                )),
                other => other,
            })?;
        session.mark_ready()?;

        Ok(result)
    }

    /// Enumerate the server's operations, following pagination cursors.
    pub async fn list_operations(&mut self) -> Result<Vec<ToolInfo>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = match cursor.take() {
                Some(c) => Some(serde_json::to_value(ListToolsParams { cursor: Some(c) })?),
                None => None,
            };
            let result: ListToolsResult =
                serde_json::from_value(self.request("tools/list", params).await?)?;

            for tool in &result.tools {
                tracing::debug!(name = %tool.name, "Discovered operation");
            }
            tools.extend(result.tools);

            match result.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        tracing::info!(count = tools.len(), "Operation discovery complete");
        Ok(tools)
    }

    /// Invoke an operation and return its outcome, success or failure.
    pub async fn call_tool(
        &mut self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<InvocationResult, McpError> {
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments: Value::Object(arguments),
        })?;

        tracing::debug!(tool = %name, "Calling operation");
        let result: CallToolResult =
            serde_json::from_value(self.request("tools/call", Some(params)).await?)?;
        Ok(result.into_invocation_result())
    }

    /// Invoke an operation and return its payload.
    ///
    /// A failure reported by the operation becomes [`McpError::Application`].
    pub async fn invoke(
        &mut self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<Value, McpError> {
        match self.call_tool(name, arguments).await? {
            InvocationResult::Success { value } => Ok(value),
            InvocationResult::Failure { message } => Err(McpError::Application(message)),
        }
    }

    /// Enumerate the server's resource templates, following pagination
    /// cursors.
    pub async fn list_resource_templates(&mut self) -> Result<Vec<ResourceTemplateInfo>, McpError> {
        let mut templates = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = match cursor.take() {
                Some(c) => Some(serde_json::to_value(ListResourceTemplatesParams {
                    cursor: Some(c),
                })?),
                None => None,
            };
            let result: ListResourceTemplatesResult = serde_json::from_value(
                self.request("resources/templates/list", params).await?,
            )?;
            templates.extend(result.resource_templates);

            match result.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        tracing::debug!(count = templates.len(), "Resource template discovery complete");
        Ok(templates)
    }

    /// Read the resource at `uri` and return its text contents.
    ///
    /// An unknown URI or a failing resource comes back as
    /// [`McpError::Rpc`].
    pub async fn read_resource(&mut self, uri: &str) -> Result<String, McpError> {
        let params = serde_json::to_value(ReadResourceParams {
            uri: uri.to_string(),
        })?;

        tracing::debug!(uri = %uri, "Reading resource");
        let result: ReadResourceResult =
            serde_json::from_value(self.request("resources/read", Some(params)).await?)?;
        Ok(result.joined_text())
    }

    /// Liveness round-trip.
    pub async fn ping(&mut self) -> Result<(), McpError> {
        self.request("ping", None).await.map(|_| ())
    }

    /// Tear down the session. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            tracing::info!(program = %self.params.command, "Shutting down MCP server process");
            session.close().await;
        }
        self.state = ClientState::Closed;
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Server identity reported during the handshake.
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    pub fn params(&self) -> &ServerParams {
        &self.params
    }

    /// Handle that aborts a pending call from another task.
    pub fn close_handle(&self) -> Option<CloseHandle> {
        self.session.as_ref().map(ChildSession::close_handle)
    }

    fn next_request_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Send a request on the ready session and return its `result`.
    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        if self.state == ClientState::Closed {
            return Err(McpError::SessionClosed);
        }
        let id = self.next_request_id();
        let timeout = self.params.timeouts.request;
        let session = self.session.as_mut().ok_or(McpError::NotConnected)?;

        let response = exchange(session, id, method, params, timeout, false).await?;
        if let Some(err) = response.error {
            return Err(McpError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        response
            .result
            .ok_or_else(|| McpError::Protocol(format!("response to '{method}' has no result")))
    }
}

/// One request/response cycle on a session.
///
/// Server notifications that arrive while waiting are logged and skipped, as
/// are responses to other ids unless `strict_id` is set. The whole exchange
/// shares a single deadline.
async fn exchange(
    session: &mut ChildSession,
    id: i64,
    method: &str,
    params: Option<Value>,
    timeout: Duration,
    strict_id: bool,
) -> Result<JsonRpcResponse, McpError> {
    let request = JsonRpcRequest::new(RpcId::Number(id), method, params);
    tracing::debug!(method = %method, id = %id, "Sending request");
    session.send(&serde_json::to_string(&request)?).await?;

    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let line = session.receive(remaining).await?;
        let raw: Value = serde_json::from_str(&line)?;

        if raw.get("method").is_some() && raw.get("id").is_none() {
            tracing::debug!(message = %line, "Ignoring server notification");
            continue;
        }

        let response: JsonRpcResponse = serde_json::from_value(raw)?;
        if response.id != RpcId::Number(id) {
            if strict_id {
                return Err(McpError::Protocol(format!(
                    "expected response id {id}, got {:?}",
                    response.id
                )));
            }
            tracing::debug!(expected = id, got = ?response.id, "Skipping stale response");
            continue;
        }
        if response.result.is_none() && response.error.is_none() {
            return Err(McpError::Protocol(format!(
                "response to '{method}' has neither result nor error"
            )));
        }
        return Ok(response);
    }
}

/// Connect, retrying handshake failures with a fresh session each time.
///
/// Launch failures are not retried.
pub async fn connect_with_retry(params: &ServerParams, attempts: u32) -> Result<McpClient, McpError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        let mut client = McpClient::new(params.clone());
        match client.connect().await {
            Ok(()) => return Ok(client),
            Err(e) => {
                client.close().await;
                if !e.is_handshake_failure() || attempt >= attempts {
                    return Err(e);
                }
                tracing::warn!(attempt, attempts, error = %e, "Retrying connect with a fresh session");
                attempt += 1;
            }
        }
    }
}

/// Open a session, list operations, and close it again on every path.
pub async fn list_operations_once(params: &ServerParams) -> Result<Vec<ToolInfo>, McpError> {
    let mut client = McpClient::new(params.clone());
    let result = async {
        client.connect().await?;
        client.list_operations().await
    }
    .await;
    client.close().await;
    result
}

/// Open a session, invoke one operation, and close it again on every path.
pub async fn call_operation_once(
    params: &ServerParams,
    name: &str,
    arguments: Map<String, Value>,
) -> Result<Value, McpError> {
    let mut client = McpClient::new(params.clone());
    let result = async {
        client.connect().await?;
        client.invoke(name, arguments).await
    }
    .await;
    client.close().await;
    result
}
