//! Error types for the MCP crate.

use std::time::Duration;

use crate::types::{error_codes, JsonRpcError};

/// Errors that can occur during MCP operations.
///
/// [`McpError::Application`] is the only variant meaning "the operation ran
/// and reported a problem"; everything else means the operation could not be
/// reached or the caller misused the API.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// Failed to parse JSON.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Transport I/O error.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The child process could not be started, or died before answering.
    #[error("Failed to launch '{program}': {reason}")]
    ProcessLaunch { program: String, reason: String },

    /// No handshake acknowledgment within the bounded wait.
    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// The handshake acknowledgment was malformed or an error.
    #[error("Handshake failed: {0}")]
    HandshakeProtocol(String),

    /// A message violated the protocol (missing result, wrong id, ...).
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// No response within the bounded wait.
    #[error("Timed out after {0:?} waiting for a response")]
    Timeout(Duration),

    /// The session has been closed and cannot be used again.
    #[error("Session is closed")]
    SessionClosed,

    /// A request was sent while another was still awaiting its response.
    #[error("A request is already in flight on this session")]
    Reentrancy,

    /// Operation attempted before `connect()` completed.
    #[error("Not connected: call connect first")]
    NotConnected,

    /// `connect()` called on a client that is already connected.
    #[error("Already connected")]
    AlreadyConnected,

    /// The server process exited or closed its output.
    #[error("Server exited: {0}")]
    ServerExited(String),

    /// The server answered a request with a JSON-RPC error.
    #[error("Server error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The operation ran and reported a failure.
    #[error("{0}")]
    Application(String),

    /// The requested method is not supported.
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Invalid parameters for a method.
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// The requested tool was not found in the registry.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// No resource template matches the requested URI.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Server/client not initialized.
    #[error("Not initialized: call initialize first")]
    NotInitialized,
}

impl McpError {
    /// True when the remote operation ran and reported a failure.
    pub fn is_application(&self) -> bool {
        matches!(self, McpError::Application(_))
    }

    /// Handshake failures are worth retrying with a fresh session.
    pub fn is_handshake_failure(&self) -> bool {
        matches!(
            self,
            McpError::HandshakeTimeout(_) | McpError::HandshakeProtocol(_)
        )
    }

    /// Convert to a JSON-RPC error object.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        let (code, message) = match self {
            McpError::JsonParse(_) => (error_codes::PARSE_ERROR, self.to_string()),
            McpError::MethodNotFound(_) => (error_codes::METHOD_NOT_FOUND, self.to_string()),
            McpError::InvalidParams(_) => (error_codes::INVALID_PARAMS, self.to_string()),
            McpError::ToolNotFound(_) => (error_codes::INVALID_PARAMS, self.to_string()),
            McpError::ResourceNotFound(_) => (error_codes::INVALID_PARAMS, self.to_string()),
            McpError::NotInitialized => (error_codes::SERVER_NOT_INITIALIZED, self.to_string()),
            McpError::Protocol(_) => (error_codes::INVALID_REQUEST, self.to_string()),
            _ => (error_codes::INTERNAL_ERROR, self.to_string()),
        };
        JsonRpcError {
            code,
            message,
            data: None,
        }
    }
}
