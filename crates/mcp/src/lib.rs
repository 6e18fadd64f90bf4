//! MCP (Model Context Protocol) bridge for toolbridge.
//!
//! This crate speaks MCP over newline-delimited JSON-RPC 2.0 on a child
//! process's stdio, in both directions: a server that publishes an
//! `OperationRegistry`, and a client that drives such a server and adapts
//! its operations into callable tools.
//!
//! # Architecture
//!
//! - **types**: JSON-RPC 2.0 and MCP-specific protocol types
//! - **transport**: Server-side transport layer (stdio, channels)
//! - **session**: One child process and its stdio pipes
//! - **server**: MCP server wrapping an `OperationRegistry`
//! - **client**: MCP client with handshake, listing and invocation
//! - **adapter**: Descriptors to `ToolCallable`s
//! - **error**: Unified error types
//!
//! # Usage
//!
//! ## Server
//! ```no_run
//! use toolbridge_mcp::server::McpServer;
//! use toolbridge_mcp::transport::StdioTransport;
//! use toolbridge_tool_runtime::OperationRegistry;
//!
//! # async fn example() {
//! let registry = OperationRegistry::new();
//! let mut server = McpServer::new(registry);
//! let mut transport = StdioTransport::stdio();
//! server.run(&mut transport).await.unwrap();
//! # }
//! ```
//!
//! ## Client
//! ```no_run
//! use toolbridge_mcp::{adapter::discover_tools, ServerParams};
//!
//! # async fn example() {
//! let params = ServerParams::new("calculator-server", Vec::<String>::new());
//! let adaptation = discover_tools(&params).await.unwrap();
//! let add = &adaptation.tools[0];
//! let sum = add.call(r#"{"a": 2, "b": 2}"#).await.unwrap();
//! # }
//! ```

pub mod types;
pub mod transport;
pub mod session;
pub mod server;
pub mod client;
pub mod adapter;
pub mod error;

pub use types::*;
pub use transport::{ChannelTransport, LineTransport, McpTransport, StdioTransport};
pub use session::{ChildSession, CloseHandle, ServerParams, SessionState, Timeouts};
pub use server::McpServer;
pub use client::{
    call_operation_once, connect_with_retry, list_operations_once, ClientState, McpClient,
};
pub use adapter::{
    adapt, discover_tools, Adaptation, SchemaAdaptationError, SharedInvoker, SpawnInvoker,
    ToolCallable, ToolInvoker,
};
pub use error::McpError;
