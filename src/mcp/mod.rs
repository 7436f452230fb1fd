// src/mcp/mod.rs
// Model Context Protocol (MCP) client subsystem: JSON-RPC codec, transports,
// client, and the configured-server manager

pub mod client;
pub mod manager;
pub mod protocol;
pub mod transport;

pub use client::{ClientError, McpClient, PROTOCOL_VERSION};
pub use manager::{McpServerConfig, McpServerManager, ServerStatus, TransportType};
pub use protocol::{
    JsonRpcCodec, JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, McpPrompt, McpResource, McpServerInfo, McpTool,
};
pub use transport::{
    HttpTransport, McpTransport, OutboundMessage, StdioTransport, TransportError,
    WebSocketTransport,
};
