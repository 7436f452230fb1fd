// src/mcp/client.rs
// MCP client: request/response correlation, initialization handshake,
// capability operations with cached listings

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::protocol::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, McpPrompt, McpResource,
    McpServerInfo, McpTool,
};
use super::transport::{McpTransport, OutboundMessage, TransportError};

/// MCP protocol version this client negotiates
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Default per-request timeout
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// MCP protocol-level error
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Initialization failed: {0}")]
    Initialization(String),
    #[error("Request timeout: {0}")]
    Timeout(String),
    #[error("Server error {code}: {message}")]
    Server { code: i32, message: String },
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<JsonRpcResponse>>>>;

/// One client per running MCP server. Owns the transport and a background
/// reader that completes pending requests.
pub struct McpClient {
    pub server_name: String,
    transport: Arc<dyn McpTransport>,
    timeout: Duration,
    initialized: AtomicBool,
    server_info: RwLock<Option<McpServerInfo>>,
    pending: PendingMap,
    reader: Mutex<Option<JoinHandle<()>>>,
    tools_cache: RwLock<Option<Vec<McpTool>>>,
    resources_cache: RwLock<Option<Vec<McpResource>>>,
    prompts_cache: RwLock<Option<Vec<McpPrompt>>>,
}

impl McpClient {
    pub fn new(server_name: String, transport: Arc<dyn McpTransport>) -> Self {
        Self {
            server_name,
            transport,
            timeout: REQUEST_TIMEOUT,
            initialized: AtomicBool::new(false),
            server_info: RwLock::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
            reader: Mutex::new(None),
            tools_cache: RwLock::new(None),
            resources_cache: RwLock::new(None),
            prompts_cache: RwLock::new(None),
        }
    }

    /// Connect the transport and start the background reader.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.transport
            .connect()
            .await
            .map_err(|e| ClientError::Connection(e.to_string()))?;

        let transport = Arc::clone(&self.transport);
        let pending = Arc::clone(&self.pending);
        let server_name = self.server_name.clone();

        let handle = tokio::spawn(async move {
            loop {
                match transport.receive().await {
                    Ok(JsonRpcMessage::Response(response)) => {
                        let key = response.id_key();
                        let sender = pending.lock().await.remove(&key);
                        match sender {
                            Some(tx) => {
                                let _ = tx.send(response);
                            }
                            None => {
                                warn!("[MCP:{}] response for unknown request: {}", server_name, key)
                            }
                        }
                    }
                    Ok(JsonRpcMessage::Notification(notification)) => {
                        debug!("[MCP:{}] notification: {}", server_name, notification.method);
                    }
                    Ok(JsonRpcMessage::Request(request)) => {
                        // Server-initiated requests (e.g. sampling) are not handled
                        warn!("[MCP:{}] unexpected server request: {}", server_name, request.method);
                    }
                    Err(TransportError::Closed) => {
                        debug!("[MCP:{}] transport closed, reader exiting", server_name);
                        break;
                    }
                    Err(e) => {
                        if !transport.is_connected() {
                            debug!("[MCP:{}] reader exiting: {}", server_name, e);
                            break;
                        }
                        warn!("[MCP:{}] receive error: {}", server_name, e);
                    }
                }
            }
        });

        *self.reader.lock().await = Some(handle);
        info!("[MCP:{}] connected", self.server_name);
        Ok(())
    }

    /// Disconnect the transport, stop the reader and drop cached listings.
    /// The reader is stopped first so it cannot hold transport locks while
    /// the shutdown sequence runs.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.initialized.store(false, Ordering::SeqCst);
        self.invalidate_cache().await;

        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }
        self.transport.disconnect().await?;
        self.pending.lock().await.clear();
        info!("[MCP:{}] disconnected", self.server_name);
        Ok(())
    }

    /// Initialization handshake, once per connect.
    pub async fn initialize(&self) -> Result<McpServerInfo, ClientError> {
        if self.initialized.load(Ordering::SeqCst) {
            if let Some(info) = self.server_info.read().await.clone() {
                return Ok(info);
            }
        }

        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "roots": { "listChanged": true },
                "sampling": {}
            },
            "clientInfo": {
                "name": "repolens",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let result = self
            .send_request("initialize", Some(params))
            .await
            .map_err(|e| ClientError::Initialization(e.to_string()))?;

        let info = McpServerInfo {
            name: result
                .pointer("/serverInfo/name")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string(),
            version: result
                .pointer("/serverInfo/version")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string(),
            protocol_version: result
                .get("protocolVersion")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string(),
            capabilities: result.get("capabilities").cloned().unwrap_or(json!({})),
        };

        self.send_notification("notifications/initialized", None)
            .await;
        self.initialized.store(true, Ordering::SeqCst);
        *self.server_info.write().await = Some(info.clone());

        info!(
            "[MCP:{}] initialized: {} v{} (protocol {})",
            self.server_name, info.name, info.version, info.protocol_version
        );
        Ok(info)
    }

    /// Send a request and await the correlated response.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, ClientError> {
        let request = JsonRpcRequest::new(method, params);
        let key = request.id_key();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(key.clone(), tx);

        debug!("[MCP:{}] -> {} (id={})", self.server_name, method, key);

        if let Err(e) = self.transport.send(&OutboundMessage::Request(request)).await {
            self.pending.lock().await.remove(&key);
            return Err(ClientError::Transport(e));
        }

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(ClientError::Protocol(format!(
                    "response channel closed: {}",
                    method
                )))
            }
            Err(_) => {
                self.pending.lock().await.remove(&key);
                return Err(ClientError::Timeout(method.to_string()));
            }
        };

        if let Some(error) = response.error {
            return Err(ClientError::Server {
                code: error.code,
                message: error.message,
            });
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Fire-and-forget notification.
    pub async fn send_notification(&self, method: &str, params: Option<Value>) {
        let notification = JsonRpcNotification::new(method, params);
        if let Err(e) = self
            .transport
            .send(&OutboundMessage::Notification(notification))
            .await
        {
            warn!("[MCP:{}] failed to send notification {}: {}", self.server_name, method, e);
        }
    }

    // ------------------------------------------------------------------
    // Capability operations
    // ------------------------------------------------------------------

    pub async fn list_tools(&self, use_cache: bool) -> Result<Vec<McpTool>, ClientError> {
        if use_cache {
            if let Some(cached) = self.tools_cache.read().await.clone() {
                return Ok(cached);
            }
        }

        let result = self.send_request("tools/list", None).await?;
        let tools: Vec<McpTool> = result
            .get("tools")
            .and_then(|t| t.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();

        debug!("[MCP:{}] listed {} tools", self.server_name, tools.len());
        *self.tools_cache.write().await = Some(tools.clone());
        Ok(tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ClientError> {
        info!("[MCP:{}] calling tool: {}", self.server_name, name);
        self.send_request(
            "tools/call",
            Some(json!({ "name": name, "arguments": arguments })),
        )
        .await
    }

    pub async fn list_resources(&self, use_cache: bool) -> Result<Vec<McpResource>, ClientError> {
        if use_cache {
            if let Some(cached) = self.resources_cache.read().await.clone() {
                return Ok(cached);
            }
        }

        let result = self.send_request("resources/list", None).await?;
        let resources: Vec<McpResource> = result
            .get("resources")
            .and_then(|r| r.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();

        *self.resources_cache.write().await = Some(resources.clone());
        Ok(resources)
    }

    /// Read a resource; returns the first content item.
    pub async fn read_resource(&self, uri: &str) -> Result<Value, ClientError> {
        let result = self
            .send_request("resources/read", Some(json!({ "uri": uri })))
            .await?;

        let content = result
            .get("contents")
            .and_then(|c| c.as_array())
            .and_then(|items| items.first())
            .cloned()
            .unwrap_or(Value::Null);
        Ok(content)
    }

    pub async fn list_prompts(&self, use_cache: bool) -> Result<Vec<McpPrompt>, ClientError> {
        if use_cache {
            if let Some(cached) = self.prompts_cache.read().await.clone() {
                return Ok(cached);
            }
        }

        let result = self.send_request("prompts/list", None).await?;
        let prompts: Vec<McpPrompt> = result
            .get("prompts")
            .and_then(|p| p.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();

        *self.prompts_cache.write().await = Some(prompts.clone());
        Ok(prompts)
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<Value, ClientError> {
        let mut params = json!({ "name": name });
        if let Some(args) = arguments {
            params["arguments"] = args;
        }
        self.send_request("prompts/get", Some(params)).await
    }

    pub async fn invalidate_cache(&self) {
        *self.tools_cache.write().await = None;
        *self.resources_cache.write().await = None;
        *self.prompts_cache.write().await = None;
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub async fn server_info(&self) -> Option<McpServerInfo> {
        self.server_info.read().await.clone()
    }
}
