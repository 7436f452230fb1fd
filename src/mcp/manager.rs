// src/mcp/manager.rs
// MCP server manager: configured-server registry, lifecycle, connection
// testing, multiplexed tool/resource/prompt calls

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use super::client::{ClientError, McpClient};
use super::protocol::{McpPrompt, McpResource, McpTool};
use super::transport::{HttpTransport, McpTransport, StdioTransport, WebSocketTransport};

/// Pause between stop and start on restart
const RESTART_DELAY: Duration = Duration::from_millis(500);

fn default_true() -> bool {
    true
}

/// Transport selection for a configured server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    #[default]
    Stdio,
    Http,
    Websocket,
}

impl TransportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportType::Stdio => "stdio",
            TransportType::Http => "http",
            TransportType::Websocket => "websocket",
        }
    }
}

/// Persisted configuration of one MCP server.
/// Stored as a JSON map keyed by server name.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpServerConfig {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "transportType")]
    pub transport_type: TransportType,
}

impl McpServerConfig {
    fn build_transport(&self) -> Arc<dyn McpTransport> {
        match self.transport_type {
            TransportType::Stdio => Arc::new(StdioTransport::new(
                self.command.clone(),
                self.args.clone(),
                self.env.clone(),
                None,
            )),
            TransportType::Http => {
                Arc::new(HttpTransport::new(self.url.clone(), self.headers.clone()))
            }
            TransportType::Websocket => {
                Arc::new(WebSocketTransport::new(self.url.clone(), self.headers.clone()))
            }
        }
    }
}

/// Status report for one server (UI-facing)
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub status: String,
    pub connected: bool,
    pub initialized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

/// Manages MCP server configurations and their live clients.
///
/// The `servers` map is the persisted registry; `active` holds one client
/// per running server. Per-server locks serialize overlapping lifecycle
/// transitions on the same server.
pub struct McpServerManager {
    config_path: PathBuf,
    servers: RwLock<HashMap<String, McpServerConfig>>,
    active: RwLock<HashMap<String, Arc<McpClient>>>,
    lifecycle_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl McpServerManager {
    pub fn new(config_path: PathBuf) -> Self {
        Self {
            config_path,
            servers: RwLock::new(HashMap::new()),
            active: RwLock::new(HashMap::new()),
            lifecycle_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Load the persisted server map; missing file means empty registry.
    pub async fn load(&self) -> anyhow::Result<()> {
        if !self.config_path.exists() {
            return Ok(());
        }
        let content = tokio::fs::read_to_string(&self.config_path).await?;
        let servers: HashMap<String, McpServerConfig> = serde_json::from_str(&content)?;
        info!("[MCP] loaded {} server configurations", servers.len());
        *self.servers.write().await = servers;
        Ok(())
    }

    async fn save(&self) {
        let servers = self.servers.read().await.clone();
        if let Some(parent) = self.config_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                error!("[MCP] failed to create config dir: {}", e);
                return;
            }
        }
        match serde_json::to_string_pretty(&servers) {
            Ok(data) => {
                if let Err(e) = tokio::fs::write(&self.config_path, data).await {
                    error!("[MCP] failed to save server configurations: {}", e);
                }
            }
            Err(e) => error!("[MCP] failed to serialize server configurations: {}", e),
        }
    }

    async fn lifecycle_lock(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.lifecycle_locks.lock().await;
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    // ------------------------------------------------------------------
    // Registry operations
    // ------------------------------------------------------------------

    pub async fn add_server(&self, name: &str, config: McpServerConfig) {
        self.servers.write().await.insert(name.to_string(), config);
        self.save().await;
        info!("[MCP] added server: {}", name);
    }

    /// Update a configured server; a running server is restarted so the new
    /// configuration takes effect.
    pub async fn update_server(&self, name: &str, config: McpServerConfig) -> bool {
        let exists = self.servers.read().await.contains_key(name);
        if !exists {
            return false;
        }
        self.servers.write().await.insert(name.to_string(), config);
        self.save().await;
        info!("[MCP] updated server: {}", name);

        if self.is_active(name).await {
            let _ = self.restart_server(name).await;
        }
        true
    }

    pub async fn remove_server(&self, name: &str) -> bool {
        if self.is_active(name).await {
            let _ = self.stop_server(name).await;
        }
        let removed = self.servers.write().await.remove(name).is_some();
        if removed {
            self.save().await;
            info!("[MCP] removed server: {}", name);
        }
        removed
    }

    pub async fn get_server(&self, name: &str) -> Option<McpServerConfig> {
        self.servers.read().await.get(name).cloned()
    }

    pub async fn list_server_configs(&self) -> HashMap<String, McpServerConfig> {
        self.servers.read().await.clone()
    }

    pub async fn is_active(&self, name: &str) -> bool {
        self.active.read().await.contains_key(name)
    }

    pub async fn active_server_names(&self) -> Vec<String> {
        self.active.read().await.keys().cloned().collect()
    }

    pub async fn active_client(&self, name: &str) -> Option<Arc<McpClient>> {
        self.active.read().await.get(name).cloned()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start a configured server. Idempotent if already running. Does not
    /// consult `enabled`; boot-time policy and the toggle API decide that.
    /// On failure no state changes and `false` is returned.
    pub async fn start_server(&self, name: &str) -> bool {
        let lock = self.lifecycle_lock(name).await;
        let _guard = lock.lock().await;

        if self.is_active(name).await {
            warn!("[MCP] server {} is already running", name);
            return true;
        }

        let Some(config) = self.get_server(name).await else {
            error!("[MCP] server configuration not found: {}", name);
            return false;
        };

        info!("[MCP] starting server: {}", name);
        let transport = config.build_transport();
        let client = Arc::new(McpClient::new(name.to_string(), transport));

        if let Err(e) = client.connect().await {
            error!("[MCP] failed to connect {}: {}", name, e);
            return false;
        }
        if let Err(e) = client.initialize().await {
            error!("[MCP] failed to initialize {}: {}", name, e);
            let _ = client.disconnect().await;
            return false;
        }

        self.active.write().await.insert(name.to_string(), client);
        info!("[MCP] server started: {}", name);
        true
    }

    /// Stop a running server. Idempotent if inactive.
    pub async fn stop_server(&self, name: &str) -> bool {
        let lock = self.lifecycle_lock(name).await;
        let _guard = lock.lock().await;

        let Some(client) = self.active.write().await.remove(name) else {
            warn!("[MCP] server {} is not running", name);
            return true;
        };

        if let Err(e) = client.disconnect().await {
            error!("[MCP] error stopping {}: {}", name, e);
        }
        info!("[MCP] server stopped: {}", name);
        true
    }

    pub async fn restart_server(&self, name: &str) -> bool {
        self.stop_server(name).await;
        tokio::time::sleep(RESTART_DELAY).await;
        self.start_server(name).await
    }

    /// On application boot: start every enabled server so the prompt
    /// builder can enumerate ready servers.
    pub async fn start_enabled_servers(&self) {
        let configs = self.list_server_configs().await;
        for (name, config) in configs {
            if !config.enabled {
                continue;
            }
            if !self.start_server(&name).await {
                warn!("[MCP] enabled server {} failed to start at boot", name);
            }
        }
    }

    pub async fn stop_all_servers(&self) {
        let names = self.active_server_names().await;
        for name in names {
            self.stop_server(&name).await;
        }
        info!("[MCP] all servers stopped");
    }

    // ------------------------------------------------------------------
    // Status and testing
    // ------------------------------------------------------------------

    pub async fn server_status(&self, name: &str) -> ServerStatus {
        let config = self.get_server(name).await;
        let client = self.active_client(name).await;

        let Some(config) = config else {
            return ServerStatus {
                name: name.to_string(),
                status: "not_configured".to_string(),
                connected: false,
                initialized: false,
                server_info: None,
                config: None,
            };
        };

        let connected = client.as_ref().map(|c| c.is_connected()).unwrap_or(false);
        let initialized = client.as_ref().map(|c| c.is_initialized()).unwrap_or(false);
        let status = if connected { "running" } else { "stopped" };

        let server_info = match &client {
            Some(c) => c.server_info().await.map(|info| {
                json!({
                    "name": info.name,
                    "version": info.version,
                    "protocol_version": info.protocol_version,
                })
            }),
            None => None,
        };

        ServerStatus {
            name: name.to_string(),
            status: status.to_string(),
            connected,
            initialized,
            server_info,
            config: Some(json!({
                "description": config.description,
                "transportType": config.transport_type.as_str(),
                "enabled": config.enabled,
            })),
        }
    }

    pub async fn all_server_statuses(&self) -> Vec<ServerStatus> {
        let names: Vec<String> = self.servers.read().await.keys().cloned().collect();
        let mut statuses = Vec::with_capacity(names.len());
        for name in names {
            statuses.push(self.server_status(&name).await);
        }
        statuses
    }

    /// Test a raw configuration with a temporary client, without touching
    /// the active set. Used by the UI config screen.
    pub async fn test_server_connection(&self, config: &McpServerConfig) -> Value {
        let transport = config.build_transport();
        let client = McpClient::new("test".to_string(), transport);

        let result = async {
            client
                .connect()
                .await
                .map_err(|e| format!("连接失败: {}", e))?;
            let info = client
                .initialize()
                .await
                .map_err(|e| format!("初始化失败: {}", e))?;

            let tools = client.list_tools(false).await.unwrap_or_default();
            let resources = client.list_resources(false).await.unwrap_or_default();
            let prompts = client.list_prompts(false).await.unwrap_or_default();

            Ok::<Value, String>(json!({
                "success": true,
                "message": format!(
                    "连接测试成功！服务器: {}, 工具数: {}, 资源数: {}, 提示词数: {}",
                    info.name, tools.len(), resources.len(), prompts.len()
                ),
                "server_info": {
                    "name": info.name,
                    "version": info.version,
                    "protocol_version": info.protocol_version,
                },
                "tools": tools,
                "resources": resources,
                "prompts": prompts,
            }))
        }
        .await;

        let _ = client.disconnect().await;

        match result {
            Ok(report) => report,
            Err(message) => json!({
                "success": false,
                "message": format!("连接测试失败: {}", message),
                "tools": [],
                "resources": [],
                "prompts": [],
            }),
        }
    }

    // ------------------------------------------------------------------
    // Multiplexed capability operations
    // ------------------------------------------------------------------

    /// Execute a tool on a server, auto-starting it when inactive.
    pub async fn execute_tool(&self, server_name: &str, tool_name: &str, arguments: Value) -> Value {
        let client = match self.active_client(server_name).await {
            Some(c) => c,
            None => {
                if !self.start_server(server_name).await {
                    return json!({
                        "success": false,
                        "error": format!("无法启动 MCP 服务器: {}", server_name)
                    });
                }
                match self.active_client(server_name).await {
                    Some(c) => c,
                    None => {
                        return json!({
                            "success": false,
                            "error": format!("无法启动 MCP 服务器: {}", server_name)
                        })
                    }
                }
            }
        };

        match client.call_tool(tool_name, arguments).await {
            Ok(result) => json!({ "success": true, "result": result }),
            Err(e) => json!({ "success": false, "error": e.to_string() }),
        }
    }

    pub async fn list_tools(&self, server_name: &str) -> Result<Vec<McpTool>, ClientError> {
        let client = self
            .active_client(server_name)
            .await
            .ok_or_else(|| ClientError::Connection(format!("server not running: {}", server_name)))?;
        client.list_tools(true).await
    }

    pub async fn list_resources(&self, server_name: &str) -> Result<Vec<McpResource>, ClientError> {
        let client = self
            .active_client(server_name)
            .await
            .ok_or_else(|| ClientError::Connection(format!("server not running: {}", server_name)))?;
        client.list_resources(true).await
    }

    pub async fn read_resource(&self, server_name: &str, uri: &str) -> Result<Value, ClientError> {
        let client = self
            .active_client(server_name)
            .await
            .ok_or_else(|| ClientError::Connection(format!("server not running: {}", server_name)))?;
        client.read_resource(uri).await
    }

    pub async fn list_prompts(&self, server_name: &str) -> Result<Vec<McpPrompt>, ClientError> {
        let client = self
            .active_client(server_name)
            .await
            .ok_or_else(|| ClientError::Connection(format!("server not running: {}", server_name)))?;
        client.list_prompts(true).await
    }

    pub async fn get_prompt(
        &self,
        server_name: &str,
        prompt_name: &str,
        arguments: Option<Value>,
    ) -> Result<Value, ClientError> {
        let client = self
            .active_client(server_name)
            .await
            .ok_or_else(|| ClientError::Connection(format!("server not running: {}", server_name)))?;
        client.get_prompt(prompt_name, arguments).await
    }
}
