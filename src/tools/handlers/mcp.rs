// src/tools/handlers/mcp.rs
// MCP meta-tools: use_mcp_tool, access_mcp_resource, list_mcp_servers

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::mcp::McpServerManager;
use crate::tools::handler::params;
use crate::tools::{categories, ToolContext, ToolError, ToolHandler, ToolParameter, ToolSpec};

/// Normalize an MCP tool-call result's content list into plain text:
/// text items concatenate via blank lines, images and resources become
/// bracketed placeholders.
pub fn normalize_mcp_content(result: &Value) -> Value {
    let Some(content_list) = result.get("content").and_then(|c| c.as_array()) else {
        return json!(serde_json::to_string_pretty(result).unwrap_or_default());
    };

    let mut parts = Vec::new();
    for item in content_list {
        match item.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                parts.push(item.get("text").and_then(|t| t.as_str()).unwrap_or("").to_string());
            }
            Some("image") => {
                let data = item.get("data").and_then(|d| d.as_str()).unwrap_or("");
                let truncated: String = data.chars().take(50).collect();
                parts.push(format!("[图像: {}...]", truncated));
            }
            Some("resource") => {
                let resource = item.get("resource").cloned().unwrap_or(json!({}));
                parts.push(format!(
                    "[资源: {}]",
                    serde_json::to_string(&resource).unwrap_or_default()
                ));
            }
            _ => parts.push(serde_json::to_string(item).unwrap_or_default()),
        }
    }
    json!(parts.join("\n\n"))
}

// ============================================================================
// use_mcp_tool
// ============================================================================

pub struct UseMcpToolHandler {
    manager: Arc<McpServerManager>,
}

impl UseMcpToolHandler {
    pub fn new(manager: Arc<McpServerManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl ToolHandler for UseMcpToolHandler {
    fn name(&self) -> &str {
        "use_mcp_tool"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "use_mcp_tool".to_string(),
            description: concat!(
                "调用 MCP (Model Context Protocol) 服务器提供的工具。\n\n",
                "使用此工具前，你必须先调用 `list_mcp_servers` 工具来查看可用的 MCP 服务器及其工具列表。",
                "工具名称（tool_name）必须完全匹配，不要猜测或创造工具名称。"
            )
            .to_string(),
            category: categories::MCP.to_string(),
            parameters: vec![
                ToolParameter::required(
                    "server_name",
                    "string",
                    "MCP 服务器的名称（配置文件中定义的名称）",
                ),
                ToolParameter::required(
                    "tool_name",
                    "string",
                    "要调用的工具名称。必须从 `list_mcp_servers` 的返回结果中获取准确的工具名称。",
                ),
                ToolParameter::optional(
                    "arguments",
                    "string",
                    "工具参数的 JSON 字符串，例如: {\"param1\": \"value1\"}",
                    Some(json!("{}")),
                ),
            ],
        }
    }

    async fn execute(
        &self,
        parameters: Map<String, Value>,
        _context: &ToolContext,
    ) -> Result<Value, ToolError> {
        let server_name = params::required_str(&parameters, "server_name")?;
        let tool_name = params::required_str(&parameters, "tool_name")?;
        let arguments_str = params::optional_str(&parameters, "arguments", "{}");

        let arguments: Value = if arguments_str.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(arguments_str)
                .map_err(|e| ToolError::Execution(format!("参数 JSON 解析失败: {}", e)))?
        };

        if self.manager.get_server(server_name).await.is_none() {
            return Err(ToolError::Execution(format!(
                "MCP 服务器不存在: {}",
                server_name
            )));
        }

        info!("[TOOL] use_mcp_tool: {}.{}", server_name, tool_name);
        let result = self
            .manager
            .execute_tool(server_name, tool_name, arguments)
            .await;

        if !result.get("success").and_then(|s| s.as_bool()).unwrap_or(false) {
            let error = result
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("工具调用失败");
            return Err(ToolError::Execution(error.to_string()));
        }

        let tool_result = result.get("result").cloned().unwrap_or(Value::Null);
        Ok(normalize_mcp_content(&tool_result))
    }
}

// ============================================================================
// access_mcp_resource
// ============================================================================

pub struct AccessMcpResourceHandler {
    manager: Arc<McpServerManager>,
}

impl AccessMcpResourceHandler {
    pub fn new(manager: Arc<McpServerManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl ToolHandler for AccessMcpResourceHandler {
    fn name(&self) -> &str {
        "access_mcp_resource"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "access_mcp_resource".to_string(),
            description: "访问 MCP (Model Context Protocol) 服务器提供的资源。资源可以是文件、数据或其他服务器暴露的内容。".to_string(),
            category: categories::MCP.to_string(),
            parameters: vec![
                ToolParameter::required(
                    "server_name",
                    "string",
                    "MCP 服务器的名称（配置文件中定义的名称）",
                ),
                ToolParameter::required(
                    "uri",
                    "string",
                    "要读取的资源 URI，例如: file:///path/to/file 或 resource://data",
                ),
            ],
        }
    }

    async fn execute(
        &self,
        parameters: Map<String, Value>,
        _context: &ToolContext,
    ) -> Result<Value, ToolError> {
        let server_name = params::required_str(&parameters, "server_name")?;
        let uri = params::required_str(&parameters, "uri")?;

        if self.manager.get_server(server_name).await.is_none() {
            return Err(ToolError::Execution(format!(
                "MCP 服务器不存在: {}",
                server_name
            )));
        }

        if self.manager.active_client(server_name).await.is_none()
            && !self.manager.start_server(server_name).await
        {
            return Err(ToolError::Execution(format!(
                "无法启动 MCP 服务器: {}",
                server_name
            )));
        }

        info!("[TOOL] access_mcp_resource: {} {}", server_name, uri);
        let content = self
            .manager
            .read_resource(server_name, uri)
            .await
            .map_err(|e| ToolError::Execution(format!("资源读取失败: {}", e)))?;

        // Text content passes through; everything else is serialized JSON
        let data = match content.get("type").and_then(|t| t.as_str()) {
            Some("text") => json!(content.get("text").and_then(|t| t.as_str()).unwrap_or("")),
            _ => json!(serde_json::to_string_pretty(&content).unwrap_or_default()),
        };
        Ok(data)
    }
}

// ============================================================================
// list_mcp_servers
// ============================================================================

pub struct ListMcpServersHandler {
    manager: Arc<McpServerManager>,
}

impl ListMcpServersHandler {
    pub fn new(manager: Arc<McpServerManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl ToolHandler for ListMcpServersHandler {
    fn name(&self) -> &str {
        "list_mcp_servers"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "list_mcp_servers".to_string(),
            description: "列出所有可用的 MCP (Model Context Protocol) 服务器。返回每个服务器的名称、状态、可用工具和资源。".to_string(),
            category: categories::MCP.to_string(),
            parameters: vec![],
        }
    }

    async fn execute(
        &self,
        _parameters: Map<String, Value>,
        _context: &ToolContext,
    ) -> Result<Value, ToolError> {
        let configs = self.manager.list_server_configs().await;
        let mut servers_info = Vec::new();

        for (name, config) in configs {
            let status = self.manager.server_status(&name).await;
            let mut info = json!({
                "name": name,
                "description": config.description,
                "status": status.status,
                "enabled": config.enabled,
                "transport_type": config.transport_type.as_str(),
            });

            // List operations run only on connected servers
            if status.connected {
                match self.manager.list_tools(&name).await {
                    Ok(tools) => {
                        info["tools"] = json!(tools
                            .iter()
                            .map(|t| json!({
                                "name": t.name,
                                "description": t.description.clone().unwrap_or_default(),
                            }))
                            .collect::<Vec<_>>());
                    }
                    Err(e) => warn!("[TOOL] list tools failed for {}: {}", status.name, e),
                }
                match self.manager.list_resources(&name).await {
                    Ok(resources) => {
                        info["resources"] = json!(resources
                            .iter()
                            .map(|r| json!({
                                "uri": r.uri,
                                "name": r.name,
                                "description": r.description.clone().unwrap_or_default(),
                            }))
                            .collect::<Vec<_>>());
                    }
                    Err(e) => warn!("[TOOL] list resources failed for {}: {}", status.name, e),
                }
            }

            servers_info.push(info);
        }

        Ok(json!(servers_info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text_content() {
        let result = json!({
            "content": [
                {"type": "text", "text": "first"},
                {"type": "text", "text": "second"},
            ]
        });
        assert_eq!(normalize_mcp_content(&result), json!("first\n\nsecond"));
    }

    #[test]
    fn test_normalize_image_and_resource() {
        let result = json!({
            "content": [
                {"type": "image", "data": "a".repeat(100)},
                {"type": "resource", "resource": {"uri": "res://x"}},
            ]
        });
        let normalized = normalize_mcp_content(&result);
        let text = normalized.as_str().unwrap();
        assert!(text.contains("[图像: "));
        assert!(text.contains("[资源: "));
        assert!(!text.contains(&"a".repeat(100)));
    }

    #[test]
    fn test_normalize_non_content_result() {
        let result = json!({"raw": 1});
        let normalized = normalize_mcp_content(&result);
        assert!(normalized.as_str().unwrap().contains("raw"));
    }
}
