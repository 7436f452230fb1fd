// src/tools/handlers/mcp_dynamic.rs
// Dynamic MCP tool bridge: reflect live MCP tools into the coordinator
// under the stable <server>__mcp__<tool> naming contract

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

use super::mcp::normalize_mcp_content;
use crate::mcp::{McpServerManager, McpTool};
use crate::tools::{
    categories, param_types, ToolContext, ToolCoordinator, ToolError, ToolHandler, ToolParameter,
    ToolSpec,
};

/// Separator between server and tool name in dynamic tool names
pub const MCP_TOOL_SEPARATOR: &str = "__mcp__";

/// `drawio` + `create_diagram` -> `drawio__mcp__create_diagram`
pub fn compose_dynamic_tool_name(server_name: &str, tool_name: &str) -> String {
    format!("{}{}{}", server_name, MCP_TOOL_SEPARATOR, tool_name)
}

/// Reverse of `compose_dynamic_tool_name`; None when the name is not a
/// dynamic MCP tool.
pub fn parse_dynamic_tool_name(name: &str) -> Option<(&str, &str)> {
    name.split_once(MCP_TOOL_SEPARATOR)
}

fn map_json_type(json_type: Option<&str>) -> &'static str {
    match json_type {
        Some("object") => param_types::OBJECT,
        Some("number") => param_types::NUMBER,
        Some("integer") => param_types::INTEGER,
        Some("boolean") => param_types::BOOLEAN,
        Some("array") => param_types::ARRAY,
        _ => param_types::STRING,
    }
}

/// Build a coordinator spec from one MCP tool definition.
pub fn convert_mcp_tool_to_spec(server_name: &str, tool: &McpTool) -> ToolSpec {
    let original = tool.description.clone().unwrap_or_default();
    let description = if !original.is_empty() && original.contains(server_name) {
        original
    } else if !original.is_empty() {
        format!("[MCP: {}] {}", server_name, original)
    } else {
        format!("[MCP: {}] 调用 {} 服务器的 {} 工具", server_name, server_name, tool.name)
    };

    let mut parameters = Vec::new();
    if let Some(schema) = &tool.input_schema {
        let required: Vec<&str> = schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|items| items.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();

        if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
            for (param_name, param_def) in properties {
                parameters.push(ToolParameter {
                    name: param_name.clone(),
                    param_type: map_json_type(param_def.get("type").and_then(|t| t.as_str()))
                        .to_string(),
                    description: param_def
                        .get("description")
                        .and_then(|d| d.as_str())
                        .unwrap_or("")
                        .to_string(),
                    required: required.contains(&param_name.as_str()),
                    default: param_def.get("default").cloned(),
                });
            }
        }
    }

    ToolSpec {
        name: compose_dynamic_tool_name(server_name, &tool.name),
        description,
        category: categories::MCP_DYNAMIC.to_string(),
        parameters,
    }
}

/// Handler backing one dynamic MCP tool. Resolves (server, tool) from its
/// own name, auto-starts the server, and normalizes the result the same way
/// `use_mcp_tool` does.
pub struct DynamicMcpToolHandler {
    spec: ToolSpec,
    manager: Arc<McpServerManager>,
}

impl DynamicMcpToolHandler {
    pub fn new(spec: ToolSpec, manager: Arc<McpServerManager>) -> Self {
        Self { spec, manager }
    }
}

#[async_trait]
impl ToolHandler for DynamicMcpToolHandler {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn spec(&self) -> ToolSpec {
        self.spec.clone()
    }

    async fn execute(
        &self,
        parameters: Map<String, Value>,
        _context: &ToolContext,
    ) -> Result<Value, ToolError> {
        let Some((server_name, tool_name)) = parse_dynamic_tool_name(&self.spec.name) else {
            return Err(ToolError::Execution(format!(
                "无效的动态工具名称: {}",
                self.spec.name
            )));
        };

        let result = self
            .manager
            .execute_tool(server_name, tool_name, Value::Object(parameters))
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

/// Reconcile the coordinator's dynamic handlers with the live server set:
/// drop every `mcp_dynamic` handler, then register one handler per tool of
/// every currently-active client. Invoked after any lifecycle transition.
/// Returns the number of registered dynamic tools.
pub async fn reconcile_dynamic_tools(
    coordinator: &ToolCoordinator,
    manager: &Arc<McpServerManager>,
) -> usize {
    let removed = coordinator.unregister_category(categories::MCP_DYNAMIC);
    if !removed.is_empty() {
        info!("[TOOL] removed {} dynamic MCP tools", removed.len());
    }

    let mut registered = 0usize;
    for server_name in manager.active_server_names().await {
        let tools = match manager.list_tools(&server_name).await {
            Ok(tools) => tools,
            Err(e) => {
                warn!("[TOOL] cannot list tools of {}: {}", server_name, e);
                continue;
            }
        };

        for tool in &tools {
            let spec = convert_mcp_tool_to_spec(&server_name, tool);
            coordinator.register(Arc::new(DynamicMcpToolHandler::new(
                spec,
                Arc::clone(manager),
            )));
            registered += 1;
        }
        info!(
            "[TOOL] registered {} dynamic tools for server {}",
            tools.len(),
            server_name
        );
    }

    registered
}
