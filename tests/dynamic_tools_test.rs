// tests/dynamic_tools_test.rs
// Dynamic MCP tool bridge: naming contract, schema conversion, and
// reconciliation against the (empty) live server set

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use repolens::mcp::{McpServerManager, McpTool};
use repolens::tools::handlers::mcp_dynamic::{
    compose_dynamic_tool_name, convert_mcp_tool_to_spec, parse_dynamic_tool_name,
    reconcile_dynamic_tools, DynamicMcpToolHandler, MCP_TOOL_SEPARATOR,
};
use repolens::tools::ToolCoordinator;

#[test]
fn test_naming_contract_round_trip() {
    let composed = compose_dynamic_tool_name("drawio", "create_new_diagram");
    assert_eq!(composed, format!("drawio{}create_new_diagram", MCP_TOOL_SEPARATOR));
    assert_eq!(
        parse_dynamic_tool_name(&composed),
        Some(("drawio", "create_new_diagram"))
    );
    assert_eq!(parse_dynamic_tool_name("attempt_completion"), None);
}

#[tokio::test]
async fn test_reconcile_with_no_active_servers_clears_category() {
    let dir = TempDir::new().unwrap();
    let manager = Arc::new(McpServerManager::new(dir.path().join("mcp.json")));
    let coordinator = ToolCoordinator::new();

    // Seed a stale dynamic handler, as if a server had been running
    let stale_spec = convert_mcp_tool_to_spec(
        "drawio",
        &McpTool {
            name: "create".to_string(),
            description: None,
            input_schema: None,
        },
    );
    coordinator.register(Arc::new(DynamicMcpToolHandler::new(
        stale_spec,
        Arc::clone(&manager),
    )));
    assert_eq!(coordinator.list_tools_by_category("mcp_dynamic").len(), 1);

    // Invariant 4: after reconciliation the dynamic set equals the tools of
    // the active clients; with no active clients it is empty
    let registered = reconcile_dynamic_tools(&coordinator, &manager).await;
    assert_eq!(registered, 0);
    assert!(coordinator.list_tools_by_category("mcp_dynamic").is_empty());
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let manager = Arc::new(McpServerManager::new(dir.path().join("mcp.json")));
    let coordinator = ToolCoordinator::new();

    let first = reconcile_dynamic_tools(&coordinator, &manager).await;
    let second = reconcile_dynamic_tools(&coordinator, &manager).await;
    assert_eq!(first, second);
    assert!(coordinator.list_tools_by_category("mcp_dynamic").is_empty());
}

#[test]
fn test_schema_conversion_required_and_defaults() {
    let tool = McpTool {
        name: "render".to_string(),
        description: Some("Render a chart".to_string()),
        input_schema: Some(json!({
            "type": "object",
            "properties": {
                "spec": {"type": "object", "description": "chart spec"},
                "scale": {"type": "number", "default": 1.0},
            },
            "required": ["spec"]
        })),
    };

    let spec = convert_mcp_tool_to_spec("charts", &tool);
    assert_eq!(spec.name, "charts__mcp__render");
    assert_eq!(spec.description, "[MCP: charts] Render a chart");

    let spec_param = spec.parameter("spec").unwrap();
    assert!(spec_param.required);
    assert_eq!(spec_param.param_type, "object");

    let scale = spec.parameter("scale").unwrap();
    assert!(!scale.required);
    assert_eq!(scale.param_type, "number");
    assert_eq!(scale.default, Some(json!(1.0)));
}

#[test]
fn test_dynamic_specs_render_into_function_schemas() {
    let tool = McpTool {
        name: "snap".to_string(),
        description: None,
        input_schema: Some(json!({
            "type": "object",
            "properties": {"url": {"type": "string"}},
            "required": ["url"]
        })),
    };
    let spec = convert_mcp_tool_to_spec("browser", &tool);
    let func = repolens::tools::converter::spec_to_openai_function(&spec);

    assert_eq!(func["function"]["name"], "browser__mcp__snap");
    assert_eq!(func["function"]["parameters"]["required"], json!(["url"]));
}
