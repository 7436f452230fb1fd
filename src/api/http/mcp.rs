// src/api/http/mcp.rs
// MCP server management endpoints. Every lifecycle transition ends with a
// dynamic-tool reconciliation so the model-visible catalog tracks the
// running server set.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use tracing::info;

use crate::mcp::McpServerConfig;
use crate::state::AppState;
use crate::tools::handlers::mcp_dynamic::reconcile_dynamic_tools;

async fn reconcile(state: &AppState) -> usize {
    reconcile_dynamic_tools(&state.coordinator, &state.mcp_manager).await
}

/// GET /api/mcp/servers
pub async fn list_servers(State(state): State<AppState>) -> Json<Value> {
    let statuses = state.mcp_manager.all_server_statuses().await;
    Json(json!({ "servers": statuses }))
}

/// POST /api/mcp/servers  body: {"name": ..., ...config}
pub async fn add_server(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    let name = body
        .get("name")
        .and_then(|n| n.as_str())
        .ok_or(StatusCode::BAD_REQUEST)?
        .to_string();
    let config: McpServerConfig =
        serde_json::from_value(body).map_err(|_| StatusCode::BAD_REQUEST)?;

    state.mcp_manager.add_server(&name, config).await;
    Ok(Json(json!({ "success": true, "name": name })))
}

/// PUT /api/mcp/servers/{name}
pub async fn update_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    let config: McpServerConfig =
        serde_json::from_value(body).map_err(|_| StatusCode::BAD_REQUEST)?;

    if !state.mcp_manager.update_server(&name, config).await {
        return Err(StatusCode::NOT_FOUND);
    }
    let registered = reconcile(&state).await;
    Ok(Json(json!({ "success": true, "name": name, "dynamic_tools": registered })))
}

/// DELETE /api/mcp/servers/{name}
pub async fn remove_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    if !state.mcp_manager.remove_server(&name).await {
        return Err(StatusCode::NOT_FOUND);
    }
    let registered = reconcile(&state).await;
    Ok(Json(json!({ "success": true, "name": name, "dynamic_tools": registered })))
}

/// GET /api/mcp/servers/{name}/status
pub async fn server_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Json<Value> {
    let status = state.mcp_manager.server_status(&name).await;
    Json(serde_json::to_value(status).unwrap_or(json!({})))
}

/// POST /api/mcp/servers/{name}/start
pub async fn start_server(State(state): State<AppState>, Path(name): Path<String>) -> Json<Value> {
    let success = state.mcp_manager.start_server(&name).await;
    let registered = reconcile(&state).await;
    Json(json!({ "success": success, "name": name, "dynamic_tools": registered }))
}

/// POST /api/mcp/servers/{name}/stop
pub async fn stop_server(State(state): State<AppState>, Path(name): Path<String>) -> Json<Value> {
    let success = state.mcp_manager.stop_server(&name).await;
    let registered = reconcile(&state).await;
    Json(json!({ "success": success, "name": name, "dynamic_tools": registered }))
}

/// POST /api/mcp/servers/{name}/restart
pub async fn restart_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Json<Value> {
    let success = state.mcp_manager.restart_server(&name).await;
    let registered = reconcile(&state).await;
    Json(json!({ "success": success, "name": name, "dynamic_tools": registered }))
}

/// POST /api/mcp/servers/{name}/toggle — flip `enabled` and align the
/// running state with it.
pub async fn toggle_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let Some(mut config) = state.mcp_manager.get_server(&name).await else {
        return Err(StatusCode::NOT_FOUND);
    };

    config.enabled = !config.enabled;
    let enabled = config.enabled;
    state.mcp_manager.add_server(&name, config).await;

    let success = if enabled {
        state.mcp_manager.start_server(&name).await
    } else {
        state.mcp_manager.stop_server(&name).await
    };
    let registered = reconcile(&state).await;

    info!("[API] toggled MCP server {} -> enabled={}", name, enabled);
    Ok(Json(json!({
        "success": success,
        "name": name,
        "enabled": enabled,
        "dynamic_tools": registered,
    })))
}

/// POST /api/mcp/test — test a raw config without touching the active set.
pub async fn test_server(
    State(state): State<AppState>,
    Json(config): Json<McpServerConfig>,
) -> Json<Value> {
    Json(state.mcp_manager.test_server_connection(&config).await)
}
