// src/api/http/mod.rs
// Axum router wiring for the UI-facing API

pub mod chat;
pub mod health;
pub mod mcp;
pub mod sessions;

use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health::health))
        // Task execution (SSE)
        .route("/api/tasks/execute", post(chat::execute_task))
        .route("/api/ai/test", post(chat::test_ai_connection))
        // Session / task history
        .route("/api/sessions", get(sessions::list_tasks))
        .route("/api/sessions/{task_id}", get(sessions::load_task))
        .route("/api/sessions/{task_id}", delete(sessions::delete_task))
        .route("/api/sessions/{task_id}/favorite", post(sessions::toggle_favorite))
        // MCP server management
        .route("/api/mcp/servers", get(mcp::list_servers))
        .route("/api/mcp/servers", post(mcp::add_server))
        .route("/api/mcp/servers/{name}", put(mcp::update_server))
        .route("/api/mcp/servers/{name}", delete(mcp::remove_server))
        .route("/api/mcp/servers/{name}/status", get(mcp::server_status))
        .route("/api/mcp/servers/{name}/start", post(mcp::start_server))
        .route("/api/mcp/servers/{name}/stop", post(mcp::stop_server))
        .route("/api/mcp/servers/{name}/restart", post(mcp::restart_server))
        .route("/api/mcp/servers/{name}/toggle", post(mcp::toggle_server))
        .route("/api/mcp/test", post(mcp::test_server))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
