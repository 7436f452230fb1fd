// src/state.rs
// Application state shared across handlers; replaces module-level
// singletons with injected services

use std::sync::Arc;

use crate::llm::AiManager;
use crate::mcp::McpServerManager;
use crate::task::TaskEngine;
use crate::tools::ToolCoordinator;

#[derive(Clone)]
pub struct AppState {
    pub ai_manager: Arc<AiManager>,
    pub coordinator: Arc<ToolCoordinator>,
    pub mcp_manager: Arc<McpServerManager>,
    pub engine: Arc<TaskEngine>,
}

impl AppState {
    pub fn new(mcp_config_path: std::path::PathBuf) -> Self {
        let ai_manager = Arc::new(AiManager::new());
        let mcp_manager = Arc::new(McpServerManager::new(mcp_config_path));
        let coordinator = Arc::new(ToolCoordinator::new());
        coordinator.initialize_default_tools(Arc::clone(&mcp_manager));

        let engine = Arc::new(TaskEngine::new(
            Arc::clone(&ai_manager),
            Arc::clone(&coordinator),
            Arc::clone(&mcp_manager),
        ));

        Self {
            ai_manager,
            coordinator,
            mcp_manager,
            engine,
        }
    }

    /// Boot-time MCP policy: load configs, start enabled servers, and
    /// reconcile the dynamic tool registry.
    pub async fn initialize_mcp(&self) {
        if let Err(e) = self.mcp_manager.load().await {
            tracing::error!("[APP] failed to load MCP config: {}", e);
        }
        self.mcp_manager.start_enabled_servers().await;
        crate::tools::handlers::mcp_dynamic::reconcile_dynamic_tools(
            &self.coordinator,
            &self.mcp_manager,
        )
        .await;
    }
}
