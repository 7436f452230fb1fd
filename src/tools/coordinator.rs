// src/tools/coordinator.rs
// Tool coordinator: uniform registry and dispatch for built-in and
// dynamically registered MCP tools

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

use super::handler::ToolHandler;
use super::{ToolCall, ToolContext, ToolError, ToolResult, ToolSpec};

/// Owns handler registrations. The map is mutated at startup, on explicit
/// register/unregister, and during MCP reconciliation; the engine reads a
/// snapshot per LLM call. Handlers are `Arc` so execution never holds the
/// lock across an await point.
pub struct ToolCoordinator {
    handlers: RwLock<HashMap<String, Arc<dyn ToolHandler>>>,
}

impl ToolCoordinator {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, handler: Arc<dyn ToolHandler>) {
        let name = handler.name().to_string();
        info!("[TOOL] registered: {}", name);
        self.handlers.write().insert(name, handler);
    }

    pub fn unregister(&self, tool_name: &str) {
        if self.handlers.write().remove(tool_name).is_some() {
            info!("[TOOL] unregistered: {}", tool_name);
        }
    }

    pub fn has(&self, tool_name: &str) -> bool {
        self.handlers.read().contains_key(tool_name)
    }

    pub fn get_handler(&self, tool_name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.read().get(tool_name).cloned()
    }

    /// Execute a tool call: look up, validate, run. Validation failures and
    /// handler errors both become failed results rather than panics.
    pub async fn execute(&self, tool_call: &ToolCall, context: &ToolContext) -> ToolResult {
        let Some(handler) = self.get_handler(&tool_call.name) else {
            error!("[TOOL] unknown tool: {}", tool_call.name);
            return ToolResult::fail(format!("未知工具: {}", tool_call.name));
        };

        let validated = match handler.validate(&tool_call.parameters) {
            Ok(params) => params,
            Err(e) => {
                error!("[TOOL] {} validation failed: {}", tool_call.name, e);
                return ToolResult::fail(e.to_string());
            }
        };

        match handler.execute(validated, context).await {
            Ok(data) => ToolResult::ok(data),
            Err(e) => {
                error!("[TOOL] {} failed: {}", tool_call.name, e);
                ToolResult::fail(e.to_string())
            }
        }
    }

    /// All registered specs, sorted by name for stable prompt output.
    pub fn list_tools(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .handlers
            .read()
            .values()
            .map(|h| h.spec())
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn list_tools_by_category(&self, category: &str) -> Vec<ToolSpec> {
        self.list_tools()
            .into_iter()
            .filter(|spec| spec.category == category)
            .collect()
    }

    /// Remove every handler in a category; returns the removed names.
    pub fn unregister_category(&self, category: &str) -> Vec<String> {
        let names: Vec<String> = self
            .list_tools_by_category(category)
            .into_iter()
            .map(|spec| spec.name)
            .collect();
        for name in &names {
            self.unregister(name);
        }
        names
    }

    /// Register the built-in tool set.
    pub fn initialize_default_tools(&self, mcp_manager: Arc<crate::mcp::McpServerManager>) {
        use super::handlers;

        self.register(Arc::new(handlers::file::FileReadHandler));
        self.register(Arc::new(handlers::file::FileListHandler));
        self.register(Arc::new(handlers::write::WriteToFileHandler));
        self.register(Arc::new(handlers::write::ReplaceInFileHandler));

        self.register(Arc::new(handlers::git::GitDiffHandler));
        self.register(Arc::new(handlers::git::GitLogHandler));
        self.register(Arc::new(handlers::git::GitStatusHandler));
        self.register(Arc::new(handlers::git::GitBranchHandler));

        self.register(Arc::new(handlers::search::SearchFilesHandler));
        self.register(Arc::new(handlers::code::ListCodeDefinitionsHandler));

        self.register(Arc::new(handlers::completion::AttemptCompletionHandler));

        self.register(Arc::new(handlers::mcp::UseMcpToolHandler::new(
            Arc::clone(&mcp_manager),
        )));
        self.register(Arc::new(handlers::mcp::AccessMcpResourceHandler::new(
            Arc::clone(&mcp_manager),
        )));
        self.register(Arc::new(handlers::mcp::ListMcpServersHandler::new(
            mcp_manager,
        )));

        info!(
            "[TOOL] default tools initialized, {} registered",
            self.handlers.read().len()
        );
    }
}

impl Default for ToolCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
