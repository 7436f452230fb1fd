// src/tools/mod.rs
// Tool system: typed specs, handler trait, coordinator, schema conversion

pub mod converter;
pub mod coordinator;
pub mod handler;
pub mod handlers;

pub use converter::{parse_tool_call_arguments, tools_to_openai_functions};
pub use coordinator::ToolCoordinator;
pub use handler::ToolHandler;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use thiserror::Error;

use crate::llm::AiConfig;

/// Tool categories (stored as strings in specs)
pub mod categories {
    pub const FILE: &str = "file";
    pub const GIT: &str = "git";
    pub const SEARCH: &str = "search";
    pub const ANALYSIS: &str = "analysis";
    pub const COMPLETION: &str = "completion";
    pub const MCP: &str = "mcp";
    pub const MCP_DYNAMIC: &str = "mcp_dynamic";
}

/// Parameter types accepted by tool specs
pub mod param_types {
    pub const STRING: &str = "string";
    pub const INTEGER: &str = "integer";
    pub const NUMBER: &str = "number";
    pub const BOOLEAN: &str = "boolean";
    pub const ARRAY: &str = "array";
    pub const OBJECT: &str = "object";
}

/// Tool parameter definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ToolParameter {
    pub fn required(name: &str, param_type: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type: param_type.to_string(),
            description: description.to_string(),
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &str, param_type: &str, description: &str, default: Option<Value>) -> Self {
        Self {
            name: name.to_string(),
            param_type: param_type.to_string(),
            description: description.to_string(),
            required: false,
            default,
        }
    }
}

/// Immutable tool specification. Parameter order is preserved for the
/// prompt catalog, so parameters are a Vec rather than a map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub category: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolSpec {
    pub fn parameter(&self, name: &str) -> Option<&ToolParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// A tool call emitted by the LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub parameters: Map<String, Value>,
}

/// Result of a tool execution. Used both as the engine's return value and
/// as feedback content for the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata: None,
        }
    }

    pub fn ok_with_metadata(data: Value, metadata: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata: Some(metadata),
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            metadata: None,
        }
    }
}

/// Ambient data every handler receives
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Absolute path of the repository the task is scoped to
    pub repository_path: PathBuf,
    /// Current task id, when running inside the engine
    pub task_id: Option<String>,
    /// AI configuration for tools that call back into the LLM layer
    pub ai_config: Option<AiConfig>,
    /// Free-form extra context
    pub metadata: Option<Value>,
}

impl ToolContext {
    pub fn new(repository_path: impl Into<PathBuf>) -> Self {
        Self {
            repository_path: repository_path.into(),
            task_id: None,
            ai_config: None,
            metadata: None,
        }
    }
}

/// Tool-layer error: validation failures short-circuit before execution,
/// execution failures come from handler internals.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("参数验证失败: {0}")]
    Validation(String),
    #[error("执行失败: {0}")]
    Execution(String),
}

impl From<anyhow::Error> for ToolError {
    fn from(e: anyhow::Error) -> Self {
        ToolError::Execution(e.to_string())
    }
}
