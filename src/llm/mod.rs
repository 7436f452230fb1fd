// src/llm/mod.rs
// LLM adapter layer: one OpenAI-compatible implementation behind a
// per-provider base-url table

pub mod provider;

pub use provider::{AiManager, ChatResponse, LlmError, ToolCallRequest};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-task AI configuration, carried explicitly (no ambient globals).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(rename = "ai_provider")]
    pub provider: String,
    #[serde(rename = "ai_model")]
    pub model: String,
    #[serde(rename = "ai_api_key")]
    pub api_key: String,
    #[serde(default, rename = "ai_base_url", skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    4000
}

/// Wire-format chat message: role plus either a string or a multi-modal
/// content array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiMessage {
    pub role: String,
    pub content: Value,
}

impl ApiMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: Value::String(content.into()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Value::String(content.into()),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: Value::String(content.into()),
        }
    }
}
