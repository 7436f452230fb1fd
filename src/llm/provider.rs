// src/llm/provider.rs
// OpenAI-compatible chat provider. Providers that differ only in base URL
// collapse into this one implementation; unknown providers are an error.

use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

use super::{AiConfig, ApiMessage};
use crate::context::token_counter::{TokenCounter, TokenUsage};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// LLM adapter error
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Malformed response: {0}")]
    Malformed(String),
}

/// One tool call requested by the model. Arguments arrive as a JSON string,
/// matching the function-calling wire format.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Parsed chat response
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Option<TokenUsage>,
}

/// Resolve the chat-completions endpoint for a provider id, honoring an
/// explicit base_url override.
fn resolve_base_url(config: &AiConfig) -> Result<String, LlmError> {
    if let Some(base_url) = &config.base_url {
        if !base_url.is_empty() {
            return Ok(base_url.trim_end_matches('/').to_string());
        }
    }

    let base = match config.provider.as_str() {
        "openai" => "https://api.openai.com/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "moonshot" => "https://api.moonshot.cn/v1",
        "zhipu" => "https://open.bigmodel.cn/api/paas/v4",
        "openrouter" => "https://openrouter.ai/api/v1",
        other => return Err(LlmError::UnknownProvider(other.to_string())),
    };
    Ok(base.to_string())
}

pub struct AiManager {
    client: reqwest::Client,
}

impl AiManager {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    async fn post_chat(&self, config: &AiConfig, body: Value) -> Result<Value, LlmError> {
        let base = resolve_base_url(config)?;
        let url = format!("{}/chat/completions", base);
        debug!("[LLM] POST {} model={}", url, config.model);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", config.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("[LLM] API error {}: {}", status, body);
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))
    }

    fn build_messages(system_prompt: Option<&str>, messages: &[ApiMessage]) -> Vec<Value> {
        let mut wire = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = system_prompt {
            wire.push(json!({ "role": "system", "content": system }));
        }
        for message in messages {
            wire.push(json!({ "role": message.role, "content": message.content }));
        }
        wire
    }

    fn parse_response(raw: Value) -> Result<ChatResponse, LlmError> {
        let message = raw
            .pointer("/choices/0/message")
            .ok_or_else(|| LlmError::Malformed("missing choices[0].message".to_string()))?;

        let content = message
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or("")
            .to_string();

        let mut tool_calls = Vec::new();
        if let Some(calls) = message.get("tool_calls").and_then(|t| t.as_array()) {
            for call in calls {
                let id = call.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string();
                let name = call
                    .pointer("/function/name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let arguments = call
                    .pointer("/function/arguments")
                    .and_then(|v| v.as_str())
                    .unwrap_or("{}")
                    .to_string();
                if !name.is_empty() {
                    tool_calls.push(ToolCallRequest { id, name, arguments });
                }
            }
        }

        let usage = TokenCounter::parse_usage(&raw);

        Ok(ChatResponse {
            content,
            tool_calls,
            usage,
        })
    }

    /// Plain chat without tools.
    pub async fn chat(
        &self,
        config: &AiConfig,
        messages: &[ApiMessage],
        system_prompt: Option<&str>,
    ) -> Result<ChatResponse, LlmError> {
        let body = json!({
            "model": config.model,
            "messages": Self::build_messages(system_prompt, messages),
            "temperature": config.temperature,
            "max_tokens": config.max_tokens,
        });

        let raw = self.post_chat(config, body).await?;
        Self::parse_response(raw)
    }

    /// Chat with function-calling tools.
    pub async fn chat_with_tools(
        &self,
        config: &AiConfig,
        messages: &[ApiMessage],
        system_prompt: Option<&str>,
        tools: &[Value],
    ) -> Result<ChatResponse, LlmError> {
        let mut body = json!({
            "model": config.model,
            "messages": Self::build_messages(system_prompt, messages),
            "temperature": config.temperature,
            "max_tokens": config.max_tokens,
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
            body["tool_choice"] = json!("auto");
        }

        let raw = self.post_chat(config, body).await?;
        let response = Self::parse_response(raw)?;
        info!(
            "[LLM] response: {} chars content, {} tool calls",
            response.content.len(),
            response.tool_calls.len()
        );
        Ok(response)
    }

    /// Cheap connectivity probe used by the UI's config screen.
    pub async fn test_connection(&self, config: &AiConfig) -> Result<bool, LlmError> {
        let messages = [ApiMessage::user("ping")];
        let probe = AiConfig {
            max_tokens: 4,
            ..config.clone()
        };
        match self.chat(&probe, &messages, None).await {
            Ok(_) => Ok(true),
            Err(LlmError::UnknownProvider(p)) => Err(LlmError::UnknownProvider(p)),
            Err(e) => {
                debug!("[LLM] connection test failed: {}", e);
                Ok(false)
            }
        }
    }
}

impl Default for AiManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str, base_url: Option<&str>) -> AiConfig {
        AiConfig {
            provider: provider.to_string(),
            model: "test-model".to_string(),
            api_key: "sk-test".to_string(),
            base_url: base_url.map(|s| s.to_string()),
            temperature: 0.7,
            max_tokens: 100,
        }
    }

    #[test]
    fn test_resolve_base_url() {
        assert_eq!(
            resolve_base_url(&config("deepseek", None)).unwrap(),
            "https://api.deepseek.com/v1"
        );
        assert_eq!(
            resolve_base_url(&config("openai", Some("http://localhost:8000/v1/"))).unwrap(),
            "http://localhost:8000/v1"
        );
        assert!(matches!(
            resolve_base_url(&config("anthropic-native", None)),
            Err(LlmError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_parse_response_with_tool_calls() {
        let raw = json!({
            "choices": [{
                "message": {
                    "content": "let me read that",
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "read_file",
                            "arguments": "{\"file_path\": \"README.md\"}"
                        }
                    }]
                }
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });

        let response = AiManager::parse_response(raw).unwrap();
        assert_eq!(response.content, "let me read that");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "read_file");
        assert_eq!(response.usage.as_ref().unwrap().total, 15);
    }

    #[test]
    fn test_parse_response_null_content() {
        let raw = json!({
            "choices": [{"message": {"content": null}}]
        });
        let response = AiManager::parse_response(raw).unwrap();
        assert_eq!(response.content, "");
        assert!(response.tool_calls.is_empty());
    }

    #[test]
    fn test_parse_response_missing_choices() {
        assert!(AiManager::parse_response(json!({})).is_err());
    }
}
