// src/context/token_counter.rs
// Token accounting: per-model context windows, heuristic estimation, and
// usage parsing from provider responses

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::llm::ApiMessage;

/// (model name, context window) table. Lookup is exact, then substring,
/// then the 128k default.
const CONTEXT_WINDOWS: &[(&str, u64)] = &[
    // OpenAI
    ("gpt-4o", 128_000),
    ("gpt-4o-mini", 128_000),
    ("gpt-4-turbo", 128_000),
    ("gpt-3.5-turbo", 16_000),
    ("o1-preview", 128_000),
    ("o1-mini", 128_000),
    ("o3", 200_000),
    ("o3-mini", 200_000),
    ("o4-mini", 200_000),
    // Anthropic
    ("claude-sonnet", 200_000),
    ("claude-haiku", 200_000),
    ("claude-opus", 200_000),
    // Google
    ("gemini-2.5-pro", 1_000_000),
    ("gemini-2.5-flash", 1_000_000),
    ("gemini-1.5-pro", 1_000_000),
    ("gemini-pro", 1_000_000),
    ("gemini-flash", 1_000_000),
    // DeepSeek
    ("deepseek-chat", 64_000),
    ("deepseek-reasoner", 64_000),
    ("deepseek-r1", 64_000),
    // Moonshot
    ("moonshot-v1-8k", 8_000),
    ("moonshot-v1-32k", 32_000),
    ("moonshot-v1-128k", 128_000),
    // Zhipu GLM
    ("glm-4", 200_000),
    ("glm-4.5", 200_000),
    ("glm-4-plus", 200_000),
    ("glm-4-air", 200_000),
    ("glm-4-flash", 200_000),
];

const DEFAULT_CONTEXT_WINDOW: u64 = 128_000;

/// (window size, reserved buffer)
const BUFFER_SIZES: &[(u64, u64)] = &[
    (8_000, 2_000),
    (16_000, 4_000),
    (32_000, 8_000),
    (64_000, 27_000),
    (128_000, 30_000),
    (200_000, 40_000),
    (256_000, 50_000),
    (300_000, 60_000),
    (1_000_000, 100_000),
];

/// Token cost assumed for one image content item
const IMAGE_TOKENS: u64 = 500;

/// Actual usage reported by a provider response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub total: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_write_tokens: u64,
}

/// Compression decision input for one message list
#[derive(Debug, Clone, Serialize)]
pub struct CompressionInfo {
    pub estimated_tokens: u64,
    pub total_chars: u64,
    pub context_window: u64,
    pub max_allowed: u64,
    pub usage_percentage: f64,
    pub should_compress: bool,
    pub must_compress: bool,
}

pub struct TokenCounter;

impl TokenCounter {
    /// Threshold of allowed size at which compression is recommended
    pub const SHOULD_COMPRESS_THRESHOLD: f64 = 0.5;
    /// Threshold of allowed size at which compression is mandatory
    pub const MUST_COMPRESS_THRESHOLD: f64 = 0.7;
    /// Character ceiling that forces compression regardless of tokens
    pub const MAX_TOTAL_CHARS: u64 = 40_000;

    pub fn context_window(model: &str) -> u64 {
        let key = model.to_lowercase();
        let key = key.trim();

        for (name, window) in CONTEXT_WINDOWS {
            if *name == key {
                return *window;
            }
        }
        for (name, window) in CONTEXT_WINDOWS {
            if key.contains(name) {
                return *window;
            }
        }

        warn!("[CONTEXT] unknown model '{}', assuming 128k window", model);
        DEFAULT_CONTEXT_WINDOW
    }

    /// Allowed size = window minus a reserved buffer; for windows without a
    /// table entry, `max(window - 40k, 0.8 * window)`.
    pub fn max_allowed_size(model: &str) -> u64 {
        let window = Self::context_window(model);
        for (size, buffer) in BUFFER_SIZES {
            if window == *size {
                return window - buffer;
            }
        }
        (window.saturating_sub(40_000)).max((window as f64 * 0.8) as u64)
    }

    /// Estimate tokens from a character count with a CJK-density heuristic:
    /// mostly Chinese text runs ~2 chars/token, mostly English ~4, mixed ~3.
    pub fn estimate_text_tokens(text: &str) -> u64 {
        if text.is_empty() {
            return 0;
        }

        let total_chars = text.chars().count() as u64;
        let chinese_chars = text
            .chars()
            .filter(|c| ('\u{4e00}'..='\u{9fff}').contains(c))
            .count() as u64;
        let chinese_ratio = chinese_chars as f64 / total_chars as f64;

        let chars_per_token = if chinese_ratio >= 0.7 {
            2
        } else if chinese_ratio <= 0.3 {
            4
        } else {
            3
        };

        (total_chars / chars_per_token).max(1)
    }

    /// Estimate one message, handling multi-modal content arrays.
    pub fn count_message_tokens(message: &ApiMessage) -> u64 {
        match &message.content {
            Value::String(text) => Self::estimate_text_tokens(text),
            Value::Array(items) => items
                .iter()
                .map(|item| match item.get("type").and_then(|t| t.as_str()) {
                    Some("text") => Self::estimate_text_tokens(
                        item.get("text").and_then(|t| t.as_str()).unwrap_or(""),
                    ),
                    Some("image_url") => IMAGE_TOKENS,
                    _ => 0,
                })
                .sum(),
            _ => 0,
        }
    }

    pub fn count_messages_tokens(messages: &[ApiMessage]) -> u64 {
        messages.iter().map(Self::count_message_tokens).sum()
    }

    pub fn count_messages_chars(messages: &[ApiMessage]) -> u64 {
        messages
            .iter()
            .map(|m| match &m.content {
                Value::String(text) => text.chars().count() as u64,
                Value::Array(items) => items
                    .iter()
                    .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
                    .map(|t| t.chars().count() as u64)
                    .sum(),
                _ => 0,
            })
            .sum()
    }

    pub fn compression_info(messages: &[ApiMessage], model: &str) -> CompressionInfo {
        let estimated_tokens = Self::count_messages_tokens(messages);
        let total_chars = Self::count_messages_chars(messages);
        let context_window = Self::context_window(model);
        let max_allowed = Self::max_allowed_size(model);

        let usage = if max_allowed > 0 {
            estimated_tokens as f64 / max_allowed as f64
        } else {
            0.0
        };

        CompressionInfo {
            estimated_tokens,
            total_chars,
            context_window,
            max_allowed,
            usage_percentage: usage,
            should_compress: usage >= Self::SHOULD_COMPRESS_THRESHOLD,
            must_compress: usage >= Self::MUST_COMPRESS_THRESHOLD
                || total_chars > Self::MAX_TOTAL_CHARS,
        }
    }

    /// Parse the usage block of an OpenAI-compatible response.
    pub fn parse_usage(response: &Value) -> Option<TokenUsage> {
        let usage = response.get("usage")?;
        let prompt = usage.get("prompt_tokens")?.as_u64()?;
        Some(TokenUsage {
            tokens_in: prompt,
            tokens_out: usage
                .get("completion_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            total: usage.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            cache_read_tokens: usage
                .get("prompt_cache_hit_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            cache_write_tokens: usage
                .get("prompt_cache_miss_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(role: &str, content: &str) -> ApiMessage {
        ApiMessage {
            role: role.to_string(),
            content: Value::String(content.to_string()),
        }
    }

    #[test]
    fn test_context_window_lookup() {
        assert_eq!(TokenCounter::context_window("deepseek-chat"), 64_000);
        assert_eq!(TokenCounter::context_window("GPT-4O"), 128_000);
        // substring fallback
        assert_eq!(TokenCounter::context_window("deepseek-chat-v3"), 64_000);
        // unknown -> default
        assert_eq!(TokenCounter::context_window("mystery-model"), 128_000);
    }

    #[test]
    fn test_max_allowed_size() {
        assert_eq!(TokenCounter::max_allowed_size("deepseek-chat"), 64_000 - 27_000);
        assert_eq!(TokenCounter::max_allowed_size("gpt-4o"), 128_000 - 30_000);
        assert_eq!(TokenCounter::max_allowed_size("claude-sonnet"), 200_000 - 40_000);
    }

    #[test]
    fn test_estimate_english_vs_chinese() {
        // 40 ASCII chars -> ~10 tokens
        assert_eq!(TokenCounter::estimate_text_tokens(&"a".repeat(40)), 10);
        // 40 CJK chars -> ~20 tokens
        let cjk: String = std::iter::repeat('码').take(40).collect();
        assert_eq!(TokenCounter::estimate_text_tokens(&cjk), 20);
        // non-empty text estimates at least one token
        assert_eq!(TokenCounter::estimate_text_tokens("a"), 1);
        assert_eq!(TokenCounter::estimate_text_tokens(""), 0);
    }

    #[test]
    fn test_empty_message_list_is_zero() {
        assert_eq!(TokenCounter::count_messages_tokens(&[]), 0);
    }

    #[test]
    fn test_image_items_add_tokens() {
        let message = ApiMessage {
            role: "user".to_string(),
            content: json!([
                {"type": "text", "text": "look"},
                {"type": "image_url", "image_url": {"url": "data:..."}},
            ]),
        };
        assert_eq!(TokenCounter::count_message_tokens(&message), 500 + 1);
    }

    #[test]
    fn test_compression_thresholds() {
        // deepseek allowed = 37k tokens; 4 chars/token for ASCII
        let half = "a".repeat(37_000 * 4 / 2);
        let messages = vec![msg("user", &half)];
        let info = TokenCounter::compression_info(&messages, "deepseek-chat");
        assert!(info.should_compress);
        // chars > 40k also forces must_compress
        assert!(info.must_compress);

        let small = vec![msg("user", "hello")];
        let info = TokenCounter::compression_info(&small, "deepseek-chat");
        assert!(!info.should_compress);
        assert!(!info.must_compress);
    }

    #[test]
    fn test_char_ceiling_forces_compression() {
        // 41k chars but only ~10k tokens: under token thresholds, over chars
        let text = "a".repeat(41_000);
        let messages = vec![msg("user", &text)];
        let info = TokenCounter::compression_info(&messages, "claude-sonnet");
        assert!(info.must_compress);
    }

    #[test]
    fn test_parse_usage() {
        let response = json!({
            "usage": {
                "prompt_tokens": 120,
                "completion_tokens": 30,
                "total_tokens": 150,
                "prompt_cache_hit_tokens": 100
            }
        });
        let usage = TokenCounter::parse_usage(&response).unwrap();
        assert_eq!(usage.tokens_in, 120);
        assert_eq!(usage.tokens_out, 30);
        assert_eq!(usage.total, 150);
        assert_eq!(usage.cache_read_tokens, 100);

        assert!(TokenCounter::parse_usage(&json!({})).is_none());
    }
}
