// src/context/compression.rs
// Two-stage context compression: (1) collapse duplicate file reads in the
// history, (2) sandwich-truncate when still over the limit.
// Works on a transient message list; persisted history is never modified.

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, info};

use super::token_counter::TokenCounter;
use crate::llm::ApiMessage;

/// Raised when even aggressive truncation cannot fit the model's window
#[derive(Error, Debug)]
#[error("上下文压缩失败: {0}")]
pub struct ContextError(pub String);

/// Replacement text for a superseded file read
pub const DUPLICATE_FILE_READ_NOTICE: &str =
    "[NOTE] 此文件读取已被移除以节省上下文窗口空间。请参考最新的文件读取以获取此文件的最新版本。";

// File-read patterns recognized in user messages:
//   [read_file for '<path>'] Result: ...
//   <file_content path="<path>">...</file_content>
static RE_READ_RESULT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[read_file\s+for\s+'([^']+)'\]\s+Result:").expect("RE_READ_RESULT")
});
static RE_FILE_CONTENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<file_content\s+path="([^"]+)">"#).expect("RE_FILE_CONTENT")
});

/// How aggressively the sandwich stage truncates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionLevel {
    Light,
    Medium,
    Aggressive,
}

impl CompressionLevel {
    /// Number of trailing non-system messages the sandwich keeps
    pub fn keep_last(&self) -> usize {
        match self {
            CompressionLevel::Aggressive => 2,
            CompressionLevel::Medium => 4,
            CompressionLevel::Light => 8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionLevel::Light => "light",
            CompressionLevel::Medium => "medium",
            CompressionLevel::Aggressive => "aggressive",
        }
    }
}

/// Observability stats for one compression pass
#[derive(Debug, Clone, Serialize)]
pub struct CompressionStats {
    pub original_messages: usize,
    pub compressed_messages: usize,
    pub original_tokens: u64,
    pub compressed_tokens: u64,
    pub tokens_saved: u64,
    pub compression_ratio: f64,
    pub level: Option<String>,
}

pub struct ContextCompressor;

impl ContextCompressor {
    pub fn should_compress(messages: &[ApiMessage], model: &str) -> bool {
        TokenCounter::compression_info(messages, model).should_compress
    }

    pub fn must_compress(messages: &[ApiMessage], model: &str) -> bool {
        TokenCounter::compression_info(messages, model).must_compress
    }

    /// Full pipeline, invoked before each LLM call. Stage 1 runs whenever
    /// compression is recommended; stage 2 only when the optimized list
    /// still breaks the hard limit. Fails when even aggressive truncation
    /// cannot fit the window (an oversized anchor message).
    pub fn compress(
        messages: &[ApiMessage],
        model: &str,
    ) -> Result<(Vec<ApiMessage>, CompressionStats), ContextError> {
        let original_tokens = TokenCounter::count_messages_tokens(messages);
        let info = TokenCounter::compression_info(messages, model);

        if !info.should_compress && !info.must_compress {
            let stats = CompressionStats {
                original_messages: messages.len(),
                compressed_messages: messages.len(),
                original_tokens,
                compressed_tokens: original_tokens,
                tokens_saved: 0,
                compression_ratio: 0.0,
                level: None,
            };
            return Ok((messages.to_vec(), stats));
        }

        // Stage 1: collapse duplicate file reads (message count preserved)
        let optimized = Self::optimize_file_reads(messages);

        // Stage 2: sandwich-truncate if stage 1 still exceeds the limit
        let after_info = TokenCounter::compression_info(&optimized, model);
        let (compressed, level) = if after_info.must_compress {
            let level = if info.must_compress {
                CompressionLevel::Aggressive
            } else if info.should_compress {
                CompressionLevel::Medium
            } else {
                CompressionLevel::Light
            };
            (Self::sandwich_truncate(&optimized, level), Some(level))
        } else {
            (optimized, None)
        };

        if level == Some(CompressionLevel::Aggressive) {
            let final_info = TokenCounter::compression_info(&compressed, model);
            if final_info.estimated_tokens > final_info.max_allowed {
                return Err(ContextError(format!(
                    "压缩后仍超出模型 {} 的上下文限制 ({} > {} tokens)",
                    model, final_info.estimated_tokens, final_info.max_allowed
                )));
            }
        }

        let compressed_tokens = TokenCounter::count_messages_tokens(&compressed);
        let stats = CompressionStats {
            original_messages: messages.len(),
            compressed_messages: compressed.len(),
            original_tokens,
            compressed_tokens,
            tokens_saved: original_tokens.saturating_sub(compressed_tokens),
            compression_ratio: if original_tokens > 0 {
                1.0 - compressed_tokens as f64 / original_tokens as f64
            } else {
                0.0
            },
            level: level.map(|l| l.as_str().to_string()),
        };

        info!(
            "[CONTEXT] compressed {} -> {} messages, saved {} tokens ({})",
            stats.original_messages,
            stats.compressed_messages,
            stats.tokens_saved,
            stats.level.as_deref().unwrap_or("stage1-only"),
        );

        Ok((compressed, stats))
    }

    /// Stage 1: for each file read at least twice, replace every occurrence
    /// except the last with a short notice.
    pub fn optimize_file_reads(messages: &[ApiMessage]) -> Vec<ApiMessage> {
        // path -> message indices holding a read of it
        let mut reads: HashMap<String, Vec<usize>> = HashMap::new();

        for (index, message) in messages.iter().enumerate() {
            if message.role != "user" {
                continue;
            }
            let Value::String(content) = &message.content else {
                continue;
            };

            if let Some(cap) = RE_READ_RESULT.captures(content) {
                reads.entry(cap[1].to_string()).or_default().push(index);
            } else if let Some(cap) = RE_FILE_CONTENT.captures(content) {
                reads.entry(cap[1].to_string()).or_default().push(index);
            }
        }

        let mut optimized = messages.to_vec();
        for (path, indices) in reads {
            if indices.len() < 2 {
                continue;
            }
            let escaped = regex::escape(&path);
            let re_result = Regex::new(&format!(
                r"(?s)\[read_file\s+for\s+'{}'\]\s+Result:.*",
                escaped
            ))
            .expect("per-path result regex");
            let re_content = Regex::new(&format!(
                r#"(?s)<file_content\s+path="{}">.*?</file_content>"#,
                escaped
            ))
            .expect("per-path content regex");

            let result_notice = format!(
                "[read_file for '{}'] Result:\n{}",
                path, DUPLICATE_FILE_READ_NOTICE
            );
            let content_notice = format!(
                "<file_content path=\"{}\">{}</file_content>",
                path, DUPLICATE_FILE_READ_NOTICE
            );

            // keep the most recent read intact
            for &index in &indices[..indices.len() - 1] {
                let original = match &optimized[index].content {
                    Value::String(content) => content.clone(),
                    _ => continue,
                };

                let mut replaced = re_result
                    .replace(&original, regex::NoExpand(&result_notice))
                    .into_owned();
                if replaced == original {
                    replaced = re_content
                        .replace(&original, regex::NoExpand(&content_notice))
                        .into_owned();
                }

                if replaced != original {
                    debug!("[CONTEXT] collapsed duplicate read of {} at message {}", path, index);
                    optimized[index].content = Value::String(replaced);
                }
            }
        }

        optimized
    }

    /// Stage 2: keep all system messages, the first user/assistant pair
    /// (the task anchor), and the last N non-system messages.
    pub fn sandwich_truncate(messages: &[ApiMessage], level: CompressionLevel) -> Vec<ApiMessage> {
        let system: Vec<ApiMessage> = messages
            .iter()
            .filter(|m| m.role == "system")
            .cloned()
            .collect();
        let non_system: Vec<ApiMessage> = messages
            .iter()
            .filter(|m| m.role != "system")
            .cloned()
            .collect();

        let keep_last = level.keep_last();
        if non_system.len() <= 2 + keep_last {
            return messages.to_vec();
        }

        let mut result = system;
        result.extend_from_slice(&non_system[..2]);
        result.extend_from_slice(&non_system[non_system.len() - keep_last..]);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: &str, content: &str) -> ApiMessage {
        ApiMessage {
            role: role.to_string(),
            content: Value::String(content.to_string()),
        }
    }

    fn read_result(path: &str, body: &str) -> String {
        format!("[read_file for '{}'] Result:\n{}", path, body)
    }

    #[test]
    fn test_optimize_replaces_all_but_last() {
        let body = "x".repeat(30_000);
        let messages = vec![
            msg("user", &read_result("app/main.py", &body)),
            msg("assistant", "looked at it"),
            msg("user", &read_result("app/main.py", &body)),
            msg("assistant", "again"),
            msg("user", &read_result("app/main.py", &body)),
        ];

        let optimized = ContextCompressor::optimize_file_reads(&messages);
        // message count preserved
        assert_eq!(optimized.len(), messages.len());

        let first = optimized[0].content.as_str().unwrap();
        let second = optimized[2].content.as_str().unwrap();
        let third = optimized[4].content.as_str().unwrap();
        assert!(first.contains(DUPLICATE_FILE_READ_NOTICE));
        assert!(second.contains(DUPLICATE_FILE_READ_NOTICE));
        assert!(third.contains(&body));

        // Drops at least 55k chars of the ~90k duplicated content
        let before: usize = messages.iter().map(|m| m.content.as_str().unwrap().len()).sum();
        let after: usize = optimized.iter().map(|m| m.content.as_str().unwrap().len()).sum();
        assert!(before - after >= 55_000);
    }

    #[test]
    fn test_optimize_file_content_format() {
        let messages = vec![
            msg("user", "<file_content path=\"a.rs\">old body</file_content>"),
            msg("user", "<file_content path=\"a.rs\">new body</file_content>"),
        ];
        let optimized = ContextCompressor::optimize_file_reads(&messages);
        let first = optimized[0].content.as_str().unwrap();
        assert!(first.contains(DUPLICATE_FILE_READ_NOTICE));
        assert!(!first.contains("old body"));
        assert!(optimized[1].content.as_str().unwrap().contains("new body"));
    }

    #[test]
    fn test_optimize_single_read_untouched() {
        let messages = vec![msg("user", &read_result("only.rs", "body"))];
        let optimized = ContextCompressor::optimize_file_reads(&messages);
        assert_eq!(optimized[0].content, messages[0].content);
    }

    #[test]
    fn test_sandwich_preserves_anchor_and_tail() {
        let mut messages = vec![msg("system", "sys prompt"), msg("user", "task"), msg("assistant", "plan")];
        for i in 0..40 {
            messages.push(msg("user", &format!("round {}", i)));
            messages.push(msg("assistant", &format!("reply {}", i)));
        }

        let truncated =
            ContextCompressor::sandwich_truncate(&messages, CompressionLevel::Aggressive);

        // system kept
        assert_eq!(truncated[0].role, "system");
        // anchor pair kept
        assert_eq!(truncated[1].content.as_str().unwrap(), "task");
        assert_eq!(truncated[2].content.as_str().unwrap(), "plan");
        // last 2 non-system kept
        assert_eq!(
            truncated[truncated.len() - 1].content.as_str().unwrap(),
            "reply 39"
        );
        assert_eq!(
            truncated[truncated.len() - 2].content.as_str().unwrap(),
            "round 39"
        );
        assert_eq!(truncated.len(), 1 + 2 + 2);
    }

    #[test]
    fn test_sandwich_short_history_untouched() {
        let messages = vec![msg("system", "s"), msg("user", "u"), msg("assistant", "a")];
        let truncated = ContextCompressor::sandwich_truncate(&messages, CompressionLevel::Light);
        assert_eq!(truncated.len(), 3);
    }

    #[test]
    fn test_full_pipeline_duplicate_collapse() {
        // Scenario: three 30k-char reads trigger stage 1
        let body = "x".repeat(30_000);
        let messages = vec![
            msg("user", "<task>\nanalyze\n</task>"),
            msg("assistant", "reading"),
            msg("user", &read_result("app/main.py", &body)),
            msg("assistant", "more"),
            msg("user", &read_result("app/main.py", &body)),
            msg("assistant", "more"),
            msg("user", &read_result("app/main.py", &body)),
        ];

        let (compressed, stats) = ContextCompressor::compress(&messages, "deepseek-chat").unwrap();
        assert!(stats.tokens_saved > 0);
        // After stage 1 the list fits again, so stage 2 did not run
        // and the count is preserved
        assert_eq!(compressed.len(), messages.len());
        assert!(stats.level.is_none());
    }

    #[test]
    fn test_full_pipeline_sandwich_after_stage1() {
        // Scenario: duplicates plus 40 long rounds keep chars above the
        // ceiling after stage 1, forcing aggressive sandwich truncation
        let body = "x".repeat(30_000);
        let mut messages = vec![
            msg("user", "<task>\nanalyze\n</task>"),
            msg("assistant", "plan"),
        ];
        messages.push(msg("user", &read_result("app/main.py", &body)));
        messages.push(msg("assistant", "ok"));
        messages.push(msg("user", &read_result("app/main.py", &body)));
        for i in 0..40 {
            messages.push(msg("user", &format!("question {} {}", i, "y".repeat(1500))));
            messages.push(msg("assistant", &format!("answer {} {}", i, "z".repeat(1500))));
        }

        let (compressed, stats) = ContextCompressor::compress(&messages, "deepseek-chat").unwrap();
        assert_eq!(stats.level.as_deref(), Some("aggressive"));
        // anchor + last 2 non-system messages survive
        assert_eq!(compressed.len(), 2 + 2);
        assert_eq!(compressed[0].content.as_str().unwrap(), "<task>\nanalyze\n</task>");
        assert!(compressed[compressed.len() - 1]
            .content
            .as_str()
            .unwrap()
            .starts_with("answer 39"));
    }

    #[test]
    fn test_oversized_anchor_cannot_fit() {
        // A 200k-char anchor exceeds deepseek's allowed size even after
        // aggressive truncation
        let messages = vec![
            msg("user", &"a".repeat(200_000)),
            msg("assistant", "ok"),
        ];
        let err = ContextCompressor::compress(&messages, "deepseek-chat").unwrap_err();
        assert!(err.to_string().contains("上下文压缩失败"));
    }

    #[test]
    fn test_no_compression_below_thresholds() {
        let messages = vec![msg("user", "tiny"), msg("assistant", "ok")];
        let (compressed, stats) = ContextCompressor::compress(&messages, "gpt-4o").unwrap();
        assert_eq!(compressed.len(), 2);
        assert_eq!(stats.tokens_saved, 0);
    }
}
