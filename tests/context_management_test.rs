// tests/context_management_test.rs
// Compressor invariants and the literal duplicate-read / sandwich scenarios

use serde_json::Value;

use repolens::context::{
    CompressionLevel, ContextCompressor, TokenCounter, DUPLICATE_FILE_READ_NOTICE,
};
use repolens::llm::ApiMessage;

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
fn test_token_counter_empty_list_is_zero() {
    assert_eq!(TokenCounter::count_messages_tokens(&[]), 0);
}

#[test]
fn test_compressor_never_drops_system_or_anchor() {
    // Invariant 1: for any message sequence, stage 2 preserves system
    // messages and the first user/assistant pair
    for level in [
        CompressionLevel::Light,
        CompressionLevel::Medium,
        CompressionLevel::Aggressive,
    ] {
        let mut messages = vec![
            msg("system", "rules"),
            msg("user", "the task"),
            msg("assistant", "the plan"),
        ];
        for i in 0..50 {
            messages.push(msg("user", &format!("u{}", i)));
            messages.push(msg("assistant", &format!("a{}", i)));
        }

        let truncated = ContextCompressor::sandwich_truncate(&messages, level);
        assert!(truncated.iter().any(|m| m.role == "system"));
        assert_eq!(truncated[1].content.as_str().unwrap(), "the task");
        assert_eq!(truncated[2].content.as_str().unwrap(), "the plan");
        assert_eq!(truncated.len(), 1 + 2 + level.keep_last());
    }
}

#[test]
fn test_duplicate_read_collapse_scenario() {
    // Three 30k reads of app/main.py; stage 1 keeps the
    // message count, rewrites the first two, keeps the third, and drops
    // at least 55k characters
    let body = "x".repeat(30_000);
    let messages = vec![
        msg("user", "<task>\nexplain app/main.py\n</task>"),
        msg("assistant", "reading"),
        msg("user", &read_result("app/main.py", &body)),
        msg("assistant", "reading again"),
        msg("user", &read_result("app/main.py", &body)),
        msg("assistant", "once more"),
        msg("user", &read_result("app/main.py", &body)),
    ];

    assert!(ContextCompressor::should_compress(&messages, "deepseek-chat"));

    let optimized = ContextCompressor::optimize_file_reads(&messages);
    assert_eq!(optimized.len(), messages.len());

    let first = optimized[2].content.as_str().unwrap();
    let second = optimized[4].content.as_str().unwrap();
    let third = optimized[6].content.as_str().unwrap();
    assert!(first.starts_with("[read_file for 'app/main.py'] Result:"));
    assert!(first.contains(DUPLICATE_FILE_READ_NOTICE));
    assert!(second.contains(DUPLICATE_FILE_READ_NOTICE));
    assert!(third.contains(&body));

    let chars_before = TokenCounter::count_messages_chars(&messages);
    let chars_after = TokenCounter::count_messages_chars(&optimized);
    assert!(chars_before - chars_after >= 55_000);
}

#[test]
fn test_sandwich_after_stage_one_scenario() {
    // Duplicate reads plus 40 round-trips still exceed the
    // character ceiling after stage 1, so aggressive truncation keeps the
    // anchor pair and the last 2 non-system messages
    let body = "x".repeat(30_000);
    let mut messages = vec![
        msg("system", "system prompt"),
        msg("user", "<task>\nanalyze\n</task>"),
        msg("assistant", "starting"),
        msg("user", &read_result("app/main.py", &body)),
        msg("assistant", "noted"),
        msg("user", &read_result("app/main.py", &body)),
    ];
    for i in 0..40 {
        messages.push(msg("user", &format!("question {} {}", i, "q".repeat(1200))));
        messages.push(msg("assistant", &format!("answer {} {}", i, "a".repeat(1200))));
    }

    let (compressed, stats) = ContextCompressor::compress(&messages, "deepseek-chat").unwrap();
    assert_eq!(stats.level.as_deref(), Some("aggressive"));

    // system + anchor pair + last 2
    assert_eq!(compressed.len(), 1 + 2 + 2);
    assert_eq!(compressed[0].role, "system");
    assert_eq!(
        compressed[1].content.as_str().unwrap(),
        "<task>\nanalyze\n</task>"
    );
    assert!(compressed[4]
        .content
        .as_str()
        .unwrap()
        .starts_with("answer 39"));

    assert!(stats.tokens_saved > 0);
    assert!(stats.compression_ratio > 0.5);
}

#[test]
fn test_compression_is_pure() {
    // The input list is not mutated; compression returns a new list
    let body = "x".repeat(30_000);
    let messages = vec![
        msg("user", &read_result("a.rs", &body)),
        msg("user", &read_result("a.rs", &body)),
    ];
    let before: Vec<String> = messages
        .iter()
        .map(|m| m.content.as_str().unwrap().to_string())
        .collect();

    let _ = ContextCompressor::compress(&messages, "deepseek-chat");

    let after: Vec<String> = messages
        .iter()
        .map(|m| m.content.as_str().unwrap().to_string())
        .collect();
    assert_eq!(before, after);
}
