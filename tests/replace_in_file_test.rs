// tests/replace_in_file_test.rs
// SEARCH/REPLACE block scenarios for replace_in_file

use serde_json::{json, Map, Value};
use tempfile::TempDir;

use repolens::tools::handlers::write::ReplaceInFileHandler;
use repolens::tools::{ToolContext, ToolHandler};

fn params(v: Value) -> Map<String, Value> {
    v.as_object().cloned().unwrap()
}

fn diff_block(search: &str, replace: &str) -> String {
    format!(
        "------- SEARCH\n{}\n=======\n{}\n+++++++ REPLACE",
        search, replace
    )
}

async fn write_fixture(content: &str) -> (TempDir, ToolContext) {
    let dir = TempDir::new().unwrap();
    tokio::fs::write(dir.path().join("file.txt"), content).await.unwrap();
    let ctx = ToolContext::new(dir.path());
    (dir, ctx)
}

#[tokio::test]
async fn test_single_block_replacement() {
    let (dir, ctx) = write_fixture("line one\nline two\nline three\n").await;

    let result = ReplaceInFileHandler
        .execute(
            params(json!({
                "file_path": "file.txt",
                "diff": diff_block("line two", "line 2"),
            })),
            &ctx,
        )
        .await
        .unwrap();

    assert_eq!(result["changed"], true);
    assert_eq!(result["blocks_processed"], 1);
    let content = tokio::fs::read_to_string(dir.path().join("file.txt")).await.unwrap();
    assert_eq!(content, "line one\nline 2\nline three\n");
}

#[tokio::test]
async fn test_multi_block_left_to_right() {
    // Two blocks against "A\nB\nC\nD": A->A1 then D->D1
    let (dir, ctx) = write_fixture("A\nB\nC\nD").await;

    let diff = format!(
        "{}\n{}",
        diff_block("A", "A1"),
        diff_block("D", "D1")
    );
    let result = ReplaceInFileHandler
        .execute(params(json!({"file_path": "file.txt", "diff": diff})), &ctx)
        .await
        .unwrap();

    assert_eq!(result["blocks_processed"], 2);
    assert_eq!(result["lines_added"], 2);
    assert_eq!(result["lines_removed"], 2);
    let content = tokio::fs::read_to_string(dir.path().join("file.txt")).await.unwrap();
    assert_eq!(content, "A1\nB\nC\nD1");
}

#[tokio::test]
async fn test_identity_replacement_is_noop() {
    let (dir, ctx) = write_fixture("unchanged content\n").await;

    let result = ReplaceInFileHandler
        .execute(
            params(json!({
                "file_path": "file.txt",
                "diff": diff_block("unchanged content", "unchanged content"),
            })),
            &ctx,
        )
        .await
        .unwrap();

    assert_eq!(result["changed"], false);
    let content = tokio::fs::read_to_string(dir.path().join("file.txt")).await.unwrap();
    assert_eq!(content, "unchanged content\n");
}

#[tokio::test]
async fn test_line_trimmed_fallback() {
    let (dir, ctx) = write_fixture("def f():\n        return    1\n").await;

    // Whitespace differs from the file; the line-trimmed strategy matches
    let result = ReplaceInFileHandler
        .execute(
            params(json!({
                "file_path": "file.txt",
                "diff": diff_block("return    1", "return 2"),
            })),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(result["changed"], true);
    let content = tokio::fs::read_to_string(dir.path().join("file.txt")).await.unwrap();
    assert!(content.contains("return 2"));
}

#[tokio::test]
async fn test_block_anchor_fallback_for_three_plus_lines() {
    let (dir, ctx) =
        write_fixture("start marker\nmiddle that drifted\nend marker\ntrailing\n").await;

    let result = ReplaceInFileHandler
        .execute(
            params(json!({
                "file_path": "file.txt",
                "diff": diff_block(
                    "start marker\nORIGINAL middle\nend marker",
                    "replacement body"
                ),
            })),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(result["changed"], true);
    let content = tokio::fs::read_to_string(dir.path().join("file.txt")).await.unwrap();
    assert_eq!(content, "replacement body\ntrailing\n");
}

#[tokio::test]
async fn test_unmatched_block_reports_index_and_preview() {
    let (_dir, ctx) = write_fixture("short file\n").await;

    let long_search = "z".repeat(400);
    let err = ReplaceInFileHandler
        .execute(
            params(json!({
                "file_path": "file.txt",
                "diff": diff_block(&long_search, "y"),
            })),
            &ctx,
        )
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("第 1 个"));
    // preview is capped at 200 chars of the search content
    assert!(message.contains(&"z".repeat(200)));
    assert!(!message.contains(&"z".repeat(201)));
}

#[tokio::test]
async fn test_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    let ctx = ToolContext::new(dir.path());

    let err = ReplaceInFileHandler
        .execute(
            params(json!({
                "file_path": "absent.txt",
                "diff": diff_block("a", "b"),
            })),
            &ctx,
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("文件不存在"));
}
