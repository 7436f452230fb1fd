// tests/conversation_history_test.rs
// Persistence round-trips for the conversation store and the task index,
// including the on-disk layout under .ai/

use serde_json::{json, Map};
use tempfile::TempDir;

use repolens::context::{
    epoch_seconds, ConversationHistoryManager, TaskHistoryManager, TaskSort, ToolCallRecord,
};

#[tokio::test]
async fn test_on_disk_layout() {
    let dir = TempDir::new().unwrap();
    let mut history = ConversationHistoryManager::new("abc12345", dir.path());
    history.append_message("user", "<task>\nhi\n</task>", None, None, None);
    assert!(history.save_history().await);

    let mut index = TaskHistoryManager::new(dir.path());
    index.add_or_update_task("abc12345", "hi", None, None, None);
    assert!(index.save().await);

    assert!(dir
        .path()
        .join(".ai/tasks/abc12345/api_conversation_history.json")
        .exists());
    assert!(dir.path().join(".ai/history/task_history.json").exists());
}

#[tokio::test]
async fn test_round_trip_preserves_tool_call_structure() {
    let dir = TempDir::new().unwrap();
    let mut history = ConversationHistoryManager::new("t1", dir.path());

    let mut parameters = Map::new();
    parameters.insert("file_path".to_string(), json!("README.md"));
    history.append_message("user", "<task>\nread README\n</task>", None, None, None);
    history.append_message(
        "assistant",
        "on it",
        Some(vec![ToolCallRecord {
            id: "call-7".to_string(),
            name: "read_file".to_string(),
            parameters: parameters.clone(),
            result: None,
            timestamp: epoch_seconds(),
        }]),
        Some("gpt-4o".to_string()),
        Some(321),
    );
    assert!(history.attach_tool_result(
        "call-7",
        json!({"tool": "read_file", "success": true, "data": {"file_path": "README.md"}})
    ));
    assert!(history.save_history().await);

    let mut reloaded = ConversationHistoryManager::new("t1", dir.path());
    assert!(reloaded.load_history().await);

    // Equality of the full message sequence including ids/params/results
    let original = serde_json::to_value(history.messages()).unwrap();
    let loaded = serde_json::to_value(reloaded.messages()).unwrap();
    assert_eq!(original, loaded);

    // Invariant 3: the id appears on exactly one assistant message and the
    // result is attached to that same entry
    let owners: Vec<_> = reloaded
        .messages()
        .iter()
        .filter(|m| {
            m.tool_calls
                .as_ref()
                .map(|calls| calls.iter().any(|c| c.id == "call-7"))
                .unwrap_or(false)
        })
        .collect();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].role, "assistant");
    let call = owners[0]
        .tool_calls
        .as_ref()
        .unwrap()
        .iter()
        .find(|c| c.id == "call-7")
        .unwrap();
    assert!(call.result.as_ref().unwrap()["success"].as_bool().unwrap());
}

#[tokio::test]
async fn test_task_index_search_and_lifecycle() {
    let dir = TempDir::new().unwrap();
    let mut index = TaskHistoryManager::new(dir.path());

    index.add_or_update_task("t1", "分析项目结构", Some("deepseek".into()), Some("deepseek-chat".into()), None);
    index.add_or_update_task("t2", "generate weekly report", None, None, None);
    index.update_task_usage("t2", 1000, 500, 0, 200, 1.25, 4096);
    index.save().await;

    let mut reloaded = TaskHistoryManager::new(dir.path());
    assert!(reloaded.load().await);

    let hit = reloaded.search_tasks(Some("weekly"), false, TaskSort::Newest, 10);
    assert_eq!(hit.len(), 1);
    assert_eq!(hit[0].id, "t2");
    assert_eq!(hit[0].tokens_in, 1000);
    assert_eq!(hit[0].cache_reads, 200);

    assert!(reloaded.toggle_favorite("t1"));
    let favorites = reloaded.search_tasks(None, true, TaskSort::Newest, 10);
    assert_eq!(favorites.len(), 1);
    assert_eq!(favorites[0].id, "t1");

    assert!(reloaded.delete_task("t1"));
    assert!(reloaded.get_task("t1").is_none());

    let stats = reloaded.stats();
    assert_eq!(stats["total_tasks"], 1);
    assert_eq!(stats["total_tokens"], 1500);
}

#[tokio::test]
async fn test_delete_task_directory_removed() {
    let dir = TempDir::new().unwrap();
    let mut history = ConversationHistoryManager::new("gone", dir.path());
    history.append_message("user", "x", None, None, None);
    history.save_history().await;

    let task_dir = dir.path().join(".ai/tasks/gone");
    assert!(task_dir.exists());
    assert!(history.delete_history_files().await);
    assert!(!task_dir.exists());
}
