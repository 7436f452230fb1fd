// src/context/conversation.rs
// Per-task conversation history: append-only message log with tool-call
// structure, persisted as JSON under <repo>/.ai/tasks/<task_id>/

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info};

/// One recorded tool call on an assistant message. `result` is attached
/// after the tool executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default)]
    pub timestamp: f64,
}

/// One conversation message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub timestamp: f64,
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_deleted_range: Option<(usize, usize)>,
}

pub fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Conversation statistics for the UI
#[derive(Debug, Clone, Serialize)]
pub struct ConversationStats {
    pub task_id: String,
    pub total_messages: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub system_messages: usize,
    pub total_tokens: u64,
    pub task_dir_size: u64,
}

/// Manages one task's conversation history. The task id doubles as the
/// conversation id; each task gets its own directory.
pub struct ConversationHistoryManager {
    pub task_id: String,
    workspace_path: PathBuf,
    task_dir: PathBuf,
    api_history_file: PathBuf,
    messages: Vec<ConversationMessage>,
}

impl ConversationHistoryManager {
    pub fn new(task_id: impl Into<String>, workspace_path: impl Into<PathBuf>) -> Self {
        let task_id = task_id.into();
        let workspace_path = workspace_path.into();
        let task_dir = workspace_path.join(".ai").join("tasks").join(&task_id);
        let api_history_file = task_dir.join("api_conversation_history.json");
        Self {
            task_id,
            workspace_path,
            task_dir,
            api_history_file,
            messages: Vec::new(),
        }
    }

    pub fn task_dir(&self) -> &Path {
        &self.task_dir
    }

    pub fn append_message(
        &mut self,
        role: &str,
        content: impl Into<String>,
        tool_calls: Option<Vec<ToolCallRecord>>,
        model: Option<String>,
        tokens_used: Option<u64>,
    ) -> &ConversationMessage {
        let message = ConversationMessage {
            timestamp: epoch_seconds(),
            role: role.to_string(),
            content: content.into(),
            tool_calls,
            model,
            tokens_used,
            compression_deleted_range: None,
        };
        debug!(
            "[HISTORY] append {} message ({} chars)",
            message.role,
            message.content.len()
        );
        self.messages.push(message);
        self.messages.last().unwrap()
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Attach a result to the tool call with the given id. The id is unique
    /// within one assistant message; scanning from the tail finds the
    /// current iteration's entry first.
    pub fn attach_tool_result(&mut self, tool_call_id: &str, result: Value) -> bool {
        for message in self.messages.iter_mut().rev() {
            if let Some(tool_calls) = &mut message.tool_calls {
                for tool_call in tool_calls.iter_mut() {
                    if tool_call.id == tool_call_id {
                        tool_call.result = Some(result);
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Record the range of messages a compression pass dropped, on the most
    /// recent message.
    pub fn record_compression(&mut self, deleted_range: (usize, usize)) {
        if let Some(last) = self.messages.last_mut() {
            last.compression_deleted_range = Some(deleted_range);
            info!("[HISTORY] recorded compression range {:?}", deleted_range);
        }
    }

    /// Persist to `api_conversation_history.json` (pretty-printed).
    pub async fn save_history(&self) -> bool {
        let data = json!({
            "task_id": self.task_id,
            "workspace_path": self.workspace_path.to_string_lossy(),
            "created_at": self.messages.first().map(|m| m.timestamp).unwrap_or_else(epoch_seconds),
            "updated_at": epoch_seconds(),
            "message_count": self.messages.len(),
            "messages": self.messages,
        });

        let result = async {
            tokio::fs::create_dir_all(&self.task_dir).await?;
            let serialized = serde_json::to_string_pretty(&data)?;
            tokio::fs::write(&self.api_history_file, serialized).await?;
            Ok::<(), anyhow::Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                info!(
                    "[HISTORY] saved {} messages for task {}",
                    self.messages.len(),
                    self.task_id
                );
                true
            }
            Err(e) => {
                error!("[HISTORY] save failed for task {}: {}", self.task_id, e);
                false
            }
        }
    }

    /// Load from disk, validating the task id. Returns false (leaving the
    /// in-memory log untouched) when the file is missing or mismatched.
    pub async fn load_history(&mut self) -> bool {
        let content = match tokio::fs::read_to_string(&self.api_history_file).await {
            Ok(content) => content,
            Err(_) => {
                debug!("[HISTORY] no history file for task {}", self.task_id);
                return false;
            }
        };

        let data: Value = match serde_json::from_str(&content) {
            Ok(data) => data,
            Err(e) => {
                error!("[HISTORY] corrupt history for task {}: {}", self.task_id, e);
                return false;
            }
        };

        if data.get("task_id").and_then(|v| v.as_str()) != Some(self.task_id.as_str()) {
            error!("[HISTORY] task id mismatch in {}", self.api_history_file.display());
            return false;
        }

        match data
            .get("messages")
            .cloned()
            .map(serde_json::from_value::<Vec<ConversationMessage>>)
        {
            Some(Ok(messages)) => {
                info!(
                    "[HISTORY] loaded {} messages for task {}",
                    messages.len(),
                    self.task_id
                );
                self.messages = messages;
                true
            }
            _ => false,
        }
    }

    /// Remove the entire task directory.
    pub async fn delete_history_files(&self) -> bool {
        if !self.task_dir.exists() {
            return false;
        }
        match tokio::fs::remove_dir_all(&self.task_dir).await {
            Ok(()) => {
                info!("[HISTORY] deleted task directory {}", self.task_dir.display());
                true
            }
            Err(e) => {
                error!("[HISTORY] delete failed: {}", e);
                false
            }
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub async fn stats(&self) -> ConversationStats {
        let mut task_dir_size = 0u64;
        if self.task_dir.exists() {
            for entry in walkdir::WalkDir::new(&self.task_dir).into_iter().flatten() {
                if entry.file_type().is_file() {
                    task_dir_size += entry.metadata().map(|m| m.len()).unwrap_or(0);
                }
            }
        }

        ConversationStats {
            task_id: self.task_id.clone(),
            total_messages: self.messages.len(),
            user_messages: self.messages.iter().filter(|m| m.role == "user").count(),
            assistant_messages: self.messages.iter().filter(|m| m.role == "assistant").count(),
            system_messages: self.messages.iter().filter(|m| m.role == "system").count(),
            total_tokens: self.messages.iter().filter_map(|m| m.tokens_used).sum(),
            task_dir_size,
        }
    }
}
