// src/context/task_history.rs
// Workspace-level task history index: one item per task directory, with
// search/sort/favorite support

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use tracing::{error, info};

use super::conversation::epoch_seconds;

/// Metadata of one task (task id == conversation id)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: String,
    /// Task description: first 100 chars of the user input
    pub task: String,
    pub ts: f64,
    pub last_updated: f64,
    #[serde(default)]
    pub tokens_in: u64,
    #[serde(default)]
    pub tokens_out: u64,
    #[serde(default)]
    pub cache_writes: u64,
    #[serde(default)]
    pub cache_reads: u64,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub is_favorited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_path: Option<String>,
}

/// Sort orders accepted by search_tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskSort {
    #[default]
    Newest,
    Oldest,
    Cost,
}

impl TaskSort {
    pub fn from_str(s: &str) -> Self {
        match s {
            "oldest" => TaskSort::Oldest,
            "cost" => TaskSort::Cost,
            _ => TaskSort::Newest,
        }
    }
}

/// Workspace-level index at `<repo>/.ai/history/task_history.json`.
pub struct TaskHistoryManager {
    history_file: PathBuf,
    items: Vec<HistoryItem>,
}

impl TaskHistoryManager {
    pub fn new(workspace_path: impl Into<PathBuf>) -> Self {
        let workspace_path = workspace_path.into();
        let history_file = workspace_path
            .join(".ai")
            .join("history")
            .join("task_history.json");
        Self {
            history_file,
            items: Vec::new(),
        }
    }

    pub async fn load(&mut self) -> bool {
        let content = match tokio::fs::read_to_string(&self.history_file).await {
            Ok(content) => content,
            Err(_) => {
                self.items = Vec::new();
                return false;
            }
        };
        match serde_json::from_str(&content) {
            Ok(items) => {
                self.items = items;
                info!("[HISTORY] loaded {} task history items", self.items.len());
                true
            }
            Err(e) => {
                error!("[HISTORY] corrupt task history: {}", e);
                self.items = Vec::new();
                false
            }
        }
    }

    pub async fn save(&self) -> bool {
        let result = async {
            if let Some(parent) = self.history_file.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let data = serde_json::to_string_pretty(&self.items)?;
            tokio::fs::write(&self.history_file, data).await?;
            Ok::<(), anyhow::Error>(())
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                error!("[HISTORY] failed to save task history: {}", e);
                false
            }
        }
    }

    /// Merge by id: existing items get a timestamp bump, new items are
    /// inserted and the list is re-sorted newest first.
    pub fn add_or_update_task(
        &mut self,
        task_id: &str,
        task_description: &str,
        api_provider: Option<String>,
        api_model: Option<String>,
        repository_path: Option<String>,
    ) -> &HistoryItem {
        if let Some(index) = self.items.iter().position(|item| item.id == task_id) {
            self.items[index].last_updated = epoch_seconds();
            return &self.items[index];
        }

        let now = epoch_seconds();
        self.items.push(HistoryItem {
            id: task_id.to_string(),
            task: task_description.chars().take(100).collect(),
            ts: now,
            last_updated: now,
            tokens_in: 0,
            tokens_out: 0,
            cache_writes: 0,
            cache_reads: 0,
            total_cost: 0.0,
            size: 0,
            is_favorited: false,
            api_provider,
            api_model,
            repository_path,
        });
        self.items
            .sort_by(|a, b| b.ts.partial_cmp(&a.ts).unwrap_or(std::cmp::Ordering::Equal));
        info!("[HISTORY] new task indexed: {}", task_id);

        self.items
            .iter()
            .find(|item| item.id == task_id)
            .expect("item just inserted")
    }

    pub fn get_task(&self, task_id: &str) -> Option<&HistoryItem> {
        self.items.iter().find(|item| item.id == task_id)
    }

    /// Update usage counters after a task run.
    pub fn update_task_usage(
        &mut self,
        task_id: &str,
        tokens_in: u64,
        tokens_out: u64,
        cache_writes: u64,
        cache_reads: u64,
        cost: f64,
        size: u64,
    ) {
        if let Some(item) = self.items.iter_mut().find(|item| item.id == task_id) {
            item.tokens_in += tokens_in;
            item.tokens_out += tokens_out;
            item.cache_writes += cache_writes;
            item.cache_reads += cache_reads;
            item.total_cost += cost;
            item.size = size;
            item.last_updated = epoch_seconds();
        }
    }

    pub fn search_tasks(
        &self,
        query: Option<&str>,
        favorites_only: bool,
        sort_by: TaskSort,
        limit: usize,
    ) -> Vec<HistoryItem> {
        let mut items: Vec<HistoryItem> = self
            .items
            .iter()
            .filter(|item| !favorites_only || item.is_favorited)
            .filter(|item| match query {
                Some(q) if !q.is_empty() => {
                    let q = q.to_lowercase();
                    item.task.to_lowercase().contains(&q) || item.id.to_lowercase().contains(&q)
                }
                _ => true,
            })
            .cloned()
            .collect();

        match sort_by {
            TaskSort::Newest => items
                .sort_by(|a, b| b.ts.partial_cmp(&a.ts).unwrap_or(std::cmp::Ordering::Equal)),
            TaskSort::Oldest => items
                .sort_by(|a, b| a.ts.partial_cmp(&b.ts).unwrap_or(std::cmp::Ordering::Equal)),
            TaskSort::Cost => items.sort_by(|a, b| {
                b.total_cost
                    .partial_cmp(&a.total_cost)
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
        }

        items.truncate(limit);
        items
    }

    /// Flip the favorite flag; returns the new state (false for unknown id).
    pub fn toggle_favorite(&mut self, task_id: &str) -> bool {
        if let Some(item) = self.items.iter_mut().find(|item| item.id == task_id) {
            item.is_favorited = !item.is_favorited;
            item.last_updated = epoch_seconds();
            return item.is_favorited;
        }
        false
    }

    pub fn delete_task(&mut self, task_id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.id != task_id);
        self.items.len() < before
    }

    pub fn stats(&self) -> serde_json::Value {
        json!({
            "total_tasks": self.items.len(),
            "total_tokens": self.items.iter().map(|i| i.tokens_in + i.tokens_out).sum::<u64>(),
            "total_cost": self.items.iter().map(|i| i.total_cost).sum::<f64>(),
            "favorite_count": self.items.iter().filter(|i| i.is_favorited).count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_search_sort() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = TaskHistoryManager::new(dir.path());

        manager.add_or_update_task("t1", "analyze the parser module", None, None, None);
        manager.add_or_update_task("t2", "write report", None, None, None);
        manager.update_task_usage("t1", 10, 5, 0, 0, 0.5, 100);

        let all = manager.search_tasks(None, false, TaskSort::Newest, 100);
        assert_eq!(all.len(), 2);

        let found = manager.search_tasks(Some("parser"), false, TaskSort::Newest, 100);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "t1");

        let by_cost = manager.search_tasks(None, false, TaskSort::Cost, 100);
        assert_eq!(by_cost[0].id, "t1");

        assert_eq!(manager.search_tasks(None, false, TaskSort::Newest, 1).len(), 1);
    }

    #[tokio::test]
    async fn test_favorite_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = TaskHistoryManager::new(dir.path());
        manager.add_or_update_task("t1", "task one", None, None, None);

        assert!(manager.toggle_favorite("t1"));
        assert!(!manager.toggle_favorite("t1"));
        assert!(!manager.toggle_favorite("missing"));

        manager.toggle_favorite("t1");
        let favorites = manager.search_tasks(None, true, TaskSort::Newest, 100);
        assert_eq!(favorites.len(), 1);

        assert!(manager.delete_task("t1"));
        assert!(!manager.delete_task("t1"));
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = TaskHistoryManager::new(dir.path());
        manager.add_or_update_task("t1", &"很长的描述".repeat(40), None, None, None);
        assert!(manager.save().await);

        // Description truncated to 100 chars
        assert!(manager.get_task("t1").unwrap().task.chars().count() <= 100);

        let mut reloaded = TaskHistoryManager::new(dir.path());
        assert!(reloaded.load().await);
        assert!(reloaded.get_task("t1").is_some());
    }

    #[test]
    fn test_merge_by_id() {
        let mut manager = TaskHistoryManager::new("/tmp");
        manager.add_or_update_task("t1", "first", None, None, None);
        let first_updated = manager.get_task("t1").unwrap().last_updated;
        manager.add_or_update_task("t1", "changed description", None, None, None);
        // still one item, description unchanged, timestamp bumped
        assert_eq!(manager.items.len(), 1);
        assert_eq!(manager.get_task("t1").unwrap().task, "first");
        assert!(manager.get_task("t1").unwrap().last_updated >= first_updated);
    }
}
