// src/api/http/sessions.rs
// Session (task history) endpoints: list, load, delete, favorite

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::context::{ConversationHistoryManager, TaskHistoryManager, TaskSort};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub repository_path: String,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub favorites_only: bool,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct TaskScopeQuery {
    pub repository_path: String,
}

/// GET /api/sessions?repository_path=...&query=...&favorites_only=...
pub async fn list_tasks(
    State(_state): State<AppState>,
    Query(params): Query<ListTasksQuery>,
) -> Json<Value> {
    let mut index = TaskHistoryManager::new(&params.repository_path);
    index.load().await;

    let sort = params
        .sort_by
        .as_deref()
        .map(TaskSort::from_str)
        .unwrap_or_default();
    let tasks = index.search_tasks(
        params.query.as_deref(),
        params.favorites_only,
        sort,
        params.limit.unwrap_or(100),
    );

    Json(json!({
        "tasks": tasks,
        "stats": index.stats(),
    }))
}

/// GET /api/sessions/{task_id}?repository_path=... — full message log with
/// tool calls, for resuming in the UI.
pub async fn load_task(
    State(_state): State<AppState>,
    Path(task_id): Path<String>,
    Query(params): Query<TaskScopeQuery>,
) -> Result<Json<Value>, StatusCode> {
    let mut history = ConversationHistoryManager::new(&task_id, &params.repository_path);
    if !history.load_history().await {
        return Err(StatusCode::NOT_FOUND);
    }

    Ok(Json(json!({
        "task_id": task_id,
        "messages": history.messages(),
        "stats": history.stats().await,
    })))
}

/// DELETE /api/sessions/{task_id}?repository_path=...
pub async fn delete_task(
    State(_state): State<AppState>,
    Path(task_id): Path<String>,
    Query(params): Query<TaskScopeQuery>,
) -> Json<Value> {
    let history = ConversationHistoryManager::new(&task_id, &params.repository_path);
    let files_deleted = history.delete_history_files().await;

    let mut index = TaskHistoryManager::new(&params.repository_path);
    index.load().await;
    let index_deleted = index.delete_task(&task_id);
    index.save().await;

    Json(json!({
        "success": files_deleted || index_deleted,
        "task_id": task_id,
    }))
}

/// POST /api/sessions/{task_id}/favorite?repository_path=...
pub async fn toggle_favorite(
    State(_state): State<AppState>,
    Path(task_id): Path<String>,
    Query(params): Query<TaskScopeQuery>,
) -> Result<Json<Value>, StatusCode> {
    let mut index = TaskHistoryManager::new(&params.repository_path);
    index.load().await;

    if index.get_task(&task_id).is_none() {
        return Err(StatusCode::NOT_FOUND);
    }
    let is_favorited = index.toggle_favorite(&task_id);
    index.save().await;

    Ok(Json(json!({
        "task_id": task_id,
        "is_favorited": is_favorited,
    })))
}
