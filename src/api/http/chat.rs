// src/api/http/chat.rs
// Task execution endpoint: runs the engine and surfaces its events as
// server-sent events, one `data: <json>` frame per event

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::llm::AiConfig;
use crate::state::AppState;
use crate::task::TaskRequest;

#[derive(Debug, Deserialize)]
pub struct ExecuteTaskRequest {
    pub user_input: String,
    pub repository_path: String,
    #[serde(flatten)]
    pub ai_config: AiConfig,
    #[serde(default)]
    pub task_id: Option<String>,
}

/// POST /api/tasks/execute — streams engine events until the terminal one.
pub async fn execute_task(
    State(state): State<AppState>,
    Json(request): Json<ExecuteTaskRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(
        "[API] execute task: repo={} resume={:?}",
        request.repository_path, request.task_id
    );

    let (event_tx, mut event_rx) = mpsc::channel(64);
    let engine = Arc::clone(&state.engine);
    let abort = Arc::new(AtomicBool::new(false));

    let task_request = TaskRequest {
        user_input: request.user_input,
        repository_path: request.repository_path,
        ai_config: request.ai_config,
        task_id: request.task_id,
    };

    // The engine closes the channel when it returns; the stream ends with it
    tokio::spawn(async move {
        engine.execute_task(task_request, abort, event_tx).await;
    });

    let stream = async_stream::stream! {
        while let Some(event) = event_rx.recv().await {
            let payload = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
            yield Ok(Event::default().data(payload));
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
pub struct TestAiRequest {
    #[serde(flatten)]
    pub ai_config: AiConfig,
}

/// POST /api/ai/test — connectivity probe for the configuration screen.
pub async fn test_ai_connection(
    State(state): State<AppState>,
    Json(request): Json<TestAiRequest>,
) -> Json<Value> {
    match state.ai_manager.test_connection(&request.ai_config).await {
        Ok(ok) => Json(json!({ "success": ok })),
        Err(e) => Json(json!({ "success": false, "error": e.to_string() })),
    }
}
