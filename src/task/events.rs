// src/task/events.rs
// Typed events emitted by the task engine; serialized with a `type` tag
// for the SSE layer

use serde::Serialize;
use serde_json::Value;

/// Summary of one detected tool call, as surfaced in events
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallSummary {
    pub name: String,
    pub parameters: Value,
}

/// Events emitted during one task run. The engine closes the channel after
/// the terminal event (`completion`, `error`, or `aborted`).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    TaskStarted {
        task_id: String,
        is_new_task: bool,
    },
    ApiRequestStarted {
        iteration: u32,
        message_count: usize,
    },
    ApiResponse {
        iteration: u32,
        content: String,
    },
    ToolCallsDetected {
        iteration: u32,
        tool_calls: Vec<ToolCallSummary>,
    },
    ToolExecutionStarted {
        iteration: u32,
        tool_name: String,
    },
    ToolExecutionCompleted {
        iteration: u32,
        tool_name: String,
        result: Value,
    },
    Completion {
        iteration: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        iteration: Option<u32>,
        message: String,
    },
    Aborted {
        iteration: u32,
    },
}

impl TaskEvent {
    /// Terminal events end the run; nothing may be emitted after one.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskEvent::Completion { .. } | TaskEvent::Error { .. } | TaskEvent::Aborted { .. }
        )
    }
}
