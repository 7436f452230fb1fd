// src/task/engine.rs
// The recursive task loop: build messages -> call LLM with tools ->
// execute tool calls -> feed results back -> loop until completion

use serde_json::{json, Map, Value};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::events::{TaskEvent, ToolCallSummary};
use super::prompt_builder::PromptBuilder;
use super::state::TaskState;
use crate::context::{
    ContextCompressor, ConversationHistoryManager, TaskHistoryManager, ToolCallRecord,
    epoch_seconds,
};
use crate::llm::{AiConfig, AiManager, ApiMessage};
use crate::mcp::McpServerManager;
use crate::tools::handlers::completion::ATTEMPT_COMPLETION;
use crate::tools::{tools_to_openai_functions, ToolCall, ToolContext, ToolCoordinator};

/// Iteration ceiling; effectively unbounded, the mistake counter is the
/// real guard.
pub const DEFAULT_MAX_ITERATIONS: u32 = 999;

/// Consecutive failed iterations tolerated before the task is terminated
pub const DEFAULT_MAX_CONSECUTIVE_MISTAKES: u32 = 3;

/// Tool result payloads larger than this are truncated before storage
const MAX_TOOL_RESULT_CHARS: usize = 10_000;

/// Tool results rendered into history messages are cut to this length
const HISTORY_RESULT_PREVIEW_CHARS: usize = 500;

/// Nudge sent when an iteration produced neither tool calls nor content
const CONTINUE_NUDGE: &str = "请使用工具来完成任务，或者如果任务已完成，请明确告知。";

pub struct TaskEngine {
    ai_manager: Arc<AiManager>,
    coordinator: Arc<ToolCoordinator>,
    mcp_manager: Arc<McpServerManager>,
    max_iterations: u32,
    max_consecutive_mistakes: u32,
}

/// Inputs for one task run
pub struct TaskRequest {
    pub user_input: String,
    pub repository_path: String,
    pub ai_config: AiConfig,
    /// Resume an existing task when set
    pub task_id: Option<String>,
}

impl TaskEngine {
    pub fn new(
        ai_manager: Arc<AiManager>,
        coordinator: Arc<ToolCoordinator>,
        mcp_manager: Arc<McpServerManager>,
    ) -> Self {
        Self {
            ai_manager,
            coordinator,
            mcp_manager,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_consecutive_mistakes: DEFAULT_MAX_CONSECUTIVE_MISTAKES,
        }
    }

    pub fn with_limits(mut self, max_iterations: u32, max_consecutive_mistakes: u32) -> Self {
        self.max_iterations = max_iterations;
        self.max_consecutive_mistakes = max_consecutive_mistakes;
        self
    }

    /// Generate a short task id (also the conversation id)
    pub fn generate_task_id() -> String {
        Uuid::new_v4().simple().to_string()[..8].to_string()
    }

    /// Run one task to completion, streaming events into `event_tx`.
    /// History is saved and the task index updated regardless of outcome;
    /// no event follows the terminal one.
    pub async fn execute_task(
        &self,
        request: TaskRequest,
        abort: Arc<AtomicBool>,
        event_tx: mpsc::Sender<TaskEvent>,
    ) {
        let task_id = request
            .task_id
            .clone()
            .unwrap_or_else(Self::generate_task_id);

        info!(
            "[ENGINE] task {} starting in {} ({} chars input)",
            task_id,
            request.repository_path,
            request.user_input.len()
        );

        // Task index entry (add-or-update by id)
        let mut task_index = TaskHistoryManager::new(&request.repository_path);
        task_index.load().await;
        task_index.add_or_update_task(
            &task_id,
            &request.user_input,
            Some(request.ai_config.provider.clone()),
            Some(request.ai_config.model.clone()),
            Some(request.repository_path.clone()),
        );
        let _ = task_index.save().await;

        // Conversation history; resuming loads prior messages
        let mut history = ConversationHistoryManager::new(&task_id, &request.repository_path);
        let resumed = request.task_id.is_some() && history.load_history().await;
        let is_new_task = !resumed;

        history.append_message(
            "user",
            format!("<task>\n{}\n</task>", request.user_input),
            None,
            None,
            None,
        );

        let mut state = TaskState::with_abort_handle(abort);

        let emit = |event: TaskEvent| {
            let tx = event_tx.clone();
            async move {
                if tx.send(event).await.is_err() {
                    warn!("[ENGINE] event receiver dropped");
                }
            }
        };

        emit(TaskEvent::TaskStarted {
            task_id: task_id.clone(),
            is_new_task,
        })
        .await;

        let context = ToolContext {
            repository_path: request.repository_path.clone().into(),
            task_id: Some(task_id.clone()),
            ai_config: Some(request.ai_config.clone()),
            metadata: None,
        };
        let prompt_builder =
            PromptBuilder::new(Arc::clone(&self.coordinator), Arc::clone(&self.mcp_manager));

        let mut total_tokens_in = 0u64;
        let mut total_tokens_out = 0u64;
        let mut cache_reads = 0u64;
        let mut cache_writes = 0u64;

        let mut iteration = 0u32;
        'task: while iteration < self.max_iterations {
            iteration += 1;

            if state.should_abort() {
                info!("[ENGINE] task {} aborted at iteration {}", task_id, iteration);
                emit(TaskEvent::Aborted { iteration }).await;
                break 'task;
            }

            if state.consecutive_mistake_count >= self.max_consecutive_mistakes {
                error!(
                    "[ENGINE] task {} hit mistake limit ({})",
                    task_id, state.consecutive_mistake_count
                );
                emit(TaskEvent::Error {
                    iteration: Some(iteration),
                    message: format!(
                        "达到最大连续错误次数 ({})",
                        state.consecutive_mistake_count
                    ),
                })
                .await;
                break 'task;
            }

            // Build the transient message list; compression never touches
            // the persisted history
            let mut messages = render_api_messages(&history);
            if ContextCompressor::should_compress(&messages, &request.ai_config.model)
                || ContextCompressor::must_compress(&messages, &request.ai_config.model)
            {
                match ContextCompressor::compress(&messages, &request.ai_config.model) {
                    Ok((compressed, stats)) => {
                        info!(
                            "[ENGINE] compression: {} -> {} messages, ratio {:.2}",
                            stats.original_messages,
                            stats.compressed_messages,
                            stats.compression_ratio
                        );
                        messages = compressed;
                    }
                    Err(e) => {
                        error!("[ENGINE] context compression failed: {}", e);
                        state.increment_mistake_count();
                        emit(TaskEvent::Error {
                            iteration: Some(iteration),
                            message: e.to_string(),
                        })
                        .await;
                        continue 'task;
                    }
                }
            }

            emit(TaskEvent::ApiRequestStarted {
                iteration,
                message_count: messages.len(),
            })
            .await;

            // The catalog is recomputed per call so dynamic MCP tools track
            // the live server set
            let tools = tools_to_openai_functions(&self.coordinator);
            let system_prompt = prompt_builder.build_prompt(&request.repository_path).await;

            state.increment_api_request_count();
            let response = match self
                .ai_manager
                .chat_with_tools(&request.ai_config, &messages, Some(&system_prompt), &tools)
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    error!("[ENGINE] LLM call failed: {}", e);
                    state.increment_mistake_count();
                    emit(TaskEvent::Error {
                        iteration: Some(iteration),
                        message: format!("AI 调用失败: {}", e),
                    })
                    .await;
                    continue 'task;
                }
            };

            if let Some(usage) = &response.usage {
                total_tokens_in += usage.tokens_in;
                total_tokens_out += usage.tokens_out;
                cache_reads += usage.cache_read_tokens;
                cache_writes += usage.cache_write_tokens;
            }

            emit(TaskEvent::ApiResponse {
                iteration,
                content: response.content.clone(),
            })
            .await;

            // Parse tool calls; unparseable arguments are skipped and
            // counted against the iteration
            let mut parse_failures = 0usize;
            let mut tool_calls: Vec<ToolCall> = Vec::new();
            for call in &response.tool_calls {
                match crate::tools::parse_tool_call_arguments(&call.arguments) {
                    Ok(parameters) => tool_calls.push(ToolCall {
                        id: if call.id.is_empty() {
                            Uuid::new_v4().to_string()
                        } else {
                            call.id.clone()
                        },
                        name: call.name.clone(),
                        parameters,
                    }),
                    Err(e) => {
                        error!("[ENGINE] tool call argument parse failed: {}", e);
                        parse_failures += 1;
                    }
                }
            }

            // Assistant message with its (unresolved) tool calls
            let records: Vec<ToolCallRecord> = tool_calls
                .iter()
                .map(|call| ToolCallRecord {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    parameters: call.parameters.clone(),
                    result: None,
                    timestamp: epoch_seconds(),
                })
                .collect();
            history.append_message(
                "assistant",
                response.content.clone(),
                if records.is_empty() { None } else { Some(records) },
                Some(request.ai_config.model.clone()),
                response.usage.as_ref().map(|u| u.total),
            );

            if tool_calls.is_empty() {
                if parse_failures > 0 {
                    state.increment_mistake_count();
                    emit(TaskEvent::Error {
                        iteration: Some(iteration),
                        message: "工具调用参数解析失败".to_string(),
                    })
                    .await;
                    continue 'task;
                }
                if !response.content.is_empty() {
                    // A plain final answer ends the task
                    emit(TaskEvent::Completion {
                        iteration,
                        content: Some(response.content),
                        result: None,
                    })
                    .await;
                    break 'task;
                }
                // Neither tools nor content: nudge and count a mistake
                state.increment_mistake_count();
                history.append_message("user", CONTINUE_NUDGE, None, None, None);
                continue 'task;
            }

            emit(TaskEvent::ToolCallsDetected {
                iteration,
                tool_calls: tool_calls
                    .iter()
                    .map(|call| ToolCallSummary {
                        name: call.name.clone(),
                        parameters: Value::Object(call.parameters.clone()),
                    })
                    .collect(),
            })
            .await;

            // Execute sequentially in emission order
            let mut formatted_results: Vec<Value> = Vec::new();
            let mut completion_result: Option<String> = None;
            let mut any_success = false;

            for call in &tool_calls {
                emit(TaskEvent::ToolExecutionStarted {
                    iteration,
                    tool_name: call.name.clone(),
                })
                .await;

                let result = self.coordinator.execute(call, &context).await;
                let truncated_data = result.data.as_ref().map(truncate_result_data);

                if result.success {
                    any_success = true;
                    if call.name == ATTEMPT_COMPLETION {
                        completion_result = result
                            .data
                            .as_ref()
                            .and_then(|d| d.get("result"))
                            .and_then(|r| r.as_str())
                            .map(|s| s.to_string())
                            .or_else(|| {
                                call.parameters
                                    .get("result")
                                    .and_then(|r| r.as_str())
                                    .map(|s| s.to_string())
                            });
                    }
                }

                let stored_result = json!({
                    "tool": call.name,
                    "success": result.success,
                    "data": truncated_data,
                    "error": result.error,
                });

                emit(TaskEvent::ToolExecutionCompleted {
                    iteration,
                    tool_name: call.name.clone(),
                    result: stored_result.clone(),
                })
                .await;

                history.attach_tool_result(&call.id, stored_result.clone());
                formatted_results.push(stored_result);
            }

            if let Some(result) = completion_result {
                emit(TaskEvent::Completion {
                    iteration,
                    content: None,
                    result: Some(result),
                })
                .await;
                break 'task;
            }

            if !any_success {
                state.increment_mistake_count();
                emit(TaskEvent::Error {
                    iteration: Some(iteration),
                    message: "所有工具调用均失败".to_string(),
                })
                .await;
            }

            // Feed the results back as the next user content
            let feedback = format_tool_results(&formatted_results);
            history.append_message("user", feedback, None, None, None);
        }

        if iteration >= self.max_iterations {
            warn!("[ENGINE] task {} exhausted {} iterations", task_id, iteration);
        }

        // Finalization: persist state whatever the outcome. Failures here
        // are logged, never surfaced as events.
        if !history.save_history().await {
            error!("[ENGINE] failed to save conversation history for {}", task_id);
        }
        let size = history.stats().await.task_dir_size;
        task_index.update_task_usage(
            &task_id,
            total_tokens_in,
            total_tokens_out,
            cache_writes,
            cache_reads,
            0.0,
            size,
        );
        if !task_index.save().await {
            error!("[ENGINE] failed to save task history index for {}", task_id);
        }

        info!(
            "[ENGINE] task {} finished: {} iterations, {} in / {} out tokens",
            task_id, iteration, total_tokens_in, total_tokens_out
        );
    }
}

/// Render stored history into the transient API message list. Tool calls
/// and their results become readable inline text on the owning message.
fn render_api_messages(history: &ConversationHistoryManager) -> Vec<ApiMessage> {
    history
        .messages()
        .iter()
        .map(|message| {
            let mut content = message.content.clone();
            if let Some(tool_calls) = &message.tool_calls {
                for call in tool_calls {
                    let desc = render_call_desc(&call.name, &call.parameters);
                    let result_text = call
                        .result
                        .as_ref()
                        .map(|r| {
                            let rendered =
                                serde_json::to_string(r).unwrap_or_else(|_| "null".to_string());
                            truncate_chars(&rendered, HISTORY_RESULT_PREVIEW_CHARS)
                        })
                        .unwrap_or_else(|| "(未执行)".to_string());
                    content.push_str(&format!("\n[工具调用] {}\n结果: {}", desc, result_text));
                }
            }
            ApiMessage {
                role: message.role.clone(),
                content: Value::String(content),
            }
        })
        .collect()
}

fn render_call_desc(name: &str, parameters: &Map<String, Value>) -> String {
    let params = parameters
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{}({})", name, params)
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let truncated: String = text.chars().take(limit).collect();
    format!("{}...(已截断)", truncated)
}

/// Cap a tool result's data payload at 10k characters.
fn truncate_result_data(data: &Value) -> Value {
    let rendered = serde_json::to_string(data).unwrap_or_default();
    if rendered.chars().count() <= MAX_TOOL_RESULT_CHARS {
        return data.clone();
    }
    let truncated: String = rendered.chars().take(MAX_TOOL_RESULT_CHARS).collect();
    Value::String(format!(
        "{}\n\n[提示] 工具结果过长已被截断 (原始 {} 字符)。",
        truncated,
        rendered.chars().count()
    ))
}

/// Concatenated XML feedback block handed back to the model.
fn format_tool_results(results: &[Value]) -> String {
    let mut formatted = Vec::new();

    for result in results {
        let tool = result.get("tool").and_then(|t| t.as_str()).unwrap_or("");
        let success = result
            .get("success")
            .and_then(|s| s.as_bool())
            .unwrap_or(false);

        formatted.push("<response>".to_string());
        formatted.push(format!("<tool>{}</tool>", tool));
        if success {
            formatted.push("<status>success</status>".to_string());
            if let Some(data) = result.get("data") {
                if !data.is_null() {
                    let data_str = serde_json::to_string_pretty(data).unwrap_or_default();
                    formatted.push(format!("<data>\n```json\n{}\n```\n</data>", data_str));
                }
            }
        } else {
            formatted.push("<status>error</status>".to_string());
            let error = result
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("Unknown error");
            formatted.push(format!("<error>{}</error>", error));
        }
        formatted.push("</response>".to_string());
        formatted.push(String::new());
    }

    formatted.join("\n")
}
