// src/tools/handlers/completion.rs
// attempt_completion: the terminal sentinel tool. The engine treats its
// execution as the stop condition for the task loop.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::tools::handler::params;
use crate::tools::{categories, ToolContext, ToolError, ToolHandler, ToolParameter, ToolSpec};

/// Name checked by the engine to detect the stop condition
pub const ATTEMPT_COMPLETION: &str = "attempt_completion";

pub struct AttemptCompletionHandler;

#[async_trait]
impl ToolHandler for AttemptCompletionHandler {
    fn name(&self) -> &str {
        ATTEMPT_COMPLETION
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: ATTEMPT_COMPLETION.to_string(),
            description: concat!(
                "在每个工具使用后，用户会响应该工具的使用结果。一旦你收到工具使用的结果并可以确认任务已完成，",
                "使用此工具向用户展示你的工作成果。你可以选择提供一个 CLI 命令来展示你的工作成果。\n\n",
                "**重要提示 (CRITICAL - 必须严格遵守)**:\n",
                "此工具只能在确认所有工具使用都成功**并且所有任务都已完成**之后才能使用！",
                "在使用此工具之前，你必须确认:\n",
                "1. 之前的所有工具使用都成功了\n",
                "2. 用户要求的所有任务都已完成（例如创建文件、修改代码、生成报告等）\n",
                "如果任何答案是否定的，则**绝对不要**使用此工具，而是继续执行必要的工具调用。"
            )
            .to_string(),
            category: categories::COMPLETION.to_string(),
            parameters: vec![
                ToolParameter::required(
                    "result",
                    "string",
                    "任务结果的清晰、具体的描述。应该是对结果的简洁总结，通常 1-2 段话。",
                ),
                ToolParameter::optional(
                    "command",
                    "string",
                    "用于展示工作成果的可执行 CLI 命令（可选）。不要使用仅打印文本的命令。",
                    None,
                ),
            ],
        }
    }

    async fn execute(
        &self,
        parameters: Map<String, Value>,
        _context: &ToolContext,
    ) -> Result<Value, ToolError> {
        let result = params::required_str(&parameters, "result")?;
        let command = parameters.get("command").and_then(|v| v.as_str());

        info!(
            "[TOOL] task completed: {}",
            result.chars().take(100).collect::<String>()
        );

        let mut response = json!({
            "type": "completion",
            "success": true,
            "result": result,
        });
        if let Some(command) = command {
            response["suggested_command"] = json!(command);
        }
        Ok(response)
    }
}
