// src/task/prompt_builder.rs
// System prompt assembly: rules, tool catalog, MCP server section, and the
// repository path

use std::fmt::Write as _;
use std::sync::Arc;

use crate::mcp::McpServerManager;
use crate::tools::{categories, ToolCoordinator, ToolSpec};

pub struct PromptBuilder {
    coordinator: Arc<ToolCoordinator>,
    mcp_manager: Arc<McpServerManager>,
}

impl PromptBuilder {
    pub fn new(coordinator: Arc<ToolCoordinator>, mcp_manager: Arc<McpServerManager>) -> Self {
        Self {
            coordinator,
            mcp_manager,
        }
    }

    /// Build the full system prompt for one LLM call. Reads the live tool
    /// catalog so dynamic MCP tools track the running server set.
    pub async fn build_prompt(&self, repository_path: &str) -> String {
        let tools_section = self.build_tools_section();
        let mcp_section = self.build_mcp_section().await;

        format!(
            r#"# RepoLens - AI 驱动的 Git 仓库智能分析助手

你是一个专业的 AI 编码助手，专门帮助开发者理解和分析 Git 仓库。

## 核心规则（CRITICAL - 必须严格遵守）

- 你的目标是完成用户的任务，而不是进行对话。**你必须通过工具调用来获取信息和执行操作，而不是用文本描述应该做什么。**
- **严格禁止**使用"好的"、"当然"、"没问题"等对话性开场白。直接开始执行任务。
- 当需要查看文件、Git 状态、目录内容等信息时，**必须调用相应的工具**，绝不能说"我会帮你查看"或类似的话。
- 用户指定了文件路径时，**必须严格使用该路径**，不要自行添加或修改目录。
- 任务完成后**必须调用 `attempt_completion` 工具**来结束任务并展示结果。
- 在所有要求的操作（创建文件、修改代码等）完成之前，**绝对不要**调用 `attempt_completion`。
- 不要假设任何工具的执行结果，必须等待实际的工具响应。

## 文件路径约定

- 所有路径都是相对于仓库根目录的相对路径
- 使用正斜杠 '/' 作为路径分隔符
- 不要使用绝对路径或 './' '../' 前缀

## 标准工作流程

1. **理解需求**：理解用户想要完成什么
2. **评估信息**：判断已有哪些信息，还需要哪些信息
3. **选择工具**：根据任务选择最合适的工具
4. **执行工具**：发出工具调用并等待结果
5. **分析结果**：基于实际返回的结果决定下一步
6. **继续或完成**：继续调用工具，或调用 attempt_completion 结束任务

## 可用工具列表

{tools_section}
{mcp_section}
## Git 仓库信息

- 当前仓库路径：{repository_path}
"#,
        )
    }

    /// Tool catalog from the coordinator's specs. Meta-tools (category
    /// `mcp`) are described in the MCP section instead, to avoid duplication.
    fn build_tools_section(&self) -> String {
        let mut section = String::new();

        for spec in self.coordinator.list_tools() {
            if spec.category == categories::MCP {
                continue;
            }
            self.render_tool(&mut section, &spec);
        }

        section
    }

    fn render_tool(&self, out: &mut String, spec: &ToolSpec) {
        let _ = writeln!(out, "**{}**: {}", spec.name, spec.description);
        if !spec.parameters.is_empty() {
            let _ = writeln!(out, "  参数:");
            for param in &spec.parameters {
                let required = if param.required { "必需" } else { "可选" };
                let _ = writeln!(
                    out,
                    "  - {} ({}, {}): {}",
                    param.name, param.param_type, required, param.description
                );
            }
        }
        let _ = writeln!(out);
    }

    /// MCP section: every enabled, configured server with its status and,
    /// when connected, its tool and resource lists.
    async fn build_mcp_section(&self) -> String {
        let configs = self.mcp_manager.list_server_configs().await;
        let mut entries = String::new();

        for (name, config) in configs {
            if !config.enabled {
                continue;
            }
            let status = self.mcp_manager.server_status(&name).await;
            if status.status == "not_configured" {
                continue;
            }

            let _ = writeln!(
                entries,
                "### {} ({}，状态: {})",
                name,
                config.transport_type.as_str(),
                status.status
            );
            if !config.description.is_empty() {
                let _ = writeln!(entries, "{}", config.description);
            }

            if status.connected {
                if let Ok(tools) = self.mcp_manager.list_tools(&name).await {
                    if !tools.is_empty() {
                        let _ = writeln!(entries, "可用工具:");
                        for tool in tools {
                            let _ = writeln!(
                                entries,
                                "- {}: {}",
                                tool.name,
                                tool.description.unwrap_or_default()
                            );
                            if let Some(schema) = tool.input_schema {
                                let _ = writeln!(
                                    entries,
                                    "  参数 schema: {}",
                                    serde_json::to_string(&schema).unwrap_or_default()
                                );
                            }
                        }
                    }
                }
                if let Ok(resources) = self.mcp_manager.list_resources(&name).await {
                    if !resources.is_empty() {
                        let _ = writeln!(entries, "可用资源:");
                        for resource in resources {
                            let _ = writeln!(entries, "- {} ({})", resource.uri, resource.name);
                        }
                    }
                }
            }
            let _ = writeln!(entries);
        }

        if entries.is_empty() {
            return String::new();
        }

        format!(
            r#"## MCP 服务器

以下是已配置的 MCP (Model Context Protocol) 服务器。使用 `use_mcp_tool` 调用其工具，
使用 `access_mcp_resource` 读取其资源，使用 `list_mcp_servers` 查看最新状态。

{entries}
"#,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::handlers;

    #[tokio::test]
    async fn test_prompt_contains_rules_tools_and_repo_path() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(McpServerManager::new(dir.path().join("mcp.json")));
        let coordinator = Arc::new(ToolCoordinator::new());
        coordinator.initialize_default_tools(Arc::clone(&manager));

        let builder = PromptBuilder::new(Arc::clone(&coordinator), manager);
        let prompt = builder.build_prompt("/repo/path").await;

        assert!(prompt.contains("attempt_completion"));
        assert!(prompt.contains("read_file"));
        assert!(prompt.contains("核心规则"));
        assert!(prompt.contains("/repo/path"));
        // Meta-tools are excluded from the general catalog section
        let catalog_start = prompt.find("## 可用工具列表").unwrap();
        let catalog_end = prompt.find("## Git 仓库信息").unwrap();
        let catalog = &prompt[catalog_start..catalog_end];
        assert!(!catalog.contains("**use_mcp_tool**"));
    }

    #[tokio::test]
    async fn test_prompt_includes_dynamic_tools() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(McpServerManager::new(dir.path().join("mcp.json")));
        let coordinator = Arc::new(ToolCoordinator::new());

        // a dynamic tool spec registered directly
        let spec = handlers::mcp_dynamic::convert_mcp_tool_to_spec(
            "drawio",
            &crate::mcp::McpTool {
                name: "create".to_string(),
                description: Some("make a diagram".to_string()),
                input_schema: None,
            },
        );
        coordinator.register(Arc::new(handlers::mcp_dynamic::DynamicMcpToolHandler::new(
            spec,
            Arc::clone(&manager),
        )));

        let builder = PromptBuilder::new(coordinator, manager);
        let prompt = builder.build_prompt("/repo").await;
        assert!(prompt.contains("drawio__mcp__create"));
    }
}
