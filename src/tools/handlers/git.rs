// src/tools/handlers/git.rs
// Read-only git tool handlers over GitClient

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::git::GitClient;
use crate::tools::handler::params;
use crate::tools::{categories, ToolContext, ToolError, ToolHandler, ToolParameter, ToolSpec};

fn client_for(context: &ToolContext) -> GitClient {
    GitClient::new(&context.repository_path)
}

pub struct GitStatusHandler;

#[async_trait]
impl ToolHandler for GitStatusHandler {
    fn name(&self) -> &str {
        "git_status"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "git_status".to_string(),
            description: "查看 Git 工作区状态。".to_string(),
            category: categories::GIT.to_string(),
            parameters: vec![],
        }
    }

    async fn execute(
        &self,
        _parameters: Map<String, Value>,
        context: &ToolContext,
    ) -> Result<Value, ToolError> {
        let status = client_for(context)
            .status()
            .await
            .map_err(|e| ToolError::Execution(format!("Git status 执行失败: {}", e)))?;
        Ok(json!({
            "repo_path": context.repository_path.to_string_lossy(),
            "status": status,
        }))
    }
}

pub struct GitLogHandler;

#[async_trait]
impl ToolHandler for GitLogHandler {
    fn name(&self) -> &str {
        "git_log"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "git_log".to_string(),
            description: "查看 Git 提交历史。".to_string(),
            category: categories::GIT.to_string(),
            parameters: vec![
                ToolParameter::optional("limit", "integer", "返回的提交数量限制", Some(json!(10))),
                ToolParameter::optional(
                    "file_path",
                    "string",
                    "指定文件的提交历史（可选）",
                    Some(json!("")),
                ),
            ],
        }
    }

    async fn execute(
        &self,
        parameters: Map<String, Value>,
        context: &ToolContext,
    ) -> Result<Value, ToolError> {
        let limit = params::optional_u64(&parameters, "limit", 10) as usize;
        let file_path = params::optional_str(&parameters, "file_path", "").to_string();
        let path_filter = if file_path.is_empty() {
            None
        } else {
            Some(file_path.clone())
        };

        let commits = client_for(context)
            .log(limit, path_filter)
            .await
            .map_err(|e| ToolError::Execution(format!("Git log 执行失败: {}", e)))?;

        Ok(json!({
            "file_path": if file_path.is_empty() { "(所有文件)".to_string() } else { file_path },
            "limit": limit,
            "total_count": commits.len(),
            "commits": commits,
        }))
    }
}

pub struct GitDiffHandler;

#[async_trait]
impl ToolHandler for GitDiffHandler {
    fn name(&self) -> &str {
        "git_diff"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "git_diff".to_string(),
            description: "查看 Git 工作区或暂存区的变更差异。".to_string(),
            category: categories::GIT.to_string(),
            parameters: vec![
                ToolParameter::optional(
                    "file_path",
                    "string",
                    "要查看差异的文件路径（可选，空字符串表示所有变更）",
                    Some(json!("")),
                ),
                ToolParameter::optional(
                    "staged",
                    "boolean",
                    "是否查看已暂存的变更（默认查看工作区变更）",
                    Some(json!(false)),
                ),
            ],
        }
    }

    async fn execute(
        &self,
        parameters: Map<String, Value>,
        context: &ToolContext,
    ) -> Result<Value, ToolError> {
        let file_path = params::optional_str(&parameters, "file_path", "").to_string();
        let staged = params::optional_bool(&parameters, "staged", false);
        let path_filter = if file_path.is_empty() {
            None
        } else {
            Some(file_path.clone())
        };

        let diff = client_for(context)
            .diff(path_filter, staged)
            .await
            .map_err(|e| ToolError::Execution(format!("Git diff 执行失败: {}", e)))?;

        Ok(json!({
            "file_path": if file_path.is_empty() { "(所有文件)".to_string() } else { file_path },
            "staged": staged,
            "diff": diff,
            "repo_path": context.repository_path.to_string_lossy(),
        }))
    }
}

pub struct GitBranchHandler;

#[async_trait]
impl ToolHandler for GitBranchHandler {
    fn name(&self) -> &str {
        "git_branch"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "git_branch".to_string(),
            description: "列出、创建或切换 Git 分支。".to_string(),
            category: categories::GIT.to_string(),
            parameters: vec![
                ToolParameter::optional(
                    "action",
                    "string",
                    "操作类型: list（列出分支）, current（当前分支）, create（创建分支）, switch（切换分支）",
                    Some(json!("list")),
                ),
                ToolParameter::optional(
                    "branch_name",
                    "string",
                    "分支名称（create 或 switch 时需要）",
                    Some(json!("")),
                ),
            ],
        }
    }

    async fn execute(
        &self,
        parameters: Map<String, Value>,
        context: &ToolContext,
    ) -> Result<Value, ToolError> {
        let action = params::optional_str(&parameters, "action", "list").to_string();
        let branch_name = params::optional_str(&parameters, "branch_name", "").to_string();
        let client = client_for(context);

        match action.as_str() {
            "list" => {
                let branches = client
                    .list_branches()
                    .await
                    .map_err(|e| ToolError::Execution(format!("Git branch 执行失败: {}", e)))?;
                Ok(json!({ "action": action, "branches": branches }))
            }
            "current" => {
                let current = client
                    .current_branch()
                    .await
                    .map_err(|e| ToolError::Execution(format!("Git branch 执行失败: {}", e)))?;
                Ok(json!({ "action": action, "current_branch": current }))
            }
            "create" => {
                if branch_name.is_empty() {
                    return Err(ToolError::Execution("创建分支需要提供 branch_name".to_string()));
                }
                client
                    .create_branch(branch_name.clone())
                    .await
                    .map_err(|e| ToolError::Execution(format!("创建分支失败: {}", e)))?;
                Ok(json!({
                    "action": action,
                    "branch_name": branch_name,
                    "message": format!("分支 {} 创建成功", branch_name),
                }))
            }
            "switch" => {
                if branch_name.is_empty() {
                    return Err(ToolError::Execution("切换分支需要提供 branch_name".to_string()));
                }
                client
                    .switch_branch(branch_name.clone())
                    .await
                    .map_err(|e| ToolError::Execution(format!("切换分支失败: {}", e)))?;
                Ok(json!({
                    "action": action,
                    "branch_name": branch_name,
                    "message": format!("已切换到分支 {}", branch_name),
                }))
            }
            other => Err(ToolError::Execution(format!("未知操作: {}", other))),
        }
    }
}
