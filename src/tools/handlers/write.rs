// src/tools/handlers/write.rs
// write_to_file and replace_in_file handlers

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::{decode_text, resolve_repo_file};
use crate::tools::handler::params;
use crate::tools::{categories, ToolContext, ToolError, ToolHandler, ToolParameter, ToolSpec};

// ============================================================================
// write_to_file
// ============================================================================

pub struct WriteToFileHandler;

#[async_trait]
impl ToolHandler for WriteToFileHandler {
    fn name(&self) -> &str {
        "write_to_file"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "write_to_file".to_string(),
            description: "写入或创建文件，自动创建所需的目录。".to_string(),
            category: categories::FILE.to_string(),
            parameters: vec![
                ToolParameter::required(
                    "file_path",
                    "string",
                    "要写入的文件路径（相对于仓库根目录）。必须严格使用用户指定的路径，不要自行添加目录。",
                ),
                ToolParameter::required("content", "string", "要写入的完整内容"),
                ToolParameter::optional(
                    "create_directories",
                    "boolean",
                    "是否自动创建所需的目录",
                    Some(json!(true)),
                ),
            ],
        }
    }

    async fn execute(
        &self,
        parameters: Map<String, Value>,
        context: &ToolContext,
    ) -> Result<Value, ToolError> {
        let file_path = params::required_str(&parameters, "file_path")?;
        let content = params::required_str(&parameters, "content")?;
        let create_directories = params::optional_bool(&parameters, "create_directories", true);

        let full_path = resolve_repo_file(&context.repository_path, file_path)?;

        // Old content decides created vs updated and the size delta
        let old_content = match tokio::fs::read(&full_path).await {
            Ok(bytes) => Some(decode_text(&bytes).0),
            Err(_) => None,
        };

        if create_directories {
            if let Some(parent) = full_path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    ToolError::Execution(format!("创建目录失败: {}: {}", parent.display(), e))
                })?;
            }
        }

        tokio::fs::write(&full_path, content).await.map_err(|e| {
            ToolError::Execution(format!("写入文件失败: {}: {}", file_path, e))
        })?;

        let size = tokio::fs::metadata(&full_path)
            .await
            .map(|m| m.len())
            .unwrap_or(content.len() as u64);

        info!("[TOOL] wrote file {} ({} bytes)", file_path, size);

        Ok(json!({
            "file_path": file_path,
            "action": if old_content.is_none() { "created" } else { "updated" },
            "size": size,
            "old_size": old_content.as_ref().map(|c| c.len()).unwrap_or(0),
            "new_size": content.len(),
            "relative_path": file_path,
        }))
    }
}

// ============================================================================
// replace_in_file
// ============================================================================

const SEARCH_MARKER: &str = "------- SEARCH";
const SEPARATOR_MARKER: &str = "=======";
const REPLACE_MARKER: &str = "+++++++ REPLACE";

#[derive(Debug, Clone, PartialEq)]
struct DiffBlock {
    search: String,
    replace: String,
}

/// Parse the line-delimited SEARCH/REPLACE block format:
///
/// ```text
/// ------- SEARCH
/// <exact text>
/// =======
/// <replacement>
/// +++++++ REPLACE
/// ```
fn parse_diff_blocks(diff: &str) -> Result<Vec<DiffBlock>, ToolError> {
    enum State {
        Outside,
        InSearch,
        InReplace,
    }

    let mut blocks = Vec::new();
    let mut state = State::Outside;
    let mut search_lines: Vec<&str> = Vec::new();
    let mut replace_lines: Vec<&str> = Vec::new();

    for line in diff.lines() {
        let trimmed = line.trim_end();
        match state {
            State::Outside => {
                if trimmed == SEARCH_MARKER {
                    search_lines.clear();
                    replace_lines.clear();
                    state = State::InSearch;
                }
            }
            State::InSearch => {
                if trimmed == SEPARATOR_MARKER {
                    state = State::InReplace;
                } else {
                    search_lines.push(line);
                }
            }
            State::InReplace => {
                if trimmed == REPLACE_MARKER {
                    blocks.push(DiffBlock {
                        search: search_lines.join("\n"),
                        replace: replace_lines.join("\n"),
                    });
                    state = State::Outside;
                } else {
                    replace_lines.push(line);
                }
            }
        }
    }

    if !matches!(state, State::Outside) {
        return Err(ToolError::Execution(
            "SEARCH/REPLACE 块格式不完整: 缺少结束标记".to_string(),
        ));
    }
    if blocks.is_empty() {
        return Err(ToolError::Execution(
            "未找到有效的 SEARCH/REPLACE 块".to_string(),
        ));
    }
    Ok(blocks)
}

/// Byte spans of each line in `content`, excluding line terminators.
fn line_spans(content: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    for line in content.split('\n') {
        spans.push((start, start + line.len()));
        start += line.len() + 1;
    }
    spans
}

/// Find the match span for one block, trying strategies in order:
/// (a) exact substring from the cursor,
/// (b) line-trimmed line-sequence match,
/// (c) block anchor (first + last trimmed lines, contiguous interior) for
///     searches of at least 3 lines.
fn find_match(content: &str, search: &str, cursor: usize) -> Option<(usize, usize)> {
    // (a) exact
    if !search.is_empty() {
        if let Some(pos) = content[cursor..].find(search) {
            let start = cursor + pos;
            return Some((start, start + search.len()));
        }
    }

    let spans = line_spans(content);
    let search_lines: Vec<&str> = search.split('\n').map(|l| l.trim()).collect();
    let n = search_lines.len();
    if n == 0 || spans.is_empty() || n > spans.len() {
        return None;
    }

    let first_line_at_cursor = spans
        .iter()
        .position(|(start, end)| cursor <= *end && cursor >= *start || *start >= cursor)
        .unwrap_or(0);

    // (b) line-trimmed
    for i in first_line_at_cursor..=(spans.len() - n) {
        let all_match = (0..n).all(|j| {
            let (start, end) = spans[i + j];
            content[start..end].trim() == search_lines[j]
        });
        if all_match {
            return Some((spans[i].0, spans[i + n - 1].1));
        }
    }

    // (c) block anchor
    if n >= 3 {
        let first = search_lines[0];
        let last = search_lines[n - 1];
        for i in first_line_at_cursor..=(spans.len() - n) {
            let (fs, fe) = spans[i];
            let (ls, le) = spans[i + n - 1];
            if content[fs..fe].trim() == first && content[ls..le].trim() == last {
                return Some((fs, le));
            }
        }
    }

    None
}

#[derive(Debug, Default)]
struct ReplaceStats {
    blocks_processed: usize,
    lines_added: usize,
    lines_removed: usize,
    bytes_added: usize,
    bytes_removed: usize,
}

/// Apply blocks left to right; each successful match advances the cursor.
fn apply_diff_blocks(content: &str, blocks: &[DiffBlock]) -> Result<(String, ReplaceStats), ToolError> {
    let mut current = content.to_string();
    let mut cursor = 0usize;
    let mut stats = ReplaceStats::default();

    for (index, block) in blocks.iter().enumerate() {
        let Some((start, end)) = find_match(&current, &block.search, cursor) else {
            let preview: String = block.search.chars().take(200).collect();
            return Err(ToolError::Execution(format!(
                "第 {} 个 SEARCH/REPLACE 块未匹配到内容。搜索内容(前200字符): {}",
                index + 1,
                preview
            )));
        };

        let matched = &current[start..end];
        stats.bytes_removed += matched.len();
        stats.bytes_added += block.replace.len();
        stats.lines_removed += matched.split('\n').count();
        stats.lines_added += block.replace.split('\n').count();

        let mut next = String::with_capacity(current.len() + block.replace.len());
        next.push_str(&current[..start]);
        next.push_str(&block.replace);
        next.push_str(&current[end..]);

        cursor = start + block.replace.len();
        current = next;
        stats.blocks_processed += 1;
    }

    Ok((current, stats))
}

pub struct ReplaceInFileHandler;

#[async_trait]
impl ToolHandler for ReplaceInFileHandler {
    fn name(&self) -> &str {
        "replace_in_file"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "replace_in_file".to_string(),
            description: concat!(
                "使用 SEARCH/REPLACE 块精确替换文件内容。diff 参数格式:\n",
                "------- SEARCH\n<要搜索的内容>\n=======\n<替换后的内容>\n+++++++ REPLACE\n",
                "可以包含多个块，按从上到下的顺序依次应用。"
            )
            .to_string(),
            category: categories::FILE.to_string(),
            parameters: vec![
                ToolParameter::required(
                    "file_path",
                    "string",
                    "要修改的文件路径（相对于仓库根目录）",
                ),
                ToolParameter::required("diff", "string", "一个或多个 SEARCH/REPLACE 块"),
            ],
        }
    }

    async fn execute(
        &self,
        parameters: Map<String, Value>,
        context: &ToolContext,
    ) -> Result<Value, ToolError> {
        let file_path = params::required_str(&parameters, "file_path")?;
        let diff = params::required_str(&parameters, "diff")?;

        let full_path = resolve_repo_file(&context.repository_path, file_path)?;
        if !full_path.exists() {
            return Err(ToolError::Execution(format!("文件不存在: {}", file_path)));
        }

        let bytes = tokio::fs::read(&full_path)
            .await
            .map_err(|e| ToolError::Execution(format!("读取文件失败: {}: {}", file_path, e)))?;
        let (content, _) = decode_text(&bytes);

        let blocks = parse_diff_blocks(diff)?;
        let (new_content, stats) = apply_diff_blocks(&content, &blocks)?;

        let changed = new_content != content;
        if changed {
            tokio::fs::write(&full_path, &new_content).await.map_err(|e| {
                ToolError::Execution(format!("写入文件失败: {}: {}", file_path, e))
            })?;
        } else {
            warn!("[TOOL] replace_in_file produced no change: {}", file_path);
        }

        Ok(json!({
            "file_path": file_path,
            "changed": changed,
            "blocks_processed": stats.blocks_processed,
            "lines_added": stats.lines_added,
            "lines_removed": stats.lines_removed,
            "bytes_added": stats.bytes_added,
            "bytes_removed": stats.bytes_removed,
            "old_size": content.len(),
            "new_size": new_content.len(),
        }))
    }
}
