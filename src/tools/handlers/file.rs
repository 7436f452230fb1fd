// src/tools/handlers/file.rs
// read_file and list_files handlers

use async_trait::async_trait;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{decode_text, is_ignored_dir, resolve_repo_dir, resolve_repo_file, to_forward_slashes};
use crate::tools::handler::params;
use crate::tools::{categories, ToolContext, ToolError, ToolHandler, ToolParameter, ToolSpec};

/// Default read cap: 20 MiB
const DEFAULT_MAX_READ: u64 = 20 * 1024 * 1024;

const LIST_CACHE_TTL: Duration = Duration::from_secs(180);
const LIST_CACHE_MAX: usize = 50;

lazy_static! {
    /// Cache for list_files keyed by (directory, recursive, max_depth)
    static ref LIST_CACHE: Mutex<HashMap<String, (Value, Instant)>> = Mutex::new(HashMap::new());
}

fn list_cache_key(repo: &str, directory: &str, recursive: bool, max_depth: u64) -> String {
    format!("{}:{}:{}:{}", repo, directory, recursive, max_depth)
}

fn list_cache_get(key: &str) -> Option<Value> {
    let mut cache = LIST_CACHE.lock();
    if let Some((value, stamp)) = cache.get(key) {
        if stamp.elapsed() < LIST_CACHE_TTL {
            return Some(value.clone());
        }
    }
    cache.remove(key);
    None
}

fn list_cache_put(key: String, value: Value) {
    let mut cache = LIST_CACHE.lock();
    if cache.len() >= LIST_CACHE_MAX {
        if let Some(oldest) = cache
            .iter()
            .min_by_key(|(_, (_, stamp))| *stamp)
            .map(|(k, _)| k.clone())
        {
            cache.remove(&oldest);
        }
    }
    cache.insert(key, (value, Instant::now()));
}

// ============================================================================
// read_file
// ============================================================================

pub struct FileReadHandler;

#[async_trait]
impl ToolHandler for FileReadHandler {
    fn name(&self) -> &str {
        "read_file"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "read_file".to_string(),
            description: "请求读取指定路径的文件内容。当你需要检查你不了解内容的现有文件时使用此工具，例如分析代码、查看文本文件或从配置文件中提取信息。".to_string(),
            category: categories::FILE.to_string(),
            parameters: vec![
                ToolParameter::required(
                    "file_path",
                    "string",
                    "要读取的文件的路径（相对于仓库根目录）。使用正斜杠 '/' 作为路径分隔符，不要使用绝对路径或 './' '../' 前缀。",
                ),
                ToolParameter::optional(
                    "max_size",
                    "integer",
                    "最大读取字节数（0 表示不限制，默认 20MB）。超过限制时内容将被截断并附加警告。",
                    Some(json!(DEFAULT_MAX_READ)),
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
        let max_size = params::optional_u64(&parameters, "max_size", DEFAULT_MAX_READ);

        let full_path = resolve_repo_file(&context.repository_path, file_path)?;
        if !full_path.exists() {
            return Err(ToolError::Execution(format!("文件不存在: {}", file_path)));
        }
        if !full_path.is_file() {
            return Err(ToolError::Execution(format!("不是文件: {}", file_path)));
        }

        let bytes = tokio::fs::read(&full_path)
            .await
            .map_err(|e| ToolError::Execution(format!("读取文件失败: {}: {}", file_path, e)))?;
        let file_size = bytes.len() as u64;

        let truncated = max_size > 0 && file_size > max_size;
        let slice = if truncated {
            &bytes[..max_size as usize]
        } else {
            &bytes[..]
        };

        let (mut content, encoding) = decode_text(slice);
        if truncated {
            warn!(
                "[TOOL] read_file truncated {}: {} bytes > {} bytes",
                file_path, file_size, max_size
            );
            content.push_str(&format!(
                "\n\n[警告] 文件已截断: 读取了 {} 字节, 总大小 {} 字节。如需查看完整内容, 请增加 max_size 参数。",
                max_size, file_size
            ));
        }

        Ok(json!({
            "file_path": file_path,
            "content": content,
            "size": file_size,
            "encoding": encoding,
            "relative_path": file_path,
            "truncated": truncated,
            "truncated_size": if truncated { Some(max_size) } else { None },
        }))
    }
}

// ============================================================================
// list_files
// ============================================================================

pub struct FileListHandler;

#[async_trait]
impl ToolHandler for FileListHandler {
    fn name(&self) -> &str {
        "list_files"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "list_files".to_string(),
            description: "请求列出指定目录中的文件和子目录。recursive 为 true 时递归列出所有内容，否则仅列出顶层。".to_string(),
            category: categories::FILE.to_string(),
            parameters: vec![
                ToolParameter::optional(
                    "directory",
                    "string",
                    "要列出内容的目录路径（相对于仓库根目录，'' 或 '.' 表示根目录）。",
                    Some(json!("")),
                ),
                ToolParameter::optional(
                    "recursive",
                    "boolean",
                    "是否递归列出子目录",
                    Some(json!(false)),
                ),
                ToolParameter::optional(
                    "max_depth",
                    "integer",
                    "递归最大深度（0 表示不限制，默认 10）",
                    Some(json!(10)),
                ),
                ToolParameter::optional(
                    "max_results",
                    "integer",
                    "返回的最大结果数（0 表示不限制，默认 1000）",
                    Some(json!(1000)),
                ),
            ],
        }
    }

    async fn execute(
        &self,
        parameters: Map<String, Value>,
        context: &ToolContext,
    ) -> Result<Value, ToolError> {
        let directory = params::optional_str(&parameters, "directory", "").to_string();
        let recursive = params::optional_bool(&parameters, "recursive", false);
        let max_depth = params::optional_u64(&parameters, "max_depth", 10);
        let max_results = params::optional_u64(&parameters, "max_results", 1000) as usize;

        let repo = context.repository_path.clone();
        let cache_key = list_cache_key(&repo.to_string_lossy(), &directory, recursive, max_depth);
        if let Some(cached) = list_cache_get(&cache_key) {
            debug!("[TOOL] list_files cache hit: {}", directory);
            return Ok(cached);
        }

        let full_path = resolve_repo_dir(&repo, &directory)?;
        if !full_path.exists() {
            return Err(ToolError::Execution(format!("目录不存在: {}", directory)));
        }
        if !full_path.is_dir() {
            return Err(ToolError::Execution(format!("不是目录: {}", directory)));
        }

        let start = Instant::now();
        let dir_label = if directory.is_empty() {
            "/".to_string()
        } else {
            directory.clone()
        };

        let items = tokio::task::spawn_blocking(move || {
            if recursive {
                list_recursive(&full_path, &repo, max_depth, max_results)
            } else {
                list_flat(&full_path, &repo, max_results)
            }
        })
        .await
        .map_err(|e| ToolError::Execution(format!("列目录任务失败: {}", e)))?;

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        let truncated = max_results > 0 && items.len() >= max_results;

        let result = json!({
            "directory": dir_label,
            "items": items,
            "total_count": items.len(),
            "performance": {
                "time_ms": (elapsed_ms * 100.0).round() / 100.0,
                "truncated": truncated,
            }
        });

        list_cache_put(cache_key, result.clone());
        Ok(result)
    }
}

fn entry_json(name: &str, path: String, is_dir: bool, size: u64) -> Value {
    json!({
        "name": name,
        "path": path,
        "type": if is_dir { "directory" } else { "file" },
        "size": if is_dir { 0 } else { size },
    })
}

fn list_flat(full_path: &std::path::Path, repo: &std::path::Path, max_results: usize) -> Vec<Value> {
    let mut entries: Vec<(bool, String, Value)> = Vec::new();

    let Ok(read_dir) = std::fs::read_dir(full_path) else {
        warn!("[TOOL] cannot read directory: {}", full_path.display());
        return Vec::new();
    };

    for entry in read_dir.flatten() {
        if max_results > 0 && entries.len() >= max_results {
            break;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if is_ignored_dir(&name) {
            continue;
        }
        let path = entry.path();
        let is_dir = path.is_dir();
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        let relative = path.strip_prefix(repo).unwrap_or(&path).to_path_buf();
        entries.push((
            !is_dir,
            name.clone(),
            entry_json(&name, to_forward_slashes(&relative), is_dir, size),
        ));
    }

    // Directories first, then files, alphabetical within each group
    entries.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
    entries.into_iter().map(|(_, _, v)| v).collect()
}

fn list_recursive(
    full_path: &std::path::Path,
    repo: &std::path::Path,
    max_depth: u64,
    max_results: usize,
) -> Vec<Value> {
    let mut walker = WalkDir::new(full_path).min_depth(1);
    if max_depth > 0 {
        walker = walker.max_depth(max_depth as usize);
    }

    let mut entries: Vec<(usize, String, Value)> = Vec::new();

    for entry in walker
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored_dir(&e.file_name().to_string_lossy()))
        .flatten()
    {
        if max_results > 0 && entries.len() >= max_results {
            break;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let is_dir = entry.file_type().is_dir();
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        let relative = entry.path().strip_prefix(repo).unwrap_or(entry.path());
        let rel_str = to_forward_slashes(relative);
        let depth = rel_str.matches('/').count();
        entries.push((depth, name.clone(), entry_json(&name, rel_str, is_dir, size)));
    }

    // Shallow paths first, alphabetical within each depth
    entries.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
    entries.into_iter().map(|(_, _, v)| v).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fixture_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("README.md"), "# hello\n")
            .await
            .unwrap();
        tokio::fs::create_dir_all(dir.path().join("src/sub")).await.unwrap();
        tokio::fs::write(dir.path().join("src/main.rs"), "fn main() {}\n")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("src/sub/util.rs"), "pub fn util() {}\n")
            .await
            .unwrap();
        tokio::fs::create_dir_all(dir.path().join("node_modules/junk"))
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("node_modules/junk/x.js"), "x")
            .await
            .unwrap();
        dir
    }

    fn map(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_read_file_basic() {
        let dir = fixture_repo().await;
        let ctx = ToolContext::new(dir.path());
        let handler = FileReadHandler;

        let result = handler
            .execute(map(json!({"file_path": "README.md"})), &ctx)
            .await
            .unwrap();
        assert_eq!(result["file_path"], "README.md");
        assert_eq!(result["content"], "# hello\n");
        assert_eq!(result["encoding"], "utf-8");
        assert_eq!(result["truncated"], false);
    }

    #[tokio::test]
    async fn test_read_file_truncation_boundary() {
        let dir = tempfile::tempdir().unwrap();
        // max_size + 1 bytes of ASCII
        tokio::fs::write(dir.path().join("big.txt"), "a".repeat(11))
            .await
            .unwrap();
        let ctx = ToolContext::new(dir.path());

        let result = FileReadHandler
            .execute(map(json!({"file_path": "big.txt", "max_size": 10})), &ctx)
            .await
            .unwrap();
        assert_eq!(result["truncated"], true);
        assert_eq!(result["truncated_size"], 10);
        let content = result["content"].as_str().unwrap();
        assert!(content.starts_with(&"a".repeat(10)));
        assert!(content.contains("[警告] 文件已截断"));
        // content = exactly max_size chars plus the trailing notice
        assert!(!content.starts_with(&"a".repeat(11)));
    }

    #[tokio::test]
    async fn test_read_file_rejects_escape() {
        let dir = fixture_repo().await;
        let ctx = ToolContext::new(dir.path());
        let err = FileReadHandler
            .execute(map(json!({"file_path": "../etc/passwd"})), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("非法"));
    }

    #[tokio::test]
    async fn test_list_files_flat_sorted() {
        let dir = fixture_repo().await;
        let ctx = ToolContext::new(dir.path());

        let result = FileListHandler
            .execute(map(json!({"directory": "", "max_results": 0})), &ctx)
            .await
            .unwrap();
        let items = result["items"].as_array().unwrap();
        // directories before files
        let first = &items[0];
        assert_eq!(first["type"], "directory");
        assert!(items.iter().any(|i| i["name"] == "README.md"));
    }

    #[tokio::test]
    async fn test_list_files_recursive_skips_ignored() {
        let dir = fixture_repo().await;
        let ctx = ToolContext::new(dir.path());

        let result = FileListHandler
            .execute(
                map(json!({"directory": "", "recursive": true, "max_results": 0})),
                &ctx,
            )
            .await
            .unwrap();
        let items = result["items"].as_array().unwrap();
        assert!(items.iter().any(|i| i["path"] == "src/sub/util.rs"));
        assert!(!items.iter().any(|i| {
            i["path"].as_str().unwrap_or("").starts_with("node_modules")
        }));
    }

    #[tokio::test]
    async fn test_list_files_max_results() {
        let dir = fixture_repo().await;
        let ctx = ToolContext::new(dir.path());

        let result = FileListHandler
            .execute(
                map(json!({"directory": "src", "recursive": true, "max_results": 1})),
                &ctx,
            )
            .await
            .unwrap();
        let items = result["items"].as_array().unwrap();
        assert!(items.len() <= 1);
        assert_eq!(result["performance"]["truncated"], true);
    }
}
