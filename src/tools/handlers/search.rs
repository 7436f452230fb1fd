// src/tools/handlers/search.rs
// search_files: concurrent regex search with result caching

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use regex::RegexBuilder;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;
use walkdir::WalkDir;

use super::{is_ignored_dir, is_ignored_extension, resolve_repo_dir, to_forward_slashes};
use crate::tools::handler::params;
use crate::tools::{categories, ToolContext, ToolError, ToolHandler, ToolParameter, ToolSpec};

/// Files larger than this are skipped
const MAX_FILE_SIZE: u64 = 1_000_000;

/// At most this many candidate files are searched per call
const MAX_CANDIDATE_FILES: usize = 100;

/// Concurrent per-file search workers
const CONCURRENCY: usize = 4;

const SEARCH_CACHE_TTL: Duration = Duration::from_secs(300);
const SEARCH_CACHE_MAX: usize = 100;

lazy_static! {
    static ref SEARCH_CACHE: Mutex<HashMap<String, (Value, Instant)>> = Mutex::new(HashMap::new());
}

fn cache_key(repo: &str, pattern: &str, path: &str, file_pattern: &str, case_sensitive: bool) -> String {
    format!("{}:{}:{}:{}:{}", repo, pattern, path, file_pattern, case_sensitive)
}

fn cache_get(key: &str) -> Option<Value> {
    let mut cache = SEARCH_CACHE.lock();
    if let Some((value, stamp)) = cache.get(key) {
        if stamp.elapsed() < SEARCH_CACHE_TTL {
            return Some(value.clone());
        }
    }
    cache.remove(key);
    None
}

fn cache_put(key: String, value: Value) {
    let mut cache = SEARCH_CACHE.lock();
    if cache.len() >= SEARCH_CACHE_MAX {
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

/// Simple glob-ish match for file name patterns like `*.py` or `test_*.rs`
fn matches_file_pattern(filename: &str, pattern: &str) -> bool {
    if pattern.is_empty() || pattern == "*" {
        return true;
    }
    let escaped = regex::escape(pattern).replace(r"\*", ".*").replace(r"\?", ".");
    regex::Regex::new(&format!("^{}$", escaped))
        .map(|re| re.is_match(filename))
        .unwrap_or(false)
}

fn collect_candidates(search_path: &Path, file_pattern: &str) -> Vec<PathBuf> {
    if search_path.is_file() {
        return vec![search_path.to_path_buf()];
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(search_path)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored_dir(&e.file_name().to_string_lossy()))
        .flatten()
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if is_ignored_extension(path) {
            continue;
        }
        let filename = entry.file_name().to_string_lossy();
        if !matches_file_pattern(&filename, file_pattern) {
            continue;
        }
        files.push(path.to_path_buf());
        if files.len() >= MAX_CANDIDATE_FILES {
            break;
        }
    }
    files
}

fn search_in_file(
    file_path: &Path,
    regex: &regex::Regex,
    repo_path: &Path,
    max_matches: usize,
) -> Vec<Value> {
    let mut matches = Vec::new();

    let Ok(metadata) = std::fs::metadata(file_path) else {
        return matches;
    };
    if metadata.len() > MAX_FILE_SIZE {
        debug!("[TOOL] search skipping large file: {}", file_path.display());
        return matches;
    }

    let Ok(bytes) = std::fs::read(file_path) else {
        return matches;
    };
    let (content, _) = super::decode_text(&bytes);

    let relative = file_path.strip_prefix(repo_path).unwrap_or(file_path);
    let relative = to_forward_slashes(relative);

    'lines: for (line_num, line) in content.lines().enumerate() {
        for found in regex.find_iter(line) {
            matches.push(json!({
                "file": relative,
                "line": line_num + 1,
                "column": found.start() + 1,
                "match": found.as_str(),
                "context": line.trim(),
            }));
            if matches.len() >= max_matches {
                break 'lines;
            }
        }
    }

    matches
}

pub struct SearchFilesHandler;

#[async_trait]
impl ToolHandler for SearchFilesHandler {
    fn name(&self) -> &str {
        "search_files"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "search_files".to_string(),
            description: "使用正则表达式在仓库文件中高效搜索内容。支持结果缓存与并发搜索。".to_string(),
            category: categories::SEARCH.to_string(),
            parameters: vec![
                ToolParameter::required("pattern", "string", "搜索的正则表达式模式"),
                ToolParameter::optional(
                    "path",
                    "string",
                    "搜索路径（相对于仓库根目录，空字符串表示所有文件）",
                    Some(json!("")),
                ),
                ToolParameter::optional(
                    "file_pattern",
                    "string",
                    "文件名模式（例如 *.py, *.js），用于过滤文件",
                    Some(json!("")),
                ),
                ToolParameter::optional(
                    "case_sensitive",
                    "boolean",
                    "是否区分大小写",
                    Some(json!(false)),
                ),
                ToolParameter::optional(
                    "max_results",
                    "integer",
                    "返回的最大结果数",
                    Some(json!(50)),
                ),
            ],
        }
    }

    async fn execute(
        &self,
        parameters: Map<String, Value>,
        context: &ToolContext,
    ) -> Result<Value, ToolError> {
        let pattern = params::required_str(&parameters, "pattern")?.to_string();
        let search_path = params::optional_str(&parameters, "path", "").to_string();
        let file_pattern = params::optional_str(&parameters, "file_pattern", "").to_string();
        let case_sensitive = params::optional_bool(&parameters, "case_sensitive", false);
        let max_results = params::optional_u64(&parameters, "max_results", 50) as usize;

        let repo = context.repository_path.clone();

        let regex = RegexBuilder::new(&pattern)
            .case_insensitive(!case_sensitive)
            .build()
            .map_err(|e| ToolError::Execution(format!("无效的正则表达式: {}", e)))?;

        let key = cache_key(
            &repo.to_string_lossy(),
            &pattern,
            &search_path,
            &file_pattern,
            case_sensitive,
        );
        if let Some(cached) = cache_get(&key) {
            debug!("[TOOL] search_files cache hit: {}", pattern);
            return Ok(cached);
        }

        let full_search_path = resolve_repo_dir(&repo, &search_path)?;
        if !full_search_path.exists() {
            return Err(ToolError::Execution(format!("搜索路径不存在: {}", search_path)));
        }

        let start = Instant::now();

        let candidates = {
            let full = full_search_path.clone();
            let fp = file_pattern.clone();
            tokio::task::spawn_blocking(move || collect_candidates(&full, &fp))
                .await
                .map_err(|e| ToolError::Execution(format!("搜索任务失败: {}", e)))?
        };
        let files_total = candidates.len();
        let per_file_cap = max_results.clamp(1, 10);

        // Up to 4 files searched concurrently, each on the blocking pool
        let per_file_results: Vec<Vec<Value>> = stream::iter(candidates)
            .map(|file| {
                let regex = regex.clone();
                let repo = repo.clone();
                async move {
                    tokio::task::spawn_blocking(move || {
                        search_in_file(&file, &regex, &repo, per_file_cap)
                    })
                    .await
                    .unwrap_or_default()
                }
            })
            .buffer_unordered(CONCURRENCY)
            .collect()
            .await;

        let mut results = Vec::new();
        let mut files_scanned = 0usize;
        for file_matches in per_file_results {
            if file_matches.is_empty() {
                continue;
            }
            files_scanned += 1;
            results.extend(file_matches);
            if results.len() >= max_results {
                break;
            }
        }
        results.truncate(max_results);

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        let result = json!({
            "pattern": pattern,
            "path": if search_path.is_empty() { "/" } else { search_path.as_str() },
            "file_pattern": if file_pattern.is_empty() { "*" } else { file_pattern.as_str() },
            "total_matches": results.len(),
            "results": results,
            "performance": {
                "files_scanned": files_scanned,
                "files_total": files_total,
                "search_time_ms": (elapsed_ms * 100.0).round() / 100.0,
                "concurrent": true,
                "concurrency": CONCURRENCY,
            }
        });

        cache_put(key, result.clone());
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    async fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.py"), "# TODO fix this\nx = 1\n")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("b.rs"), "// TODO later\nfn main() {}\n")
            .await
            .unwrap();
        tokio::fs::create_dir_all(dir.path().join("node_modules")).await.unwrap();
        tokio::fs::write(dir.path().join("node_modules/c.js"), "TODO hidden\n")
            .await
            .unwrap();
        dir
    }

    #[test]
    fn test_file_pattern_matching() {
        assert!(matches_file_pattern("main.py", "*.py"));
        assert!(!matches_file_pattern("main.rs", "*.py"));
        assert!(matches_file_pattern("anything", ""));
        assert!(matches_file_pattern("test_x.rs", "test_*.rs"));
    }

    #[tokio::test]
    async fn test_search_finds_matches_with_positions() {
        let dir = fixture().await;
        let ctx = ToolContext::new(dir.path());

        let result = SearchFilesHandler
            .execute(map(json!({"pattern": "TODO"})), &ctx)
            .await
            .unwrap();

        let results = result["results"].as_array().unwrap();
        assert_eq!(result["performance"]["concurrency"], 4);
        assert!(results.iter().any(|m| m["file"] == "a.py" && m["line"] == 1));
        assert!(results.iter().any(|m| m["file"] == "b.rs"));
        // ignored dirs are skipped
        assert!(!results.iter().any(|m| m["file"].as_str().unwrap().contains("node_modules")));
    }

    #[tokio::test]
    async fn test_search_file_pattern_filter() {
        let dir = fixture().await;
        let ctx = ToolContext::new(dir.path());

        let result = SearchFilesHandler
            .execute(
                map(json!({"pattern": "TODO", "file_pattern": "*.py"})),
                &ctx,
            )
            .await
            .unwrap();
        let results = result["results"].as_array().unwrap();
        assert!(results.iter().all(|m| m["file"].as_str().unwrap().ends_with(".py")));
    }

    #[tokio::test]
    async fn test_search_case_insensitive_default() {
        let dir = fixture().await;
        let ctx = ToolContext::new(dir.path());

        let result = SearchFilesHandler
            .execute(map(json!({"pattern": "todo"})), &ctx)
            .await
            .unwrap();
        assert!(result["total_matches"].as_u64().unwrap() >= 2);
    }

    #[tokio::test]
    async fn test_search_invalid_regex() {
        let dir = fixture().await;
        let ctx = ToolContext::new(dir.path());
        let err = SearchFilesHandler
            .execute(map(json!({"pattern": "[unclosed"})), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("无效的正则表达式"));
    }
}
