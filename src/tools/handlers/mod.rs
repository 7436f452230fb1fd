// src/tools/handlers/mod.rs
// Built-in tool handlers and shared path/decoding helpers

pub mod code;
pub mod completion;
pub mod file;
pub mod git;
pub mod mcp;
pub mod mcp_dynamic;
pub mod search;
pub mod write;

use std::path::{Component, Path, PathBuf};

use crate::tools::ToolError;

/// Directories skipped by listing and search
pub const IGNORED_DIRS: &[&str] = &[
    ".git",
    ".idea",
    ".vscode",
    "node_modules",
    "__pycache__",
    "venv",
    "env",
    ".venv",
    "dist",
    "build",
    "target",
    "bin",
    "obj",
    ".next",
    ".nuxt",
    "coverage",
];

/// Binary-ish extensions skipped by content search
pub const IGNORED_EXTENSIONS: &[&str] = &[
    "pyc", "pyo", "exe", "dll", "so", "dylib", "png", "jpg", "jpeg", "gif", "ico", "svg", "zip",
    "tar", "gz", "rar", "7z", "mp3", "mp4", "avi", "mov", "pdf",
];

pub fn is_ignored_dir(name: &str) -> bool {
    name.starts_with('.') || IGNORED_DIRS.contains(&name)
}

pub fn is_ignored_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IGNORED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Resolve a file path relative to the repository root.
///
/// Leading `/`, `./` and `../` are rejected, as is any `..` component; the
/// joined path must stay inside the repository.
pub fn resolve_repo_file(repo_path: &Path, file_path: &str) -> Result<PathBuf, ToolError> {
    if file_path.is_empty() {
        return Err(ToolError::Execution("非法文件路径: (空)".to_string()));
    }
    if file_path.starts_with('/') || file_path.starts_with("./") || file_path.starts_with("../") {
        return Err(ToolError::Execution(format!("非法文件路径: {}", file_path)));
    }

    let relative = Path::new(file_path);
    if relative
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
    {
        return Err(ToolError::Execution(format!("非法文件路径: {}", file_path)));
    }

    let full = repo_path.join(relative);
    if !full.starts_with(repo_path) {
        return Err(ToolError::Execution(format!("非法文件路径: {}", file_path)));
    }
    Ok(full)
}

/// Resolve a directory path; `""`, `"."`, `"./"` and `"/"` mean the root.
pub fn resolve_repo_dir(repo_path: &Path, directory: &str) -> Result<PathBuf, ToolError> {
    if directory.is_empty() || directory == "." || directory == "./" || directory == "/" {
        return Ok(repo_path.to_path_buf());
    }

    let normalized = directory.trim_start_matches('/').trim_start_matches("./");
    if normalized.is_empty() {
        return Ok(repo_path.to_path_buf());
    }

    let relative = Path::new(normalized);
    if relative
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
    {
        return Err(ToolError::Execution(format!("非法路径: {}", directory)));
    }

    let full = repo_path.join(relative);
    if !full.starts_with(repo_path) {
        return Err(ToolError::Execution(format!("非法路径: {}", directory)));
    }
    Ok(full)
}

/// Path rendered with forward slashes regardless of platform
pub fn to_forward_slashes(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Decode bytes trying UTF-8 first, then Latin-1.
/// Returns (content, encoding label).
pub fn decode_text(bytes: &[u8]) -> (String, &'static str) {
    match std::str::from_utf8(bytes) {
        Ok(s) => (s.to_string(), "utf-8"),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            (decoded.into_owned(), "latin-1")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_repo_file_rejects_escapes() {
        let repo = Path::new("/project");
        assert!(resolve_repo_file(repo, "src/main.rs").is_ok());
        assert!(resolve_repo_file(repo, "README.md").is_ok());

        assert!(resolve_repo_file(repo, "/etc/passwd").is_err());
        assert!(resolve_repo_file(repo, "./src/main.rs").is_err());
        assert!(resolve_repo_file(repo, "../outside").is_err());
        assert!(resolve_repo_file(repo, "src/../../etc/passwd").is_err());
        assert!(resolve_repo_file(repo, "").is_err());
    }

    #[test]
    fn test_resolve_repo_file_stays_prefixed() {
        let repo = Path::new("/project");
        let resolved = resolve_repo_file(repo, "a/b/c.txt").unwrap();
        assert!(resolved.starts_with(repo));
    }

    #[test]
    fn test_resolve_repo_dir_root_aliases() {
        let repo = Path::new("/project");
        for alias in ["", ".", "./", "/"] {
            assert_eq!(resolve_repo_dir(repo, alias).unwrap(), repo);
        }
        assert!(resolve_repo_dir(repo, "../up").is_err());
    }

    #[test]
    fn test_decode_text_fallback() {
        let (s, enc) = decode_text("héllo".as_bytes());
        assert_eq!(enc, "utf-8");
        assert_eq!(s, "héllo");

        // 0xE9 alone is invalid UTF-8 but valid Latin-1 'é'
        let (s, enc) = decode_text(&[0x68, 0xE9]);
        assert_eq!(enc, "latin-1");
        assert_eq!(s, "hé");
    }
}
