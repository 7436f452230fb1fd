// src/tools/handlers/code.rs
// list_code_definitions: language-aware extraction of top-level definitions

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::LazyLock;

use super::{decode_text, resolve_repo_file};
use crate::tools::handler::params;
use crate::tools::{categories, ToolContext, ToolError, ToolHandler, ToolParameter, ToolSpec};

static RE_PY_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*class\s+(\w+)(?:\s*\([^)]*\))?\s*:").expect("RE_PY_CLASS"));
static RE_PY_DEF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:async\s+)?def\s+(\w+)\s*\(").expect("RE_PY_DEF"));
static RE_PY_DECORATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@\w+").expect("RE_PY_DECORATOR"));

static RE_JS_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:export\s+)?(?:default\s+)?class\s+(\w+)").expect("RE_JS_CLASS"));
static RE_JS_FN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(\w+)")
        .expect("RE_JS_FN")
});
static RE_JS_ARROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:export\s+)?(?:const|let|var)\s+(\w+)\s*=\s*(?:async\s+)?(?:\([^)]*\)|\w+)\s*=>")
        .expect("RE_JS_ARROW")
});
static RE_JS_METHOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s{2,}(?:async\s+)?(\w+)\s*\([^)]*\)\s*\{").expect("RE_JS_METHOD")
});

static RE_C_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:public\s+|private\s+|protected\s+)?(class|struct|interface)\s+(\w+)")
        .expect("RE_C_TYPE")
});
static RE_C_FN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[\w:<>\*&\s]+?)\s+(\w+)\s*\([^;]*\)\s*\{").expect("RE_C_FN")
});

static RE_GO_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^type\s+(\w+)\s+(?:struct|interface)").expect("RE_GO_TYPE"));
static RE_GO_FN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^func\s+(?:\([^)]+\)\s+)?(\w+)\s*\(").expect("RE_GO_FN"));

static RE_GENERIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:def|function|fn|class|struct|trait|interface)\s+(\w+)").expect("RE_GENERIC")
});

pub struct ListCodeDefinitionsHandler;

#[async_trait]
impl ToolHandler for ListCodeDefinitionsHandler {
    fn name(&self) -> &str {
        "list_code_definitions"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "list_code_definitions".to_string(),
            description: "列出文件中的代码定义（类、函数、方法等）。".to_string(),
            category: categories::ANALYSIS.to_string(),
            parameters: vec![ToolParameter::required(
                "file_path",
                "string",
                "要分析的文件路径（相对于仓库根目录）",
            )],
        }
    }

    async fn execute(
        &self,
        parameters: Map<String, Value>,
        context: &ToolContext,
    ) -> Result<Value, ToolError> {
        let file_path = params::required_str(&parameters, "file_path")?;

        let full_path = resolve_repo_file(&context.repository_path, file_path)?;
        if !full_path.exists() {
            return Err(ToolError::Execution(format!("文件不存在: {}", file_path)));
        }

        let bytes = tokio::fs::read(&full_path)
            .await
            .map_err(|e| ToolError::Execution(format!("读取文件失败: {}: {}", file_path, e)))?;
        let (content, _) = decode_text(&bytes);

        let ext = full_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        let (language, definitions) = match ext.as_str() {
            "py" => ("python", extract_python(&content)),
            "js" | "jsx" => ("javascript", extract_javascript(&content)),
            "ts" | "tsx" => ("typescript", extract_javascript(&content)),
            "java" | "c" | "cpp" | "cc" | "h" | "hpp" | "cs" => ("c-family", extract_c_style(&content)),
            "go" => ("go", extract_go(&content)),
            "rs" => ("rust", extract_generic(&content)),
            _ => ("unknown", extract_generic(&content)),
        };

        Ok(json!({
            "file_path": file_path,
            "language": language,
            "definitions": definitions,
            "total_count": definitions.len(),
        }))
    }
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Python: classes, top-level functions and first-indent methods, with
/// pending decorators attached to the following definition.
fn extract_python(content: &str) -> Vec<Value> {
    let mut definitions = Vec::new();
    let mut decorators: Vec<String> = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let line_num = idx + 1;

        if RE_PY_DECORATOR.is_match(line.trim_start()) && indent_of(line) == 0 {
            decorators.push(line.trim().to_string());
            continue;
        }

        if let Some(cap) = RE_PY_CLASS.captures(line) {
            if indent_of(line) == 0 {
                definitions.push(json!({
                    "type": "class",
                    "name": &cap[1],
                    "line": line_num,
                    "decorators": decorators.clone(),
                }));
            }
            decorators.clear();
            continue;
        }

        if let Some(cap) = RE_PY_DEF.captures(line) {
            let indent = indent_of(line);
            if indent == 0 || indent == 4 || indent == 8 {
                definitions.push(json!({
                    "type": if indent > 0 { "method" } else { "function" },
                    "name": &cap[1],
                    "line": line_num,
                    "decorators": decorators.clone(),
                }));
            }
            decorators.clear();
            continue;
        }

        if !line.trim().is_empty() {
            decorators.clear();
        }
    }

    definitions
}

fn extract_javascript(content: &str) -> Vec<Value> {
    let mut definitions = Vec::new();
    let mut in_class = false;

    for (idx, line) in content.lines().enumerate() {
        let line_num = idx + 1;

        if let Some(cap) = RE_JS_CLASS.captures(line) {
            definitions.push(json!({"type": "class", "name": &cap[1], "line": line_num}));
            in_class = true;
            continue;
        }
        if let Some(cap) = RE_JS_FN.captures(line) {
            definitions.push(json!({"type": "function", "name": &cap[1], "line": line_num}));
            continue;
        }
        if let Some(cap) = RE_JS_ARROW.captures(line) {
            definitions.push(json!({"type": "function", "name": &cap[1], "line": line_num}));
            continue;
        }
        if in_class {
            if let Some(cap) = RE_JS_METHOD.captures(line) {
                let name = &cap[1];
                if name != "if" && name != "for" && name != "while" && name != "switch" {
                    definitions.push(json!({"type": "method", "name": name, "line": line_num}));
                }
            }
            if indent_of(line) == 0 && line.trim() == "}" {
                in_class = false;
            }
        }
    }

    definitions
}

fn extract_c_style(content: &str) -> Vec<Value> {
    let mut definitions = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let line_num = idx + 1;

        if let Some(cap) = RE_C_TYPE.captures(line) {
            definitions.push(json!({"type": &cap[1], "name": &cap[2], "line": line_num}));
            continue;
        }
        if let Some(cap) = RE_C_FN.captures(line) {
            let name = &cap[1];
            if name != "if" && name != "for" && name != "while" && name != "switch" {
                definitions.push(json!({"type": "function", "name": name, "line": line_num}));
            }
        }
    }

    definitions
}

fn extract_go(content: &str) -> Vec<Value> {
    let mut definitions = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let line_num = idx + 1;

        if let Some(cap) = RE_GO_TYPE.captures(line) {
            definitions.push(json!({"type": "type", "name": &cap[1], "line": line_num}));
            continue;
        }
        if let Some(cap) = RE_GO_FN.captures(line) {
            definitions.push(json!({"type": "func", "name": &cap[1], "line": line_num}));
        }
    }

    definitions
}

fn extract_generic(content: &str) -> Vec<Value> {
    let mut definitions = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        if let Some(cap) = RE_GENERIC.captures(line) {
            definitions.push(json!({"type": "definition", "name": &cap[1], "line": idx + 1}));
        }
    }

    definitions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_python_with_decorators() {
        let source = "\
@app.route('/x')
def handler():
    pass

class Widget:
    def method(self):
        pass

    @property
    def value(self):
        return 1
";
        let defs = extract_python(source);
        assert_eq!(defs[0]["type"], "function");
        assert_eq!(defs[0]["name"], "handler");
        assert_eq!(defs[0]["decorators"][0], "@app.route('/x')");
        assert!(defs.iter().any(|d| d["type"] == "class" && d["name"] == "Widget"));
        assert!(defs.iter().any(|d| d["type"] == "method" && d["name"] == "method"));
    }

    #[test]
    fn test_extract_javascript() {
        let source = "\
export class Store {
  async load() {
  }
}
export function helper() {}
const fmt = (x) => x;
";
        let defs = extract_javascript(source);
        assert!(defs.iter().any(|d| d["type"] == "class" && d["name"] == "Store"));
        assert!(defs.iter().any(|d| d["type"] == "method" && d["name"] == "load"));
        assert!(defs.iter().any(|d| d["type"] == "function" && d["name"] == "helper"));
        assert!(defs.iter().any(|d| d["type"] == "function" && d["name"] == "fmt"));
    }

    #[test]
    fn test_extract_go() {
        let source = "\
type Server struct {
}

func NewServer() *Server {
}

func (s *Server) Run() error {
}
";
        let defs = extract_go(source);
        assert!(defs.iter().any(|d| d["type"] == "type" && d["name"] == "Server"));
        assert!(defs.iter().any(|d| d["name"] == "NewServer"));
        assert!(defs.iter().any(|d| d["name"] == "Run"));
    }

    #[tokio::test]
    async fn test_handler_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("mod.py"), "class A:\n    def m(self):\n        pass\n")
            .await
            .unwrap();
        let ctx = ToolContext::new(dir.path());

        let result = ListCodeDefinitionsHandler
            .execute(
                json!({"file_path": "mod.py"}).as_object().cloned().unwrap(),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(result["language"], "python");
        assert_eq!(result["total_count"], 2);
    }
}
