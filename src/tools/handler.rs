// src/tools/handler.rs
// Tool handler trait with default parameter validation

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{param_types, ToolContext, ToolError, ToolSpec};

/// A named, typed action the LLM may invoke.
///
/// `validate` runs before `execute`; the default implementation checks
/// required parameters and primitive types against the spec and fills in
/// declared defaults. Handlers with richer constraints override it.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;

    fn spec(&self) -> ToolSpec;

    fn validate(&self, raw: &Map<String, Value>) -> Result<Map<String, Value>, ToolError> {
        let spec = self.spec();
        let mut validated = raw.clone();

        for param in &spec.parameters {
            match validated.get(&param.name) {
                Some(value) => {
                    if !type_matches(value, &param.param_type) {
                        return Err(ToolError::Validation(format!(
                            "参数 {} 类型错误: 期望 {}, 实际 {}",
                            param.name,
                            param.param_type,
                            json_type_name(value)
                        )));
                    }
                }
                None => {
                    if param.required {
                        return Err(ToolError::Validation(format!(
                            "缺少必需参数: {}",
                            param.name
                        )));
                    }
                    if let Some(default) = &param.default {
                        validated.insert(param.name.clone(), default.clone());
                    }
                }
            }
        }

        Ok(validated)
    }

    async fn execute(
        &self,
        params: Map<String, Value>,
        context: &ToolContext,
    ) -> Result<Value, ToolError>;
}

fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        param_types::STRING => value.is_string(),
        param_types::INTEGER => value.is_i64() || value.is_u64(),
        param_types::NUMBER => value.is_number(),
        param_types::BOOLEAN => value.is_boolean(),
        param_types::ARRAY => value.is_array(),
        param_types::OBJECT => value.is_object(),
        // Unknown declared type: skip the check
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Convenience accessors for validated parameter maps
pub mod params {
    use serde_json::{Map, Value};

    use crate::tools::ToolError;

    pub fn required_str<'a>(params: &'a Map<String, Value>, name: &str) -> Result<&'a str, ToolError> {
        params
            .get(name)
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::Validation(format!("缺少必需参数: {}", name)))
    }

    pub fn optional_str<'a>(params: &'a Map<String, Value>, name: &str, default: &'a str) -> &'a str {
        params.get(name).and_then(|v| v.as_str()).unwrap_or(default)
    }

    pub fn optional_bool(params: &Map<String, Value>, name: &str, default: bool) -> bool {
        params.get(name).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    pub fn optional_u64(params: &Map<String, Value>, name: &str, default: u64) -> u64 {
        params.get(name).and_then(|v| v.as_u64()).unwrap_or(default)
    }
}
