// src/tools/converter.rs
// Convert tool specs into OpenAI function-calling schemas

use serde_json::{json, Map, Value};

use super::{ToolCoordinator, ToolError, ToolSpec};

/// Render every registered tool as an OpenAI function definition.
pub fn tools_to_openai_functions(coordinator: &ToolCoordinator) -> Vec<Value> {
    coordinator
        .list_tools()
        .iter()
        .map(spec_to_openai_function)
        .collect()
}

/// One spec -> `{"type":"function","function":{...}}`
pub fn spec_to_openai_function(spec: &ToolSpec) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for param in &spec.parameters {
        let mut schema = Map::new();
        schema.insert("type".to_string(), json!(param.param_type));
        schema.insert("description".to_string(), json!(param.description));
        if let Some(default) = &param.default {
            schema.insert("default".to_string(), default.clone());
        }
        properties.insert(param.name.clone(), Value::Object(schema));

        if param.required {
            required.push(param.name.clone());
        }
    }

    let mut parameters = json!({
        "type": "object",
        "properties": properties,
    });
    if !required.is_empty() {
        parameters["required"] = json!(required);
    }

    json!({
        "type": "function",
        "function": {
            "name": spec.name,
            "description": spec.description,
            "parameters": parameters,
        }
    })
}

/// Parse the JSON-string arguments of an LLM tool call.
pub fn parse_tool_call_arguments(arguments: &str) -> Result<Map<String, Value>, ToolError> {
    if arguments.trim().is_empty() {
        return Ok(Map::new());
    }
    let value: Value = serde_json::from_str(arguments)
        .map_err(|e| ToolError::Validation(format!("工具调用参数 JSON 无效: {}", e)))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ToolError::Validation(format!(
            "工具调用参数必须是 JSON 对象, 实际: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{categories, ToolParameter};

    #[test]
    fn test_spec_to_openai_function() {
        let spec = ToolSpec {
            name: "read_file".to_string(),
            description: "读取文件".to_string(),
            category: categories::FILE.to_string(),
            parameters: vec![
                ToolParameter::required("file_path", "string", "路径"),
                ToolParameter::optional("max_size", "integer", "上限", Some(json!(1024))),
            ],
        };

        let func = spec_to_openai_function(&spec);
        assert_eq!(func["type"], "function");
        assert_eq!(func["function"]["name"], "read_file");
        assert_eq!(
            func["function"]["parameters"]["properties"]["file_path"]["type"],
            "string"
        );
        assert_eq!(
            func["function"]["parameters"]["properties"]["max_size"]["default"],
            1024
        );
        assert_eq!(func["function"]["parameters"]["required"], json!(["file_path"]));
    }

    #[test]
    fn test_parse_arguments() {
        let args = parse_tool_call_arguments(r#"{"file_path": "README.md"}"#).unwrap();
        assert_eq!(args.get("file_path").unwrap(), "README.md");

        assert!(parse_tool_call_arguments("").unwrap().is_empty());
        assert!(parse_tool_call_arguments("not json").is_err());
        assert!(parse_tool_call_arguments("[1,2]").is_err());
    }
}
