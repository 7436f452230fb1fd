// src/mcp/protocol.rs
// JSON-RPC 2.0 protocol types and codec for MCP communication

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::transport::TransportError;

/// Predefined JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a request with a fresh UUID id
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Value::String(Uuid::new_v4().to_string()),
            method: method.to_string(),
            params,
        }
    }

    /// The id normalized to its string form (servers may echo numeric ids)
    pub fn id_key(&self) -> String {
        id_to_key(&self.id)
    }
}

/// JSON-RPC 2.0 Error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn id_key(&self) -> String {
        id_to_key(&self.id)
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// JSON-RPC 2.0 Notification (no id, no reply expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// Any decoded JSON-RPC message
#[derive(Debug, Clone)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

fn id_to_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Encode/decode JSON-RPC messages as UTF-8 JSON.
/// Line framing (trailing newline) is the stdio transport's concern.
pub struct JsonRpcCodec;

impl JsonRpcCodec {
    pub fn encode_request(request: &JsonRpcRequest) -> Result<String, TransportError> {
        serde_json::to_string(request)
            .map_err(|e| TransportError::Codec(format!("encode request: {}", e)))
    }

    pub fn encode_notification(
        notification: &JsonRpcNotification,
    ) -> Result<String, TransportError> {
        serde_json::to_string(notification)
            .map_err(|e| TransportError::Codec(format!("encode notification: {}", e)))
    }

    /// Decode dispatches on `(method?, id?)`:
    /// method + id => Request, method without id => Notification,
    /// id without method => Response.
    pub fn decode(data: &str) -> Result<JsonRpcMessage, TransportError> {
        let value: Value = serde_json::from_str(data)
            .map_err(|e| TransportError::Codec(format!("parse error ({}): {}", error_codes::PARSE_ERROR, e)))?;

        let has_method = value.get("method").is_some();
        let has_id = value.get("id").map(|v| !v.is_null()).unwrap_or(false);

        let message = match (has_method, has_id) {
            (true, true) => JsonRpcMessage::Request(
                serde_json::from_value(value)
                    .map_err(|e| TransportError::Codec(format!("invalid request: {}", e)))?,
            ),
            (true, false) => JsonRpcMessage::Notification(
                serde_json::from_value(value)
                    .map_err(|e| TransportError::Codec(format!("invalid notification: {}", e)))?,
            ),
            (false, true) => JsonRpcMessage::Response(
                serde_json::from_value(value)
                    .map_err(|e| TransportError::Codec(format!("invalid response: {}", e)))?,
            ),
            (false, false) => {
                return Err(TransportError::Codec(
                    "message has neither method nor id".to_string(),
                ))
            }
        };

        Ok(message)
    }
}

/// MCP tool definition as reported by `tools/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Option<Value>,
}

/// MCP resource definition as reported by `resources/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpResource {
    pub uri: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "mimeType")]
    pub mime_type: Option<String>,
}

/// MCP prompt definition as reported by `prompts/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpPrompt {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Negotiated server identity from the initialize handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerInfo {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_has_uuid_string_id() {
        let req = JsonRpcRequest::new("tools/list", None);
        assert_eq!(req.jsonrpc, "2.0");
        assert!(matches!(req.id, Value::String(_)));
        assert_eq!(req.id_key().len(), 36);
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let req = JsonRpcRequest::new("tools/call", Some(serde_json::json!({"name": "echo"})));
        let encoded = JsonRpcCodec::encode_request(&req).unwrap();
        match JsonRpcCodec::decode(&encoded).unwrap() {
            JsonRpcMessage::Request(decoded) => {
                assert_eq!(decoded.method, "tools/call");
                assert_eq!(decoded.id_key(), req.id_key());
                assert_eq!(decoded.params, req.params);
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_dispatch() {
        let resp = r#"{"jsonrpc":"2.0","id":"abc","result":{"ok":true}}"#;
        assert!(matches!(
            JsonRpcCodec::decode(resp).unwrap(),
            JsonRpcMessage::Response(_)
        ));

        let notif = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        assert!(matches!(
            JsonRpcCodec::decode(notif).unwrap(),
            JsonRpcMessage::Notification(_)
        ));

        let req = r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
        assert!(matches!(
            JsonRpcCodec::decode(req).unwrap(),
            JsonRpcMessage::Request(_)
        ));
    }

    #[test]
    fn test_decode_numeric_id_normalized() {
        let resp = r#"{"jsonrpc":"2.0","id":7,"result":null}"#;
        match JsonRpcCodec::decode(resp).unwrap() {
            JsonRpcMessage::Response(r) => assert_eq!(r.id_key(), "7"),
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_error_response() {
        let resp = r#"{"jsonrpc":"2.0","id":"x","error":{"code":-32601,"message":"Method not found"}}"#;
        match JsonRpcCodec::decode(resp).unwrap() {
            JsonRpcMessage::Response(r) => {
                assert!(r.is_error());
                assert_eq!(r.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(JsonRpcCodec::decode("not json").is_err());
        assert!(JsonRpcCodec::decode(r#"{"jsonrpc":"2.0"}"#).is_err());
    }
}
