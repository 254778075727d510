/// The JSON-RPC messages exchanged between the chat client and the tool server
use crate::{content::Content, tool::Tool};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version of the tool-channel protocol both sides speak. Sent by the client
/// in `initialize` and echoed by the server in its result.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorData>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct JsonRpcError {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub error: ErrorData,
}

/// A single frame on the wire. Frames carry no explicit tag, so deserialization
/// goes through [`JsonRpcRaw`] and classifies by which fields are present.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged, try_from = "JsonRpcRaw")]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
    Error(JsonRpcError),
    Nil, // ack for notifications, never serialized onto the wire
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonRpcRaw {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorData>,
}

impl TryFrom<JsonRpcRaw> for JsonRpcMessage {
    type Error = String;

    fn try_from(raw: JsonRpcRaw) -> Result<Self, <Self as TryFrom<JsonRpcRaw>>::Error> {
        // An error field wins over everything else
        if let Some(error) = raw.error {
            return Ok(JsonRpcMessage::Error(JsonRpcError {
                jsonrpc: raw.jsonrpc,
                id: raw.id,
                error,
            }));
        }

        if raw.result.is_some() {
            return Ok(JsonRpcMessage::Response(JsonRpcResponse {
                jsonrpc: raw.jsonrpc,
                id: raw.id,
                result: raw.result,
                error: None,
            }));
        }

        // A method makes it a request when an id is present, a notification otherwise
        if let Some(method) = raw.method {
            if raw.id.is_none() {
                return Ok(JsonRpcMessage::Notification(JsonRpcNotification {
                    jsonrpc: raw.jsonrpc,
                    method,
                    params: raw.params,
                }));
            }

            return Ok(JsonRpcMessage::Request(JsonRpcRequest {
                jsonrpc: raw.jsonrpc,
                id: raw.id,
                method,
                params: raw.params,
            }));
        }

        if raw.id.is_none() {
            return Ok(JsonRpcMessage::Nil);
        }

        Err(format!(
            "invalid JSON-RPC frame: id={:?} with no method, result or error",
            raw.id
        ))
    }
}

// Standard JSON-RPC error codes
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// Error payload carried by JSON-RPC error responses.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ErrorData {
    /// The error type that occurred.
    pub code: i32,

    /// A short, single-sentence description of the error.
    pub message: String,

    /// Sender-defined detail (nested errors, upstream bodies, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: Implementation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

/// What the server offers. The tool channel only ever advertises tools; the
/// field stays optional so a reply from a richer server still parses.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    pub list_changed: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl CallToolResult {
    /// Flatten the result into the text the model will see.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(Content::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EmptyResult {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frame_with_id_and_method_is_a_request() {
        let msg: JsonRpcMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "tools/call",
            "params": {"name": "get-alerts", "arguments": {"state": "CA"}},
        }))
        .unwrap();

        match msg {
            JsonRpcMessage::Request(r) => {
                assert_eq!(r.id, Some(7));
                assert_eq!(r.method, "tools/call");
                assert_eq!(r.params.unwrap()["name"], "get-alerts");
            }
            other => panic!("expected Request, got {other:?}"),
        }
    }

    #[test]
    fn frame_without_id_is_a_notification() {
        let msg: JsonRpcMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized",
        }))
        .unwrap();

        match msg {
            JsonRpcMessage::Notification(n) => {
                assert_eq!(n.method, "notifications/initialized");
                assert!(n.params.is_none());
            }
            other => panic!("expected Notification, got {other:?}"),
        }
    }

    #[test]
    fn frame_with_result_is_a_response() {
        let msg: JsonRpcMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"tools": []},
        }))
        .unwrap();

        assert!(matches!(msg, JsonRpcMessage::Response(_)));
    }

    #[test]
    fn error_field_wins_over_result() {
        let msg: JsonRpcMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "error": {"code": METHOD_NOT_FOUND, "message": "no such method"},
        }))
        .unwrap();

        match msg {
            JsonRpcMessage::Error(e) => {
                assert_eq!(e.error.code, METHOD_NOT_FOUND);
                assert_eq!(e.error.message, "no such method");
            }
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[test]
    fn id_without_payload_is_rejected() {
        let result = serde_json::from_value::<JsonRpcMessage>(json!({
            "jsonrpc": "2.0",
            "id": 3,
        }));
        assert!(result.is_err());
    }

    #[test]
    fn call_tool_result_uses_camel_case_on_the_wire() {
        let result = CallToolResult {
            content: vec![Content::text("boom")],
            is_error: Some(true),
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"isError\":true"));
        assert!(!json.contains("is_error"));
    }

    #[test]
    fn call_tool_result_text_joins_text_blocks() {
        let result = CallToolResult {
            content: vec![Content::text("line one"), Content::text("line two")],
            is_error: None,
        };
        assert_eq!(result.text(), "line one\nline two");
    }
}
