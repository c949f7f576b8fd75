//! Wire types for MCP over stdio
//!
//! Every frame is one JSON-RPC 2.0 object on its own line. This module only
//! (de)serializes; framing is in [`crate::mcp::transport`] and id
//! correlation in [`crate::mcp::client`].
//!
//! References: <https://www.jsonrpc.org/specification>,
//! <https://modelcontextprotocol.io/specification/2024-11-05>

use serde::{Deserialize, Serialize};

pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision sent in `initialize`
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Client name sent in `initialize`
pub const CLIENT_NAME: &str = "kubeguard";

/// Outgoing call, e.g. `{"jsonrpc":"2.0","id":1,"method":"tools/list"}`.
/// Ids come from the connection's counter and are never reused.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl McpRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A request without an id; the peer never answers it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl McpNotification {
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Server reply carrying either `result` or `error`.
///
/// `id` is `None` when the server could not tie an error to a request,
/// typically because our line did not parse on its side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpResponse {
    pub jsonrpc: String,
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
}

impl McpResponse {
    pub fn ok(id: u64, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, error: McpError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_some() && self.error.is_none()
    }

    /// A reply with neither field counts as a `null` result; one with both
    /// is malformed.
    pub fn into_result(self) -> Result<serde_json::Value, McpError> {
        match (self.result, self.error) {
            (Some(result), None) => Ok(result),
            (None, Some(error)) => Err(error),
            (None, None) => Ok(serde_json::Value::Null),
            (Some(_), Some(_)) => Err(McpError::internal_error(
                "malformed response: result and error both set",
            )),
        }
    }
}

/// JSON-RPC error object as sent by the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl McpError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// -32700, also used locally for lines we cannot decode
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(-32700, message)
    }

    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::new(-32601, format!("method not found: {}", method.into()))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(-32602, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(-32603, message)
    }
}

impl std::fmt::Display for McpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "server error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for McpError {}

/// MCP methods used by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum McpMethod {
    /// Initialize the connection (must be called first)
    Initialize,
    /// Sent after the initialize result is received
    Initialized,
    /// List available tools
    ToolsList,
    /// Call a specific tool
    ToolsCall,
}

impl McpMethod {
    /// Convert to string for JSON-RPC method field
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Initialized => "notifications/initialized",
            Self::ToolsList => "tools/list",
            Self::ToolsCall => "tools/call",
        }
    }
}

/// One line read from a server, sorted by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    /// Answer to one of our requests
    Response(McpResponse),
    /// Server-initiated request or notification (not supported; ignored)
    ServerMessage { method: String, id: Option<serde_json::Value> },
}

impl IncomingMessage {
    /// Parse one line of server output.
    ///
    /// # Errors
    ///
    /// Returns a parse error if the line is not a JSON-RPC object.
    pub fn parse(line: &str) -> Result<Self, McpError> {
        let value: serde_json::Value =
            serde_json::from_str(line).map_err(|e| McpError::parse_error(e.to_string()))?;
        let Some(object) = value.as_object() else {
            return Err(McpError::parse_error("message is not a JSON object"));
        };
        if let Some(method) = object.get("method").and_then(|m| m.as_str()) {
            return Ok(IncomingMessage::ServerMessage {
                method: method.to_string(),
                id: object.get("id").cloned(),
            });
        }
        let response: McpResponse =
            serde_json::from_value(value).map_err(|e| McpError::parse_error(e.to_string()))?;
        Ok(IncomingMessage::Response(response))
    }
}

/// Initialization parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InitializeParams {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,

    pub capabilities: serde_json::Value,

    #[serde(rename = "clientInfo")]
    pub client_info: ClientInfo,
}

impl Default for InitializeParams {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
            client_info: ClientInfo {
                name: CLIENT_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

/// Client identification information
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Result of `initialize`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion", default)]
    pub protocol_version: String,

    #[serde(default)]
    pub capabilities: serde_json::Value,

    #[serde(rename = "serverInfo", default)]
    pub server_info: Option<ServerInfo>,
}

/// Server identification information
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// Advisory behaviour hints a server may attach to a tool
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolAnnotations {
    #[serde(rename = "readOnlyHint", default, skip_serializing_if = "Option::is_none")]
    pub read_only_hint: Option<bool>,

    #[serde(rename = "destructiveHint", default, skip_serializing_if = "Option::is_none")]
    pub destructive_hint: Option<bool>,
}

/// Tool definition as listed by a server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tool {
    /// Tool name (unique within its server)
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Tool input schema (JSON Schema)
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<ToolAnnotations>,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object" })
}

/// Result of `tools/list`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<Tool>,

    #[serde(rename = "nextCursor", default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Tool call parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCallParams {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One content block of a tool result. Only text blocks are surfaced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Result of `tools/call`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentBlock>,

    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Text blocks joined with newlines; other block types are skipped
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_request() {
        let req = McpRequest::new(1, "tools/list", None);
        let json = serde_json::to_string(&req).unwrap();

        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"method\":\"tools/list\""));
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_notification_has_no_id() {
        let note = McpNotification::new(McpMethod::Initialized.as_str(), None);
        let json = serde_json::to_string(&note).unwrap();
        assert_eq!(
            json,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#
        );
    }

    #[test]
    fn test_response_into_result() {
        let result = serde_json::json!({"status": "ok"});
        assert_eq!(McpResponse::ok(1, result.clone()).into_result().unwrap(), result);

        let err = McpError::invalid_params("bad params");
        assert_eq!(McpResponse::err(1, err.clone()).into_result().unwrap_err(), err);
    }

    #[test]
    fn test_response_into_result_invalid() {
        let invalid_resp = McpResponse {
            jsonrpc: "2.0".to_string(),
            id: Some(1),
            result: Some(serde_json::json!({"status": "ok"})),
            error: Some(McpError::internal_error("Error")),
        };
        let err = invalid_resp.into_result().unwrap_err();
        assert_eq!(err.code, -32603);
        assert!(err.message.contains("malformed response"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(McpError::parse_error("x").code, -32700);
        assert_eq!(McpError::method_not_found("x").code, -32601);
        assert_eq!(McpError::invalid_params("x").code, -32602);
        assert_eq!(McpError::internal_error("x").code, -32603);
        assert_eq!(McpError::new(-32000, "boom").to_string(), "server error -32000: boom");
    }

    #[test]
    fn test_method_names() {
        assert_eq!(McpMethod::Initialize.as_str(), "initialize");
        assert_eq!(McpMethod::Initialized.as_str(), "notifications/initialized");
        assert_eq!(McpMethod::ToolsList.as_str(), "tools/list");
        assert_eq!(McpMethod::ToolsCall.as_str(), "tools/call");
    }

    #[test]
    fn test_incoming_response() {
        let msg = IncomingMessage::parse(r#"{"jsonrpc":"2.0","id":7,"result":{"tools":[]}}"#)
            .unwrap();
        match msg {
            IncomingMessage::Response(resp) => {
                assert_eq!(resp.id, Some(7));
                assert!(resp.is_success());
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_incoming_error_without_id() {
        let msg = IncomingMessage::parse(
            r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"parse"}}"#,
        )
        .unwrap();
        assert!(matches!(msg, IncomingMessage::Response(McpResponse { id: None, .. })));
    }

    #[test]
    fn test_incoming_server_message() {
        let msg = IncomingMessage::parse(
            r#"{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            IncomingMessage::ServerMessage {
                method: "notifications/tools/list_changed".into(),
                id: None
            }
        );
    }

    #[test]
    fn test_incoming_garbage_is_parse_error() {
        assert_eq!(IncomingMessage::parse("not json").unwrap_err().code, -32700);
        assert_eq!(IncomingMessage::parse("[1,2]").unwrap_err().code, -32700);
    }

    #[test]
    fn test_tool_minimal_fields() {
        let tool: Tool = serde_json::from_str(r#"{"name":"echo"}"#).unwrap();
        assert_eq!(tool.name, "echo");
        assert_eq!(tool.description, "");
        assert_eq!(tool.input_schema, serde_json::json!({"type": "object"}));
        assert!(tool.annotations.is_none());
    }

    #[test]
    fn test_tool_annotations() {
        let tool: Tool = serde_json::from_str(
            r#"{"name":"rm","inputSchema":{},"annotations":{"destructiveHint":true}}"#,
        )
        .unwrap();
        assert_eq!(tool.annotations.unwrap().destructive_hint, Some(true));
    }

    #[test]
    fn test_call_result_text_joins_text_blocks() {
        let result: CallToolResult = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"a"},{"type":"image","data":"..","mimeType":"image/png"},{"type":"text","text":"b"}]}"#,
        )
        .unwrap();
        assert_eq!(result.text(), "a\nb");
        assert!(!result.is_error);
    }

    #[test]
    fn test_initialize_params_default() {
        let params = serde_json::to_value(InitializeParams::default()).unwrap();
        assert_eq!(params["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(params["clientInfo"]["name"], CLIENT_NAME);
    }
}
