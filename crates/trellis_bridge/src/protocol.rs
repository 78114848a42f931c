//! JSON-RPC 2.0 messages and the tool-server payloads carried in them.

use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Protocol version tag
pub const JSONRPC: &str = "2.0";

/// Method not found
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Request sent to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Always `"2.0"`
    pub jsonrpc: String,
    /// Correlation id
    pub id: u64,
    /// Method name
    pub method: String,
    /// Parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Create a request
    #[must_use]
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// Notification in either direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Always `"2.0"`
    pub jsonrpc: String,
    /// Method name
    pub method: String,
    /// Parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    /// Create a notification
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code
    pub code: i64,
    /// Message
    pub message: String,
    /// Extra data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Response in either direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Always `"2.0"`
    pub jsonrpc: String,
    /// Id of the request answered
    pub id: Value,
    /// Success payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    /// Successful response
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error response
    #[must_use]
    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC.to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Split into result or error; a response with neither is `null`
    ///
    /// # Errors
    ///
    /// Returns the server's error object
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Any message read from the peer
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Peer-initiated request
    Request {
        /// Peer's correlation id (any JSON value)
        id: Value,
        /// Method name
        method: String,
        /// Parameters
        params: Option<Value>,
    },
    /// Notification
    Notification(Notification),
    /// Response to one of our requests
    Response(Response),
}

impl Incoming {
    /// Classify one line of traffic
    ///
    /// # Errors
    ///
    /// Returns error if the line is not a JSON-RPC message
    pub fn parse(line: &str) -> BridgeResult<Self> {
        let value: Value = serde_json::from_str(line)?;
        let Value::Object(map) = value else {
            return Err(BridgeError::Protocol {
                reason: "message is not an object".to_string(),
            });
        };

        let method = map.get("method").and_then(Value::as_str).map(str::to_string);
        let id = map.get("id").filter(|id| !id.is_null()).cloned();

        match (method, id) {
            (Some(method), Some(id)) => Ok(Self::Request {
                id,
                method,
                params: map.get("params").cloned(),
            }),
            (Some(method), None) => Ok(Self::Notification(Notification::new(
                method,
                map.get("params").cloned(),
            ))),
            (None, Some(_)) if map.contains_key("result") || map.contains_key("error") => {
                Ok(Self::Response(serde_json::from_value(Value::Object(map))?))
            }
            _ => Err(BridgeError::Protocol {
                reason: "message is neither request, notification nor response".to_string(),
            }),
        }
    }
}

/// Name and version of a client or server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Name
    #[serde(default)]
    pub name: String,
    /// Version
    #[serde(default)]
    pub version: String,
}

/// What the server said about itself during `initialize`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Protocol version the server speaks
    #[serde(default)]
    pub protocol_version: String,
    /// Advertised capabilities
    #[serde(default)]
    pub capabilities: Value,
    /// Server identity
    #[serde(default, rename = "serverInfo")]
    pub implementation: Implementation,
    /// Usage instructions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

fn default_input_schema() -> Value {
    json!({"type": "object"})
}

/// Tool advertised by `tools/list`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    /// Tool name
    pub name: String,
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Schema of the `arguments` object
    #[serde(default = "default_input_schema")]
    pub input_schema: Value,
    /// Schema of structured output, if declared
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

/// Page of `tools/list`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ToolsPage {
    #[serde(default)]
    pub tools: Vec<ToolInfo>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// One tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool name
    pub name: String,
    /// Arguments object
    #[serde(default = "empty_object")]
    pub arguments: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl ToolCall {
    /// Create a call
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// A single call or a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolCalls {
    /// One call; its result is returned unwrapped
    One(ToolCall),
    /// Several calls; results are returned as a list in order
    Many(Vec<ToolCall>),
}

/// Extract the useful value from a `tools/call` result
///
/// Structured content wins (a lone `{"result": v}` envelope is unwrapped to
/// `v`); otherwise text content is parsed as JSON where possible.
///
/// # Errors
///
/// Returns [`BridgeError::ToolCallFailed`] when the result has `isError`
pub fn tool_result(tool: &str, arguments: &Value, result: Value) -> BridgeResult<Value> {
    let is_error = result.get("isError").and_then(Value::as_bool).unwrap_or(false);
    if is_error {
        return Err(BridgeError::ToolCallFailed {
            tool: tool.to_string(),
            arguments: arguments.clone(),
            error: content_text(&result),
        });
    }

    if let Some(structured) = result.get("structuredContent") {
        return Ok(unwrap_envelope(structured.clone()));
    }

    let mut parts: Vec<Value> = result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(content_value).collect())
        .unwrap_or_default();

    Ok(match parts.len() {
        0 => Value::Null,
        1 => parts.remove(0),
        _ => Value::Array(parts),
    })
}

/// `{"result": v}` becomes `v`; anything else is left alone
#[must_use]
pub fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.len() == 1 && map.contains_key("result") => {
            map.remove("result").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn content_value(item: &Value) -> Value {
    match item.get("text").and_then(Value::as_str) {
        Some(text) => serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())),
        None => item.clone(),
    }
}

fn content_text(result: &Value) -> String {
    let texts: Vec<&str> = result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|i| i.get("text").and_then(Value::as_str)).collect())
        .unwrap_or_default();
    if texts.is_empty() {
        result.to_string()
    } else {
        texts.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_form() {
        let request = Request::new(3, "tools/call", Some(json!({"name": "add"})));
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"jsonrpc": "2.0", "id": 3, "method": "tools/call", "params": {"name": "add"}})
        );
        let bare = serde_json::to_value(Request::new(1, "ping", None)).unwrap();
        assert!(bare.get("params").is_none());
    }

    #[test]
    fn test_classify_incoming() {
        let request = Incoming::parse(r#"{"jsonrpc":"2.0","id":"s1","method":"ping"}"#).unwrap();
        assert!(matches!(request, Incoming::Request { ref method, .. } if method == "ping"));

        let note = Incoming::parse(r#"{"jsonrpc":"2.0","method":"notifications/message","params":{"x":1}}"#)
            .unwrap();
        assert!(matches!(note, Incoming::Notification(ref n) if n.method == "notifications/message"));

        let response = Incoming::parse(r#"{"jsonrpc":"2.0","id":7,"result":{"ok":true}}"#).unwrap();
        match response {
            Incoming::Response(response) => {
                assert_eq!(response.id, json!(7));
                assert_eq!(response.into_result().unwrap(), json!({"ok": true}));
            }
            other => panic!("unexpected {:?}", other),
        }

        let error = Incoming::parse(r#"{"jsonrpc":"2.0","id":8,"error":{"code":-32601,"message":"nope"}}"#)
            .unwrap();
        match error {
            Incoming::Response(response) => {
                assert_eq!(response.into_result().unwrap_err().code, METHOD_NOT_FOUND);
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(Incoming::parse("[1,2]").is_err());
        assert!(Incoming::parse(r#"{"jsonrpc":"2.0","id":9}"#).is_err());
        assert!(Incoming::parse("not json").is_err());
    }

    #[test]
    fn test_server_info_parse() {
        let info: ServerInfo = serde_json::from_value(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "mock", "version": "1.0"}
        }))
        .unwrap();
        assert_eq!(info.implementation.name, "mock");
        assert_eq!(info.protocol_version, "2024-11-05");
    }

    #[test]
    fn test_tool_info_defaults() {
        let tool: ToolInfo = serde_json::from_value(json!({"name": "ping"})).unwrap();
        assert_eq!(tool.input_schema, json!({"type": "object"}));
        assert!(tool.output_schema.is_none());
    }

    #[test]
    fn test_tool_calls_single_or_many() {
        let one: ToolCalls = serde_json::from_value(json!({"name": "add", "arguments": {"a": 1}})).unwrap();
        assert!(matches!(one, ToolCalls::One(_)));
        let many: ToolCalls = serde_json::from_value(json!([{"name": "a"}, {"name": "b"}])).unwrap();
        match many {
            ToolCalls::Many(calls) => {
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[0].arguments, json!({}));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_tool_result_structured_envelope() {
        let result = json!({
            "content": [{"type": "text", "text": "8"}],
            "structuredContent": {"result": 8},
            "isError": false
        });
        assert_eq!(tool_result("add", &json!({}), result).unwrap(), json!(8));

        let result = json!({"structuredContent": {"sum": 8, "carry": 0}});
        assert_eq!(
            tool_result("add", &json!({}), result).unwrap(),
            json!({"sum": 8, "carry": 0})
        );
    }

    #[test]
    fn test_tool_result_text_content() {
        let result = json!({"content": [{"type": "text", "text": "{\"a\":1}"}]});
        assert_eq!(tool_result("t", &json!({}), result).unwrap(), json!({"a": 1}));

        let result = json!({"content": [{"type": "text", "text": "hello"}, {"type": "text", "text": "2"}]});
        assert_eq!(tool_result("t", &json!({}), result).unwrap(), json!(["hello", 2]));

        assert_eq!(tool_result("t", &json!({}), json!({})).unwrap(), Value::Null);
    }

    #[test]
    fn test_tool_result_is_error() {
        let result = json!({"content": [{"type": "text", "text": "boom"}], "isError": true});
        match tool_result("fail", &json!({"x": 1}), result) {
            Err(BridgeError::ToolCallFailed { tool, arguments, error }) => {
                assert_eq!(tool, "fail");
                assert_eq!(arguments, json!({"x": 1}));
                assert_eq!(error, "boom");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
