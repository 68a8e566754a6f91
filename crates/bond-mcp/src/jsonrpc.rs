//! JSON-RPC 2.0 types and line codec for MCP communication.
//!
//! Every message travels as one JSON value per line. A line holding a JSON
//! array is a batch. Decoding classifies each value as a request (has `method`
//! and `id`), a notification (`method`, no `id`), or a response.

use crate::error::McpError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// The protocol version tag carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INTERNAL_ERROR: i64 = -32603;

/// Lowest code in the range reserved for server-defined errors.
pub const SERVER_ERROR_MIN: i64 = -32099;
/// Highest code in the range reserved for server-defined errors.
pub const SERVER_ERROR_MAX: i64 = -32000;

/// A request correlation id.
///
/// Numeric ids are always held as `i64`. A JSON number such as `7.0` decodes
/// to `Number(7)`, so ids round-tripped through float-based encoders still
/// match the integer ids we issued.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl RequestId {
    /// Canonicalize a JSON value into an id.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return Ok(RequestId::Number(i));
                }
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                        Ok(RequestId::Number(f as i64))
                    }
                    _ => Err(format!("non-integral numeric id {n}")),
                }
            }
            Value::String(s) => Ok(RequestId::String(s.clone())),
            other => Err(format!("invalid id {other}")),
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "\"{s}\""),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RequestId::Number(n) => serializer.serialize_i64(*n),
            RequestId::String(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        RequestId::from_value(&value).map_err(serde::de::Error::custom)
    }
}

/// Hands out request ids: monotonically increasing, starting at 1, never reused.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicI64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicI64::new(1),
        }
    }

    pub fn next_id(&self) -> RequestId {
        RequestId::Number(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// A JSON-RPC 2.0 request. Without an `id` it is a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl Request {
    /// Create a new JSON-RPC request.
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: Some(id),
        }
    }

    /// Create a notification (no id, no response expected).
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: None,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Serialize to a single line of JSON (no trailing newline).
    pub fn encode(&self) -> Result<String, McpError> {
        Ok(serde_json::to_string(self)?)
    }

    fn validate(&self) -> Result<(), McpError> {
        if self.jsonrpc != JSONRPC_VERSION {
            return Err(McpError::Decode(format!(
                "invalid JSON-RPC version '{}': expected {JSONRPC_VERSION}",
                self.jsonrpc
            )));
        }
        if self.method.is_empty() {
            return Err(McpError::Decode(
                "missing method in JSON-RPC request".to_string(),
            ));
        }
        Ok(())
    }
}

/// A notification received from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// A request that decoded as JSON but is not a valid JSON-RPC request.
    pub fn invalid_request(detail: impl fmt::Display) -> Self {
        Self::new(INVALID_REQUEST, format!("Invalid request: {detail}"))
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method '{method}' not found"))
    }

    /// Whether the code falls in the range reserved for server-defined errors.
    pub fn is_server_defined(&self) -> bool {
        (SERVER_ERROR_MIN..=SERVER_ERROR_MAX).contains(&self.code)
    }
}

/// What a response carries: a result or an error, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Result(Value),
    Error(JsonRpcError),
}

/// A JSON-RPC 2.0 response.
///
/// Decoding rejects objects carrying both `result` and `error`, or neither.
/// A `"result": null` counts as present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireResponse", into = "WireResponse")]
pub struct Response {
    pub id: Option<RequestId>,
    pub outcome: Outcome,
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id: Some(id),
            outcome: Outcome::Result(result),
        }
    }

    pub fn failure(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            id,
            outcome: Outcome::Error(error),
        }
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Result(value) => Some(value),
            Outcome::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&JsonRpcError> {
        match &self.outcome {
            Outcome::Result(_) => None,
            Outcome::Error(err) => Some(err),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }

    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.outcome {
            Outcome::Result(value) => Ok(value),
            Outcome::Error(err) => Err(err),
        }
    }

    /// A `method` string embedded in a result object, if any.
    ///
    /// Used to route unsolicited responses to notification handlers.
    pub fn embedded_method(&self) -> Option<&str> {
        self.result()?.get("method")?.as_str()
    }

    pub fn encode(&self) -> Result<String, McpError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Serialize, Deserialize)]
struct WireResponse {
    jsonrpc: String,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
    #[serde(default)]
    id: Option<RequestId>,
}

/// Distinguishes `"result": null` (present) from a missing field.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl TryFrom<WireResponse> for Response {
    type Error = String;

    fn try_from(wire: WireResponse) -> Result<Self, Self::Error> {
        if wire.jsonrpc != JSONRPC_VERSION {
            return Err(format!(
                "invalid JSON-RPC version '{}': expected {JSONRPC_VERSION}",
                wire.jsonrpc
            ));
        }
        let outcome = match (wire.result, wire.error) {
            (Some(result), None) => Outcome::Result(result),
            (None, Some(error)) => Outcome::Error(error),
            (Some(_), Some(_)) => {
                return Err("invalid JSON-RPC response: both result and error present".into());
            }
            (None, None) => {
                return Err("invalid JSON-RPC response: missing both result and error".into());
            }
        };
        Ok(Response {
            id: wire.id,
            outcome,
        })
    }
}

impl From<Response> for WireResponse {
    fn from(response: Response) -> Self {
        let (result, error) = match response.outcome {
            Outcome::Result(value) => (Some(value), None),
            Outcome::Error(err) => (None, Some(err)),
        };
        WireResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result,
            error,
            id: response.id,
        }
    }
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A server-to-client request that expects a reply.
    Request(Request),
    Notification(Notification),
    Response(Response),
}

impl Message {
    /// Classify and decode one JSON value.
    pub fn from_value(value: Value) -> Result<Self, McpError> {
        let has_method = value.get("method").is_some();
        if has_method {
            let request: Request = serde_json::from_value(value)
                .map_err(|e| McpError::Decode(format!("invalid request: {e}")))?;
            request.validate()?;
            return Ok(match request.id {
                Some(_) => Message::Request(request),
                None => Message::Notification(Notification {
                    method: request.method,
                    params: request.params,
                }),
            });
        }
        let response: Response =
            serde_json::from_value(value).map_err(|e| McpError::Decode(e.to_string()))?;
        Ok(Message::Response(response))
    }
}

/// One line of input: a single JSON value or a batch.
#[derive(Debug)]
pub enum Frame {
    Single(Value),
    Batch(Vec<Value>),
}

impl Frame {
    /// Parse a line of JSON. Does not validate message shape.
    pub fn parse(line: &str) -> Result<Self, McpError> {
        let value: Value =
            serde_json::from_str(line).map_err(|e| McpError::Decode(e.to_string()))?;
        match value {
            Value::Array(items) if items.is_empty() => {
                Err(McpError::Decode("empty batch".to_string()))
            }
            Value::Array(items) => Ok(Frame::Batch(items)),
            other => Ok(Frame::Single(other)),
        }
    }

    /// The contained values, decoded independently by the caller.
    pub fn into_values(self) -> Vec<Value> {
        match self {
            Frame::Single(value) => vec![value],
            Frame::Batch(items) => items,
        }
    }
}

/// The id of a value shaped like a request (it has a `method`), if usable.
///
/// Lets the reader answer a request that fails validation.
pub fn request_id(value: &Value) -> Option<RequestId> {
    value.get("method")?;
    RequestId::from_value(value.get("id")?).ok()
}
