// crates/toolhost-mcp/src/protocol.rs
// ============================================================================
// Module: JSON-RPC Protocol
// Description: Envelope parsing, error codes, and method parameter shapes.
// Purpose: Share one wire model between the host engine and plugin clients.
// Dependencies: serde, serde_json, toolhost-config
// ============================================================================

//! ## Overview
//! Messages are newline-delimited JSON-RPC 2.0 envelopes. [`parse_message`]
//! classifies one line as a request, notification, or response, and reports
//! envelope problems as a [`ProtocolError`] with the request id when one can
//! be recovered.
//!
//! Only protocol errors bypass the tool-result shape; every tool-level
//! failure is a normal response with `isError` set.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;
use toolhost_config::LogLevel;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// JSON-RPC protocol version tag.
pub const JSONRPC_VERSION: &str = "2.0";
/// Protocol revisions this host speaks, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];
/// Protocol revision offered when the client asks for an unknown one.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

/// Method names handled by the engine.
pub mod methods {
    /// Handshake request.
    pub const INITIALIZE: &str = "initialize";
    /// Liveness probe.
    pub const PING: &str = "ping";
    /// Tool listing.
    pub const TOOLS_LIST: &str = "tools/list";
    /// Tool invocation.
    pub const TOOLS_CALL: &str = "tools/call";
    /// Resource listing.
    pub const RESOURCES_LIST: &str = "resources/list";
    /// Resource read.
    pub const RESOURCES_READ: &str = "resources/read";
    /// Prompt listing.
    pub const PROMPTS_LIST: &str = "prompts/list";
    /// Prompt fetch.
    pub const PROMPTS_GET: &str = "prompts/get";
    /// Client log threshold.
    pub const LOGGING_SET_LEVEL: &str = "logging/setLevel";
    /// Handshake completion notification.
    pub const INITIALIZED: &str = "notifications/initialized";
    /// Request cancellation notification.
    pub const CANCELLED: &str = "notifications/cancelled";
    /// Progress notification.
    pub const PROGRESS: &str = "notifications/progress";
    /// Log message notification.
    pub const MESSAGE: &str = "notifications/message";
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Protocol-level failures answered with a JSON-RPC error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Line is not valid JSON.
    #[error("parse error: {0}")]
    Parse(String),
    /// Envelope is not a valid JSON-RPC request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Method is not in the dispatch table.
    #[error("method not found: {0}")]
    MethodNotFound(String),
    /// Parameters do not match the method.
    #[error("invalid params: {0}")]
    InvalidParams(String),
    /// Host-side failure while answering.
    #[error("internal error: {0}")]
    Internal(String),
    /// Request arrived before the handshake completed.
    #[error("server not initialized")]
    NotInitialized,
}

impl ProtocolError {
    /// Returns the JSON-RPC error code.
    #[must_use]
    pub const fn code(&self) -> i64 {
        match self {
            Self::Parse(_) => -32700,
            Self::InvalidRequest(_) => -32600,
            Self::MethodNotFound(_) => -32601,
            Self::InvalidParams(_) => -32602,
            Self::Internal(_) => -32603,
            Self::NotInitialized => -32002,
        }
    }

    /// Converts into a wire error payload.
    #[must_use]
    pub fn to_wire(&self) -> JsonRpcError {
        JsonRpcError {
            code: self.code(),
            message: self.to_string(),
            data: None,
        }
    }
}

// ============================================================================
// SECTION: Envelopes
// ============================================================================

/// JSON-RPC error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Outgoing request envelope.
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    /// JSON-RPC protocol version.
    pub jsonrpc: &'static str,
    /// Request identifier.
    pub id: u64,
    /// Method name.
    pub method: &'a str,
    /// Parameters payload.
    pub params: Value,
}

impl<'a> JsonRpcRequest<'a> {
    /// Builds a request.
    #[must_use]
    pub const fn new(id: u64, method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }
}

/// Outgoing response envelope.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC protocol version.
    pub jsonrpc: &'static str,
    /// Request identifier; null when it could not be read.
    pub id: Value,
    /// Successful result payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload when the request fails.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Builds a success response.
    #[must_use]
    pub const fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Builds an error response.
    #[must_use]
    pub fn failure(id: Value, error: &ProtocolError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(error.to_wire()),
        }
    }
}

/// Outgoing notification envelope.
#[derive(Debug, Serialize)]
pub struct JsonRpcNotification<'a> {
    /// JSON-RPC protocol version.
    pub jsonrpc: &'static str,
    /// Notification method.
    pub method: &'a str,
    /// Parameters payload.
    pub params: Value,
}

impl<'a> JsonRpcNotification<'a> {
    /// Builds a notification.
    #[must_use]
    pub const fn new(method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

/// One classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Request expecting exactly one response.
    Request {
        /// Request identifier.
        id: Value,
        /// Method name.
        method: String,
        /// Parameters; null when absent.
        params: Value,
    },
    /// Notification expecting no response.
    Notification {
        /// Method name.
        method: String,
        /// Parameters; null when absent.
        params: Value,
    },
    /// Response to a request this side sent.
    Response {
        /// Request identifier.
        id: Value,
        /// Result or error payload.
        outcome: Result<Value, JsonRpcError>,
    },
}

/// Envelope failure with the id to answer under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageError {
    /// Request id when recoverable, else null.
    pub id: Value,
    /// Failure to report.
    pub error: ProtocolError,
}

/// Parses and classifies one line.
///
/// # Errors
///
/// Returns [`MessageError`] when the line is not JSON or not a valid
/// JSON-RPC 2.0 envelope.
pub fn parse_message(line: &[u8]) -> Result<Incoming, MessageError> {
    let value: Value = serde_json::from_slice(line).map_err(|err| MessageError {
        id: Value::Null,
        error: ProtocolError::Parse(err.to_string()),
    })?;
    let Value::Object(mut envelope) = value else {
        return Err(invalid(Value::Null, "message must be a json object"));
    };
    let id = envelope.remove("id");
    if let Some(id) = &id
        && !(id.is_string() || id.is_number())
    {
        return Err(invalid(Value::Null, "id must be a string or number"));
    }
    let reply_id = id.clone().unwrap_or(Value::Null);
    if envelope.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(invalid(reply_id, "jsonrpc must be \"2.0\""));
    }
    let params = envelope.remove("params").unwrap_or(Value::Null);
    match (envelope.remove("method"), id) {
        (Some(Value::String(method)), Some(id)) => Ok(Incoming::Request {
            id,
            method,
            params,
        }),
        (Some(Value::String(method)), None) => Ok(Incoming::Notification {
            method,
            params,
        }),
        (Some(_), _) => Err(invalid(reply_id, "method must be a string")),
        (None, Some(id)) => response_from(id, &mut envelope),
        (None, None) => Err(invalid(Value::Null, "missing method")),
    }
}

/// Builds a response from an envelope without a method.
fn response_from(id: Value, envelope: &mut Map<String, Value>) -> Result<Incoming, MessageError> {
    if let Some(error) = envelope.remove("error") {
        let error: JsonRpcError = serde_json::from_value(error)
            .map_err(|err| invalid(id.clone(), &format!("malformed error object: {err}")))?;
        return Ok(Incoming::Response {
            id,
            outcome: Err(error),
        });
    }
    match envelope.remove("result") {
        Some(result) => Ok(Incoming::Response {
            id,
            outcome: Ok(result),
        }),
        None => Err(invalid(id, "missing method")),
    }
}

/// Builds an invalid-request failure.
fn invalid(id: Value, reason: &str) -> MessageError {
    MessageError {
        id,
        error: ProtocolError::InvalidRequest(reason.to_string()),
    }
}

/// Deserializes method params, treating null as an empty object.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidParams`] when the shape does not match.
pub fn parse_params<T: for<'de> Deserialize<'de>>(params: Value) -> Result<T, ProtocolError> {
    let params = if params.is_null() { Value::Object(Map::new()) } else { params };
    serde_json::from_value(params).map_err(|err| ProtocolError::InvalidParams(err.to_string()))
}

/// Returns the negotiated protocol revision for a client request.
#[must_use]
pub fn negotiate_version(requested: &str) -> &'static str {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .find(|version| **version == requested)
        .copied()
        .unwrap_or(LATEST_PROTOCOL_VERSION)
}

// ============================================================================
// SECTION: Method Parameters
// ============================================================================

/// Peer name and version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Peer name.
    #[serde(default)]
    pub name: String,
    /// Peer version.
    #[serde(default)]
    pub version: String,
}

/// `initialize` parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeParams {
    /// Requested protocol revision.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Client capabilities; accepted but not interpreted.
    #[serde(default)]
    pub capabilities: Value,
    /// Client descriptor.
    #[serde(rename = "clientInfo", default)]
    pub client_info: Implementation,
}

/// Request metadata carried under `_meta`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestMeta {
    /// Token to attach to progress notifications.
    #[serde(rename = "progressToken", default)]
    pub progress_token: Option<Value>,
}

/// `tools/call` parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    /// Tool name.
    pub name: String,
    /// Free-form arguments.
    #[serde(default)]
    pub arguments: Option<Value>,
    /// Protocol metadata.
    #[serde(rename = "_meta", default)]
    pub meta: Option<RequestMeta>,
}

/// `logging/setLevel` parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct SetLevelParams {
    /// Minimum level to forward.
    pub level: LogLevel,
}

/// `notifications/cancelled` parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelledParams {
    /// Id of the request to cancel.
    #[serde(rename = "requestId")]
    pub request_id: Value,
    /// Optional reason.
    #[serde(default)]
    pub reason: Option<String>,
}

/// `resources/read` parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadResourceParams {
    /// Resource URI.
    pub uri: String,
}

/// `prompts/get` parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct GetPromptParams {
    /// Prompt name.
    pub name: String,
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions.")]

    use serde_json::json;

    use super::Incoming;
    use super::ProtocolError;
    use super::ToolCallParams;
    use super::negotiate_version;
    use super::parse_message;
    use super::parse_params;

    #[test]
    fn classifies_requests_notifications_and_responses() {
        let request = parse_message(br#"{"jsonrpc":"2.0","id":7,"method":"ping"}"#).unwrap();
        assert!(matches!(request, Incoming::Request { ref method, .. } if method == "ping"));
        let note =
            parse_message(br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(matches!(note, Incoming::Notification { .. }));
        let response = parse_message(br#"{"jsonrpc":"2.0","id":1,"result":{}}"#).unwrap();
        assert!(matches!(response, Incoming::Response { outcome: Ok(_), .. }));
        let failed =
            parse_message(br#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"x"}}"#)
                .unwrap();
        assert!(
            matches!(failed, Incoming::Response { outcome: Err(ref err), .. } if err.code == -32601)
        );
    }

    #[test]
    fn envelope_errors_carry_codes_and_ids() {
        let parse = parse_message(b"{not json").unwrap_err();
        assert_eq!(parse.error.code(), -32700);
        assert!(parse.id.is_null());

        let version = parse_message(br#"{"jsonrpc":"1.0","id":"a","method":"ping"}"#).unwrap_err();
        assert_eq!(version.error.code(), -32600);
        assert_eq!(version.id, json!("a"));

        let method = parse_message(br#"{"jsonrpc":"2.0","id":3,"method":5}"#).unwrap_err();
        assert_eq!(method.error.code(), -32600);
        assert_eq!(method.id, json!(3));
        assert_eq!(ProtocolError::NotInitialized.code(), -32002);
    }

    #[test]
    fn tool_call_params_read_meta() {
        let params: ToolCallParams = parse_params(json!({
            "name": "x",
            "arguments": {"a": 1},
            "_meta": {"progressToken": "p1"}
        }))
        .unwrap();
        assert_eq!(params.meta.unwrap().progress_token, Some(json!("p1")));
        assert!(parse_params::<ToolCallParams>(json!({"arguments": {}})).is_err());
    }

    #[test]
    fn version_negotiation_falls_back_to_latest() {
        assert_eq!(negotiate_version("2024-11-05"), "2024-11-05");
        assert_eq!(negotiate_version("1999-01-01"), "2025-06-18");
    }
}
