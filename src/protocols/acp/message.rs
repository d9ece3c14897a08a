//! JSON-RPC 2.0 message model and shape-based classification.
//!
//! Inbound lines are parsed into a generic JSON value first and then sorted
//! into exactly one of Request, Response or Notification. The predicates are
//! checked in that order, which decides what happens to ambiguous input.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::types::ApiError;

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC error code for an unknown method
pub const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC error code for a failed handler
pub const INTERNAL_ERROR: i64 = -32603;

/// Request identifier, either side may use numbers or strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(serde_json::Number),
    String(String),
}

impl RequestId {
    pub fn to_value(&self) -> Value {
        match self {
            RequestId::Number(n) => Value::Number(n.clone()),
            RequestId::String(s) => Value::String(s.clone()),
        }
    }

    /// Numeric value when the id is a non-negative integer.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            RequestId::Number(n) => n.as_u64(),
            RequestId::String(_) => None,
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Some(RequestId::Number(n.clone())),
            Value::String(s) => Some(RequestId::String(s.clone())),
            _ => None,
        }
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        RequestId::Number(id.into())
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::String(id.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

/// Error object carried by a failed Response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(obj) => RpcError {
                code: obj
                    .get("code")
                    .and_then(|c| c.as_i64())
                    .unwrap_or(INTERNAL_ERROR),
                message: match obj.get("message") {
                    Some(Value::String(message)) => message.clone(),
                    Some(other) => other.to_string(),
                    None => "Unknown error".to_string(),
                },
                data: obj.get("data").cloned(),
            },
            Value::String(message) => RpcError {
                code: INTERNAL_ERROR,
                message: message.clone(),
                data: None,
            },
            other => RpcError {
                code: INTERNAL_ERROR,
                message: other.to_string(),
                data: None,
            },
        }
    }
}

impl From<RpcError> for ApiError {
    fn from(err: RpcError) -> Self {
        ApiError::Remote {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// `None` when the id was `null` or missing
    pub id: Option<RequestId>,
    pub result: Option<Value>,
    pub error: Option<RpcError>,
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: RequestId, code: i64, message: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

/// A classified JSON-RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

fn has_protocol_tag(obj: &Map<String, Value>) -> bool {
    obj.get("jsonrpc").and_then(|v| v.as_str()) == Some(JSONRPC_VERSION)
}

fn has_string_method(obj: &Map<String, Value>) -> bool {
    matches!(obj.get("method"), Some(Value::String(_)))
}

/// Protocol tag, a number/string `id`, and a string `method`.
pub fn is_request(obj: &Map<String, Value>) -> bool {
    has_protocol_tag(obj)
        && matches!(obj.get("id"), Some(Value::Number(_)) | Some(Value::String(_)))
        && has_string_method(obj)
}

/// Protocol tag, a number/string/null `id`, and a `result` or `error` key.
///
/// Key presence is what counts: `"result": null` is a result.
pub fn is_response(obj: &Map<String, Value>) -> bool {
    has_protocol_tag(obj)
        && matches!(
            obj.get("id"),
            None | Some(Value::Null) | Some(Value::Number(_)) | Some(Value::String(_))
        )
        && (obj.contains_key("result") || obj.contains_key("error"))
}

/// Protocol tag, a string `method`, and no `id` key at all.
pub fn is_notification(obj: &Map<String, Value>) -> bool {
    has_protocol_tag(obj) && has_string_method(obj) && !obj.contains_key("id")
}

impl Message {
    /// Sort a parsed JSON value into a message variant.
    pub fn classify(value: Value) -> Result<Message, ApiError> {
        let Value::Object(mut obj) = value else {
            return Err(ApiError::ProtocolError {
                message: "JSON-RPC message must be an object".to_string(),
            });
        };

        if is_request(&obj) {
            let id = obj.get("id").and_then(RequestId::from_value);
            let method = obj.get("method").and_then(|m| m.as_str()).map(str::to_string);
            if let (Some(id), Some(method)) = (id, method) {
                return Ok(Message::Request(Request {
                    id,
                    method,
                    params: obj.remove("params"),
                }));
            }
        }

        if is_response(&obj) {
            let id = obj.get("id").and_then(RequestId::from_value);
            let error = obj
                .get("error")
                .filter(|e| !e.is_null())
                .map(RpcError::from_value);
            return Ok(Message::Response(Response {
                id,
                result: obj.remove("result"),
                error,
            }));
        }

        if is_notification(&obj) {
            if let Some(Value::String(method)) = obj.remove("method") {
                return Ok(Message::Notification(Notification {
                    method,
                    params: obj.remove("params"),
                }));
            }
        }

        Err(ApiError::ProtocolError {
            message: "Message is not a JSON-RPC request, response or notification".to_string(),
        })
    }

    /// Serialize to the wire representation, including the protocol tag.
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("jsonrpc".to_string(), Value::from(JSONRPC_VERSION));
        match self {
            Message::Request(request) => {
                obj.insert("id".to_string(), request.id.to_value());
                obj.insert("method".to_string(), Value::from(request.method.clone()));
                if let Some(params) = &request.params {
                    obj.insert("params".to_string(), params.clone());
                }
            }
            Message::Response(response) => {
                let id = response
                    .id
                    .as_ref()
                    .map(RequestId::to_value)
                    .unwrap_or(Value::Null);
                obj.insert("id".to_string(), id);
                match &response.error {
                    Some(error) => {
                        let error = serde_json::to_value(error).unwrap_or(Value::Null);
                        obj.insert("error".to_string(), error);
                    }
                    None => {
                        let result = response.result.clone().unwrap_or(Value::Null);
                        obj.insert("result".to_string(), result);
                    }
                }
            }
            Message::Notification(notification) => {
                obj.insert("method".to_string(), Value::from(notification.method.clone()));
                if let Some(params) = &notification.params {
                    obj.insert("params".to_string(), params.clone());
                }
            }
        }
        Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(obj) => obj,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_predicates_are_exclusive_on_well_formed_input() {
        let request = object(json!({"jsonrpc": "2.0", "id": 1, "method": "fs/read_text_file"}));
        let response = object(json!({"jsonrpc": "2.0", "id": 1, "result": {}}));
        let notification = object(json!({"jsonrpc": "2.0", "method": "session/update"}));

        assert!(is_request(&request) && !is_response(&request) && !is_notification(&request));
        assert!(!is_request(&response) && is_response(&response) && !is_notification(&response));
        assert!(
            !is_request(&notification)
                && !is_response(&notification)
                && is_notification(&notification)
        );
    }

    #[test]
    fn test_null_result_counts_as_present() {
        let message = Message::classify(json!({"jsonrpc": "2.0", "id": 7, "result": null})).unwrap();

        match message {
            Message::Response(response) => {
                assert_eq!(response.id, Some(RequestId::from(7)));
                assert_eq!(response.result, Some(Value::Null));
                assert!(response.error.is_none());
            }
            other => panic!("Expected Response, got {other:?}"),
        }
    }

    #[test]
    fn test_null_id_response() {
        let message = Message::classify(
            json!({"jsonrpc": "2.0", "id": null, "error": {"code": -32700, "message": "Parse error"}}),
        )
        .unwrap();

        match message {
            Message::Response(response) => {
                assert!(response.id.is_none());
                let error = response.error.unwrap();
                assert_eq!(error.code, -32700);
                assert_eq!(error.message, "Parse error");
            }
            other => panic!("Expected Response, got {other:?}"),
        }
    }

    #[test]
    fn test_ambiguous_message_classifies_as_request() {
        let message = Message::classify(
            json!({"jsonrpc": "2.0", "id": "a", "method": "terminal/create", "result": 1}),
        )
        .unwrap();

        assert!(matches!(message, Message::Request(_)));
    }

    #[test]
    fn test_missing_protocol_tag_is_rejected() {
        let result = Message::classify(json!({"id": 1, "method": "initialize"}));
        assert!(matches!(result, Err(ApiError::ProtocolError { .. })));

        let result = Message::classify(json!([1, 2, 3]));
        assert!(matches!(result, Err(ApiError::ProtocolError { .. })));
    }

    #[test]
    fn test_notification_with_null_id_is_not_a_notification() {
        let result = Message::classify(json!({"jsonrpc": "2.0", "id": null, "method": "session/update"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_string_error_is_wrapped() {
        let message = Message::classify(json!({"jsonrpc": "2.0", "id": 3, "error": "boom"})).unwrap();
        match message {
            Message::Response(response) => {
                let error = response.error.unwrap();
                assert_eq!(error.code, INTERNAL_ERROR);
                assert_eq!(error.message, "boom");
            }
            other => panic!("Expected Response, got {other:?}"),
        }
    }

    #[test]
    fn test_success_response_without_result_serializes_null() {
        let response = Response {
            id: Some(RequestId::from("x")),
            result: None,
            error: None,
        };

        assert_eq!(
            Message::Response(response).to_value(),
            json!({"jsonrpc": "2.0", "id": "x", "result": null})
        );
    }

    #[test]
    fn test_failure_response_serialization() {
        let response = Response::failure(RequestId::from(4), METHOD_NOT_FOUND, "Method not found: nope");

        assert_eq!(
            Message::Response(response).to_value(),
            json!({
                "jsonrpc": "2.0",
                "id": 4,
                "error": {"code": -32601, "message": "Method not found: nope"}
            })
        );
    }
}
