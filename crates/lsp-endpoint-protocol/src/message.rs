use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codes::{INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND};

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request ID (can be string or number)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::String(id.to_string())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        RequestId::String(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{:?}", s),
        }
    }
}

/// Structured error carried in the `error` member of a response.
///
/// Produced locally for requests the dispatcher cannot serve (or that a
/// handler rejects), and surfaced to local callers when the peer answers a
/// call with an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct ResponseError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }
}

/// A JSON-RPC 2.0 envelope as it appears on the wire.
///
/// The same shape carries requests, notifications and responses; which one a
/// given envelope is depends on which members are present (see
/// [`Message::classify`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// An inbound envelope after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Peer-initiated request; the reply must echo `id` unchanged.
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    /// One-way message, no reply expected.
    Notification { method: String, params: Value },
    /// Reply to one of our calls. `id` is `None` when the peer could not
    /// attribute the reply (e.g. a parse error on its side).
    Response {
        id: Option<RequestId>,
        outcome: Result<Value, ResponseError>,
    },
}

impl Message {
    fn empty() -> Self {
        Self {
            jsonrpc: default_version(),
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        }
    }

    pub fn request(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: Some(id),
            method: Some(method.into()),
            params: Some(params),
            ..Self::empty()
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: Some(method.into()),
            params: Some(params),
            ..Self::empty()
        }
    }

    /// Build the reply to a request.
    ///
    /// Exactly one of `result` / `error` is set. A successful `null` result is
    /// still serialized as `"result": null`.
    pub fn response(id: RequestId, outcome: Result<Value, ResponseError>) -> Self {
        match outcome {
            Ok(result) => Self {
                id: Some(id),
                result: Some(result),
                ..Self::empty()
            },
            Err(error) => Self {
                id: Some(id),
                error: Some(error),
                ..Self::empty()
            },
        }
    }

    pub fn success(id: RequestId, result: impl Into<Value>) -> Self {
        Self::response(id, Ok(result.into()))
    }

    pub fn error(id: RequestId, error: ResponseError) -> Self {
        Self::response(id, Err(error))
    }

    pub fn is_request(&self) -> bool {
        self.method.is_some() && self.id.is_some()
    }

    pub fn is_notification(&self) -> bool {
        self.method.is_some() && self.id.is_none()
    }

    pub fn is_response(&self) -> bool {
        self.method.is_none()
    }

    /// Classify an inbound envelope by member presence.
    ///
    /// An id of `0` or `""` still counts as present. A response carrying both
    /// members is treated as an error response.
    pub fn classify(self) -> Incoming {
        let params = self.params.unwrap_or(Value::Null);
        match (self.method, self.id) {
            (Some(method), Some(id)) => Incoming::Request { id, method, params },
            (Some(method), None) => Incoming::Notification { method, params },
            (None, id) => {
                let outcome = match self.error {
                    Some(error) => Err(error),
                    None => Ok(self.result.unwrap_or(Value::Null)),
                };
                Incoming::Response { id, outcome }
            }
        }
    }
}
