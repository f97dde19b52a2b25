//! Error types for endpoint operations

use std::time::Duration;

use lsp_endpoint_protocol::{RequestId, ResponseError};
use thiserror::Error;

/// Result type alias for endpoint operations
pub type Result<T> = std::result::Result<T, EndpointError>;

/// Errors that can occur while calling, notifying or serving a peer
#[derive(Debug, Error)]
pub enum EndpointError {
    /// The peer answered with an `error` member (or a local handler produced one)
    #[error("RPC error: {0}")]
    Rpc(#[from] ResponseError),

    /// No response arrived within the call timeout
    #[error("Request {id} timed out after {timeout:?}")]
    Timeout { id: RequestId, timeout: Duration },

    /// The transport closed while the operation was outstanding
    #[error("Transport closed")]
    TransportClosed,

    /// The endpoint was stopped before the operation was issued
    #[error("Endpoint stopped")]
    Stopped,

    /// An outbound id was registered twice
    #[error("Request id {0} is already outstanding")]
    DuplicateId(RequestId),

    /// Waited on an id that was never registered or was already taken
    #[error("Request id {0} is not pending")]
    NotPending(RequestId),

    /// IO errors on the underlying stream
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed framing on the wire
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration file could not be parsed
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A worker thread could not be started or did not finish
    #[error("Thread error: {0}")]
    Spawn(String),
}

impl EndpointError {
    /// Whether a failure returned by `Transport::receive` ends the read loop.
    ///
    /// Decode and framing failures only affect one message; a failed stream
    /// cannot produce any more.
    pub fn is_fatal_for_reader(&self) -> bool {
        matches!(self, EndpointError::Io(_) | EndpointError::TransportClosed)
    }

    /// The structured RPC error, if this is one
    pub fn as_response_error(&self) -> Option<&ResponseError> {
        match self {
            EndpointError::Rpc(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, EndpointError::Timeout { .. })
    }
}
