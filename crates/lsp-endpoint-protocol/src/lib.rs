//! JSON-RPC 2.0 envelope types for lsp-endpoint
//!
//! Everything that crosses the wire lives here: the [`Message`] envelope, its
//! [`RequestId`], the structured [`ResponseError`] and the standard error codes.
//! Inbound envelopes are turned into an [`Incoming`] value by
//! [`Message::classify`] before routing.

mod codes;
mod message;

pub use codes::{
    is_server_error, CONTENT_MODIFIED, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST,
    METHOD_NOT_FOUND, PARSE_ERROR, REQUEST_CANCELLED, SERVER_ERROR_END, SERVER_ERROR_START,
    SERVER_NOT_INITIALIZED, UNKNOWN_ERROR_CODE,
};
pub use message::{Incoming, Message, RequestId, ResponseError, JSONRPC_VERSION};
