//! Thread-based JSON-RPC endpoint
//!
//! One dispatcher thread owns the read side of a [`Transport`]. It routes every
//! inbound message: responses wake the caller waiting on that id, requests and
//! notifications go to the handlers in a [`CallbackTable`]. Callers on any
//! number of threads issue blocking [`Endpoint::call`]s and fire-and-forget
//! [`Endpoint::notify`]s concurrently.
//!
//! ```rust
//! use lsp_endpoint::{CallbackTable, ChannelTransport, Endpoint, EndpointConfig, Message, Transport};
//! use serde_json::json;
//! use std::thread;
//!
//! let (local, peer) = ChannelTransport::pair();
//! let endpoint = Endpoint::start(local, CallbackTable::new(), &EndpointConfig::default()).unwrap();
//!
//! // A peer that answers one request
//! let server = thread::spawn(move || {
//!     let request = peer.receive().unwrap().unwrap();
//!     let id = request.id.clone().unwrap();
//!     peer.send(&Message::success(id, json!(42))).unwrap();
//! });
//!
//! assert_eq!(endpoint.call("foo", json!({})).unwrap(), json!(42));
//! server.join().unwrap();
//! endpoint.shutdown();
//! ```

pub mod callbacks;
pub mod config;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod registry;
pub mod tracing_utils;
pub mod transport;

pub use callbacks::{CallbackTable, NotificationHandler, RequestHandler};
pub use config::EndpointConfig;
pub use dispatcher::{Dispatcher, DispatcherHandle, DispatcherState, ExitReason};
pub use endpoint::Endpoint;
pub use error::{EndpointError, Result};
pub use registry::{Completion, PendingCallRegistry};
pub use transport::{ChannelTransport, FramedTransport, Transport};

// Wire types, so most users need only this crate
pub use lsp_endpoint_protocol::{
    Incoming, Message, RequestId, ResponseError, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST,
    METHOD_NOT_FOUND, PARSE_ERROR, REQUEST_CANCELLED,
};
