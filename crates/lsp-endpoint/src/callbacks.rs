//! Handlers for peer-initiated requests and notifications
//!
//! Handlers run on the dispatcher thread only, one at a time, in the order the
//! messages were read. They may capture mutable state (`FnMut`) but must be
//! `Send` to move onto that thread.

use std::collections::HashMap;

use lsp_endpoint_protocol::ResponseError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Handler for an inbound request: `params` in, `result` or structured error out
pub type RequestHandler = Box<dyn FnMut(Value) -> Result<Value, ResponseError> + Send>;

/// Handler for an inbound notification; errors are logged, never answered
pub type NotificationHandler = Box<dyn FnMut(Value) -> anyhow::Result<()> + Send>;

/// Method name → handler tables, injected when the endpoint starts
///
/// ```rust
/// use lsp_endpoint::CallbackTable;
/// use serde_json::json;
///
/// let callbacks = CallbackTable::new()
///     .on_request("workspace/configuration", |_params| Ok(json!([])))
///     .on_notification("window/logMessage", |params| {
///         println!("{}", params["message"]);
///         Ok(())
///     });
/// assert!(callbacks.has_request("workspace/configuration"));
/// ```
#[derive(Default)]
pub struct CallbackTable {
    requests: HashMap<String, RequestHandler>,
    notifications: HashMap<String, NotificationHandler>,
}

impl std::fmt::Debug for CallbackTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut requests: Vec<_> = self.requests.keys().collect();
        let mut notifications: Vec<_> = self.notifications.keys().collect();
        requests.sort();
        notifications.sort();
        f.debug_struct("CallbackTable")
            .field("requests", &requests)
            .field("notifications", &notifications)
            .finish()
    }
}

impl CallbackTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for request `method`
    pub fn on_request<F>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: FnMut(Value) -> Result<Value, ResponseError> + Send + 'static,
    {
        self.requests.insert(method.into(), Box::new(handler));
        self
    }

    /// Register a request handler with serde-typed params and result.
    ///
    /// Params that fail to deserialize are answered with `InvalidParams`; a
    /// result that fails to serialize with `InternalError`.
    pub fn on_request_typed<P, R, F>(self, method: impl Into<String>, mut handler: F) -> Self
    where
        P: DeserializeOwned,
        R: Serialize,
        F: FnMut(P) -> Result<R, ResponseError> + Send + 'static,
    {
        self.on_request(method, move |params| {
            let params: P = serde_json::from_value(params)
                .map_err(|e| ResponseError::invalid_params(e.to_string()))?;
            let result = handler(params)?;
            serde_json::to_value(result).map_err(|e| ResponseError::internal_error(e.to_string()))
        })
    }

    /// Register (or replace) the handler for notification `method`
    pub fn on_notification<F>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: FnMut(Value) -> anyhow::Result<()> + Send + 'static,
    {
        self.notifications.insert(method.into(), Box::new(handler));
        self
    }

    /// Register a notification handler with serde-typed params
    pub fn on_notification_typed<P, F>(self, method: impl Into<String>, mut handler: F) -> Self
    where
        P: DeserializeOwned,
        F: FnMut(P) -> anyhow::Result<()> + Send + 'static,
    {
        self.on_notification(method, move |params| {
            let params: P = serde_json::from_value(params)?;
            handler(params)
        })
    }

    pub fn has_request(&self, method: &str) -> bool {
        self.requests.contains_key(method)
    }

    pub fn has_notification(&self, method: &str) -> bool {
        self.notifications.contains_key(method)
    }

    pub(crate) fn request_handler(&mut self, method: &str) -> Option<&mut RequestHandler> {
        self.requests.get_mut(method)
    }

    pub(crate) fn notification_handler(&mut self, method: &str) -> Option<&mut NotificationHandler> {
        self.notifications.get_mut(method)
    }
}
