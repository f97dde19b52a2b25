//! Caller-facing endpoint
//!
//! An [`Endpoint`] owns a transport, a [`PendingCallRegistry`] and the
//! dispatcher thread reading from that transport. Any number of threads may
//! share it (typically behind an `Arc`) and issue calls concurrently; each
//! call blocks only its own thread.
//!
//! Request handlers run on the dispatcher thread. A handler that issues a
//! blocking `call` on the same endpoint would wait for a response only the
//! dispatcher itself can read, and so always times out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lsp_endpoint_protocol::Message;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::callbacks::CallbackTable;
use crate::config::EndpointConfig;
use crate::dispatcher::{Dispatcher, DispatcherHandle, DispatcherState, ExitReason};
use crate::registry::{Completion, PendingCallRegistry};
use crate::tracing_utils::call_span;
use crate::transport::Transport;
use crate::{EndpointError, Result};

pub struct Endpoint<T: Transport> {
    transport: Arc<T>,
    registry: Arc<PendingCallRegistry>,
    timeout: Duration,
    stopped: AtomicBool,
    dispatcher: Mutex<Option<DispatcherHandle>>,
}

impl<T: Transport> std::fmt::Debug for Endpoint<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("timeout", &self.timeout)
            .field("pending_calls", &self.registry.len())
            .field("state", &self.state())
            .finish()
    }
}

impl<T: Transport> Endpoint<T> {
    /// Start the dispatcher thread on `transport` and return the caller handle
    ///
    /// # Example
    ///
    /// ```rust
    /// use lsp_endpoint::{CallbackTable, ChannelTransport, Endpoint, EndpointConfig};
    /// use serde_json::json;
    ///
    /// let (local, _peer) = ChannelTransport::pair();
    /// let callbacks = CallbackTable::new().on_notification("window/logMessage", |_| Ok(()));
    /// let endpoint = Endpoint::start(local, callbacks, &EndpointConfig::default()).unwrap();
    ///
    /// endpoint.notify("initialized", json!({})).unwrap();
    /// endpoint.close();
    /// ```
    pub fn start(transport: T, callbacks: CallbackTable, config: &EndpointConfig) -> Result<Self> {
        config.validate()?;
        let transport = Arc::new(transport);
        let registry = Arc::new(PendingCallRegistry::new());

        let dispatcher = Dispatcher::new(transport.clone(), registry.clone(), callbacks);
        let handle = DispatcherHandle::spawn(dispatcher, &config.thread_name)?;
        debug!(thread = %config.thread_name, timeout_ms = config.timeout_ms, "Endpoint started");

        Ok(Self {
            transport,
            registry,
            timeout: config.timeout(),
            stopped: AtomicBool::new(false),
            dispatcher: Mutex::new(Some(handle)),
        })
    }

    /// Send a request and block until its response arrives or the configured
    /// timeout elapses
    pub fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.call_with_timeout(method, params, self.timeout)
    }

    /// [`call`](Self::call) with an explicit timeout
    pub fn call_with_timeout(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        self.ensure_running()?;
        let id = self.registry.register_next()?;
        let span = call_span(&id, method);
        let _guard = span.enter();

        if let Err(e) = self.transport.send(&Message::request(id.clone(), method, params)) {
            self.registry.forget(&id);
            return Err(e);
        }
        trace!("Request sent");

        match self.registry.wait_and_take(&id, timeout) {
            Ok(Completion::Response(Ok(result))) => Ok(result),
            Ok(Completion::Response(Err(error))) => {
                debug!(code = error.code, "Peer returned error");
                Err(EndpointError::Rpc(error))
            }
            Ok(Completion::Closed) => Err(EndpointError::TransportClosed),
            Err(e) => {
                if e.is_timeout() {
                    warn!(?timeout, "Request timed out");
                }
                Err(e)
            }
        }
    }

    /// Typed [`call`](Self::call): `params` is serialized with serde and the
    /// result deserialized into `R`
    pub fn request<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let result = self.call(method, params)?;
        Ok(serde_json::from_value(result)?)
    }

    /// Send a notification. Returns as soon as the message is handed to the
    /// transport.
    pub fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.ensure_running()?;
        self.transport.send(&Message::notification(method, params))?;
        trace!(method, "Notification sent");
        Ok(())
    }

    /// Ask the dispatcher to exit after its current read returns.
    ///
    /// Does not interrupt a blocked read; see [`close`](Self::close).
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(handle) = self.dispatcher.lock().as_ref() {
            handle.stop();
        }
    }

    /// Stop the dispatcher and close the transport
    pub fn close(&self) {
        self.stop();
        self.transport.close();
    }

    /// Wait for the dispatcher thread to exit.
    ///
    /// Returns `None` if it was already joined. Must not be called from a
    /// handler, which runs on the thread being joined.
    pub fn join(&self) -> Option<ExitReason> {
        let handle = self.dispatcher.lock().take()?;
        let reason = handle.join();
        debug!(?reason, "Endpoint dispatcher joined");
        Some(reason)
    }

    /// [`close`](Self::close) followed by [`join`](Self::join).
    ///
    /// Returns once the dispatcher's read unblocks, which needs a transport
    /// whose `close` ends a blocked read (see
    /// [`FramedTransport::with_closer`](crate::FramedTransport::with_closer)).
    pub fn shutdown(&self) -> Option<ExitReason> {
        self.close();
        self.join()
    }

    pub fn state(&self) -> DispatcherState {
        match self.dispatcher.lock().as_ref() {
            Some(handle) if !self.stopped.load(Ordering::SeqCst) => handle.state(),
            _ => DispatcherState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == DispatcherState::Running
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Calls currently waiting for a response
    pub fn pending_calls(&self) -> usize {
        self.registry.len()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn ensure_running(&self) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(EndpointError::Stopped);
        }
        Ok(())
    }
}

impl<T: Transport> Endpoint<T> {
    /// Await a [`call`](Self::call) from async code.
    ///
    /// The blocking wait runs on tokio's blocking pool, so the runtime's
    /// worker threads stay free.
    pub async fn call_async(self: &Arc<Self>, method: impl Into<String>, params: Value) -> Result<Value> {
        let endpoint = Arc::clone(self);
        let method = method.into();
        tokio::task::spawn_blocking(move || endpoint.call(&method, params))
            .await
            .map_err(|e| EndpointError::Spawn(e.to_string()))?
    }
}

impl<T: Transport> Drop for Endpoint<T> {
    fn drop(&mut self) {
        self.close();
    }
}
