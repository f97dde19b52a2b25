//! The single reader loop
//!
//! One dispatcher thread owns the read side of the transport. Each inbound
//! message is classified and routed:
//!
//! - request → request handler, answered with `{id, result}` or `{id, error}`
//! - notification → notification handler, never answered
//! - response → [`PendingCallRegistry::complete`]
//!
//! Nothing that happens while serving one message ends the loop. Only a
//! closed (or failed) transport or the stop flag does.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use lsp_endpoint_protocol::{Incoming, Message, RequestId, ResponseError};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::callbacks::CallbackTable;
use crate::registry::PendingCallRegistry;
use crate::tracing_utils::dispatch_span;
use crate::transport::Transport;
use crate::{EndpointError, Result};

/// Why the dispatcher loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The stop flag was observed
    Stopped,
    /// The transport reported end of stream
    TransportClosed,
    /// The underlying stream failed
    TransportFailed(String),
    /// The dispatcher thread panicked outside of a handler
    Panicked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Running,
    Stopped,
}

/// Reader loop state: the transport, the correlation table and the handlers
pub struct Dispatcher<T: Transport> {
    transport: Arc<T>,
    registry: Arc<PendingCallRegistry>,
    callbacks: CallbackTable,
    stop: Arc<AtomicBool>,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(
        transport: Arc<T>,
        registry: Arc<PendingCallRegistry>,
        callbacks: CallbackTable,
    ) -> Self {
        Self {
            transport,
            registry,
            callbacks,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run until stopped or the transport closes.
    ///
    /// The stop flag is checked once per message, so a stop requested while
    /// a read is blocked takes effect when that read returns. On exit the
    /// registry is closed, waking every caller still waiting.
    pub fn run(mut self) -> ExitReason {
        let reason = loop {
            if self.stop.load(Ordering::SeqCst) {
                break ExitReason::Stopped;
            }
            match self.transport.receive() {
                Ok(Some(message)) => self.dispatch(message),
                // A close requested alongside stop() counts as a stop
                Ok(None) if self.stop.load(Ordering::SeqCst) => break ExitReason::Stopped,
                Ok(None) => break ExitReason::TransportClosed,
                Err(e) if e.is_fatal_for_reader() => {
                    error!("Transport failed: {}", e);
                    break ExitReason::TransportFailed(e.to_string());
                }
                Err(e) => warn!("Dropping unreadable message: {}", e),
            }
        };
        self.registry.close();
        debug!(?reason, "Dispatcher exited");
        reason
    }

    fn dispatch(&mut self, message: Message) {
        match message.classify() {
            Incoming::Request { id, method, params } => {
                let span = dispatch_span("request", &method, Some(&id));
                let _guard = span.enter();
                let outcome = self.serve_request(&method, params);
                respond(&*self.transport, id, outcome);
            }
            Incoming::Notification { method, params } => {
                let span = dispatch_span("notification", &method, None);
                let _guard = span.enter();
                self.serve_notification(&method, params);
            }
            Incoming::Response { id, outcome } => {
                self.registry.complete(id.as_ref(), outcome);
            }
        }
    }

    fn serve_request(
        &mut self,
        method: &str,
        params: Value,
    ) -> std::result::Result<Value, ResponseError> {
        let Some(handler) = self.callbacks.request_handler(method) else {
            warn!("Unknown request method: {:?}", method);
            return Err(ResponseError::method_not_found(method));
        };
        match panic::catch_unwind(AssertUnwindSafe(|| handler(params))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!("Request handler for {:?} panicked: {}", method, reason);
                Err(ResponseError::internal_error(format!(
                    "handler for {} panicked: {}",
                    method, reason
                )))
            }
        }
    }

    fn serve_notification(&mut self, method: &str, params: Value) {
        let Some(handler) = self.callbacks.notification_handler(method) else {
            warn!("Notify method not found: {:?}", method);
            return;
        };
        match panic::catch_unwind(AssertUnwindSafe(|| handler(params))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Notification handler for {:?} failed: {}", method, e),
            Err(payload) => error!(
                "Notification handler for {:?} panicked: {}",
                method,
                panic_message(payload.as_ref())
            ),
        }
    }
}

/// Answer an inbound request. Exactly one of `result` / `error` is sent, keyed
/// by the id parsed from the request.
pub(crate) fn respond<T: Transport + ?Sized>(
    transport: &T,
    id: RequestId,
    outcome: std::result::Result<Value, ResponseError>,
) {
    if let Err(ref err) = outcome {
        debug!(%id, code = err.code, "Responding with error");
    }
    let response = Message::response(id, outcome);
    if let Err(e) = transport.send(&response) {
        warn!("Failed to send response: {}", e);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle to a dispatcher running on its own thread
#[derive(Debug)]
pub struct DispatcherHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<ExitReason>,
}

impl DispatcherHandle {
    /// Start `dispatcher` on a new thread named `name`.
    ///
    /// The tracing subscriber active on the calling thread is installed on
    /// the dispatcher thread as well.
    pub fn spawn<T: Transport>(dispatcher: Dispatcher<T>, name: &str) -> Result<Self> {
        let stop = dispatcher.stop.clone();
        let subscriber = tracing::dispatcher::get_default(|current| current.clone());
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || tracing::dispatcher::with_default(&subscriber, || dispatcher.run()))
            .map_err(|e| EndpointError::Spawn(e.to_string()))?;
        Ok(Self { stop, thread })
    }

    /// Ask the loop to exit after its current read returns
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn state(&self) -> DispatcherState {
        if self.stop.load(Ordering::SeqCst) || self.thread.is_finished() {
            DispatcherState::Stopped
        } else {
            DispatcherState::Running
        }
    }

    /// Wait for the loop to exit
    pub fn join(self) -> ExitReason {
        self.thread.join().unwrap_or(ExitReason::Panicked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Completion;
    use crate::tracing_utils::create_test_subscriber;
    use crate::transport::ChannelTransport;
    use lsp_endpoint_protocol::{INTERNAL_ERROR, METHOD_NOT_FOUND};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Replays a fixed inbound script, then reports closure
    struct ScriptedTransport {
        inbound: Mutex<VecDeque<Result<Option<Message>>>>,
        sent: Mutex<Vec<Message>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<Option<Message>>>) -> Arc<Self> {
            Arc::new(Self {
                inbound: Mutex::new(script.into()),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<serde_json::Value> {
            self.sent
                .lock()
                .iter()
                .map(|m| serde_json::to_value(m).unwrap())
                .collect()
        }
    }

    impl Transport for ScriptedTransport {
        fn receive(&self) -> Result<Option<Message>> {
            self.inbound.lock().pop_front().unwrap_or(Ok(None))
        }

        fn send(&self, message: &Message) -> Result<()> {
            self.sent.lock().push(message.clone());
            Ok(())
        }
    }

    fn inbound(raw: serde_json::Value) -> Result<Option<Message>> {
        Ok(Some(serde_json::from_value(raw).unwrap()))
    }

    fn run_script(
        script: Vec<Result<Option<Message>>>,
        callbacks: CallbackTable,
    ) -> (Arc<ScriptedTransport>, Arc<PendingCallRegistry>, ExitReason) {
        let transport = ScriptedTransport::new(script);
        let registry = Arc::new(PendingCallRegistry::new());
        let reason = Dispatcher::new(transport.clone(), registry.clone(), callbacks).run();
        (transport, registry, reason)
    }

    #[test]
    fn test_unknown_request_gets_method_not_found() {
        let (transport, _, reason) = run_script(
            vec![inbound(json!({"jsonrpc": "2.0", "id": 5, "method": "bar", "params": {}}))],
            CallbackTable::new(),
        );
        assert_eq!(reason, ExitReason::TransportClosed);

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["jsonrpc"], json!("2.0"));
        assert_eq!(sent[0]["id"], json!(5));
        assert_eq!(sent[0]["error"]["code"], json!(METHOD_NOT_FOUND));
        assert!(sent[0].get("result").is_none());
    }

    #[test]
    fn test_request_ids_are_echoed_verbatim() {
        let callbacks = CallbackTable::new().on_request("ping", |_| Ok(json!("pong")));
        let (transport, _, _) = run_script(
            vec![
                inbound(json!({"jsonrpc": "2.0", "id": "abc-1", "method": "ping"})),
                inbound(json!({"jsonrpc": "2.0", "id": 0, "method": "ping"})),
            ],
            callbacks,
        );

        let sent = transport.sent();
        assert_eq!(sent[0], json!({"jsonrpc": "2.0", "id": "abc-1", "result": "pong"}));
        assert_eq!(sent[1], json!({"jsonrpc": "2.0", "id": 0, "result": "pong"}));
    }

    #[test]
    fn test_handler_receives_params_and_null_result_is_sent() {
        let seen = Arc::new(Mutex::new(None));
        let callbacks = CallbackTable::new().on_request("client/registerCapability", {
            let seen = seen.clone();
            move |params| {
                *seen.lock() = Some(params);
                Ok(Value::Null)
            }
        });
        let (transport, _, _) = run_script(
            vec![inbound(json!({
                "jsonrpc": "2.0", "id": 3, "method": "client/registerCapability",
                "params": {"registrations": []}
            }))],
            callbacks,
        );

        assert_eq!(*seen.lock(), Some(json!({"registrations": []})));
        assert_eq!(transport.sent()[0], json!({"jsonrpc": "2.0", "id": 3, "result": null}));
    }

    #[test]
    fn test_missing_params_passed_as_null() {
        let callbacks = CallbackTable::new().on_request("echo", Ok);
        let (transport, _, _) = run_script(
            vec![inbound(json!({"jsonrpc": "2.0", "id": 1, "method": "echo"}))],
            callbacks,
        );
        assert_eq!(transport.sent()[0]["result"], Value::Null);
    }

    #[test]
    fn test_handler_error_is_propagated_verbatim() {
        let callbacks = CallbackTable::new().on_request("workspace/applyEdit", |_| {
            Err(ResponseError::new(-32001, "document changed").with_data(json!({"version": 7})))
        });
        let (transport, _, _) = run_script(
            vec![inbound(json!({"jsonrpc": "2.0", "id": 9, "method": "workspace/applyEdit"}))],
            callbacks,
        );

        assert_eq!(
            transport.sent()[0],
            json!({
                "jsonrpc": "2.0",
                "id": 9,
                "error": {"code": -32001, "message": "document changed", "data": {"version": 7}}
            })
        );
    }

    #[test]
    fn test_panicking_handler_does_not_stop_loop() {
        let callbacks = CallbackTable::new()
            .on_request("explode", |_| panic!("kaboom"))
            .on_request("ping", |_| Ok(json!("pong")));
        let (transport, _, reason) = run_script(
            vec![
                inbound(json!({"jsonrpc": "2.0", "id": 1, "method": "explode"})),
                inbound(json!({"jsonrpc": "2.0", "id": 2, "method": "ping"})),
            ],
            callbacks,
        );

        assert_eq!(reason, ExitReason::TransportClosed);
        let sent = transport.sent();
        assert_eq!(sent[0]["id"], json!(1));
        assert_eq!(sent[0]["error"]["code"], json!(INTERNAL_ERROR));
        assert!(sent[0]["error"]["message"].as_str().unwrap().contains("kaboom"));
        assert_eq!(sent[1]["result"], json!("pong"));
    }

    #[test]
    fn test_notifications_handled_in_order_without_reply() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let callbacks = CallbackTable::new().on_notification("$/progress", {
            let seen = seen.clone();
            move |params| {
                seen.lock().push(params["value"].clone());
                Ok(())
            }
        });
        let script = (0..5)
            .map(|n| inbound(json!({"jsonrpc": "2.0", "method": "$/progress", "params": {"value": n}})))
            .collect();
        let (transport, _, _) = run_script(script, callbacks);

        assert_eq!(*seen.lock(), (0..5).map(|n| json!(n)).collect::<Vec<_>>());
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_failing_notification_handler_is_contained() {
        let callbacks = CallbackTable::new()
            .on_notification("fails", |_| Err(anyhow::anyhow!("bad payload")))
            .on_notification("panics", |_| panic!("notification panic"))
            .on_request("ping", |_| Ok(json!("pong")));
        let (transport, _, reason) = run_script(
            vec![
                inbound(json!({"jsonrpc": "2.0", "method": "fails"})),
                inbound(json!({"jsonrpc": "2.0", "method": "panics"})),
                inbound(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})),
            ],
            callbacks,
        );

        assert_eq!(reason, ExitReason::TransportClosed);
        assert_eq!(transport.sent().len(), 1);
    }

    #[test]
    fn test_unknown_notification_is_logged_and_dropped() {
        let (subscriber, capture) = create_test_subscriber();
        let (transport, _, reason) = tracing::subscriber::with_default(subscriber, || {
            run_script(
                vec![
                    inbound(json!({"jsonrpc": "2.0", "method": "baz", "params": {}})),
                    inbound(json!({"jsonrpc": "2.0", "id": 1, "method": "bar"})),
                ],
                CallbackTable::new(),
            )
        });

        assert_eq!(reason, ExitReason::TransportClosed);
        assert!(capture.contains_at_level("WARN", "Notify method not found: \"baz\""));
        // Only the request is answered
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["id"], json!(1));
    }

    #[test]
    fn test_unreadable_message_is_skipped() {
        let callbacks = CallbackTable::new().on_request("ping", |_| Ok(json!("pong")));
        let (transport, _, reason) = run_script(
            vec![
                Err(EndpointError::Protocol("missing Content-Length header".into())),
                inbound(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})),
            ],
            callbacks,
        );
        assert_eq!(reason, ExitReason::TransportClosed);
        assert_eq!(transport.sent().len(), 1);
    }

    #[test]
    fn test_io_failure_ends_loop_and_closes_registry() {
        let transport = ScriptedTransport::new(vec![Err(EndpointError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        )))]);
        let registry = Arc::new(PendingCallRegistry::new());
        let id = registry.register_next().unwrap();

        let reason = Dispatcher::new(transport, registry.clone(), CallbackTable::new()).run();

        assert!(matches!(reason, ExitReason::TransportFailed(_)));
        assert!(registry.is_closed());
        assert_eq!(
            registry.wait_and_take(&id, Duration::from_millis(10)).unwrap(),
            Completion::Closed
        );
    }

    #[test]
    fn test_responses_complete_pending_calls() {
        let transport = ScriptedTransport::new(vec![
            inbound(json!({"jsonrpc": "2.0", "id": 1, "result": "second"})),
            inbound(json!({"jsonrpc": "2.0", "id": 0, "error": {"code": -32800, "message": "cancelled"}})),
            inbound(json!({"jsonrpc": "2.0", "id": 42, "result": "nobody asked"})),
        ]);
        let registry = Arc::new(PendingCallRegistry::new());
        let first = registry.register_next().unwrap();
        let second = registry.register_next().unwrap();

        Dispatcher::new(transport.clone(), registry.clone(), CallbackTable::new()).run();

        assert_eq!(
            registry.wait_and_take(&second, Duration::from_millis(10)).unwrap(),
            Completion::Response(Ok(json!("second")))
        );
        assert_eq!(
            registry.wait_and_take(&first, Duration::from_millis(10)).unwrap(),
            Completion::Response(Err(ResponseError::new(-32800, "cancelled")))
        );
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_spawned_dispatcher_stops_after_current_read() {
        let (local, peer) = ChannelTransport::pair();
        let registry = Arc::new(PendingCallRegistry::new());
        let dispatcher = Dispatcher::new(Arc::new(local), registry, CallbackTable::new());
        let handle = DispatcherHandle::spawn(dispatcher, "test-dispatcher").unwrap();
        assert_eq!(handle.state(), DispatcherState::Running);

        handle.stop();
        assert_eq!(handle.state(), DispatcherState::Stopped);
        // Unblock the pending read
        peer.send(&Message::notification("wake", json!(null))).unwrap();

        assert_eq!(handle.join(), ExitReason::Stopped);
    }

    #[test]
    fn test_spawned_dispatcher_exits_when_peer_closes() {
        let (local, peer) = ChannelTransport::pair();
        let dispatcher = Dispatcher::new(
            Arc::new(local),
            Arc::new(PendingCallRegistry::new()),
            CallbackTable::new(),
        );
        let handle = DispatcherHandle::spawn(dispatcher, "test-dispatcher").unwrap();
        drop(peer);
        assert_eq!(handle.join(), ExitReason::TransportClosed);
    }

    #[test]
    fn test_spawned_dispatcher_inherits_subscriber() {
        let (subscriber, capture) = create_test_subscriber();
        let (local, peer) = ChannelTransport::pair();
        let handle = tracing::subscriber::with_default(subscriber, || {
            let dispatcher = Dispatcher::new(
                Arc::new(local),
                Arc::new(PendingCallRegistry::new()),
                CallbackTable::new(),
            );
            DispatcherHandle::spawn(dispatcher, "test-dispatcher").unwrap()
        });

        peer.send(&Message::notification("textDocument/publishDiagnostics", json!({})))
            .unwrap();
        drop(peer);
        handle.join();

        assert!(capture.contains("Notify method not found"));
    }
}
