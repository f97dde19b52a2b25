//! Tracing utilities for endpoint observability
//!
//! Spans tie log lines to the call or inbound message they belong to, and the
//! capture layer lets tests assert on what was logged.
//!
//! ```rust,ignore
//! use lsp_endpoint::tracing_utils::create_test_subscriber;
//!
//! let (subscriber, logs) = create_test_subscriber();
//! tracing::subscriber::with_default(subscriber, || {
//!     // ... start an endpoint, exchange messages ...
//! });
//! assert!(logs.contains("Notify method not found"));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use lsp_endpoint_protocol::RequestId;
use parking_lot::Mutex;
use tracing::{debug_span, Span};

/// Span covering one outbound call, from registration to wake-up
pub fn call_span(id: &RequestId, method: &str) -> Span {
    debug_span!("rpc_call", %id, method = %method)
}

/// Span covering the routing of one inbound request or notification
pub fn dispatch_span(kind: &'static str, method: &str, id: Option<&RequestId>) -> Span {
    match id {
        Some(id) => debug_span!("rpc_dispatch", kind, method = %method, %id),
        None => debug_span!("rpc_dispatch", kind, method = %method),
    }
}

// ============================================================================
// Test Utilities
// ============================================================================

/// Thread-safe storage for log events captured during tests
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    logs: Arc<Mutex<Vec<CapturedLog>>>,
}

/// A single captured log event
#[derive(Debug, Clone)]
pub struct CapturedLog {
    pub level: String,
    pub message: String,
    pub target: String,
    pub fields: HashMap<String, String>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, log: CapturedLog) {
        self.logs.lock().push(log);
    }

    pub fn logs(&self) -> Vec<CapturedLog> {
        self.logs.lock().clone()
    }

    /// Whether any captured message contains `substring`
    pub fn contains(&self, substring: &str) -> bool {
        self.logs.lock().iter().any(|log| log.message.contains(substring))
    }

    /// Like [`contains`](Self::contains), restricted to one level (`"WARN"`, `"DEBUG"`, ...)
    pub fn contains_at_level(&self, level: &str, substring: &str) -> bool {
        self.logs
            .lock()
            .iter()
            .any(|log| log.level == level && log.message.contains(substring))
    }

    pub fn with_field(&self, field: &str, value: &str) -> Vec<CapturedLog> {
        self.logs
            .lock()
            .iter()
            .filter(|log| log.fields.get(field).map(|v| v == value).unwrap_or(false))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.logs.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.logs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod test_subscriber {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::{EnvFilter, Layer};

    /// Layer that records every event into a [`LogCapture`]
    pub struct LogCaptureLayer {
        capture: LogCapture,
    }

    impl LogCaptureLayer {
        pub fn new(capture: LogCapture) -> Self {
            Self { capture }
        }
    }

    impl<S> Layer<S> for LogCaptureLayer
    where
        S: tracing::Subscriber,
    {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
            let mut visitor = FieldVisitor::default();
            event.record(&mut visitor);

            self.capture.push(CapturedLog {
                level: event.metadata().level().to_string(),
                message: visitor.message,
                target: event.metadata().target().to_string(),
                fields: visitor.fields,
            });
        }
    }

    #[derive(Default)]
    struct FieldVisitor {
        message: String,
        fields: HashMap<String, String>,
    }

    impl tracing::field::Visit for FieldVisitor {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            let value = format!("{:?}", value);
            if field.name() == "message" {
                self.message = value;
            } else {
                self.fields.insert(field.name().to_string(), value);
            }
        }

        fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
            if field.name() == "message" {
                self.message = value.to_string();
            } else {
                self.fields.insert(field.name().to_string(), value.to_string());
            }
        }
    }

    /// Build a capturing subscriber for use with `with_default`
    pub fn create_test_subscriber() -> (impl tracing::Subscriber + Send + Sync, LogCapture) {
        let capture = LogCapture::new();
        let subscriber = tracing_subscriber::registry()
            .with(LogCaptureLayer::new(capture.clone()))
            .with(EnvFilter::new("trace"));
        (subscriber, capture)
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use test_subscriber::create_test_subscriber;
