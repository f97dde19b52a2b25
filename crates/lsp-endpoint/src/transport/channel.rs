use std::time::Duration;

use lsp_endpoint_protocol::Message;
use parking_lot::Mutex;

use super::Transport;
use crate::{EndpointError, Result};

/// One end of an in-process, connected pair of transports
///
/// Messages sent on one end are received, in order, on the other. Closing or
/// dropping an end makes the other end's `receive` report closure once it has
/// drained what was already sent.
pub struct ChannelTransport {
    outbound: Mutex<Option<flume::Sender<Message>>>,
    inbound: flume::Receiver<Message>,
    close_tx: Mutex<Option<flume::Sender<()>>>,
    close_rx: flume::Receiver<()>,
}

impl std::fmt::Debug for ChannelTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelTransport")
            .field("closed", &self.is_closed())
            .field("pending", &self.pending())
            .finish()
    }
}

impl ChannelTransport {
    /// Create two connected ends
    pub fn pair() -> (Self, Self) {
        let (to_right, right_inbound) = flume::unbounded();
        let (to_left, left_inbound) = flume::unbounded();
        (
            Self::new(to_right, left_inbound),
            Self::new(to_left, right_inbound),
        )
    }

    fn new(outbound: flume::Sender<Message>, inbound: flume::Receiver<Message>) -> Self {
        let (close_tx, close_rx) = flume::bounded(1);
        Self {
            outbound: Mutex::new(Some(outbound)),
            inbound,
            close_tx: Mutex::new(Some(close_tx)),
            close_rx,
        }
    }

    /// Wait up to `timeout` for the next message, without the close signal.
    ///
    /// Returns `None` on timeout or once the other end is gone.
    pub fn receive_timeout(&self, timeout: Duration) -> Option<Message> {
        self.inbound.recv_timeout(timeout).ok()
    }

    /// Messages queued on this end and not yet received
    pub fn pending(&self) -> usize {
        self.inbound.len()
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.lock().is_none()
    }
}

impl Transport for ChannelTransport {
    fn receive(&self) -> Result<Option<Message>> {
        let received = flume::Selector::new()
            .recv(&self.inbound, |msg| msg.ok())
            .recv(&self.close_rx, |_| None)
            .wait();
        Ok(received)
    }

    fn send(&self, message: &Message) -> Result<()> {
        let outbound = self.outbound.lock();
        let tx = outbound.as_ref().ok_or(EndpointError::TransportClosed)?;
        tx.send(message.clone())
            .map_err(|_| EndpointError::TransportClosed)
    }

    fn close(&self) {
        self.outbound.lock().take();
        self.close_tx.lock().take();
    }
}
