//! Message transports
//!
//! The dispatcher reads through [`Transport::receive`] from exactly one
//! thread; any number of threads may call [`Transport::send`] concurrently, so
//! implementations serialize writes internally.
//!
//! - `ChannelTransport`: in-process pair of connected ends
//! - `FramedTransport`: LSP `Content-Length` framing over a `Read`/`Write` pair

mod channel;
mod framed;

pub use channel::ChannelTransport;
pub use framed::{read_frame, write_frame, FramedTransport, DEFAULT_MAX_MESSAGE_BYTES};

use lsp_endpoint_protocol::Message;

use crate::Result;

/// Bidirectional, message-oriented channel to the peer
pub trait Transport: Send + Sync + 'static {
    /// Block until the next inbound message.
    ///
    /// `Ok(None)` means the transport is closed and nothing more will arrive.
    /// An error affects only the message being read unless
    /// [`EndpointError::is_fatal_for_reader`](crate::EndpointError::is_fatal_for_reader)
    /// says otherwise.
    fn receive(&self) -> Result<Option<Message>>;

    /// Send one message. May block on I/O.
    fn send(&self, message: &Message) -> Result<()>;

    /// Close the transport, unblocking a pending `receive` where the
    /// underlying stream allows it.
    fn close(&self) {}
}

impl<T: Transport> Transport for std::sync::Arc<T> {
    fn receive(&self) -> Result<Option<Message>> {
        (**self).receive()
    }

    fn send(&self, message: &Message) -> Result<()> {
        (**self).send(message)
    }

    fn close(&self) {
        (**self).close()
    }
}
