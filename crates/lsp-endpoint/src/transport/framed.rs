use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use lsp_endpoint_protocol::Message;
use parking_lot::Mutex;
use tracing::trace;

use super::Transport;
use crate::config::EndpointConfig;
use crate::{EndpointError, Result};

pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 32 * 1024 * 1024;

/// Read one `Content-Length` framed body.
///
/// Returns `Ok(None)` on a clean EOF before any header. Header names are
/// matched case-insensitively and headers other than `Content-Length` are
/// ignored. A bad header block is consumed up to its blank line before the
/// error is returned; an oversized body is skipped, so the next call starts
/// at a frame boundary either way.
pub fn read_frame<R: BufRead>(reader: &mut R, max_bytes: usize) -> Result<Option<Vec<u8>>> {
    let mut content_length: Option<usize> = None;
    let mut malformed: Option<String> = None;
    let mut saw_header = false;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            if saw_header {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside a frame header",
                )
                .into());
            }
            return Ok(None);
        }

        let header = line.trim_end_matches(['\r', '\n']);
        if header.is_empty() {
            if saw_header {
                break;
            }
            continue;
        }
        saw_header = true;

        match header.split_once(':') {
            Some((name, value)) if name.trim().eq_ignore_ascii_case("content-length") => {
                match value.trim().parse::<usize>() {
                    Ok(len) => content_length = Some(len),
                    Err(_) => malformed = Some(format!("invalid Content-Length: {:?}", value.trim())),
                }
            }
            Some(_) => {}
            None => malformed = Some(format!("malformed header line: {:?}", header)),
        }
    }

    if let Some(reason) = malformed {
        return Err(EndpointError::Protocol(reason));
    }
    let len = content_length
        .ok_or_else(|| EndpointError::Protocol("missing Content-Length header".to_string()))?;

    if len > max_bytes {
        io::copy(&mut reader.by_ref().take(len as u64), &mut io::sink())?;
        return Err(EndpointError::Protocol(format!(
            "frame of {} bytes exceeds limit of {} bytes",
            len, max_bytes
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Ok(Some(body))
}

/// Write one body with its `Content-Length` header and flush.
pub fn write_frame<W: Write>(writer: &mut W, body: &[u8]) -> io::Result<()> {
    write!(writer, "Content-Length: {}\r\n\r\n", body.len())?;
    writer.write_all(body)?;
    writer.flush()
}

/// Transport speaking the LSP base protocol over a reader/writer pair
///
/// Typically wraps a child process' stdout/stdin or a socket. A plain
/// `Read` cannot be interrupted, so a read already blocked on the stream only
/// returns once the stream itself ends. Install a closer with
/// [`with_closer`](Self::with_closer) (shutting down the socket, killing the
/// child) to let `close` unblock it.
pub struct FramedTransport<R, W> {
    reader: Mutex<BufReader<R>>,
    writer: Mutex<W>,
    max_message_bytes: usize,
    closed: AtomicBool,
    closer: Option<Box<dyn Fn() + Send + Sync>>,
}

impl<R: Read, W: Write> FramedTransport<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(BufReader::new(reader)),
            writer: Mutex::new(writer),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            closed: AtomicBool::new(false),
            closer: None,
        }
    }

    /// Run `closer` on the first `close`, to end the underlying stream.
    ///
    /// ```rust,no_run
    /// # #[cfg(unix)] {
    /// use std::net::Shutdown;
    /// use std::os::unix::net::UnixStream;
    /// use lsp_endpoint::FramedTransport;
    ///
    /// let stream = UnixStream::connect("/tmp/lsp.sock").unwrap();
    /// let handle = stream.try_clone().unwrap();
    /// let transport = FramedTransport::new(stream.try_clone().unwrap(), stream)
    ///     .with_closer(move || {
    ///         let _ = handle.shutdown(Shutdown::Both);
    ///     });
    /// # }
    /// ```
    pub fn with_closer(mut self, closer: impl Fn() + Send + Sync + 'static) -> Self {
        self.closer = Some(Box::new(closer));
        self
    }

    /// Transport with the frame size limit taken from `config`
    pub fn from_config(reader: R, writer: W, config: &EndpointConfig) -> Self {
        Self::new(reader, writer).with_max_message_bytes(config.max_message_bytes())
    }

    pub fn with_max_message_bytes(mut self, max_bytes: usize) -> Self {
        self.max_message_bytes = max_bytes;
        self
    }

    pub fn max_message_bytes(&self) -> usize {
        self.max_message_bytes
    }
}

impl<R, W> std::fmt::Debug for FramedTransport<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedTransport")
            .field("max_message_bytes", &self.max_message_bytes)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .field("has_closer", &self.closer.is_some())
            .finish()
    }
}

impl<R, W> Transport for FramedTransport<R, W>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    fn receive(&self) -> Result<Option<Message>> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let body = {
            let mut reader = self.reader.lock();
            match read_frame(&mut *reader, self.max_message_bytes) {
                Ok(body) => body,
                // The stream was torn down by close()
                Err(_) if self.closed.load(Ordering::SeqCst) => return Ok(None),
                Err(e) => return Err(e),
            }
        };
        match body {
            Some(body) => {
                trace!(bytes = body.len(), "Received frame");
                Ok(Some(serde_json::from_slice(&body)?))
            }
            None => Ok(None),
        }
    }

    fn send(&self, message: &Message) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EndpointError::TransportClosed);
        }
        let body = serde_json::to_vec(message)?;
        let mut writer = self.writer.lock();
        write_frame(&mut *writer, &body)?;
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(closer) = &self.closer {
            trace!("Running transport closer");
            closer();
        }
    }
}
