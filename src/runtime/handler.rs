//! Single-exchange connection handler.
//!
//! Protocol: read once, reply once, close.
//!
//! ```text
//! Request:  hello\n
//! Response: <processor output>\n
//! ```

use crate::runtime::connection::ConnectionHandle;
use crate::runtime::protocol::{ProcessError, Processor};
use bytes::{BufMut, BytesMut};
use std::io::{self, Read, Write};
use tracing::{debug, info};

/// Maximum bytes read from a client in its single read.
pub const MAX_MESSAGE_SIZE: usize = 1024;

/// Serve one request on `conn`, then close it.
///
/// Errors never escape: they are logged and the connection is closed like a
/// normal completion. Returns `true` if a reply was written.
pub fn handle_connection(mut conn: ConnectionHandle, processor: &dyn Processor) -> bool {
    let peer = conn.peer_addr();

    let acknowledged = match exchange(&mut conn, processor) {
        Ok(()) => true,
        Err(e) => {
            info!(peer = %peer, error = %e, "Connection error");
            false
        }
    };

    drop(conn);
    debug!(peer = %peer, "Connection closed");
    acknowledged
}

fn exchange(conn: &mut ConnectionHandle, processor: &dyn Processor) -> Result<(), ConnectionError> {
    let peer = conn.peer_addr();
    let mut buffer = BytesMut::zeroed(MAX_MESSAGE_SIZE);

    let n = loop {
        match conn.stream().read(&mut buffer) {
            Ok(n) => break n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ConnectionError::Io(e)),
        }
    };
    // A zero-byte read (peer half-closed) is an empty message, not an error.
    buffer.truncate(n);

    let message =
        std::str::from_utf8(trim_trailing_whitespace(&buffer)).map_err(ConnectionError::Decode)?;
    info!(peer = %peer, msg = message, "Message received");

    let reply = processor.process(message).map_err(ConnectionError::Process)?;

    let mut response = BytesMut::with_capacity(reply.len() + 1);
    response.put_slice(reply.as_bytes());
    response.put_u8(b'\n');
    conn.stream().write_all(&response)?;

    Ok(())
}

/// Strip trailing ASCII whitespace, vertical tab included.
fn trim_trailing_whitespace(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|&b| !(b.is_ascii_whitespace() || b == 0x0b))
        .map_or(0, |i| i + 1);
    &bytes[..end]
}

/// Failure while serving one connection. Never propagated past the handler.
#[derive(Debug)]
pub enum ConnectionError {
    /// Read or write failed (reset, broken pipe, timeout, ...).
    Io(io::Error),
    /// Request was not valid UTF-8.
    Decode(std::str::Utf8Error),
    /// Processor refused the message.
    Process(ProcessError),
}

impl From<io::Error> for ConnectionError {
    fn from(e: io::Error) -> Self {
        ConnectionError::Io(e)
    }
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::Io(e) => write!(f, "I/O error: {e}"),
            ConnectionError::Decode(e) => write!(f, "invalid UTF-8: {e}"),
            ConnectionError::Process(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ConnectionError {}
