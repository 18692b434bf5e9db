//! Shared listening socket.
//!
//! One `Listener` is opened per server and shared by every worker. The socket
//! itself is non-blocking; each worker parks on it through its own
//! [`Acceptor`], which owns a mio `Poll` with the listener and a `Waker`
//! registered. Closing the listener drops the socket and wakes every parked
//! acceptor so that `accept` returns [`AcceptError::Cancelled`] promptly.

use crate::runtime::connection::ConnectionHandle;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::unix::io::AsRawFd;
use std::sync::{Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

const LISTENER_TOKEN: Token = Token(0);
const WAKER_TOKEN: Token = Token(1);

/// The bound, listening server socket.
pub struct Listener {
    /// `None` once closed. Accepts hold the read lock, close takes the write lock.
    socket: RwLock<Option<TcpListener>>,
    local_addr: SocketAddr,
    backlog: i32,
    wakers: Mutex<Vec<Waker>>,
    /// Number of upcoming acceptor/accept calls that fail transiently.
    #[cfg(test)]
    injected_failures: std::sync::atomic::AtomicUsize,
}

impl Listener {
    /// Bind to `addr` and start listening with the given backlog depth.
    pub fn open(addr: SocketAddr, backlog: i32) -> Result<Self, BindError> {
        let socket = create_listener(addr, backlog).map_err(|source| BindError { addr, source })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| BindError { addr, source })?;

        info!(addr = %local_addr, backlog, "Listener opened");

        Ok(Self {
            socket: RwLock::new(Some(socket)),
            local_addr,
            backlog,
            wakers: Mutex::new(Vec::new()),
            #[cfg(test)]
            injected_failures: std::sync::atomic::AtomicUsize::new(0),
        })
    }

    /// Address the listener is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Configured backlog depth.
    pub fn backlog(&self) -> i32 {
        self.backlog
    }

    /// Whether the listener has been closed.
    pub fn is_closed(&self) -> bool {
        self.socket
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Create a per-worker acceptor parked on this listener.
    ///
    /// Returns [`AcceptError::Cancelled`] if the listener is already closed.
    pub fn acceptor(&self) -> Result<Acceptor<'_>, AcceptError> {
        #[cfg(test)]
        self.injected_failure()?;

        // Holding the wakers lock across registration means a concurrent
        // `close` either sees this waker or we see the closed socket.
        let mut wakers = self.wakers.lock().unwrap_or_else(PoisonError::into_inner);
        let socket = self.socket.read().unwrap_or_else(PoisonError::into_inner);
        let Some(listener) = socket.as_ref() else {
            return Err(AcceptError::Cancelled);
        };

        let poll = Poll::new().map_err(AcceptError::Transient)?;
        let fd = listener.as_raw_fd();
        poll.registry()
            .register(&mut SourceFd(&fd), LISTENER_TOKEN, Interest::READABLE)
            .map_err(AcceptError::Transient)?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN).map_err(AcceptError::Transient)?;
        wakers.push(waker);

        Ok(Acceptor {
            listener: self,
            poll,
            events: Events::with_capacity(4),
        })
    }

    /// Close the listener. Idempotent: returns `true` only for the call that
    /// actually released the socket.
    pub fn close(&self) -> bool {
        let socket = self
            .socket
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(socket) = socket else {
            return false;
        };
        drop(socket);
        info!(addr = %self.local_addr, "Listener closed");

        for waker in self
            .wakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            if let Err(e) = waker.wake() {
                warn!(error = %e, "Failed to wake acceptor");
            }
        }
        true
    }

    /// Attempt one non-blocking accept.
    ///
    /// `Ok(None)` means no connection is pending.
    fn try_accept(&self) -> Result<Option<ConnectionHandle>, AcceptError> {
        let socket = self.socket.read().unwrap_or_else(PoisonError::into_inner);
        let Some(listener) = socket.as_ref() else {
            return Err(AcceptError::Cancelled);
        };

        #[cfg(test)]
        self.injected_failure()?;

        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    // Accepted sockets inherit O_NONBLOCK on some platforms.
                    stream
                        .set_nonblocking(false)
                        .map_err(AcceptError::Transient)?;
                    return Ok(Some(ConnectionHandle::new(stream, peer)));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(AcceptError::Transient(e)),
            }
        }
    }

    /// Make the next `count` acceptor/accept attempts fail transiently.
    #[cfg(test)]
    pub(crate) fn inject_failures(&self, count: usize) {
        self.injected_failures
            .store(count, std::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn pending_failures(&self) -> usize {
        self.injected_failures
            .load(std::sync::atomic::Ordering::SeqCst)
    }

    #[cfg(test)]
    fn injected_failure(&self) -> Result<(), AcceptError> {
        use std::sync::atomic::Ordering;

        match self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(_) => Err(AcceptError::Transient(io::Error::new(
                io::ErrorKind::Other,
                "injected accept failure",
            ))),
            Err(_) => Ok(()),
        }
    }
}

/// A worker's blocking view of the shared [`Listener`].
pub struct Acceptor<'a> {
    listener: &'a Listener,
    poll: Poll,
    events: Events,
}

impl Acceptor<'_> {
    /// Block until a peer connects or the listener is closed.
    pub fn accept(&mut self) -> Result<ConnectionHandle, AcceptError> {
        loop {
            // Readiness is edge-triggered, so always drain before parking.
            if let Some(conn) = self.listener.try_accept()? {
                return Ok(conn);
            }

            match self.poll.poll(&mut self.events, None) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(AcceptError::Transient(e)),
            }

            if self.events.iter().any(|event| event.token() == WAKER_TOKEN) {
                debug!("Acceptor woken");
            }
        }
    }
}

/// Startup failure: the address could not be bound or listened on.
#[derive(Debug)]
pub struct BindError {
    pub addr: SocketAddr,
    pub source: io::Error,
}

impl std::fmt::Display for BindError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to bind {}: {}", self.addr, self.source)
    }
}

impl std::error::Error for BindError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Outcome of an accept that did not produce a connection.
#[derive(Debug)]
pub enum AcceptError {
    /// The listener was closed for shutdown. Normal worker exit.
    Cancelled,
    /// Any other accept failure (e.g. descriptor exhaustion). Retryable.
    Transient(io::Error),
}

impl std::fmt::Display for AcceptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AcceptError::Cancelled => write!(f, "listener closed"),
            AcceptError::Transient(e) => write!(f, "accept failed: {e}"),
        }
    }
}

impl std::error::Error for AcceptError {}

/// Create a non-blocking listening socket.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog.max(1))?;

    Ok(socket.into())
}
