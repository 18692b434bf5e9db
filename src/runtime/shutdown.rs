//! Termination handling.
//!
//! The OS signal handler installed by `signal-hook` only queues the signal.
//! A dedicated `shutdown` thread drains that queue and drives the
//! [`ShutdownCoordinator`], so all socket work happens outside signal context.

use crate::runtime::listener::Listener;
use crate::runtime::WorkerRegistry;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Coordinator lifecycle. `Terminating` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Terminating,
}

/// What a shutdown actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Whether this shutdown closed the listener (false if it was already closed).
    pub listener_closed: bool,
    /// In-flight connections that were force-closed.
    pub connections_closed: usize,
}

/// Turns a termination request into the cleanup sequence.
pub struct ShutdownCoordinator {
    terminating: AtomicBool,
    listener: Arc<Listener>,
    registry: Arc<WorkerRegistry>,
}

impl ShutdownCoordinator {
    pub fn new(listener: Arc<Listener>, registry: Arc<WorkerRegistry>) -> Self {
        Self {
            terminating: AtomicBool::new(false),
            listener,
            registry,
        }
    }

    /// Current state.
    pub fn state(&self) -> ShutdownState {
        if self.terminating.load(Ordering::Acquire) {
            ShutdownState::Terminating
        } else {
            ShutdownState::Running
        }
    }

    /// Close the listener, then force-close every in-flight connection.
    ///
    /// Only the first call does anything; later calls return `None`.
    pub fn terminate(&self) -> Option<ShutdownReport> {
        if self
            .terminating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Shutdown already in progress");
            return None;
        }

        info!(workers = self.registry.capacity(), "Shutdown requested");

        // Listener first so nothing new is accepted while draining.
        let listener_closed = self.listener.close();

        let peers = self.registry.close_all();
        for peer in &peers {
            info!(peer = %peer, "Closed in-flight connection");
        }

        info!(
            listener_closed,
            connections_closed = peers.len(),
            "Shutdown cleanup complete"
        );

        Some(ShutdownReport {
            listener_closed,
            connections_closed: peers.len(),
        })
    }
}

/// Background thread that waits for SIGTERM/SIGINT.
pub struct SignalListener {
    handle: Handle,
    thread: JoinHandle<()>,
}

impl SignalListener {
    /// Subscribe to termination signals and forward the first one to `coordinator`.
    pub fn install(coordinator: Arc<ShutdownCoordinator>) -> io::Result<Self> {
        let mut signals = Signals::new([SIGTERM, SIGINT])?;
        let handle = signals.handle();

        let thread = thread::Builder::new()
            .name("shutdown".to_string())
            .spawn(move || {
                if let Some(signal) = signals.forever().next() {
                    info!(signal, "Termination signal received");
                    coordinator.terminate();
                }
            })?;

        Ok(Self { handle, thread })
    }

    /// Unsubscribe and wait for the thread to exit.
    pub fn stop(self) {
        self.handle.close();
        if self.thread.join().is_err() {
            warn!("Signal thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ConnectionHandle;
    use std::io::Read;
    use std::net::{SocketAddr, TcpListener, TcpStream};

    fn coordinator(workers: usize) -> (ShutdownCoordinator, Arc<Listener>, Arc<WorkerRegistry>) {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = Arc::new(Listener::open(addr, 1).unwrap());
        let registry = Arc::new(WorkerRegistry::new(workers));
        let coordinator = ShutdownCoordinator::new(Arc::clone(&listener), Arc::clone(&registry));
        (coordinator, listener, registry)
    }

    #[test]
    fn test_terminate_once() {
        let (coordinator, listener, _registry) = coordinator(1);
        assert_eq!(coordinator.state(), ShutdownState::Running);

        let report = coordinator.terminate().unwrap();
        assert!(report.listener_closed);
        assert_eq!(report.connections_closed, 0);
        assert_eq!(coordinator.state(), ShutdownState::Terminating);
        assert!(listener.is_closed());

        assert!(coordinator.terminate().is_none());
        assert_eq!(coordinator.state(), ShutdownState::Terminating);
    }

    #[test]
    fn test_terminate_closes_in_flight() {
        let (coordinator, _listener, registry) = coordinator(2);

        let side = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(side.local_addr().unwrap()).unwrap();
        let (stream, peer) = side.accept().unwrap();
        let conn = ConnectionHandle::new(stream, peer);
        assert!(registry.register(1, &conn).unwrap());

        let report = coordinator.terminate().unwrap();
        assert_eq!(report.connections_closed, 1);
        assert_eq!(registry.in_flight(), 0);

        let mut buf = [0u8; 4];
        assert_eq!(client.read(&mut buf).unwrap(), 0);

        // Second request touches nothing.
        assert!(coordinator.terminate().is_none());
    }

    #[test]
    fn test_concurrent_terminate_runs_once() {
        let (coordinator, _listener, _registry) = coordinator(1);
        let coordinator = Arc::new(coordinator);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                thread::spawn(move || coordinator.terminate().is_some())
            })
            .collect();

        let performed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&did| did)
            .count();
        assert_eq!(performed, 1);
    }
}
