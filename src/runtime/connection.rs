//! Accepted connections and the per-worker in-flight registry.
//!
//! A `ConnectionHandle` is owned by the worker that accepted it and is closed
//! when dropped. The `WorkerRegistry` keeps a duplicate descriptor for each
//! worker's in-flight connection so that shutdown can force it closed without
//! touching the worker's own descriptor.

use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// One accepted client socket plus its peer address.
#[derive(Debug)]
pub struct ConnectionHandle {
    stream: TcpStream,
    peer: SocketAddr,
}

impl ConnectionHandle {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self { stream, peer }
    }

    /// Remote address of the client.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// The underlying stream.
    pub fn stream(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Bound how long a read may block.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }
}

/// What the registry holds for a busy worker.
#[derive(Debug)]
struct InFlight {
    /// Duplicate of the worker's descriptor, owned by the registry.
    stream: TcpStream,
    peer: SocketAddr,
}

#[derive(Debug)]
struct Slots {
    entries: Vec<Option<InFlight>>,
    /// Set by `close_all`; no further registrations are accepted.
    sealed: bool,
}

/// Mapping from worker id to the connection that worker is serving.
///
/// Each worker writes only its own slot. Shutdown sweeps all slots under the
/// same lock, so an entry is closed either by its worker's `release` or by
/// `close_all`, never both.
#[derive(Debug)]
pub struct WorkerRegistry {
    slots: Mutex<Slots>,
}

impl WorkerRegistry {
    /// Create a registry with one idle slot per worker.
    pub fn new(workers: usize) -> Self {
        let mut entries = Vec::with_capacity(workers);
        entries.resize_with(workers, || None);
        Self {
            slots: Mutex::new(Slots {
                entries,
                sealed: false,
            }),
        }
    }

    /// Record `conn` as in flight for `worker_id`.
    ///
    /// Returns `Ok(false)` if shutdown has already swept the registry (or the
    /// id is out of range); the caller must then drop the connection itself.
    pub fn register(&self, worker_id: usize, conn: &ConnectionHandle) -> io::Result<bool> {
        let mut slots = self.lock();
        if slots.sealed {
            return Ok(false);
        }
        let Some(slot) = slots.entries.get_mut(worker_id) else {
            return Ok(false);
        };

        *slot = Some(InFlight {
            stream: conn.stream.try_clone()?,
            peer: conn.peer,
        });
        Ok(true)
    }

    /// Clear `worker_id`'s slot after its connection finished.
    ///
    /// Returns `false` if the slot was already empty (e.g. swept by shutdown).
    pub fn release(&self, worker_id: usize) -> bool {
        self.lock()
            .entries
            .get_mut(worker_id)
            .and_then(Option::take)
            .is_some()
    }

    /// Whether `worker_id` currently holds a connection.
    #[cfg(test)]
    pub fn is_busy(&self, worker_id: usize) -> bool {
        matches!(self.lock().entries.get(worker_id), Some(Some(_)))
    }

    /// Number of connections currently in flight.
    pub fn in_flight(&self) -> usize {
        self.lock().entries.iter().filter(|e| e.is_some()).count()
    }

    /// Number of worker slots.
    pub fn capacity(&self) -> usize {
        self.lock().entries.len()
    }

    /// Seal the registry and force-close every in-flight connection.
    ///
    /// Shutting down the socket unblocks the owning worker's read or write.
    /// Returns the peers whose connections were closed.
    pub fn close_all(&self) -> Vec<SocketAddr> {
        let mut slots = self.lock();
        slots.sealed = true;

        slots
            .entries
            .iter_mut()
            .filter_map(Option::take)
            .map(|in_flight| {
                // The peer may already be gone; the descriptor is dropped either way.
                if let Err(e) = in_flight.stream.shutdown(Shutdown::Both) {
                    debug!(
                        peer = %in_flight.peer,
                        error = %e,
                        "Shutdown of in-flight connection failed"
                    );
                }
                in_flight.peer
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slots> {
        // Slot contents stay consistent even if a holder panicked.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
