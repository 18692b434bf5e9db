//! Worker accept/handle loop.
//!
//! Each worker parks on the shared listener, serves one connection at a time,
//! and tracks that connection in its registry slot so shutdown can reach it.

use crate::runtime::handler::handle_connection;
use crate::runtime::listener::{AcceptError, Listener};
use crate::runtime::{Processor, WorkerRegistry};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pause after a failed accept before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Everything a worker thread needs.
pub(crate) struct Worker<'a> {
    pub id: usize,
    pub listener: &'a Listener,
    pub registry: &'a WorkerRegistry,
    pub processor: &'a dyn Processor,
    pub read_timeout: Option<Duration>,
}

impl Worker<'_> {
    /// Run until the listener is closed.
    ///
    /// Returns the number of connections this worker accepted.
    pub fn run(&self) -> usize {
        let worker = self.id;

        let mut acceptor = loop {
            match self.listener.acceptor() {
                Ok(acceptor) => break acceptor,
                Err(AcceptError::Cancelled) => {
                    info!(worker, served = 0, "Worker stopped");
                    return 0;
                }
                Err(AcceptError::Transient(e)) => {
                    warn!(worker, error = %e, "Failed to park on listener");
                    thread::sleep(ACCEPT_RETRY_DELAY);
                }
            }
        };

        info!(worker, "Worker started");
        let mut served = 0;

        loop {
            debug!(worker, "Waiting for connection");
            let conn = match acceptor.accept() {
                Ok(conn) => conn,
                Err(AcceptError::Cancelled) => break,
                Err(AcceptError::Transient(e)) => {
                    warn!(worker, error = %e, "Accept failed");
                    thread::sleep(ACCEPT_RETRY_DELAY);
                    continue;
                }
            };

            let peer = conn.peer_addr();
            info!(worker, peer = %peer, "Connection accepted");
            served += 1;

            if let Some(timeout) = self.read_timeout {
                if let Err(e) = conn.set_read_timeout(Some(timeout)) {
                    warn!(worker, peer = %peer, error = %e, "Failed to set read timeout");
                }
            }

            match self.registry.register(worker, &conn) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(worker, peer = %peer, "Shutdown in progress, dropping connection");
                    break;
                }
                Err(e) => {
                    warn!(worker, peer = %peer, error = %e, "Failed to track connection, dropping it");
                    continue;
                }
            }

            handle_connection(conn, self.processor);
            self.registry.release(worker);
        }

        info!(worker, served, "Worker stopped");
        served
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::ack::Acknowledge;
    use std::io::{Read, Write};
    use std::net::TcpStream;

    fn worker<'a>(
        listener: &'a Listener,
        registry: &'a WorkerRegistry,
        processor: &'a dyn Processor,
    ) -> Worker<'a> {
        Worker {
            id: 0,
            listener,
            registry,
            processor,
            read_timeout: None,
        }
    }

    #[test]
    fn test_transient_failures_do_not_kill_worker() {
        let listener = Listener::open("127.0.0.1:0".parse().unwrap(), 1).unwrap();
        let registry = WorkerRegistry::new(1);
        // First two hit acceptor creation, the third hits accept itself.
        listener.inject_failures(3);

        thread::scope(|s| {
            let handle = s.spawn(|| worker(&listener, &registry, &Acknowledge).run());

            let mut client = TcpStream::connect(listener.local_addr()).unwrap();
            client
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            client.write_all(b"retry").unwrap();

            let mut reply = String::new();
            client.read_to_string(&mut reply).unwrap();
            assert_eq!(reply, "Your Message has been received: retry\n");
            assert_eq!(listener.pending_failures(), 0);

            listener.close();
            assert_eq!(handle.join().unwrap(), 1);
        });
        assert_eq!(registry.in_flight(), 0);
    }

    #[test]
    fn test_closed_listener_stops_worker() {
        let listener = Listener::open("127.0.0.1:0".parse().unwrap(), 1).unwrap();
        let registry = WorkerRegistry::new(1);
        listener.close();

        assert_eq!(worker(&listener, &registry, &Acknowledge).run(), 0);
    }
}
