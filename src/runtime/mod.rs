//! Pre-forked worker pool runtime.
//!
//! One listening socket is shared by a fixed set of worker threads:
//! - `Listener`: bound socket with blocking, cancellable accept
//! - `Worker`: accept → register → handle → release, forever
//! - `WorkerRegistry`: per-worker in-flight connection, for forced cleanup
//! - `ShutdownCoordinator`: closes the listener, then the in-flight connections
//!
//! Workers block only in accept and in the single read/write of a connection.

mod connection;
mod handler;
mod listener;
pub mod protocol;
mod shutdown;
mod worker;

pub use connection::{ConnectionHandle, WorkerRegistry};
pub use handler::{handle_connection, ConnectionError, MAX_MESSAGE_SIZE};
pub use listener::{AcceptError, Acceptor, BindError, Listener};
pub use protocol::{ProcessError, Processor};
pub use shutdown::{ShutdownCoordinator, ShutdownReport, ShutdownState, SignalListener};

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info};
use worker::Worker;

/// Core pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Address to bind.
    pub addr: SocketAddr,
    /// Listen backlog depth; also caps the worker count.
    pub listen_backlog: i32,
    /// Per-connection read timeout. `None` waits forever.
    pub read_timeout: Option<Duration>,
}

impl PoolConfig {
    /// Worker count for this machine.
    pub fn worker_count(&self) -> usize {
        worker_count(self.listen_backlog, available_parallelism())
    }
}

/// `min(backlog, parallelism)`, never less than one.
pub fn worker_count(backlog: i32, parallelism: usize) -> usize {
    let backlog = usize::try_from(backlog).unwrap_or(0);
    backlog.min(parallelism).max(1)
}

/// Number of CPUs available to this process.
pub fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Startup failure.
#[derive(Debug)]
pub enum StartError {
    /// The listener could not be bound. No workers were started.
    Bind(BindError),
    /// A worker or the signal thread could not be created.
    Spawn(io::Error),
}

impl From<BindError> for StartError {
    fn from(e: BindError) -> Self {
        StartError::Bind(e)
    }
}

impl std::fmt::Display for StartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartError::Bind(e) => write!(f, "{e}"),
            StartError::Spawn(e) => write!(f, "Failed to start worker pool: {e}"),
        }
    }
}

impl std::error::Error for StartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StartError::Bind(e) => Some(e),
            StartError::Spawn(e) => Some(e),
        }
    }
}

/// A running set of workers sharing one listener.
pub struct WorkerPool {
    listener: Arc<Listener>,
    registry: Arc<WorkerRegistry>,
    coordinator: Arc<ShutdownCoordinator>,
    workers: Vec<JoinHandle<usize>>,
    signals: Option<SignalListener>,
}

impl WorkerPool {
    /// Bind the listener, start the workers and install the termination handler.
    ///
    /// Returns once everything is running; workers serve independently.
    pub fn start(config: &PoolConfig, processor: Arc<dyn Processor>) -> Result<Self, StartError> {
        let listener = Arc::new(Listener::open(config.addr, config.listen_backlog)?);
        let num_workers = config.worker_count();
        let registry = Arc::new(WorkerRegistry::new(num_workers));
        let coordinator = Arc::new(ShutdownCoordinator::new(
            Arc::clone(&listener),
            Arc::clone(&registry),
        ));

        info!(
            workers = num_workers,
            addr = %listener.local_addr(),
            backlog = listener.backlog(),
            "Starting worker pool"
        );

        let mut pool = WorkerPool {
            listener,
            registry,
            coordinator,
            workers: Vec::with_capacity(num_workers),
            signals: None,
        };

        for worker_id in 0..num_workers {
            match pool.spawn_worker(worker_id, Arc::clone(&processor), config.read_timeout) {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => return Err(pool.abort(e)),
            }
        }

        match SignalListener::install(Arc::clone(&pool.coordinator)) {
            Ok(signals) => pool.signals = Some(signals),
            Err(e) => return Err(pool.abort(e)),
        }

        Ok(pool)
    }

    fn spawn_worker(
        &self,
        worker_id: usize,
        processor: Arc<dyn Processor>,
        read_timeout: Option<Duration>,
    ) -> io::Result<JoinHandle<usize>> {
        let listener = Arc::clone(&self.listener);
        let registry = Arc::clone(&self.registry);

        thread::Builder::new()
            .name(format!("worker-{worker_id}"))
            .spawn(move || {
                Worker {
                    id: worker_id,
                    listener: &listener,
                    registry: &registry,
                    processor: processor.as_ref(),
                    read_timeout,
                }
                .run()
            })
    }

    /// Tear down a partially started pool.
    fn abort(self, e: io::Error) -> StartError {
        error!(error = %e, "Failed to start worker pool");
        self.coordinator.terminate();
        self.join();
        StartError::Spawn(e)
    }

    /// Address the pool is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Number of workers started.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// The coordinator that shuts this pool down.
    pub fn coordinator(&self) -> Arc<ShutdownCoordinator> {
        Arc::clone(&self.coordinator)
    }

    /// The in-flight connection registry.
    pub fn registry(&self) -> Arc<WorkerRegistry> {
        Arc::clone(&self.registry)
    }

    /// Wait for every worker to exit, then stop listening for signals.
    ///
    /// Workers exit only after the coordinator has terminated. Returns the
    /// total number of connections accepted.
    pub fn join(self) -> usize {
        let mut served = 0;
        for handle in self.workers {
            match handle.join() {
                Ok(count) => served += count,
                Err(_) => error!("Worker panicked"),
            }
        }

        if let Some(signals) = self.signals {
            signals.stop();
        }

        served
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_count_min_of_backlog_and_cpus() {
        assert_eq!(worker_count(4, 8), 4);
        assert_eq!(worker_count(8, 4), 4);
        assert_eq!(worker_count(4, 4), 4);
        assert_eq!(worker_count(1, 64), 1);
    }

    #[test]
    fn test_worker_count_at_least_one() {
        assert_eq!(worker_count(0, 8), 1);
        assert_eq!(worker_count(-3, 8), 1);
        assert_eq!(worker_count(5, 0), 1);
    }

    #[test]
    fn test_worker_count_never_exceeds_backlog() {
        for backlog in 1..=32 {
            for cpus in 1..=32 {
                let n = worker_count(backlog, cpus);
                assert!(n >= 1);
                assert!(n <= backlog as usize);
                assert_eq!(n, (backlog as usize).min(cpus));
            }
        }
    }

    #[test]
    fn test_pool_config_uses_machine_parallelism() {
        let config = PoolConfig {
            addr: "127.0.0.1:0".parse().unwrap(),
            listen_backlog: 1024,
            read_timeout: None,
        };
        assert_eq!(config.worker_count(), available_parallelism());
    }
}
