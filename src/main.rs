use ackd::config::Config;
use ackd::protocols::ack::Acknowledge;
use ackd::runtime::WorkerPool;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let pool_config = config.pool_config()?;

    info!(
        host = %config.host,
        port = config.port,
        backlog = config.listen_backlog,
        read_timeout = ?config.read_timeout,
        "Starting ackd server"
    );

    let pool = WorkerPool::start(&pool_config, Arc::new(Acknowledge))?;
    info!(
        addr = %pool.local_addr(),
        workers = pool.worker_count(),
        "Accepting connections"
    );

    // Returns once a termination signal has shut every worker down.
    let served = pool.join();
    info!(served, "Shutdown complete");

    Ok(())
}
