//! ackd: a pre-forked TCP acknowledgement server.
//!
//! A fixed pool of worker threads shares one listening socket. Each worker
//! accepts a connection, reads one message, writes one reply and closes it.
//! SIGTERM/SIGINT close the listener and force-close in-flight connections.
//!
//! Features:
//! - Worker count sized as `min(backlog, CPUs)`
//! - Pluggable per-connection message processor
//! - Bounded-latency graceful shutdown
//! - Configuration via CLI arguments or TOML file

pub mod config;
pub mod protocols;
pub mod runtime;
