//! Shared helpers for pool integration tests.

#![allow(dead_code)]

use ackd::protocols::ack::Acknowledge;
use ackd::runtime::{PoolConfig, WorkerPool};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Start an acknowledgement pool on an ephemeral loopback port.
pub fn start_pool(backlog: i32) -> WorkerPool {
    let config = PoolConfig {
        addr: "127.0.0.1:0".parse().unwrap(),
        listen_backlog: backlog,
        read_timeout: None,
    };
    WorkerPool::start(&config, Arc::new(Acknowledge)).unwrap()
}

/// Send one message and read the reply until the server closes.
pub fn roundtrip(pool: &WorkerPool, message: &str) -> String {
    let mut client = TcpStream::connect(pool.local_addr()).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    client.write_all(message.as_bytes()).unwrap();

    let mut reply = String::new();
    client.read_to_string(&mut reply).unwrap();
    reply
}

/// Poll `condition` until it holds or `timeout` expires.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Join the pool on a helper thread, failing if it takes longer than `timeout`.
pub fn join_within(pool: WorkerPool, timeout: Duration) -> usize {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(pool.join());
    });
    rx.recv_timeout(timeout)
        .expect("worker pool did not shut down in time")
}
