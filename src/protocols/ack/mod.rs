//! Acknowledgement protocol implementation.
//!
//! The default message processor. Every request is answered with a fixed
//! acknowledgement that quotes the request back:
//!
//! ```text
//! Request:  hello
//! Response: Your Message has been received: hello\n
//! ```
//!
//! The trailing newline is added by the connection handler, not here.

pub mod processor;

pub use processor::Acknowledge;
