//! Acknowledgement processor.

use crate::runtime::{ProcessError, Processor};

const ACK_PREFIX: &str = "Your Message has been received: ";

/// Replies with the acknowledgement template.
#[derive(Debug, Clone, Copy, Default)]
pub struct Acknowledge;

impl Processor for Acknowledge {
    fn process(&self, message: &str) -> Result<String, ProcessError> {
        let mut reply = String::with_capacity(ACK_PREFIX.len() + message.len());
        reply.push_str(ACK_PREFIX);
        reply.push_str(message);
        Ok(reply)
    }
}
