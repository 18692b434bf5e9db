//! Message processing seam between the runtime and application logic.
//!
//! The runtime hands each decoded request to a [`Processor`] and writes back
//! whatever it returns. Processors never see the socket.

/// Application logic invoked once per connection.
pub trait Processor: Send + Sync {
    /// Turn a trimmed request payload into the reply payload.
    ///
    /// The runtime appends the trailing newline.
    fn process(&self, message: &str) -> Result<String, ProcessError>;
}

impl<F> Processor for F
where
    F: Fn(&str) -> Result<String, ProcessError> + Send + Sync,
{
    fn process(&self, message: &str) -> Result<String, ProcessError> {
        self(message)
    }
}

/// Explicit refusal from a processor. The connection is closed without a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessError(pub String);

impl std::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "processing failed: {}", self.0)
    }
}

impl std::error::Error for ProcessError {}
