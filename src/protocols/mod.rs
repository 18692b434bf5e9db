//! Message processors.
//!
//! - `ack`: acknowledges each message by quoting it back

pub mod ack;
