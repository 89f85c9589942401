//! Data Relay Module
//!
//! Handles bidirectional byte relay between a client and the remote host.

pub mod exchange;
mod link;
pub mod pump;

pub use exchange::{RelayExchange, RelayHandle, DEFAULT_BUFFER_SIZE};
pub use pump::{CloseReason, PumpReport};
