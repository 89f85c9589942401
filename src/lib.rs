//! TCP Tracker Library
//!
//! A transparent TCP relay that forwards every client connection to a fixed
//! remote host and reports the traffic it carries to pluggable observers:
//! a per-second throughput summary, a detailed console trace and a
//! persistent event log.

pub mod config;
pub mod connection;
pub mod observer;
pub mod relay;
pub mod session;
pub mod shutdown;
pub mod stats;

pub use config::Config;
pub use connection::ConnectionManager;
pub use observer::{Dispatcher, Observer};
pub use relay::{RelayExchange, RelayHandle};
pub use session::{Direction, SessionId};
pub use shutdown::ShutdownCoordinator;
pub use stats::ConnectionCounters;

/// Common error type for the relay
pub type Result<T> = anyhow::Result<T>;
