//! Observer Module
//!
//! Consumers of relay lifecycle and data-transfer events. Observers see every
//! event but can never influence the relay itself.

pub mod console;
pub mod dispatcher;
pub mod file;
pub mod format;
pub mod summary;

pub use console::ConsoleObserver;
pub use dispatcher::Dispatcher;
pub use file::FileObserver;
pub use summary::{DirectionTotals, ReportSink, StdoutReportSink, SummaryObserver, WindowSummary};

use crate::session::{Direction, SessionId};
use crate::Result;

/// Capability set every logging or metrics consumer implements.
///
/// All calls happen synchronously on a relay pump, possibly from many sessions
/// at once, so implementations must be `Send + Sync`, do their own locking and
/// return quickly. A slow observer stalls every pump that dispatches to it.
pub trait Observer: Send + Sync {
    /// Short name used in diagnostics
    fn name(&self) -> &str;

    /// A session started relaying; `peer` describes the client endpoint
    fn on_connected(&self, session: SessionId, peer: &str) -> Result<()>;

    /// One direction of a session stopped. Fires at most once per direction.
    fn on_disconnected(&self, session: SessionId, direction: Direction) -> Result<()>;

    /// A chunk was read and is about to be forwarded. The payload borrows the
    /// pump's buffer and is only valid for the duration of the call.
    fn on_data(&self, session: SessionId, direction: Direction, payload: &[u8]) -> Result<()>;

    /// Process is exiting; delivered at most once
    fn on_shutting_down(&self) -> Result<()>;
}
