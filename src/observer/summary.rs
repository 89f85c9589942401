//! Windowed Summary Aggregator
//!
//! Buffers data-transfer events and, once per window, swaps the buffer out and
//! reports distinct active sessions and byte totals per direction.

use std::collections::HashSet;
use std::fmt;
use std::io::{self, Write};
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use anyhow::{anyhow, bail};
use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::Observer;
use crate::session::{Direction, SessionId};
use crate::stats::{ConnectionCounters, CounterSnapshot};
use crate::Result;

/// Default reporting window
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// Activity for one slice of traffic within a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DirectionTotals {
    /// Distinct sessions that transferred at least one chunk
    pub active_sessions: usize,
    pub bytes: u64,
}

/// One report per window
#[derive(Debug, Clone, Serialize)]
pub struct WindowSummary {
    pub window_end: DateTime<Local>,
    /// Live client count: +1 on connect, -1 when the client->remote direction closes
    pub connected_clients: i64,
    pub open_sockets: CounterSnapshot,
    /// Both directions; a session active in both counts once
    pub total: DirectionTotals,
    pub client_to_remote: DirectionTotals,
    pub remote_to_client: DirectionTotals,
}

impl WindowSummary {
    fn aggregate(
        records: &[TransferRecord],
        connected_clients: i64,
        open_sockets: CounterSnapshot,
    ) -> Self {
        Self {
            window_end: Local::now(),
            connected_clients,
            open_sockets,
            total: totals(records.iter()),
            client_to_remote: totals(
                records.iter().filter(|r| r.direction == Direction::ClientToRemote),
            ),
            remote_to_client: totals(
                records.iter().filter(|r| r.direction == Direction::RemoteToClient),
            ),
        }
    }

    pub fn direction(&self, direction: Direction) -> DirectionTotals {
        match direction {
            Direction::ClientToRemote => self.client_to_remote,
            Direction::RemoteToClient => self.remote_to_client,
        }
    }
}

fn totals<'a>(records: impl Iterator<Item = &'a TransferRecord>) -> DirectionTotals {
    let mut sessions = HashSet::new();
    let mut bytes = 0u64;
    for record in records {
        sessions.insert(record.session);
        bytes += record.bytes as u64;
    }
    DirectionTotals {
        active_sessions: sessions.len(),
        bytes,
    }
}

impl fmt::Display for DirectionTotals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[sessions={} bytes={}]", self.active_sessions, self.bytes)
    }
}

impl fmt::Display for WindowSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - clients={} sockets(in={} out={}) total{} {}{} {}{}",
            self.window_end.format("%H:%M:%S"),
            self.connected_clients,
            self.open_sockets.inbound,
            self.open_sockets.outbound,
            self.total,
            Direction::ClientToRemote,
            self.client_to_remote,
            Direction::RemoteToClient,
            self.remote_to_client,
        )
    }
}

/// Destination for window reports
pub trait ReportSink: Send + Sync {
    fn emit(&self, summary: &WindowSummary) -> Result<()>;
}

/// Prints each report as one line on stdout, as text or JSON
pub struct StdoutReportSink {
    json: bool,
}

impl StdoutReportSink {
    pub fn text() -> Self {
        Self { json: false }
    }

    pub fn json() -> Self {
        Self { json: true }
    }
}

impl ReportSink for StdoutReportSink {
    fn emit(&self, summary: &WindowSummary) -> Result<()> {
        let line = if self.json {
            serde_json::to_string(summary)?
        } else {
            summary.to_string()
        };
        let mut out = io::stdout().lock();
        writeln!(out, "{}", line)?;
        Ok(())
    }
}

impl ReportSink for mpsc::UnboundedSender<WindowSummary> {
    fn emit(&self, summary: &WindowSummary) -> Result<()> {
        self.send(summary.clone())
            .map_err(|_| anyhow!("summary receiver dropped"))
    }
}

#[derive(Debug, Clone, Copy)]
struct TransferRecord {
    session: SessionId,
    direction: Direction,
    bytes: usize,
}

/// Observer that turns the data-event stream into one report per window.
///
/// Until [`SummaryObserver::start`] installs a sink, data events are dropped
/// instead of buffered. After `on_shutting_down` no further report is
/// emitted and any partially filled window is discarded.
pub struct SummaryObserver {
    window: Duration,
    counters: Arc<ConnectionCounters>,
    connected_clients: AtomicI64,
    buffer: Mutex<Vec<TransferRecord>>,
    sink: Mutex<Option<Box<dyn ReportSink>>>,
    subscribed: AtomicBool,
    shut_down: AtomicBool,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SummaryObserver {
    pub fn new(counters: Arc<ConnectionCounters>) -> Self {
        Self::with_window(counters, DEFAULT_WINDOW)
    }

    pub fn with_window(counters: Arc<ConnectionCounters>, window: Duration) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            window,
            counters,
            connected_clients: AtomicI64::new(0),
            buffer: Mutex::new(Vec::new()),
            sink: Mutex::new(None),
            subscribed: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            stop_tx,
            task: Mutex::new(None),
        }
    }

    /// Whether a sink is installed and data events are being buffered
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    pub fn connected_clients(&self) -> i64 {
        self.connected_clients.load(Ordering::Relaxed)
    }

    /// Install the report sink and spawn the window timer.
    ///
    /// Must be called from within a tokio runtime, once.
    pub fn start(self: &Arc<Self>, sink: impl ReportSink + 'static) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            bail!("summary observer already shut down");
        }

        {
            let mut slot = self.sink.lock().map_err(|_| anyhow!("summary sink lock poisoned"))?;
            if slot.is_some() {
                bail!("summary observer already started");
            }
            *slot = Some(Box::new(sink));
        }
        self.subscribed.store(true, Ordering::Release);

        let weak = Arc::downgrade(self);
        let stop_rx = self.stop_tx.subscribe();
        let handle = tokio::spawn(run_windows(weak, self.window, stop_rx));
        if let Ok(mut task) = self.task.lock() {
            *task = Some(handle);
        }

        info!("Summary reporting started with a {:?} window", self.window);
        Ok(())
    }

    /// Swap the buffered events for an empty buffer and aggregate them.
    ///
    /// Events pushed after the swap land in the next window.
    pub fn flush_window(&self) -> WindowSummary {
        let records = match self.buffer.lock() {
            Ok(mut buffer) => mem::take(&mut *buffer),
            Err(poisoned) => mem::take(&mut *poisoned.into_inner()),
        };

        WindowSummary::aggregate(&records, self.connected_clients(), self.counters.snapshot())
    }

    /// Wait for the window task to finish after shutdown
    pub async fn join(&self) {
        let handle = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Summary window task failed: {}", e);
                }
            }
        }
    }

    fn report(&self) {
        let summary = self.flush_window();
        let sink = match self.sink.lock() {
            Ok(sink) => sink,
            Err(_) => return,
        };
        // A missing sink means shutdown won the race for this window
        if let Some(sink) = sink.as_ref() {
            if let Err(e) = sink.emit(&summary) {
                error!("Failed to emit window summary: {:#}", e);
            }
        }
    }
}

async fn run_windows(observer: Weak<SummaryObserver>, window: Duration, mut stop_rx: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + window, window);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        if *stop_rx.borrow() {
            break;
        }
        tokio::select! {
            _ = interval.tick() => {
                match observer.upgrade() {
                    Some(observer) => observer.report(),
                    None => break,
                }
            }
            changed = stop_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!("Summary window task stopped");
}

impl Observer for SummaryObserver {
    fn name(&self) -> &str {
        "summary"
    }

    fn on_connected(&self, _session: SessionId, _peer: &str) -> Result<()> {
        self.connected_clients.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn on_disconnected(&self, _session: SessionId, direction: Direction) -> Result<()> {
        // Only the client-facing side counts, so a session leaves once
        if direction == Direction::ClientToRemote {
            self.connected_clients.fetch_sub(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn on_data(&self, session: SessionId, direction: Direction, payload: &[u8]) -> Result<()> {
        if !self.is_subscribed() {
            return Ok(());
        }

        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| anyhow!("summary buffer lock poisoned"))?;
        buffer.push(TransferRecord {
            session,
            direction,
            bytes: payload.len(),
        });
        Ok(())
    }

    fn on_shutting_down(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.subscribed.store(false, Ordering::Release);
        // Taking the sink under its lock waits out a report already in flight
        let sink = self
            .sink
            .lock()
            .map_err(|_| anyhow!("summary sink lock poisoned"))?
            .take();
        self.stop_tx.send_replace(true);

        if let Ok(mut buffer) = self.buffer.lock() {
            let discarded = buffer.len();
            buffer.clear();
            if discarded > 0 {
                debug!("Discarded {} buffered transfer events at shutdown", discarded);
            }
        }

        if sink.is_some() {
            info!("Summary reporting stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn observer() -> Arc<SummaryObserver> {
        Arc::new(SummaryObserver::new(Arc::new(ConnectionCounters::new())))
    }

    #[tokio::test]
    async fn test_aggregates_one_window() {
        let observer = observer();
        let (tx, _rx) = mpsc::unbounded_channel();
        observer.start(tx).unwrap();

        let a1 = SessionId::new();
        let a2 = SessionId::new();
        let b1 = SessionId::new();

        observer.on_data(a1, Direction::ClientToRemote, &[0u8; 100]).unwrap();
        observer.on_data(a2, Direction::ClientToRemote, &[0u8; 30]).unwrap();
        observer.on_data(a2, Direction::ClientToRemote, &[0u8; 20]).unwrap();
        observer.on_data(b1, Direction::RemoteToClient, &[0u8; 50]).unwrap();

        let summary = observer.flush_window();
        assert_eq!(summary.client_to_remote, DirectionTotals { active_sessions: 2, bytes: 150 });
        assert_eq!(summary.remote_to_client, DirectionTotals { active_sessions: 1, bytes: 50 });
        assert_eq!(summary.total, DirectionTotals { active_sessions: 3, bytes: 200 });

        observer.on_shutting_down().unwrap();
    }

    #[tokio::test]
    async fn test_session_active_in_both_directions_counts_once() {
        let observer = observer();
        let (tx, _rx) = mpsc::unbounded_channel();
        observer.start(tx).unwrap();

        let a1 = SessionId::new();
        let a2 = SessionId::new();
        observer.on_data(a1, Direction::ClientToRemote, &[0u8; 100]).unwrap();
        observer.on_data(a2, Direction::ClientToRemote, &[0u8; 50]).unwrap();
        observer.on_data(a1, Direction::RemoteToClient, &[0u8; 50]).unwrap();

        let summary = observer.flush_window();
        assert_eq!(summary.direction(Direction::ClientToRemote).active_sessions, 2);
        assert_eq!(summary.direction(Direction::RemoteToClient).active_sessions, 1);
        assert_eq!(summary.total, DirectionTotals { active_sessions: 2, bytes: 200 });

        observer.on_shutting_down().unwrap();
    }

    #[tokio::test]
    async fn test_events_after_swap_go_to_next_window() {
        let observer = observer();
        let (tx, _rx) = mpsc::unbounded_channel();
        observer.start(tx).unwrap();

        let session = SessionId::new();
        observer.on_data(session, Direction::ClientToRemote, &[1u8; 10]).unwrap();
        let first = observer.flush_window();
        observer.on_data(session, Direction::ClientToRemote, &[1u8; 7]).unwrap();
        let second = observer.flush_window();
        let third = observer.flush_window();

        assert_eq!(first.total.bytes, 10);
        assert_eq!(second.total.bytes, 7);
        assert_eq!(third.total, DirectionTotals::default());

        observer.on_shutting_down().unwrap();
    }

    #[test]
    fn test_unsubscribed_data_is_not_buffered() {
        let observer = observer();
        assert!(!observer.is_subscribed());

        observer.on_data(SessionId::new(), Direction::ClientToRemote, &[0u8; 64]).unwrap();
        assert_eq!(observer.flush_window().total, DirectionTotals::default());
    }

    #[test]
    fn test_live_client_count_only_follows_client_side() {
        let observer = observer();
        let s1 = SessionId::new();
        let s2 = SessionId::new();

        observer.on_connected(s1, "a").unwrap();
        observer.on_connected(s2, "b").unwrap();
        assert_eq!(observer.connected_clients(), 2);

        observer.on_disconnected(s1, Direction::RemoteToClient).unwrap();
        assert_eq!(observer.connected_clients(), 2);

        observer.on_disconnected(s1, Direction::ClientToRemote).unwrap();
        assert_eq!(observer.connected_clients(), 1);
        assert_eq!(observer.flush_window().connected_clients, 1);
    }

    #[tokio::test]
    async fn test_reports_every_window_even_when_idle() {
        let counters = Arc::new(ConnectionCounters::new());
        counters.session_opened();
        let observer = Arc::new(SummaryObserver::with_window(
            counters,
            Duration::from_millis(30),
        ));
        let (tx, mut rx) = mpsc::unbounded_channel();
        observer.start(tx).unwrap();

        for _ in 0..2 {
            let summary = timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("window report")
                .expect("channel open");
            assert_eq!(summary.total, DirectionTotals::default());
            assert_eq!(summary.open_sockets, CounterSnapshot { inbound: 1, outbound: 1 });
        }

        observer.on_shutting_down().unwrap();
        observer.join().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_final() {
        let observer = Arc::new(SummaryObserver::with_window(
            Arc::new(ConnectionCounters::new()),
            Duration::from_millis(20),
        ));
        let (tx, mut rx) = mpsc::unbounded_channel();
        observer.start(tx).unwrap();

        observer.on_data(SessionId::new(), Direction::ClientToRemote, b"pending").unwrap();
        observer.on_shutting_down().unwrap();
        observer.on_shutting_down().unwrap();
        observer.join().await;

        // Drain anything emitted before shutdown, then nothing more may arrive
        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        assert!(!observer.is_subscribed());
        observer.on_data(SessionId::new(), Direction::ClientToRemote, b"late").unwrap();
        assert_eq!(observer.flush_window().total.bytes, 0);
        assert!(observer.start(mpsc::unbounded_channel().0).is_err());
    }

    #[test]
    fn test_display_layout() {
        let summary = WindowSummary {
            window_end: Local::now(),
            connected_clients: 3,
            open_sockets: CounterSnapshot { inbound: 3, outbound: 2 },
            total: DirectionTotals { active_sessions: 3, bytes: 200 },
            client_to_remote: DirectionTotals { active_sessions: 2, bytes: 150 },
            remote_to_client: DirectionTotals { active_sessions: 1, bytes: 50 },
        };
        let line = summary.to_string();
        assert!(line.ends_with(
            " - clients=3 sockets(in=3 out=2) total[sessions=3 bytes=200] \
             client->remote[sessions=2 bytes=150] remote->client[sessions=1 bytes=50]"
        ));

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["total"]["bytes"], 200);
        assert_eq!(json["client_to_remote"]["active_sessions"], 2);
    }
}
