//! Append-only persistent event log

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use anyhow::{anyhow, Context};
use chrono::Local;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::{format, Observer};
use crate::session::{Direction, SessionId};
use crate::Result;

/// Default interval between background flushes
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Appends one line per event to a log file.
///
/// The file is opened lazily on the first event: missing parent directories
/// are created and existing content is preserved. Lines are buffered and
/// flushed by a background task rather than per line; shutdown flushes once
/// more and stops the task.
pub struct FileObserver {
    path: PathBuf,
    flush_interval: Duration,
    writer: Arc<Mutex<Option<BufWriter<File>>>>,
    stop_tx: watch::Sender<bool>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

impl FileObserver {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_flush_interval(path, DEFAULT_FLUSH_INTERVAL)
    }

    pub fn with_flush_interval(path: impl AsRef<Path>, flush_interval: Duration) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            path: path.as_ref().to_path_buf(),
            flush_interval,
            writer: Arc::new(Mutex::new(None)),
            stop_tx,
            flush_task: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush buffered lines to disk
    pub fn flush(&self) -> Result<()> {
        let mut writer = lock(&self.writer)?;
        if let Some(writer) = writer.as_mut() {
            writer.flush().context("Failed to flush event log")?;
        }
        Ok(())
    }

    /// Wait for the background flush task to exit after shutdown
    pub async fn join(&self) {
        let handle = self.flush_task.lock().ok().and_then(|mut task| task.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Event log flush task failed: {}", e);
                }
            }
        }
    }

    fn open(&self) -> Result<BufWriter<File>> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create log directory: {}", parent.display())
                })?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open event log: {}", self.path.display()))?;

        info!("Writing relay events to {}", self.path.display());
        Ok(BufWriter::new(file))
    }

    fn spawn_flusher(&self) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                debug!("No runtime available, event log is flushed on shutdown only");
                return;
            }
        };

        let writer = Arc::clone(&self.writer);
        let mut stop_rx = self.stop_tx.subscribe();
        let period = self.flush_interval;

        let task = handle.spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                if *stop_rx.borrow() {
                    break;
                }
                tokio::select! {
                    _ = interval.tick() => {
                        let mut guard = match writer.lock() {
                            Ok(guard) => guard,
                            Err(_) => break,
                        };
                        if let Some(w) = guard.as_mut() {
                            if let Err(e) = w.flush() {
                                error!("Periodic event log flush failed: {}", e);
                            }
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("Event log flush task stopped");
        });

        if let Ok(mut slot) = self.flush_task.lock() {
            *slot = Some(task);
        }
    }

    fn write_line(&self, session: SessionId, direction: Direction, info: &str) -> Result<()> {
        if *self.stop_tx.borrow() {
            return Ok(());
        }

        let line = format::file_line(Local::now(), session, direction, info);
        let mut guard = lock(&self.writer)?;
        if guard.is_none() {
            *guard = Some(self.open()?);
            self.spawn_flusher();
        }
        if let Some(writer) = guard.as_mut() {
            writeln!(writer, "{}", line).context("Failed to append to event log")?;
        }
        Ok(())
    }
}

fn lock(writer: &Mutex<Option<BufWriter<File>>>) -> Result<MutexGuard<'_, Option<BufWriter<File>>>> {
    writer.lock().map_err(|_| anyhow!("event log lock poisoned"))
}

impl Observer for FileObserver {
    fn name(&self) -> &str {
        "file"
    }

    fn on_connected(&self, session: SessionId, peer: &str) -> Result<()> {
        self.write_line(session, Direction::ClientToRemote, &format::connected_info(peer))
    }

    fn on_disconnected(&self, session: SessionId, direction: Direction) -> Result<()> {
        self.write_line(session, direction, format::DISCONNECTED_INFO)
    }

    fn on_data(&self, session: SessionId, direction: Direction, payload: &[u8]) -> Result<()> {
        self.write_line(session, direction, &format::file_payload(payload))
    }

    fn on_shutting_down(&self) -> Result<()> {
        self.stop_tx.send_replace(true);
        self.flush()
    }
}
