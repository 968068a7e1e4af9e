//! Per-connection traffic logging.
//!
//! Appends one file per connection under a target directory. Active iff a
//! target directory is configured; a reload that changes the target tears
//! the logger down and creates a fresh one.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Counter distinguishing logger generations in traces.
static LOGGER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

use crate::directory::DocumentDirectory;
use crate::net::connection::Connection;
use crate::observability::ServerLog;

/// Traffic logger for one configuration generation.
pub struct TrafficLogger {
    id: u64,
    directory: Arc<DocumentDirectory>,
    target: PathBuf,
    log: Mutex<ServerLog>,
}

impl TrafficLogger {
    /// Create a logger writing under `target`. Infallible; the directory is
    /// created lazily on first record.
    pub fn new(
        directory: Arc<DocumentDirectory>,
        log: ServerLog,
        target: &Path,
    ) -> TrafficLogger {
        let id = LOGGER_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(logger_id = id, target = %target.display(), "Traffic logger created");
        TrafficLogger {
            id,
            directory,
            target: target.to_path_buf(),
            log: Mutex::new(log),
        }
    }

    /// Generation id, unique per created logger.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Target directory for the per-connection files.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Repoint the logger at a new log handle.
    pub fn set_log(&self, log: ServerLog) {
        *self.log.lock().unwrap() = log;
    }

    /// The directory whose traffic is logged.
    pub fn directory(&self) -> &Arc<DocumentDirectory> {
        &self.directory
    }

    /// Append a traffic line for one connection.
    ///
    /// A recording failure is reported through the log handle and otherwise
    /// swallowed: traffic logging must never disturb the session.
    pub fn record(&self, connection: &Connection, line: &str) {
        if let Err(e) = self.append(connection, line) {
            let log = self.log.lock().unwrap().clone();
            log.warn(format!(
                "failed to record traffic for {}: {e}",
                connection.id()
            ));
        }
    }

    fn append(&self, connection: &Connection, line: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.target)?;
        let path = self.target.join(format!("{}.log", connection.id()));
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{line}")
    }
}

impl std::fmt::Debug for TrafficLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrafficLogger")
            .field("target", &self.target)
            .finish()
    }
}
