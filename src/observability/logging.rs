//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber for the daemon process
//! - Provide the per-bundle [`ServerLog`] file handle
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - The server log file is a handle owned by the startup bundle: each
//!   bundle generation opens its own handle, so a reload swaps log handles
//!   together with the rest of the configuration
//! - Log level configurable via environment (RUST_LOG)

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::directory::DocumentDirectory;

/// Initialize the process-wide tracing subscriber.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scribed=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Clonable handle to the daemon's operational log.
///
/// Lines go to tracing always, and additionally to the configured log file
/// when one is set. The handle can be associated with the live document
/// directory so operational lines can report directory state.
#[derive(Clone)]
pub struct ServerLog {
    inner: Arc<LogInner>,
}

struct LogInner {
    file: Option<Mutex<File>>,
    path: Option<PathBuf>,
    directory: Mutex<Weak<DocumentDirectory>>,
}

impl ServerLog {
    /// Open a log handle, creating the file (and parent directories) in
    /// append mode when a path is configured.
    pub fn open(path: Option<&Path>) -> std::io::Result<ServerLog> {
        let file = match path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                Some(Mutex::new(
                    OpenOptions::new().create(true).append(true).open(path)?,
                ))
            }
            None => None,
        };

        Ok(ServerLog {
            inner: Arc::new(LogInner {
                file,
                path: path.map(Path::to_path_buf),
                directory: Mutex::new(Weak::new()),
            }),
        })
    }

    /// Associate this handle with the live document directory.
    ///
    /// The association lives on the handle, not on the directory: a bundle
    /// whose construction succeeds but whose reload later aborts leaves the
    /// running server untouched.
    pub fn set_directory(&self, directory: &Arc<DocumentDirectory>) {
        *self.inner.directory.lock().unwrap() = Arc::downgrade(directory);
        self.info(format!(
            "log handle attached to document directory ({} connections)",
            directory.connection_count()
        ));
    }

    /// The directory this handle is attached to, if still alive.
    pub fn directory(&self) -> Option<Arc<DocumentDirectory>> {
        self.inner.directory.lock().unwrap().upgrade()
    }

    /// Path of the underlying log file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub fn info(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::info!(target: "scribed::log", "{message}");
        self.append("INFO", message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::warn!(target: "scribed::log", "{message}");
        self.append("WARN", message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::error!(target: "scribed::log", "{message}");
        self.append("ERROR", message);
    }

    fn append(&self, level: &str, message: &str) {
        if let Some(file) = &self.inner.file {
            let ts = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            let mut file = file.lock().unwrap();
            // A failed write to the log file must never take the server down.
            let _ = writeln!(file, "[{ts}] {level} {message}");
        }
    }
}

impl std::fmt::Debug for ServerLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerLog")
            .field("path", &self.inner.path)
            .finish()
    }
}
