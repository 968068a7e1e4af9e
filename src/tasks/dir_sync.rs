//! Periodic directory synchronization.
//!
//! Mirrors the server-managed document tree into a target directory on a
//! fixed interval, optionally running a hook command after each pass. The
//! task's settings are immutable; a reload that changes any of them tears
//! the task down and creates a fresh one, while an unchanged task is kept
//! and only has its log handle repointed.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::SyncOptions;
use crate::directory::DocumentDirectory;
use crate::observability::ServerLog;

/// The settings a sync task was created with.
///
/// Compared by the reload orchestrator to decide reuse versus recreate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub interval: Duration,
    pub directory: PathBuf,
    pub hook: Option<PathBuf>,
}

impl SyncSettings {
    /// Settings from loaded options; `None` when the task is disabled.
    pub fn from_options(options: &SyncOptions) -> Option<SyncSettings> {
        match (options.interval(), &options.directory) {
            (Some(interval), Some(directory)) => Some(SyncSettings {
                interval,
                directory: directory.clone(),
                hook: options.hook.clone(),
            }),
            _ => None,
        }
    }
}

/// Counter distinguishing task generations in traces.
static SYNC_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

struct SyncShared {
    log: Mutex<ServerLog>,
}

/// A running directory-sync task.
pub struct DirectorySync {
    id: u64,
    settings: SyncSettings,
    shared: Arc<SyncShared>,
    task: tokio::task::JoinHandle<()>,
}

impl DirectorySync {
    /// Start the sync task. Infallible; the first pass reports problems
    /// through the log handle.
    pub fn spawn(
        directory: Arc<DocumentDirectory>,
        log: ServerLog,
        settings: SyncSettings,
    ) -> DirectorySync {
        let id = SYNC_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            sync_id = id,
            target = %settings.directory.display(),
            interval_secs = settings.interval.as_secs(),
            "Directory sync started"
        );

        let shared = Arc::new(SyncShared {
            log: Mutex::new(log),
        });

        let task = tokio::spawn(sync_loop(
            directory,
            Arc::clone(&shared),
            settings.clone(),
        ));

        DirectorySync {
            id,
            settings,
            shared,
            task,
        }
    }

    /// Generation id, unique per spawned task.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The settings this task runs with.
    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Repoint the task at a new log handle.
    pub fn set_log(&self, log: ServerLog) {
        *self.shared.log.lock().unwrap() = log;
    }

    /// The log handle currently in use.
    pub fn log(&self) -> ServerLog {
        self.shared.log.lock().unwrap().clone()
    }
}

impl Drop for DirectorySync {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for DirectorySync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectorySync")
            .field("settings", &self.settings)
            .finish()
    }
}

async fn sync_loop(
    directory: Arc<DocumentDirectory>,
    shared: Arc<SyncShared>,
    settings: SyncSettings,
) {
    let mut ticker = tokio::time::interval(settings.interval);
    // The first tick fires immediately; skip it so a freshly reloaded task
    // does not double-sync.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let log = shared.log.lock().unwrap().clone();

        match sync_once(&directory, &settings.directory) {
            Ok(count) => {
                tracing::debug!(count, target = %settings.directory.display(), "Documents synced");
            }
            Err(e) => {
                log.warn(format!(
                    "directory sync to {} failed: {e}",
                    settings.directory.display()
                ));
                continue;
            }
        }

        if let Some(hook) = &settings.hook {
            run_hook(hook, &settings.directory, &log).await;
        }
    }
}

/// Copy every stored document into the target directory.
pub(crate) fn sync_once(directory: &DocumentDirectory, target: &Path) -> io::Result<usize> {
    let storage = directory.storage();
    std::fs::create_dir_all(target)?;

    let names = storage.list_documents()?;
    for name in &names {
        std::fs::copy(storage.document_path(name), target.join(name))?;
    }
    Ok(names.len())
}

async fn run_hook(hook: &Path, target: &Path, log: &ServerLog) {
    match tokio::process::Command::new(hook).arg(target).status().await {
        Ok(status) if status.success() => {}
        Ok(status) => {
            log.warn(format!("sync hook {} exited with {status}", hook.display()));
        }
        Err(e) => {
            log.warn(format!("failed to run sync hook {}: {e}", hook.display()));
        }
    }
}
