//! Transformation protector.
//!
//! Bounds the permissible edit distance ("vdiff") of a single operational
//! transformation, capping the worst-case cost a client can impose. Active
//! iff the configured ceiling is positive; a reload updates the ceiling in
//! place on an already active protector.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::directory::DocumentDirectory;
use crate::observability::ServerLog;

/// Guard over transformation cost.
pub struct TransformationProtector {
    directory: Arc<DocumentDirectory>,
    max_vdiff: AtomicU64,
    rejected: AtomicU64,
    log: Mutex<ServerLog>,
}

impl TransformationProtector {
    /// Create a protector with a positive ceiling.
    pub fn new(
        directory: Arc<DocumentDirectory>,
        log: ServerLog,
        max_vdiff: u64,
    ) -> TransformationProtector {
        debug_assert!(max_vdiff > 0, "a zero ceiling means no protector at all");
        TransformationProtector {
            directory,
            max_vdiff: AtomicU64::new(max_vdiff),
            rejected: AtomicU64::new(0),
            log: Mutex::new(log),
        }
    }

    /// Current ceiling.
    pub fn max_vdiff(&self) -> u64 {
        self.max_vdiff.load(Ordering::Relaxed)
    }

    /// Update the ceiling in place.
    pub fn set_max_vdiff(&self, max_vdiff: u64) {
        self.max_vdiff.store(max_vdiff, Ordering::Relaxed);
    }

    /// Repoint the protector at a new log handle.
    pub fn set_log(&self, log: ServerLog) {
        *self.log.lock().unwrap() = log;
    }

    /// The directory whose sessions are guarded.
    pub fn directory(&self) -> &Arc<DocumentDirectory> {
        &self.directory
    }

    /// Whether a transformation of cost `vdiff` is permitted.
    pub fn check(&self, vdiff: u64) -> bool {
        if vdiff <= self.max_vdiff.load(Ordering::Relaxed) {
            return true;
        }

        self.rejected.fetch_add(1, Ordering::Relaxed);
        let log = self.log.lock().unwrap().clone();
        log.warn(format!(
            "rejecting transformation with vdiff {vdiff} (ceiling {})",
            self.max_vdiff.load(Ordering::Relaxed)
        ));
        false
    }

    /// Number of rejected transformations since creation.
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for TransformationProtector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformationProtector")
            .field("max_vdiff", &self.max_vdiff())
            .field("rejected", &self.rejected_count())
            .finish()
    }
}
