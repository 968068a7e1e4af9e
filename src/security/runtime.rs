//! Process-wide crypto runtime initialization.
//!
//! rustls keys all certificate and handshake operations off a process
//! default [`CryptoProvider`](rustls::crypto::CryptoProvider). Installing it
//! is a one-time, process-wide action; this module wraps it in an explicit
//! reference-counted guard so each startup bundle owns its share of the
//! runtime instead of relying on ambient global state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;

static ACTIVE_GUARDS: AtomicUsize = AtomicUsize::new(0);
static INSTALL: Once = Once::new();

/// Entry point for acquiring the process-wide crypto runtime.
pub struct CryptoRuntime;

impl CryptoRuntime {
    /// Acquire a refcounted handle to the crypto runtime, installing the
    /// process default provider on the first acquisition.
    pub fn acquire() -> RuntimeGuard {
        INSTALL.call_once(|| {
            // Err means another component installed a provider first; the
            // process default is set either way.
            let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
            tracing::debug!("Crypto runtime initialized");
        });
        ACTIVE_GUARDS.fetch_add(1, Ordering::SeqCst);
        RuntimeGuard { _private: () }
    }

    /// Number of live guards, i.e. bundles currently holding the runtime.
    pub fn active_guards() -> usize {
        ACTIVE_GUARDS.load(Ordering::SeqCst)
    }
}

/// One bundle's share of the crypto runtime.
///
/// rustls providers cannot be uninstalled, so dropping the last guard only
/// releases the bookkeeping; the count still makes the acquire/release
/// pairing checkable.
pub struct RuntimeGuard {
    _private: (),
}

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        ACTIVE_GUARDS.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for RuntimeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RuntimeGuard")
    }
}

/// Serializes tests that read or perturb the process-global guard count.
#[cfg(test)]
pub(crate) fn guard_test_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|e| e.into_inner())
}
