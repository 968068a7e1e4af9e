//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGHUP, SIGTERM, SIGINT)
//! - Translate signals to internal events
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGHUP triggers a configuration reload, not shutdown
//! - The single control loop draining these events is what serializes
//!   reload attempts: at most one is ever in flight

use tokio::signal::unix::{signal, Signal, SignalKind};

/// Administrative event for the daemon control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerEvent {
    /// Reload configuration (SIGHUP).
    Reload,
    /// Graceful shutdown (SIGTERM/SIGINT).
    Shutdown,
}

/// Registered signal streams.
pub struct Signals {
    hangup: Signal,
    terminate: Signal,
    interrupt: Signal,
}

impl Signals {
    /// Register the daemon's signal handlers.
    pub fn new() -> std::io::Result<Signals> {
        Ok(Signals {
            hangup: signal(SignalKind::hangup())?,
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    /// Wait for the next administrative event.
    pub async fn recv(&mut self) -> ServerEvent {
        tokio::select! {
            _ = self.hangup.recv() => {
                tracing::info!("SIGHUP received, reloading configuration");
                ServerEvent::Reload
            }
            _ = self.terminate.recv() => {
                tracing::info!("SIGTERM received, shutting down");
                ServerEvent::Shutdown
            }
            _ = self.interrupt.recv() => {
                tracing::info!("SIGINT received, shutting down");
                ServerEvent::Shutdown
            }
        }
    }
}
