//! Daemon lifecycle: startup bundles, the running server, reload, signals.

pub mod reload;
pub mod run;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use reload::{reload, ReloadError};
pub use run::{RunError, ServerRun};
pub use shutdown::Shutdown;
pub use signals::{ServerEvent, Signals};
pub use startup::{StartupBundle, StartupError};
