//! Networking: listener lifecycle, session listeners, connections, pool.

pub mod connection;
pub mod discovery;
pub mod listener;
pub mod pool;
pub mod session;

pub use connection::{AuthExchange, Connection, ConnectionId};
pub use discovery::LocalDiscovery;
pub use listener::{ListenerCandidate, ListenerError, ListenerFamily, OpenListener};
pub use pool::ListenerPool;
pub use session::{SecuritySettings, SessionListener};
