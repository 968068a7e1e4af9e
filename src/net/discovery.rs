//! Local service discovery as an injected capability.
//!
//! Publication (mDNS or similar) is optional at construction time: the
//! server takes `Option<Arc<dyn LocalDiscovery>>` and publishes through it
//! when present. No compile-time conditionals.

use crate::net::listener::ListenerFamily;

/// Publishes the collaboration service on the local network.
pub trait LocalDiscovery: Send + Sync {
    /// Announce a listener.
    fn publish(&self, family: ListenerFamily, port: u16);

    /// Withdraw a previously announced listener.
    fn withdraw(&self, family: ListenerFamily, port: u16);
}
