//! The listener pool.
//!
//! Registry of the session listeners the server is currently accepting on,
//! together with their optional local-discovery publications. The pool is
//! owned by the running server and only touched from the administrative
//! control path.

use std::sync::Arc;

use crate::net::discovery::LocalDiscovery;
use crate::net::session::SessionListener;

struct PoolEntry {
    listener: Arc<SessionListener>,
    publisher: Option<Arc<dyn LocalDiscovery>>,
}

/// Registry of active session listeners.
#[derive(Default)]
pub struct ListenerPool {
    entries: Vec<PoolEntry>,
}

impl ListenerPool {
    pub fn new() -> ListenerPool {
        ListenerPool::default()
    }

    /// Register a listener.
    pub fn add_server(&mut self, listener: Arc<SessionListener>) {
        self.entries.push(PoolEntry {
            listener,
            publisher: None,
        });
    }

    /// Publish a registered listener through a discovery capability.
    pub fn add_local_publisher(
        &mut self,
        listener: &Arc<SessionListener>,
        publisher: Arc<dyn LocalDiscovery>,
    ) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| Arc::ptr_eq(&e.listener, listener))
        {
            publisher.publish(listener.family(), listener.local_port());
            entry.publisher = Some(publisher);
        }
    }

    /// Remove a listener, withdrawing its publication if it had one.
    /// Returns whether the listener was registered.
    pub fn remove_server(&mut self, listener: &Arc<SessionListener>) -> bool {
        let Some(index) = self
            .entries
            .iter()
            .position(|e| Arc::ptr_eq(&e.listener, listener))
        else {
            return false;
        };

        let entry = self.entries.remove(index);
        if let Some(publisher) = entry.publisher {
            publisher.withdraw(entry.listener.family(), entry.listener.local_port());
        }
        true
    }

    /// Whether a listener is registered.
    pub fn contains(&self, listener: &Arc<SessionListener>) -> bool {
        self.entries
            .iter()
            .any(|e| Arc::ptr_eq(&e.listener, listener))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ListenerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerPool")
            .field("len", &self.len())
            .finish()
    }
}
