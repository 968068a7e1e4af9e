//! The document directory: storage backend plus connection registry.
//!
//! The directory outlives configuration generations. A reload may swap its
//! storage backend (whole-value replacement, never field surgery) and visits
//! its connections through the explicit [`for_each_connection`] visitor;
//! nothing here is touched while a reload can still fail.
//!
//! [`for_each_connection`]: DocumentDirectory::for_each_connection

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;

use crate::net::connection::{Connection, ConnectionId};
use crate::storage::FilesystemStorage;

/// Shared state for the server's document tree and its clients.
pub struct DocumentDirectory {
    storage: ArcSwap<FilesystemStorage>,
    connections: DashMap<ConnectionId, Arc<Connection>>,
}

impl DocumentDirectory {
    /// Build a directory over a storage backend.
    pub fn new(storage: FilesystemStorage) -> DocumentDirectory {
        DocumentDirectory {
            storage: ArcSwap::from_pointee(storage),
            connections: DashMap::new(),
        }
    }

    /// Snapshot of the current storage backend.
    pub fn storage(&self) -> Arc<FilesystemStorage> {
        self.storage.load_full()
    }

    /// Install a replacement storage backend. The old backend is released
    /// once its last user drops it.
    pub fn set_storage(&self, backend: Arc<FilesystemStorage>) {
        self.storage.store(backend);
    }

    /// Root path of the current backend.
    pub fn root_directory(&self) -> PathBuf {
        self.storage.load().root().to_path_buf()
    }

    /// Register an accepted connection.
    pub fn register_connection(&self, connection: Arc<Connection>) {
        tracing::debug!(
            connection_id = %connection.id(),
            peer = %connection.peer(),
            "Connection registered"
        );
        self.connections.insert(connection.id(), connection);
    }

    /// Remove a connection, marking it closed.
    pub fn unregister_connection(&self, id: ConnectionId) {
        if let Some((_, connection)) = self.connections.remove(&id) {
            connection.mark_closed();
        }
    }

    /// Visit every currently registered connection.
    pub fn for_each_connection(&self, mut f: impl FnMut(&Arc<Connection>)) {
        for entry in self.connections.iter() {
            f(entry.value());
        }
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl std::fmt::Debug for DocumentDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentDirectory")
            .field("root", &self.root_directory())
            .field("connections", &self.connection_count())
            .finish()
    }
}
