//! Connection identity and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Track connection state (open → closed)
//! - Hold the connection's authentication context and exchange state
//!
//! The authentication context on a connection is replaced wholesale during a
//! reload; replacing it aborts an exchange in progress but never closes the
//! connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::security::{AuthContext, AuthOutcome};

/// Global atomic counter for connection IDs.
/// Relaxed ordering is sufficient since we only need uniqueness.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// State of the authentication exchange on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthExchange {
    /// No exchange running.
    Idle,
    /// The client has started an exchange that has not concluded.
    InProgress,
    /// The client authenticated successfully.
    Authenticated,
}

struct AuthSlot {
    context: Option<Arc<AuthContext>>,
    exchange: AuthExchange,
}

/// A client connection registered with the document directory.
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    auth: Mutex<AuthSlot>,
    open: AtomicBool,
}

impl Connection {
    /// Track a freshly accepted connection with the listener's current
    /// authentication context.
    pub fn new(peer: SocketAddr, context: Option<Arc<AuthContext>>) -> Arc<Connection> {
        Arc::new(Connection {
            id: ConnectionId::new(),
            peer,
            auth: Mutex::new(AuthSlot {
                context,
                exchange: AuthExchange::Idle,
            }),
            open: AtomicBool::new(true),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// The authentication context currently installed on this connection.
    pub fn auth_context(&self) -> Option<Arc<AuthContext>> {
        self.auth.lock().unwrap().context.clone()
    }

    /// Current exchange state.
    pub fn auth_exchange(&self) -> AuthExchange {
        self.auth.lock().unwrap().exchange
    }

    /// Start an authentication exchange. Returns false when authentication
    /// is disabled.
    pub fn begin_auth_exchange(&self) -> bool {
        let mut slot = self.auth.lock().unwrap();
        if slot.context.is_none() {
            return false;
        }
        slot.exchange = AuthExchange::InProgress;
        true
    }

    /// Conclude the exchange with a presented credential.
    pub fn authenticate(&self, presented: &str) -> AuthOutcome {
        let mut slot = self.auth.lock().unwrap();
        let outcome = match &slot.context {
            Some(context) => context.validate(presented),
            None => AuthOutcome::Reject,
        };
        slot.exchange = match outcome {
            AuthOutcome::Accept => AuthExchange::Authenticated,
            AuthOutcome::Reject => AuthExchange::Idle,
        };
        outcome
    }

    /// Install a new authentication context (or disable authentication).
    ///
    /// An exchange in progress is aborted and must be restarted by the
    /// client against the new context; a concluded exchange is untouched.
    /// The connection itself stays open either way.
    pub fn reset_authentication(&self, context: Option<Arc<AuthContext>>) {
        let mut slot = self.auth.lock().unwrap();
        if slot.exchange == AuthExchange::InProgress {
            tracing::debug!(connection_id = %self.id, "Aborting authentication exchange in progress");
            slot.exchange = AuthExchange::Idle;
        }
        slot.context = context;
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("open", &self.is_open())
            .finish()
    }
}
