//! Session listeners: the protocol wrapper around an open TCP listener.
//!
//! # Responsibilities
//! - Accept connections for one address family
//! - Apply the listener's security policy (TLS handshake when required)
//! - Register accepted connections with the document directory
//! - Expose typed accessors for credentials, policy, and auth context so a
//!   reload can reconfigure a live listener in place
//!
//! Closing a session listener closes its accepted connections: their
//! sockets belong to the listener generation that accepted them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};

use crate::config::SecurityPolicy;
use crate::directory::DocumentDirectory;
use crate::net::connection::Connection;
use crate::net::listener::{ListenerFamily, OpenListener};
use crate::security::{AuthContext, Credentials};

/// Security settings applied to sessions accepted by one listener.
///
/// Replaced as a whole; `set_credentials` and `set_security_policy` each
/// swap in a complete new value so concurrent accepts never observe a
/// half-updated pair.
#[derive(Debug, Clone)]
pub struct SecuritySettings {
    pub policy: SecurityPolicy,
    pub credentials: Option<Arc<Credentials>>,
}

struct ListenerShared {
    security: ArcSwap<SecuritySettings>,
    auth: ArcSwapOption<AuthContext>,
    directory: Arc<DocumentDirectory>,
    closed: watch::Sender<bool>,
}

/// A pooled, accepting listener for one address family.
pub struct SessionListener {
    family: ListenerFamily,
    port: u16,
    shared: Arc<ListenerShared>,
    accept_task: tokio::task::JoinHandle<()>,
    closed: AtomicBool,
}

impl SessionListener {
    /// Wrap an open listener and start accepting.
    ///
    /// Infallible: everything that can fail happened while binding and
    /// opening the candidate.
    pub fn new(
        listener: OpenListener,
        policy: SecurityPolicy,
        credentials: Option<Arc<Credentials>>,
        auth: Option<Arc<AuthContext>>,
        directory: Arc<DocumentDirectory>,
        shutdown: broadcast::Receiver<()>,
    ) -> Arc<SessionListener> {
        debug_assert!(
            !policy.requires_credentials() || credentials.is_some(),
            "policy {policy} requires credentials"
        );

        let family = listener.family();
        let port = listener.local_port();
        let (closed_tx, _) = watch::channel(false);

        let shared = Arc::new(ListenerShared {
            security: ArcSwap::from_pointee(SecuritySettings {
                policy,
                credentials,
            }),
            auth: ArcSwapOption::new(auth),
            directory,
            closed: closed_tx,
        });

        let accept_task = tokio::spawn(accept_loop(
            listener.into_inner(),
            family,
            Arc::clone(&shared),
            shutdown,
        ));

        Arc::new(SessionListener {
            family,
            port,
            shared,
            accept_task,
            closed: AtomicBool::new(false),
        })
    }

    pub fn family(&self) -> ListenerFamily {
        self.family
    }

    pub fn local_port(&self) -> u16 {
        self.port
    }

    /// Snapshot of the current security settings.
    pub fn security_settings(&self) -> Arc<SecuritySettings> {
        self.shared.security.load_full()
    }

    pub fn security_policy(&self) -> SecurityPolicy {
        self.shared.security.load().policy
    }

    pub fn credentials(&self) -> Option<Arc<Credentials>> {
        self.shared.security.load().credentials.clone()
    }

    pub fn auth_context(&self) -> Option<Arc<AuthContext>> {
        self.shared.auth.load_full()
    }

    /// Install replacement credentials, keeping the policy.
    ///
    /// When a reload tightens the policy as well, credentials must be set
    /// first: a policy that requires TLS is only valid with credentials
    /// already present.
    pub fn set_credentials(&self, credentials: Option<Arc<Credentials>>) {
        let current = self.shared.security.load();
        self.shared.security.store(Arc::new(SecuritySettings {
            policy: current.policy,
            credentials,
        }));
    }

    /// Install a new security policy, keeping the credentials.
    pub fn set_security_policy(&self, policy: SecurityPolicy) {
        let current = self.shared.security.load();
        debug_assert!(
            !policy.requires_credentials() || current.credentials.is_some(),
            "set_security_policy({policy}) without credentials installed"
        );
        self.shared.security.store(Arc::new(SecuritySettings {
            policy,
            credentials: current.credentials.clone(),
        }));
    }

    /// Install a new authentication context (or disable authentication) for
    /// sessions accepted from now on.
    pub fn set_auth_context(&self, auth: Option<Arc<AuthContext>>) {
        self.shared.auth.store(auth);
    }

    /// Stop accepting and close every connection this listener accepted.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(family = %self.family, port = self.port, "Closing listener");
        self.accept_task.abort();
        let _ = self.shared.closed.send(true);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for SessionListener {
    fn drop(&mut self) {
        self.accept_task.abort();
        let _ = self.shared.closed.send(true);
    }
}

impl std::fmt::Debug for SessionListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionListener")
            .field("family", &self.family)
            .field("port", &self.port)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn accept_loop(
    listener: tokio::net::TcpListener,
    family: ListenerFamily,
    shared: Arc<ListenerShared>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!(%family, "Accept loop stopping on shutdown");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let shared = Arc::clone(&shared);
                    let closed = shared.closed.subscribe();
                    tokio::spawn(serve_connection(stream, peer, shared, closed));
                }
                Err(e) => {
                    tracing::warn!(%family, error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: std::net::SocketAddr,
    shared: Arc<ListenerShared>,
    mut closed: watch::Receiver<bool>,
) {
    let settings = shared.security.load_full();
    let auth = shared.auth.load_full();

    let connection = Connection::new(peer, auth);
    shared.directory.register_connection(Arc::clone(&connection));

    match (settings.policy, settings.credentials.as_ref()) {
        (SecurityPolicy::RequireTls, Some(credentials)) => {
            match credentials.acceptor().accept(stream).await {
                Ok(tls) => service_stream(tls, &mut closed).await,
                Err(e) => {
                    tracing::debug!(peer = %peer, error = %e, "TLS handshake failed");
                }
            }
        }
        // allow-tls upgrades are negotiated inside the session protocol;
        // unsecured stays plain.
        _ => service_stream(stream, &mut closed).await,
    }

    shared.directory.unregister_connection(connection.id());
}

/// Keep the socket serviced until the peer goes away or the listener
/// generation that accepted it is closed. Collaboration protocol framing is
/// dispatched by the session layer, outside this subsystem.
async fn service_stream<S>(mut stream: S, closed: &mut watch::Receiver<bool>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; 4096];
    loop {
        tokio::select! {
            changed = closed.changed() => {
                if changed.is_err() || *closed.borrow() {
                    break;
                }
            }
            read = stream.read(&mut buf) => {
                match read {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::listener::ListenerCandidate;
    use crate::storage::FilesystemStorage;
    use std::time::Duration;

    fn directory() -> Arc<DocumentDirectory> {
        Arc::new(DocumentDirectory::new(FilesystemStorage::new(
            "/tmp/scribed-session-tests",
        )))
    }

    fn spawn_listener(
        directory: Arc<DocumentDirectory>,
    ) -> (Arc<SessionListener>, broadcast::Sender<()>) {
        let candidate = ListenerCandidate::bind(ListenerFamily::V4, 0).unwrap();
        let open = candidate.open().unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let listener = SessionListener::new(
            open,
            SecurityPolicy::Unsecured,
            None,
            None,
            directory,
            shutdown_rx,
        );
        (listener, shutdown_tx)
    }

    async fn wait_for<F: Fn() -> bool>(what: &str, predicate: F) {
        for _ in 0..100 {
            if predicate() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[tokio::test]
    async fn test_accepted_connections_are_registered() {
        let directory = directory();
        let (listener, _shutdown) = spawn_listener(Arc::clone(&directory));

        let _client = tokio::net::TcpStream::connect(("127.0.0.1", listener.local_port()))
            .await
            .unwrap();

        wait_for("registration", || directory.connection_count() == 1).await;
        listener.close();
        wait_for("deregistration", || directory.connection_count() == 0).await;
    }

    #[tokio::test]
    async fn test_close_disconnects_clients() {
        let directory = directory();
        let (listener, _shutdown) = spawn_listener(Arc::clone(&directory));

        let mut client = tokio::net::TcpStream::connect(("127.0.0.1", listener.local_port()))
            .await
            .unwrap();
        wait_for("registration", || directory.connection_count() == 1).await;

        listener.close();

        // The peer observes EOF once the connection task drops the socket.
        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("peer never saw the close");
        assert_eq!(read.unwrap_or(0), 0);
    }

    #[tokio::test]
    async fn test_in_place_reconfiguration_order() {
        let directory = directory();
        let (listener, _shutdown) = spawn_listener(directory);

        // Upgrading to a TLS policy goes credentials-first.
        let _serial = crate::security::runtime::guard_test_lock();
        let _guard = crate::security::CryptoRuntime::acquire();
        let dir = tempfile::tempdir().unwrap();
        let log = crate::observability::ServerLog::open(None).unwrap();
        let key =
            crate::security::load_or_generate_key(true, &dir.path().join("key.pem"), &log).unwrap();
        let chain = crate::security::load_or_generate_certificate(
            true,
            &key,
            &dir.path().join("cert.pem"),
            None,
            &log,
        )
        .unwrap();
        let credentials = Arc::new(crate::security::build_credentials(key, chain).unwrap());

        listener.set_credentials(Some(Arc::clone(&credentials)));
        let snapshot = listener.security_settings();
        assert_eq!(snapshot.policy, SecurityPolicy::Unsecured);
        assert!(snapshot.credentials.is_some());

        listener.set_security_policy(SecurityPolicy::AllowTls);
        assert_eq!(listener.security_policy(), SecurityPolicy::AllowTls);
        assert!(Arc::ptr_eq(
            &listener.credentials().unwrap(),
            &credentials
        ));
    }

    #[tokio::test]
    async fn test_new_auth_context_applies_to_new_sessions() {
        let directory = directory();
        let (listener, _shutdown) = spawn_listener(Arc::clone(&directory));

        let ctx = AuthContext::for_password("pw");
        listener.set_auth_context(Some(Arc::clone(&ctx)));

        let _client = tokio::net::TcpStream::connect(("127.0.0.1", listener.local_port()))
            .await
            .unwrap();
        wait_for("registration", || directory.connection_count() == 1).await;

        directory.for_each_connection(|c| {
            assert!(Arc::ptr_eq(&c.auth_context().unwrap(), &ctx));
        });
        listener.close();
    }
}
