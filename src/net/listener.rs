//! TCP listener candidates, one per address family.
//!
//! # Responsibilities
//! - Bind the "any" address of one family at a configured port
//! - Open a bound candidate for accepting (hand it to the async reactor)
//! - Keep bind and open independently fallible per family
//!
//! A candidate created during a reload attempt is exclusively owned by that
//! attempt; dropping it releases the socket. Ownership transfers to the
//! running server only when the attempt commits.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// The IPv4 or IPv6 variant of the same logical network service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerFamily {
    V6,
    V4,
}

impl ListenerFamily {
    /// The family's "any" address at `port`.
    pub fn any_addr(self, port: u16) -> SocketAddr {
        match self {
            ListenerFamily::V6 => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port),
            ListenerFamily::V4 => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
        }
    }
}

impl std::fmt::Display for ListenerFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerFamily::V6 => write!(f, "IPv6"),
            ListenerFamily::V4 => write!(f, "IPv4"),
        }
    }
}

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind the family's any-address at the requested port.
    Bind {
        family: ListenerFamily,
        port: u16,
        source: std::io::Error,
    },
    /// Failed to open a bound candidate for accepting connections.
    Open {
        family: ListenerFamily,
        source: std::io::Error,
    },
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind {
                family,
                port,
                source,
            } => write!(f, "failed to bind {family} listener on port {port}: {source}"),
            ListenerError::Open { family, source } => {
                write!(f, "failed to open {family} listener: {source}")
            }
        }
    }
}

impl std::error::Error for ListenerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListenerError::Bind { source, .. } | ListenerError::Open { source, .. } => Some(source),
        }
    }
}

/// A bound but not yet opened listener candidate.
#[derive(Debug)]
pub struct ListenerCandidate {
    family: ListenerFamily,
    inner: std::net::TcpListener,
    port: u16,
}

impl ListenerCandidate {
    /// Bind the family's any-address at `port`.
    ///
    /// Port 0 binds an ephemeral port; the actual port is reported by
    /// [`local_port`](Self::local_port).
    pub fn bind(family: ListenerFamily, port: u16) -> Result<ListenerCandidate, ListenerError> {
        let listener =
            std::net::TcpListener::bind(family.any_addr(port)).map_err(|source| {
                ListenerError::Bind {
                    family,
                    port,
                    source,
                }
            })?;

        let port = listener
            .local_addr()
            .map_err(|source| ListenerError::Bind {
                family,
                port,
                source,
            })?
            .port();

        tracing::info!(%family, port, "Listener candidate bound");
        Ok(ListenerCandidate {
            family,
            inner: listener,
            port,
        })
    }

    pub fn family(&self) -> ListenerFamily {
        self.family
    }

    pub fn local_port(&self) -> u16 {
        self.port
    }

    /// Open the candidate for accepting connections.
    ///
    /// Must be called from within the server's async runtime: the socket is
    /// handed to the reactor here. After this the kernel queues incoming
    /// connections on the new port.
    pub fn open(self) -> Result<OpenListener, ListenerError> {
        let family = self.family;

        self.inner
            .set_nonblocking(true)
            .map_err(|source| ListenerError::Open { family, source })?;

        let inner = tokio::net::TcpListener::from_std(self.inner)
            .map_err(|source| ListenerError::Open { family, source })?;

        tracing::info!(%family, port = self.port, "Listener open for connections");
        Ok(OpenListener {
            family,
            inner,
            port: self.port,
        })
    }
}

/// Bind candidates for both address families at `port`.
///
/// The two binds are independent; the caller decides how many surviving
/// families it needs. On hosts where the IPv6 any-address also accepts
/// mapped IPv4 connections, the IPv4 bind typically fails with an address
/// conflict and the IPv6 listener serves both families.
pub fn bind_family_candidates(
    port: u16,
) -> (
    Result<ListenerCandidate, ListenerError>,
    Result<ListenerCandidate, ListenerError>,
) {
    (
        ListenerCandidate::bind(ListenerFamily::V6, port),
        ListenerCandidate::bind(ListenerFamily::V4, port),
    )
}

/// An open listener, ready to be wrapped into a session listener.
#[derive(Debug)]
pub struct OpenListener {
    family: ListenerFamily,
    inner: tokio::net::TcpListener,
    port: u16,
}

impl OpenListener {
    pub fn family(&self) -> ListenerFamily {
        self.family
    }

    pub fn local_port(&self) -> u16 {
        self.port
    }

    pub(crate) fn into_inner(self) -> tokio::net::TcpListener {
        self.inner
    }
}
