//! TLS credential provisioning.
//!
//! # Responsibilities
//! - Load or generate the server's private key
//! - Load or generate the certificate chain (leaf first)
//! - Build the opaque TLS credential handle listeners share
//!
//! Only invoked when the configured security policy is not `unsecured`.

use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use thiserror::Error;
use tokio_rustls::TlsAcceptor;

use crate::observability::ServerLog;

/// Key and certificate provisioning failures.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Filesystem access to key/certificate material failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generating fresh key or certificate material failed.
    #[error("failed to generate key material: {0}")]
    Generate(#[source] rcgen::Error),

    /// A key or certificate file exists but cannot be parsed.
    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// A file parsed cleanly but contained no usable material.
    #[error("no certificate or key found in {}", path.display())]
    Missing { path: PathBuf },
}

/// Building the TLS handle out of otherwise valid key material failed.
#[derive(Debug, Error)]
#[error("failed to build TLS credentials: {0}")]
pub struct CredentialError(#[from] rustls::Error);

/// The server's private key.
pub struct ServerKey {
    pair: rcgen::KeyPair,
}

impl ServerKey {
    /// PKCS#8 DER form for the TLS stack.
    pub fn to_der(&self) -> PrivateKeyDer<'static> {
        PrivatePkcs8KeyDer::from(self.pair.serialize_der()).into()
    }

    fn as_pair(&self) -> &rcgen::KeyPair {
        &self.pair
    }
}

impl std::fmt::Debug for ServerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose key material through Debug.
        f.write_str("ServerKey")
    }
}

/// Immutable TLS credentials: key, chain, and the derived acceptor handle.
///
/// Shared as `Arc<Credentials>` by every listener currently using them; a
/// reload replaces the whole value, never individual fields.
pub struct Credentials {
    key: ServerKey,
    chain: Vec<CertificateDer<'static>>,
    acceptor: TlsAcceptor,
}

impl Credentials {
    /// The TLS acceptor listeners hand incoming streams to.
    pub fn acceptor(&self) -> &TlsAcceptor {
        &self.acceptor
    }

    /// Certificate chain, leaf first.
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    /// The private key backing the chain.
    pub fn key(&self) -> &ServerKey {
        &self.key
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("chain_len", &self.chain.len())
            .finish()
    }
}

/// Load the private key from `path`, or generate and persist a fresh one.
pub fn load_or_generate_key(
    generate: bool,
    path: &Path,
    log: &ServerLog,
) -> Result<ServerKey, CryptoError> {
    if generate {
        create_parent_dirs(path)?;

        log.info("generating private key...");
        let pair = rcgen::KeyPair::generate().map_err(CryptoError::Generate)?;

        fs::write(path, pair.serialize_pem()).map_err(|source| CryptoError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(ServerKey { pair })
    } else {
        let pem = fs::read_to_string(path).map_err(|source| CryptoError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let pair = rcgen::KeyPair::from_pem(&pem).map_err(|e| CryptoError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        Ok(ServerKey { pair })
    }
}

/// Load the certificate chain from `cert_path` (appending `chain_path` if
/// configured), or generate and persist a self-signed certificate for `key`.
///
/// The generated chain always has length 1.
pub fn load_or_generate_certificate(
    generate: bool,
    key: &ServerKey,
    cert_path: &Path,
    chain_path: Option<&Path>,
    log: &ServerLog,
) -> Result<Vec<CertificateDer<'static>>, CryptoError> {
    if generate {
        create_parent_dirs(cert_path)?;

        log.info("generating self-signed certificate...");
        let mut params = rcgen::CertificateParams::new(vec!["localhost".to_string()])
            .map_err(CryptoError::Generate)?;
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "scribed");
        let cert = params.self_signed(key.as_pair()).map_err(CryptoError::Generate)?;

        fs::write(cert_path, cert.pem()).map_err(|source| CryptoError::Io {
            path: cert_path.to_path_buf(),
            source,
        })?;

        Ok(vec![cert.der().clone()])
    } else {
        let mut chain = read_certificates(cert_path)?;
        if chain.is_empty() {
            return Err(CryptoError::Missing {
                path: cert_path.to_path_buf(),
            });
        }

        if let Some(chain_path) = chain_path {
            chain.extend(read_certificates(chain_path)?);
        }

        Ok(chain)
    }
}

/// Wrap key and chain into the TLS-usable handle.
pub fn build_credentials(
    key: ServerKey,
    chain: Vec<CertificateDer<'static>>,
) -> Result<Credentials, CredentialError> {
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain.clone(), key.to_der())?;

    Ok(Credentials {
        key,
        chain,
        acceptor: TlsAcceptor::from(Arc::new(config)),
    })
}

fn read_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, CryptoError> {
    let file = fs::File::open(path).map_err(|source| CryptoError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CryptoError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

fn create_parent_dirs(path: &Path) -> Result<(), CryptoError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| CryptoError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    Ok(())
}
