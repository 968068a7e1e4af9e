//! Startup bundle construction.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Provision TLS credentials when the policy requires them
//! - Build the authentication context when a password is configured
//! - Compose everything into one immutable, atomically built snapshot
//!
//! # Design Decisions
//! - All-or-nothing: any failed sub-step releases everything acquired so
//!   far (plain RAII) before the error is returned
//! - One bundle per configuration generation; a reload builds a complete
//!   new bundle before the running server is touched

use std::sync::Arc;

use thiserror::Error;

use crate::config::{load_options, CliOverrides, ConfigError, OptionSources, ServerOptions};
use crate::observability::ServerLog;
use crate::security::{
    build_credentials, load_or_generate_certificate, load_or_generate_key, AuthContext,
    CredentialError, Credentials, CryptoError, CryptoRuntime, RuntimeGuard,
};

/// Bundle construction failures.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("failed to open log file: {0}")]
    Log(#[source] std::io::Error),
}

/// One generation of server configuration: options, credentials, auth
/// context, and a dedicated log handle.
///
/// Exactly one bundle is ever current on a running server.
pub struct StartupBundle {
    // Field order fixes teardown order: auth context, credentials, options,
    // log handle, then the crypto runtime refcount.
    auth: Option<Arc<AuthContext>>,
    credentials: Option<Arc<Credentials>>,
    options: ServerOptions,
    log: ServerLog,
    _runtime: RuntimeGuard,
}

impl StartupBundle {
    /// Build a fresh bundle from disk.
    pub fn build(
        sources: &OptionSources,
        overrides: &CliOverrides,
    ) -> Result<StartupBundle, StartupError> {
        let runtime = CryptoRuntime::acquire();

        let options = load_options(sources, overrides)?;

        let log = ServerLog::open(options.log_file.as_deref()).map_err(StartupError::Log)?;

        let credentials = if options.security.policy.requires_credentials() {
            let security = &options.security;
            let key = load_or_generate_key(security.create_key, &security.key_file, &log)?;
            let chain = load_or_generate_certificate(
                security.create_certificate,
                &key,
                &security.certificate_file,
                security.certificate_chain_file.as_deref(),
                &log,
            )?;
            Some(Arc::new(build_credentials(key, chain)?))
        } else {
            None
        };

        let auth = options
            .password
            .as_deref()
            .map(AuthContext::for_password);

        Ok(StartupBundle {
            auth,
            credentials,
            options,
            log,
            _runtime: runtime,
        })
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub fn credentials(&self) -> Option<&Arc<Credentials>> {
        self.credentials.as_ref()
    }

    pub fn auth_context(&self) -> Option<&Arc<AuthContext>> {
        self.auth.as_ref()
    }

    pub fn log(&self) -> &ServerLog {
        &self.log
    }
}

impl std::fmt::Debug for StartupBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartupBundle")
            .field("policy", &self.options.security.policy)
            .field("secured", &self.credentials.is_some())
            .field("authenticated", &self.auth.is_some())
            .finish()
    }
}
