//! TLS credentials, key-exchange parameters, and authentication.

pub mod auth;
pub mod creds;
pub mod kx;
pub mod runtime;

pub use auth::{AuthContext, AuthOutcome};
pub use creds::{
    build_credentials, load_or_generate_certificate, load_or_generate_key, CredentialError,
    Credentials, CryptoError, ServerKey,
};
pub use kx::KeyExchangeParams;
pub use runtime::{CryptoRuntime, RuntimeGuard};
