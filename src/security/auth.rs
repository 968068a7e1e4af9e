//! Password authentication context.
//!
//! # Responsibilities
//! - Build the authentication context when a password is configured
//! - Hold the registered validation callback listeners and connections use
//!
//! `None` in place of an `Arc<AuthContext>` is a legitimate, distinct value
//! meaning "authentication disabled".

use std::sync::Arc;

/// Result of validating a presented credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Accept,
    Reject,
}

type Validator = Box<dyn Fn(&str) -> AuthOutcome + Send + Sync>;

/// Opaque authentication context shared by listeners and connections.
///
/// One context is built per startup bundle; a reload replaces it wholesale
/// on every listener and live connection.
pub struct AuthContext {
    validator: Validator,
    mechanisms: &'static str,
}

impl AuthContext {
    /// Context validating against a configured password.
    ///
    /// The comparison is a plain equality check, matching the configured
    /// secret byte for byte.
    pub fn for_password(secret: &str) -> Arc<AuthContext> {
        let secret = secret.to_string();
        Self::with_validator(move |presented| {
            if presented == secret {
                AuthOutcome::Accept
            } else {
                AuthOutcome::Reject
            }
        })
    }

    /// Context with a custom validation callback.
    pub fn with_validator<F>(validator: F) -> Arc<AuthContext>
    where
        F: Fn(&str) -> AuthOutcome + Send + Sync + 'static,
    {
        Arc::new(AuthContext {
            validator: Box::new(validator),
            mechanisms: "PLAIN",
        })
    }

    /// Run the registered validation callback.
    pub fn validate(&self, presented: &str) -> AuthOutcome {
        (self.validator)(presented)
    }

    /// Mechanisms offered to clients.
    pub fn mechanisms(&self) -> &'static str {
        self.mechanisms
    }
}

impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("mechanisms", &self.mechanisms)
            .finish()
    }
}
