//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check cross-field consistency (sync interval requires a target)
//! - Validate value ranges (port non-zero, vdiff sane)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerOptions → Result<(), Vec<ValidationError>>
//! - Runs before options are accepted into the system

use crate::config::schema::ServerOptions;

/// A single semantic problem found in loaded options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `sync.directory`.
    pub field: &'static str,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate loaded options, collecting every problem.
pub fn validate_options(options: &ServerOptions) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if options.network.port == 0 {
        errors.push(ValidationError {
            field: "network.port",
            message: "port must be non-zero".to_string(),
        });
    }

    if options.sync.interval_secs > 0 && options.sync.directory.is_none() {
        errors.push(ValidationError {
            field: "sync.directory",
            message: "a sync interval is set but no target directory is configured".to_string(),
        });
    }

    if options.sync.interval_secs == 0 && options.sync.directory.is_some() {
        errors.push(ValidationError {
            field: "sync.interval_secs",
            message: "a sync directory is set but the interval is zero".to_string(),
        });
    }

    if let Some(password) = &options.password {
        if password.is_empty() {
            errors.push(ValidationError {
                field: "password",
                message: "password must not be empty; omit it to disable authentication"
                    .to_string(),
            });
        }
    }

    if options.security.policy.requires_credentials() {
        if options.security.key_file.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "security.key_file",
                message: format!(
                    "policy {} requires a key file",
                    options.security.policy
                ),
            });
        }
        if options.security.certificate_file.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "security.certificate_file",
                message: format!(
                    "policy {} requires a certificate file",
                    options.security.policy
                ),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
