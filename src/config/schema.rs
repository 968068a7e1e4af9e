//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the daemon.
//! All types derive Serde traits for deserialization from config files.
//!
//! A loaded [`ServerOptions`] is an immutable snapshot: a reload always
//! produces a brand-new instance that fully replaces the old one.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the collaboration server.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ServerOptions {
    /// Network settings (port shared by both address families).
    pub network: NetworkOptions,

    /// TLS / security policy settings.
    pub security: SecurityOptions,

    /// Optional password clients must present to authenticate.
    /// `None` disables authentication entirely.
    pub password: Option<String>,

    /// Document storage settings.
    pub storage: StorageOptions,

    /// Plugin set to load.
    pub plugins: PluginOptions,

    /// Periodic directory synchronization.
    pub sync: SyncOptions,

    /// Ceiling on the edit distance of a single transformation.
    /// 0 disables the transformation protector.
    pub max_transformation_vdiff: u64,

    /// Directory for per-connection traffic logs. `None` disables them.
    pub traffic_log_directory: Option<PathBuf>,

    /// Daemon log file. `None` logs through tracing only.
    pub log_file: Option<PathBuf>,

    /// Path of the config file these options were loaded from, if any.
    /// Per-plugin `[plugin.<name>]` tables are read back from this file.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

/// Network listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct NetworkOptions {
    /// TCP port for both the IPv6 and IPv4 listeners.
    pub port: u16,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self { port: 6523 }
    }
}

/// TLS requirement level for client sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SecurityPolicy {
    /// Plain connections only; no credentials are provisioned.
    #[default]
    Unsecured,
    /// Clients may upgrade to TLS.
    AllowTls,
    /// Clients must upgrade to TLS.
    RequireTls,
}

impl SecurityPolicy {
    /// Whether this policy needs TLS credentials to be valid.
    pub fn requires_credentials(self) -> bool {
        !matches!(self, SecurityPolicy::Unsecured)
    }
}

impl std::fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityPolicy::Unsecured => write!(f, "unsecured"),
            SecurityPolicy::AllowTls => write!(f, "allow-tls"),
            SecurityPolicy::RequireTls => write!(f, "require-tls"),
        }
    }
}

/// TLS credential configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SecurityOptions {
    /// Requirement level for client TLS.
    pub policy: SecurityPolicy,

    /// Path to the private key file (PEM).
    pub key_file: PathBuf,

    /// Path to the certificate file (PEM).
    pub certificate_file: PathBuf,

    /// Optional additional chain certificates appended to the leaf.
    pub certificate_chain_file: Option<PathBuf>,

    /// Generate a fresh private key at `key_file` instead of reading it.
    pub create_key: bool,

    /// Generate a self-signed certificate at `certificate_file` instead of
    /// reading it.
    pub create_certificate: bool,

    /// Cache file for ephemeral key-exchange parameters.
    pub key_exchange_params_file: PathBuf,
}

impl Default for SecurityOptions {
    fn default() -> Self {
        Self {
            policy: SecurityPolicy::default(),
            key_file: PathBuf::from("/etc/scribed/key.pem"),
            certificate_file: PathBuf::from("/etc/scribed/cert.pem"),
            certificate_chain_file: None,
            create_key: false,
            create_certificate: false,
            key_exchange_params_file: PathBuf::from("/etc/scribed/kx-params.bin"),
        }
    }
}

/// Document storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StorageOptions {
    /// Root of the document tree on disk.
    pub root_directory: PathBuf,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            root_directory: PathBuf::from("/var/lib/scribed/documents"),
        }
    }
}

/// Plugin configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PluginOptions {
    /// Plugin names, loaded in order.
    pub load: Vec<String>,

    /// Directory searched for plugin artifacts.
    pub directory: PathBuf,
}

impl Default for PluginOptions {
    fn default() -> Self {
        Self {
            load: Vec::new(),
            directory: PathBuf::from("/usr/lib/scribed/plugins"),
        }
    }
}

/// Directory synchronization configuration.
///
/// The sync task is enabled iff `interval_secs > 0` and `directory` is set.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct SyncOptions {
    /// Seconds between sync runs. 0 disables the task.
    pub interval_secs: u64,

    /// Target directory the document tree is mirrored into.
    pub directory: Option<PathBuf>,

    /// Command executed after each sync run.
    pub hook: Option<PathBuf>,
}

impl SyncOptions {
    /// Interval as a [`Duration`], if the task is enabled at all.
    pub fn interval(&self) -> Option<Duration> {
        if self.interval_secs > 0 {
            Some(Duration::from_secs(self.interval_secs))
        } else {
            None
        }
    }
}
