//! Configuration loading from disk.
//!
//! The loader walks an ordered list of candidate config files, parses the
//! first one that exists, applies command-line overrides, and validates the
//! result. When no candidate exists the built-in defaults apply (the daemon
//! runs fine without a config file) unless the path list was given
//! explicitly by the operator.

use std::fs;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::schema::ServerOptions;
use crate::config::validation::{validate_options, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading a config file failed.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A config file exists but is not valid TOML for the schema.
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// An explicitly named config file does not exist.
    #[error("config file not found: {}", .0.display())]
    Missing(PathBuf),

    /// The parsed options are semantically inconsistent.
    #[error("invalid configuration: {}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Where options are loaded from.
///
/// Retained by the running server so a reload re-reads the same locations.
/// Command-line overrides are deliberately *not* part of the sources: a
/// reload takes its inputs from disk only.
#[derive(Debug, Clone)]
pub struct OptionSources {
    /// Candidate config files, searched in order; the first existing file
    /// wins.
    pub config_paths: Vec<PathBuf>,

    /// Whether the paths were named explicitly by the operator. If so, a
    /// missing file is an error rather than "use defaults".
    pub explicit: bool,
}

impl OptionSources {
    /// The default search path for the daemon.
    pub fn default_paths() -> Self {
        Self {
            config_paths: vec![
                PathBuf::from("/etc/scribed/scribed.toml"),
                PathBuf::from("scribed.toml"),
            ],
            explicit: false,
        }
    }

    /// Sources for operator-named config files.
    pub fn explicit(paths: Vec<PathBuf>) -> Self {
        Self {
            config_paths: paths,
            explicit: true,
        }
    }
}

/// Command-line overrides applied on top of the loaded file.
///
/// Only honored at initial startup; a reload passes the default (empty)
/// overrides.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub port: Option<u16>,
    pub root_directory: Option<PathBuf>,
    pub password: Option<String>,
}

/// Load and validate server options.
pub fn load_options(
    sources: &OptionSources,
    overrides: &CliOverrides,
) -> Result<ServerOptions, ConfigError> {
    let mut options = ServerOptions::default();

    match sources.config_paths.iter().find(|p| p.exists()) {
        Some(path) => {
            let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            options = toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
            options.config_path = Some(path.clone());
            tracing::debug!(path = %path.display(), "Config file loaded");
        }
        None if sources.explicit => {
            return Err(ConfigError::Missing(
                sources
                    .config_paths
                    .first()
                    .cloned()
                    .unwrap_or_default(),
            ));
        }
        None => {
            tracing::debug!("No config file found, using defaults");
        }
    }

    if let Some(port) = overrides.port {
        options.network.port = port;
    }
    if let Some(root) = &overrides.root_directory {
        options.storage.root_directory = root.clone();
    }
    if let Some(password) = &overrides.password {
        options.password = Some(password.clone());
    }

    validate_options(&options).map_err(ConfigError::Validation)?;

    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sources_for(path: &std::path::Path) -> OptionSources {
        OptionSources::explicit(vec![path.to_path_buf()])
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let sources = sources_for(std::path::Path::new("/nonexistent/scribed.toml"));
        let err = load_options(&sources, &CliOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn test_load_missing_default_file_uses_defaults() {
        let sources = OptionSources {
            config_paths: vec![PathBuf::from("/nonexistent/scribed.toml")],
            explicit: false,
        };
        let options = load_options(&sources, &CliOverrides::default()).unwrap();
        assert_eq!(options.network.port, 6523);
        assert!(options.config_path.is_none());
    }

    #[test]
    fn test_load_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[network\nport = {}", 7).unwrap();

        let err = load_options(&sources_for(file.path()), &CliOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_overrides_win_over_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[network]\nport = 7000").unwrap();

        let overrides = CliOverrides {
            port: Some(7001),
            ..Default::default()
        };
        let options = load_options(&sources_for(file.path()), &overrides).unwrap();
        assert_eq!(options.network.port, 7001);
        assert_eq!(options.config_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_validation_failure_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[network]\nport = 0").unwrap();

        let err = load_options(&sources_for(file.path()), &CliOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }
}
