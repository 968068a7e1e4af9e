//! Plugin management.
//!
//! The manager resolves each configured plugin against the plugin directory
//! and picks up its `[plugin.<name>]` parameter table from the config file.
//! Plugin internals (what a loaded plugin actually does) live in the plugin
//! artifacts themselves; the manager owns their lifecycle.
//!
//! A reload builds a complete replacement manager against the existing
//! document directory and only swaps it in once the whole reload is
//! committed.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::directory::DocumentDirectory;

/// Counter distinguishing manager generations in traces.
static MANAGER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Plugin-manager construction failures.
#[derive(Debug, Error)]
pub enum PluginError {
    /// A configured plugin has no artifact in the plugin directory.
    #[error("plugin '{name}' not found in {}", search_path.display())]
    NotFound { name: String, search_path: PathBuf },

    /// The config file's plugin tables cannot be read.
    #[error("failed to read plugin configuration from {}: {message}", path.display())]
    Config { path: PathBuf, message: String },
}

/// One resolved plugin.
#[derive(Debug, Clone)]
pub struct PluginHandle {
    name: String,
    artifact: PathBuf,
    parameters: toml::Table,
}

impl PluginHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    pub fn parameters(&self) -> &toml::Table {
        &self.parameters
    }
}

/// The set of loaded plugins for one configuration generation.
pub struct PluginManager {
    id: u64,
    directory: Arc<DocumentDirectory>,
    plugins: Vec<PluginHandle>,
}

impl PluginManager {
    /// Resolve and load the configured plugin set.
    ///
    /// All-or-nothing: the first unresolvable plugin fails the whole build,
    /// and nothing built here touches any currently running manager.
    pub fn build(
        directory: Arc<DocumentDirectory>,
        plugin_dir: &Path,
        names: &[String],
        config_path: Option<&Path>,
    ) -> Result<PluginManager, PluginError> {
        let parameter_tables = match config_path {
            Some(path) if !names.is_empty() => read_plugin_tables(path)?,
            _ => toml::Table::new(),
        };

        let id = MANAGER_ID_COUNTER.fetch_add(1, Ordering::Relaxed);

        let mut plugins = Vec::with_capacity(names.len());
        for name in names {
            let artifact = plugin_dir.join(format!("libscribed-{name}.so"));
            if !artifact.is_file() {
                return Err(PluginError::NotFound {
                    name: name.clone(),
                    search_path: plugin_dir.to_path_buf(),
                });
            }

            let parameters = match parameter_tables.get(name.as_str()) {
                Some(toml::Value::Table(table)) => table.clone(),
                _ => toml::Table::new(),
            };

            tracing::debug!(
                manager_id = id,
                plugin = %name,
                artifact = %artifact.display(),
                "Plugin resolved"
            );
            plugins.push(PluginHandle {
                name: name.clone(),
                artifact,
                parameters,
            });
        }

        Ok(PluginManager {
            id,
            directory,
            plugins,
        })
    }

    /// Generation id, unique per built manager.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Names of the loaded plugins, in load order.
    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name.as_str()).collect()
    }

    /// Look up a loaded plugin.
    pub fn plugin(&self, name: &str) -> Option<&PluginHandle> {
        self.plugins.iter().find(|p| p.name == name)
    }

    /// The document directory the plugins operate on.
    pub fn directory(&self) -> &Arc<DocumentDirectory> {
        &self.directory
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("plugins", &self.plugin_names())
            .finish()
    }
}

fn read_plugin_tables(path: &Path) -> Result<toml::Table, PluginError> {
    let content = fs::read_to_string(path).map_err(|e| PluginError::Config {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let table: toml::Table = content.parse().map_err(|e: toml::de::Error| PluginError::Config {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    match table.get("plugin") {
        Some(toml::Value::Table(plugins)) => Ok(plugins.clone()),
        _ => Ok(toml::Table::new()),
    }
}
