//! Configuration subsystem: schema, loading, validation.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_options, CliOverrides, ConfigError, OptionSources};
pub use schema::{
    NetworkOptions, PluginOptions, SecurityOptions, SecurityPolicy, ServerOptions, StorageOptions,
    SyncOptions,
};
pub use validation::{validate_options, ValidationError};
