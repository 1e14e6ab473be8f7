//! Environment variable and config file support for [`OperationTableConfig`].
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via `with_*` methods after loading
//! 2. **Environment variables**: values from `OPTRACK_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults**: built-in defaults from [`OperationTableConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `OPTRACK_TABLE_SHARDS` | `usize` | `shard_count` |
//! | `OPTRACK_FORWARD_UNKNOWN_REMOTE` | `bool` | `forward_unknown_remote` |

use crate::error::{Error, ErrorKind};
use crate::runtime::config::OperationTableConfig;
use std::path::Path;
use thiserror::Error as ThisError;

/// Environment variable name for the table shard count.
pub const ENV_TABLE_SHARDS: &str = "OPTRACK_TABLE_SHARDS";
/// Environment variable name for unknown-remote forwarding.
pub const ENV_FORWARD_UNKNOWN_REMOTE: &str = "OPTRACK_FORWARD_UNKNOWN_REMOTE";

/// Errors raised while reading configuration.
#[derive(Debug, ThisError)]
pub enum ConfigError {
    /// An environment variable held a value of the wrong type.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Expected type description.
        expected: &'static str,
        /// The rejected value.
        value: String,
    },
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// File path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The config file is not valid TOML for this schema.
    #[error("failed to parse TOML config: {0}")]
    Parse(String),
    /// A config file was given but file support is compiled out.
    #[error("config file support requires the `config-file` feature")]
    FileSupportDisabled,
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::new(ErrorKind::InvalidConfig)
            .with_message(err.to_string())
            .with_source(err)
    }
}

/// Apply environment variable overrides to an [`OperationTableConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut OperationTableConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_TABLE_SHARDS) {
        config.shard_count = parse_usize(ENV_TABLE_SHARDS, &val)?;
    }
    if let Some(val) = read_env(ENV_FORWARD_UNKNOWN_REMOTE) {
        config.forward_unknown_remote = parse_bool(ENV_FORWARD_UNKNOWN_REMOTE, &val)?;
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidValue {
            var,
            expected: "unsigned integer",
            value: val.to_string(),
        })
}

fn parse_bool(var: &'static str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            expected: "bool (true/false/1/0/yes/no)",
            value: val.to_string(),
        }),
    }
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable table configuration.
///
/// ```toml
/// [table]
/// shards = 8
/// forward_unknown_remote = false
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct TableTomlConfig {
    /// Table settings.
    #[serde(default)]
    pub table: TableToml,
}

/// Table section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct TableToml {
    /// Number of shards.
    pub shards: Option<usize>,
    /// Forward unknown remote cancellations to the event's creator.
    pub forward_unknown_remote: Option<bool>,
}

/// Apply a parsed TOML config to an [`OperationTableConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut OperationTableConfig, toml: &TableTomlConfig) {
    if let Some(v) = toml.table.shards {
        config.shard_count = v;
    }
    if let Some(v) = toml.table.forward_unknown_remote {
        config.forward_unknown_remote = v;
    }
}

/// Parse a TOML string into a [`TableTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<TableTomlConfig, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Read and parse a TOML file into a [`TableTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &Path) -> Result<TableTomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_toml_str(&content)
}

#[cfg(feature = "config-file")]
pub(crate) fn apply_file(config: &mut OperationTableConfig, path: &Path) -> Result<(), ConfigError> {
    let parsed = parse_toml_file(path)?;
    apply_toml_config(config, &parsed);
    Ok(())
}

#[cfg(not(feature = "config-file"))]
pub(crate) fn apply_file(_config: &mut OperationTableConfig, _path: &Path) -> Result<(), ConfigError> {
    Err(ConfigError::FileSupportDisabled)
}

// =========================================================================
// Tests
// =========================================================================
