//! Operation table configuration.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `shard_count` | 4 |
//! | `forward_unknown_remote` | true |
//!
//! Use [`OperationTableConfig::load`] to resolve file and environment
//! overrides, then apply any programmatic settings on top.

use crate::error::Result;
use std::path::Path;

/// Default number of table shards.
pub const DEFAULT_SHARD_COUNT: usize = 4;

/// Upper bound on table shards.
pub const MAX_SHARD_COUNT: usize = 1024;

/// Configuration for an [`OperationTable`](super::OperationTable).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationTableConfig {
    /// Number of independently locked shards.
    pub shard_count: usize,
    /// Forward a cancellation for an unknown event to the node that created
    /// the event instead of parking it locally.
    pub forward_unknown_remote: bool,
}

impl Default for OperationTableConfig {
    fn default() -> Self {
        Self {
            shard_count: DEFAULT_SHARD_COUNT,
            forward_unknown_remote: true,
        }
    }
}

impl OperationTableConfig {
    /// Resolves configuration from defaults, an optional TOML file, and the
    /// environment, in increasing order of precedence.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = file {
            super::env_config::apply_file(&mut config, path)?;
        }
        super::env_config::apply_env_overrides(&mut config)?;
        config.normalize();
        Ok(config)
    }

    /// Sets the shard count.
    #[must_use]
    pub fn with_shard_count(mut self, shard_count: usize) -> Self {
        self.shard_count = shard_count;
        self
    }

    /// Sets whether unknown remote cancellations are forwarded.
    #[must_use]
    pub fn with_forward_unknown_remote(mut self, forward: bool) -> Self {
        self.forward_unknown_remote = forward;
        self
    }

    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        self.shard_count = self.shard_count.clamp(1, MAX_SHARD_COUNT);
    }
}
