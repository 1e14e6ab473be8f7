//! Operation tracking runtime.
//!
//! - [`config`]: Table configuration types
//! - [`env_config`]: Environment and config file overrides
//! - [`operation_table`]: Sharded event-to-operation map and cancellation routing

pub mod config;
pub mod env_config;
pub mod operation_table;

pub use config::OperationTableConfig;
pub use env_config::ConfigError;
pub use operation_table::{CancelOutcome, OperationTable, OperationTableMetrics};
