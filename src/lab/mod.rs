//! Test harness for multi-node scenarios.
//!
//! The lab provides:
//!
//! - An in-memory network connecting several operation tables
//! - Crash injection for unreachable nodes
//! - Explicit, caller-driven message delivery

pub mod network;

pub use network::{MemoryEndpoint, MemoryNetwork, NetworkMetrics};
