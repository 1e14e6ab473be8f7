//! In-memory network simulation for multi-node tests.

mod network;

pub use network::{Envelope, MemoryEndpoint, MemoryNetwork, NetworkMetrics};
