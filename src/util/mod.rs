//! Internal utilities.

pub mod det_hash;

pub use det_hash::{shard_for, DetBuildHasher, DetHashMap, DetHasher};
