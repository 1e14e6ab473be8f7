//! Deterministic hashing for shard selection.
//!
//! Events must land on the same shard across runs and across nodes so that
//! diagnostics and tests are reproducible; std's `RandomState` would reseed
//! every process.

use std::hash::{BuildHasher, Hash, Hasher};

/// Deterministic, non-cryptographic hasher.
#[derive(Debug, Clone)]
pub struct DetHasher {
    state: u64,
}

impl DetHasher {
    const SEED: u64 = 0x16f1_1fe8_9b0d_677c;
    const MULTIPLIER: u64 = 0x517c_c1b7_2722_0a95;
}

impl Default for DetHasher {
    fn default() -> Self {
        Self { state: Self::SEED }
    }
}

impl Hasher for DetHasher {
    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state = self.state.wrapping_mul(Self::MULTIPLIER);
            self.state ^= u64::from(byte);
        }
    }

    fn write_u32(&mut self, i: u32) {
        self.state = self.state.wrapping_mul(Self::MULTIPLIER) ^ u64::from(i);
    }

    fn write_u64(&mut self, i: u64) {
        self.state = self.state.wrapping_mul(Self::MULTIPLIER) ^ i;
    }

    fn finish(&self) -> u64 {
        // fmix64 finalizer
        let mut h = self.state;
        h ^= h >> 33;
        h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
        h ^= h >> 33;
        h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
        h ^= h >> 33;
        h
    }
}

/// Builder for deterministic hashers.
#[derive(Clone, Copy, Debug, Default)]
pub struct DetBuildHasher;

impl BuildHasher for DetBuildHasher {
    type Hasher = DetHasher;

    fn build_hasher(&self) -> Self::Hasher {
        DetHasher::default()
    }
}

/// `HashMap` keyed with [`DetHasher`].
pub type DetHashMap<K, V> = std::collections::HashMap<K, V, DetBuildHasher>;

/// Returns the shard in `0..shard_count` that owns `key`.
///
/// `shard_count` must be non-zero.
#[must_use]
pub fn shard_for<K: Hash + ?Sized>(key: &K, shard_count: usize) -> usize {
    debug_assert!(shard_count > 0, "shard_count must be non-zero");
    let hash = DetBuildHasher.hash_one(key);
    (hash % shard_count as u64) as usize
}
