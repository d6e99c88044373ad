//! Deterministic random streams
//!
//! A run owns one master [`Seed`]. Every independent unit of work (one
//! warehouse/store/category stream, one region's weather, one virtual-store
//! split) derives its own seed from the master and a textual key, so the
//! output does not depend on which worker thread handles which unit or in
//! what order.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// A seed for deterministic random number generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Seed(u64);

impl Seed {
    /// Create a new seed with the given value
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the underlying seed value
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Create a ChaCha8 generator from this seed
    #[must_use]
    pub fn to_rng(&self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.0)
    }

    /// Derive an independent seed for a named sub-stream.
    ///
    /// The mixing is FNV-1a over the key bytes followed by a splitmix64
    /// finalizer, so it is identical on every platform and toolchain.
    #[must_use]
    pub fn derive(&self, key: &str) -> Self {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325 ^ self.0;
        for byte in key.as_bytes() {
            h ^= u64::from(*byte);
            h = h.wrapping_mul(0x0100_0000_01b3);
        }
        Self(splitmix64(h))
    }
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

impl Default for Seed {
    fn default() -> Self {
        Self::new(42)
    }
}

impl From<u64> for Seed {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}
