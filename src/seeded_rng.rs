//! Seeded random number generation shared by the estimation tiers.
//!
//! A single seed is resolved once per fit. Every tier then draws from its own
//! ChaCha20 stream derived from that seed, so a tier's output never depends on how
//! much randomness an earlier, failed tier consumed.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Stream identifiers, one per consumer of randomness.
pub mod streams {
    /// k-means++ seeding of the HMM state means
    pub const PRIMARY: u64 = 1;
    /// k-means++ seeding of the mixture responsibilities
    pub const MIXTURE: u64 = 2;
    /// k-means++ seeding of the centroid tier
    pub const CLUSTER: u64 = 3;
    /// Uniform label draws of the degenerate tier
    pub const RANDOM: u64 = 4;
}

/// Source of reproducible per-tier generators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeededRng {
    seed: u64,
}

impl SeededRng {
    /// Resolve an optional seed. `None` draws one from OS entropy.
    pub fn new(seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(|| ChaCha20Rng::from_entropy().gen());
        Self { seed }
    }

    /// Fixed seed.
    pub fn with_seed(seed: u64) -> Self {
        Self { seed }
    }

    /// The resolved seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Independent generator for one stream of this seed.
    pub fn stream(&self, stream: u64) -> ChaCha20Rng {
        let mut rng = ChaCha20Rng::seed_from_u64(self.seed);
        rng.set_stream(stream);
        rng
    }
}
