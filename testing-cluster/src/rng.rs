// File: testing-cluster/src/rng.rs
//
// Seeded RNG for the simulated network.
//
// Gossip jitter is the only randomness in the harness. It flows through
// TestRng so a flaky convergence run can be replayed with the same seed.

use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Environment variable holding a hex seed for replay
pub const SEED_ENV_VAR: &str = "TOS_CLUSTER_SEED";

/// Shared, seeded random source.
///
/// ```bash
/// TOS_CLUSTER_SEED=0xa3f5c8e1b2d94706 cargo test concurrent_deploys
/// ```
pub struct TestRng {
    inner: Mutex<StdRng>,
    seed: u64,
}

impl TestRng {
    /// Create a TestRng with an explicit seed
    pub fn with_seed(seed: u64) -> Self {
        Self {
            inner: Mutex::new(StdRng::seed_from_u64(seed)),
            seed,
        }
    }

    /// Seed from `TOS_CLUSTER_SEED` if set, otherwise randomly; logs the seed
    pub fn new_from_env_or_random() -> Self {
        let seed = std::env::var(SEED_ENV_VAR)
            .ok()
            .and_then(|s| parse_seed(&s))
            .unwrap_or_else(|| rand::thread_rng().gen());

        if log::log_enabled!(log::Level::Info) {
            log::info!(
                "TestRng seed: 0x{:016x} (replay with {}=0x{:016x})",
                seed,
                SEED_ENV_VAR,
                seed
            );
        }

        Self::with_seed(seed)
    }

    /// Seed in use
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Random value in the given range
    pub fn gen_range<T, R>(&self, range: R) -> T
    where
        T: rand::distributions::uniform::SampleUniform,
        R: rand::distributions::uniform::SampleRange<T>,
    {
        self.inner.lock().gen_range(range)
    }
}

/// Accepts `0x`-prefixed or bare hex
fn parse_seed(raw: &str) -> Option<u64> {
    let trimmed = raw.trim().trim_start_matches("0x");
    u64::from_str_radix(trimmed, 16).ok()
}
