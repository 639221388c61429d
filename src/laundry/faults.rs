//! Simulated hardware faults.

use parking_lot::Mutex;
use rand::{random, rngs::StdRng, Rng, SeedableRng};

/// Decides, between task phases, whether the simulated hardware fails.
///
/// Seeded from configuration so fault sequences are reproducible.
#[derive(Debug)]
pub struct FaultSource {
    probability: f64,
    rng: Mutex<StdRng>,
}

impl FaultSource {
    pub fn new(probability: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::seed_from_u64(random()),
        };
        Self {
            probability: probability.clamp(0.0, 1.0),
            rng: Mutex::new(rng),
        }
    }

    /// A source that never faults.
    pub fn never() -> Self {
        Self::new(0.0, Some(0))
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    pub fn should_fault(&self) -> bool {
        if self.probability <= 0.0 {
            return false;
        }
        self.rng.lock().random_bool(self.probability)
    }
}
