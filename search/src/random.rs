use crate::config::{HpConfig, HpSpace, KnobDomain};
use crate::traits::HpSampler;
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use std::collections::HashSet;
use std::sync::Arc;

/// Random attempts per trial before giving up finding an unseen tuple.
/// On continuous ranges a collision is virtually impossible; the bound
/// matters for degenerate ranges where low == high.
const MAX_REDRAWS: usize = 100;

/// Bounded random search with exact-tuple deduplication.
///
/// Each trial draws one value per knob uniformly within its range. A trial
/// whose exact value tuple was already produced is rejected and redrawn, so
/// a single run never yields duplicates. When a fresh tuple cannot be found
/// (eg every knob range is a single point) the search stops early and
/// yields fewer trials than requested rather than erroring.
pub struct RandomSearch<R: Rng> {
    names: Arc<[String]>,
    ranges: Vec<(f64, f64)>,
    n_trials: usize,
    cur_trial: usize,
    seen: HashSet<Vec<u64>>,
    rng: R,
}

impl RandomSearch<Xoshiro256Plus> {
    /// Builds a random search over a space made of range knobs only,
    /// with a default seeded generator.
    pub fn new(space: &HpSpace, n_trials: usize) -> Self {
        Self::new_with_rng(space, n_trials, Xoshiro256Plus::seed_from_u64(42))
    }
}

impl<R: Rng> RandomSearch<R> {
    /// Builds a random search with a caller-supplied generator for
    /// reproducibility.
    ///
    /// **Panics** if the space is empty or contains a list knob. A list
    /// knob `[v]` can be expressed as the degenerate range `[v, v]`.
    pub fn new_with_rng(space: &HpSpace, n_trials: usize, rng: R) -> Self {
        if space.n_knobs() == 0 {
            panic!("random search requires at least one knob");
        }
        let ranges: Vec<(f64, f64)> = space
            .domains()
            .iter()
            .zip(space.names())
            .map(|(domain, name)| match domain {
                KnobDomain::Range(low, high) => (*low, *high),
                KnobDomain::List(_) => {
                    panic!("knob '{name}' is a list; random search requires [low, high] ranges")
                }
            })
            .collect();
        RandomSearch {
            names: space.shared_names(),
            ranges,
            n_trials,
            cur_trial: 0,
            seen: HashSet::new(),
            rng,
        }
    }

    fn draw(&mut self) -> Vec<f64> {
        self.ranges
            .iter()
            .map(|&(low, high)| low + (high - low) * self.rng.gen::<f64>())
            .collect()
    }
}

impl<R: Rng> HpSampler for RandomSearch<R> {
    fn next_config(&mut self) -> Option<HpConfig> {
        if self.cur_trial >= self.n_trials {
            return None;
        }
        for _ in 0..MAX_REDRAWS {
            let values = self.draw();
            let bits: Vec<u64> = values.iter().map(|v| v.to_bits()).collect();
            if self.seen.insert(bits) {
                self.cur_trial += 1;
                return Some(HpConfig::new(self.names.clone(), values));
            }
        }
        // degraded exhaustion: the space cannot provide a fresh tuple
        self.cur_trial = self.n_trials;
        None
    }
}
