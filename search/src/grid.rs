use crate::config::{HpConfig, HpSpace, KnobDomain};
use crate::traits::HpSampler;
use std::sync::Arc;

/// Exhaustive Cartesian-product enumeration over per-knob value lists.
///
/// Enumeration is odometer style: the last knob is incremented first and
/// overflow carries into the previous knob, so every combination is
/// produced exactly once in a fixed deterministic order. The counter is an
/// explicit index array, no recursion is involved whatever the knob count.
///
/// Range knobs are not allowed in a grid space.
pub struct GridSearch {
    names: Arc<[String]>,
    levels: Vec<Vec<f64>>,
    counter: Vec<usize>,
    exhausted: bool,
}

impl GridSearch {
    /// Builds a grid over a space made of list knobs only.
    ///
    /// **Panics** if the space is empty or contains a range knob.
    pub fn new(space: &HpSpace) -> Self {
        if space.n_knobs() == 0 {
            panic!("grid search requires at least one knob");
        }
        let levels: Vec<Vec<f64>> = space
            .domains()
            .iter()
            .zip(space.names())
            .map(|(domain, name)| match domain {
                KnobDomain::List(values) => values.clone(),
                KnobDomain::Range(..) => {
                    panic!("knob '{name}' is a range; grid search requires value lists")
                }
            })
            .collect();
        GridSearch {
            names: space.shared_names(),
            counter: vec![0; levels.len()],
            levels,
            exhausted: false,
        }
    }

    /// Total number of combinations.
    pub fn n_combinations(&self) -> usize {
        self.levels.iter().map(|l| l.len()).product()
    }

    /// Increments the counter with carry propagation.
    /// Returns false when the first knob overflows, ie the grid is done.
    fn advance(&mut self) -> bool {
        for pos in (0..self.counter.len()).rev() {
            self.counter[pos] += 1;
            if self.counter[pos] < self.levels[pos].len() {
                return true;
            }
            self.counter[pos] = 0;
        }
        false
    }
}

impl HpSampler for GridSearch {
    fn next_config(&mut self) -> Option<HpConfig> {
        if self.exhausted {
            return None;
        }
        let values = self
            .counter
            .iter()
            .zip(&self.levels)
            .map(|(&i, level)| level[i])
            .collect();
        if !self.advance() {
            self.exhausted = true;
        }
        Some(HpConfig::new(self.names.clone(), values))
    }
}
