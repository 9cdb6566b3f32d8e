use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Per-knob domain: either a discrete value list (grid search)
/// or a continuous `[low, high]` range (random search).
#[derive(Clone, Debug)]
pub(crate) enum KnobDomain {
    List(Vec<f64>),
    Range(f64, f64),
}

/// An ordered set of named hyperparameter knobs defining a search space.
///
/// Knob order is the declaration order and determines both the grid
/// enumeration order and the value order within a configuration.
#[derive(Clone, Debug, Default)]
pub struct HpSpace {
    names: Vec<String>,
    domains: Vec<KnobDomain>,
}

impl HpSpace {
    /// Creates an empty space.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a knob with a discrete value list.
    ///
    /// **Panics** if `values` is empty.
    pub fn with_list(mut self, name: &str, values: &[f64]) -> Self {
        if values.is_empty() {
            panic!("knob '{name}' must have at least one value");
        }
        self.names.push(name.to_string());
        self.domains.push(KnobDomain::List(values.to_vec()));
        self
    }

    /// Adds a knob with a continuous `[low, high]` range.
    ///
    /// **Panics** if `low > high`.
    pub fn with_range(mut self, name: &str, low: f64, high: f64) -> Self {
        if low > high {
            panic!("knob '{name}' range must satisfy low <= high, got [{low}, {high}]");
        }
        self.names.push(name.to_string());
        self.domains.push(KnobDomain::Range(low, high));
        self
    }

    /// Number of knobs.
    pub fn n_knobs(&self) -> usize {
        self.names.len()
    }

    /// Knob names in declaration order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub(crate) fn domains(&self) -> &[KnobDomain] {
        &self.domains
    }

    pub(crate) fn shared_names(&self) -> Arc<[String]> {
        self.names.clone().into()
    }
}

/// One concrete hyperparameter configuration: a value per knob of its
/// originating [`HpSpace`], in knob order. Immutable once sampled.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HpConfig {
    names: Arc<[String]>,
    values: Vec<f64>,
}

impl HpConfig {
    pub(crate) fn new(names: Arc<[String]>, values: Vec<f64>) -> Self {
        HpConfig { names, values }
    }

    /// Value of the named knob, `None` if the knob does not exist.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.values[i])
    }

    /// Knob values in knob order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Knob names in knob order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Exact identity of the value tuple, usable for deduplication.
    /// Bit patterns are compared so that distinct NaN payloads or
    /// signed zeros never alias.
    pub fn value_bits(&self) -> Vec<u64> {
        self.values.iter().map(|v| v.to_bits()).collect()
    }
}

impl std::fmt::Display for HpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pairs = self
            .names
            .iter()
            .zip(&self.values)
            .map(|(n, v)| format!("{n}={v}"))
            .reduce(|acc, s| acc + ", " + &s)
            .unwrap_or_default();
        write!(f, "{{{pairs}}}")
    }
}
