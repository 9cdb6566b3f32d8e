//! This library implements hyperparameter space enumeration for snapmix.
//!
//! A hyperparameter space is an ordered set of named knobs. Two
//! enumeration strategies are provided, both exposing a single
//! `next_config()` operation which yields configurations until the
//! search is exhausted:
//!
//! * [`GridSearch`]: exhaustive Cartesian product over per-knob discrete
//!   value lists, enumerated by an iterative odometer counter in a fixed
//!   deterministic order,
//! * [`RandomSearch`]: a bounded number of trials where each knob value is
//!   drawn uniformly from a `[low, high]` range; exact duplicates are
//!   rejected and redrawn so one search run never yields the same
//!   configuration twice.
//!
//! Searches are finite and restartable only by constructing a fresh
//! instance; there is no resuming of a partially consumed search.
//!
//! # Example
//!
//! ```
//! use snapmix_search::{HpSpace, GridSearch, HpSampler};
//!
//! let space = HpSpace::new()
//!     .with_list("lr", &[0.001])
//!     .with_list("batch_size", &[16., 32., 64.]);
//! let mut grid = GridSearch::new(&space);
//! let mut count = 0;
//! while let Some(config) = grid.next_config() {
//!     assert_eq!(config.get("lr"), Some(0.001));
//!     count += 1;
//! }
//! assert_eq!(count, 3);
//! ```
mod config;
mod grid;
mod random;
mod traits;

pub use crate::config::{HpConfig, HpSpace};
pub use crate::grid::GridSearch;
pub use crate::random::RandomSearch;
pub use crate::traits::HpSampler;
