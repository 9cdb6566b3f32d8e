//! Picks which optimizer steps to keep as ensemble members: the validation
//! top performers and the post-burn-in tail.

use crate::trainer::SnapshotSets;
use crate::types::TrajectoryRecord;
use snapmix_moe::ValidationMetric;

/// Trajectory sorted by a validation error figure, best first. NaN entries
/// sink to the end.
pub fn rank_trajectory(
    records: &[TrajectoryRecord],
    metric: ValidationMetric,
) -> Vec<TrajectoryRecord> {
    let mut ranked = records.to_vec();
    ranked.sort_by(|a, b| a.valid.get(metric).total_cmp(&b.valid.get(metric)));
    ranked
}

/// The two retained step sets, each in chronological order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SnapshotSelection {
    pub top_steps: Vec<usize>,
    pub bayes_steps: Vec<usize>,
    pub top_epochs: Vec<usize>,
    pub bayes_epochs: Vec<usize>,
}

impl SnapshotSelection {
    /// Epoch sets in the form the trainer consumes.
    pub fn sets(&self) -> SnapshotSets {
        SnapshotSets {
            top_epochs: self.top_epochs.iter().copied().collect(),
            bayes_epochs: self.bayes_epochs.iter().copied().collect(),
        }
    }
}

/// Selects ensemble members from a metric-ranked trajectory.
///
/// The bayes set is every recorded step at or past the burn-in; the top set
/// is the first `|bayes|` entries of the ranking. Both come back in
/// chronological order. An empty trajectory yields empty sets.
pub fn select_snapshots(ranked: &[TrajectoryRecord], burn_in_step: usize) -> SnapshotSelection {
    let mut bayes: Vec<&TrajectoryRecord> =
        ranked.iter().filter(|r| r.step >= burn_in_step).collect();
    bayes.sort_by_key(|r| r.step);

    let mut top: Vec<&TrajectoryRecord> = ranked.iter().take(bayes.len()).collect();
    top.sort_by_key(|r| r.step);

    SnapshotSelection {
        top_steps: top.iter().map(|r| r.step).collect(),
        bayes_steps: bayes.iter().map(|r| r.step).collect(),
        top_epochs: top.iter().map(|r| r.epoch).collect(),
        bayes_epochs: bayes.iter().map(|r| r.epoch).collect(),
    }
}
