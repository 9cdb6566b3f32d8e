use crate::config::HpConfig;

/// A strategy yielding hyperparameter configurations one at a time.
///
/// `None` signals exhaustion: either the whole space has been enumerated
/// (grid) or the trial budget has been spent (random). A strategy is not
/// resumable; restarting means building a fresh instance.
pub trait HpSampler {
    /// Returns the next configuration or `None` when the search is exhausted.
    fn next_config(&mut self) -> Option<HpConfig>;
}
