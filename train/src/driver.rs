//! Drives a hyperparameter search end to end: one trainer run per sampled
//! configuration, metric-based ranking, snapshot-set selection for the
//! winner, everything logged as it happens.

use crate::errors::{Result, TrainError};
use crate::loader::BatchLoader;
use crate::logfile::{LogRecord, RunLog};
use crate::selector::{rank_trajectory, select_snapshots, SnapshotSelection};
use crate::trainer::{TrainConfig, Trainer};
use crate::types::{DifferentiableModel, SnapshotPolicy, TrajectoryRecord};
use log::{info, warn};
use ndarray::{ArrayView1, ArrayView3};
use snapmix_moe::ValidationMetric;
use snapmix_search::{HpConfig, HpSampler};
use std::time::Instant;

/// Search-wide settings shared by every trial.
#[derive(Clone, Debug)]
pub struct DriverConfig {
    pub n_epochs: usize,
    pub warmup_steps: usize,
    pub decay_steps: Option<usize>,
    pub policy: SnapshotPolicy,
    pub seed: u64,
    /// Error figure used to rank trajectories and configurations
    pub metric: ValidationMetric,
    /// How many best trajectory entries average into a trial's score
    pub val_snapshot_num: usize,
    /// Epochs to discard before the bayes window opens
    pub burn_in_epoch: usize,
}

/// What a finished search hands back.
#[derive(Clone, Debug)]
pub struct SearchOutcome {
    pub best_config: HpConfig,
    pub best_score: f64,
    pub selection: SnapshotSelection,
}

/// Runs every configuration a sampler yields through a fresh trainer.
///
/// The factory owns dataset plumbing: given a configuration (its
/// `batch_size` knob in particular) it returns a fresh model and training
/// loader. The `lr` knob is mandatory and feeds the trainer's schedule.
pub struct HpSearchDriver<'a, M, F>
where
    M: DifferentiableModel,
    F: FnMut(&HpConfig) -> Result<(M, BatchLoader)>,
{
    factory: F,
    valid_x: ArrayView3<'a, f64>,
    valid_y: ArrayView1<'a, f64>,
    config: DriverConfig,
}

impl<'a, M, F> HpSearchDriver<'a, M, F>
where
    M: DifferentiableModel,
    F: FnMut(&HpConfig) -> Result<(M, BatchLoader)>,
{
    pub fn new(
        factory: F,
        valid_x: ArrayView3<'a, f64>,
        valid_y: ArrayView1<'a, f64>,
        config: DriverConfig,
    ) -> Result<HpSearchDriver<'a, M, F>> {
        if config.val_snapshot_num == 0 {
            return Err(TrainError::InvalidConfigError(
                "trial scores average at least one trajectory entry".to_string(),
            ));
        }
        Ok(HpSearchDriver {
            factory,
            valid_x,
            valid_y,
            config,
        })
    }

    /// Trial score: the chosen metric averaged over the best
    /// `val_snapshot_num` entries of the ranked trajectory.
    fn score(&self, ranked: &[TrajectoryRecord]) -> f64 {
        let k = self.config.val_snapshot_num.min(ranked.len());
        ranked[..k]
            .iter()
            .map(|r| r.valid.get(self.config.metric))
            .sum::<f64>()
            / k as f64
    }

    /// Exhausts the sampler, returning the winning configuration together
    /// with its retained snapshot step sets.
    ///
    /// Diverging trials are logged and skipped; every other error aborts the
    /// search.
    pub fn search(
        &mut self,
        sampler: &mut dyn HpSampler,
        log: &mut RunLog,
    ) -> Result<SearchOutcome> {
        let _ = env_logger::try_init();

        let mut best: Option<(HpConfig, f64, Vec<TrajectoryRecord>, usize)> = None;
        while let Some(config) = sampler.next_config() {
            let lr = config.get("lr").ok_or_else(|| {
                TrainError::InvalidConfigError("configuration carries no 'lr' knob".to_string())
            })?;
            let started = Instant::now();
            let (mut model, mut loader) = (self.factory)(&config)?;
            let batches_per_epoch = loader.n_batches();
            let train_config = TrainConfig {
                lr,
                n_epochs: self.config.n_epochs,
                warmup_steps: self.config.warmup_steps,
                decay_steps: self.config.decay_steps,
                policy: self.config.policy,
                seed: self.config.seed,
            };
            let mut trainer = Trainer::new(
                &mut model,
                &mut loader,
                self.valid_x,
                self.valid_y,
                train_config,
            )?;
            match trainer.run(None) {
                Ok(records) => {
                    let ranked = rank_trajectory(&records, self.config.metric);
                    if ranked.is_empty() {
                        continue;
                    }
                    let score = self.score(&ranked);
                    let elapsed_secs = started.elapsed().as_secs_f64();
                    log.append(&LogRecord::Trial {
                        config: config.clone(),
                        best: ranked[0],
                        elapsed_secs,
                    })?;
                    info!("trial {config}: score {score:.6} in {elapsed_secs:.2}s");
                    if score.is_finite()
                        && best.as_ref().map_or(true, |(_, s, _, _)| score < *s)
                    {
                        best = Some((config, score, ranked, batches_per_epoch));
                    }
                }
                Err(TrainError::NumericalDivergence(step)) => {
                    warn!("trial {config}: diverged at step {step}, excluded");
                    log.append(&LogRecord::NanLoss { config, step })?;
                }
                Err(e) => return Err(e),
            }
        }

        let (best_config, best_score, ranked, batches_per_epoch) = best.ok_or_else(|| {
            TrainError::InvalidConfigError("no configuration finished training".to_string())
        })?;
        let burn_in_step = (self.config.burn_in_epoch * batches_per_epoch).saturating_sub(1);
        let selection = select_snapshots(&ranked, burn_in_step);
        log.append(&LogRecord::BestConfig {
            config: best_config.clone(),
            top_steps: selection.top_steps.clone(),
            bayes_steps: selection.bayes_steps.clone(),
        })?;
        info!(
            "best {best_config}: score {best_score:.6}, {} top / {} bayes snapshots",
            selection.top_steps.len(),
            selection.bayes_steps.len()
        );
        Ok(SearchOutcome {
            best_config,
            best_score,
            selection,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ModelState;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array3};
    use snapmix_moe::{MetricTuple, MixturePrediction};
    use snapmix_search::{GridSearch, HpSpace};

    /// Quality knob fixes the validation error; a negative quality blows up
    /// the loss on the first step.
    struct Stub {
        quality: f64,
    }

    impl DifferentiableModel for Stub {
        fn train_step(
            &mut self,
            _x: &ArrayView3<f64>,
            _y: &ArrayView1<f64>,
            _lr: f64,
        ) -> Result<f64> {
            Ok(if self.quality < 0. { f64::NAN } else { 0.1 })
        }
        fn evaluate(&self, _x: &ArrayView3<f64>, _y: &ArrayView1<f64>) -> Result<MetricTuple> {
            Ok(MetricTuple {
                rmse: self.quality,
                mae: self.quality,
                mape: self.quality,
                nnllk: self.quality,
            })
        }
        fn predict(
            &self,
            _x: &ArrayView3<f64>,
            _y: &ArrayView1<f64>,
        ) -> Result<(MetricTuple, MixturePrediction)> {
            unreachable!()
        }
        fn state(&self) -> ModelState {
            ModelState { theta: vec![] }
        }
        fn restore(&mut self, _state: &ModelState) -> Result<()> {
            Ok(())
        }
    }

    fn driver_config() -> DriverConfig {
        DriverConfig {
            n_epochs: 4,
            warmup_steps: 0,
            decay_steps: None,
            policy: SnapshotPolicy::EpochEnd,
            seed: 42,
            metric: ValidationMetric::Rmse,
            val_snapshot_num: 2,
            burn_in_epoch: 2,
        }
    }

    fn dataset(n: usize) -> (Array3<f64>, Array1<f64>) {
        (Array3::zeros((n, 1, 2)), Array1::zeros(n))
    }

    #[test]
    fn test_ranking_and_divergence_handling() {
        let (vx, vy) = dataset(4);
        let factory = |config: &HpConfig| -> Result<(Stub, BatchLoader)> {
            let (x, y) = dataset(8);
            let loader = BatchLoader::new(x, y, 4, 0)?;
            Ok((
                Stub {
                    quality: config.get("quality").unwrap(),
                },
                loader,
            ))
        };
        let mut driver =
            HpSearchDriver::new(factory, vx.view(), vy.view(), driver_config()).unwrap();

        let space = HpSpace::new()
            .with_list("lr", &[0.01])
            .with_list("quality", &[0.3, 0.1, -1.0]);
        let mut sampler = GridSearch::new(&space);

        let path = std::env::temp_dir().join(format!("snapmix-drv-{}.jsonl", std::process::id()));
        let mut log = RunLog::create(&path).unwrap();
        let outcome = driver.search(&mut sampler, &mut log).unwrap();

        assert_abs_diff_eq!(outcome.best_config.get("quality").unwrap(), 0.1);
        assert_abs_diff_eq!(outcome.best_score, 0.1);
        // 8 instances, batch 4: 2 steps per epoch, records at steps 2,4,6,8;
        // burn-in step 2*2-1 = 3 keeps steps 4, 6 and 8
        assert_eq!(outcome.selection.bayes_steps, vec![4, 6, 8]);
        assert_eq!(outcome.selection.top_steps.len(), 3);

        let records = RunLog::read_back(&path).unwrap();
        let trials = records
            .iter()
            .filter(|r| matches!(r, LogRecord::Trial { .. }))
            .count();
        let nans = records
            .iter()
            .filter(|r| matches!(r, LogRecord::NanLoss { .. }))
            .count();
        let bests = records
            .iter()
            .filter(|r| matches!(r, LogRecord::BestConfig { .. }))
            .count();
        assert_eq!((trials, nans, bests), (2, 1, 1));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_lr_knob_is_fatal() {
        let (vx, vy) = dataset(2);
        let factory = |_config: &HpConfig| -> Result<(Stub, BatchLoader)> {
            let (x, y) = dataset(4);
            Ok((Stub { quality: 0.5 }, BatchLoader::new(x, y, 2, 0)?))
        };
        let mut driver =
            HpSearchDriver::new(factory, vx.view(), vy.view(), driver_config()).unwrap();
        let space = HpSpace::new().with_list("quality", &[0.5]);
        let mut sampler = GridSearch::new(&space);
        let path = std::env::temp_dir().join(format!("snapmix-drv2-{}.jsonl", std::process::id()));
        let mut log = RunLog::create(&path).unwrap();
        assert!(driver.search(&mut sampler, &mut log).is_err());
        std::fs::remove_file(&path).unwrap();
    }
}
