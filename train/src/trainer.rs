//! Epoch/batch training loop with learning-rate warm-up, staircase decay and
//! snapshot saving on retained epochs.

use crate::errors::{Result, TrainError};
use crate::loader::BatchLoader;
use crate::persistence::Persistence;
use crate::types::{DifferentiableModel, SnapshotKind, SnapshotPolicy, TrajectoryRecord};
use log::{debug, info};
use ndarray::{ArrayView1, ArrayView3};
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use std::collections::HashSet;

const DECAY_RATE: f64 = 0.96;

/// Epochs whose batches get their parameters checkpointed.
#[derive(Clone, Debug, Default)]
pub struct SnapshotSets {
    pub top_epochs: HashSet<usize>,
    pub bayes_epochs: HashSet<usize>,
}

impl SnapshotSets {
    pub fn kind(&self, epoch: usize) -> Option<SnapshotKind> {
        match (
            self.top_epochs.contains(&epoch),
            self.bayes_epochs.contains(&epoch),
        ) {
            (true, true) => Some(SnapshotKind::Both),
            (true, false) => Some(SnapshotKind::Top),
            (false, true) => Some(SnapshotKind::Bayes),
            (false, false) => None,
        }
    }
}

/// Loop hyperparameters.
#[derive(Clone, Debug)]
pub struct TrainConfig {
    /// Base learning rate
    pub lr: f64,
    pub n_epochs: usize,
    /// Linear warm-up length in optimizer steps, 0 to disable
    pub warmup_steps: usize,
    /// Staircase decay interval in optimizer steps, `None` to disable
    pub decay_steps: Option<usize>,
    pub policy: SnapshotPolicy,
    /// Seed of the batch-wise validation coin
    pub seed: u64,
}

impl TrainConfig {
    /// Learning rate at a 1-based optimizer step: staircase exponential
    /// decay, overridden by the linear warm-up while it lasts.
    pub fn learning_rate(&self, step: usize) -> f64 {
        let decayed = match self.decay_steps {
            Some(ds) => self.lr * DECAY_RATE.powi((step / ds) as i32),
            None => self.lr,
        };
        if step <= self.warmup_steps {
            self.lr * step as f64 / self.warmup_steps as f64
        } else {
            decayed
        }
    }

    fn check(&self) -> Result<()> {
        if !(self.lr.is_finite() && self.lr > 0.) {
            return Err(TrainError::InvalidConfigError(format!(
                "learning rate must be finite and positive, got {}",
                self.lr
            )));
        }
        if self.n_epochs == 0 {
            return Err(TrainError::InvalidConfigError(
                "need at least one epoch".to_string(),
            ));
        }
        if self.decay_steps == Some(0) {
            return Err(TrainError::InvalidConfigError(
                "decay interval must be at least 1 step".to_string(),
            ));
        }
        if let SnapshotPolicy::BatchWise(p) = self.policy {
            if !(0. ..=1.).contains(&p) {
                return Err(TrainError::InvalidConfigError(format!(
                    "batch-wise validation probability must be in [0, 1], got {p}"
                )));
            }
        }
        Ok(())
    }
}

/// Strictly sequential trainer over one model and one training split.
pub struct Trainer<'a, M: DifferentiableModel> {
    model: &'a mut M,
    loader: &'a mut BatchLoader,
    valid_x: ArrayView3<'a, f64>,
    valid_y: ArrayView1<'a, f64>,
    config: TrainConfig,
    rng: Xoshiro256Plus,
}

impl<'a, M: DifferentiableModel> Trainer<'a, M> {
    pub fn new(
        model: &'a mut M,
        loader: &'a mut BatchLoader,
        valid_x: ArrayView3<'a, f64>,
        valid_y: ArrayView1<'a, f64>,
        config: TrainConfig,
    ) -> Result<Trainer<'a, M>> {
        config.check()?;
        if valid_y.len() != valid_x.shape()[0] || valid_y.is_empty() {
            return Err(TrainError::InvalidConfigError(format!(
                "validation split: {} inputs, {} targets",
                valid_x.shape()[0],
                valid_y.len()
            )));
        }
        let rng = Xoshiro256Plus::seed_from_u64(config.seed);
        Ok(Trainer {
            model,
            loader,
            valid_x,
            valid_y,
            config,
            rng,
        })
    }

    fn record(&self, step: usize, epoch: usize) -> Result<TrajectoryRecord> {
        let (tx, ty) = self.loader.data();
        let train = self.model.evaluate(&tx, &ty)?;
        let valid = self.model.evaluate(&self.valid_x, &self.valid_y)?;
        Ok(TrajectoryRecord {
            step,
            epoch,
            train,
            valid,
        })
    }

    /// Runs the configured number of epochs; when `snapshots` is given,
    /// parameters are checkpointed after every batch of a retained epoch.
    ///
    /// Returns the trajectory, or [`TrainError::NumericalDivergence`] as
    /// soon as an epoch's monitored loss stops being finite.
    pub fn run(
        &mut self,
        mut snapshots: Option<(&SnapshotSets, &mut dyn Persistence)>,
    ) -> Result<Vec<TrajectoryRecord>> {
        let _ = env_logger::try_init();

        let mut records = Vec::new();
        let mut step = 0usize;
        for epoch in 0..self.config.n_epochs {
            self.loader.reshuffle();
            let mut epoch_loss = 0.;
            let mut n_batches = 0usize;
            while let Some(batch) = self.loader.one_batch() {
                step += 1;
                let lr = self.config.learning_rate(step);
                let loss = self
                    .model
                    .train_step(&batch.x.view(), &batch.y.view(), lr)?;
                epoch_loss += loss;
                n_batches += 1;

                if let SnapshotPolicy::BatchWise(p) = self.config.policy {
                    if self.rng.gen::<f64>() < p && !batch.is_last {
                        records.push(self.record(step, epoch)?);
                    }
                }
                if let Some((sets, store)) = snapshots.as_mut() {
                    if let Some(kind) = sets.kind(epoch) {
                        store.save(step, &self.model.state())?;
                        debug!("saved {kind:?} snapshot at step {step} (epoch {epoch})");
                    }
                }
            }

            let epoch_mean = epoch_loss / n_batches as f64;
            if !epoch_mean.is_finite() {
                return Err(TrainError::NumericalDivergence(step));
            }
            let rec = self.record(step, epoch)?;
            info!(
                "epoch {epoch}: loss {epoch_mean:.6}, valid rmse {:.6}, valid nnllk {:.6}",
                rec.valid.rmse, rec.valid.nnllk
            );
            records.push(rec);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MixtureModel;
    use crate::persistence::MemoryPersistence;
    use crate::types::ModelState;
    use approx::assert_abs_diff_eq;
    use linfa::ParamGuard;
    use ndarray::{Array1, Array3, Axis};
    use snapmix_moe::{LossFamily, MetricTuple, MixtureParams, MixturePrediction, RegulSpec};

    fn config(n_epochs: usize) -> TrainConfig {
        TrainConfig {
            lr: 0.05,
            n_epochs,
            warmup_steps: 0,
            decay_steps: None,
            policy: SnapshotPolicy::EpochEnd,
            seed: 42,
        }
    }

    fn toy_data(n: usize) -> (Array3<f64>, Array1<f64>) {
        let x = Array3::from_shape_fn((n, 2, 3), |(i, j, k)| {
            ((i * 7 + j * 3 + k) % 11) as f64 / 11.0
        });
        let y = x.mean_axis(Axis(2)).unwrap().mean_axis(Axis(1)).unwrap();
        (x, y)
    }

    fn toy_model() -> MixtureModel {
        let params = MixtureParams::new(2, 3)
            .loss(LossFamily::Mse)
            .regul(RegulSpec::empty())
            .check()
            .unwrap();
        MixtureModel::new(params, 42).unwrap()
    }

    #[test]
    fn test_warmup_overrides_decay() {
        let cfg = TrainConfig {
            lr: 0.1,
            warmup_steps: 10,
            decay_steps: Some(20),
            ..config(1)
        };
        assert_abs_diff_eq!(cfg.learning_rate(5), 0.05, epsilon = 1e-12);
        assert_abs_diff_eq!(cfg.learning_rate(10), 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(cfg.learning_rate(45), 0.1 * 0.96 * 0.96, epsilon = 1e-12);
    }

    #[test]
    fn test_no_decay_without_interval() {
        let cfg = config(1);
        assert_abs_diff_eq!(cfg.learning_rate(1_000), 0.05, epsilon = 1e-12);
    }

    #[test]
    fn test_epoch_records_and_steps() {
        let (x, y) = toy_data(12);
        let (vx, vy) = toy_data(6);
        let mut model = toy_model();
        let mut loader = BatchLoader::new(x, y, 4, 1).unwrap();
        let mut trainer =
            Trainer::new(&mut model, &mut loader, vx.view(), vy.view(), config(3)).unwrap();
        let records = trainer.run(None).unwrap();
        assert_eq!(records.len(), 3);
        // 3 batches per epoch
        assert_eq!(
            records.iter().map(|r| r.step).collect::<Vec<_>>(),
            vec![3, 6, 9]
        );
        assert_eq!(
            records.iter().map(|r| r.epoch).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_snapshots_saved_on_retained_epochs() {
        let (x, y) = toy_data(12);
        let (vx, vy) = toy_data(6);
        let mut model = toy_model();
        let mut loader = BatchLoader::new(x, y, 4, 1).unwrap();
        let mut trainer =
            Trainer::new(&mut model, &mut loader, vx.view(), vy.view(), config(3)).unwrap();
        let sets = SnapshotSets {
            top_epochs: [1].into_iter().collect(),
            bayes_epochs: [1, 2].into_iter().collect(),
        };
        let mut store = MemoryPersistence::new();
        trainer.run(Some((&sets, &mut store))).unwrap();
        // epochs 1 and 2 retained, 3 batches each
        assert_eq!(store.steps(), vec![4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_divergence_aborts_run() {
        struct Exploding;
        impl DifferentiableModel for Exploding {
            fn train_step(
                &mut self,
                _x: &ArrayView3<f64>,
                _y: &ArrayView1<f64>,
                _lr: f64,
            ) -> Result<f64> {
                Ok(f64::NAN)
            }
            fn evaluate(&self, _x: &ArrayView3<f64>, _y: &ArrayView1<f64>) -> Result<MetricTuple> {
                unreachable!("diverges before the epoch record")
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

        let (x, y) = toy_data(8);
        let (vx, vy) = toy_data(4);
        let mut model = Exploding;
        let mut loader = BatchLoader::new(x, y, 4, 1).unwrap();
        let mut trainer =
            Trainer::new(&mut model, &mut loader, vx.view(), vy.view(), config(2)).unwrap();
        match trainer.run(None) {
            Err(TrainError::NumericalDivergence(step)) => assert_eq!(step, 2),
            other => panic!("expected divergence, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_config_rejected() {
        let (x, y) = toy_data(8);
        let (vx, vy) = toy_data(4);
        let mut model = toy_model();
        let mut loader = BatchLoader::new(x, y, 4, 1).unwrap();
        let cfg = TrainConfig {
            lr: -1.0,
            ..config(1)
        };
        assert!(Trainer::new(&mut model, &mut loader, vx.view(), vy.view(), cfg).is_err());
    }
}
