//! [`DifferentiableModel`] implementation over the built-in linear mixture
//! network, with finite-difference gradients on the flat parameter vector.

use crate::errors::Result;
use crate::types::{DifferentiableModel, GradientDescent, ModelState};
use finitediff::FiniteDiff;
use ndarray::{Array1, ArrayView1, ArrayView3};
use ndarray_rand::rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use snapmix_moe::{
    Expert, LinearMixtureNet, MetricTuple, MixtureOutput, MixturePrediction, MixtureValidParams,
};

pub struct MixtureModel {
    net: LinearMixtureNet,
    theta: Array1<f64>,
}

impl MixtureModel {
    /// Builds the network and seeds its parameters.
    pub fn new(params: MixtureValidParams, seed: u64) -> Result<MixtureModel> {
        let net = LinearMixtureNet::new(params)?;
        let mut rng = Xoshiro256Plus::seed_from_u64(seed);
        let theta = Array1::from(net.init_params(&mut rng));
        Ok(MixtureModel { net, theta })
    }

    pub fn n_params(&self) -> usize {
        self.net.n_params()
    }

    /// Loss as a plain function of the parameter vector, for finite
    /// differencing. Evaluation failures surface as NaN, which the training
    /// loop treats as divergence.
    fn batch_loss(
        net: &LinearMixtureNet,
        theta: &Array1<f64>,
        x: &ArrayView3<f64>,
        y: &ArrayView1<f64>,
    ) -> f64 {
        let flat = match theta.as_slice() {
            Some(s) => s,
            None => return f64::NAN,
        };
        let out = match net.forward(flat, x) {
            Ok(out) => out,
            Err(_) => return f64::NAN,
        };
        let norms = net.param_group_norms(flat);
        match net.mixture().evaluate(y, &out, &norms) {
            Ok(eval) => eval.loss,
            Err(_) => f64::NAN,
        }
    }

    fn eval_output(&self, x: &ArrayView3<f64>, y: &ArrayView1<f64>) -> Result<MixtureOutput> {
        let flat = self.theta.to_vec();
        let out = self.net.forward(&flat, x)?;
        let norms = self.net.param_group_norms(&flat);
        Ok(self.net.mixture().evaluate(y, &out, &norms)?)
    }
}

impl DifferentiableModel for MixtureModel {
    fn train_step(&mut self, x: &ArrayView3<f64>, y: &ArrayView1<f64>, lr: f64) -> Result<f64> {
        let net = &self.net;
        let f = |t: &Array1<f64>| Self::batch_loss(net, t, x, y);
        let loss = f(&self.theta);
        let grad = self.theta.central_diff(&f);
        GradientDescent.step(&mut self.theta, &grad, lr);
        Ok(loss)
    }

    fn evaluate(&self, x: &ArrayView3<f64>, y: &ArrayView1<f64>) -> Result<MetricTuple> {
        let out = self.eval_output(x, y)?;
        Ok(MetricTuple::new(y, &out.mixture_mean.view(), out.nllk))
    }

    fn predict(
        &self,
        x: &ArrayView3<f64>,
        y: &ArrayView1<f64>,
    ) -> Result<(MetricTuple, MixturePrediction)> {
        let out = self.eval_output(x, y)?;
        let metrics = MetricTuple::new(y, &out.mixture_mean.view(), out.nllk);
        Ok((metrics, out.prediction()))
    }

    fn state(&self) -> ModelState {
        ModelState {
            theta: self.theta.to_vec(),
        }
    }

    fn restore(&mut self, state: &ModelState) -> Result<()> {
        if state.theta.len() != self.net.n_params() {
            return Err(crate::errors::TrainError::InvalidConfigError(format!(
                "snapshot holds {} parameters, model has {}",
                state.theta.len(),
                self.net.n_params()
            )));
        }
        self.theta = Array1::from(state.theta.clone());
        Ok(())
    }
}
