//! Reference linear expert: one mean/variance/gate head triple per source
//! over the flattened history window, all parameters in a single flat vector
//! so optimizers can treat the model as a black-box function of `theta`.

use crate::errors::{MixtureError, Result};
use crate::expert::{Expert, ExpertOutput, ParamGroupNorms};
use crate::parameters::MixtureValidParams;
use crate::types::{BiasSpec, LatentDependence, LatentProbType, LossFamily, ModelFamily, RegulSpec};
use log::debug;
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView3};
use ndarray_rand::rand::Rng;

/// Offsets of each parameter group in the flat vector.
#[derive(Clone, Debug)]
struct ParamLayout {
    n_sources: usize,
    window: usize,
    /// Gate head input width: `window` without dependence, `window - 1`
    /// when the head runs on current/previous sub-windows.
    gate_window: usize,
    mean_w: usize,
    mean_b: Option<usize>,
    var_w: usize,
    var_b: Option<usize>,
    gate_w: usize,
    gate_b: Option<usize>,
    /// Free per-source precision pre-activations (homoscedastic family)
    homo_var: Option<usize>,
    global_bias: Option<usize>,
    global_logits: Option<usize>,
    latent: Option<(usize, usize)>,
    total: usize,
}

impl ParamLayout {
    fn new(params: &MixtureValidParams) -> ParamLayout {
        let t = params.n_sources();
        let d = params.window();
        let gate_window = match params.dependence() {
            LatentDependence::None => d,
            _ => d - 1,
        };
        let homo = params.loss() == LossFamily::HomoLikInv;
        let bias = params.bias();

        let mut off = 0;
        let mut take = |n: usize| {
            let o = off;
            off += n;
            o
        };

        let mean_w = take(t * d);
        let mean_b = bias.contains(BiasSpec::MEAN).then(|| take(t));
        // variance heads are replaced by free precision parameters under the
        // homoscedastic family
        let (var_w, var_b, homo_var) = if homo {
            (0, None, Some(take(t)))
        } else {
            let w = take(t * d);
            let b = bias.contains(BiasSpec::VAR).then(|| take(t));
            (w, b, None)
        };
        let gate_w = take(t * gate_window);
        let gate_b = bias.contains(BiasSpec::GATE).then(|| take(t));
        let global_bias = bias.contains(BiasSpec::GLOBAL).then(|| take(1));
        let global_logits = params
            .regul()
            .contains(RegulSpec::GLOBAL_GATE)
            .then(|| take(t));
        let latent = match params.prob_type() {
            LatentProbType::None | LatentProbType::ConstantDiffSq => None,
            LatentProbType::ScalarDiffSq => Some((take(1), 1)),
            LatentProbType::VectorDiffSq => Some((take(t), t)),
            LatentProbType::PosNegDiffSq => Some((take(2), 2)),
        };

        ParamLayout {
            n_sources: t,
            window: d,
            gate_window,
            mean_w,
            mean_b,
            var_w,
            var_b,
            gate_w,
            gate_b,
            homo_var,
            global_bias,
            global_logits,
            latent,
            total: off,
        }
    }
}

/// Linear mixture network over `(n, t, d)` batches.
#[derive(Clone, Debug)]
pub struct LinearMixtureNet {
    params: MixtureValidParams,
    layout: ParamLayout,
}

impl LinearMixtureNet {
    /// Builds the network for a validated mixture configuration.
    ///
    /// Recurrent experts are external collaborators; asking for one here is
    /// a configuration error.
    pub fn new(params: MixtureValidParams) -> Result<LinearMixtureNet> {
        if params.model() != ModelFamily::Linear {
            return Err(MixtureError::InvalidConfigError(format!(
                "model family '{}' is not built in, plug an external expert",
                params.model()
            )));
        }
        let layout = ParamLayout::new(&params);
        debug!(
            "linear expert: {} sources, window {}, {} parameters",
            layout.n_sources, layout.window, layout.total
        );
        Ok(LinearMixtureNet { params, layout })
    }

    pub fn mixture(&self) -> &MixtureValidParams {
        &self.params
    }

    /// Seeded Xavier-style initialization of the flat parameter vector.
    pub fn init_params<R: Rng>(&self, rng: &mut R) -> Vec<f64> {
        let mut theta = vec![0.; self.layout.total];
        let bound = |fan_in: usize| (6. / (fan_in as f64 + 1.)).sqrt();
        let mut fill = |theta: &mut [f64], off: usize, n: usize, b: f64| {
            for v in &mut theta[off..off + n] {
                *v = rng.gen_range(-b..b);
            }
        };
        let t = self.layout.n_sources;
        let d = self.layout.window;
        fill(&mut theta, self.layout.mean_w, t * d, bound(d));
        if self.layout.homo_var.is_none() {
            fill(&mut theta, self.layout.var_w, t * d, bound(d));
        }
        fill(
            &mut theta,
            self.layout.gate_w,
            t * self.layout.gate_window,
            bound(self.layout.gate_window),
        );
        if let Some(off) = self.layout.homo_var {
            // unit precision before the link
            theta[off..off + t].fill(1.);
        }
        if let Some((off, len)) = self.layout.latent {
            theta[off..off + len].fill(0.1);
        }
        theta
    }

    fn head(&self, x: &ArrayView3<f64>, w: ArrayView1<f64>, b: f64, src: usize) -> Array1<f64> {
        x.slice(s![.., src, ..]).dot(&w) + b
    }

    /// Gate head over a sub-window `[lo, hi)` with weights shared across the
    /// current/previous evaluations.
    fn gate_head(
        &self,
        x: &ArrayView3<f64>,
        theta: &[f64],
        src: usize,
        lo: usize,
        hi: usize,
    ) -> Array1<f64> {
        let gw = self.layout.gate_window;
        let w = ArrayView1::from(&theta[self.layout.gate_w + src * gw..self.layout.gate_w + (src + 1) * gw]);
        let b = self
            .layout
            .gate_b
            .map_or(0., |off| theta[off + src]);
        x.slice(s![.., src, lo..hi]).dot(&w) + b
    }
}

impl Expert for LinearMixtureNet {
    fn n_sources(&self) -> usize {
        self.layout.n_sources
    }

    fn n_params(&self) -> usize {
        self.layout.total
    }

    fn forward(&self, theta: &[f64], x: &ArrayView3<f64>) -> Result<ExpertOutput> {
        if theta.len() != self.layout.total {
            return Err(MixtureError::ShapeError(format!(
                "expected {} parameters, got {}",
                self.layout.total,
                theta.len()
            )));
        }
        let (n, t, d) = x.dim();
        if t != self.layout.n_sources || d != self.layout.window {
            return Err(MixtureError::ShapeError(format!(
                "expected batch of shape (_, {}, {}), got {:?}",
                self.layout.n_sources,
                self.layout.window,
                x.dim()
            )));
        }

        let mut mean = Array2::zeros((n, t));
        let mut var_raw = Array2::zeros((n, t));
        let mut gate_logits = Array2::zeros((n, t));
        let dependent = self.params.dependence() != LatentDependence::None;
        let mut gate_prev = dependent.then(|| Array2::zeros((n, t)));

        for src in 0..t {
            let w_mean = ArrayView1::from(&theta[self.layout.mean_w + src * d..self.layout.mean_w + (src + 1) * d]);
            let b_mean = self.layout.mean_b.map_or(0., |off| theta[off + src]);
            let mut m = self.head(x, w_mean, b_mean, src);
            if src == 0 {
                if let Some(off) = self.layout.global_bias {
                    m += theta[off];
                }
            }
            mean.column_mut(src).assign(&m);

            if let Some(off) = self.layout.homo_var {
                var_raw.column_mut(src).fill(theta[off + src]);
            } else {
                let w_var = ArrayView1::from(&theta[self.layout.var_w + src * d..self.layout.var_w + (src + 1) * d]);
                let b_var = self.layout.var_b.map_or(0., |off| theta[off + src]);
                var_raw.column_mut(src).assign(&self.head(x, w_var, b_var, src));
            }

            if let Some(prev) = gate_prev.as_mut() {
                gate_logits
                    .column_mut(src)
                    .assign(&self.gate_head(x, theta, src, 1, d));
                prev.column_mut(src)
                    .assign(&self.gate_head(x, theta, src, 0, d - 1));
            } else {
                gate_logits
                    .column_mut(src)
                    .assign(&self.gate_head(x, theta, src, 0, d));
            }
        }

        let (latent_scale, latent_scale_neg) = match (self.params.prob_type(), self.layout.latent)
        {
            (LatentProbType::ConstantDiffSq, _) => (Some(Array1::ones(1)), None),
            (LatentProbType::ScalarDiffSq, Some((off, _))) => {
                (Some(Array1::from(vec![theta[off]])), None)
            }
            (LatentProbType::VectorDiffSq, Some((off, len))) => {
                (Some(Array1::from(theta[off..off + len].to_vec())), None)
            }
            (LatentProbType::PosNegDiffSq, Some((off, _))) => (
                Some(Array1::from(vec![theta[off]])),
                Some(Array1::from(vec![theta[off + 1]])),
            ),
            _ => (None, None),
        };

        let global_gate_logits = self
            .layout
            .global_logits
            .map(|off| Array1::from(theta[off..off + t].to_vec()));

        Ok(ExpertOutput {
            mean,
            var_raw,
            gate_logits,
            gate_logits_prev: gate_prev,
            latent_scale,
            latent_scale_neg,
            global_gate_logits,
        })
    }

    fn param_group_norms(&self, theta: &[f64]) -> ParamGroupNorms {
        let sq = |range: std::ops::Range<usize>| theta[range].iter().map(|v| v * v).sum::<f64>();
        let t = self.layout.n_sources;
        let d = self.layout.window;
        // weights only, biases are not penalized
        let mean_sq = sq(self.layout.mean_w..self.layout.mean_w + t * d);
        let var_sq = match self.layout.homo_var {
            Some(off) => sq(off..off + t),
            None => sq(self.layout.var_w..self.layout.var_w + t * d),
        };
        let gate_sq = sq(self.layout.gate_w..self.layout.gate_w + t * self.layout.gate_window);
        let latent_sq = self
            .layout
            .latent
            .map_or(0., |(off, len)| sq(off..off + len));
        ParamGroupNorms {
            mean_sq,
            var_sq,
            gate_sq,
            latent_sq,
        }
    }
}
