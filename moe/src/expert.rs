use crate::errors::Result;
use ndarray::{Array1, Array2, ArrayView3};

/// Forward-pass outputs of an expert network on one batch.
///
/// Shapes are `(n, t)` where `n` is the batch size and `t` the number of
/// sources. Variance outputs are pre-activation values; the mixture layer
/// applies the variance link.
#[derive(Clone, Debug)]
pub struct ExpertOutput {
    /// Per-source predicted means
    pub mean: Array2<f64>,
    /// Per-source variance (or precision) pre-activations
    pub var_raw: Array2<f64>,
    /// Unnormalized gate logits
    pub gate_logits: Array2<f64>,
    /// Gate logits recomputed on the shifted-back window, present under
    /// temporal dependence
    pub gate_logits_prev: Option<Array2<f64>>,
    /// Learned scale of the latent smoothness term (one or `t` entries
    /// depending on the probability type)
    pub latent_scale: Option<Array1<f64>>,
    /// Second, negative-side scale used by the pos/neg probability type
    pub latent_scale_neg: Option<Array1<f64>>,
    /// Learned batch-independent gate logit vector, present when the global
    /// gate penalty is active
    pub global_gate_logits: Option<Array1<f64>>,
}

/// Sums of squared parameters per head, consumed by the L2 penalties.
#[derive(Clone, Copy, Debug, Default)]
pub struct ParamGroupNorms {
    pub mean_sq: f64,
    pub var_sq: f64,
    pub gate_sq: f64,
    pub latent_sq: f64,
}

/// An expert network mapping a window of source histories to per-source
/// prediction triples.
///
/// Parameters live in one flat slice owned by the caller so that training
/// can differentiate the loss with respect to all of them at once.
pub trait Expert {
    /// Number of sources `t` the network was built for.
    fn n_sources(&self) -> usize;

    /// Length of the flat parameter vector.
    fn n_params(&self) -> usize;

    /// Runs the network on a batch `x` of shape `(n, t, d)`.
    fn forward(&self, theta: &[f64], x: &ArrayView3<f64>) -> Result<ExpertOutput>;

    /// Squared-norm of each parameter group, for regularization.
    fn param_group_norms(&self, theta: &[f64]) -> ParamGroupNorms;
}
