use crate::errors::{MixtureError, Result};
use crate::expert::{ExpertOutput, ParamGroupNorms};
use crate::parameters::MixtureValidParams;
use crate::types::{LatentProbType, LossFamily, RegulSpec, EPS};
use ndarray::{Array1, Array2, ArrayView1, Zip};

const LN_2PI: f64 = 1.837_877_066_409_345_3;

/// Everything computed from one forward pass on a batch: mixture moments,
/// per-source quantities, likelihoods and the regularized training loss.
#[derive(Clone, Debug)]
pub struct MixtureOutput {
    /// Mixture mean, `(n,)`
    pub mixture_mean: Array1<f64>,
    /// Mixture variance by the law of total variance, `(n,)`
    pub mixture_var: Array1<f64>,
    /// Per-source means, `(n, t)`
    pub component_means: Array2<f64>,
    /// Per-source variances (precision families reported as `1/(p+eps)`), `(n, t)`
    pub component_vars: Array2<f64>,
    /// Row-stochastic gate values, `(n, t)`
    pub gates: Array2<f64>,
    /// Per-instance mixture likelihood, `(n,)`
    pub likelihoods: Array1<f64>,
    /// Exact summed negative log-likelihood
    pub nllk: f64,
    /// Optimization target before penalties (equals `nllk` except for the
    /// Jensen-bound family)
    pub nllk_bound: f64,
    /// Regularized training loss
    pub loss: f64,
    /// Loss sub-terms for logging: the base objective, then one entry per
    /// enabled penalty bucket
    pub monitor: Vec<(&'static str, f64)>,
}

impl MixtureOutput {
    /// Extracts the per-snapshot quantities ensemble aggregation consumes.
    pub fn prediction(&self) -> MixturePrediction {
        MixturePrediction {
            mean: self.mixture_mean.clone(),
            var: self.mixture_var.clone(),
            component_means: self.component_means.clone(),
            component_vars: self.component_vars.clone(),
            likelihood: self.likelihoods.clone(),
            gates: self.gates.clone(),
        }
    }
}

/// One snapshot's predictive quantities on a fixed evaluation batch.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct MixturePrediction {
    pub mean: Array1<f64>,
    pub var: Array1<f64>,
    /// Per-source means, `(n, t)`, kept per snapshot for offline analysis
    pub component_means: Array2<f64>,
    /// Per-source variances, `(n, t)`
    pub component_vars: Array2<f64>,
    pub likelihood: Array1<f64>,
    pub gates: Array2<f64>,
}

impl MixtureValidParams {
    /// Row-stochastic gates from unnormalized logits.
    ///
    /// The row maximum is subtracted before exponentiation so extreme logits
    /// saturate instead of overflowing.
    pub fn gates(&self, logits: &Array2<f64>) -> Array2<f64> {
        let mut g = logits.to_owned();
        for mut row in g.rows_mut() {
            let max = row.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row.mapv_inplace(|v| v / sum);
        }
        g
    }

    /// Applies the variance link to the pre-activations.
    pub fn link_variances(&self, var_raw: &Array2<f64>) -> Array2<f64> {
        let link = self.link();
        var_raw.mapv(|v| link.apply(v))
    }

    /// Per-source variances in variance form, whatever the parameterization.
    pub fn component_variances(&self, linked: &Array2<f64>) -> Array2<f64> {
        if self.loss() == LossFamily::Mse {
            Array2::ones(linked.raw_dim())
        } else if self.loss().is_precision() {
            linked.mapv(|p| 1.0 / (p + EPS))
        } else {
            linked.to_owned()
        }
    }

    /// Mixture mean and variance by the law of total variance.
    pub fn moments(
        &self,
        means: &Array2<f64>,
        comp_vars: &Array2<f64>,
        gates: &Array2<f64>,
    ) -> (Array1<f64>, Array1<f64>) {
        let mix_mean = (means * gates).sum_axis(ndarray::Axis(1));
        let sq_mean = comp_vars + &means.mapv(|m| m * m);
        let mix_sq = (&sq_mean * gates).sum_axis(ndarray::Axis(1));
        let mix_var = Zip::from(&mix_sq)
            .and(&mix_mean)
            .map_collect(|&s, &m| (s - m * m).max(0.));
        (mix_mean, mix_var)
    }

    /// Per-instance mixture likelihood, exact summed NLLK, and the
    /// optimization bound.
    ///
    /// `linked` is the link output: a variance for the direct family, a
    /// precision for the inverse families.
    pub fn likelihoods(
        &self,
        y: &ArrayView1<f64>,
        means: &Array2<f64>,
        linked: &Array2<f64>,
        gates: &Array2<f64>,
    ) -> (Array1<f64>, f64, f64) {
        let n = y.len();
        let mut lk = Array1::zeros(n);
        for b in 0..n {
            let mut acc = 0.;
            for s in 0..means.ncols() {
                let d = y[b] - means[[b, s]];
                let src = match self.loss() {
                    LossFamily::Mse => (-0.5 * d * d).exp() / (2.0 * std::f64::consts::PI).sqrt(),
                    LossFamily::HeteroLik => {
                        let v = linked[[b, s]];
                        (-0.5 * d * d / (v + EPS)).exp()
                            / ((2.0 * std::f64::consts::PI * v).sqrt() + EPS)
                    }
                    _ => {
                        let p = linked[[b, s]];
                        (-0.5 * d * d * p).exp() * (0.5 / std::f64::consts::PI * p).sqrt()
                    }
                };
                acc += gates[[b, s]] * src;
            }
            lk[b] = acc;
        }
        let nllk = lk.mapv(|l: f64| -(l + EPS).ln()).sum();
        let bound = if self.loss() == LossFamily::HeteroElbo {
            let mut acc = 0.;
            for b in 0..n {
                for s in 0..means.ncols() {
                    let d = y[b] - means[[b, s]];
                    let p = linked[[b, s]];
                    acc += gates[[b, s]] * (0.5 * d * d * p - 0.5 * (p + EPS).ln() + 0.5 * LN_2PI);
                }
            }
            acc
        } else {
            nllk
        };
        (lk, nllk, bound)
    }

    /// Enabled penalty contributions as `(name, value)` pairs, one per
    /// bucket, in a fixed order.
    pub fn penalty_terms(
        &self,
        out: &ExpertOutput,
        norms: &ParamGroupNorms,
    ) -> Result<Vec<(&'static str, f64)>> {
        let l2 = self.l2();
        let regul = self.regul();
        let mut terms = Vec::new();
        if regul.contains(RegulSpec::MEAN) {
            terms.push(("mean_l2", l2 * norms.mean_sq));
        }
        if regul.contains(RegulSpec::VAR) {
            let w = if regul.contains(RegulSpec::IMBALANCE) {
                100. * l2
            } else {
                l2
            };
            terms.push(("var_l2", w * norms.var_sq));
        }
        if regul.contains(RegulSpec::GATE) {
            terms.push(("gate_l2", 0.1 * l2 * norms.gate_sq));
        }
        if regul.contains(RegulSpec::POSITIVE_MEAN) {
            let hinge: f64 = out.mean.iter().map(|&m| (-m).max(0.)).sum();
            terms.push(("mean_hinge", 0.1 * l2 * hinge));
        }
        if regul.contains(RegulSpec::GLOBAL_GATE) {
            let global = out.global_gate_logits.as_ref().ok_or_else(|| {
                MixtureError::InvalidValueError(
                    "global gate penalty enabled but expert exposes no global logits".to_string(),
                )
            })?;
            let mut pull = 0.;
            for row in out.gate_logits.rows() {
                for (a, b) in row.iter().zip(global.iter()) {
                    pull += (a - b) * (a - b);
                }
            }
            let self_sq: f64 = 0.5 * global.iter().map(|g| g * g).sum::<f64>();
            terms.push(("global_gate", l2 * (pull + self_sq)));
        }
        if regul.contains(RegulSpec::LATENT_DEPENDENCE) {
            terms.push(("latent_l2", l2 * norms.latent_sq));
        }
        if self.prob_type() != LatentProbType::None {
            let smooth = self.latent_smoothness(out)?;
            let w = if regul.contains(RegulSpec::L2_ON_LATENT) {
                l2
            } else {
                1.
            };
            terms.push(("smoothness", w * smooth));
        }
        Ok(terms)
    }

    /// Sum of the enabled penalty terms.
    pub fn penalties(&self, out: &ExpertOutput, norms: &ParamGroupNorms) -> Result<f64> {
        Ok(self
            .penalty_terms(out, norms)?
            .iter()
            .map(|&(_, v)| v)
            .sum())
    }

    /// Gate smoothness term, the negative log of the transition probability
    /// built from consecutive-window logit differences.
    fn latent_smoothness(&self, out: &ExpertOutput) -> Result<f64> {
        if self.prob_type() == LatentProbType::None {
            return Ok(0.);
        }
        let prev = out.gate_logits_prev.as_ref().ok_or_else(|| {
            MixtureError::InvalidValueError(
                "latent smoothness enabled but expert exposes no previous-window logits"
                    .to_string(),
            )
        })?;
        let diff_sq: Vec<f64> = out
            .gate_logits
            .rows()
            .into_iter()
            .zip(prev.rows())
            .map(|(c, p)| c.iter().zip(p.iter()).map(|(a, b)| (a - b) * (a - b)).sum())
            .collect();
        let scale = |out: &ExpertOutput| {
            out.latent_scale.as_ref().ok_or_else(|| {
                MixtureError::InvalidValueError(
                    "latent smoothness enabled but expert exposes no scale parameters".to_string(),
                )
            })
        };
        // stable -ln sigmoid(z)
        let neg_log_sigmoid = |z: f64| (-z.abs()).exp().ln_1p() + (-z).max(0.);
        match self.prob_type() {
            LatentProbType::None => unreachable!(),
            LatentProbType::ConstantDiffSq => {
                Ok(diff_sq.iter().map(|&z| neg_log_sigmoid(z)).sum())
            }
            LatentProbType::ScalarDiffSq => {
                let w = scale(out)?[0];
                Ok(diff_sq.iter().map(|&d| neg_log_sigmoid(w * d)).sum())
            }
            LatentProbType::VectorDiffSq => {
                let w = scale(out)?;
                let mut total = 0.;
                for (c, p) in out.gate_logits.rows().into_iter().zip(prev.rows()) {
                    let z: f64 = c
                        .iter()
                        .zip(p.iter())
                        .zip(w.iter())
                        .map(|((a, b), w)| w * (a - b) * (a - b))
                        .sum();
                    total += neg_log_sigmoid(z);
                }
                Ok(total)
            }
            LatentProbType::PosNegDiffSq => {
                let w_pos = scale(out)?[0];
                let w_neg = out
                    .latent_scale_neg
                    .as_ref()
                    .ok_or_else(|| {
                        MixtureError::InvalidValueError(
                            "pos/neg smoothness needs a negative-side scale".to_string(),
                        )
                    })?[0];
                // pos >= 0 and neg <= 0, so both exponentials stay in (0, 1]
                let mut total = 0.;
                for &d in &diff_sq {
                    let pos = w_pos * w_pos * d;
                    let neg = -w_neg * w_neg * d;
                    total += 0.5 * (-pos).exp().ln_1p() + 0.5 * (neg.exp().ln_1p() - neg);
                }
                Ok(total)
            }
        }
    }

    /// Full batch evaluation: moments, likelihoods, penalties, loss.
    pub fn evaluate(
        &self,
        y: &ArrayView1<f64>,
        out: &ExpertOutput,
        norms: &ParamGroupNorms,
    ) -> Result<MixtureOutput> {
        let (n, t) = out.mean.dim();
        if t != self.n_sources() {
            return Err(MixtureError::ShapeError(format!(
                "expert produced {} sources, mixture configured for {}",
                t,
                self.n_sources()
            )));
        }
        if y.len() != n || out.var_raw.dim() != (n, t) || out.gate_logits.dim() != (n, t) {
            return Err(MixtureError::ShapeError(format!(
                "inconsistent batch shapes: y {}, mean {:?}, var {:?}, logits {:?}",
                y.len(),
                out.mean.dim(),
                out.var_raw.dim(),
                out.gate_logits.dim()
            )));
        }

        let gates = self.gates(&out.gate_logits);
        let linked = self.link_variances(&out.var_raw);
        let comp_vars = self.component_variances(&linked);
        let (mix_mean, mix_var) = self.moments(&out.mean, &comp_vars, &gates);
        let (lk, nllk, bound) = self.likelihoods(y, &out.mean, &linked, &gates);
        let terms = self.penalty_terms(out, norms)?;
        let penalty: f64 = terms.iter().map(|&(_, v)| v).sum();

        let base = match self.loss() {
            LossFamily::Mse => {
                Zip::from(y)
                    .and(&mix_mean)
                    .fold(0., |acc, &yi, &mi| acc + (yi - mi) * (yi - mi))
                    / n as f64
            }
            LossFamily::HeteroElbo => bound,
            _ => nllk,
        };
        let mut monitor = Vec::with_capacity(terms.len() + 1);
        monitor.push(("base", base));
        monitor.extend(terms);

        Ok(MixtureOutput {
            mixture_mean: mix_mean,
            mixture_var: mix_var,
            component_means: out.mean.clone(),
            component_vars: comp_vars,
            gates,
            likelihoods: lk,
            nllk,
            nllk_bound: bound,
            loss: base + penalty,
            monitor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::MixtureParams;
    use crate::types::{LatentDependence, VarianceLink};
    use approx::assert_abs_diff_eq;
    use linfa::ParamGuard;
    use ndarray::array;

    fn output(mean: Array2<f64>, var_raw: Array2<f64>, logits: Array2<f64>) -> ExpertOutput {
        ExpertOutput {
            mean,
            var_raw,
            gate_logits: logits,
            gate_logits_prev: None,
            latent_scale: None,
            latent_scale_neg: None,
            global_gate_logits: None,
        }
    }

    #[test]
    fn test_gates_row_stochastic() {
        let params = MixtureParams::new(3, 4).check().unwrap();
        let logits = array![[0.5, -1.2, 3.0], [10.0, 10.0, 10.0]];
        let gates = params.gates(&logits);
        for row in gates.rows() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-6);
            assert!(row.iter().all(|&g| (0. ..=1.).contains(&g)));
        }
    }

    #[test]
    fn test_gates_extreme_logits() {
        let params = MixtureParams::new(2, 4).check().unwrap();
        let logits = array![[800.0, -800.0], [-750.0, 750.0]];
        let gates = params.gates(&logits);
        assert!(gates.iter().all(|g| g.is_finite()));
        assert_abs_diff_eq!(gates[[0, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(gates[[1, 1]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_variances_non_negative_both_links() {
        for link in [VarianceLink::Square, VarianceLink::Exp] {
            let params = MixtureParams::new(2, 4).link(link).check().unwrap();
            let var_raw = array![[-2.0, 0.3], [0.0, -0.7], [1.5, -4.0]];
            let linked = params.link_variances(&var_raw);
            let comp = params.component_variances(&linked);
            assert!(comp.iter().all(|&v| v >= 0.));
            let mean = array![[1.0, -1.0], [0.5, 2.0], [0.0, 0.0]];
            let gates = params.gates(&Array2::zeros((3, 2)));
            let (_, mix_var) = params.moments(&mean, &comp, &gates);
            assert!(mix_var.iter().all(|&v| v >= 0.));
        }
    }

    #[test]
    fn test_law_of_total_variance() {
        // two sources, hand-computed on one instance:
        // g = (0.25, 0.75), m = (1, 3), v = (4, 1)
        // mix mean = 0.25 + 2.25 = 2.5
        // E[v + m^2] = 0.25*(4+1) + 0.75*(1+9) = 1.25 + 7.5 = 8.75
        // var = 8.75 - 6.25 = 2.5
        let params = MixtureParams::new(2, 4)
            .loss(LossFamily::HeteroLik)
            .check()
            .unwrap();
        let mean = array![[1.0, 3.0]];
        let comp = array![[4.0, 1.0]];
        let gates = array![[0.25, 0.75]];
        let (m, v) = params.moments(&mean, &comp, &gates);
        assert_abs_diff_eq!(m[0], 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(v[0], 2.5, epsilon = 1e-12);
    }

    #[test]
    fn test_uniform_gates_average_means() {
        let params = MixtureParams::new(2, 4).check().unwrap();
        let mean = array![[2.0, 4.0], [0.0, 10.0]];
        let comp = array![[1.0, 1.0], [1.0, 1.0]];
        let gates = params.gates(&Array2::zeros((2, 2)));
        let (m, _) = params.moments(&mean, &comp, &gates);
        assert_abs_diff_eq!(m[0], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(m[1], 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_elbo_bound_dominates_nllk() {
        let params = MixtureParams::new(3, 4)
            .loss(LossFamily::HeteroElbo)
            .check()
            .unwrap();
        let y = array![0.3, -1.1, 2.4, 0.0];
        let mean = array![
            [0.2, 0.5, -0.1],
            [-1.0, -0.8, -1.3],
            [2.0, 2.5, 1.9],
            [0.1, -0.2, 0.3]
        ];
        let var_raw = array![
            [0.8, 1.1, 0.9],
            [1.2, 0.7, 1.0],
            [0.9, 1.3, 0.8],
            [1.0, 1.0, 1.1]
        ];
        let logits = array![
            [0.1, -0.2, 0.3],
            [0.0, 0.5, -0.5],
            [1.0, 0.0, -1.0],
            [0.2, 0.2, 0.2]
        ];
        let gates = params.gates(&logits);
        let linked = params.link_variances(&var_raw);
        let (_, nllk, bound) = params.likelihoods(&y.view(), &mean, &linked, &gates);
        // Jensen: -ln E[lk] <= E[-ln lk]
        assert!(bound >= nllk);
    }

    #[test]
    fn test_mse_loss_uses_mixture_mean() {
        let params = MixtureParams::new(2, 4)
            .loss(LossFamily::Mse)
            .regul(RegulSpec::empty())
            .check()
            .unwrap();
        let y = array![3.0, 5.0];
        let out = output(
            array![[2.0, 4.0], [0.0, 10.0]],
            Array2::ones((2, 2)),
            Array2::zeros((2, 2)),
        );
        let res = params
            .evaluate(&y.view(), &out, &ParamGroupNorms::default())
            .unwrap();
        // mixture means are 3 and 5, exact fit
        assert_abs_diff_eq!(res.loss, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_penalty_toggles() {
        let norms = ParamGroupNorms {
            mean_sq: 2.0,
            var_sq: 3.0,
            gate_sq: 4.0,
            latent_sq: 0.0,
        };
        let out = output(
            array![[-1.0, 2.0]],
            Array2::ones((1, 2)),
            Array2::zeros((1, 2)),
        );
        let base = MixtureParams::new(2, 4)
            .l2(0.01)
            .regul(RegulSpec::empty())
            .check()
            .unwrap();
        assert_abs_diff_eq!(base.penalties(&out, &norms).unwrap(), 0.0);

        let p = MixtureParams::new(2, 4)
            .l2(0.01)
            .regul(RegulSpec::MEAN | RegulSpec::VAR | RegulSpec::GATE | RegulSpec::POSITIVE_MEAN)
            .check()
            .unwrap();
        // 0.01*2 + 0.01*3 + 0.001*4 + 0.001*1
        assert_abs_diff_eq!(p.penalties(&out, &norms).unwrap(), 0.055, epsilon = 1e-12);
        let terms = p.penalty_terms(&out, &norms).unwrap();
        let names: Vec<&str> = terms.iter().map(|&(n, _)| n).collect();
        assert_eq!(names, ["mean_l2", "var_l2", "gate_l2", "mean_hinge"]);
        assert_abs_diff_eq!(terms[0].1, 0.02, epsilon = 1e-12);
        assert_abs_diff_eq!(terms[3].1, 0.001, epsilon = 1e-12);

        let imb = MixtureParams::new(2, 4)
            .l2(0.01)
            .regul(RegulSpec::VAR | RegulSpec::IMBALANCE)
            .check()
            .unwrap();
        assert_abs_diff_eq!(imb.penalties(&out, &norms).unwrap(), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_monitor_lists_each_penalty_bucket() {
        let norms = ParamGroupNorms {
            mean_sq: 2.0,
            var_sq: 3.0,
            gate_sq: 4.0,
            latent_sq: 0.0,
        };
        let params = MixtureParams::new(2, 4)
            .loss(LossFamily::Mse)
            .l2(0.01)
            .regul(RegulSpec::MEAN | RegulSpec::GATE)
            .check()
            .unwrap();
        let y = array![3.0];
        let out = output(
            array![[2.0, 4.0]],
            Array2::ones((1, 2)),
            Array2::zeros((1, 2)),
        );
        let res = params.evaluate(&y.view(), &out, &norms).unwrap();
        let names: Vec<&str> = res.monitor.iter().map(|&(n, _)| n).collect();
        assert_eq!(names, ["base", "mean_l2", "gate_l2"]);
        assert_abs_diff_eq!(res.monitor[0].1, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(res.monitor[1].1, 0.02, epsilon = 1e-12);
        assert_abs_diff_eq!(res.monitor[2].1, 0.004, epsilon = 1e-12);
        let total: f64 = res.monitor.iter().map(|&(_, v)| v).sum();
        assert_abs_diff_eq!(res.loss, total, epsilon = 1e-12);
    }

    #[test]
    fn test_latent_smoothness_needs_previous_logits() {
        let params = MixtureParams::new(2, 4)
            .dependence(LatentDependence::Markov)
            .prob_type(LatentProbType::ConstantDiffSq)
            .check()
            .unwrap();
        let out = output(
            array![[0.0, 0.0]],
            Array2::ones((1, 2)),
            array![[1.0, -1.0]],
        );
        assert!(params.penalties(&out, &ParamGroupNorms::default()).is_err());
    }

    #[test]
    fn test_latent_smoothness_stable_on_large_logits() {
        let params = MixtureParams::new(2, 4)
            .dependence(LatentDependence::Markov)
            .prob_type(LatentProbType::ScalarDiffSq)
            .regul(RegulSpec::empty())
            .check()
            .unwrap();
        let mut out = output(
            array![[0.0, 0.0]],
            Array2::ones((1, 2)),
            array![[1000.0, -1000.0]],
        );
        out.gate_logits_prev = Some(array![[-1000.0, 1000.0]]);
        out.latent_scale = Some(array![-1.0]);
        let p = params.penalties(&out, &ParamGroupNorms::default()).unwrap();
        assert!(p.is_finite());
    }
}
