use crate::errors::MixtureError;
use crate::types::{
    BiasSpec, LatentDependence, LatentProbType, LossFamily, ModelFamily, RegulSpec, VarianceLink,
};
use linfa::ParamGuard;
use serde::{Deserialize, Serialize};

/// A validated mixture configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MixtureValidParams {
    /// Number of sources (mixture components)
    n_sources: usize,
    /// Length of the per-source history window
    window: usize,
    /// Loss family
    loss: LossFamily,
    /// Variance link function
    link: VarianceLink,
    /// Gate temporal dependence mode
    dependence: LatentDependence,
    /// Latent smoothness probability type
    prob_type: LatentProbType,
    /// Regularization term selection
    regul: RegulSpec,
    /// Bias term selection
    bias: BiasSpec,
    /// L2 strength applied to the selected parameter groups
    l2: f64,
    /// Expert model family
    model: ModelFamily,
}

impl MixtureValidParams {
    pub fn n_sources(&self) -> usize {
        self.n_sources
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn loss(&self) -> LossFamily {
        self.loss
    }

    pub fn link(&self) -> VarianceLink {
        self.link
    }

    pub fn dependence(&self) -> LatentDependence {
        self.dependence
    }

    pub fn prob_type(&self) -> LatentProbType {
        self.prob_type
    }

    pub fn regul(&self) -> RegulSpec {
        self.regul
    }

    pub fn bias(&self) -> BiasSpec {
        self.bias
    }

    pub fn l2(&self) -> f64 {
        self.l2
    }

    pub fn model(&self) -> ModelFamily {
        self.model
    }
}

impl Default for MixtureValidParams {
    fn default() -> Self {
        MixtureValidParams {
            n_sources: 1,
            window: 1,
            loss: LossFamily::HeteroLikInv,
            link: VarianceLink::Square,
            dependence: LatentDependence::None,
            prob_type: LatentProbType::None,
            regul: RegulSpec::MEAN | RegulSpec::VAR,
            bias: BiasSpec::MEAN | BiasSpec::VAR | BiasSpec::GATE,
            l2: 0.001,
            model: ModelFamily::Linear,
        }
    }
}

/// Mixture model configuration, a builder over [`MixtureValidParams`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MixtureParams(MixtureValidParams);

impl MixtureParams {
    /// Configuration for a mixture over `n_sources` sources, each observed
    /// through a history window of length `window`.
    pub fn new(n_sources: usize, window: usize) -> MixtureParams {
        MixtureParams(MixtureValidParams {
            n_sources,
            window,
            ..Default::default()
        })
    }

    /// Sets the loss family.
    pub fn loss(mut self, loss: LossFamily) -> Self {
        self.0.loss = loss;
        self
    }

    /// Sets the variance link function.
    pub fn link(mut self, link: VarianceLink) -> Self {
        self.0.link = link;
        self
    }

    /// Sets the gate temporal dependence mode.
    pub fn dependence(mut self, dependence: LatentDependence) -> Self {
        self.0.dependence = dependence;
        self
    }

    /// Sets the latent smoothness probability type.
    pub fn prob_type(mut self, prob_type: LatentProbType) -> Self {
        self.0.prob_type = prob_type;
        self
    }

    /// Sets the regularization term selection.
    pub fn regul(mut self, regul: RegulSpec) -> Self {
        self.0.regul = regul;
        self
    }

    /// Sets the bias term selection.
    pub fn bias(mut self, bias: BiasSpec) -> Self {
        self.0.bias = bias;
        self
    }

    /// Sets the L2 strength.
    pub fn l2(mut self, l2: f64) -> Self {
        self.0.l2 = l2;
        self
    }

    /// Sets the expert model family.
    pub fn model(mut self, model: ModelFamily) -> Self {
        self.0.model = model;
        self
    }
}

impl Default for MixtureParams {
    fn default() -> Self {
        MixtureParams(MixtureValidParams::default())
    }
}

impl ParamGuard for MixtureParams {
    type Checked = MixtureValidParams;
    type Error = MixtureError;

    fn check_ref(&self) -> Result<&Self::Checked, MixtureError> {
        if self.0.n_sources == 0 {
            return Err(MixtureError::InvalidConfigError(
                "mixture needs at least one source".to_string(),
            ));
        }
        if self.0.window == 0 {
            return Err(MixtureError::InvalidConfigError(
                "history window must be at least 1".to_string(),
            ));
        }
        if !(self.0.l2.is_finite() && self.0.l2 >= 0.) {
            return Err(MixtureError::InvalidValueError(format!(
                "l2 strength must be finite and non-negative, got {}",
                self.0.l2
            )));
        }
        if self.0.dependence == LatentDependence::Markov && self.0.prob_type == LatentProbType::None
        {
            return Err(MixtureError::InvalidConfigError(
                "markov dependence requires a latent probability type".to_string(),
            ));
        }
        if self.0.dependence != LatentDependence::Markov && self.0.prob_type != LatentProbType::None
        {
            return Err(MixtureError::InvalidConfigError(
                "latent probability type is only valid with markov dependence".to_string(),
            ));
        }
        if self.0.regul.contains(RegulSpec::LATENT_DEPENDENCE)
            && self.0.dependence != LatentDependence::Markov
        {
            return Err(MixtureError::InvalidConfigError(
                "latent dependence penalty requires markov dependence".to_string(),
            ));
        }
        if self.0.dependence != LatentDependence::None && self.0.window < 2 {
            return Err(MixtureError::InvalidConfigError(
                "temporal gate dependence needs a window of at least 2".to_string(),
            ));
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked, MixtureError> {
        self.check_ref()?;
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_valid() {
        let valid = MixtureParams::new(3, 8).check().unwrap();
        assert_eq!(valid.n_sources(), 3);
        assert_eq!(valid.window(), 8);
        assert_eq!(valid.loss(), LossFamily::HeteroLikInv);
    }

    #[test]
    fn test_zero_sources_rejected() {
        assert!(MixtureParams::new(0, 8).check().is_err());
    }

    #[test]
    fn test_markov_needs_prob_type() {
        let res = MixtureParams::new(2, 8)
            .dependence(LatentDependence::Markov)
            .check();
        assert!(res.is_err());
        let res = MixtureParams::new(2, 8)
            .dependence(LatentDependence::Markov)
            .prob_type(LatentProbType::ScalarDiffSq)
            .check();
        assert!(res.is_ok());
    }

    #[test]
    fn test_prob_type_needs_markov() {
        let res = MixtureParams::new(2, 8)
            .prob_type(LatentProbType::VectorDiffSq)
            .check();
        assert!(res.is_err());
    }

    #[test]
    fn test_negative_l2_rejected() {
        assert!(MixtureParams::new(2, 8).l2(-0.1).check().is_err());
    }

    #[test]
    fn test_dependence_needs_window() {
        let res = MixtureParams::new(2, 1)
            .dependence(LatentDependence::Independent)
            .check();
        assert!(res.is_err());
    }
}
