use crate::errors::MixtureError;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

/// Numerical floor added inside logs and denominators.
pub const EPS: f64 = 1e-5;

/// Loss-function family of the mixture model.
///
/// All families share the same gate and mixture-moment computation and
/// differ in how the per-component variance enters the likelihood.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LossFamily {
    /// Mean squared error on the mixture mean; component variance fixed at 1
    /// for reporting
    Mse,
    /// Heteroskedastic Gaussian likelihood with direct variance
    /// parameterization
    HeteroLik,
    /// Heteroskedastic Gaussian likelihood with precision (inverse variance)
    /// parameterization, expressed in precision form to avoid a division
    HeteroLikInv,
    /// Homoscedastic likelihood: the per-source precision is a free learned
    /// parameter, not a function of the forward pass
    HomoLikInv,
    /// Precision-parameterized likelihood optimized through the Jensen upper
    /// bound on the mixture NLLK; the exact NLLK is still reported for
    /// monitoring
    HeteroElbo,
}

impl FromStr for LossFamily {
    type Err = MixtureError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "mse" => Ok(LossFamily::Mse),
            "heter_lk" => Ok(LossFamily::HeteroLik),
            "heter_lk_inv" => Ok(LossFamily::HeteroLikInv),
            "homo_lk_inv" => Ok(LossFamily::HomoLikInv),
            "heter_elbo" => Ok(LossFamily::HeteroElbo),
            _ => Err(MixtureError::InvalidConfigError(format!(
                "unknown loss family '{s}'"
            ))),
        }
    }
}

impl LossFamily {
    /// Whether the variance link output is interpreted as a precision.
    pub fn is_precision(&self) -> bool {
        matches!(
            self,
            LossFamily::HeteroLikInv | LossFamily::HomoLikInv | LossFamily::HeteroElbo
        )
    }
}

/// Link function mapping the variance pre-activation to a positive value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarianceLink {
    /// v -> v^2
    Square,
    /// v -> exp(v)
    Exp,
}

impl FromStr for VarianceLink {
    type Err = MixtureError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "square" => Ok(VarianceLink::Square),
            "exp" => Ok(VarianceLink::Exp),
            _ => Err(MixtureError::InvalidConfigError(format!(
                "unknown variance link '{s}'"
            ))),
        }
    }
}

impl VarianceLink {
    /// Applies the link, guaranteed > 0 up to the additive floor.
    pub fn apply(&self, v: f64) -> f64 {
        match self {
            VarianceLink::Square => v * v,
            VarianceLink::Exp => v.exp(),
        }
    }
}

/// Temporal dependence mode of the gate logits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LatentDependence {
    /// Gate logits computed from the full sequence, no dependence term
    None,
    /// Logits computed on current/previous sub-sequences, no coupling term
    Independent,
    /// Logits computed on current/previous sub-sequences with a first-order
    /// coupling term turned into a smoothness penalty
    Markov,
}

impl FromStr for LatentDependence {
    type Err = MixtureError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "none" => Ok(LatentDependence::None),
            "independent" => Ok(LatentDependence::Independent),
            "markov" => Ok(LatentDependence::Markov),
            _ => Err(MixtureError::InvalidConfigError(format!(
                "unknown latent dependence '{s}'"
            ))),
        }
    }
}

/// How the latent smoothness probability is computed from consecutive
/// gate logits under [`LatentDependence::Markov`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LatentProbType {
    /// No smoothness term
    None,
    /// Undamped squared difference magnitude
    ConstantDiffSq,
    /// Squared difference scaled by one learned scalar
    ScalarDiffSq,
    /// Squared difference combined through a learned per-source vector
    VectorDiffSq,
    /// Signed combination of a positive and a negative learned scale,
    /// smoothed through two sigmoids
    PosNegDiffSq,
}

impl FromStr for LatentProbType {
    type Err = MixtureError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "none" => Ok(LatentProbType::None),
            "constant_diff_sq" => Ok(LatentProbType::ConstantDiffSq),
            "scalar_diff_sq" => Ok(LatentProbType::ScalarDiffSq),
            "vector_diff_sq" => Ok(LatentProbType::VectorDiffSq),
            "pos_neg_diff_sq" => Ok(LatentProbType::PosNegDiffSq),
            _ => Err(MixtureError::InvalidConfigError(format!(
                "unknown latent probability type '{s}'"
            ))),
        }
    }
}

/// Expert model family producing the per-source prediction triples.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelFamily {
    /// Linear heads over the flattened source sequence
    Linear,
    /// Recurrent encoder; supplied externally, not built by this crate
    Rnn,
}

impl FromStr for ModelFamily {
    type Err = MixtureError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "linear" => Ok(ModelFamily::Linear),
            "rnn" => Ok(ModelFamily::Rnn),
            _ => Err(MixtureError::InvalidConfigError(format!(
                "unknown model family '{s}'"
            ))),
        }
    }
}

impl Display for ModelFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelFamily::Linear => write!(f, "linear"),
            ModelFamily::Rnn => write!(f, "rnn"),
        }
    }
}

bitflags! {
    /// Flags selecting the additive regularization terms of the loss.
    ///
    /// Flags combine with the bit-wise `or` operator:
    /// ```ignore
    /// let spec = RegulSpec::MEAN | RegulSpec::VAR;
    /// ```
    ///
    /// See [bitflags::bitflags]
    #[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
    #[derive(Serialize, Deserialize)]
    pub struct RegulSpec: u16 {
        /// L2 on expert mean parameters
        const MEAN = 0x01;
        /// L2 on expert variance parameters (or on the free precision
        /// parameters under the homoscedastic family)
        const VAR = 0x02;
        /// L2 on gate parameters
        const GATE = 0x04;
        /// Hinge penalty max(0, -mean) encouraging non-negative means
        const POSITIVE_MEAN = 0x08;
        /// Pull per-instance gate logits towards a learned global logit
        /// vector, itself regularized
        const GLOBAL_GATE = 0x10;
        /// L2 on the latent dependence scale parameters
        const LATENT_DEPENDENCE = 0x20;
        /// Weight the latent smoothness term by the l2 strength instead of
        /// adding it raw
        const L2_ON_LATENT = 0x40;
        /// Imbalanced penalty: weight the variance L2 100 times stronger
        /// than the mean L2
        const IMBALANCE = 0x80;
    }
}

bitflags! {
    /// Flags selecting which heads carry a bias term.
    ///
    /// See [bitflags::bitflags]
    #[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
    #[derive(Serialize, Deserialize)]
    pub struct BiasSpec: u8 {
        /// Bias in the mean heads
        const MEAN = 0x01;
        /// Bias in the variance heads
        const VAR = 0x02;
        /// Bias in the gate heads
        const GATE = 0x04;
        /// A single learned global bias added to the first source mean
        const GLOBAL = 0x08;
    }
}
