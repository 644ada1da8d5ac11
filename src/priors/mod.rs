//! Priors over kernel and likelihood hyper-parameters

mod gamma;
mod lkj;
mod smoothed_box;

pub use gamma::GammaPrior;
pub use lkj::{LkjCovariancePrior, LkjPrior};
pub use smoothed_box::SmoothedBoxPrior;

use crate::traits::Rv;
use rand::Rng;

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

/// Errors from prior construction
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PriorError {
    /// A parameter that must be positive and finite is not
    #[error("{name} must be positive and finite, got {value}")]
    NonPositive { name: &'static str, value: f64 },
    /// Box bounds out of order
    #[error("box bounds must satisfy a < b, got ({a}, {b})")]
    InvalidBox { a: f64, b: f64 },
    /// LKJ priors need at least one dimension
    #[error("LKJ dimension must be at least 1, got {0}")]
    InvalidDimension(usize),
}

pub(crate) fn check_positive(
    name: &'static str,
    value: f64,
) -> Result<f64, PriorError> {
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(PriorError::NonPositive { name, value })
    }
}

/// Prior over a positive scalar, e.g. the standard deviations of an
/// [`LkjCovariancePrior`]
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde1", serde(rename_all = "snake_case"))]
pub enum ScalarPrior {
    Gamma(GammaPrior),
    SmoothedBox(SmoothedBoxPrior),
}

impl Rv<f64> for ScalarPrior {
    fn ln_f(&self, x: &f64) -> f64 {
        match self {
            Self::Gamma(p) => p.ln_f(x),
            Self::SmoothedBox(p) => p.ln_f(x),
        }
    }

    fn draw<R: Rng>(&self, rng: &mut R) -> f64 {
        match self {
            Self::Gamma(p) => p.draw(rng),
            Self::SmoothedBox(p) => p.draw(rng),
        }
    }
}

impl From<GammaPrior> for ScalarPrior {
    fn from(p: GammaPrior) -> Self {
        Self::Gamma(p)
    }
}

impl From<SmoothedBoxPrior> for ScalarPrior {
    fn from(p: SmoothedBoxPrior) -> Self {
        Self::SmoothedBox(p)
    }
}
