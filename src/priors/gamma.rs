//! Gamma prior over x in (0, ∞)
#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

use super::{check_positive, PriorError};
use crate::traits::{Mean, Mode, Rv};
use rand::Rng;
use special::Gamma as _;
use std::cell::OnceCell;
use std::fmt;

/// [Gamma distribution](https://en.wikipedia.org/wiki/Gamma_distribution) G(α, β)
/// over x in (0, ∞).
///
/// **NOTE**: The gamma prior is parameterized in terms of shape (or
/// concentration), α, and rate, β.
///
/// ```math
///             β^α
/// f(x|α, β) = ----  x^(α-1) e^(-βx)
///             Γ(α)
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde1", serde(rename_all = "snake_case"))]
pub struct GammaPrior {
    shape: f64,
    rate: f64,
    // ln(gamma(shape))
    #[cfg_attr(feature = "serde1", serde(skip))]
    ln_gamma_shape: OnceCell<f64>,
}

impl PartialEq for GammaPrior {
    fn eq(&self, other: &GammaPrior) -> bool {
        self.shape == other.shape && self.rate == other.rate
    }
}

impl GammaPrior {
    /// Create a new `GammaPrior` with shape (α) and rate (β).
    pub fn new(shape: f64, rate: f64) -> Result<Self, PriorError> {
        check_positive("shape", shape)?;
        check_positive("rate", rate)?;
        Ok(Self::new_unchecked(shape, rate))
    }

    /// Creates a new GammaPrior without checking whether the parameters are
    /// valid.
    #[inline]
    pub fn new_unchecked(shape: f64, rate: f64) -> Self {
        GammaPrior {
            shape,
            rate,
            ln_gamma_shape: OnceCell::new(),
        }
    }

    /// Get the shape parameter
    #[inline]
    pub fn shape(&self) -> f64 {
        self.shape
    }

    /// Get the rate parameter
    #[inline]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    #[inline]
    fn ln_gamma_shape(&self) -> f64 {
        *self.ln_gamma_shape.get_or_init(|| self.shape.ln_gamma().0)
    }
}

impl fmt::Display for GammaPrior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G(α: {}, β: {})", self.shape, self.rate)
    }
}

impl Rv<f64> for GammaPrior {
    fn ln_f(&self, x: &f64) -> f64 {
        if *x <= 0.0 || !x.is_finite() {
            return f64::NEG_INFINITY;
        }
        self.shape * self.rate.ln() - self.ln_gamma_shape()
            + (self.shape - 1.0) * x.ln()
            - self.rate * x
    }

    fn draw<R: Rng>(&self, rng: &mut R) -> f64 {
        // rand_distr uses the scale parameterization
        rand_distr::Gamma::new(self.shape, self.rate.recip())
            .map_or(f64::NAN, |g| rng.sample(g))
    }
}

impl Mean<f64> for GammaPrior {
    fn mean(&self) -> Option<f64> {
        Some(self.shape / self.rate)
    }
}

impl Mode<f64> for GammaPrior {
    fn mode(&self) -> Option<f64> {
        if self.shape >= 1.0 {
            Some((self.shape - 1.0) / self.rate)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256Plus;

    const TOL: f64 = 1E-12;

    #[test]
    fn new_rejects_bad_parameters() {
        assert_eq!(
            GammaPrior::new(0.0, 1.0),
            Err(PriorError::NonPositive {
                name: "shape",
                value: 0.0
            })
        );
        assert!(GammaPrior::new(1.0, f64::INFINITY).is_err());
        assert!(GammaPrior::new(1.1, 0.05).is_ok());
    }

    #[test]
    fn ln_f_exponential() {
        // G(1, β) is Exponential(β)
        let g = GammaPrior::new(1.0, 2.0).unwrap();
        assert::close(g.ln_f(&0.5), 2.0_f64.ln() - 1.0, TOL);
    }

    #[test]
    fn ln_f_known_value() {
        let g = GammaPrior::new(3.0, 6.0).unwrap();
        // 6^3 / Γ(3) x^2 e^{-6x} at x = 0.5 → 108 * 0.25 * e^{-3}
        let expected = (108.0_f64 * 0.25).ln() - 3.0;
        assert::close(g.ln_f(&0.5), expected, TOL);
    }

    #[test]
    fn ln_f_outside_support() {
        let g = GammaPrior::new(2.0, 1.0).unwrap();
        assert_eq!(g.ln_f(&0.0), f64::NEG_INFINITY);
        assert_eq!(g.ln_f(&-1.0), f64::NEG_INFINITY);
    }

    #[test]
    fn noise_prior_mode() {
        let g = GammaPrior::new(1.1, 0.05).unwrap();
        assert::close(g.mode().unwrap(), 2.0, 1E-10);
        assert!(GammaPrior::new(0.5, 1.0).unwrap().mode().is_none());
    }

    #[test]
    fn draws_are_positive_with_correct_mean() {
        let mut rng = Xoshiro256Plus::seed_from_u64(1337);
        let g = GammaPrior::new(2.0, 0.15).unwrap();
        let xs = g.sample(20_000, &mut rng);
        assert!(xs.iter().all(|&x| x > 0.0));
        let mean = xs.iter().sum::<f64>() / xs.len() as f64;
        assert::close(mean, g.mean().unwrap(), 0.3);
    }
}
