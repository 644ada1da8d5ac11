#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

use super::{check_positive, PriorError};
use crate::consts::{HALF_LN_2PI, SQRT_2PI};
use crate::traits::Rv;
use rand::Rng;
use rand_distr::StandardNormal;

/// Uniform on `[a, b]` with Gaussian tails of width `sigma` outside of it.
///
/// ```math
/// ln f(x) = ln N(max(|x - c| - r, 0) | 0, σ) - ln(1 + (b - a) / (sqrt(2π) σ))
/// ```
///
/// with `c = (a + b) / 2` and `r = (b - a) / 2`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde1", serde(rename_all = "snake_case"))]
pub struct SmoothedBoxPrior {
    a: f64,
    b: f64,
    sigma: f64,
}

impl SmoothedBoxPrior {
    pub fn new(a: f64, b: f64, sigma: f64) -> Result<Self, PriorError> {
        check_positive("sigma", sigma)?;
        if a < b && a.is_finite() && b.is_finite() {
            Ok(Self { a, b, sigma })
        } else {
            Err(PriorError::InvalidBox { a, b })
        }
    }

    pub fn a(&self) -> f64 {
        self.a
    }

    pub fn b(&self) -> f64 {
        self.b
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    fn ln_normalizer(&self) -> f64 {
        (1.0 + (self.b - self.a) / (SQRT_2PI * self.sigma)).ln()
    }
}

impl Rv<f64> for SmoothedBoxPrior {
    fn ln_f(&self, x: &f64) -> f64 {
        let c = 0.5 * (self.a + self.b);
        let r = 0.5 * (self.b - self.a);
        let z = ((x - c).abs() - r).max(0.0) / self.sigma;
        -0.5 * z * z - self.sigma.ln() - HALF_LN_2PI - self.ln_normalizer()
    }

    fn draw<R: Rng>(&self, rng: &mut R) -> f64 {
        let width = self.b - self.a;
        let p_box = width / (width + SQRT_2PI * self.sigma);
        if rng.gen::<f64>() < p_box {
            rng.gen_range(self.a..self.b)
        } else {
            let z: f64 = rng.sample(StandardNormal);
            let tail = z.abs() * self.sigma;
            if rng.gen::<bool>() {
                self.b + tail
            } else {
                self.a - tail
            }
        }
    }
}
