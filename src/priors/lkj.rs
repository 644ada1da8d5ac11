#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

use super::{check_positive, PriorError, ScalarPrior};
use crate::traits::Rv;
use nalgebra::linalg::Cholesky;
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::{Beta, StandardNormal};
use special::Beta as _;
use std::f64::consts::LN_2;

/// [LKJ distribution](https://en.wikipedia.org/wiki/Lewandowski-Kurowicka-Joe_distribution)
/// over `n x n` correlation matrices.
///
/// ```math
/// f(C | η) ∝ det(C)^(η - 1)
/// ```
///
/// `η = 1` is uniform over correlation matrices, `η < 1` favors strong
/// correlations and `η > 1` favors weak ones.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde1", serde(rename_all = "snake_case"))]
pub struct LkjPrior {
    n: usize,
    eta: f64,
}

impl LkjPrior {
    pub fn new(n: usize, eta: f64) -> Result<Self, PriorError> {
        check_positive("eta", eta)?;
        if n == 0 {
            Err(PriorError::InvalidDimension(n))
        } else {
            Ok(Self { n, eta })
        }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn eta(&self) -> f64 {
        self.eta
    }

    /// Log of the normalizing constant
    ///
    /// ```math
    /// Σ_{k=1}^{n-1} (2η - 2 + n - k)(n - k) ln 2 + (n - k) ln B(b_k, b_k)
    /// ```
    /// with `b_k = η + (n - k - 1) / 2`.
    pub fn ln_normalizer(&self) -> f64 {
        let n = self.n as f64;
        (1..self.n)
            .map(|k| {
                let nk = n - k as f64;
                let b = self.eta + (nk - 1.0) / 2.0;
                (2.0 * self.eta - 2.0 + nk) * nk * LN_2 + nk * b.ln_beta(b)
            })
            .sum()
    }
}

impl Rv<DMatrix<f64>> for LkjPrior {
    /// `-∞` for matrices of the wrong size or that are not positive definite
    fn ln_f(&self, x: &DMatrix<f64>) -> f64 {
        if x.shape() != (self.n, self.n) {
            return f64::NEG_INFINITY;
        }
        match Cholesky::new(x.clone()) {
            Some(chol) => {
                let ln_det: f64 = 2.0
                    * chol.l_dirty().diagonal().iter().map(|d| d.ln()).sum::<f64>();
                (self.eta - 1.0) * ln_det - self.ln_normalizer()
            }
            None => f64::NEG_INFINITY,
        }
    }

    /// Onion method of Lewandowski, Kurowicka & Joe (2009)
    fn draw<R: Rng>(&self, rng: &mut R) -> DMatrix<f64> {
        let n = self.n;
        let mut corr = DMatrix::identity(n, n);
        if n == 1 {
            return corr;
        }

        let mut beta = self.eta + (n as f64 - 2.0) / 2.0;
        let r12 = Beta::new(beta, beta).map_or(0.0, |b| 2.0 * rng.sample(b) - 1.0);
        corr[(0, 1)] = r12;
        corr[(1, 0)] = r12;

        for k in 2..n {
            beta -= 0.5;
            let y: f64 = Beta::new(k as f64 / 2.0, beta).map_or(0.0, |b| rng.sample(b));
            let u = DVector::from_fn(k, |_, _| rng.sample::<f64, _>(StandardNormal));
            let w = u.normalize() * y.sqrt();
            let block = corr.view((0, 0), (k, k)).into_owned();
            let z = match Cholesky::new(block) {
                Some(chol) => chol.l() * w,
                None => DVector::zeros(k),
            };
            for (i, zi) in z.iter().enumerate() {
                corr[(i, k)] = *zi;
                corr[(k, i)] = *zi;
            }
        }
        corr
    }
}

/// Prior over covariance matrices `Σ = D C D` with an [`LkjPrior`] on the
/// correlation `C` and a scalar prior on each standard deviation in `D`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde1", serde(rename_all = "snake_case"))]
pub struct LkjCovariancePrior {
    correlation: LkjPrior,
    sd_prior: ScalarPrior,
}

impl LkjCovariancePrior {
    pub fn new(
        n: usize,
        eta: f64,
        sd_prior: impl Into<ScalarPrior>,
    ) -> Result<Self, PriorError> {
        Ok(Self {
            correlation: LkjPrior::new(n, eta)?,
            sd_prior: sd_prior.into(),
        })
    }

    pub fn n(&self) -> usize {
        self.correlation.n()
    }

    pub fn eta(&self) -> f64 {
        self.correlation.eta()
    }

    pub fn correlation_prior(&self) -> &LkjPrior {
        &self.correlation
    }

    pub fn sd_prior(&self) -> &ScalarPrior {
        &self.sd_prior
    }
}

impl Rv<DMatrix<f64>> for LkjCovariancePrior {
    fn ln_f(&self, x: &DMatrix<f64>) -> f64 {
        if x.shape() != (self.n(), self.n()) {
            return f64::NEG_INFINITY;
        }
        let var = x.diagonal();
        if var.iter().any(|&v| v <= 0.0) {
            return f64::NEG_INFINITY;
        }
        let sd = var.map(f64::sqrt);
        let corr = DMatrix::from_fn(x.nrows(), x.ncols(), |i, j| {
            x[(i, j)] / (sd[i] * sd[j])
        });
        let ln_f_sd: f64 = sd.iter().map(|s| self.sd_prior.ln_f(s)).sum();
        self.correlation.ln_f(&corr) + ln_f_sd
    }

    fn draw<R: Rng>(&self, rng: &mut R) -> DMatrix<f64> {
        let corr = self.correlation.draw(rng);
        let sd = DVector::from_fn(self.n(), |_, _| self.sd_prior.draw(rng).abs());
        DMatrix::from_fn(self.n(), self.n(), |i, j| corr[(i, j)] * sd[i] * sd[j])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::priors::{GammaPrior, SmoothedBoxPrior};
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256Plus;

    #[test]
    fn two_by_two_uniform() {
        // η = 1, n = 2: r is uniform on (-1, 1)
        let lkj = LkjPrior::new(2, 1.0).unwrap();
        let c: DMatrix<f64> = DMatrix::from_row_slice(2, 2, &[1.0, 0.3, 0.3, 1.0]);
        assert::close(lkj.ln_f(&c), -(2.0_f64.ln()), 1E-12);
    }

    #[test]
    fn two_by_two_matches_beta_density() {
        // For n = 2, (r + 1) / 2 ~ Beta(η, η)
        let eta: f64 = 2.5;
        let lkj = LkjPrior::new(2, eta).unwrap();
        let r = -0.4;
        let c: DMatrix<f64> = DMatrix::from_row_slice(2, 2, &[1.0, r, r, 1.0]);
        let u: f64 = (r + 1.0) / 2.0;
        let ln_beta_pdf = (eta - 1.0) * (u.ln() + (1.0 - u).ln()) - eta.ln_beta(eta);
        // change of variables u = (r + 1) / 2
        assert::close(lkj.ln_f(&c), ln_beta_pdf - 2.0_f64.ln(), 1E-10);
    }

    #[test]
    fn three_by_three_uniform_normalizer() {
        // volume of the 3x3 correlation elliptope is π² / 2
        let lkj = LkjPrior::new(3, 1.0).unwrap();
        let expected = (std::f64::consts::PI.powi(2) / 2.0).ln();
        assert::close(lkj.ln_normalizer(), expected, 1E-10);
    }

    #[test]
    fn not_positive_definite() {
        let lkj = LkjPrior::new(2, 1.5).unwrap();
        let c: DMatrix<f64> = DMatrix::from_row_slice(2, 2, &[1.0, 1.2, 1.2, 1.0]);
        assert_eq!(lkj.ln_f(&c), f64::NEG_INFINITY);
        assert_eq!(lkj.ln_f(&DMatrix::identity(3, 3)), f64::NEG_INFINITY);
    }

    #[test]
    fn rejects_bad_parameters() {
        assert_eq!(LkjPrior::new(0, 1.0), Err(PriorError::InvalidDimension(0)));
        assert!(LkjPrior::new(2, 0.0).is_err());
    }

    #[test]
    fn draws_are_correlation_matrices() {
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let lkj = LkjPrior::new(4, 1.0).unwrap();
        for c in lkj.sample(50, &mut rng) {
            assert!(c.diagonal().iter().all(|d| (d - 1.0).abs() < 1E-12));
            assert!(c.relative_eq(&c.transpose(), 1E-12, 1E-12));
            assert!(lkj.ln_f(&c).is_finite());
        }
    }

    #[test]
    fn covariance_prior_splits_into_sd_and_correlation() {
        let sd_prior = GammaPrior::new(1.0, 0.15).unwrap();
        let prior = LkjCovariancePrior::new(2, 0.5, sd_prior.clone()).unwrap();
        let (s1, s2, r) = (2.0, 0.5, 0.25);
        let cov: DMatrix<f64> = DMatrix::from_row_slice(2, 2, &[
            s1 * s1,
            r * s1 * s2,
            r * s1 * s2,
            s2 * s2,
        ]);
        let corr: DMatrix<f64> = DMatrix::from_row_slice(2, 2, &[1.0, r, r, 1.0]);
        let expected = LkjPrior::new(2, 0.5).unwrap().ln_f(&corr)
            + sd_prior.ln_f(&s1)
            + sd_prior.ln_f(&s2);
        assert::close(prior.ln_f(&cov), expected, 1E-12);
        assert::close(prior.eta(), 0.5, 0.0);
        assert_eq!(prior.n(), 2);
    }

    #[test]
    fn covariance_prior_draws_are_in_support() {
        let mut rng = Xoshiro256Plus::seed_from_u64(3);
        let sd_prior =
            SmoothedBoxPrior::new((-6.0_f64).exp(), 1.25_f64.exp(), 0.05)
                .unwrap();
        let prior = LkjCovariancePrior::new(3, 1.5, sd_prior).unwrap();
        for cov in prior.sample(20, &mut rng) {
            assert!(prior.ln_f(&cov).is_finite());
        }
    }
}
