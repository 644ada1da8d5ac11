//! Joint Gaussian distributions over model outputs
use crate::consts::{DEFAULT_CHOLESKY_JITTER, HALF_LN_2PI};
use crate::linalg::{cholesky_with_jitter, flatten, KroneckerProduct};
use crate::result::{Error, Result};
use crate::traits::{Mean, Rv};
use nalgebra::linalg::Cholesky;
use nalgebra::{DMatrix, DVector, Dyn};
use rand::Rng;
use rand_distr::StandardNormal;

/// [Multivariate Gaussian/Normal Distribution](https://en.wikipedia.org/wiki/Multivariate_normal_distribution),
/// 𝒩(μ, Σ).
///
/// The Cholesky factor of `Σ` is computed once at construction, with a
/// single jittered retry for nearly singular covariances.
#[derive(Debug, Clone)]
pub struct MultivariateNormal {
    mean: DVector<f64>,
    cov: DMatrix<f64>,
    chol: Cholesky<f64, Dyn>,
}

impl MultivariateNormal {
    pub fn new(mean: DVector<f64>, cov: DMatrix<f64>) -> Result<Self> {
        if cov.shape() != (mean.len(), mean.len()) {
            return Err(Error::shape(
                "covariance",
                format!("{0}x{0}", mean.len()),
                format!("{}x{}", cov.nrows(), cov.ncols()),
            ));
        }
        let chol = cholesky_with_jitter(&cov, DEFAULT_CHOLESKY_JITTER)?;
        Ok(Self { mean, cov, chol })
    }

    pub fn standard(dims: usize) -> Result<Self> {
        Self::new(DVector::zeros(dims), DMatrix::identity(dims, dims))
    }

    pub fn dims(&self) -> usize {
        self.mean.len()
    }

    pub fn cov(&self) -> &DMatrix<f64> {
        &self.cov
    }

    /// Lower triangular `L` with `L Lᵀ = Σ`
    pub fn scale_tril(&self) -> DMatrix<f64> {
        self.chol.l()
    }

    /// `ln |Σ|`
    pub fn ln_det(&self) -> f64 {
        2.0 * self.chol.l_dirty().diagonal().iter().map(|d| d.ln()).sum::<f64>()
    }
}

impl Rv<DVector<f64>> for MultivariateNormal {
    fn ln_f(&self, x: &DVector<f64>) -> f64 {
        if x.len() != self.dims() {
            return f64::NEG_INFINITY;
        }
        let diff = x - &self.mean;
        let alpha = self.chol.solve(&diff);
        -0.5 * diff.dot(&alpha)
            - 0.5 * self.ln_det()
            - self.dims() as f64 * HALF_LN_2PI
    }

    fn draw<R: Rng>(&self, rng: &mut R) -> DVector<f64> {
        let z = DVector::from_fn(self.dims(), |_, _| rng.sample(StandardNormal));
        &self.mean + self.chol.l() * z
    }
}

impl Mean<DVector<f64>> for MultivariateNormal {
    fn mean(&self) -> Option<DVector<f64>> {
        Some(self.mean.clone())
    }
}

/// Covariance of a [`MultitaskMvn`]
#[derive(Debug, Clone, PartialEq)]
pub enum MultitaskCovariance {
    /// Block design covariance `K_data ⊗ K_task`
    Kronecker(KroneckerProduct),
    /// Independent outputs with the given `n x t` variances
    Diagonal(DMatrix<f64>),
}

/// Gaussian over `n x t` outputs, flattened row-major for joint quantities
#[derive(Debug, Clone, PartialEq)]
pub struct MultitaskMvn {
    mean: DMatrix<f64>,
    covariance: MultitaskCovariance,
}

impl MultitaskMvn {
    pub fn new(mean: DMatrix<f64>, covariance: MultitaskCovariance) -> Result<Self> {
        let (n, t) = mean.shape();
        let cov_shape = match &covariance {
            MultitaskCovariance::Kronecker(kp) => (kp.left().nrows(), kp.right().nrows()),
            MultitaskCovariance::Diagonal(var) => var.shape(),
        };
        if cov_shape != (n, t) {
            return Err(Error::shape(
                "multitask covariance",
                format!("{n} points x {t} tasks"),
                format!("{} points x {} tasks", cov_shape.0, cov_shape.1),
            ));
        }
        Ok(Self { mean, covariance })
    }

    /// `n x t` mean
    pub fn mean(&self) -> &DMatrix<f64> {
        &self.mean
    }

    pub fn covariance(&self) -> &MultitaskCovariance {
        &self.covariance
    }

    pub fn num_tasks(&self) -> usize {
        self.mean.ncols()
    }

    /// Marginal variances, `n x t`
    pub fn variance(&self) -> DMatrix<f64> {
        match &self.covariance {
            MultitaskCovariance::Kronecker(kp) => {
                kp.left().diagonal() * kp.right().diagonal().transpose()
            }
            MultitaskCovariance::Diagonal(var) => var.clone(),
        }
    }

    /// The full `nt x nt` covariance
    pub fn dense_covariance(&self) -> DMatrix<f64> {
        match &self.covariance {
            MultitaskCovariance::Kronecker(kp) => kp.to_dense(),
            MultitaskCovariance::Diagonal(var) => DMatrix::from_diagonal(&flatten(var)),
        }
    }

    /// Materialize as a [`MultivariateNormal`] over the flattened outputs
    pub fn to_mvn(&self) -> Result<MultivariateNormal> {
        MultivariateNormal::new(flatten(&self.mean), self.dense_covariance())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::LN_2PI;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256Plus;

    #[test]
    fn standard_ln_f_at_zero() {
        let mvn = MultivariateNormal::standard(3).unwrap();
        let x = DVector::zeros(3);
        assert::close(mvn.ln_f(&x), -1.5 * LN_2PI, 1E-12);
    }

    #[test]
    fn ln_f_matches_closed_form() {
        let cov: DMatrix<f64> = DMatrix::from_row_slice(2, 2, &[2.0, 0.5, 0.5, 1.0]);
        let mvn = MultivariateNormal::new(DVector::from_row_slice(&[1.0, -1.0]), cov.clone())
            .unwrap();
        let x: DVector<f64> = DVector::from_row_slice(&[0.5, 0.0]);
        let diff = &x - DVector::from_row_slice(&[1.0, -1.0]);
        let inv = cov.clone().try_inverse().unwrap();
        let expected = -0.5 * (diff.transpose() * inv * &diff)[0]
            - 0.5 * cov.determinant().ln()
            - LN_2PI;
        assert::close(mvn.ln_f(&x), expected, 1E-12);
        assert_eq!(mvn.ln_f(&DVector::zeros(3)), f64::NEG_INFINITY);
    }

    #[test]
    fn rejects_mismatched_covariance() {
        let res = MultivariateNormal::new(DVector::zeros(2), DMatrix::identity(3, 3));
        assert!(matches!(res, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn draws_have_expected_covariance() {
        let mut rng = Xoshiro256Plus::seed_from_u64(11);
        let cov: DMatrix<f64> = DMatrix::from_row_slice(2, 2, &[1.0, 0.8, 0.8, 1.0]);
        let mvn = MultivariateNormal::new(DVector::zeros(2), cov).unwrap();
        let xs = mvn.sample(20_000, &mut rng);
        let cross = xs.iter().map(|x| x[0] * x[1]).sum::<f64>() / xs.len() as f64;
        assert::close(cross, 0.8, 0.05);
    }

    #[test]
    fn multitask_variance_is_kronecker_diagonal() {
        let data: DMatrix<f64> = DMatrix::from_row_slice(2, 2, &[1.0, 0.3, 0.3, 2.0]);
        let task: DMatrix<f64> = DMatrix::from_row_slice(2, 2, &[0.5, 0.1, 0.1, 4.0]);
        let mvn = MultitaskMvn::new(
            DMatrix::zeros(2, 2),
            MultitaskCovariance::Kronecker(KroneckerProduct::new(data, task)),
        )
        .unwrap();
        let var = mvn.variance();
        assert::close(var[(1, 0)], 2.0 * 0.5, 1E-14);
        assert::close(var[(0, 1)], 4.0, 1E-14);
        assert_eq!(flatten(&var), mvn.dense_covariance().diagonal());
        assert!(mvn.to_mvn().is_ok());
    }
}
