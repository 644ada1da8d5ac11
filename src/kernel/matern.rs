use super::{
    ard_sq_dist, check_n_params, positive, CovGrad, Kernel, KernelError,
};
use crate::consts::SQRT_5;
use crate::priors::GammaPrior;
use crate::traits::Rv;
use nalgebra::base::constraint::{SameNumberOfColumns, ShapeConstraint};
use nalgebra::base::storage::Storage;
use nalgebra::{DMatrix, DVector, Dim, Matrix};
use std::f64;

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

/// Smoothness of a [`MaternKernel`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde1", serde(rename_all = "snake_case"))]
pub enum Nu {
    Half,
    ThreeHalves,
    FiveHalves,
}

impl Nu {
    /// Correlation at scaled distance `r`
    #[inline]
    fn correlation(self, r: f64) -> f64 {
        match self {
            Self::Half => (-r).exp(),
            Self::ThreeHalves => {
                let s = 3.0_f64.sqrt() * r;
                (1.0 + s) * (-s).exp()
            }
            Self::FiveHalves => {
                let s = SQRT_5 * r;
                (1.0 + s + s * s / 3.0) * (-s).exp()
            }
        }
    }

    /// `-(dk/dr) / r`, so that `dk / d ln l_k = g(r) d_k²` where `d_k` is
    /// the scaled difference along dimension `k`.
    #[inline]
    fn gradient_factor(self, r: f64) -> f64 {
        match self {
            Self::Half => {
                if r > 0.0 {
                    (-r).exp() / r
                } else {
                    0.0
                }
            }
            Self::ThreeHalves => 3.0 * (-(3.0_f64.sqrt()) * r).exp(),
            Self::FiveHalves => {
                let s = SQRT_5 * r;
                5.0 / 3.0 * (1.0 + s) * (-s).exp()
            }
        }
    }
}

/// Matérn Kernel with a length scale per input dimension (ARD)
///
/// ```math
/// ν = 5/2:  K(x, x') = (1 + √5 r + 5/3 r²) exp(-√5 r)
/// ```
/// with `r² = Σ_k (x_k - x'_k)² / l_k²`. `ν = 1/2` and `ν = 3/2` are the
/// exponential and once-differentiable members of the family.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct MaternKernel {
    nu: Nu,
    length_scale: DVector<f64>,
    length_scale_prior: Option<GammaPrior>,
}

impl MaternKernel {
    /// Create a new `MaternKernel` with one length scale per dimension.
    pub fn new(nu: Nu, length_scale: DVector<f64>) -> Result<Self, KernelError> {
        if length_scale.is_empty() {
            return Err(KernelError::MissingParameters(1));
        }
        for &l in length_scale.iter() {
            positive("length_scale", l)?;
        }
        Ok(Self {
            nu,
            length_scale,
            length_scale_prior: None,
        })
    }

    /// Create a new `MaternKernel` without checking inputs.
    pub fn new_unchecked(nu: Nu, length_scale: DVector<f64>) -> Self {
        Self {
            nu,
            length_scale,
            length_scale_prior: None,
        }
    }

    /// ARD Matérn-5/2 over `dim` inputs with a Gamma(3, 6) length scale
    /// prior and every length scale at `ln 2`.
    pub fn with_default_prior(dim: usize) -> Self {
        Self {
            nu: Nu::FiveHalves,
            length_scale: DVector::repeat(dim, std::f64::consts::LN_2),
            length_scale_prior: Some(GammaPrior::new_unchecked(3.0, 6.0)),
        }
    }

    pub fn with_length_scale_prior(self, prior: GammaPrior) -> Self {
        Self {
            length_scale_prior: Some(prior),
            ..self
        }
    }

    pub fn nu(&self) -> Nu {
        self.nu
    }

    pub fn length_scale(&self) -> &DVector<f64> {
        &self.length_scale
    }

    pub fn length_scale_prior(&self) -> Option<&GammaPrior> {
        self.length_scale_prior.as_ref()
    }

    pub fn dim(&self) -> usize {
        self.length_scale.len()
    }
}

impl Kernel for MaternKernel {
    fn n_parameters(&self) -> usize {
        self.length_scale.len()
    }

    fn covariance<R1, R2, C1, C2, S1, S2>(
        &self,
        x1: &Matrix<f64, R1, C1, S1>,
        x2: &Matrix<f64, R2, C2, S2>,
    ) -> DMatrix<f64>
    where
        R1: Dim,
        R2: Dim,
        C1: Dim,
        C2: Dim,
        S1: Storage<f64, R1, C1>,
        S2: Storage<f64, R2, C2>,
        ShapeConstraint: SameNumberOfColumns<C1, C2>,
    {
        let m = x1.nrows();
        let n = x2.nrows();

        let mut dm: DMatrix<f64> = DMatrix::zeros(m, n);
        for i in 0..m {
            for j in 0..n {
                let r = ard_sq_dist(&x1.row(i), &x2.row(j), &self.length_scale)
                    .sqrt();
                dm[(i, j)] = self.nu.correlation(r);
            }
        }
        dm
    }

    fn covariance_with_gradient<R, C, S>(
        &self,
        x: &Matrix<f64, R, C, S>,
    ) -> Result<(DMatrix<f64>, CovGrad), KernelError>
    where
        R: Dim,
        C: Dim,
        S: Storage<f64, R, C>,
    {
        let n = x.nrows();
        let dim = self.dim();
        let mut cov = DMatrix::zeros(n, n);
        let mut grad = vec![DMatrix::zeros(n, n); dim];
        let mut scaled = vec![0.0; dim];

        for i in 0..n {
            for j in 0..i {
                let mut r2 = 0.0;
                for (k, d) in scaled.iter_mut().enumerate() {
                    *d = (x[(i, k)] - x[(j, k)]) / self.length_scale[k];
                    r2 += *d * *d;
                }
                let r = r2.sqrt();
                let k_ij = self.nu.correlation(r);
                cov[(i, j)] = k_ij;
                cov[(j, i)] = k_ij;

                let g = self.nu.gradient_factor(r);
                for (k, d) in scaled.iter().enumerate() {
                    let dk = g * d * d;
                    grad[k][(i, j)] = dk;
                    grad[k][(j, i)] = dk;
                }
            }
            cov[(i, i)] = 1.0;
        }

        Ok((cov, CovGrad::new(grad)?))
    }

    fn is_stationary(&self) -> bool {
        true
    }

    fn diag<R, C, S>(&self, x: &Matrix<f64, R, C, S>) -> DVector<f64>
    where
        R: Dim,
        C: Dim,
        S: Storage<f64, R, C>,
    {
        DVector::repeat(x.nrows(), 1.0)
    }

    fn parameters(&self) -> DVector<f64> {
        self.length_scale.map(f64::ln)
    }

    fn reparameterize(&self, params: &[f64]) -> Result<Self, KernelError> {
        check_n_params(params, self.n_parameters())?;
        let length_scale = DVector::from_iterator(
            params.len(),
            params.iter().map(|p| p.exp()),
        );
        let kernel = Self::new(self.nu, length_scale)?;
        Ok(Self {
            length_scale_prior: self.length_scale_prior.clone(),
            ..kernel
        })
    }

    fn ln_prior(&self) -> f64 {
        self.length_scale_prior.as_ref().map_or(0.0, |prior| {
            self.length_scale.iter().map(|l| prior.ln_f(l)).sum()
        })
    }
}
