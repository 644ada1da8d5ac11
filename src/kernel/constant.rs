use super::{check_n_params, positive, CovGrad, Kernel, KernelError};
use crate::priors::GammaPrior;
use crate::traits::Rv;
use nalgebra::base::constraint::{SameNumberOfColumns, ShapeConstraint};
use nalgebra::base::storage::Storage;
use nalgebra::{dvector, DMatrix, DVector, Dim, Matrix};
use std::f64;

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

/// Constant covariance, used as the output scale of a product kernel
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct ConstantKernel {
    value: f64,
    prior: Option<GammaPrior>,
}

impl ConstantKernel {
    pub fn new(value: f64) -> Result<Self, KernelError> {
        positive("value", value)?;
        Ok(Self::new_unchecked(value))
    }

    pub fn new_unchecked(value: f64) -> Self {
        Self { value, prior: None }
    }

    /// Output scale with a Gamma(2, 0.15) prior, started at `ln 2`
    pub fn outputscale() -> Self {
        Self {
            value: std::f64::consts::LN_2,
            prior: Some(GammaPrior::new_unchecked(2.0, 0.15)),
        }
    }

    pub fn with_prior(self, prior: GammaPrior) -> Self {
        Self {
            prior: Some(prior),
            ..self
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn prior(&self) -> Option<&GammaPrior> {
        self.prior.as_ref()
    }
}

impl Kernel for ConstantKernel {
    fn n_parameters(&self) -> usize {
        1
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
        DMatrix::from_element(x1.nrows(), x2.nrows(), self.value)
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
        let cov = DMatrix::from_element(n, n, self.value);
        Ok((cov.clone(), CovGrad::new(vec![cov])?))
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
        DVector::from_element(x.nrows(), self.value)
    }

    fn parameters(&self) -> DVector<f64> {
        dvector![self.value.ln()]
    }

    fn reparameterize(&self, params: &[f64]) -> Result<Self, KernelError> {
        check_n_params(params, 1)?;
        Ok(Self {
            value: positive("value", params[0].exp())?,
            prior: self.prior.clone(),
        })
    }

    fn ln_prior(&self) -> f64 {
        self.prior.as_ref().map_or(0.0, |p| p.ln_f(&self.value))
    }
}
