//! Covariance functions over input features and task indices

use nalgebra::base::constraint::{SameNumberOfColumns, ShapeConstraint};
use nalgebra::base::storage::Storage;
use nalgebra::{DMatrix, DVector, Dim, Matrix};

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

mod constant;
mod covgrad;
mod distance;
mod index;
mod matern;
mod multitask;
mod ops;

pub use constant::ConstantKernel;
pub use covgrad::{CovGrad, CovGradError};
pub use distance::ard_sq_dist;
pub use index::IndexKernel;
pub(crate) use index::factor_gradient;
pub use matern::{MaternKernel, Nu};
pub use multitask::MultitaskKernel;
pub use ops::ProductKernel;

/// Kernel Function
pub trait Kernel: std::fmt::Debug + Clone + PartialEq {
    /// Number of (log-scale) hyper-parameters
    fn n_parameters(&self) -> usize;

    /// Cross covariance between the rows of `x1` and the rows of `x2`
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
        ShapeConstraint: SameNumberOfColumns<C1, C2>;

    /// Covariance of the rows of `x` with themselves along with its
    /// derivative with respect to each entry of `parameters()`.
    fn covariance_with_gradient<R, C, S>(
        &self,
        x: &Matrix<f64, R, C, S>,
    ) -> Result<(DMatrix<f64>, CovGrad), KernelError>
    where
        R: Dim,
        C: Dim,
        S: Storage<f64, R, C>;

    /// Reports if the given kernel function is stationary.
    fn is_stationary(&self) -> bool;

    /// Returns the diagonal of kernel(x, x)
    fn diag<R, C, S>(&self, x: &Matrix<f64, R, C, S>) -> DVector<f64>
    where
        R: Dim,
        C: Dim,
        S: Storage<f64, R, C>;

    /// Return the corresponding parameter vector.
    /// Positive parameters are on a log-scale.
    fn parameters(&self) -> DVector<f64>;

    /// Create a new kernel of the same kind from the provided parameters,
    /// keeping everything that is not a parameter (priors, dimensions).
    fn reparameterize(&self, params: &[f64]) -> Result<Self, KernelError>;

    /// Takes a sequence of parameters and consumes only the ones it needs
    /// to create itself.
    fn consume_parameters<'p>(
        &self,
        params: &'p [f64],
    ) -> Result<(Self, &'p [f64]), KernelError> {
        let n = self.n_parameters();
        if params.len() < n {
            return Err(KernelError::MissingParameters(n - params.len()));
        }
        let (cur, next) = params.split_at(n);
        Ok((self.reparameterize(cur)?, next))
    }

    /// Log density of the hyper-parameter priors, zero without priors
    fn ln_prior(&self) -> f64 {
        0.0
    }

    fn mul<B: Kernel>(self, other: B) -> ProductKernel<Self, B> {
        ProductKernel::new(self, other)
    }
}

/// Errors from Kernel construction
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub enum KernelError {
    /// Parameter Out of Bounds
    #[error("parameter {name} is out of bounds ({}, {}), given: {given}", bounds.0, bounds.1)]
    ParameterOutOfBounds {
        /// Name of parameter
        name: String,
        /// Value given
        given: f64,
        /// Lower and upper bounds on value
        bounds: (f64, f64),
    },
    /// Too many parameters provided
    #[error("{0} extra parameters provided to kernel")]
    ExtraneousParameters(usize),
    /// Too few parameters provided
    #[error("missing {0} parameters")]
    MissingParameters(usize),
    /// Task indices must name a row of the task covariance
    #[error("task index {given} is out of range for {num_tasks} tasks")]
    InvalidTaskIndex { given: f64, num_tasks: usize },
    /// Error building a covariance gradient
    #[error("covariance gradient error: {0}")]
    CovGrad(#[from] CovGradError),
}

/// Checks that `params` has exactly `n` entries
pub(crate) fn check_n_params(
    params: &[f64],
    n: usize,
) -> Result<(), KernelError> {
    use std::cmp::Ordering;
    match params.len().cmp(&n) {
        Ordering::Less => Err(KernelError::MissingParameters(n - params.len())),
        Ordering::Greater => {
            Err(KernelError::ExtraneousParameters(params.len() - n))
        }
        Ordering::Equal => Ok(()),
    }
}

pub(crate) fn positive(name: &str, value: f64) -> Result<f64, KernelError> {
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(KernelError::ParameterOutOfBounds {
            name: name.to_string(),
            given: value,
            bounds: (0.0, f64::INFINITY),
        })
    }
}

macro_rules! impl_mul {
    ($type: ty) => {
        impl<B> std::ops::Mul<B> for $type
        where
            B: Kernel,
        {
            type Output = ProductKernel<$type, B>;

            fn mul(self, rhs: B) -> Self::Output {
                ProductKernel::new(self, rhs)
            }
        }
    };
}

impl_mul!(ConstantKernel);
impl_mul!(MaternKernel);
