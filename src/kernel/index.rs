use super::{check_n_params, CovGrad, KernelError};
use crate::priors::LkjCovariancePrior;
use crate::traits::Rv;
use nalgebra::{DMatrix, DVector};

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

/// Covariance over discrete task indices
///
/// ```math
/// B = F Fᵀ + diag(v)
/// ```
/// with a `t x rank` factor `F` and positive per-task variances `v`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct IndexKernel {
    covar_factor: DMatrix<f64>,
    var: DVector<f64>,
    prior: Option<LkjCovariancePrior>,
}

impl IndexKernel {
    /// `num_tasks` tasks with a rank `rank` factor. `F` starts as the
    /// leading `rank` columns of the identity and every `v` at `ln 2`.
    pub fn new(num_tasks: usize, rank: usize) -> Result<Self, KernelError> {
        if num_tasks == 0 {
            return Err(KernelError::MissingParameters(1));
        }
        Ok(Self {
            covar_factor: DMatrix::identity(num_tasks, rank),
            var: DVector::repeat(num_tasks, std::f64::consts::LN_2),
            prior: None,
        })
    }

    pub fn with_prior(self, prior: LkjCovariancePrior) -> Self {
        Self {
            prior: Some(prior),
            ..self
        }
    }

    pub fn with_covar_factor(
        self,
        covar_factor: DMatrix<f64>,
    ) -> Result<Self, KernelError> {
        if covar_factor.nrows() != self.num_tasks() {
            return Err(KernelError::ParameterOutOfBounds {
                name: "covar_factor rows".to_string(),
                given: covar_factor.nrows() as f64,
                bounds: (self.num_tasks() as f64, self.num_tasks() as f64),
            });
        }
        Ok(Self {
            covar_factor,
            ..self
        })
    }

    pub fn num_tasks(&self) -> usize {
        self.var.len()
    }

    pub fn rank(&self) -> usize {
        self.covar_factor.ncols()
    }

    pub fn covar_factor(&self) -> &DMatrix<f64> {
        &self.covar_factor
    }

    pub fn var(&self) -> &DVector<f64> {
        &self.var
    }

    pub fn prior(&self) -> Option<&LkjCovariancePrior> {
        self.prior.as_ref()
    }

    /// The full `t x t` task covariance `B`
    pub fn covar_matrix(&self) -> DMatrix<f64> {
        &self.covar_factor * self.covar_factor.transpose()
            + DMatrix::from_diagonal(&self.var)
    }

    /// `B` with its derivative with respect to each entry of
    /// `parameters()`
    pub fn covar_matrix_with_gradient(
        &self,
    ) -> Result<(DMatrix<f64>, CovGrad), KernelError> {
        let t = self.num_tasks();
        let mut slices = factor_gradient(&self.covar_factor);
        slices.extend(self.var.iter().enumerate().map(|(j, &v)| {
            let mut d = DMatrix::zeros(t, t);
            d[(j, j)] = v;
            d
        }));
        Ok((self.covar_matrix(), CovGrad::new(slices)?))
    }

    /// `B[i1, i2]` for two lists of task indices
    pub fn covariance(
        &self,
        i1: &[usize],
        i2: &[usize],
    ) -> Result<DMatrix<f64>, KernelError> {
        let t = self.num_tasks();
        if let Some(&bad) = i1.iter().chain(i2.iter()).find(|&&i| i >= t) {
            return Err(KernelError::InvalidTaskIndex {
                given: bad as f64,
                num_tasks: t,
            });
        }
        let b = self.covar_matrix();
        Ok(DMatrix::from_fn(i1.len(), i2.len(), |r, c| b[(i1[r], i2[c])]))
    }

    /// Convert a column of task values into task indices
    pub fn task_indices<'a>(
        &self,
        values: impl IntoIterator<Item = &'a f64>,
    ) -> Result<Vec<usize>, KernelError> {
        let t = self.num_tasks();
        values
            .into_iter()
            .map(|&v| {
                if v >= 0.0 && v.fract() == 0.0 && (v as usize) < t {
                    Ok(v as usize)
                } else {
                    Err(KernelError::InvalidTaskIndex {
                        given: v,
                        num_tasks: t,
                    })
                }
            })
            .collect()
    }

    pub fn n_parameters(&self) -> usize {
        self.covar_factor.len() + self.var.len()
    }

    /// The factor `F` row-major, followed by `ln v`
    pub fn parameters(&self) -> DVector<f64> {
        let factor = self.covar_factor.transpose();
        DVector::from_iterator(
            self.n_parameters(),
            factor.iter().copied().chain(self.var.iter().map(|v| v.ln())),
        )
    }

    pub fn reparameterize(&self, params: &[f64]) -> Result<Self, KernelError> {
        check_n_params(params, self.n_parameters())?;
        let (t, rank) = (self.num_tasks(), self.rank());
        let (factor, ln_var) = params.split_at(t * rank);
        Ok(Self {
            covar_factor: DMatrix::from_row_slice(t, rank, factor),
            var: DVector::from_iterator(t, ln_var.iter().map(|v| v.exp())),
            prior: self.prior.clone(),
        })
    }

    pub fn consume_parameters<'p>(
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

    pub fn ln_prior(&self) -> f64 {
        self.prior
            .as_ref()
            .map_or(0.0, |p| p.ln_f(&self.covar_matrix()))
    }
}

/// Derivatives of `F Fᵀ` with respect to each entry of the `t x rank`
/// factor `F`, taken row-major
pub(crate) fn factor_gradient(factor: &DMatrix<f64>) -> Vec<DMatrix<f64>> {
    let (t, rank) = factor.shape();
    let mut slices = Vec::with_capacity(t * rank);
    for i in 0..t {
        for k in 0..rank {
            let col = factor.column(k);
            let mut d = DMatrix::zeros(t, t);
            for j in 0..t {
                d[(i, j)] += col[j];
                d[(j, i)] += col[j];
            }
            slices.push(d);
        }
    }
    slices
}
