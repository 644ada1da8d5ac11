use super::{IndexKernel, Kernel, KernelError};
use crate::linalg::KroneckerProduct;
use nalgebra::base::constraint::{SameNumberOfColumns, ShapeConstraint};
use nalgebra::base::storage::Storage;
use nalgebra::{DVector, Dim, Matrix};

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

/// Joint covariance over (point, task) pairs in a block design,
/// `K_data(x1, x2) ⊗ B`
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct MultitaskKernel<K: Kernel> {
    data_covar: K,
    task_covar: IndexKernel,
}

impl<K: Kernel> MultitaskKernel<K> {
    pub fn new(data_covar: K, task_covar: IndexKernel) -> Self {
        Self {
            data_covar,
            task_covar,
        }
    }

    pub fn data_covar(&self) -> &K {
        &self.data_covar
    }

    pub fn task_covar(&self) -> &IndexKernel {
        &self.task_covar
    }

    pub fn num_tasks(&self) -> usize {
        self.task_covar.num_tasks()
    }

    pub fn covariance<R1, R2, C1, C2, S1, S2>(
        &self,
        x1: &Matrix<f64, R1, C1, S1>,
        x2: &Matrix<f64, R2, C2, S2>,
    ) -> KroneckerProduct
    where
        R1: Dim,
        R2: Dim,
        C1: Dim,
        C2: Dim,
        S1: Storage<f64, R1, C1>,
        S2: Storage<f64, R2, C2>,
        ShapeConstraint: SameNumberOfColumns<C1, C2>,
    {
        KroneckerProduct::new(
            self.data_covar.covariance(x1, x2),
            self.task_covar.covar_matrix(),
        )
    }

    pub fn n_parameters(&self) -> usize {
        self.data_covar.n_parameters() + self.task_covar.n_parameters()
    }

    /// Data kernel parameters followed by the task kernel's
    pub fn parameters(&self) -> DVector<f64> {
        let a = self.data_covar.parameters();
        let b = self.task_covar.parameters();
        DVector::from_iterator(
            a.len() + b.len(),
            a.iter().chain(b.iter()).copied(),
        )
    }

    pub fn consume_parameters<'p>(
        &self,
        params: &'p [f64],
    ) -> Result<(Self, &'p [f64]), KernelError> {
        let (data_covar, rest) = self.data_covar.consume_parameters(params)?;
        let (task_covar, rest) = self.task_covar.consume_parameters(rest)?;
        Ok((Self::new(data_covar, task_covar), rest))
    }

    pub fn ln_prior(&self) -> f64 {
        self.data_covar.ln_prior() + self.task_covar.ln_prior()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{MaternKernel, Nu};
    use nalgebra::{dvector, DMatrix};

    #[test]
    fn dense_equals_kron_of_factors() {
        let k = MultitaskKernel::new(
            MaternKernel::new(Nu::FiveHalves, dvector![0.7]).unwrap(),
            IndexKernel::new(2, 1).unwrap(),
        );
        let x: DMatrix<f64> = DMatrix::from_row_slice(3, 1, &[0.0, 0.5, 1.0]);
        let kp = k.covariance(&x, &x);
        let dense = kp.to_dense();
        let kxx = k.data_covar().covariance(&x, &x);
        let b = k.task_covar().covar_matrix();
        // (point 1, task 0) and (point 2, task 1) sit at 1 * 2 + 0 and 2 * 2 + 1
        assert::close(dense[(2, 5)], kxx[(1, 2)] * b[(0, 1)], 1E-14);
        assert_eq!(dense.shape(), (6, 6));
    }

    #[test]
    fn parameters_split_between_factors() {
        let k = MultitaskKernel::new(
            MaternKernel::with_default_prior(2),
            IndexKernel::new(2, 1).unwrap(),
        );
        assert_eq!(k.n_parameters(), 2 + 2 + 2);
        let params: Vec<f64> = (0..7).map(|i| i as f64 * 0.1).collect();
        let (k2, rest) = k.consume_parameters(&params).unwrap();
        assert_eq!(rest.len(), 1);
        assert::close(rest[0], 0.6, 1E-14);
        assert::close(k2.data_covar().length_scale()[1], 0.1_f64.exp(), 1E-14);
        assert::close(k2.task_covar().covar_factor()[(1, 0)], 0.3, 1E-14);
    }
}
