use super::{CovGrad, Kernel, KernelError};
use nalgebra::base::constraint::{SameNumberOfColumns, ShapeConstraint};
use nalgebra::base::storage::Storage;
use nalgebra::{DMatrix, DVector, Dim, Matrix};

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

/// Kernel representing the element-wise product of two other kernels
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct ProductKernel<A, B>
where
    A: Kernel,
    B: Kernel,
{
    a: A,
    b: B,
}

impl<A, B> ProductKernel<A, B>
where
    A: Kernel,
    B: Kernel,
{
    /// Construct a new Kernel from two other Kernels
    pub fn new(a: A, b: B) -> Self {
        Self { a, b }
    }

    pub fn left(&self) -> &A {
        &self.a
    }

    pub fn right(&self) -> &B {
        &self.b
    }
}

impl<A, B, C> std::ops::Mul<C> for ProductKernel<A, B>
where
    A: Kernel,
    B: Kernel,
    C: Kernel,
{
    type Output = ProductKernel<Self, C>;

    fn mul(self, rhs: C) -> Self::Output {
        ProductKernel::new(self, rhs)
    }
}

impl<A, B> Kernel for ProductKernel<A, B>
where
    A: Kernel,
    B: Kernel,
{
    fn n_parameters(&self) -> usize {
        self.a.n_parameters() + self.b.n_parameters()
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
        let cov_a = self.a.covariance(x1, x2);
        let cov_b = self.b.covariance(x1, x2);
        cov_a.component_mul(&cov_b)
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
        let (cov_a, grad_a) = self.a.covariance_with_gradient(x)?;
        let (cov_b, grad_b) = self.b.covariance_with_gradient(x)?;
        let cov = cov_a.component_mul(&cov_b);
        let grad = grad_a
            .component_mul(&cov_b)?
            .concat(&grad_b.component_mul(&cov_a)?)?;
        Ok((cov, grad))
    }

    fn is_stationary(&self) -> bool {
        self.a.is_stationary() && self.b.is_stationary()
    }

    fn diag<R, C, S>(&self, x: &Matrix<f64, R, C, S>) -> DVector<f64>
    where
        R: Dim,
        C: Dim,
        S: Storage<f64, R, C>,
    {
        let a = self.a.diag(x);
        let b = self.b.diag(x);
        a.component_mul(&b)
    }

    fn parameters(&self) -> DVector<f64> {
        let a = self.a.parameters();
        let b = self.b.parameters();
        DVector::from_iterator(
            a.len() + b.len(),
            a.iter().chain(b.iter()).copied(),
        )
    }

    fn reparameterize(&self, params: &[f64]) -> Result<Self, KernelError> {
        let (a, b_params) = self.a.consume_parameters(params)?;
        let b = self.b.reparameterize(b_params)?;
        Ok(Self::new(a, b))
    }

    fn ln_prior(&self) -> f64 {
        self.a.ln_prior() + self.b.ln_prior()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{ConstantKernel, MaternKernel, Nu};
    use nalgebra::dvector;

    fn scaled_matern() -> ProductKernel<ConstantKernel, MaternKernel> {
        ConstantKernel::new(2.0).unwrap()
            * MaternKernel::new(Nu::FiveHalves, dvector![0.5, 1.5]).unwrap()
    }

    #[test]
    fn product_scales_covariance() {
        let k = scaled_matern();
        let x: DMatrix<f64> = DMatrix::from_row_slice(3, 2, &[0.0, 0.0, 0.2, 0.4, 1.0, 0.1]);
        let expected = k.right().covariance(&x, &x) * 2.0;
        assert!(k.covariance(&x, &x).relative_eq(&expected, 1E-14, 1E-14));
        assert!(k.diag(&x).relative_eq(&DVector::repeat(3, 2.0), 1E-14, 1E-14));
        assert!(k.is_stationary());
    }

    #[test]
    fn gradient_follows_the_product_rule() {
        let k = scaled_matern();
        let x: DMatrix<f64> = DMatrix::from_row_slice(3, 2, &[0.0, 0.0, 0.2, 0.4, 1.0, 0.1]);
        let (cov, grad) = k.covariance_with_gradient(&x).unwrap();
        assert!(cov.relative_eq(&k.covariance(&x, &x), 1E-14, 1E-14));
        assert_eq!(grad.len(), 3);
        // d/d ln c of c * M is the covariance itself
        assert!(grad[0].relative_eq(&cov, 1E-14, 1E-14));

        let (_, matern_grad) = k.right().covariance_with_gradient(&x).unwrap();
        assert!(grad[2].relative_eq(&(matern_grad[1].clone() * 2.0), 1E-14, 1E-14));
    }

    #[test]
    fn parameters_are_concatenated() {
        let k = scaled_matern();
        assert_eq!(k.n_parameters(), 3);
        let p = k.parameters();
        assert::close(p[0], 2.0_f64.ln(), 1E-14);
        assert::close(p[1], 0.5_f64.ln(), 1E-14);

        let k2 = k.reparameterize(&[0.0, 0.0, 0.0]).unwrap();
        assert::close(k2.left().value(), 1.0, 1E-14);
        assert_eq!(k2.right().length_scale(), &dvector![1.0, 1.0]);
        assert_eq!(
            k.reparameterize(&[0.0, 0.0, 0.0, 1.0]),
            Err(KernelError::ExtraneousParameters(1))
        );
    }
}
