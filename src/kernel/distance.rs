use nalgebra::base::constraint::{
    SameNumberOfColumns, SameNumberOfRows, ShapeConstraint,
};
use nalgebra::base::storage::Storage;
use nalgebra::{DVector, Dim, Matrix, RealField};
use num_traits::Zero;

/// Squared distance with a separate length scale per dimension
///
/// ```math
/// r² = Σ_k ((a_k - b_k) / l_k)²
/// ```
#[inline]
pub fn ard_sq_dist<N, R1, C1, S1, R2, C2, S2>(
    m1: &Matrix<N, R1, C1, S1>,
    m2: &Matrix<N, R2, C2, S2>,
    scales: &DVector<N>,
) -> N
where
    N: RealField + Copy,
    R1: Dim,
    C1: Dim,
    S1: Storage<N, R1, C1>,
    R2: Dim,
    C2: Dim,
    S2: Storage<N, R2, C2>,
    ShapeConstraint: SameNumberOfRows<R1, R2> + SameNumberOfColumns<C1, C2>,
{
    m1.iter()
        .zip(m2.iter())
        .zip(scales.iter())
        .fold(Zero::zero(), |acc: N, ((&a, &b), &l)| {
            let diff = (a - b) / l;
            acc + diff * diff
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{dvector, RowDVector};

    #[test]
    fn unit_scales_are_euclidean() {
        let a = RowDVector::from_row_slice(&[1.0, 2.0, 3.0]);
        let b = RowDVector::from_row_slice(&[0.0, 0.0, 1.0]);
        let d = ard_sq_dist(&a, &b, &dvector![1.0, 1.0, 1.0]);
        assert::close(d, 9.0, 1E-14);
    }

    #[test]
    fn scales_divide_each_dimension() {
        let a = RowDVector::from_row_slice(&[1.0, 2.0]);
        let b = RowDVector::from_row_slice(&[0.0, 0.0]);
        let d = ard_sq_dist(&a, &b, &dvector![0.5, 4.0]);
        assert::close(d, 4.0 + 0.25, 1E-14);
    }
}
