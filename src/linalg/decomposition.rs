use super::{ensure_square, LinalgError};
use crate::consts::EIGEN_RELATIVE_CUTOFF;
use log::debug;
use nalgebra::linalg::{Cholesky, SymmetricEigen};
use nalgebra::{DMatrix, DVector, Dyn};

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

/// Eigendecomposition `Q Λ Qᵀ` of a symmetric matrix
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct Diagonalization {
    values: DVector<f64>,
    vectors: DMatrix<f64>,
}

impl Diagonalization {
    /// Diagonalize `m`, symmetrizing it first to absorb round-off.
    pub fn new(m: &DMatrix<f64>) -> Result<Self, LinalgError> {
        let dim = ensure_square(m)?;
        if dim == 0 {
            return Ok(Self {
                values: DVector::zeros(0),
                vectors: DMatrix::zeros(0, 0),
            });
        }
        let sym = (m + m.transpose()) * 0.5;
        let eig = SymmetricEigen::try_new(sym, f64::EPSILON, 0)
            .ok_or(LinalgError::EigenFailed { dim })?;
        Ok(Self {
            values: eig.eigenvalues,
            vectors: eig.eigenvectors,
        })
    }

    /// Eigenvalues, unordered
    pub fn values(&self) -> &DVector<f64> {
        &self.values
    }

    /// Orthonormal eigenvectors, one per column
    pub fn vectors(&self) -> &DMatrix<f64> {
        &self.vectors
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// `R = Q Λ^{1/2}` with negative eigenvalues clamped to zero, `R Rᵀ ≈ M`
    pub fn root(&self) -> DMatrix<f64> {
        let scale = self.values.map(|v| v.max(0.0).sqrt());
        scale_columns(&self.vectors, &scale)
    }

    /// `S = Q Λ^{-1/2}`, `Sᵀ M S = I` on the numerical range of `M`.
    /// Directions with eigenvalues below a relative cutoff are dropped, so
    /// this is a pseudo-inverse root for singular matrices.
    pub fn inverse_root(&self) -> DMatrix<f64> {
        let cutoff = self.cutoff();
        let scale = self
            .values
            .map(|v| if v > cutoff { 1.0 / v.sqrt() } else { 0.0 });
        scale_columns(&self.vectors, &scale)
    }

    /// `Q Λ Qᵀ`
    pub fn reconstruct(&self) -> DMatrix<f64> {
        let root = scale_columns(&self.vectors, &self.values);
        root * self.vectors.transpose()
    }

    /// `ln |M|`, requiring every eigenvalue to be positive
    pub fn ln_det(&self) -> Result<f64, LinalgError> {
        if self.values.iter().any(|&v| v <= 0.0) {
            Err(LinalgError::NotPositiveDefinite { dim: self.dim() })
        } else {
            Ok(self.values.iter().map(|v| v.ln()).sum())
        }
    }

    fn cutoff(&self) -> f64 {
        let max = self.values.iter().fold(0.0_f64, |acc, v| acc.max(*v));
        max * EIGEN_RELATIVE_CUTOFF
    }
}

fn scale_columns(m: &DMatrix<f64>, scale: &DVector<f64>) -> DMatrix<f64> {
    let mut out = m.clone();
    for (mut col, s) in out.column_iter_mut().zip(scale.iter()) {
        col *= *s;
    }
    out
}

/// Root `R` of a symmetric PSD matrix, `R Rᵀ ≈ m`
pub fn root_decomposition(m: &DMatrix<f64>) -> Result<DMatrix<f64>, LinalgError> {
    Ok(Diagonalization::new(m)?.root())
}

/// Inverse root `S` of a symmetric PD matrix, `S Sᵀ ≈ m⁻¹`
pub fn root_inv_decomposition(
    m: &DMatrix<f64>,
) -> Result<DMatrix<f64>, LinalgError> {
    Ok(Diagonalization::new(m)?.inverse_root())
}

pub fn cholesky(m: &DMatrix<f64>) -> Result<Cholesky<f64, Dyn>, LinalgError> {
    let dim = ensure_square(m)?;
    Cholesky::new(m.clone()).ok_or(LinalgError::NotPositiveDefinite { dim })
}

/// Cholesky factorization, retried once with `jitter` on the diagonal
pub fn cholesky_with_jitter(
    m: &DMatrix<f64>,
    jitter: f64,
) -> Result<Cholesky<f64, Dyn>, LinalgError> {
    let dim = ensure_square(m)?;
    Cholesky::new(m.clone()).map_or_else(
        || {
            debug!("cholesky: adding jitter {:e} to a {}x{} matrix", jitter, dim, dim);
            let jittered = m + DMatrix::identity(dim, dim) * jitter;
            Cholesky::new(jittered).ok_or(LinalgError::NotPositiveDefinite { dim })
        },
        Ok,
    )
}

/// Extend a root of `K` (given by its diagonalization) to a root of
///
/// ```text
/// [ K  Cᵀ ]
/// [ C  S  ]
/// ```
///
/// where `cross = C` is `q x n` and `new = S` is `q x q`. The result is the
/// `(n + q) x (n + q)` lower block triangular `[[R, 0], [E, L]]` with
/// `R = Q Λ^{1/2}`, `E = C Q Λ^{-1/2}` and `L` a root of the Schur
/// complement `S - E Eᵀ` with `jitter` on its diagonal.
pub fn cat_rows(
    diag: &Diagonalization,
    cross: &DMatrix<f64>,
    new: &DMatrix<f64>,
    jitter: f64,
) -> Result<DMatrix<f64>, LinalgError> {
    let n = diag.dim();
    let q = ensure_square(new)?;
    if cross.ncols() != n {
        return Err(LinalgError::DimensionMismatch {
            op: "cat_rows (cross columns)",
            expected: n,
            got: cross.ncols(),
        });
    }
    if cross.nrows() != q {
        return Err(LinalgError::DimensionMismatch {
            op: "cat_rows (cross rows)",
            expected: q,
            got: cross.nrows(),
        });
    }

    let root = diag.root();
    let lower_left = cross * diag.inverse_root();
    let schur = new - &lower_left * lower_left.transpose()
        + DMatrix::identity(q, q) * jitter;
    let schur_root = root_decomposition(&schur)?;

    let mut out = DMatrix::zeros(n + q, n + q);
    out.view_mut((0, 0), (n, n)).copy_from(&root);
    out.view_mut((n, 0), (q, n)).copy_from(&lower_left);
    out.view_mut((n, n), (q, q)).copy_from(&schur_root);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spd() -> DMatrix<f64> {
        DMatrix::from_row_slice(3, 3, &[
            4.0, 1.0, 0.5, //
            1.0, 3.0, 0.2, //
            0.5, 0.2, 2.0,
        ])
    }

    #[test]
    fn reconstruct_recovers_matrix() {
        let d = Diagonalization::new(&spd()).unwrap();
        assert!(d.reconstruct().relative_eq(&spd(), 1E-12, 1E-12));
    }

    #[test]
    fn root_and_inverse_root() {
        let m = spd();
        let d = Diagonalization::new(&m).unwrap();
        let r = d.root();
        assert!((&r * r.transpose()).relative_eq(&m, 1E-12, 1E-12));

        let s = d.inverse_root();
        let whitened = s.transpose() * &m * &s;
        assert!(whitened.relative_eq(&DMatrix::identity(3, 3), 1E-12, 1E-12));
        let inv = m.clone().try_inverse().unwrap();
        assert!((&s * s.transpose()).relative_eq(&inv, 1E-12, 1E-12));
    }

    #[test]
    fn root_clamps_negative_eigenvalues() {
        // rank one, eigenvalues {2, 0}; round-off may make one slightly
        // negative
        let m: DMatrix<f64> = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let r = root_decomposition(&m).unwrap();
        assert!(r.iter().all(|x| x.is_finite()));
        assert!((&r * r.transpose()).relative_eq(&m, 1E-12, 1E-12));
        let s = root_inv_decomposition(&m).unwrap();
        assert!(s.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn ln_det_matches_cholesky() {
        let m = spd();
        let d = Diagonalization::new(&m).unwrap();
        let chol = cholesky(&m).unwrap();
        let ln_det_chol: f64 =
            2.0 * chol.l().diagonal().iter().map(|x| x.ln()).sum::<f64>();
        assert::close(d.ln_det().unwrap(), ln_det_chol, 1E-12);
    }

    #[test]
    fn non_square_is_rejected() {
        let m = DMatrix::zeros(2, 3);
        assert_eq!(
            Diagonalization::new(&m),
            Err(LinalgError::NotSquare { nrows: 2, ncols: 3 })
        );
    }

    #[test]
    fn jitter_rescues_singular_cholesky() {
        let m: DMatrix<f64> = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        assert!(cholesky_with_jitter(&m, 1E-6).is_ok());
        let neg: DMatrix<f64> = DMatrix::from_row_slice(2, 2, &[-1.0, 0.0, 0.0, 1.0]);
        assert_eq!(
            cholesky_with_jitter(&neg, 1E-6).err(),
            Some(LinalgError::NotPositiveDefinite { dim: 2 })
        );
    }

    #[test]
    fn cat_rows_extends_root() {
        // joint PD matrix, split into a 3x3 train block and a 2x2 test block
        let x: [f64; 5] = [0.0, 0.3, 0.7, 1.1, 0.45];
        let joint = DMatrix::from_fn(5, 5, |i, j| {
            (-(x[i] - x[j]) * (x[i] - x[j]) / 0.5).exp()
                + if i == j { 1E-3 } else { 0.0 }
        });
        let k = joint.view((0, 0), (3, 3)).into_owned();
        let cross = joint.view((3, 0), (2, 3)).into_owned();
        let new = joint.view((3, 3), (2, 2)).into_owned();

        let d = Diagonalization::new(&k).unwrap();
        let root = cat_rows(&d, &cross, &new, 0.0).unwrap();
        assert_eq!(root.shape(), (5, 5));
        assert!((&root * root.transpose()).relative_eq(&joint, 1E-9, 1E-9));
    }

    #[test]
    fn empty_matrix_has_empty_diagonalization() {
        let d = Diagonalization::new(&DMatrix::zeros(0, 0)).unwrap();
        assert_eq!(d.dim(), 0);
        assert_eq!(d.root().shape(), (0, 0));
        assert::close(d.ln_det().unwrap(), 0.0, 0.0);

        // appending no rows leaves the root unchanged
        let k = spd();
        let d = Diagonalization::new(&k).unwrap();
        let root = cat_rows(&d, &DMatrix::zeros(0, 3), &DMatrix::zeros(0, 0), 1E-8).unwrap();
        assert!((&root * root.transpose()).relative_eq(&k, 1E-12, 1E-12));
    }

    #[test]
    fn cat_rows_checks_shapes() {
        let d = Diagonalization::new(&spd()).unwrap();
        let res = cat_rows(&d, &DMatrix::zeros(2, 2), &DMatrix::identity(2, 2), 0.0);
        assert_eq!(
            res,
            Err(LinalgError::DimensionMismatch {
                op: "cat_rows (cross columns)",
                expected: 3,
                got: 2
            })
        );
    }
}
