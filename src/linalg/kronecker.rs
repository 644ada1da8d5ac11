use super::LinalgError;
use nalgebra::{DMatrix, DVector};

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

/// Row-major flattening of `m`: entry `(i, j)` lands at `i * ncols + j`.
pub fn flatten(m: &DMatrix<f64>) -> DVector<f64> {
    DVector::from_iterator(m.len(), m.transpose().iter().copied())
}

/// Inverse of [`flatten`]
pub fn unflatten(
    v: &DVector<f64>,
    nrows: usize,
    ncols: usize,
) -> Result<DMatrix<f64>, LinalgError> {
    if v.len() != nrows * ncols {
        return Err(LinalgError::DimensionMismatch {
            op: "unflatten",
            expected: nrows * ncols,
            got: v.len(),
        });
    }
    Ok(DMatrix::from_row_slice(nrows, ncols, v.as_slice()))
}

/// Lazy Kronecker product `left ⊗ right`
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct KroneckerProduct {
    left: DMatrix<f64>,
    right: DMatrix<f64>,
}

impl KroneckerProduct {
    pub fn new(left: DMatrix<f64>, right: DMatrix<f64>) -> Self {
        Self { left, right }
    }

    pub fn left(&self) -> &DMatrix<f64> {
        &self.left
    }

    pub fn right(&self) -> &DMatrix<f64> {
        &self.right
    }

    pub fn nrows(&self) -> usize {
        self.left.nrows() * self.right.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.left.ncols() * self.right.ncols()
    }

    /// `(L ⊗ R) v` computed as `vec(L V Rᵀ)`
    pub fn matvec(&self, v: &DVector<f64>) -> Result<DVector<f64>, LinalgError> {
        if v.len() != self.ncols() {
            return Err(LinalgError::DimensionMismatch {
                op: "KroneckerProduct::matvec",
                expected: self.ncols(),
                got: v.len(),
            });
        }
        let vm = unflatten(v, self.left.ncols(), self.right.ncols())?;
        Ok(flatten(&(&self.left * vm * self.right.transpose())))
    }

    /// `(L ⊗ R)ᵀ v`
    pub fn tr_matvec(
        &self,
        v: &DVector<f64>,
    ) -> Result<DVector<f64>, LinalgError> {
        if v.len() != self.nrows() {
            return Err(LinalgError::DimensionMismatch {
                op: "KroneckerProduct::tr_matvec",
                expected: self.nrows(),
                got: v.len(),
            });
        }
        let vm = unflatten(v, self.left.nrows(), self.right.nrows())?;
        Ok(flatten(&(self.left.transpose() * vm * &self.right)))
    }

    /// Product with a dense matrix, one column at a time
    pub fn matmul(
        &self,
        m: &DMatrix<f64>,
    ) -> Result<DMatrix<f64>, LinalgError> {
        let mut out = DMatrix::zeros(self.nrows(), m.ncols());
        for (j, col) in m.column_iter().enumerate() {
            out.set_column(j, &self.matvec(&col.into_owned())?);
        }
        Ok(out)
    }

    /// Diagonal of a square product
    pub fn diagonal(&self) -> DVector<f64> {
        let l = self.left.diagonal();
        let r = self.right.diagonal();
        flatten(&(l * r.transpose()))
    }

    pub fn transpose(&self) -> Self {
        Self::new(self.left.transpose(), self.right.transpose())
    }

    /// Materialize the full `nt x nt` matrix
    pub fn to_dense(&self) -> DMatrix<f64> {
        self.left.kronecker(&self.right)
    }
}
