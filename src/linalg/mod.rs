//! Structured linear operators over dense `nalgebra` matrices
//!
//! Joint multi-task covariances are `nt x nt`; everything here works on the
//! `n x n` and `t x t` factors instead. Joint vectors are flattened
//! row-major (point-major, task-minor), so entry `(i, j)` of an `n x t`
//! matrix sits at `i * t + j` and `(A ⊗ B) vec(Y) = vec(A Y Bᵀ)`.

mod batch;
mod decomposition;
mod kronecker;
mod solve;

pub use batch::BatchRepeat;
pub use decomposition::{
    cat_rows, cholesky, cholesky_with_jitter, root_decomposition,
    root_inv_decomposition, Diagonalization,
};
pub use kronecker::{flatten, unflatten, KroneckerProduct};
pub use solve::{KroneckerEigenSolver, KroneckerSolver};

/// Errors from structured linear algebra
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LinalgError {
    /// Cholesky factorization failed
    #[error("{dim}x{dim} matrix is not positive definite")]
    NotPositiveDefinite { dim: usize },
    /// The symmetric eigensolver did not converge
    #[error("eigendecomposition of a {dim}x{dim} matrix did not converge")]
    EigenFailed { dim: usize },
    /// A square matrix was required
    #[error("expected a square matrix, got {nrows}x{ncols}")]
    NotSquare { nrows: usize, ncols: usize },
    /// Operands of incompatible size
    #[error("{op}: expected dimension {expected}, got {got}")]
    DimensionMismatch {
        op: &'static str,
        expected: usize,
        got: usize,
    },
    /// Index past the end of a batch
    #[error("batch index {index} out of range for a batch of {len}")]
    BatchIndex { index: usize, len: usize },
}

pub(crate) fn ensure_square(
    m: &nalgebra::DMatrix<f64>,
) -> Result<usize, LinalgError> {
    if m.is_square() {
        Ok(m.nrows())
    } else {
        Err(LinalgError::NotSquare {
            nrows: m.nrows(),
            ncols: m.ncols(),
        })
    }
}
