use super::{
    cholesky_with_jitter, ensure_square, flatten, unflatten, Diagonalization,
    KroneckerProduct, LinalgError,
};
use nalgebra::linalg::Cholesky;
use nalgebra::{DMatrix, DVector, Dyn};

/// Solver for `(Kx ⊗ Kt + N)` over `n x t` right hand sides in the
/// eigenbasis of the two factors.
///
/// Both noise structures reduce to
///
/// ```math
/// (Kx ⊗ Kt + N)⁻¹ = (Wx ⊗ Wt) D (Wx ⊗ Wt)ᵀ
/// ```
/// with `D` diagonal:
///
/// * `N = σ² I`: `W = Q`, `D_kl = 1 / (λx_k λt_l + σ²)`
/// * `N = Σx ⊗ Σt`: `W = Σ^{-1/2} U` where `U Λ Uᵀ` diagonalizes the
///   whitened factor, `D_kl = 1 / (λx_k λt_l + 1)`
#[derive(Clone, Debug, PartialEq)]
pub struct KroneckerEigenSolver {
    wx: DMatrix<f64>,
    wt: DMatrix<f64>,
    inv_eigs: DMatrix<f64>,
    ln_det: f64,
}

impl KroneckerEigenSolver {
    /// Homoscedastic noise `σ² I`
    pub fn diagonal(
        data: &Diagonalization,
        task: &Diagonalization,
        noise: f64,
    ) -> Self {
        Self::from_eigen(
            data.vectors().clone(),
            task.vectors().clone(),
            data.values(),
            task.values(),
            noise,
            0.0,
        )
    }

    /// Kronecker structured noise `Σx ⊗ Σt`
    pub fn whitened(
        data: &DMatrix<f64>,
        task: &DMatrix<f64>,
        noise_data: &DMatrix<f64>,
        noise_task: &DMatrix<f64>,
    ) -> Result<Self, LinalgError> {
        let n = ensure_square(data)?;
        let t = ensure_square(task)?;
        let noise_x = Diagonalization::new(noise_data)?;
        let noise_t = Diagonalization::new(noise_task)?;
        let sx = noise_x.inverse_root();
        let st = noise_t.inverse_root();

        let ux = Diagonalization::new(&(sx.transpose() * data * &sx))?;
        let ut = Diagonalization::new(&(st.transpose() * task * &st))?;
        let noise_ln_det =
            t as f64 * noise_x.ln_det()? + n as f64 * noise_t.ln_det()?;
        Ok(Self::from_eigen(
            sx * ux.vectors(),
            st * ut.vectors(),
            ux.values(),
            ut.values(),
            1.0,
            noise_ln_det,
        ))
    }

    fn from_eigen(
        wx: DMatrix<f64>,
        wt: DMatrix<f64>,
        eig_x: &DVector<f64>,
        eig_t: &DVector<f64>,
        shift: f64,
        extra_ln_det: f64,
    ) -> Self {
        let eigs = DMatrix::from_fn(eig_x.len(), eig_t.len(), |k, l| {
            eig_x[k] * eig_t[l] + shift
        });
        let ln_det = eigs.iter().map(|e| e.ln()).sum::<f64>() + extra_ln_det;
        Self {
            wx,
            wt,
            inv_eigs: eigs.map(f64::recip),
            ln_det,
        }
    }

    /// `vec⁻¹((Kx ⊗ Kt + N)⁻¹ vec(V))`
    pub fn solve(&self, v: &DMatrix<f64>) -> DMatrix<f64> {
        let projected = self.wx.transpose() * v * &self.wt;
        &self.wx * projected.component_mul(&self.inv_eigs) * self.wt.transpose()
    }

    /// Diagonal of `(A ⊗ B)(Kx ⊗ Kt + N)⁻¹(A ⊗ B)ᵀ` as a `q x s` matrix
    pub fn quad_diag(&self, a: &DMatrix<f64>, b: &DMatrix<f64>) -> DMatrix<f64> {
        let aw = (a * &self.wx).map(|x| x * x);
        let bw = (b * &self.wt).map(|x| x * x);
        aw * &self.inv_eigs * bw.transpose()
    }

    /// `tr((Kx ⊗ Kt + N)⁻¹ (A ⊗ B))` for square `A` (`n x n`) and `B`
    /// (`t x t`)
    pub fn inv_trace(&self, a: &DMatrix<f64>, b: &DMatrix<f64>) -> f64 {
        let da = (self.wx.transpose() * a * &self.wx).diagonal();
        let db = (self.wt.transpose() * b * &self.wt).diagonal();
        (da.transpose() * &self.inv_eigs * db)[(0, 0)]
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.wx.nrows(), self.wt.nrows())
    }

    pub fn ln_det(&self) -> f64 {
        self.ln_det
    }
}

/// Solver for `(Kx ⊗ Kt + N)` with either the eigenbasis shortcut or a
/// dense Cholesky factorization of the full `nt x nt` matrix when `N` has
/// no Kronecker structure.
#[derive(Clone, Debug)]
pub enum KroneckerSolver {
    Eigen(KroneckerEigenSolver),
    Dense {
        chol: Cholesky<f64, Dyn>,
        n: usize,
        t: usize,
    },
}

impl KroneckerSolver {
    /// Dense solver for `Kx ⊗ Kt + diag(vec(noise))` with `noise` `n x t`
    pub fn dense(
        data: &DMatrix<f64>,
        task: &DMatrix<f64>,
        noise: &DMatrix<f64>,
        jitter: f64,
    ) -> Result<Self, LinalgError> {
        let n = ensure_square(data)?;
        let t = ensure_square(task)?;
        if noise.shape() != (n, t) {
            return Err(LinalgError::DimensionMismatch {
                op: "KroneckerSolver::dense (noise entries)",
                expected: n * t,
                got: noise.len(),
            });
        }
        let full = data.kronecker(task) + DMatrix::from_diagonal(&flatten(noise));
        let chol = cholesky_with_jitter(&full, jitter)?;
        Ok(Self::Dense { chol, n, t })
    }

    pub fn solve(&self, v: &DMatrix<f64>) -> Result<DMatrix<f64>, LinalgError> {
        match self {
            Self::Eigen(eig) => Ok(eig.solve(v)),
            Self::Dense { chol, n, t } => {
                let x = chol.solve(&flatten(v));
                unflatten(&x, *n, *t)
            }
        }
    }

    /// See [`KroneckerEigenSolver::quad_diag`]
    pub fn quad_diag(
        &self,
        a: &DMatrix<f64>,
        b: &DMatrix<f64>,
    ) -> Result<DMatrix<f64>, LinalgError> {
        match self {
            Self::Eigen(eig) => Ok(eig.quad_diag(a, b)),
            Self::Dense { chol, .. } => {
                let cross = a.kronecker(b);
                let solved = chol.solve(&cross.transpose());
                let diag = cross
                    .row_iter()
                    .zip(solved.column_iter())
                    .map(|(row, col)| row.transpose().dot(&col));
                let diag = DVector::from_iterator(cross.nrows(), diag);
                unflatten(&diag, a.nrows(), b.nrows())
            }
        }
    }

    /// `tr((Kx ⊗ Kt + N)⁻¹ (A ⊗ B))` for every term `A ⊗ B`
    pub fn inv_traces(
        &self,
        terms: &[KroneckerProduct],
    ) -> Result<DVector<f64>, LinalgError> {
        let (n, t) = match self {
            Self::Eigen(eig) => eig.dims(),
            Self::Dense { n, t, .. } => (*n, *t),
        };
        for term in terms {
            if term.left().shape() != (n, n) || term.right().shape() != (t, t) {
                return Err(LinalgError::DimensionMismatch {
                    op: "KroneckerSolver::inv_traces",
                    expected: n * t,
                    got: term.nrows().max(term.ncols()),
                });
            }
        }
        match self {
            Self::Eigen(eig) => Ok(DVector::from_iterator(
                terms.len(),
                terms.iter().map(|term| eig.inv_trace(term.left(), term.right())),
            )),
            Self::Dense { chol, .. } => {
                let inv = chol.inverse();
                Ok(DVector::from_iterator(
                    terms.len(),
                    terms
                        .iter()
                        .map(|term| inv.tr_mul(&term.to_dense()).trace()),
                ))
            }
        }
    }

    /// `ln |Kx ⊗ Kt + N|`
    pub fn ln_det(&self) -> f64 {
        match self {
            Self::Eigen(eig) => eig.ln_det(),
            Self::Dense { chol, .. } => {
                2.0 * chol.l_dirty().diagonal().iter().map(|d| d.ln()).sum::<f64>()
            }
        }
    }
}
