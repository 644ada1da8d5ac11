//! Broyden–Fletcher–Goldfarb–Shanno algorithm
//! Optimizes an unconstrained, once differentiable function

use crate::line_search::{wolfe_search, WolfeParams};
use crate::minimize::{IterationState, Monitor, OptimizeResult, Status};
use crate::Result;
use log::debug;
use nalgebra::{DMatrix, DVector};

/// Smallest curvature `s·y` for which the inverse Hessian is updated
const MIN_CURVATURE: f64 = 1E-10;

/// Parameters for the BFGS Optimizer
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BFGSParams {
    /// Maximum number of iterations to run
    pub max_iter: usize,
    /// Parameters given to the Wolfe line search algorithm.
    pub wolfe_params: WolfeParams,
    /// Exit accuracy on the gradient norm
    pub accuracy: f64,
}

impl Default for BFGSParams {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            wolfe_params: WolfeParams::default(),
            accuracy: 1E-7,
        }
    }
}

impl BFGSParams {
    pub fn with_accuracy(self, accuracy: f64) -> Self {
        Self { accuracy, ..self }
    }

    pub fn with_max_iter(self, max_iter: usize) -> Self {
        Self { max_iter, ..self }
    }

    pub fn with_wolfe_params(self, wolfe_params: WolfeParams) -> Self {
        Self {
            wolfe_params,
            ..self
        }
    }
}

/// Rank two update of the inverse Hessian approximation with step `s` and
/// gradient change `y`.
pub(crate) fn update_inverse_hessian(
    b_inv: &mut DMatrix<f64>,
    s: &DVector<f64>,
    y: &DVector<f64>,
) -> bool {
    let sty = s.dot(y);
    if sty <= MIN_CURVATURE {
        return false;
    }
    let bi_y = &*b_inv * y;
    let yt_bi_y = y.dot(&bi_y);

    let add = (s * s.transpose()) * ((sty + yt_bi_y) / (sty * sty));
    let sub = (&bi_y * s.transpose() + s * bi_y.transpose()) / sty;

    *b_inv += add - sub;
    true
}

pub fn bfgs<F>(
    x0: DVector<f64>,
    params: &BFGSParams,
    f: &F,
    monitor: &mut Monitor<'_>,
) -> Result<OptimizeResult>
where
    F: Fn(&DVector<f64>) -> (f64, DVector<f64>),
{
    let n = x0.nrows();
    let mut b_inv = DMatrix::identity(n, n);
    let mut fresh_hessian = true;

    let mut x = x0;
    let (mut f_x, mut g_x) = f(&x);
    if g_x.norm() < params.accuracy {
        return Ok(OptimizeResult::new(
            x,
            f_x,
            0,
            Status::Converged,
            "Optimization terminated successfully.",
        ));
    }

    let mut nit = 0;
    while nit < params.max_iter {
        let search_dir = -(&b_inv * &g_x);
        debug!(
            "bfgs: i = {}, f = {:.6e}, |g| = {:.3e}",
            nit,
            f_x,
            g_x.norm()
        );

        let step = wolfe_search(&params.wolfe_params, |e| {
            let (f_e, g_e) = f(&(&x + &search_dir * e));
            (f_e, g_e.dot(&search_dir))
        });

        let epsilon = match step {
            Ok(eps) => eps,
            Err(err) if !fresh_hessian => {
                debug!("bfgs: line search failed ({}), resetting Hessian", err);
                b_inv = DMatrix::identity(n, n);
                fresh_hessian = true;
                continue;
            }
            Err(err) => {
                debug!("bfgs: line search failed ({})", err);
                return Ok(OptimizeResult::new(
                    x,
                    f_x,
                    nit,
                    Status::Abnormal,
                    "Desired error not necessarily achieved due to precision loss.",
                ));
            }
        };

        let s: DVector<f64> = epsilon * &search_dir;
        x += &s;
        let g_x_last = g_x;
        (f_x, g_x) = f(&x);
        nit += 1;

        let state = IterationState {
            nit,
            x: x.clone(),
            fun: f_x,
            grad_norm: g_x.amax(),
            radius: None,
        };
        if monitor(&state)? {
            return Ok(OptimizeResult::new(
                x,
                f_x,
                nit,
                Status::Converged,
                "Stopped by callback.",
            ));
        }

        if g_x.norm() < params.accuracy {
            return Ok(OptimizeResult::new(
                x,
                f_x,
                nit,
                Status::Converged,
                "Optimization terminated successfully.",
            ));
        }

        let y: DVector<f64> = &g_x - &g_x_last;
        if update_inverse_hessian(&mut b_inv, &s, &y) {
            fresh_hessian = false;
        }
    }

    Ok(OptimizeResult::new(
        x,
        f_x,
        nit,
        Status::MaxIterations,
        "Maximum number of iterations has been exceeded.",
    ))
}
