//! Projected quasi-Newton method for box constrained problems
//!
//! Components sitting on a bound with the gradient pushing outward are held
//! fixed for the iteration, the remaining ones take a BFGS step that is
//! projected back into the box and shortened by Armijo backtracking.

use crate::bfgs::update_inverse_hessian;
use crate::minimize::{
    projected_grad_norm, Bounds, IterationState, Monitor, OptimizeResult,
    Status,
};
use crate::Result;
use log::debug;
use nalgebra::{DMatrix, DVector};

/// Parameters for the projected BFGS optimizer
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProjectedParams {
    /// Maximum number of iterations to run
    pub max_iter: usize,
    /// Stop once the infinity norm of the projected gradient is below this
    pub pgtol: f64,
    /// Stop once the relative reduction of the objective is below this
    pub ftol: f64,
    /// Sufficient decrease coefficient of the backtracking search
    pub c1: f64,
    /// Maximum number of step halvings
    pub max_backtrack: usize,
}

impl Default for ProjectedParams {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            pgtol: 1E-5,
            ftol: 1E-12,
            c1: 1E-4,
            max_backtrack: 40,
        }
    }
}

impl ProjectedParams {
    pub fn with_max_iter(self, max_iter: usize) -> Self {
        Self { max_iter, ..self }
    }

    pub fn with_pgtol(self, pgtol: f64) -> Self {
        Self { pgtol, ..self }
    }

    pub fn with_ftol(self, ftol: f64) -> Self {
        Self { ftol, ..self }
    }
}

/// Mask of the components held at a bound: `true` where `x` sits on a bound
/// and a descent step would leave the box.
pub(crate) fn active_set(
    x: &DVector<f64>,
    g: &DVector<f64>,
    bounds: Option<&Bounds>,
) -> Vec<bool> {
    match bounds {
        None => vec![false; x.len()],
        Some(b) => x
            .iter()
            .zip(g.iter())
            .zip(b.lower().iter().zip(b.upper().iter()))
            .map(|((xi, gi), (l, u))| {
                (*xi <= *l && *gi > 0.0) || (*xi >= *u && *gi < 0.0)
            })
            .collect(),
    }
}

fn mask(v: &mut DVector<f64>, active: &[bool]) {
    v.iter_mut()
        .zip(active.iter())
        .filter(|(_, a)| **a)
        .for_each(|(vi, _)| *vi = 0.0);
}

fn project(x: &DVector<f64>, bounds: Option<&Bounds>) -> DVector<f64> {
    bounds.map_or_else(|| x.clone(), |b| b.project(x))
}

pub fn projected_bfgs<F>(
    x0: DVector<f64>,
    bounds: Option<&Bounds>,
    params: &ProjectedParams,
    f: &F,
    monitor: &mut Monitor<'_>,
) -> Result<OptimizeResult>
where
    F: Fn(&DVector<f64>) -> (f64, DVector<f64>),
{
    let n = x0.len();
    let mut h = DMatrix::identity(n, n);

    let mut x = project(&x0, bounds);
    let (mut f_x, mut g_x) = f(&x);

    if projected_grad_norm(&x, &g_x, bounds) <= params.pgtol {
        return Ok(OptimizeResult::new(
            x,
            f_x,
            0,
            Status::Converged,
            "CONVERGENCE: NORM_OF_PROJECTED_GRADIENT_<=_PGTOL",
        ));
    }

    let mut nit = 0;
    while nit < params.max_iter {
        let active = active_set(&x, &g_x, bounds);
        let mut g_free = g_x.clone();
        mask(&mut g_free, &active);

        let mut dir = -(&h * &g_free);
        mask(&mut dir, &active);
        if dir.dot(&g_free) >= 0.0 {
            debug!("projected_bfgs: not a descent direction, resetting");
            h = DMatrix::identity(n, n);
            dir = -g_free.clone();
        }

        // The very first step is scaled so it moves by at most one unit.
        let mut alpha = if nit == 0 {
            1.0_f64.min(1.0 / dir.amax())
        } else {
            1.0
        };

        let mut accepted = None;
        for _ in 0..params.max_backtrack {
            let x_trial = project(&(&x + &dir * alpha), bounds);
            let (f_trial, g_trial) = f(&x_trial);
            let decrease = g_x.dot(&(&x_trial - &x));
            if f_trial.is_finite() && f_trial <= f_x + params.c1 * decrease {
                accepted = Some((x_trial, f_trial, g_trial));
                break;
            }
            alpha *= 0.5;
        }

        let Some((x_new, f_new, g_new)) = accepted else {
            debug!("projected_bfgs: backtracking failed at i = {}", nit);
            return Ok(OptimizeResult::new(
                x,
                f_x,
                nit,
                Status::Abnormal,
                "ABNORMAL_TERMINATION_IN_LNSRCH",
            ));
        };

        let s = &x_new - &x;
        let y = &g_new - &g_x;
        let f_old = f_x;
        x = x_new;
        f_x = f_new;
        g_x = g_new;
        nit += 1;

        update_inverse_hessian(&mut h, &s, &y);

        let pg = projected_grad_norm(&x, &g_x, bounds);
        debug!(
            "projected_bfgs: i = {}, f = {:.6e}, |pg| = {:.3e}, alpha = {:.3e}",
            nit, f_x, pg, alpha
        );

        let state = IterationState {
            nit,
            x: x.clone(),
            fun: f_x,
            grad_norm: pg,
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

        if pg <= params.pgtol {
            return Ok(OptimizeResult::new(
                x,
                f_x,
                nit,
                Status::Converged,
                "CONVERGENCE: NORM_OF_PROJECTED_GRADIENT_<=_PGTOL",
            ));
        }

        let scale = f_old.abs().max(f_x.abs()).max(1.0);
        if (f_old - f_x) / scale <= params.ftol {
            return Ok(OptimizeResult::new(
                x,
                f_x,
                nit,
                Status::Converged,
                "CONVERGENCE: REL_REDUCTION_OF_F_<=_FACTR*EPSMCH",
            ));
        }
    }

    Ok(OptimizeResult::new(
        x,
        f_x,
        nit,
        Status::MaxIterations,
        "STOP: TOTAL NO. of ITERATIONS REACHED LIMIT",
    ))
}
