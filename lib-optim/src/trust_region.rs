//! Bound constrained trust region method with a dogleg step and a BFGS
//! model of the Hessian.

use crate::minimize::{
    projected_grad_norm, Bounds, IterationState, LinearConstraints, Monitor,
    OptimizeResult, Status,
};
use crate::projected::active_set;
use crate::Result;
use log::debug;
use nalgebra::{DMatrix, DVector};

/// Parameters for the trust region optimizer
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrustRegionParams {
    pub max_iter: usize,
    /// Stop once the infinity norm of the projected gradient is below this
    pub gtol: f64,
    /// Stop once the radius shrinks below this
    pub xtol: f64,
    pub initial_radius: f64,
    pub max_radius: f64,
    /// Minimal ratio of actual to predicted reduction for a step to be taken
    pub eta: f64,
}

impl Default for TrustRegionParams {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            gtol: 1E-8,
            xtol: 1E-8,
            initial_radius: 1.0,
            max_radius: 1E3,
            eta: 1E-4,
        }
    }
}

impl TrustRegionParams {
    pub fn with_max_iter(self, max_iter: usize) -> Self {
        Self { max_iter, ..self }
    }

    pub fn with_gtol(self, gtol: f64) -> Self {
        Self { gtol, ..self }
    }

    pub fn with_initial_radius(self, initial_radius: f64) -> Self {
        Self {
            initial_radius,
            ..self
        }
    }
}

/// Schedule of the log barrier used for linear constraints
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BarrierParams {
    /// Barrier weight of the first subproblem
    pub initial: f64,
    /// Factor the weight shrinks by between subproblems
    pub decay: f64,
    /// Weight of the last subproblem
    pub min: f64,
}

impl Default for BarrierParams {
    fn default() -> Self {
        Self {
            initial: 0.1,
            decay: 0.2,
            min: 1E-9,
        }
    }
}

/// Dogleg step of the model `g·p + p·B·p / 2` inside `|p| <= radius`.
/// `b` must be positive definite.
fn dogleg(b: &DMatrix<f64>, g: &DVector<f64>, radius: f64) -> DVector<f64> {
    let newton = b.clone().cholesky().map(|chol| -chol.solve(g));
    if let Some(p_b) = &newton {
        if p_b.norm() <= radius {
            return p_b.clone();
        }
    }

    let gbg = g.dot(&(b * g));
    let g_norm = g.norm();
    if gbg <= 0.0 {
        return -g * (radius / g_norm);
    }
    let p_u = -g * (g.norm_squared() / gbg);
    let p_u_norm = p_u.norm();
    let p_b = match newton {
        Some(p_b) if p_u_norm < radius => p_b,
        _ => return -g * (radius / g_norm),
    };

    // |p_u + tau (p_b - p_u)| = radius, tau in [0, 1]
    let d = &p_b - &p_u;
    let a = d.norm_squared();
    let bq = 2.0 * p_u.dot(&d);
    let c = p_u_norm * p_u_norm - radius * radius;
    let tau = (-bq + (bq * bq - 4.0 * a * c).max(0.0).sqrt()) / (2.0 * a);
    p_u + d * tau.clamp(0.0, 1.0)
}

/// Restrict the model to the free components: active rows and columns of
/// `b` are replaced by the identity and the gradient is zeroed there.
fn restrict(
    b: &DMatrix<f64>,
    g: &DVector<f64>,
    active: &[bool],
) -> (DMatrix<f64>, DVector<f64>) {
    let mut b_free = b.clone();
    let mut g_free = g.clone();
    for (i, _) in active.iter().enumerate().filter(|(_, a)| **a) {
        b_free.row_mut(i).fill(0.0);
        b_free.column_mut(i).fill(0.0);
        b_free[(i, i)] = 1.0;
        g_free[i] = 0.0;
    }
    (b_free, g_free)
}

/// Direct BFGS update of the Hessian model
fn update_hessian(b: &mut DMatrix<f64>, s: &DVector<f64>, y: &DVector<f64>) {
    let sty = s.dot(y);
    let bs = &*b * s;
    let sbs = s.dot(&bs);
    if sty <= 1E-10 || sbs <= 0.0 {
        return;
    }
    *b += y * y.transpose() / sty - &bs * bs.transpose() / sbs;
}

pub fn trust_region<F>(
    x0: DVector<f64>,
    bounds: Option<&Bounds>,
    params: &TrustRegionParams,
    f: &F,
    monitor: &mut Monitor<'_>,
) -> Result<OptimizeResult>
where
    F: Fn(&DVector<f64>) -> (f64, DVector<f64>),
{
    let n = x0.len();
    let project =
        |x: &DVector<f64>| bounds.map_or_else(|| x.clone(), |b| b.project(x));

    let mut b = DMatrix::identity(n, n);
    let mut radius = params.initial_radius;
    let mut x = project(&x0);
    let (mut f_x, mut g_x) = f(&x);

    let mut nit = 0;
    loop {
        let pg = projected_grad_norm(&x, &g_x, bounds);
        if pg <= params.gtol {
            return Ok(OptimizeResult::new(
                x,
                f_x,
                nit,
                Status::Converged,
                "`gtol` termination condition is satisfied.",
            ));
        }
        if radius < params.xtol {
            return Ok(OptimizeResult::new(
                x,
                f_x,
                nit,
                Status::Converged,
                "`xtol` termination condition is satisfied.",
            ));
        }
        if nit >= params.max_iter {
            return Ok(OptimizeResult::new(
                x,
                f_x,
                nit,
                Status::MaxIterations,
                "The maximum number of function evaluations is exceeded.",
            ));
        }

        let active = active_set(&x, &g_x, bounds);
        let (b_free, g_free) = restrict(&b, &g_x, &active);
        let p = dogleg(&b_free, &g_free, radius);

        let x_trial = project(&(&x + &p));
        let s = &x_trial - &x;
        let (f_trial, g_trial) = f(&x_trial);

        let predicted = -(g_x.dot(&s) + 0.5 * s.dot(&(&b * &s)));
        let actual = f_x - f_trial;
        let rho = if predicted > 0.0 && f_trial.is_finite() {
            actual / predicted
        } else {
            -1.0
        };

        let s_norm = s.norm();
        if rho < 0.25 {
            radius *= 0.25;
        } else if rho > 0.75 && s_norm >= 0.99 * radius {
            radius = (2.0 * radius).min(params.max_radius);
        }

        if f_trial.is_finite() {
            update_hessian(&mut b, &s, &(&g_trial - &g_x));
        }
        if rho > params.eta {
            x = x_trial;
            f_x = f_trial;
            g_x = g_trial;
        }
        nit += 1;

        debug!(
            "trust_region: i = {}, f = {:.6e}, rho = {:.3}, radius = {:.3e}",
            nit, f_x, rho, radius
        );

        let state = IterationState {
            nit,
            x: x.clone(),
            fun: f_x,
            grad_norm: projected_grad_norm(&x, &g_x, bounds),
            radius: Some(radius),
        };
        if monitor(&state)? {
            return Ok(OptimizeResult::new(
                x,
                f_x,
                nit,
                Status::Converged,
                "`callback` function requested termination.",
            ));
        }
    }
}

/// Trust region under linear inequality constraints `A x <= b`.
///
/// Solves a sequence of barrier subproblems
///
/// ```math
/// min f(x) - μ Σ_i ln(b - A x)_i
/// ```
/// with [`trust_region`], warm started from the previous solution, while
/// `μ` shrinks to `barrier.min`. Points outside the feasible region are
/// rejected as infinite, so every iterate stays strictly feasible. The
/// iteration budget and the monitor are shared by all subproblems.
pub fn barrier_trust_region<F>(
    x0: DVector<f64>,
    bounds: Option<&Bounds>,
    constraints: &LinearConstraints,
    params: &TrustRegionParams,
    barrier: &BarrierParams,
    f: &F,
    monitor: &mut Monitor<'_>,
) -> Result<OptimizeResult>
where
    F: Fn(&DVector<f64>) -> (f64, DVector<f64>),
{
    let mut x = bounds.map_or_else(|| x0.clone(), |b| b.project(&x0));
    constraints.check_interior(&x)?;

    let mut mu = barrier.initial;
    let mut nit = 0;
    loop {
        let penalized = |x: &DVector<f64>| {
            let slack = constraints.slack(x);
            if slack.iter().any(|&s| !(s > 0.0)) {
                return (f64::INFINITY, DVector::zeros(x.len()));
            }
            let (fx, gx) = f(x);
            let ln_slack: f64 = slack.iter().map(|s| s.ln()).sum();
            let grad = gx + constraints.a().transpose() * slack.map(|s| mu / s);
            (fx - mu * ln_slack, grad)
        };
        let inner_params = TrustRegionParams {
            max_iter: params.max_iter.saturating_sub(nit),
            ..*params
        };

        let mut stopped = false;
        let inner = {
            let mut inner_monitor = |state: &IterationState| -> Result<bool> {
                let stop = monitor(state)?;
                stopped |= stop;
                Ok(stop)
            };
            trust_region(x, bounds, &inner_params, &penalized, &mut inner_monitor)?
        };
        nit += inner.nit;
        x = inner.x;
        debug!(
            "barrier_trust_region: mu = {:.3e}, nit = {}, f = {:.6e}",
            mu, nit, inner.fun
        );

        let finished = |status: Status, message: &str| -> Result<OptimizeResult> {
            let fun = f(&x).0;
            Ok(OptimizeResult::new(x.clone(), fun, nit, status, message))
        };
        if stopped {
            return finished(
                Status::Converged,
                "`callback` function requested termination.",
            );
        }
        if inner.status != Status::Converged as i32 || nit >= params.max_iter {
            return finished(
                Status::MaxIterations,
                "The maximum number of function evaluations is exceeded.",
            );
        }
        if mu <= barrier.min {
            return finished(
                Status::Converged,
                "`gtol` termination condition is satisfied.",
            );
        }
        mu = (mu * barrier.decay).max(barrier.min);
    }
}
