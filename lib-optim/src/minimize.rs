//! Common entry point over the bounded and unbounded minimizers.

use crate::{bfgs, projected, trust_region, OptimizeError, Result};
use log::debug;
use nalgebra::{DMatrix, DVector};
use std::fmt;

/// Termination status, numbered as the L-BFGS-B family reports it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    /// Converged
    Converged = 0,
    /// The iteration limit (or a deadline) was reached
    MaxIterations = 1,
    /// The solver could not make progress, e.g. the line search failed
    Abnormal = 2,
}

/// Outcome of a minimization
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizeResult {
    /// Best point found
    pub x: DVector<f64>,
    /// Objective value at `x`
    pub fun: f64,
    /// Number of iterations
    pub nit: usize,
    /// Whether the solver reports convergence
    pub success: bool,
    /// Numeric status code, see [`Status`]
    pub status: i32,
    /// Human readable termination message
    pub message: String,
}

impl OptimizeResult {
    pub(crate) fn new(
        x: DVector<f64>,
        fun: f64,
        nit: usize,
        status: Status,
        message: &str,
    ) -> Self {
        Self {
            x,
            fun,
            nit,
            success: status == Status::Converged,
            status: status as i32,
            message: message.to_string(),
        }
    }
}

/// Box constraints `lower <= x <= upper`. Infinite ends are allowed.
#[derive(Clone, Debug, PartialEq)]
pub struct Bounds {
    lower: DVector<f64>,
    upper: DVector<f64>,
}

impl Bounds {
    pub fn new(lower: DVector<f64>, upper: DVector<f64>) -> Result<Self> {
        if lower.len() != upper.len() {
            return Err(OptimizeError::DimensionMismatch {
                expected: lower.len(),
                got: upper.len(),
            });
        }
        if let Some((index, (l, u))) = lower
            .iter()
            .zip(upper.iter())
            .enumerate()
            .find(|(_, (l, u))| l > u || l.is_nan() || u.is_nan())
        {
            return Err(OptimizeError::InvalidBounds {
                index,
                lower: *l,
                upper: *u,
            });
        }
        Ok(Self { lower, upper })
    }

    /// Build from `(lower, upper)` pairs
    pub fn from_pairs(pairs: &[(f64, f64)]) -> Result<Self> {
        let lower = DVector::from_iterator(pairs.len(), pairs.iter().map(|p| p.0));
        let upper = DVector::from_iterator(pairs.len(), pairs.iter().map(|p| p.1));
        Self::new(lower, upper)
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    pub fn lower(&self) -> &DVector<f64> {
        &self.lower
    }

    pub fn upper(&self) -> &DVector<f64> {
        &self.upper
    }

    /// Clamp `x` into the box
    pub fn project(&self, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(
            x.len(),
            x.iter()
                .zip(self.lower.iter().zip(self.upper.iter()))
                .map(|(xi, (l, u))| xi.max(*l).min(*u)),
        )
    }

    pub(crate) fn check_dim(&self, n: usize) -> Result<()> {
        if self.len() == n {
            Ok(())
        } else {
            Err(OptimizeError::DimensionMismatch {
                expected: n,
                got: self.len(),
            })
        }
    }
}

/// Linear inequality constraints `A x <= b`, one row of `A` per constraint.
///
/// Only [`Method::TrustConstr`] handles them, with a log barrier, so the
/// starting point must satisfy every constraint strictly.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearConstraints {
    a: DMatrix<f64>,
    b: DVector<f64>,
}

impl LinearConstraints {
    pub fn new(a: DMatrix<f64>, b: DVector<f64>) -> Result<Self> {
        if a.nrows() != b.len() {
            return Err(OptimizeError::DimensionMismatch {
                expected: a.nrows(),
                got: b.len(),
            });
        }
        Ok(Self { a, b })
    }

    /// Number of constraints
    pub fn len(&self) -> usize {
        self.b.len()
    }

    pub fn is_empty(&self) -> bool {
        self.b.is_empty()
    }

    pub fn a(&self) -> &DMatrix<f64> {
        &self.a
    }

    pub fn b(&self) -> &DVector<f64> {
        &self.b
    }

    /// `b - A x`, non-negative where `x` is feasible
    pub fn slack(&self, x: &DVector<f64>) -> DVector<f64> {
        &self.b - &self.a * x
    }

    pub(crate) fn check_dim(&self, n: usize) -> Result<()> {
        if self.a.ncols() == n {
            Ok(())
        } else {
            Err(OptimizeError::DimensionMismatch {
                expected: n,
                got: self.a.ncols(),
            })
        }
    }

    /// Errors unless every constraint holds strictly at `x`
    pub(crate) fn check_interior(&self, x: &DVector<f64>) -> Result<()> {
        match self.slack(x).iter().enumerate().find(|(_, s)| !(**s > 0.0)) {
            Some((index, &slack)) => {
                Err(OptimizeError::InfeasibleStart { index, slack })
            }
            None => Ok(()),
        }
    }
}

/// What a solver reports to its monitor after every iterate.
#[derive(Clone, Debug, PartialEq)]
pub struct IterationState {
    /// Iterations completed so far
    pub nit: usize,
    /// Current iterate
    pub x: DVector<f64>,
    /// Objective at `x`
    pub fun: f64,
    /// Infinity norm of the projected gradient at `x`
    pub grad_norm: f64,
    /// Trust region radius, for trust region solvers
    pub radius: Option<f64>,
}

/// Per-iterate hook threaded through every solver.
///
/// `Ok(true)` asks the solver to stop and report convergence, `Err` aborts
/// the run and is propagated unchanged.
pub type Monitor<'a> = dyn FnMut(&IterationState) -> Result<bool> + 'a;

/// Caller supplied iteration callback.
pub enum Callback<'a> {
    /// Receives the current iterate.
    Iterate(Box<dyn FnMut(&DVector<f64>) + 'a>),
    /// Receives the iterate and the solver state and may stop the solver by
    /// returning `true`. This is the signature of [`Method::TrustConstr`].
    WithState(Box<dyn FnMut(&DVector<f64>, &IterationState) -> bool + 'a>),
}

impl<'a> Callback<'a> {
    /// Whether the callback takes the solver state.
    pub fn carries_state(&self) -> bool {
        matches!(self, Self::WithState(_))
    }

    pub(crate) fn call(&mut self, state: &IterationState) -> bool {
        match self {
            Self::Iterate(f) => {
                f(&state.x);
                false
            }
            Self::WithState(f) => f(&state.x, state),
        }
    }
}

impl<'a> fmt::Debug for Callback<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Iterate(_) => write!(f, "Callback::Iterate"),
            Self::WithState(_) => write!(f, "Callback::WithState"),
        }
    }
}

/// User provided minimization routine.
pub trait CustomMinimizer {
    /// Minimize `fun` from `x0`. Implementations must call `monitor` after
    /// each iterate and propagate its errors.
    fn minimize(
        &self,
        fun: &dyn Fn(&DVector<f64>) -> (f64, DVector<f64>),
        x0: DVector<f64>,
        bounds: Option<&Bounds>,
        tol: Option<f64>,
        max_iter: usize,
        monitor: &mut Monitor<'_>,
    ) -> Result<OptimizeResult>;
}

/// Solver selection
pub enum Method {
    /// Unconstrained BFGS with a Wolfe line search
    Bfgs,
    /// Projected quasi-Newton honoring box bounds
    LBfgsB,
    /// Bound constrained trust region with a dogleg step, the only method
    /// that takes linear constraints
    TrustConstr,
    /// A user supplied routine
    Custom(Box<dyn CustomMinimizer>),
}

impl Method {
    /// The solver used when none is requested: bounded if there are bounds.
    pub fn default_for(bounds: Option<&Bounds>) -> Self {
        if bounds.is_some() {
            Self::LBfgsB
        } else {
            Self::Bfgs
        }
    }

    /// The solver used for the given options: `TrustConstr` under linear
    /// constraints, otherwise as [`Method::default_for`].
    pub(crate) fn default_for_options(
        bounds: Option<&Bounds>,
        constraints: Option<&LinearConstraints>,
    ) -> Self {
        if constraints.is_some() {
            Self::TrustConstr
        } else {
            Self::default_for(bounds)
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Bfgs => "BFGS",
            Self::LBfgsB => "L-BFGS-B",
            Self::TrustConstr => "trust-constr",
            Self::Custom(_) => "custom",
        }
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Method({})", self.name())
    }
}

/// Everything `minimize` accepts besides the objective and the start.
#[derive(Debug)]
pub struct MinimizeOptions<'a> {
    pub method: Option<Method>,
    pub bounds: Option<Bounds>,
    /// Linear inequality constraints, `TrustConstr` only
    pub constraints: Option<LinearConstraints>,
    /// Tolerance on the projected gradient norm. Solver default if `None`.
    pub tol: Option<f64>,
    pub max_iter: usize,
    pub callback: Option<Callback<'a>>,
}

impl<'a> Default for MinimizeOptions<'a> {
    fn default() -> Self {
        Self {
            method: None,
            bounds: None,
            constraints: None,
            tol: None,
            max_iter: 1000,
            callback: None,
        }
    }
}

impl<'a> MinimizeOptions<'a> {
    pub fn with_method(self, method: Method) -> Self {
        Self {
            method: Some(method),
            ..self
        }
    }

    pub fn with_bounds(self, bounds: Bounds) -> Self {
        Self {
            bounds: Some(bounds),
            ..self
        }
    }

    pub fn with_constraints(self, constraints: LinearConstraints) -> Self {
        Self {
            constraints: Some(constraints),
            ..self
        }
    }

    pub fn with_tol(self, tol: f64) -> Self {
        Self {
            tol: Some(tol),
            ..self
        }
    }

    pub fn with_max_iter(self, max_iter: usize) -> Self {
        Self { max_iter, ..self }
    }

    pub fn with_callback(self, callback: Callback<'a>) -> Self {
        Self {
            callback: Some(callback),
            ..self
        }
    }
}

/// Run `method` with the given monitor.
pub(crate) fn run<F>(
    fun: &F,
    x0: DVector<f64>,
    method: &Method,
    bounds: Option<&Bounds>,
    constraints: Option<&LinearConstraints>,
    tol: Option<f64>,
    max_iter: usize,
    monitor: &mut Monitor<'_>,
) -> Result<OptimizeResult>
where
    F: Fn(&DVector<f64>) -> (f64, DVector<f64>),
{
    if let Some(b) = bounds {
        b.check_dim(x0.len())?;
    }
    if let Some(c) = constraints {
        c.check_dim(x0.len())?;
        if !matches!(method, Method::TrustConstr) {
            return Err(OptimizeError::Unsupported(format!(
                "Method {} cannot handle linear constraints",
                method.name()
            )));
        }
    }
    debug!(
        "minimize: method = {}, dim = {}, bounded = {}, constraints = {}",
        method.name(),
        x0.len(),
        bounds.is_some(),
        constraints.map_or(0, LinearConstraints::len)
    );

    match method {
        Method::Bfgs => {
            if bounds.is_some() {
                return Err(OptimizeError::Unsupported(
                    "Method BFGS cannot handle bounds".to_string(),
                ));
            }
            let mut params = bfgs::BFGSParams::default().with_max_iter(max_iter);
            if let Some(tol) = tol {
                params = params.with_accuracy(tol);
            }
            bfgs::bfgs(x0, &params, fun, monitor)
        }
        Method::LBfgsB => {
            let params = projected::ProjectedParams::default()
                .with_max_iter(max_iter)
                .with_pgtol(tol.unwrap_or(1E-5));
            projected::projected_bfgs(x0, bounds, &params, fun, monitor)
        }
        Method::TrustConstr => {
            let params = trust_region::TrustRegionParams::default()
                .with_max_iter(max_iter)
                .with_gtol(tol.unwrap_or(1E-8));
            match constraints {
                Some(c) => trust_region::barrier_trust_region(
                    x0,
                    bounds,
                    c,
                    &params,
                    &trust_region::BarrierParams::default(),
                    fun,
                    monitor,
                ),
                None => {
                    trust_region::trust_region(x0, bounds, &params, fun, monitor)
                }
            }
        }
        Method::Custom(custom) => {
            custom.minimize(fun, x0, bounds, tol, max_iter, monitor)
        }
    }
}

/// Minimize `fun`, which returns the objective and its gradient.
pub fn minimize<F>(
    fun: F,
    x0: DVector<f64>,
    options: MinimizeOptions<'_>,
) -> Result<OptimizeResult>
where
    F: Fn(&DVector<f64>) -> (f64, DVector<f64>),
{
    let MinimizeOptions {
        method,
        bounds,
        constraints,
        tol,
        max_iter,
        mut callback,
    } = options;
    let method = method.unwrap_or_else(|| {
        Method::default_for_options(bounds.as_ref(), constraints.as_ref())
    });

    let mut monitor = |state: &IterationState| -> Result<bool> {
        Ok(callback.as_mut().map_or(false, |cb| cb.call(state)))
    };
    run(
        &fun,
        x0,
        &method,
        bounds.as_ref(),
        constraints.as_ref(),
        tol,
        max_iter,
        &mut monitor,
    )
}

/// Infinity norm of the projected gradient `x - P(x - g)`.
pub(crate) fn projected_grad_norm(
    x: &DVector<f64>,
    g: &DVector<f64>,
    bounds: Option<&Bounds>,
) -> f64 {
    match bounds {
        Some(b) => {
            let stepped = b.project(&(x - g));
            (x - stepped).amax()
        }
        None => g.amax(),
    }
}
