//! Minimization with a wall clock deadline.

use crate::minimize::{run, IterationState, Method, MinimizeOptions};
use crate::{minimize, OptimizeError, OptimizeResult, Result};
use log::{debug, info};
use nalgebra::DVector;
use std::cell::Cell;
use std::time::{Duration, Instant};

/// Minimize `fun` like [`minimize`], stopping at the first iterate boundary
/// after `timeout` has elapsed.
///
/// A timed out run is not an error: the result carries the last iterate,
/// `success = false` and `status = 1`, as if the iteration limit had been
/// hit, and `nit` counts the iterates the deadline check observed. The
/// solver is never preempted, so the overrun is bounded by one iteration.
///
/// A caller callback runs alongside the deadline check. For
/// [`Callback::WithState`] the caller callback runs first and the deadline
/// is only checked when it does not ask to stop; an [`Callback::Iterate`]
/// callback runs after the check.
pub fn minimize_with_timeout<F>(
    fun: F,
    x0: DVector<f64>,
    options: MinimizeOptions<'_>,
    timeout: Option<Duration>,
) -> Result<OptimizeResult>
where
    F: Fn(&DVector<f64>) -> (f64, DVector<f64>),
{
    let Some(timeout) = timeout else {
        return minimize(fun, x0, options);
    };

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

    if matches!(method, Method::Custom(_)) && callback.is_some() {
        return Err(OptimizeError::Unsupported(
            "Custom callable not supported for `method` argument.".to_string(),
        ));
    }

    let start = Instant::now();
    let num_iterations = Cell::new(0_usize);
    let check_deadline = |state: &IterationState| -> Result<bool> {
        num_iterations.set(num_iterations.get() + 1);
        let runtime = start.elapsed();
        if runtime > timeout {
            Err(OptimizeError::Timeout {
                x: state.x.clone(),
                runtime,
            })
        } else {
            Ok(false)
        }
    };

    let mut monitor = |state: &IterationState| -> Result<bool> {
        match callback.as_mut() {
            None => check_deadline(state),
            Some(cb) if cb.carries_state() => {
                Ok(cb.call(state) || check_deadline(state)?)
            }
            Some(cb) => {
                check_deadline(state)?;
                Ok(cb.call(state))
            }
        }
    };

    let outcome = run(
        &fun,
        x0,
        &method,
        bounds.as_ref(),
        constraints.as_ref(),
        tol,
        max_iter,
        &mut monitor,
    );
    match outcome {
        Err(OptimizeError::Timeout { x, runtime }) => {
            let nit = num_iterations.get();
            info!(
                "{} timed out after {:.3}s and {} iterations",
                method.name(),
                runtime.as_secs_f64(),
                nit
            );
            let current_fun = fun(&x).0;
            Ok(OptimizeResult {
                x,
                fun: current_fun,
                nit,
                success: false,
                status: 1,
                message: format!(
                    "Optimization timed out after {} seconds.",
                    runtime.as_secs_f64()
                ),
            })
        }
        other => {
            debug!(
                "{} finished within {:?} of a {:?} budget",
                method.name(),
                start.elapsed(),
                timeout
            );
            other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Bounds, Callback, CustomMinimizer, Monitor};
    use std::cell::RefCell;
    use std::thread::sleep;

    fn rosenbrock(x: &DVector<f64>) -> (f64, DVector<f64>) {
        let y = (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0].powi(2)).powi(2);
        let gx = -400.0 * (x[1] - x[0].powi(2)) * x[0] - 2.0 * (1.0 - x[0]);
        let gy = 200.0 * (x[1] - x[0].powi(2));
        (y, DVector::from_column_slice(&[gx, gy]))
    }

    fn slow_rosenbrock(x: &DVector<f64>) -> (f64, DVector<f64>) {
        sleep(Duration::from_millis(5));
        rosenbrock(x)
    }

    fn bounds() -> Bounds {
        Bounds::from_pairs(&[(-5.0, 5.0), (-5.0, 5.0)]).unwrap()
    }

    #[test]
    fn no_timeout_matches_minimize() {
        let a = minimize_with_timeout(
            rosenbrock,
            DVector::zeros(2),
            MinimizeOptions::default().with_bounds(bounds()),
            None,
        )
        .unwrap();
        let b = minimize(
            rosenbrock,
            DVector::zeros(2),
            MinimizeOptions::default().with_bounds(bounds()),
        )
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn generous_timeout_matches_minimize() {
        let a = minimize_with_timeout(
            rosenbrock,
            DVector::zeros(2),
            MinimizeOptions::default().with_bounds(bounds()),
            Some(Duration::from_secs(600)),
        )
        .unwrap();
        let b = minimize(
            rosenbrock,
            DVector::zeros(2),
            MinimizeOptions::default().with_bounds(bounds()),
        )
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn slow_objective_times_out() {
        let seen = RefCell::new(0_usize);
        let opts = MinimizeOptions::default()
            .with_bounds(bounds())
            .with_callback(Callback::Iterate(Box::new(|_| {
                *seen.borrow_mut() += 1;
            })));
        let res = minimize_with_timeout(
            slow_rosenbrock,
            DVector::zeros(2),
            opts,
            Some(Duration::from_millis(30)),
        )
        .unwrap();

        assert!(!res.success);
        assert_eq!(res.status, 1);
        assert!(res.message.starts_with("Optimization timed out after"));
        // the deadline check runs first, so the last iterate skips the
        // caller callback
        assert_eq!(*seen.borrow(), res.nit - 1);
        assert::close(res.fun, rosenbrock(&res.x).0, 1E-12);
    }

    #[test]
    fn trust_region_callback_runs_before_deadline_check() {
        let seen = RefCell::new(0_usize);
        let opts = MinimizeOptions::default()
            .with_method(Method::TrustConstr)
            .with_bounds(bounds())
            .with_callback(Callback::WithState(Box::new(|_, _| {
                *seen.borrow_mut() += 1;
                false
            })));
        let res = minimize_with_timeout(
            slow_rosenbrock,
            DVector::zeros(2),
            opts,
            Some(Duration::from_millis(30)),
        )
        .unwrap();

        assert!(!res.success);
        assert_eq!(res.status, 1);
        assert_eq!(*seen.borrow(), res.nit);
    }

    #[test]
    fn trust_region_callback_can_stop_before_timeout() {
        let opts = MinimizeOptions::default()
            .with_method(Method::TrustConstr)
            .with_callback(Callback::WithState(Box::new(|_, _| true)));
        let res = minimize_with_timeout(
            slow_rosenbrock,
            DVector::zeros(2),
            opts,
            Some(Duration::from_millis(0)),
        )
        .unwrap();
        assert!(res.success);
        assert_eq!(res.nit, 1);
    }

    struct GradientDescent;

    impl CustomMinimizer for GradientDescent {
        fn minimize(
            &self,
            fun: &dyn Fn(&DVector<f64>) -> (f64, DVector<f64>),
            mut x: DVector<f64>,
            _bounds: Option<&Bounds>,
            _tol: Option<f64>,
            max_iter: usize,
            monitor: &mut Monitor<'_>,
        ) -> Result<OptimizeResult> {
            for nit in 1..=max_iter {
                let (_, g) = fun(&x);
                x -= 1E-3 * g;
                let (fx, g) = fun(&x);
                let state = IterationState {
                    nit,
                    x: x.clone(),
                    fun: fx,
                    grad_norm: g.amax(),
                    radius: None,
                };
                if monitor(&state)? {
                    break;
                }
            }
            let fx = fun(&x).0;
            Ok(OptimizeResult {
                x,
                fun: fx,
                nit: max_iter,
                success: true,
                status: 0,
                message: String::new(),
            })
        }
    }

    #[test]
    fn custom_method_times_out() {
        let opts = MinimizeOptions::default()
            .with_method(Method::Custom(Box::new(GradientDescent)))
            .with_max_iter(1_000_000);
        let res = minimize_with_timeout(
            slow_rosenbrock,
            DVector::zeros(2),
            opts,
            Some(Duration::from_millis(20)),
        )
        .unwrap();
        assert!(!res.success);
        assert_eq!(res.status, 1);
        assert!(res.nit >= 1);
    }

    #[test]
    fn custom_method_with_callback_is_unsupported() {
        let opts = MinimizeOptions::default()
            .with_method(Method::Custom(Box::new(GradientDescent)))
            .with_callback(Callback::Iterate(Box::new(|_| ())));
        let res = minimize_with_timeout(
            rosenbrock,
            DVector::zeros(2),
            opts,
            Some(Duration::from_secs(1)),
        );
        assert!(matches!(res, Err(OptimizeError::Unsupported(_))));
    }
}
