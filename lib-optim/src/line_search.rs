//! Line search methods

use crate::OptimizeError;
use log::debug;

/// Wolfe Algorithm Parameters
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WolfeParams {
    /// Sufficient decrease (Armijo) coefficient
    pub c1: f64,
    /// Curvature coefficient
    pub c2: f64,
    /// Maximal acceptable step length.
    pub amax: f64,
    /// Maximum number of iterations for both the bracketing and zoom phases
    pub max_iter: usize,
}

impl Default for WolfeParams {
    fn default() -> Self {
        Self {
            c1: 1E-4,
            c2: 0.9,
            amax: 50.0,
            max_iter: 10,
        }
    }
}

impl WolfeParams {
    /// Cap the step length, e.g. at the distance to the closest bound.
    #[must_use]
    pub fn with_amax(self, amax: f64) -> Self {
        Self { amax, ..self }
    }
}

/// A point of the one dimensional function `phi(alpha)` with its slope.
#[derive(Clone, Copy, Debug)]
struct Probe {
    alpha: f64,
    phi: f64,
    derphi: f64,
}

/// Minimizer of the quadratic through (a, fa), (b, fb) with slope fpa at a.
#[inline]
fn quad_min(a: f64, fa: f64, fpa: f64, b: f64, fb: f64) -> Option<f64> {
    let db = b - a;
    if db == 0.0 {
        return None;
    }
    let curvature = (fb - fa - fpa * db) / (db * db);
    if curvature <= 0.0 {
        None
    } else {
        Some(a - fpa / (2.0 * curvature))
    }
}

/// Minimizer of the cubic through (a, fa), (b, fb), (c, fc) with slope fpa at a.
#[inline]
fn cubic_min(
    a: f64,
    fa: f64,
    fpa: f64,
    b: f64,
    fb: f64,
    c: f64,
    fc: f64,
) -> Option<f64> {
    let db = b - a;
    let dc = c - a;
    let denom = (db * dc).powi(2) * (db - dc);
    if denom == 0.0 {
        return None;
    }
    let fu = fb - fa - fpa * db;
    let fv = fc - fa - fpa * dc;
    let ca = (dc * dc * fu - db * db * fv) / denom;
    let cb = (-dc.powi(3) * fu + db.powi(3) * fv) / denom;
    if ca == 0.0 {
        return None;
    }
    let radical = cb * cb - 3.0 * ca * fpa;
    if radical < 0.0 {
        return None;
    }
    let res = a + (-cb + radical.sqrt()) / (3.0 * ca);
    res.is_finite().then_some(res)
}

/// Wolfe Zoom function
/// Reference: Algorithm 3.6 of Numerical Optimization, Jorge Nocedal & Stephen Wright.
fn zoom<F>(
    mut lo: Probe,
    mut hi: Probe,
    origin: Probe,
    params: &WolfeParams,
    f: F,
) -> Result<f64, OptimizeError>
where
    F: Fn(f64) -> (f64, f64),
{
    const DELTA1: f64 = 0.2;
    const DELTA2: f64 = 0.1;

    let mut rec = Probe {
        alpha: 0.0,
        ..origin
    };

    for i in 0..params.max_iter {
        let delta_alpha = hi.alpha - lo.alpha;
        let (a, b) = if delta_alpha < 0.0 {
            (hi.alpha, lo.alpha)
        } else {
            (lo.alpha, hi.alpha)
        };

        let cubic = if i > 0 {
            let cchk = DELTA1 * delta_alpha.abs();
            cubic_min(
                lo.alpha, lo.phi, lo.derphi, hi.alpha, hi.phi, rec.alpha,
                rec.phi,
            )
            .filter(|aj| *aj <= b - cchk && *aj >= a + cchk)
        } else {
            None
        };

        let aj = cubic.unwrap_or_else(|| {
            let qchk = DELTA2 * delta_alpha.abs();
            quad_min(lo.alpha, lo.phi, lo.derphi, hi.alpha, hi.phi)
                .filter(|aj| *aj <= b - qchk && *aj >= a + qchk)
                .unwrap_or(lo.alpha + 0.5 * delta_alpha)
        });

        let (phi_aj, derphi_aj) = f(aj);
        debug!(
            "zoom: i = {}, a_lo = {:.3e}, a_hi = {:.3e}, a_j = {:.3e}, phi_aj = {:.6e}",
            i, lo.alpha, hi.alpha, aj, phi_aj
        );
        let probe = Probe {
            alpha: aj,
            phi: phi_aj,
            derphi: derphi_aj,
        };

        if phi_aj > origin.phi + params.c1 * aj * origin.derphi
            || phi_aj >= lo.phi
        {
            rec = hi;
            hi = probe;
        } else {
            if derphi_aj.abs() <= -params.c2 * origin.derphi {
                return Ok(aj);
            }
            if derphi_aj * delta_alpha >= 0.0 {
                rec = hi;
                hi = lo;
            } else {
                rec = lo;
            }
            lo = probe;
        }
    }
    Err(OptimizeError::MaxIterationReached)
}

/// Wolfe Line Search Method
/// Finds a step length `alpha > 0` satisfying the strong Wolfe conditions
/// for `phi(alpha)`, where `f` returns `(phi(alpha), phi'(alpha))`.
/// Reference: Algorithm 3.5 of Numerical Optimization, Jorge Nocedal & Stephen Wright.
pub fn wolfe_search<F>(params: &WolfeParams, f: F) -> Result<f64, OptimizeError>
where
    F: Fn(f64) -> (f64, f64),
{
    let (phi_0, derphi_0) = f(0.0);
    if derphi_0 >= 0.0 {
        return Err(OptimizeError::NumericalDivergence);
    }
    let origin = Probe {
        alpha: 0.0,
        phi: phi_0,
        derphi: derphi_0,
    };

    let mut prev = origin;
    let alpha1 = 1.0_f64.min(params.amax);
    let (phi_1, derphi_1) = f(alpha1);
    let mut cur = Probe {
        alpha: alpha1,
        phi: phi_1,
        derphi: derphi_1,
    };

    debug!(
        "wolfe_search (init): phi_0 = {}, derphi_0 = {}",
        phi_0, derphi_0
    );

    for i in 0..params.max_iter {
        if cur.alpha == 0.0 {
            return Err(OptimizeError::RoundingError);
        }

        if !cur.phi.is_finite()
            || cur.phi > phi_0 + params.c1 * cur.alpha * derphi_0
            || (cur.phi >= prev.phi && i > 0)
        {
            return zoom(prev, cur, origin, params, &f);
        }

        if cur.derphi.abs() <= -params.c2 * derphi_0 {
            return Ok(cur.alpha);
        }

        if cur.derphi >= 0.0 {
            return zoom(cur, prev, origin, params, &f);
        }

        if cur.alpha >= params.amax {
            // The cap is reached while still descending.
            return Ok(cur.alpha);
        }

        let next = (2.0 * cur.alpha).min(params.amax);
        let (phi, derphi) = f(next);
        prev = cur;
        cur = Probe {
            alpha: next,
            phi,
            derphi,
        };
    }

    Err(OptimizeError::MaxIterationReached)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wolfe_search_x_squared() {
        let res = wolfe_search(&WolfeParams::default(), |x| {
            let y = (x - 1.0).powi(2) + (x - 1.0);
            let dy_dx = 2.0 * (x - 1.0) + 1.0;
            (y, dy_dx)
        });

        assert!(res.is_ok());
        assert::close(res.unwrap(), 0.5, 1E-10);
    }

    #[test]
    fn wolfe_search_x_cubed() {
        let res = wolfe_search(&WolfeParams::default(), |x| {
            let y = -(x - 1.0).powi(3) - (x - 1.0).powi(2);
            let dy_dx = -3.0 * x.powi(2) + 4.0 * x - 1.0;
            (y, dy_dx)
        });

        assert!(res.is_ok());
        assert::close(res.unwrap(), 0.5, 1E-10);
    }

    #[test]
    fn wolfe_search_respects_amax() {
        // Monotone decreasing, so the search walks up to the cap.
        let params = WolfeParams::default().with_amax(0.25);
        let res = wolfe_search(&params, |x| (-x, -1.0)).unwrap();
        assert::close(res, 0.25, 1E-12);
    }

    #[test]
    fn wolfe_search_rejects_ascent_direction() {
        let res = wolfe_search(&WolfeParams::default(), |x| (x, 1.0));
        assert_eq!(res, Err(OptimizeError::NumericalDivergence));
    }

    #[test]
    fn cubic_min_recovers_cubic_minimizer() {
        // p(x) = x^3 - 3x has a local min at x = 1
        let p = |x: f64| x.powi(3) - 3.0 * x;
        let a = 0.0;
        let res = cubic_min(a, p(a), -3.0, 2.0, p(2.0), 0.5, p(0.5)).unwrap();
        assert::close(res, 1.0, 1E-10);
    }
}
