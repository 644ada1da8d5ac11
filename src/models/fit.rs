//! Maximum a posteriori fitting of hyper-parameters
use super::kronecker::KroneckerMultiTaskGp;
use super::multitask::MultiTaskGp;
use crate::result::Result;
use log::{debug, info, warn};
use nalgebra::DVector;
use optim::{minimize_with_timeout, Method, MinimizeOptions, OptimizeResult};
use std::time::Duration;

/// Step of the central difference gradient of the log prior
const GRADIENT_STEP: f64 = 1E-5;

/// A model whose hyper-parameters can be fit by maximizing
/// `ln p(y | θ) + ln p(θ)`
pub trait MapModel {
    /// Current hyper-parameters, flattened
    fn parameters(&self) -> DVector<f64>;

    fn set_parameters(&mut self, params: &[f64]) -> Result<()>;

    /// Log marginal likelihood plus log prior at `params`
    fn ln_posterior_at(&self, params: &[f64]) -> Result<f64>;

    /// Log marginal likelihood at `params` and its analytic gradient
    fn ln_m_with_gradient_at(&self, params: &[f64]) -> Result<(f64, DVector<f64>)>;

    /// Log prior at `params`
    fn ln_prior_at(&self, params: &[f64]) -> Result<f64>;

    /// Log posterior at `params` with its gradient. The marginal likelihood
    /// part is analytic, the prior part a central difference.
    fn ln_posterior_with_gradient(&self, params: &[f64]) -> Result<(f64, DVector<f64>)> {
        let (ln_m, mut grad) = self.ln_m_with_gradient_at(params)?;
        let ln_prior = self.ln_prior_at(params)?;
        let mut shifted = params.to_vec();
        for (i, g) in grad.iter_mut().enumerate() {
            shifted[i] = params[i] + GRADIENT_STEP;
            let up = self.ln_prior_at(&shifted)?;
            shifted[i] = params[i] - GRADIENT_STEP;
            let down = self.ln_prior_at(&shifted)?;
            shifted[i] = params[i];
            *g += (up - down) / (2.0 * GRADIENT_STEP);
        }
        Ok((ln_m + ln_prior, grad))
    }

    /// Number of scalar observations the marginal likelihood is over
    fn num_observations(&self) -> usize;

    /// Switch to training mode
    fn train(&mut self);
}

impl MapModel for KroneckerMultiTaskGp {
    fn parameters(&self) -> DVector<f64> {
        KroneckerMultiTaskGp::parameters(self)
    }

    fn set_parameters(&mut self, params: &[f64]) -> Result<()> {
        KroneckerMultiTaskGp::set_parameters(self, params)
    }

    fn ln_posterior_at(&self, params: &[f64]) -> Result<f64> {
        KroneckerMultiTaskGp::ln_posterior_at(self, params)
    }

    fn ln_m_with_gradient_at(&self, params: &[f64]) -> Result<(f64, DVector<f64>)> {
        KroneckerMultiTaskGp::ln_m_with_gradient_at(self, params)
    }

    fn ln_prior_at(&self, params: &[f64]) -> Result<f64> {
        KroneckerMultiTaskGp::ln_prior_at(self, params)
    }

    fn num_observations(&self) -> usize {
        KroneckerMultiTaskGp::num_observations(self)
    }

    fn train(&mut self) {
        KroneckerMultiTaskGp::train(self)
    }
}

impl MapModel for MultiTaskGp {
    fn parameters(&self) -> DVector<f64> {
        MultiTaskGp::parameters(self)
    }

    fn set_parameters(&mut self, params: &[f64]) -> Result<()> {
        MultiTaskGp::set_parameters(self, params)
    }

    fn ln_posterior_at(&self, params: &[f64]) -> Result<f64> {
        MultiTaskGp::ln_posterior_at(self, params)
    }

    fn ln_m_with_gradient_at(&self, params: &[f64]) -> Result<(f64, DVector<f64>)> {
        MultiTaskGp::ln_m_with_gradient_at(self, params)
    }

    fn ln_prior_at(&self, params: &[f64]) -> Result<f64> {
        MultiTaskGp::ln_prior_at(self, params)
    }

    fn num_observations(&self) -> usize {
        MultiTaskGp::num_observations(self)
    }

    fn train(&mut self) {
        MultiTaskGp::train(self)
    }
}

/// Options for [`fit_map`]
#[derive(Clone, Debug, PartialEq)]
pub struct FitOptions {
    /// Wall clock budget, unlimited if `None`
    pub timeout: Option<Duration>,
    pub max_iter: usize,
    /// Projected gradient tolerance, solver default if `None`
    pub tol: Option<f64>,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            max_iter: 1000,
            tol: None,
        }
    }
}

impl FitOptions {
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self
        }
    }

    pub fn with_max_iter(self, max_iter: usize) -> Self {
        Self { max_iter, ..self }
    }

    pub fn with_tol(self, tol: f64) -> Self {
        Self {
            tol: Some(tol),
            ..self
        }
    }
}

/// Negative log posterior per observation, `+∞` where it can't be evaluated
fn objective<M: MapModel>(model: &M, params: &[f64], scale: f64) -> f64 {
    match model.ln_posterior_at(params) {
        Ok(ln_post) if ln_post.is_finite() => -ln_post / scale,
        _ => f64::INFINITY,
    }
}

/// Objective and its gradient at `params`. Non-finite gradient entries are
/// zeroed so the line search can back off.
fn objective_and_gradient<M: MapModel>(
    model: &M,
    params: &DVector<f64>,
    scale: f64,
) -> (f64, DVector<f64>) {
    match model.ln_posterior_with_gradient(params.as_slice()) {
        Ok((ln_post, grad)) if ln_post.is_finite() => {
            let grad = grad.map(|g| if g.is_finite() { -g / scale } else { 0.0 });
            (-ln_post / scale, grad)
        }
        _ => (f64::INFINITY, DVector::zeros(params.len())),
    }
}

/// Fit the hyper-parameters of `model` to their posterior mode.
///
/// The objective is the negative log posterior divided by the number of
/// observations, minimized with a quasi-Newton method. The best point found
/// is written back even when the run stops on the iteration limit or the
/// timeout, and the model is left in training mode.
pub fn fit_map<M: MapModel>(model: &mut M, options: &FitOptions) -> Result<OptimizeResult> {
    model.train();
    let x0 = model.parameters();
    let scale = model.num_observations().max(1) as f64;

    let f0 = objective(model, x0.as_slice(), scale);
    if !f0.is_finite() {
        warn!("log posterior is not finite at the initial hyper-parameters");
    }
    debug!("fitting {} hyper-parameters, initial loss {}", x0.len(), f0);

    let mut minimize_options = MinimizeOptions::default()
        .with_method(Method::LBfgsB)
        .with_max_iter(options.max_iter);
    if let Some(tol) = options.tol {
        minimize_options = minimize_options.with_tol(tol);
    }

    let result = {
        let model: &M = model;
        minimize_with_timeout(
            |params: &DVector<f64>| objective_and_gradient(model, params, scale),
            x0,
            minimize_options,
            options.timeout,
        )?
    };

    info!(
        "fit finished after {} iterations with loss {}: {}",
        result.nit, result.fun, result.message
    );
    if result.fun.is_finite() {
        model.set_parameters(result.x.as_slice())?;
    } else {
        warn!("fit ended at a non-finite loss, keeping the initial hyper-parameters");
    }
    model.train();
    Ok(result)
}
