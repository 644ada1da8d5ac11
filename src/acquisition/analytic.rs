//! Acquisition functions in closed form over single-point candidate sets
use super::{deprecate_objective, AcquisitionFunction, LegacyObjective};
use crate::posterior::{PosteriorOptions, PosteriorTransform};
use crate::result::{Error, Result};
use crate::traits::{Model, Posterior};
use nalgebra::{DMatrix, DVector};

/// Model, optional posterior transform and pending points
#[derive(Debug)]
struct AnalyticBase<M> {
    model: M,
    posterior_transform: Option<Box<dyn PosteriorTransform>>,
    x_pending: Option<DMatrix<f64>>,
}

impl<M: Model> AnalyticBase<M> {
    fn new(model: M) -> Self {
        Self {
            model,
            posterior_transform: None,
            x_pending: None,
        }
    }

    /// Posterior mean and standard deviation at a `1 x d` candidate
    fn mean_and_sigma(&mut self, name: &str, x: &DMatrix<f64>) -> Result<(f64, f64)> {
        if x.nrows() != 1 {
            return Err(Error::Unsupported(format!(
                "{} is only defined for single point candidate sets, got q = {}",
                name,
                x.nrows()
            )));
        }
        let options = PosteriorOptions::default();
        let (mean, variance) = match &self.posterior_transform {
            Some(tf) => {
                let posterior = self.model.posterior_transformed(x, &options, tf.as_ref())?;
                (posterior.mean().clone(), posterior.variance().clone())
            }
            None => {
                let posterior = self.model.posterior(x, &options)?;
                (posterior.mean().clone(), posterior.variance().clone())
            }
        };
        if mean.ncols() != 1 {
            return Err(Error::Unsupported(format!(
                "{} requires a single-output posterior, got {} outputs; \
                 use a posterior transform",
                name,
                mean.ncols()
            )));
        }
        Ok((mean[(0, 0)], variance[(0, 0)].max(0.0).sqrt()))
    }

    fn evaluate_with<F>(&mut self, name: &str, x: &[DMatrix<f64>], score: F) -> Result<DVector<f64>>
    where
        F: Fn(f64, f64) -> f64,
    {
        let values = x
            .iter()
            .map(|xi| {
                let (mean, sigma) = self.mean_and_sigma(name, xi)?;
                Ok(score(mean, sigma))
            })
            .collect::<Result<Vec<f64>>>()?;
        Ok(DVector::from_vec(values))
    }
}

/// Posterior mean of a single-output model
#[derive(Debug)]
pub struct PosteriorMean<M> {
    base: AnalyticBase<M>,
    maximize: bool,
}

impl<M: Model> PosteriorMean<M> {
    pub fn new(model: M) -> Self {
        Self {
            base: AnalyticBase::new(model),
            maximize: true,
        }
    }

    pub fn with_posterior_transform(mut self, tf: impl PosteriorTransform + 'static) -> Self {
        self.base.posterior_transform = Some(Box::new(tf));
        self
    }

    /// Use a legacy objective in place of a posterior transform
    pub fn with_objective(mut self, objective: LegacyObjective) -> Result<Self> {
        let tf = self.base.posterior_transform.take();
        self.base.posterior_transform = deprecate_objective("PosteriorMean", tf, Some(objective))?;
        Ok(self)
    }

    /// Score `-mean` when minimizing
    pub fn with_maximize(self, maximize: bool) -> Self {
        Self { maximize, ..self }
    }

    pub fn maximize(&self) -> bool {
        self.maximize
    }

    pub fn model(&self) -> &M {
        &self.base.model
    }

    pub fn into_model(self) -> M {
        self.base.model
    }
}

impl<M: Model> AcquisitionFunction for PosteriorMean<M> {
    fn evaluate(&mut self, x: &[DMatrix<f64>]) -> Result<DVector<f64>> {
        let sign = if self.maximize { 1.0 } else { -1.0 };
        self.base
            .evaluate_with("PosteriorMean", x, |mean, _| sign * mean)
    }

    fn x_pending(&self) -> Option<&DMatrix<f64>> {
        self.base.x_pending.as_ref()
    }

    fn set_x_pending(&mut self, x_pending: Option<&DMatrix<f64>>) {
        self.base.x_pending = x_pending.cloned();
    }
}

/// Upper confidence bound `mean + sqrt(beta) * sigma`
///
/// When minimizing the bound is taken on `-mean`.
#[derive(Debug)]
pub struct UpperConfidenceBound<M> {
    base: AnalyticBase<M>,
    beta: f64,
    maximize: bool,
}

impl<M: Model> UpperConfidenceBound<M> {
    pub fn new(model: M, beta: f64) -> Result<Self> {
        if !(beta.is_finite() && beta >= 0.0) {
            return Err(Error::Unsupported(format!(
                "beta must be finite and non-negative, got {}",
                beta
            )));
        }
        Ok(Self {
            base: AnalyticBase::new(model),
            beta,
            maximize: true,
        })
    }

    pub fn with_posterior_transform(mut self, tf: impl PosteriorTransform + 'static) -> Self {
        self.base.posterior_transform = Some(Box::new(tf));
        self
    }

    /// Use a legacy objective in place of a posterior transform
    pub fn with_objective(mut self, objective: LegacyObjective) -> Result<Self> {
        let tf = self.base.posterior_transform.take();
        self.base.posterior_transform =
            deprecate_objective("UpperConfidenceBound", tf, Some(objective))?;
        Ok(self)
    }

    pub fn with_maximize(self, maximize: bool) -> Self {
        Self { maximize, ..self }
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    pub fn maximize(&self) -> bool {
        self.maximize
    }

    pub fn model(&self) -> &M {
        &self.base.model
    }

    pub fn into_model(self) -> M {
        self.base.model
    }
}

impl<M: Model> AcquisitionFunction for UpperConfidenceBound<M> {
    fn evaluate(&mut self, x: &[DMatrix<f64>]) -> Result<DVector<f64>> {
        let sign = if self.maximize { 1.0 } else { -1.0 };
        let scale = self.beta.sqrt();
        self.base
            .evaluate_with("UpperConfidenceBound", x, |mean, sigma| sign * mean + scale * sigma)
    }

    fn x_pending(&self) -> Option<&DMatrix<f64>> {
        self.base.x_pending.as_ref()
    }

    fn set_x_pending(&mut self, x_pending: Option<&DMatrix<f64>>) {
        self.base.x_pending = x_pending.cloned();
    }
}
