//! Trait definitions
use crate::posterior::{GpPosterior, PosteriorOptions, PosteriorTransform};
use crate::result::Result;
use nalgebra::DMatrix;
use rand::{Rng, RngCore};

/// Random variable
///
/// Contains the minimal functionality a prior needs: a log density to add
/// to the marginal likelihood and a way to draw initial values.
pub trait Rv<X> {
    /// Probability function
    fn f(&self, x: &X) -> f64 {
        self.ln_f(x).exp()
    }

    /// Log probability function, `-∞` outside of the support
    fn ln_f(&self, x: &X) -> f64;

    /// Single draw from the `Rv`
    fn draw<R: Rng>(&self, rng: &mut R) -> X;

    /// Multiple draws of the `Rv`
    fn sample<R: Rng>(&self, n: usize, rng: &mut R) -> Vec<X> {
        (0..n).map(|_| self.draw(rng)).collect()
    }
}

/// Defines the distribution mode
pub trait Mode<X> {
    fn mode(&self) -> Option<X>;
}

/// Defines the distribution mean
pub trait Mean<X> {
    fn mean(&self) -> Option<X>;
}

/// Distribution over `q x m` outputs at `q` query points.
///
/// Joint quantities use the row-major flattening of the `q x m` outputs.
pub trait Posterior {
    /// Posterior mean, `q x m`
    fn mean(&self) -> &DMatrix<f64>;

    /// Marginal variances, `q x m`
    fn variance(&self) -> &DMatrix<f64>;

    /// Joint covariance of the flattened outputs, `qm x qm`
    fn covariance(&self) -> Result<DMatrix<f64>>;

    fn num_outputs(&self) -> usize {
        self.mean().ncols()
    }

    /// Draw `n` joint samples, each `q x m`
    fn sample(
        &self,
        n: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<DMatrix<f64>>>;
}

/// A probabilistic surrogate model
pub trait Model {
    type Posterior: Posterior;

    fn num_outputs(&self) -> usize;

    /// Posterior at the `q x d` query points `x`.
    ///
    /// Models switch themselves into evaluation mode here, which is why this
    /// takes `&mut self`.
    fn posterior(
        &mut self,
        x: &DMatrix<f64>,
        options: &PosteriorOptions,
    ) -> Result<Self::Posterior>;

    /// Posterior passed through `transform`
    fn posterior_transformed(
        &mut self,
        x: &DMatrix<f64>,
        options: &PosteriorOptions,
        transform: &dyn PosteriorTransform,
    ) -> Result<GpPosterior> {
        let posterior = self.posterior(x, options)?;
        transform.transform(&posterior)
    }
}
