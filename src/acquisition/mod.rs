//! Acquisition functions
use crate::posterior::{PosteriorTransform, ScalarizedPosteriorTransform};
use crate::result::{Error, Result};
use log::warn;
use nalgebra::{DMatrix, DVector};

mod analytic;

pub use analytic::{PosteriorMean, UpperConfidenceBound};

/// Scores candidate sets of design points
pub trait AcquisitionFunction {
    /// Value of each `q x d` candidate set in `x`
    fn evaluate(&mut self, x: &[DMatrix<f64>]) -> Result<DVector<f64>>;

    /// `n x d` points submitted for evaluation but not yet observed
    fn x_pending(&self) -> Option<&DMatrix<f64>>;

    /// Store a copy of `x_pending`, or forget the pending points on `None`
    fn set_x_pending(&mut self, x_pending: Option<&DMatrix<f64>>);
}

/// Acquisition function optimized over an augmented "one-shot"
/// parameterization that carries extra points besides the candidates
pub trait OneShotAcquisitionFunction: AcquisitionFunction {
    /// Number of points in the augmented parameterization of `q` candidates
    fn augmented_q_batch_size(&self, q: usize) -> usize;

    /// The `q x d` candidates within each `q_aug x d` parameterization
    fn extract_candidates(&self, x_full: &[DMatrix<f64>]) -> Result<Vec<DMatrix<f64>>>;
}

/// Objectives accepted by analytic acquisition functions before posterior
/// transforms replaced them
#[derive(Clone, Debug, PartialEq)]
pub enum LegacyObjective {
    /// `offset + Σ_j w_j y_j`
    Scalarized { weights: DVector<f64>, offset: f64 },
    /// Any other objective, by name
    Other(String),
}

/// Translate a legacy `objective` into a posterior transform.
///
/// Without an objective `posterior_transform` is returned as is. A
/// scalarized objective logs a deprecation warning and becomes a
/// [`ScalarizedPosteriorTransform`]; other objectives are rejected.
pub fn deprecate_objective(
    acqf_name: &str,
    posterior_transform: Option<Box<dyn PosteriorTransform>>,
    objective: Option<LegacyObjective>,
) -> Result<Option<Box<dyn PosteriorTransform>>> {
    let Some(objective) = objective else {
        return Ok(posterior_transform);
    };
    warn!(
        "{} got a non-MC `objective`. Objectives of analytic acquisition \
         functions are deprecated, use a posterior transform instead.",
        acqf_name
    );
    match objective {
        LegacyObjective::Scalarized { weights, offset } => Ok(Some(Box::new(
            ScalarizedPosteriorTransform::new(weights, offset),
        ))),
        LegacyObjective::Other(name) => Err(Error::Unsupported(format!(
            "{} only supports scalarized objectives, got {}",
            acqf_name, name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posterior::GpPosterior;
    use crate::traits::Posterior;

    #[test]
    fn no_objective_keeps_transform() {
        let tf: Box<dyn PosteriorTransform> =
            Box::new(ScalarizedPosteriorTransform::new(DVector::from_vec(vec![1.0]), 0.0));
        let out = deprecate_objective("PosteriorMean", Some(tf), None).unwrap();
        assert!(out.is_some());
        assert!(deprecate_objective("PosteriorMean", None, None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn scalarized_objective_becomes_transform() {
        let objective = LegacyObjective::Scalarized {
            weights: DVector::from_vec(vec![0.5, 2.0]),
            offset: 1.0,
        };
        let tf = deprecate_objective("UpperConfidenceBound", None, Some(objective))
            .unwrap()
            .unwrap();
        let posterior = GpPosterior::new(
            DMatrix::from_row_slice(1, 2, &[2.0, 3.0]),
            DMatrix::identity(2, 2),
        )
        .unwrap();
        let scalarized = tf.transform(&posterior).unwrap();
        assert::close(scalarized.mean()[(0, 0)], 8.0, 1E-12);
        assert::close(scalarized.variance()[(0, 0)], 4.25, 1E-12);
    }

    #[test]
    fn other_objectives_are_rejected() {
        let objective = LegacyObjective::Other("IdentityMCObjective".to_string());
        let res = deprecate_objective("PosteriorMean", None, Some(objective));
        assert!(matches!(res, Err(Error::Unsupported(msg)) if msg.contains("IdentityMCObjective")));
    }
}
