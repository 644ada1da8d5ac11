//! Models whose outputs are a known function of the inputs
use crate::posterior::{
    check_output_indices, DeterministicPosterior, GpPosterior, PosteriorOptions,
    PosteriorTransform,
};
use crate::result::{Error, Result};
use crate::traits::Model;
use crate::transforms::{InputTransform, OutcomeTransform};
use nalgebra::{DMatrix, DVector};
use std::fmt;
use std::sync::Arc;

/// Offset used by [`AffineDeterministicModel::from_weights`]
const DEFAULT_OFFSET: f64 = 0.01;

type OutputFn = dyn Fn(&DMatrix<f64>) -> DMatrix<f64> + Send + Sync;

/// Transforms shared by every deterministic model
#[derive(Debug, Default)]
struct Transforms {
    input: Option<Box<dyn InputTransform>>,
    outcome: Option<Box<dyn OutcomeTransform>>,
}

impl Transforms {
    fn is_empty(&self) -> bool {
        self.input.is_none() && self.outcome.is_none()
    }

    /// Shared posterior logic: transform the inputs, evaluate, undo the
    /// outcome transform, then select outputs
    fn posterior(
        &self,
        x: &DMatrix<f64>,
        options: &PosteriorOptions,
        num_outputs: usize,
        forward: impl FnOnce(&DMatrix<f64>) -> Result<DMatrix<f64>>,
    ) -> Result<DeterministicPosterior> {
        if options.observation_noise {
            return Err(Error::Unsupported(
                "deterministic models have no observation noise".to_string(),
            ));
        }
        if let Some(indices) = &options.output_indices {
            check_output_indices(indices, num_outputs)?;
        }
        let x = match &self.input {
            Some(tf) => tf.transform(x)?,
            None => x.clone(),
        };
        let values = forward(&x)?;
        if values.shape() != (x.nrows(), num_outputs) {
            return Err(Error::shape(
                "deterministic outputs",
                format!("{}x{}", x.nrows(), num_outputs),
                format!("{}x{}", values.nrows(), values.ncols()),
            ));
        }
        let values = match &self.outcome {
            Some(tf) => tf.untransform(&values, None)?.0,
            None => values,
        };
        let posterior = DeterministicPosterior::new(values);
        match &options.output_indices {
            Some(indices) => posterior.select_outputs(indices),
            None => Ok(posterior),
        }
    }

    fn check_subset(&self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Unsupported(
                "subsetting the outputs of a model with transforms".to_string(),
            ))
        }
    }
}

fn unsupported_transform() -> Error {
    Error::Unsupported(
        "posterior transforms need a Gaussian posterior, deterministic models have none"
            .to_string(),
    )
}

/// Deterministic model wrapping an arbitrary function of the inputs
///
/// The function maps `q x d` inputs to `q x m` outputs.
pub struct GenericDeterministicModel {
    f: Arc<OutputFn>,
    num_outputs: usize,
    transforms: Transforms,
}

impl fmt::Debug for GenericDeterministicModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericDeterministicModel")
            .field("num_outputs", &self.num_outputs)
            .field("transforms", &self.transforms)
            .finish_non_exhaustive()
    }
}

impl GenericDeterministicModel {
    /// Single output model
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&DMatrix<f64>) -> DMatrix<f64> + Send + Sync + 'static,
    {
        Self::with_num_outputs(f, 1)
    }

    pub fn with_num_outputs<F>(f: F, num_outputs: usize) -> Self
    where
        F: Fn(&DMatrix<f64>) -> DMatrix<f64> + Send + Sync + 'static,
    {
        Self {
            f: Arc::new(f),
            num_outputs,
            transforms: Transforms::default(),
        }
    }

    pub fn with_input_transform(self, tf: impl InputTransform + 'static) -> Self {
        Self {
            transforms: Transforms {
                input: Some(Box::new(tf)),
                ..self.transforms
            },
            ..self
        }
    }

    pub fn with_outcome_transform(self, tf: impl OutcomeTransform + 'static) -> Self {
        Self {
            transforms: Transforms {
                outcome: Some(Box::new(tf)),
                ..self.transforms
            },
            ..self
        }
    }

    /// Model over the outputs in `indices` only
    pub fn subset_output(&self, indices: &[usize]) -> Result<Self> {
        check_output_indices(indices, self.num_outputs)?;
        self.transforms.check_subset()?;
        let f = Arc::clone(&self.f);
        let columns = indices.to_vec();
        Ok(Self {
            f: Arc::new(move |x: &DMatrix<f64>| f(x).select_columns(&columns)),
            num_outputs: indices.len(),
            transforms: Transforms::default(),
        })
    }
}

impl Model for GenericDeterministicModel {
    type Posterior = DeterministicPosterior;

    fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    fn posterior(
        &mut self,
        x: &DMatrix<f64>,
        options: &PosteriorOptions,
    ) -> Result<DeterministicPosterior> {
        self.transforms
            .posterior(x, options, self.num_outputs, |x| Ok((self.f)(x)))
    }

    fn posterior_transformed(
        &mut self,
        _x: &DMatrix<f64>,
        _options: &PosteriorOptions,
        _transform: &dyn PosteriorTransform,
    ) -> Result<GpPosterior> {
        Err(unsupported_transform())
    }
}

/// Affine model `b + X A` with `A` `d x m` and `b` of length `m`
#[derive(Debug)]
pub struct AffineDeterministicModel {
    a: DMatrix<f64>,
    b: DVector<f64>,
    transforms: Transforms,
}

impl AffineDeterministicModel {
    pub fn new(a: DMatrix<f64>, b: DVector<f64>) -> Result<Self> {
        if a.ncols() == 0 || a.nrows() == 0 {
            return Err(Error::shape(
                "affine weights",
                "at least one row and column",
                format!("{}x{}", a.nrows(), a.ncols()),
            ));
        }
        if b.len() != a.ncols() {
            return Err(Error::shape("affine offset", a.ncols(), b.len()));
        }
        Ok(Self {
            a,
            b,
            transforms: Transforms::default(),
        })
    }

    /// Weights `a` with every offset at `0.01`
    pub fn from_weights(a: DMatrix<f64>) -> Result<Self> {
        let b = DVector::repeat(a.ncols(), DEFAULT_OFFSET);
        Self::new(a, b)
    }

    pub fn with_input_transform(self, tf: impl InputTransform + 'static) -> Self {
        Self {
            transforms: Transforms {
                input: Some(Box::new(tf)),
                ..self.transforms
            },
            ..self
        }
    }

    pub fn with_outcome_transform(self, tf: impl OutcomeTransform + 'static) -> Self {
        Self {
            transforms: Transforms {
                outcome: Some(Box::new(tf)),
                ..self.transforms
            },
            ..self
        }
    }

    pub fn a(&self) -> &DMatrix<f64> {
        &self.a
    }

    pub fn b(&self) -> &DVector<f64> {
        &self.b
    }

    /// `b + X A` for `q x d` inputs `x`
    pub fn forward(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        if x.ncols() != self.a.nrows() {
            return Err(Error::shape("affine inputs columns", self.a.nrows(), x.ncols()));
        }
        let offset = DMatrix::from_fn(x.nrows(), self.b.len(), |_, j| self.b[j]);
        Ok(x * &self.a + offset)
    }

    /// Model over the outputs in `indices` only
    pub fn subset_output(&self, indices: &[usize]) -> Result<Self> {
        check_output_indices(indices, self.a.ncols())?;
        self.transforms.check_subset()?;
        Self::new(self.a.select_columns(indices), self.b.select_rows(indices))
    }
}

impl Model for AffineDeterministicModel {
    type Posterior = DeterministicPosterior;

    fn num_outputs(&self) -> usize {
        self.a.ncols()
    }

    fn posterior(
        &mut self,
        x: &DMatrix<f64>,
        options: &PosteriorOptions,
    ) -> Result<DeterministicPosterior> {
        self.transforms
            .posterior(x, options, self.a.ncols(), |x| self.forward(x))
    }

    fn posterior_transformed(
        &mut self,
        _x: &DMatrix<f64>,
        _options: &PosteriorOptions,
        _transform: &dyn PosteriorTransform,
    ) -> Result<GpPosterior> {
        Err(unsupported_transform())
    }
}
