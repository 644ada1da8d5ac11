use crate::kernel::KernelError;
use crate::linalg::LinalgError;
use crate::priors::PriorError;
use optim::OptimizeError;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the models, transforms and acquisition functions
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Inputs whose shapes disagree
    #[error("shape mismatch in {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        what: &'static str,
        expected: String,
        got: String,
    },
    /// The task feature index is outside of `[-d, d]`
    #[error("task feature {given} is out of range for {dim} data columns")]
    InvalidTaskFeature { given: isize, dim: usize },
    /// Output tasks that never appear in the training data
    #[error("all output tasks must be observed, unknown tasks: {0:?}")]
    UnknownOutputTasks(Vec<usize>),
    /// A task value that is not a non-negative integer
    #[error("task values must be non-negative integers, got {0}")]
    InvalidTaskValue(f64),
    /// Both a task covariance prior and a prior config were provided
    #[error("only one of `task_covar_prior` and `prior_config` may be given")]
    ConflictingPriors,
    /// The prior config does not request the LKJ prior
    #[error("`prior_config` without `use_LKJ_prior = true` is not supported")]
    UnsupportedPriorConfig,
    /// `eta` in the prior config is not a number
    #[error("`eta` in `prior_config` must be a number, got {0}")]
    InvalidEta(String),
    /// `task_features` is missing or does not have exactly one entry
    #[error("multi-task models need exactly one task feature, got {0:?}")]
    MissingTaskFeatures(Option<Vec<isize>>),
    /// A fixed noise model was requested without observation noise
    #[error("fixed noise models require observed noise variances (Yvar)")]
    MissingNoise,
    /// An output index that does not name an output of the model
    #[error("output index {index} is out of range for {num_outputs} outputs")]
    InvalidOutputIndex { index: usize, num_outputs: usize },
    /// The requested combination of options is not supported
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error(transparent)]
    Prior(#[from] PriorError),
    #[error(transparent)]
    Linalg(#[from] LinalgError),
    #[error(transparent)]
    Optimize(#[from] OptimizeError),
}

impl Error {
    pub(crate) fn shape(
        what: &'static str,
        expected: impl ToString,
        got: impl ToString,
    ) -> Self {
        Self::ShapeMismatch {
            what,
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }
}
