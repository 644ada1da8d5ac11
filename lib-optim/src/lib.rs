//! A library for bounded optimization algorithms in Rust

pub mod bfgs;
pub mod line_search;
pub mod minimize;
pub mod projected;
pub mod timeout;
pub mod trust_region;

pub use minimize::{
    minimize, Bounds, Callback, CustomMinimizer, IterationState,
    LinearConstraints, Method, MinimizeOptions, Monitor, OptimizeResult,
    Status,
};
pub use timeout::minimize_with_timeout;

use nalgebra::DVector;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, OptimizeError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OptimizeError {
    /// During optimization, the evaluated point was to become numerically unstable
    #[error("numerical divergence during line search")]
    NumericalDivergence,
    /// Maximum number of iterations reached in attempt to minimize.
    #[error("maximum number of iterations reached")]
    MaxIterationReached,
    /// A rounding error which can cause runaway was encountered.
    #[error("rounding error in line search")]
    RoundingError,
    /// The requested configuration is not supported.
    #[error("unsupported configuration: {0}")]
    Unsupported(String),
    /// Bounds whose lower end is above the upper end.
    #[error("invalid bounds at index {index}: lower ({lower}) > upper ({upper})")]
    InvalidBounds { index: usize, lower: f64, upper: f64 },
    /// The initial point violates a linear constraint a log barrier needs
    /// to hold strictly.
    #[error("initial point violates constraint {index} (slack {slack})")]
    InfeasibleStart { index: usize, slack: f64 },
    /// Dimension of the bounds or the initial point does not match.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    /// Deadline passed at an iterate boundary. Raised by the timeout monitor
    /// and converted into an [`OptimizeResult`] by
    /// [`minimize_with_timeout`]; it never leaves that function.
    #[error("optimization timed out after {runtime:?}")]
    Timeout {
        /// Last iterate seen by the monitor
        x: DVector<f64>,
        /// Wall clock time spent when the deadline was detected
        runtime: Duration,
    },
}
