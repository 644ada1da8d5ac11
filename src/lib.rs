//! Multi-task Gaussian process surrogates for Bayesian optimization.
//!
//! [`models::KroneckerMultiTaskGp`] models `n x t` block design data with a
//! covariance that factors into a data kernel and a task kernel, and answers
//! posterior queries without forming the `nt x nt` joint covariance.
//! [`models::MultiTaskGp`] handles data with a task index column.
pub mod acquisition;
pub mod consts;
pub mod distribution;
pub mod kernel;
pub mod likelihood;
pub mod linalg;
pub mod mean;
pub mod models;
pub mod posterior;
pub mod priors;
pub mod result;
pub mod traits;
pub mod transforms;

pub use result::{Error, Result};
