//! Multi-task Gaussian process models
pub mod cache;
mod construct;
mod data;
mod deterministic;
mod fit;
mod kronecker;
mod multitask;

pub use cache::{CacheEntry, CacheKey, ModelCache};
pub use construct::{ConstructOptions, MultiTaskGpInputs, PriorConfig};
pub use data::TrainingData;
pub use deterministic::{AffineDeterministicModel, GenericDeterministicModel};
pub use fit::{fit_map, FitOptions, MapModel};
pub use kronecker::{default_task_sd_prior, KroneckerMultiTaskGp, KroneckerOptions};
pub use multitask::{DataKernel, MultiTaskGp, MultiTaskOptions, NoiseSpec};
