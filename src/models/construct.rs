//! Model inputs from a training data set and loosely typed options
use super::data::TrainingData;
use super::multitask::{MultiTaskGp, MultiTaskOptions};
use crate::priors::{GammaPrior, LkjCovariancePrior};
use crate::result::{Error, Result};
use nalgebra::DMatrix;
use serde::Deserialize;
use serde_json::Value;

/// Default `eta` of a configured LKJ prior
const DEFAULT_CONFIG_ETA: f64 = 0.5;

/// Task covariance prior given as configuration
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PriorConfig {
    /// Only LKJ priors can be configured
    #[serde(rename = "use_LKJ_prior")]
    pub use_lkj_prior: bool,
    /// Kept untyped so that non-numeric values can be reported
    pub eta: Option<Value>,
}

/// Options for [`MultiTaskGp::construct_inputs`]
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConstructOptions {
    /// Input columns holding the task index, exactly one is supported
    pub task_features: Option<Vec<isize>>,
    #[serde(skip)]
    pub task_covar_prior: Option<LkjCovariancePrior>,
    pub prior_config: Option<PriorConfig>,
    pub rank: Option<usize>,
}

impl ConstructOptions {
    pub fn with_task_features(self, task_features: Vec<isize>) -> Self {
        Self {
            task_features: Some(task_features),
            ..self
        }
    }

    pub fn with_task_covar_prior(self, prior: LkjCovariancePrior) -> Self {
        Self {
            task_covar_prior: Some(prior),
            ..self
        }
    }

    pub fn with_prior_config(self, prior_config: PriorConfig) -> Self {
        Self {
            prior_config: Some(prior_config),
            ..self
        }
    }

    pub fn with_rank(self, rank: usize) -> Self {
        Self {
            rank: Some(rank),
            ..self
        }
    }
}

/// Arguments of a [`MultiTaskGp`]
#[derive(Clone, Debug, PartialEq)]
pub struct MultiTaskGpInputs {
    pub train_x: DMatrix<f64>,
    pub train_y: DMatrix<f64>,
    /// Observation noise, only set for fixed noise models
    pub train_yvar: Option<DMatrix<f64>>,
    pub task_feature: isize,
    pub rank: Option<usize>,
    pub task_covar_prior: Option<LkjCovariancePrior>,
}

impl MultiTaskGpInputs {
    /// Build the model, with fixed noise when `train_yvar` is set
    pub fn into_model(self) -> Result<MultiTaskGp> {
        let mut options = MultiTaskOptions::default();
        if let Some(rank) = self.rank {
            options = options.with_rank(rank);
        }
        if let Some(prior) = self.task_covar_prior {
            options = options.with_task_covar_prior(prior);
        }
        match self.train_yvar {
            Some(yvar) => MultiTaskGp::with_fixed_noise(
                self.train_x,
                self.train_y,
                yvar,
                self.task_feature,
                options,
            ),
            None => MultiTaskGp::new(
                self.train_x,
                self.train_y,
                self.task_feature,
                Default::default(),
                options,
            ),
        }
    }
}

fn config_eta(eta: Option<&Value>) -> Result<f64> {
    match eta {
        None => Ok(DEFAULT_CONFIG_ETA),
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| Error::InvalidEta(n.to_string())),
        Some(other) => Err(Error::InvalidEta(other.to_string())),
    }
}

impl MultiTaskGp {
    /// Inputs for a model with inferred noise.
    ///
    /// A task covariance prior may be given directly or through
    /// `prior_config`, which builds an LKJ covariance prior over the observed
    /// tasks with a Gamma(1, 0.15) prior on the task standard deviations.
    pub fn construct_inputs(
        data: &TrainingData,
        options: ConstructOptions,
    ) -> Result<MultiTaskGpInputs> {
        let ConstructOptions {
            task_features,
            task_covar_prior,
            prior_config,
            rank,
        } = options;

        let task_feature = match task_features.as_deref() {
            Some([tf]) => Some(*tf),
            _ => None,
        };
        let Some(task_feature) = task_feature else {
            return Err(Error::MissingTaskFeatures(task_features));
        };

        if task_covar_prior.is_some() && prior_config.is_some() {
            return Err(Error::ConflictingPriors);
        }
        let task_covar_prior = match prior_config {
            Some(config) => {
                if !config.use_lkj_prior {
                    return Err(Error::UnsupportedPriorConfig);
                }
                let (all_tasks, _, _) = Self::get_all_tasks(data.x(), task_feature)?;
                let eta = config_eta(config.eta.as_ref())?;
                let sd_prior = GammaPrior::new(1.0, 0.15)?;
                Some(LkjCovariancePrior::new(all_tasks.len(), eta, sd_prior)?)
            }
            None => task_covar_prior,
        };

        Ok(MultiTaskGpInputs {
            train_x: data.x().clone(),
            train_y: data.y().clone(),
            train_yvar: None,
            task_feature,
            rank,
            task_covar_prior,
        })
    }

    /// Inputs for a model with known observation noise, which `data` must
    /// carry
    pub fn construct_fixed_noise_inputs(
        data: &TrainingData,
        options: ConstructOptions,
    ) -> Result<MultiTaskGpInputs> {
        let yvar = data.yvar().ok_or(Error::MissingNoise)?.clone();
        let inputs = Self::construct_inputs(data, options)?;
        Ok(MultiTaskGpInputs {
            train_yvar: Some(yvar),
            ..inputs
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Model;

    fn data() -> TrainingData {
        let x: DMatrix<f64> = DMatrix::from_row_slice(4, 2, &[
            0.1, 0.0, //
            0.4, 0.0, //
            0.7, 1.0, //
            0.9, 2.0,
        ]);
        let y: DMatrix<f64> = DMatrix::from_row_slice(4, 1, &[0.5, 0.2, -0.1, 0.3]);
        TrainingData::new(x, y).unwrap()
    }

    #[test]
    fn task_features_are_required() {
        let res = MultiTaskGp::construct_inputs(&data(), ConstructOptions::default());
        assert_eq!(res, Err(Error::MissingTaskFeatures(None)));
        let opts = ConstructOptions::default().with_task_features(vec![]);
        assert_eq!(
            MultiTaskGp::construct_inputs(&data(), opts),
            Err(Error::MissingTaskFeatures(Some(vec![])))
        );
    }

    #[test]
    fn prior_and_config_conflict() {
        let prior = LkjCovariancePrior::new(3, 1.0, GammaPrior::new(1.0, 0.15).unwrap()).unwrap();
        let opts = ConstructOptions::default()
            .with_task_features(vec![-1])
            .with_task_covar_prior(prior)
            .with_prior_config(PriorConfig {
                use_lkj_prior: true,
                eta: None,
            });
        assert_eq!(
            MultiTaskGp::construct_inputs(&data(), opts),
            Err(Error::ConflictingPriors)
        );
    }

    #[test]
    fn config_builds_lkj_prior() {
        let opts: ConstructOptions = serde_json::from_str(
            r#"{"task_features": [-1], "prior_config": {"use_LKJ_prior": true, "eta": 0.5}}"#,
        )
        .unwrap();
        let inputs = MultiTaskGp::construct_inputs(&data(), opts).unwrap();
        let prior = inputs.task_covar_prior.clone().unwrap();
        assert_eq!(prior.n(), 3);
        assert::close(prior.eta(), 0.5, 0.0);
        assert_eq!(inputs.task_feature, -1);
        assert!(inputs.train_yvar.is_none());

        let model = inputs.into_model().unwrap();
        assert_eq!(model.num_outputs(), 3);
        assert!(model.task_covar_module().prior().is_some());
    }

    #[test]
    fn config_errors() {
        let opts: ConstructOptions = serde_json::from_str(
            r#"{"task_features": [1], "prior_config": {"use_LKJ_prior": false}}"#,
        )
        .unwrap();
        assert_eq!(
            MultiTaskGp::construct_inputs(&data(), opts),
            Err(Error::UnsupportedPriorConfig)
        );

        let opts: ConstructOptions = serde_json::from_str(
            r#"{"task_features": [1], "prior_config": {"use_LKJ_prior": true, "eta": "high"}}"#,
        )
        .unwrap();
        assert_eq!(
            MultiTaskGp::construct_inputs(&data(), opts),
            Err(Error::InvalidEta("\"high\"".to_string()))
        );

        let opts: ConstructOptions = serde_json::from_str(
            r#"{"task_features": [1], "prior_config": {"use_LKJ_prior": true}}"#,
        )
        .unwrap();
        let prior = MultiTaskGp::construct_inputs(&data(), opts)
            .unwrap()
            .task_covar_prior
            .unwrap();
        assert::close(prior.eta(), 0.5, 0.0);
    }

    #[test]
    fn fixed_noise_requires_yvar() {
        let opts = ConstructOptions::default().with_task_features(vec![1]);
        assert_eq!(
            MultiTaskGp::construct_fixed_noise_inputs(&data(), opts.clone()),
            Err(Error::MissingNoise)
        );
        let noisy = data().with_yvar(DMatrix::from_element(4, 1, 0.05)).unwrap();
        let inputs = MultiTaskGp::construct_fixed_noise_inputs(&noisy, opts).unwrap();
        assert_eq!(inputs.train_yvar, Some(DMatrix::from_element(4, 1, 0.05)));
        assert!(inputs.into_model().is_ok());
    }
}
