use bopt::models::{
    fit_map, ConstructOptions, FitOptions, MapModel, MultiTaskGp, MultiTaskOptions, NoiseSpec,
    TrainingData,
};
use bopt::posterior::PosteriorOptions;
use bopt::priors::{GammaPrior, LkjCovariancePrior};
use bopt::traits::*;
use bopt::Error;
use indoc::indoc;
use nalgebra::DMatrix;

/// Two tasks observed at different points, task column first
fn data() -> TrainingData {
    let rows = 8;
    let x = DMatrix::from_fn(rows, 2, |i, j| {
        if j == 0 {
            (i % 2) as f64
        } else {
            i as f64 / (rows - 1) as f64
        }
    });
    let y = DMatrix::from_fn(rows, 1, |i, _| {
        let u = x[(i, 1)];
        (5.0 * u).sin() + 0.3 * x[(i, 0)]
    });
    TrainingData::new(x, y).unwrap()
}

#[test]
fn construct_from_yaml() {
    let options: ConstructOptions = serde_yaml::from_str(indoc! {"
        task_features: [0]
        rank: 1
        prior_config:
          use_LKJ_prior: true
          eta: 0.5
    "})
    .unwrap();
    let inputs = MultiTaskGp::construct_inputs(&data(), options).unwrap();
    assert_eq!(inputs.task_feature, 0);
    assert_eq!(inputs.rank, Some(1));
    let prior = inputs.task_covar_prior.clone().unwrap();
    assert_eq!(prior.n(), 2);
    assert::close(prior.eta(), 0.5, 0.0);

    let model = inputs.into_model().unwrap();
    assert_eq!(model.task_covar_module().rank(), 1);
    assert_eq!(model.num_outputs(), 2);
}

#[test]
fn construct_rejects_prior_and_config() {
    let mut options: ConstructOptions = serde_json::from_str(
        r#"{"task_features": [0], "prior_config": {"use_LKJ_prior": true}}"#,
    )
    .unwrap();
    options.task_covar_prior =
        Some(LkjCovariancePrior::new(2, 1.0, GammaPrior::new(1.0, 0.15).unwrap()).unwrap());
    assert_eq!(
        MultiTaskGp::construct_inputs(&data(), options),
        Err(Error::ConflictingPriors)
    );
}

#[test]
fn construct_fixed_noise_from_json() {
    let options: ConstructOptions = serde_json::from_str(r#"{"task_features": [0]}"#).unwrap();
    let data = data()
        .with_yvar(DMatrix::from_element(8, 1, 0.01))
        .unwrap();
    let inputs = MultiTaskGp::construct_fixed_noise_inputs(&data, options).unwrap();
    let mut model = inputs.into_model().unwrap();
    assert_eq!(model.task_feature(), 0);
    assert!(matches!(model.noise(), NoiseSpec::Fixed(_)));

    let xq: DMatrix<f64> = DMatrix::from_row_slice(2, 1, &[0.25, 0.75]);
    let post = model.posterior(&xq, &PosteriorOptions::default()).unwrap();
    assert_eq!(post.mean().shape(), (2, 2));
}

#[test]
fn fit_improves_the_log_posterior() {
    let data = data();
    let mut model = MultiTaskGp::new(
        data.x().clone(),
        data.y().clone(),
        0,
        NoiseSpec::default(),
        MultiTaskOptions::default(),
    )
    .unwrap();
    let before = model.ln_m().unwrap() + model.ln_prior();
    let result = fit_map(&mut model, &FitOptions::default().with_max_iter(50)).unwrap();
    let after = model.ln_m().unwrap() + model.ln_prior();
    assert!(after >= before - 1E-9);
    assert!(model.is_training());
    assert!(result.fun.is_finite());
    assert_eq!(MapModel::num_observations(&model), 8);

    // a fitted model still answers posterior queries
    let xq: DMatrix<f64> = DMatrix::from_row_slice(3, 1, &[0.1, 0.5, 0.9]);
    let post = model.posterior(&xq, &PosteriorOptions::default()).unwrap();
    assert!(post.variance().iter().all(|&v| v >= 0.0));
}

#[test]
fn observation_noise_widens_the_posterior() {
    let data = data();
    let mut model = MultiTaskGp::new(
        data.x().clone(),
        data.y().clone(),
        0,
        NoiseSpec::default(),
        MultiTaskOptions::default().with_output_tasks(vec![1]),
    )
    .unwrap();
    let xq: DMatrix<f64> = DMatrix::from_row_slice(2, 1, &[0.2, 0.6]);
    let latent = model.posterior(&xq, &PosteriorOptions::default()).unwrap();
    let noisy = model
        .posterior(&xq, &PosteriorOptions::default().with_observation_noise(true))
        .unwrap();
    assert_eq!(latent.mean().shape(), (2, 1));
    for (a, b) in latent.variance().iter().zip(noisy.variance().iter()) {
        assert::close(b - a, 2.0, 1E-8);
    }
}
