//! ICM multi-task GP over a task index column
use crate::consts::{DEFAULT_CHOLESKY_JITTER, HALF_LN_2PI};
use crate::distribution::MultivariateNormal;
use crate::kernel::{ConstantKernel, IndexKernel, Kernel, KernelError, MaternKernel, ProductKernel};
use crate::likelihood::{FixedNoiseGaussianLikelihood, GaussianLikelihood};
use crate::linalg::{cholesky_with_jitter, unflatten};
use crate::mean::ConstantMean;
use crate::posterior::{GpPosterior, PosteriorOptions};
use crate::priors::LkjCovariancePrior;
use crate::result::{Error, Result};
use crate::traits::Model;
use crate::transforms::{InputTransform, OutcomeTransform};
use itertools::Itertools;
use log::debug;
use nalgebra::{DMatrix, DVector};

/// Scaled Matérn-5/2 ARD kernel over the data columns
pub type DataKernel = ProductKernel<ConstantKernel, MaternKernel>;

/// Observation noise of a [`MultiTaskGp`]
#[derive(Clone, Debug, PartialEq)]
pub enum NoiseSpec {
    /// One noise level shared by every observation, inferred from data
    Inferred(GaussianLikelihood),
    /// Known `n x 1` noise variances
    Fixed(FixedNoiseGaussianLikelihood),
}

impl Default for NoiseSpec {
    fn default() -> Self {
        Self::Inferred(GaussianLikelihood::default())
    }
}

impl NoiseSpec {
    /// Noise variances at `n` points
    fn diagonal(&self, n: usize) -> Result<DVector<f64>> {
        match self {
            Self::Inferred(lik) => Ok(DVector::from_element(n, lik.noise())),
            Self::Fixed(lik) if lik.noise().nrows() == n => Ok(lik.noise().column(0).into_owned()),
            Self::Fixed(lik) => Err(Error::shape("fixed noise rows", n, lik.noise().nrows())),
        }
    }

    fn n_parameters(&self) -> usize {
        match self {
            Self::Inferred(lik) => lik.n_parameters(),
            Self::Fixed(_) => 0,
        }
    }

    fn parameters(&self) -> DVector<f64> {
        match self {
            Self::Inferred(lik) => lik.parameters(),
            Self::Fixed(_) => DVector::zeros(0),
        }
    }

    fn consume_parameters<'p>(&self, params: &'p [f64]) -> Result<(Self, &'p [f64])> {
        match self {
            Self::Inferred(lik) => {
                let (lik, rest) = lik.consume_parameters(params)?;
                Ok((Self::Inferred(lik), rest))
            }
            Self::Fixed(_) => Ok((self.clone(), params)),
        }
    }

    fn ln_prior(&self) -> f64 {
        match self {
            Self::Inferred(lik) => lik.ln_prior(),
            Self::Fixed(_) => 0.0,
        }
    }
}

/// Options for [`MultiTaskGp::new`]
#[derive(Debug, Default)]
pub struct MultiTaskOptions {
    /// Prior on the task covariance
    pub task_covar_prior: Option<LkjCovariancePrior>,
    /// Tasks to produce outputs for, every observed task if `None`
    pub output_tasks: Option<Vec<usize>>,
    /// Rank of the task covariance factor, full rank if `None`
    pub rank: Option<usize>,
    /// Applied to the data columns only
    pub input_transform: Option<Box<dyn InputTransform>>,
    pub outcome_transform: Option<Box<dyn OutcomeTransform>>,
}

impl MultiTaskOptions {
    pub fn with_task_covar_prior(self, prior: LkjCovariancePrior) -> Self {
        Self {
            task_covar_prior: Some(prior),
            ..self
        }
    }

    pub fn with_output_tasks(self, output_tasks: Vec<usize>) -> Self {
        Self {
            output_tasks: Some(output_tasks),
            ..self
        }
    }

    pub fn with_rank(self, rank: usize) -> Self {
        Self {
            rank: Some(rank),
            ..self
        }
    }

    pub fn with_input_transform(self, tf: impl InputTransform + 'static) -> Self {
        Self {
            input_transform: Some(Box::new(tf)),
            ..self
        }
    }

    pub fn with_outcome_transform(self, tf: impl OutcomeTransform + 'static) -> Self {
        Self {
            outcome_transform: Some(Box::new(tf)),
            ..self
        }
    }
}

/// Multi-task GP with an intrinsic coregionalization (ICM) kernel
///
/// Each training row holds `d` data features and one task index column at
/// `task_feature`. The covariance between `(x1, i1)` and `(x2, i2)` is
/// `s K(x1, x2) B[i1, i2]` with a Matérn-5/2 ARD kernel `K`, an output scale
/// `s` and an [`IndexKernel`] `B`. Task values must be the integers
/// `0..t`.
#[derive(Debug)]
pub struct MultiTaskGp {
    /// `n x d` data columns as given
    train_x: DMatrix<f64>,
    train_tasks: Vec<usize>,
    /// Targets on the outcome transformed scale
    train_y: DVector<f64>,
    task_feature: usize,
    output_tasks: Vec<usize>,
    mean: ConstantMean,
    covar: DataKernel,
    task_covar: IndexKernel,
    noise: NoiseSpec,
    input_transform: Option<Box<dyn InputTransform>>,
    outcome_transform: Option<Box<dyn OutcomeTransform>>,
    training: bool,
}

impl MultiTaskGp {
    /// Check `-d <= task_feature <= d` for `n x (d + 1)` inputs and return
    /// the observed tasks, the non-negative task column and `d`.
    pub fn get_all_tasks(x: &DMatrix<f64>, task_feature: isize) -> Result<(Vec<usize>, usize, usize)> {
        if x.ncols() == 0 {
            return Err(Error::shape("training inputs", "a task column", "0 columns"));
        }
        let d = x.ncols() - 1;
        let di = d as isize;
        if task_feature < -di || task_feature > di {
            return Err(Error::InvalidTaskFeature {
                given: task_feature,
                dim: d,
            });
        }
        let task_feature = task_feature.rem_euclid(di + 1) as usize;
        let all_tasks = x
            .column(task_feature)
            .iter()
            .map(|&v| {
                if v >= 0.0 && v.fract() == 0.0 && v.is_finite() {
                    Ok(v as usize)
                } else {
                    Err(Error::InvalidTaskValue(v))
                }
            })
            .collect::<Result<Vec<usize>>>()?
            .into_iter()
            .sorted()
            .dedup()
            .collect();
        Ok((all_tasks, task_feature, d))
    }

    /// Model with `n x (d + 1)` inputs `x` and `n x 1` targets `y`.
    /// Negative `task_feature` values count from the last column.
    pub fn new(
        x: DMatrix<f64>,
        y: DMatrix<f64>,
        task_feature: isize,
        noise: NoiseSpec,
        options: MultiTaskOptions,
    ) -> Result<Self> {
        if y.ncols() != 1 {
            return Err(Error::shape("training targets columns", 1, y.ncols()));
        }
        if x.nrows() != y.nrows() || x.nrows() == 0 {
            return Err(Error::shape("training inputs rows", y.nrows(), x.nrows()));
        }
        let (all_tasks, task_feature, d) = Self::get_all_tasks(&x, task_feature)?;
        if let Some((k, &task)) = all_tasks.iter().enumerate().find(|&(k, &task)| k != task) {
            debug!("task {} found where task {} was expected", task, k);
            return Err(Error::InvalidTaskValue(task as f64));
        }
        let num_tasks = all_tasks.len();

        let MultiTaskOptions {
            task_covar_prior,
            output_tasks,
            rank,
            mut input_transform,
            mut outcome_transform,
        } = options;

        let output_tasks = match output_tasks {
            Some(tasks) => {
                let unknown: Vec<usize> = tasks
                    .iter()
                    .filter(|task| !all_tasks.contains(task))
                    .copied()
                    .collect();
                if !unknown.is_empty() {
                    return Err(Error::UnknownOutputTasks(unknown));
                }
                tasks
            }
            None => all_tasks,
        };

        let data_columns: Vec<usize> = (0..=d).filter(|&c| c != task_feature).collect();
        let train_x = x.select_columns(&data_columns);
        let train_tasks: Vec<usize> = x.column(task_feature).iter().map(|&v| v as usize).collect();
        if let Some(tf) = input_transform.as_mut() {
            tf.fit(&train_x)?;
        }

        let fixed_noise = match &noise {
            NoiseSpec::Fixed(lik) if lik.noise().shape() != y.shape() => {
                return Err(Error::shape(
                    "fixed noise",
                    format!("{}x1", y.nrows()),
                    format!("{}x{}", lik.noise().nrows(), lik.noise().ncols()),
                ));
            }
            NoiseSpec::Fixed(lik) => Some(lik.noise().clone()),
            NoiseSpec::Inferred(_) => None,
        };
        let (train_y, noise) = match outcome_transform.as_mut() {
            Some(tf) => {
                let (y, yvar) = tf.fit_transform(&y, fixed_noise.as_ref())?;
                let noise = match yvar {
                    Some(yvar) => NoiseSpec::Fixed(FixedNoiseGaussianLikelihood::new(yvar)?),
                    None => noise,
                };
                (y, noise)
            }
            None => (y, noise),
        };

        let mut task_covar = IndexKernel::new(num_tasks, rank.unwrap_or(num_tasks))?;
        if let Some(prior) = task_covar_prior {
            task_covar = task_covar.with_prior(prior);
        }
        debug!(
            "MultiTaskGp: {} observations, {} features, {} tasks, task column {}",
            train_x.nrows(),
            d,
            num_tasks,
            task_feature
        );

        Ok(Self {
            train_x,
            train_tasks,
            train_y: train_y.column(0).into_owned(),
            task_feature,
            output_tasks,
            mean: ConstantMean::default(),
            covar: ConstantKernel::outputscale() * MaternKernel::with_default_prior(d),
            task_covar,
            noise,
            input_transform,
            outcome_transform,
            training: true,
        })
    }

    /// Model with known `n x 1` observation noise variances `yvar`
    pub fn with_fixed_noise(
        x: DMatrix<f64>,
        y: DMatrix<f64>,
        yvar: DMatrix<f64>,
        task_feature: isize,
        options: MultiTaskOptions,
    ) -> Result<Self> {
        let noise = NoiseSpec::Fixed(FixedNoiseGaussianLikelihood::new(yvar)?);
        Self::new(x, y, task_feature, noise, options)
    }

    /// Index of the task column, counted from the front
    pub fn task_feature(&self) -> usize {
        self.task_feature
    }

    pub fn num_tasks(&self) -> usize {
        self.task_covar.num_tasks()
    }

    pub fn output_tasks(&self) -> &[usize] {
        &self.output_tasks
    }

    pub fn train_tasks(&self) -> &[usize] {
        &self.train_tasks
    }

    pub fn train_y(&self) -> &DVector<f64> {
        &self.train_y
    }

    pub fn covar_module(&self) -> &DataKernel {
        &self.covar
    }

    pub fn task_covar_module(&self) -> &IndexKernel {
        &self.task_covar
    }

    pub fn noise(&self) -> &NoiseSpec {
        &self.noise
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn train(&mut self) {
        self.training = true;
    }

    pub fn eval(&mut self) {
        self.training = false;
    }

    fn transform_inputs(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        match &self.input_transform {
            Some(tf) => tf.transform(x),
            None => Ok(x.clone()),
        }
    }

    /// Split `n x (d + 1)` inputs into data columns and task indices
    fn split_inputs(&self, x: &DMatrix<f64>) -> Result<(DMatrix<f64>, Vec<usize>)> {
        let d = self.train_x.ncols();
        if x.ncols() != d + 1 {
            return Err(Error::shape("inputs columns", d + 1, x.ncols()));
        }
        let data_columns: Vec<usize> = (0..=d).filter(|&c| c != self.task_feature).collect();
        let tasks = self.task_covar.task_indices(x.column(self.task_feature).iter())?;
        Ok((x.select_columns(&data_columns), tasks))
    }

    fn joint_covariance(
        covar: &DataKernel,
        task_covar: &IndexKernel,
        x1: &DMatrix<f64>,
        t1: &[usize],
        x2: &DMatrix<f64>,
        t2: &[usize],
    ) -> Result<DMatrix<f64>> {
        let data = covar.covariance(x1, x2);
        let task = task_covar.covariance(t1, t2)?;
        Ok(data.component_mul(&task))
    }

    /// Prior over the outputs at `n x (d + 1)` inputs with a task column
    pub fn forward(&self, x: &DMatrix<f64>) -> Result<MultivariateNormal> {
        let (data, tasks) = self.split_inputs(x)?;
        let data = if self.training {
            self.transform_inputs(&data)?
        } else {
            data
        };
        let cov = Self::joint_covariance(&self.covar, &self.task_covar, &data, &tasks, &data, &tasks)?;
        MultivariateNormal::new(self.mean.forward(&data), cov)
    }

    /// Log marginal likelihood of the training targets
    pub fn ln_m(&self) -> Result<f64> {
        self.ln_m_with(&self.mean, &self.covar, &self.task_covar, &self.noise)
    }

    fn ln_m_with(
        &self,
        mean: &ConstantMean,
        covar: &DataKernel,
        task_covar: &IndexKernel,
        noise: &NoiseSpec,
    ) -> Result<f64> {
        let x = self.transform_inputs(&self.train_x)?;
        let tasks = &self.train_tasks;
        let n = x.nrows();
        let k = Self::joint_covariance(covar, task_covar, &x, tasks, &x, tasks)?
            + DMatrix::from_diagonal(&noise.diagonal(n)?);
        let chol = cholesky_with_jitter(&k, DEFAULT_CHOLESKY_JITTER)?;
        let diff = &self.train_y - mean.forward(&x);
        let alpha = chol.solve(&diff);
        let dlog_sum: f64 = chol.l_dirty().diagonal().iter().map(|x| x.ln()).sum();
        Ok(-0.5 * diff.dot(&alpha) - dlog_sum - n as f64 * HALF_LN_2PI)
    }

    /// Log marginal likelihood at `params` with its gradient,
    /// `½ Σ (ααᵀ - K⁻¹) ∘ ∂K` for every covariance parameter
    pub fn ln_m_with_gradient_at(&self, params: &[f64]) -> Result<(f64, DVector<f64>)> {
        let (mean, covar, task_covar, noise) = self.reparameterize(params)?;
        let x = self.transform_inputs(&self.train_x)?;
        let tasks = &self.train_tasks;
        let n = x.nrows();

        let (data, data_grad) = covar.covariance_with_gradient(&x)?;
        let (b, b_grad) = task_covar.covar_matrix_with_gradient()?;
        let gather = |m: &DMatrix<f64>| DMatrix::from_fn(n, n, |i, j| m[(tasks[i], tasks[j])]);
        let task = gather(&b);

        let k = data.component_mul(&task) + DMatrix::from_diagonal(&noise.diagonal(n)?);
        let chol = cholesky_with_jitter(&k, DEFAULT_CHOLESKY_JITTER)?;
        let diff = &self.train_y - mean.forward(&x);
        let alpha = chol.solve(&diff);
        let dlog_sum: f64 = chol.l_dirty().diagonal().iter().map(|x| x.ln()).sum();
        let ln_m = -0.5 * diff.dot(&alpha) - dlog_sum - n as f64 * HALF_LN_2PI;

        let w = &alpha * alpha.transpose() - chol.inverse();
        let half_trace = |dk: &DMatrix<f64>| 0.5 * w.dot(dk);
        let mut grad = vec![alpha.sum()];
        grad.extend(data_grad.iter().map(|d| half_trace(&d.component_mul(&task))));
        grad.extend(b_grad.iter().map(|d| half_trace(&data.component_mul(&gather(d)))));
        if let NoiseSpec::Inferred(lik) = &noise {
            grad.push(0.5 * w.trace() * lik.noise_gradient());
        }
        Ok((ln_m, DVector::from_vec(grad)))
    }

    /// `ln_prior` at `params` without changing the model
    pub fn ln_prior_at(&self, params: &[f64]) -> Result<f64> {
        let (_, covar, task_covar, noise) = self.reparameterize(params)?;
        Ok(covar.ln_prior() + task_covar.ln_prior() + noise.ln_prior())
    }

    pub fn ln_prior(&self) -> f64 {
        self.covar.ln_prior() + self.task_covar.ln_prior() + self.noise.ln_prior()
    }

    pub fn n_parameters(&self) -> usize {
        1 + self.covar.n_parameters() + self.task_covar.n_parameters() + self.noise.n_parameters()
    }

    /// Mean constant, data kernel, task kernel, then noise
    pub fn parameters(&self) -> DVector<f64> {
        let parts = [
            self.mean.parameters(),
            self.covar.parameters(),
            self.task_covar.parameters(),
            self.noise.parameters(),
        ];
        DVector::from_iterator(
            self.n_parameters(),
            parts.iter().flat_map(|p| p.iter().copied()),
        )
    }

    fn reparameterize(
        &self,
        params: &[f64],
    ) -> Result<(ConstantMean, DataKernel, IndexKernel, NoiseSpec)> {
        let (mean, rest) = self.mean.consume_parameters(params)?;
        let (covar, rest) = self.covar.consume_parameters(rest)?;
        let (task_covar, rest) = self.task_covar.consume_parameters(rest)?;
        let (noise, rest) = self.noise.consume_parameters(rest)?;
        if !rest.is_empty() {
            return Err(KernelError::ExtraneousParameters(rest.len()).into());
        }
        Ok((mean, covar, task_covar, noise))
    }

    pub fn set_parameters(&mut self, params: &[f64]) -> Result<()> {
        let (mean, covar, task_covar, noise) = self.reparameterize(params)?;
        self.mean = mean;
        self.covar = covar;
        self.task_covar = task_covar;
        self.noise = noise;
        Ok(())
    }

    /// `ln_m + ln_prior` at `params` without changing the model
    pub fn ln_posterior_at(&self, params: &[f64]) -> Result<f64> {
        let (mean, covar, task_covar, noise) = self.reparameterize(params)?;
        let ln_m = self.ln_m_with(&mean, &covar, &task_covar, &noise)?;
        Ok(ln_m + covar.ln_prior() + task_covar.ln_prior() + noise.ln_prior())
    }

    pub(crate) fn num_observations(&self) -> usize {
        self.train_y.len()
    }
}

impl Model for MultiTaskGp {
    type Posterior = GpPosterior;

    fn num_outputs(&self) -> usize {
        self.output_tasks.len()
    }

    /// Posterior at `q x d` points without a task column, over the output
    /// tasks or the task values in `output_indices`. Joint quantities are
    /// point-major: output `j` at point `i` sits at `i * m + j`.
    fn posterior(&mut self, x: &DMatrix<f64>, options: &PosteriorOptions) -> Result<GpPosterior> {
        self.eval();
        let d = self.train_x.ncols();
        if x.ncols() != d {
            return Err(Error::shape("query columns", d, x.ncols()));
        }
        if x.nrows() == 0 {
            return Err(Error::shape("query rows", "at least one point", 0));
        }
        let tasks = match &options.output_indices {
            Some(indices) => {
                if let Some(&index) = indices.iter().find(|i| !self.output_tasks.contains(i)) {
                    return Err(Error::InvalidOutputIndex {
                        index,
                        num_outputs: self.output_tasks.len(),
                    });
                }
                indices.clone()
            }
            None => self.output_tasks.clone(),
        };
        let (q, m) = (x.nrows(), tasks.len());

        let train_x = self.transform_inputs(&self.train_x)?;
        let test_x = self.transform_inputs(x)?;
        let rows: Vec<usize> = (0..q).flat_map(|i| std::iter::repeat(i).take(m)).collect();
        let test_x = test_x.select_rows(&rows);
        let test_tasks: Vec<usize> = (0..q).flat_map(|_| tasks.iter().copied()).collect();

        let n = train_x.nrows();
        let train_tasks = &self.train_tasks;
        let k_train = Self::joint_covariance(&self.covar, &self.task_covar, &train_x, train_tasks, &train_x, train_tasks)?
            + DMatrix::from_diagonal(&self.noise.diagonal(n)?);
        let chol = cholesky_with_jitter(&k_train, DEFAULT_CHOLESKY_JITTER)?;
        let k_cross = Self::joint_covariance(&self.covar, &self.task_covar, &test_x, &test_tasks, &train_x, train_tasks)?;
        let k_test = Self::joint_covariance(&self.covar, &self.task_covar, &test_x, &test_tasks, &test_x, &test_tasks)?;

        let diff = &self.train_y - self.mean.forward(&train_x);
        let mean = self.mean.forward(&test_x) + &k_cross * chol.solve(&diff);
        let mut cov = k_test - &k_cross * chol.solve(&k_cross.transpose());
        if options.observation_noise {
            match &self.noise {
                NoiseSpec::Inferred(lik) => {
                    cov += DMatrix::identity(q * m, q * m) * lik.noise();
                }
                NoiseSpec::Fixed(_) => {
                    return Err(Error::Unsupported(
                        "observation noise at new points is unknown for fixed noise models"
                            .to_string(),
                    ))
                }
            }
        }
        let cov = (&cov + cov.transpose()) * 0.5;
        let posterior = GpPosterior::new(unflatten(&mean, q, m)?, cov)?;

        match &self.outcome_transform {
            Some(tf) => {
                let (offset, scale) = tf.affine()?;
                posterior.untransformed(
                    &DVector::from_element(m, offset[0]),
                    &DVector::from_element(m, scale[0]),
                )
            }
            None => Ok(posterior),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{Posterior, Rv};

    /// Task column last, tasks 0 and 1 at different points
    fn data() -> (DMatrix<f64>, DMatrix<f64>) {
        let x: DMatrix<f64> = DMatrix::from_row_slice(5, 2, &[
            0.0, 0.0, //
            0.5, 0.0, //
            1.0, 0.0, //
            0.2, 1.0, //
            0.8, 1.0,
        ]);
        let y = DMatrix::from_fn(5, 1, |i, _| x[(i, 0)].sin() + x[(i, 1)]);
        (x, y)
    }

    #[test]
    fn task_feature_range() {
        let (x, _) = data();
        let (tasks, tf, d) = MultiTaskGp::get_all_tasks(&x, -1).unwrap();
        assert_eq!(tasks, vec![0, 1]);
        assert_eq!((tf, d), (1, 1));
        assert_eq!(MultiTaskGp::get_all_tasks(&x, 1).unwrap().1, 1);
        assert_eq!(
            MultiTaskGp::get_all_tasks(&x, 2),
            Err(Error::InvalidTaskFeature { given: 2, dim: 1 })
        );
        assert!(MultiTaskGp::get_all_tasks(&x, -2).is_err());
    }

    #[test]
    fn task_values_must_be_indices() {
        let (mut x, y) = data();
        x[(4, 1)] = 0.5;
        let res = MultiTaskGp::new(x.clone(), y.clone(), -1, NoiseSpec::default(), MultiTaskOptions::default());
        assert_eq!(res.err(), Some(Error::InvalidTaskValue(0.5)));
        x[(3, 1)] = 2.0;
        x[(4, 1)] = 2.0;
        let res = MultiTaskGp::new(x, y, -1, NoiseSpec::default(), MultiTaskOptions::default());
        assert_eq!(res.err(), Some(Error::InvalidTaskValue(2.0)));
    }

    #[test]
    fn unknown_output_tasks() {
        let (x, y) = data();
        let options = MultiTaskOptions::default().with_output_tasks(vec![1, 3]);
        let res = MultiTaskGp::new(x, y, -1, NoiseSpec::default(), options);
        assert_eq!(res.err(), Some(Error::UnknownOutputTasks(vec![3])));
    }

    #[test]
    fn defaults() {
        let (x, y) = data();
        let model = MultiTaskGp::new(x, y, -1, NoiseSpec::default(), MultiTaskOptions::default()).unwrap();
        assert_eq!(model.num_outputs(), 2);
        assert_eq!(model.task_feature(), 1);
        assert_eq!(model.task_covar_module().rank(), 2);
        assert!(model.task_covar_module().prior().is_none());
        assert_eq!(model.covar_module().right().length_scale_prior().unwrap().shape(), 3.0);
        assert_eq!(model.covar_module().left().prior().unwrap().rate(), 0.15);
        match model.noise() {
            NoiseSpec::Inferred(lik) => assert::close(lik.noise(), 2.0, 1E-10),
            other => panic!("unexpected noise {:?}", other),
        }
    }

    #[test]
    fn ln_m_matches_forward_density() {
        let (x, y) = data();
        let model = MultiTaskGp::new(x.clone(), y.clone(), -1, NoiseSpec::default(), MultiTaskOptions::default()).unwrap();
        let prior = model.forward(&x).unwrap();
        let noisy = MultivariateNormal::new(
            DVector::zeros(5),
            prior.cov() + DMatrix::identity(5, 5) * 2.0,
        )
        .unwrap();
        assert::close(model.ln_m().unwrap(), noisy.ln_f(&y.column(0).into_owned()), 1E-8);
    }

    #[test]
    fn posterior_is_point_major() {
        let (x, y) = data();
        let mut model = MultiTaskGp::new(x, y, -1, NoiseSpec::default(), MultiTaskOptions::default()).unwrap();
        let xq: DMatrix<f64> = DMatrix::from_row_slice(3, 1, &[0.1, 0.4, 0.9]);
        let post = model.posterior(&xq, &PosteriorOptions::default()).unwrap();
        assert!(!model.is_training());
        assert_eq!(post.mean().shape(), (3, 2));
        assert_eq!(post.covariance().unwrap().shape(), (6, 6));
        assert!(post.variance().iter().all(|&v| v >= 0.0));

        let only = model
            .posterior(&xq, &PosteriorOptions::default().with_output_indices(vec![1]))
            .unwrap();
        assert!(only.mean().relative_eq(&post.mean().columns(1, 1).into_owned(), 1E-10, 1E-10));
        assert!(model
            .posterior(&DMatrix::zeros(1, 2), &PosteriorOptions::default())
            .is_err());
        assert!(matches!(
            model.posterior(&DMatrix::zeros(0, 1), &PosteriorOptions::default()),
            Err(Error::ShapeMismatch { what: "query rows", .. })
        ));
    }

    #[test]
    fn fixed_noise_requires_matching_shape() {
        let (x, y) = data();
        let res = MultiTaskGp::with_fixed_noise(x.clone(), y.clone(), DMatrix::from_element(4, 1, 0.1), -1, MultiTaskOptions::default());
        assert!(matches!(res, Err(Error::ShapeMismatch { .. })));
        let mut model =
            MultiTaskGp::with_fixed_noise(x, y, DMatrix::from_element(5, 1, 0.1), -1, MultiTaskOptions::default()).unwrap();
        assert_eq!(model.n_parameters(), 1 + 2 + 6);
        let xq: DMatrix<f64> = DMatrix::from_row_slice(1, 1, &[0.3]);
        assert!(model.posterior(&xq, &PosteriorOptions::default()).is_ok());
        let opts = PosteriorOptions::default().with_observation_noise(true);
        assert!(matches!(model.posterior(&xq, &opts), Err(Error::Unsupported(_))));
    }

    fn assert_ln_m_gradient_matches_slope(model: &MultiTaskGp) {
        let params = model.parameters().map(|p| p + 0.05);
        let ln_m_at = |p: &DVector<f64>| {
            model.ln_posterior_at(p.as_slice()).unwrap() - model.ln_prior_at(p.as_slice()).unwrap()
        };
        let (ln_m, grad) = model.ln_m_with_gradient_at(params.as_slice()).unwrap();
        assert::close(ln_m, ln_m_at(&params), 1E-9);
        assert_eq!(grad.len(), model.n_parameters());

        let h = 1E-5;
        for i in 0..params.len() {
            let mut up = params.clone();
            up[i] += h;
            let mut down = params.clone();
            down[i] -= h;
            let slope = (ln_m_at(&up) - ln_m_at(&down)) / (2.0 * h);
            assert!(
                (grad[i] - slope).abs() < 1E-4 * (1.0 + slope.abs()),
                "parameter {i}: analytic {} vs slope {slope}",
                grad[i]
            );
        }
    }

    #[test]
    fn ln_m_gradient_matches_slope() {
        let (x, y) = data();
        let model = MultiTaskGp::new(x.clone(), y.clone(), -1, NoiseSpec::default(), MultiTaskOptions::default()).unwrap();
        assert_ln_m_gradient_matches_slope(&model);

        let fixed =
            MultiTaskGp::with_fixed_noise(x, y, DMatrix::from_element(5, 1, 0.1), -1, MultiTaskOptions::default())
                .unwrap();
        assert_ln_m_gradient_matches_slope(&fixed);
    }

    #[test]
    fn set_parameters_round_trip() {
        let (x, y) = data();
        let mut model = MultiTaskGp::new(x, y, -1, NoiseSpec::default(), MultiTaskOptions::default()).unwrap();
        let params = model.parameters();
        let ln_post = model.ln_m().unwrap() + model.ln_prior();
        assert::close(model.ln_posterior_at(params.as_slice()).unwrap(), ln_post, 1E-10);
        let mut shifted = params.clone();
        shifted[0] = 0.25;
        model.set_parameters(shifted.as_slice()).unwrap();
        assert_eq!(model.parameters()[0], 0.25);
        assert!(model.set_parameters(&[0.0]).is_err());
    }
}
