//! Multi-task GP with Kronecker structure over a block design
use super::cache::{CacheEntry, CacheKey, ModelCache};
use crate::consts::{DEFAULT_CHOLESKY_JITTER, LN_2PI};
use crate::distribution::{MultitaskCovariance, MultitaskMvn};
use crate::kernel::{IndexKernel, Kernel, KernelError, MaternKernel, MultitaskKernel};
use crate::likelihood::{
    MultitaskGaussianLikelihood, MultitaskLikelihood, NoiseCovariance, NoiseStructure,
};
use crate::linalg::{
    cat_rows, flatten, unflatten, BatchRepeat, Diagonalization, KroneckerEigenSolver,
    KroneckerProduct, KroneckerSolver,
};
use crate::mean::MultitaskConstantMean;
use crate::posterior::{MatheronParts, MultitaskGpPosterior, PosteriorOptions};
use crate::priors::{LkjCovariancePrior, ScalarPrior, SmoothedBoxPrior};
use crate::result::{Error, Result};
use crate::traits::Model;
use crate::transforms::{InputTransform, OutcomeTransform};
use log::debug;
use nalgebra::{DMatrix, DVector};

/// Options for [`KroneckerMultiTaskGp::new`]
#[derive(Debug)]
pub struct KroneckerOptions {
    /// Likelihood, a [`MultitaskGaussianLikelihood`] with a Gamma(1.1, 0.05)
    /// noise prior if `None`
    pub likelihood: Option<MultitaskLikelihood>,
    /// Prior on the task covariance, an LKJ covariance prior built from
    /// `eta` and `sd_prior` if `None`
    pub task_covar_prior: Option<LkjCovariancePrior>,
    /// Rank of the task covariance factor, full rank if `None`
    pub rank: Option<usize>,
    /// `eta` of the default LKJ prior
    pub eta: f64,
    /// Standard deviation prior of the default LKJ prior
    pub sd_prior: Option<ScalarPrior>,
    /// Rank of the default likelihood's task noise covariance, 0 for
    /// independent noise per task
    pub likelihood_rank: usize,
    pub input_transform: Option<Box<dyn InputTransform>>,
    pub outcome_transform: Option<Box<dyn OutcomeTransform>>,
}

impl Default for KroneckerOptions {
    fn default() -> Self {
        Self {
            likelihood: None,
            task_covar_prior: None,
            rank: None,
            eta: 1.5,
            sd_prior: None,
            likelihood_rank: 0,
            input_transform: None,
            outcome_transform: None,
        }
    }
}

impl KroneckerOptions {
    pub fn with_likelihood(self, likelihood: impl Into<MultitaskLikelihood>) -> Self {
        Self {
            likelihood: Some(likelihood.into()),
            ..self
        }
    }

    pub fn with_task_covar_prior(self, prior: LkjCovariancePrior) -> Self {
        Self {
            task_covar_prior: Some(prior),
            ..self
        }
    }

    pub fn with_rank(self, rank: usize) -> Self {
        Self {
            rank: Some(rank),
            ..self
        }
    }

    pub fn with_eta(self, eta: f64) -> Self {
        Self { eta, ..self }
    }

    pub fn with_sd_prior(self, sd_prior: impl Into<ScalarPrior>) -> Self {
        Self {
            sd_prior: Some(sd_prior.into()),
            ..self
        }
    }

    pub fn with_likelihood_rank(self, likelihood_rank: usize) -> Self {
        Self {
            likelihood_rank,
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

/// Default standard deviation prior of the task covariance,
/// `SmoothedBox(e⁻⁶, e^1.25, 0.05)`
pub fn default_task_sd_prior() -> Result<SmoothedBoxPrior> {
    Ok(SmoothedBoxPrior::new((-6.0_f64).exp(), 1.25_f64.exp(), 0.05)?)
}

/// Route the noise to the cheapest solver that is exact for it
pub(crate) fn kronecker_solver(
    data: &DMatrix<f64>,
    task: &DMatrix<f64>,
    data_diag: &Diagonalization,
    task_diag: &Diagonalization,
    noise: &NoiseCovariance,
) -> Result<KroneckerSolver> {
    let solver = match noise.structure() {
        NoiseStructure::Homoscedastic(noise) => {
            KroneckerSolver::Eigen(KroneckerEigenSolver::diagonal(data_diag, task_diag, noise))
        }
        NoiseStructure::Kronecker {
            data: noise_data,
            task: noise_task,
        } => KroneckerSolver::Eigen(KroneckerEigenSolver::whitened(
            data,
            task,
            &noise_data,
            &noise_task,
        )?),
        NoiseStructure::Dense(noise) => {
            debug!(
                "heteroscedastic noise over {}x{} outputs, using a dense solve",
                noise.nrows(),
                noise.ncols()
            );
            KroneckerSolver::dense(data, task, &noise, DEFAULT_CHOLESKY_JITTER)?
        }
    };
    Ok(solver)
}

/// Multi-task GP over `n` points where every one of the `t` tasks is
/// observed at every point.
///
/// The joint covariance is `K(X, X) ⊗ Ktt` with a Matérn-5/2 ARD data
/// kernel and an [`IndexKernel`] over tasks. Posteriors are computed from
/// the eigendecompositions of the two factors and never form the `nt x nt`
/// covariance, unless the noise has no Kronecker structure.
///
/// The model is in training mode after construction. Posterior queries
/// switch it to evaluation mode and memoize train-time decompositions until
/// [`KroneckerMultiTaskGp::train`] is called again.
#[derive(Debug)]
pub struct KroneckerMultiTaskGp {
    /// Training inputs as given
    train_x: DMatrix<f64>,
    /// Training targets on the outcome transformed scale
    train_y: DMatrix<f64>,
    mean: MultitaskConstantMean,
    covar: MultitaskKernel<MaternKernel>,
    likelihood: MultitaskLikelihood,
    input_transform: Option<Box<dyn InputTransform>>,
    outcome_transform: Option<Box<dyn OutcomeTransform>>,
    training: bool,
    cache: ModelCache,
}

impl KroneckerMultiTaskGp {
    /// Build a model on `n x d` inputs `x` and `n x t` targets `y`
    pub fn new(x: DMatrix<f64>, y: DMatrix<f64>, options: KroneckerOptions) -> Result<Self> {
        let (n, t) = y.shape();
        if n == 0 || t == 0 {
            return Err(Error::shape(
                "training targets",
                "at least one point and one task",
                format!("{n}x{t}"),
            ));
        }
        if x.nrows() != n {
            return Err(Error::shape("training inputs rows", n, x.nrows()));
        }

        let KroneckerOptions {
            likelihood,
            task_covar_prior,
            rank,
            eta,
            sd_prior,
            likelihood_rank,
            mut input_transform,
            mut outcome_transform,
        } = options;

        if let Some(tf) = input_transform.as_mut() {
            tf.fit(&x)?;
        }
        let train_y = match outcome_transform.as_mut() {
            Some(tf) => tf.fit_transform(&y, None)?.0,
            None => y,
        };

        let likelihood = match likelihood {
            Some(lik) => lik,
            None => MultitaskGaussianLikelihood::new(t, likelihood_rank).into(),
        };
        check_likelihood(&likelihood, n, t)?;

        let task_covar_prior = match task_covar_prior {
            Some(prior) => prior,
            None => {
                let sd_prior = match sd_prior {
                    Some(p) => p,
                    None => default_task_sd_prior()?.into(),
                };
                LkjCovariancePrior::new(t, eta, sd_prior)?
            }
        };
        let task_covar = IndexKernel::new(t, rank.unwrap_or(t))?.with_prior(task_covar_prior);
        let covar = MultitaskKernel::new(MaternKernel::with_default_prior(x.ncols()), task_covar);
        debug!(
            "KroneckerMultiTaskGp: {} points, {} features, {} tasks, rank {}",
            n,
            x.ncols(),
            t,
            covar.task_covar().rank()
        );

        Ok(Self {
            train_x: x,
            train_y,
            mean: MultitaskConstantMean::new(t),
            covar,
            likelihood,
            input_transform,
            outcome_transform,
            training: true,
            cache: ModelCache::new(),
        })
    }

    pub fn train_x(&self) -> &DMatrix<f64> {
        &self.train_x
    }

    /// Training targets on the outcome transformed scale
    pub fn train_y(&self) -> &DMatrix<f64> {
        &self.train_y
    }

    pub fn num_tasks(&self) -> usize {
        self.train_y.ncols()
    }

    pub fn mean_module(&self) -> &MultitaskConstantMean {
        &self.mean
    }

    pub fn covar_module(&self) -> &MultitaskKernel<MaternKernel> {
        &self.covar
    }

    pub fn likelihood(&self) -> &MultitaskLikelihood {
        &self.likelihood
    }

    pub fn outcome_transform(&self) -> Option<&dyn OutcomeTransform> {
        self.outcome_transform.as_deref()
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Enter training mode, dropping every memoized decomposition
    pub fn train(&mut self) {
        self.cache.evict(&CacheKey::ALL);
        self.training = true;
    }

    /// Enter evaluation mode
    pub fn eval(&mut self) {
        self.training = false;
    }

    fn transform_inputs(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        match &self.input_transform {
            Some(tf) => tf.transform(x),
            None => Ok(x.clone()),
        }
    }

    fn train_inputs(&self) -> Result<DMatrix<f64>> {
        self.transform_inputs(&self.train_x)
    }

    /// Prior over the outputs at `x`. Inputs are only transformed here in
    /// training mode; in evaluation mode they are expected to be transformed
    /// already.
    pub fn forward(&self, x: &DMatrix<f64>) -> Result<MultitaskMvn> {
        let x = if self.training {
            self.transform_inputs(x)?
        } else {
            x.clone()
        };
        MultitaskMvn::new(
            self.mean.forward(&x),
            MultitaskCovariance::Kronecker(self.covar.covariance(&x, &x)),
        )
    }

    /// `K(X, X) ⊗ Ktt` on the transformed training inputs
    pub fn train_full_covar(&mut self) -> Result<KroneckerProduct> {
        if let Some(kp) = self.cache.kronecker(CacheKey::TrainFullCovar) {
            return Ok(kp.clone());
        }
        let x = self.train_inputs()?;
        let kp = self.covar.covariance(&x, &x);
        self.cache
            .insert(CacheKey::TrainFullCovar, CacheEntry::Kronecker(kp.clone()));
        Ok(kp)
    }

    /// Diagonalization of `K(X, X)`
    pub fn data_data_roots(&mut self) -> Result<Diagonalization> {
        if let Some(diag) = self.cache.diagonalization(CacheKey::DataDataRoots) {
            return Ok(diag.clone());
        }
        let diag = Diagonalization::new(self.train_full_covar()?.left())?;
        self.cache
            .insert(CacheKey::DataDataRoots, CacheEntry::Diagonalization(diag.clone()));
        Ok(diag)
    }

    /// Diagonalization of `Ktt`
    pub fn task_root(&mut self) -> Result<Diagonalization> {
        if let Some(diag) = self.cache.diagonalization(CacheKey::TaskRoot) {
            return Ok(diag.clone());
        }
        let diag = Diagonalization::new(&self.covar.task_covar().covar_matrix())?;
        self.cache
            .insert(CacheKey::TaskRoot, CacheEntry::Diagonalization(diag.clone()));
        Ok(diag)
    }

    /// `(K(X, X) ⊗ Ktt + N)⁻¹ vec(Y - m(X))`
    pub fn predictive_mean_cache(&mut self) -> Result<DVector<f64>> {
        let solver = self.train_solver()?;
        self.predictive_mean_cache_with(&solver)
    }

    fn predictive_mean_cache_with(&mut self, solver: &KroneckerSolver) -> Result<DVector<f64>> {
        if let Some(v) = self.cache.vector(CacheKey::PredictiveMeanCache) {
            return Ok(v.clone());
        }
        let x = self.train_inputs()?;
        let train_diff = &self.train_y - self.mean.forward(&x);
        let solved = flatten(&solver.solve(&train_diff)?);
        self.cache
            .insert(CacheKey::PredictiveMeanCache, CacheEntry::Vector(solved.clone()));
        Ok(solved)
    }

    /// Solver for `K(X, X) ⊗ Ktt + N` in the branch the noise structure
    /// selects
    fn train_solver(&mut self) -> Result<KroneckerSolver> {
        if let Some(solver) = self.cache.solver(CacheKey::TrainSolver) {
            return Ok(solver.clone());
        }
        let kp = self.train_full_covar()?;
        let data_diag = self.data_data_roots()?;
        let task_diag = self.task_root()?;
        let noise = self.likelihood.noise_covariance(self.train_x.nrows())?;
        let solver = kronecker_solver(kp.left(), kp.right(), &data_diag, &task_diag, &noise)?;
        self.cache
            .insert(CacheKey::TrainSolver, CacheEntry::Solver(solver.clone()));
        Ok(solver)
    }

    /// Observation noise at `q` new points
    fn test_noise(&self, q: usize) -> Result<NoiseCovariance> {
        match &self.likelihood {
            MultitaskLikelihood::Gaussian(lik) => Ok(lik.noise_covariance(q)),
            MultitaskLikelihood::FixedNoise(_) => Err(Error::Unsupported(
                "observation noise at new points is unknown for a fixed noise likelihood"
                    .to_string(),
            )),
        }
    }

    /// Exact log marginal likelihood of the training targets
    pub fn ln_m(&self) -> Result<f64> {
        self.ln_m_with(&self.mean, &self.covar, &self.likelihood)
    }

    fn ln_m_with(
        &self,
        mean: &MultitaskConstantMean,
        covar: &MultitaskKernel<MaternKernel>,
        likelihood: &MultitaskLikelihood,
    ) -> Result<f64> {
        let x = self.train_inputs()?;
        let kp = covar.covariance(&x, &x);
        let data_diag = Diagonalization::new(kp.left())?;
        let task_diag = Diagonalization::new(kp.right())?;
        let noise = likelihood.noise_covariance(x.nrows())?;
        let solver = kronecker_solver(kp.left(), kp.right(), &data_diag, &task_diag, &noise)?;

        let diff = &self.train_y - mean.forward(&x);
        let solved = solver.solve(&diff)?;
        let nt = diff.len() as f64;
        Ok(-0.5 * (diff.dot(&solved) + solver.ln_det() + nt * LN_2PI))
    }

    /// Log marginal likelihood at `params` and its gradient with respect to
    /// every hyper-parameter.
    ///
    /// With `α = K⁻¹ vec(Y - m(X))` each kernel or noise parameter
    /// contributes `½ (αᵀ ∂K α - tr(K⁻¹ ∂K))`. Every `∂K` is itself a
    /// Kronecker product, so the traces stay in the eigenbasis of the
    /// solver.
    pub fn ln_m_with_gradient_at(&self, params: &[f64]) -> Result<(f64, DVector<f64>)> {
        let (mean, covar, likelihood) = self.reparameterize(params)?;
        let x = self.train_inputs()?;
        let n = x.nrows();
        let (data, data_grad) = covar.data_covar().covariance_with_gradient(&x)?;
        let (task, task_grad) = covar.task_covar().covar_matrix_with_gradient()?;
        let data_diag = Diagonalization::new(&data)?;
        let task_diag = Diagonalization::new(&task)?;
        let noise = likelihood.noise_covariance(n)?;
        let solver = kronecker_solver(&data, &task, &data_diag, &task_diag, &noise)?;

        let diff = &self.train_y - mean.forward(&x);
        let alpha = solver.solve(&diff)?;
        let nt = diff.len() as f64;
        let ln_m = -0.5 * (diff.dot(&alpha) + solver.ln_det() + nt * LN_2PI);

        let mut terms: Vec<KroneckerProduct> = data_grad
            .iter()
            .map(|d| KroneckerProduct::new(d.clone(), task.clone()))
            .chain(task_grad.iter().map(|d| KroneckerProduct::new(data.clone(), d.clone())))
            .collect();
        if let MultitaskLikelihood::Gaussian(lik) = &likelihood {
            let eye = DMatrix::identity(n, n);
            terms.extend(
                lik.task_noise_covar_gradient()
                    .into_iter()
                    .map(|g| KroneckerProduct::new(eye.clone(), g)),
            );
        }
        let traces = solver.inv_traces(&terms)?;

        let mean_grad = alpha.row_sum();
        let covar_grad = terms.iter().zip(traces.iter()).map(|(term, tr)| {
            let quad = alpha.dot(&(term.left() * &alpha * term.right().transpose()));
            0.5 * (quad - tr)
        });
        let grad = DVector::from_iterator(
            self.n_parameters(),
            mean_grad.iter().copied().chain(covar_grad),
        );
        Ok((ln_m, grad))
    }

    /// `ln_prior` at `params` without changing the model
    pub fn ln_prior_at(&self, params: &[f64]) -> Result<f64> {
        let (_, covar, likelihood) = self.reparameterize(params)?;
        Ok(covar.ln_prior() + likelihood.ln_prior())
    }

    /// Log density of every hyper-parameter prior
    pub fn ln_prior(&self) -> f64 {
        self.covar.ln_prior() + self.likelihood.ln_prior()
    }

    pub fn n_parameters(&self) -> usize {
        self.mean.n_parameters() + self.covar.n_parameters() + self.likelihood.n_parameters()
    }

    /// Mean constants, kernel parameters, then likelihood parameters
    pub fn parameters(&self) -> DVector<f64> {
        let parts = [
            self.mean.parameters(),
            self.covar.parameters(),
            self.likelihood.parameters(),
        ];
        DVector::from_iterator(
            self.n_parameters(),
            parts.iter().flat_map(|p| p.iter().copied()),
        )
    }

    fn reparameterize(
        &self,
        params: &[f64],
    ) -> Result<(
        MultitaskConstantMean,
        MultitaskKernel<MaternKernel>,
        MultitaskLikelihood,
    )> {
        let (mean, rest) = self.mean.consume_parameters(params)?;
        let (covar, rest) = self.covar.consume_parameters(rest)?;
        let (likelihood, rest) = self.likelihood.consume_parameters(rest)?;
        if !rest.is_empty() {
            return Err(KernelError::ExtraneousParameters(rest.len()).into());
        }
        Ok((mean, covar, likelihood))
    }

    /// Replace every hyper-parameter, see [`parameters`](Self::parameters)
    /// for the layout. Memoized decompositions are dropped.
    pub fn set_parameters(&mut self, params: &[f64]) -> Result<()> {
        let (mean, covar, likelihood) = self.reparameterize(params)?;
        self.mean = mean;
        self.covar = covar;
        self.likelihood = likelihood;
        self.cache.evict(&CacheKey::ALL);
        Ok(())
    }

    /// `ln_m + ln_prior` at `params` without changing the model
    pub fn ln_posterior_at(&self, params: &[f64]) -> Result<f64> {
        let (mean, covar, likelihood) = self.reparameterize(params)?;
        let ln_m = self.ln_m_with(&mean, &covar, &likelihood)?;
        Ok(ln_m + covar.ln_prior() + likelihood.ln_prior())
    }

    /// Number of scalar observations, `n * t`
    pub(crate) fn num_observations(&self) -> usize {
        self.train_y.len()
    }

    /// Task covariance and a root of it
    fn task_factors(&mut self) -> Result<(DMatrix<f64>, DMatrix<f64>)> {
        let task_covar = self.covar.task_covar().covar_matrix();
        let task_root = self.task_root()?.root();
        Ok((task_covar, task_root))
    }

    /// Posteriors at a batch of `q x d` query sets sharing one task
    /// covariance
    pub fn posterior_batch(
        &mut self,
        xs: &[DMatrix<f64>],
        options: &PosteriorOptions,
    ) -> Result<Vec<MultitaskGpPosterior>> {
        self.eval();
        let (task_covar, task_root) = self.task_factors()?;
        let task_covars = BatchRepeat::new(&task_covar, xs.len());
        let task_roots = BatchRepeat::new(&task_root, xs.len());
        xs.iter()
            .zip(task_covars.iter().zip(task_roots.iter()))
            .map(|(x, (covar, root))| self.posterior_with_task(x, options, covar, root))
            .collect()
    }

    fn posterior_with_task(
        &mut self,
        x: &DMatrix<f64>,
        options: &PosteriorOptions,
        task_covar: &DMatrix<f64>,
        task_root: &DMatrix<f64>,
    ) -> Result<MultitaskGpPosterior> {
        if x.ncols() != self.train_x.ncols() {
            return Err(Error::shape("query columns", self.train_x.ncols(), x.ncols()));
        }
        if x.nrows() == 0 {
            return Err(Error::shape("query rows", "at least one point", 0));
        }
        let (n, t) = self.train_y.shape();
        let test_x = self.transform_inputs(x)?;
        let train_x = self.train_inputs()?;
        let q = test_x.nrows();

        // root of the joint train and test data covariance
        let data_diag = self.data_data_roots()?;
        let data_covar = self.covar.data_covar();
        let test_data = data_covar.covariance(&test_x, &train_x);
        let test_test = data_covar.covariance(&test_x, &test_x);
        let updated_root = cat_rows(&data_diag, &test_data, &test_test, DEFAULT_CHOLESKY_JITTER)?;
        let joint_root = KroneckerProduct::new(updated_root, task_root.clone());
        let test_train_covar = KroneckerProduct::new(test_data, task_covar.clone());

        let train_diff = &self.train_y - self.mean.forward(&train_x);
        let test_mean = self.mean.forward(&test_x);
        let train_noise = self.likelihood.noise_covariance(n)?;
        let test_noise = if options.observation_noise {
            Some(self.test_noise(q)?)
        } else {
            None
        };

        let solver = self.train_solver()?;
        let mean_cache = self.predictive_mean_cache_with(&solver)?;
        let pred_mean = unflatten(&test_train_covar.matvec(&mean_cache)?, q, t)? + &test_mean;

        let test_var = test_test.diagonal() * task_covar.diagonal().transpose();
        let data_var = solver.quad_diag(test_train_covar.left(), task_covar)?;
        let mut pred_var = (test_var - data_var).map(|v| v.max(0.0));
        if let Some(noise) = &test_noise {
            pred_var += noise.marginal();
        }

        let parts = MatheronParts {
            joint_root,
            test_train_covar,
            test_test_covar: KroneckerProduct::new(test_test, task_covar.clone()),
            train_diff,
            test_mean,
            solver,
            train_noise,
            test_noise,
        };
        let mut posterior = MultitaskGpPosterior::new(parts, pred_mean, pred_var);
        if let Some(tf) = &self.outcome_transform {
            let (offset, scale) = tf.affine()?;
            posterior = posterior.untransformed(offset, scale)?;
        }
        if let Some(indices) = &options.output_indices {
            posterior = posterior.select_outputs(indices.clone())?;
        }
        Ok(posterior)
    }
}

fn check_likelihood(likelihood: &MultitaskLikelihood, n: usize, t: usize) -> Result<()> {
    match likelihood {
        MultitaskLikelihood::Gaussian(lik) if lik.num_tasks() != t => {
            Err(Error::shape("likelihood tasks", t, lik.num_tasks()))
        }
        MultitaskLikelihood::FixedNoise(lik) if lik.noise().shape() != (n, t) => {
            Err(Error::shape(
                "fixed noise",
                format!("{n}x{t}"),
                format!("{}x{}", lik.noise().nrows(), lik.noise().ncols()),
            ))
        }
        _ => Ok(()),
    }
}

impl Model for KroneckerMultiTaskGp {
    type Posterior = MultitaskGpPosterior;

    fn num_outputs(&self) -> usize {
        self.num_tasks()
    }

    /// Posterior over every task at the `q x d` points `x`, switching the
    /// model to evaluation mode
    fn posterior(
        &mut self,
        x: &DMatrix<f64>,
        options: &PosteriorOptions,
    ) -> Result<MultitaskGpPosterior> {
        self.eval();
        let (task_covar, task_root) = self.task_factors()?;
        self.posterior_with_task(x, options, &task_covar, &task_root)
    }
}
