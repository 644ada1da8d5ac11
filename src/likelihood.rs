//! Observation noise models
use crate::consts::MIN_INFERRED_NOISE_LEVEL;
use crate::linalg::{flatten, root_decomposition, unflatten, KroneckerProduct};
use crate::priors::GammaPrior;
use crate::result::{Error, Result};
use crate::traits::{Mode, Rv};
use nalgebra::{DMatrix, DVector};

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

/// Noise covariance over `n x t` outputs
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub enum NoiseCovariance {
    /// Independent noise with the given `n x t` variances
    Diagonal(DMatrix<f64>),
    /// `data ⊗ task` with `data` `n x n` and `task` `t x t`
    Kronecker {
        data: DMatrix<f64>,
        task: DMatrix<f64>,
    },
}

/// How a [`NoiseCovariance`] can be folded into a Kronecker solve
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum NoiseStructure {
    Homoscedastic(f64),
    Kronecker {
        data: DMatrix<f64>,
        task: DMatrix<f64>,
    },
    Dense(DMatrix<f64>),
}

impl NoiseCovariance {
    /// Marginal noise variances, `n x t`
    pub fn marginal(&self) -> DMatrix<f64> {
        match self {
            Self::Diagonal(var) => var.clone(),
            Self::Kronecker { data, task } => {
                data.diagonal() * task.diagonal().transpose()
            }
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        match self {
            Self::Diagonal(var) => var.shape(),
            Self::Kronecker { data, task } => (data.nrows(), task.nrows()),
        }
    }

    /// The full `nt x nt` covariance
    pub fn to_dense(&self) -> DMatrix<f64> {
        match self {
            Self::Diagonal(var) => {
                DMatrix::from_diagonal(&flatten(var))
            }
            Self::Kronecker { data, task } => data.kronecker(task),
        }
    }

    /// Apply a root `R` (`R Rᵀ = N`) to the `n x t` matrix `z`
    pub fn root_mul(&self, z: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        match self {
            Self::Diagonal(var) => Ok(var.map(f64::sqrt).component_mul(z)),
            Self::Kronecker { data, task } => {
                let op = KroneckerProduct::new(
                    root_decomposition(data)?,
                    root_decomposition(task)?,
                );
                let flat = op.matvec(&flatten(z))?;
                Ok(unflatten(&flat, z.nrows(), z.ncols())?)
            }
        }
    }

    /// Keep only the task columns in `indices`
    pub fn select_tasks(&self, indices: &[usize]) -> Self {
        match self {
            Self::Diagonal(var) => Self::Diagonal(var.select_columns(indices)),
            Self::Kronecker { data, task } => Self::Kronecker {
                data: data.clone(),
                task: task.select_rows(indices).select_columns(indices),
            },
        }
    }

    pub(crate) fn structure(&self) -> NoiseStructure {
        match self {
            Self::Diagonal(var) if var.is_empty() => {
                NoiseStructure::Dense(var.clone())
            }
            Self::Diagonal(var) => {
                let first_row = var.row(0);
                let first = first_row[0];
                if var.iter().all(|&v| v == first) {
                    NoiseStructure::Homoscedastic(first)
                } else if var.row_iter().all(|row| row == first_row) {
                    NoiseStructure::Kronecker {
                        data: DMatrix::identity(var.nrows(), var.nrows()),
                        task: DMatrix::from_diagonal(&first_row.transpose()),
                    }
                } else {
                    NoiseStructure::Dense(var.clone())
                }
            }
            Self::Kronecker { data, task } => NoiseStructure::Kronecker {
                data: data.clone(),
                task: task.clone(),
            },
        }
    }
}

/// Inverse of `value = floor + exp(raw)`
fn raw_noise(value: f64) -> f64 {
    (value - MIN_INFERRED_NOISE_LEVEL).ln()
}

fn noise_from_raw(raw: f64) -> f64 {
    MIN_INFERRED_NOISE_LEVEL + raw.exp()
}

fn check_noise(value: f64) -> Result<f64> {
    if value > MIN_INFERRED_NOISE_LEVEL && value.is_finite() {
        Ok(value)
    } else {
        Err(Error::Unsupported(format!(
            "noise must be finite and above {MIN_INFERRED_NOISE_LEVEL}, got {value}"
        )))
    }
}

/// The Gamma(1.1, 0.05) noise prior
pub fn default_noise_prior() -> GammaPrior {
    GammaPrior::new_unchecked(1.1, 0.05)
}

/// Homoscedastic noise for a single output, inferred from data
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct GaussianLikelihood {
    noise: f64,
    prior: Option<GammaPrior>,
}

impl Default for GaussianLikelihood {
    /// Noise prior Gamma(1.1, 0.05), noise at the prior mode
    fn default() -> Self {
        let prior = default_noise_prior();
        Self {
            noise: prior.mode().unwrap_or(1.0),
            prior: Some(prior),
        }
    }
}

impl GaussianLikelihood {
    pub fn new(noise: f64) -> Result<Self> {
        Ok(Self {
            noise: check_noise(noise)?,
            prior: None,
        })
    }

    pub fn with_prior(self, prior: GammaPrior) -> Self {
        Self {
            prior: Some(prior),
            ..self
        }
    }

    pub fn noise(&self) -> f64 {
        self.noise
    }

    pub fn n_parameters(&self) -> usize {
        1
    }

    /// Derivative of the noise variance with respect to its raw parameter
    pub fn noise_gradient(&self) -> f64 {
        self.noise - MIN_INFERRED_NOISE_LEVEL
    }

    /// `ln(noise - floor)`
    pub fn parameters(&self) -> DVector<f64> {
        DVector::from_element(1, raw_noise(self.noise))
    }

    pub fn consume_parameters<'p>(
        &self,
        params: &'p [f64],
    ) -> Result<(Self, &'p [f64])> {
        match params.split_first() {
            Some((raw, rest)) => Ok((
                Self {
                    noise: noise_from_raw(*raw),
                    prior: self.prior.clone(),
                },
                rest,
            )),
            None => Err(crate::kernel::KernelError::MissingParameters(1).into()),
        }
    }

    pub fn ln_prior(&self) -> f64 {
        self.prior.as_ref().map_or(0.0, |p| p.ln_f(&self.noise))
    }
}

/// Known per-observation noise variances
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct FixedNoiseGaussianLikelihood {
    noise: DMatrix<f64>,
}

impl FixedNoiseGaussianLikelihood {
    /// `noise` holds one variance per entry of the training targets
    pub fn new(noise: DMatrix<f64>) -> Result<Self> {
        if let Some(&bad) = noise.iter().find(|&&v| !(v >= 0.0 && v.is_finite()))
        {
            return Err(Error::Unsupported(format!(
                "observation noise variances must be non-negative, got {bad}"
            )));
        }
        Ok(Self { noise })
    }

    pub fn noise(&self) -> &DMatrix<f64> {
        &self.noise
    }
}

/// Noise over `t` tasks observed at every point
///
/// With `rank = 0` the noise is independent across tasks,
/// `diag(task_noises) + σ²`. With `rank > 0` the tasks share a noise
/// covariance `F Fᵀ + σ² I` with a `t x rank` factor `F`, giving
/// `I_n ⊗ (F Fᵀ + σ² I)` over `n` points.
///
/// Noise levels are parameterized as `ln(noise - 1e-4)` so they never
/// drop below [`MIN_INFERRED_NOISE_LEVEL`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct MultitaskGaussianLikelihood {
    num_tasks: usize,
    noise: f64,
    task_noises: Option<DVector<f64>>,
    task_noise_covar_factor: Option<DMatrix<f64>>,
    prior: Option<GammaPrior>,
}

impl MultitaskGaussianLikelihood {
    /// Likelihood with every noise level at the mode of the default noise
    /// prior
    pub fn new(num_tasks: usize, rank: usize) -> Self {
        let prior = default_noise_prior();
        let noise = prior.mode().unwrap_or(1.0);
        let (task_noises, task_noise_covar_factor) = if rank == 0 {
            (Some(DVector::repeat(num_tasks, noise)), None)
        } else {
            (None, Some(DMatrix::identity(num_tasks, rank)))
        };
        Self {
            num_tasks,
            noise,
            task_noises,
            task_noise_covar_factor,
            prior: Some(prior),
        }
    }

    pub fn without_prior(self) -> Self {
        Self {
            prior: None,
            ..self
        }
    }

    pub fn with_noise(self, noise: f64) -> Result<Self> {
        Ok(Self {
            noise: check_noise(noise)?,
            ..self
        })
    }

    /// Set the per task noise levels of a `rank = 0` likelihood
    pub fn with_task_noises(self, task_noises: DVector<f64>) -> Result<Self> {
        if self.task_noises.is_none() {
            return Err(Error::Unsupported(
                "task noises require a rank 0 likelihood".to_string(),
            ));
        }
        if task_noises.len() != self.num_tasks {
            return Err(Error::shape(
                "task noises",
                self.num_tasks,
                task_noises.len(),
            ));
        }
        for &v in task_noises.iter() {
            check_noise(v)?;
        }
        Ok(Self {
            task_noises: Some(task_noises),
            ..self
        })
    }

    /// Set the `t x rank` noise factor of a `rank > 0` likelihood
    pub fn with_task_noise_covar_factor(self, factor: DMatrix<f64>) -> Result<Self> {
        let rank = self.rank();
        if rank == 0 {
            return Err(Error::Unsupported(
                "a task noise factor requires a rank > 0 likelihood".to_string(),
            ));
        }
        if factor.shape() != (self.num_tasks, rank) {
            return Err(Error::shape(
                "task noise factor",
                format!("{}x{}", self.num_tasks, rank),
                format!("{}x{}", factor.nrows(), factor.ncols()),
            ));
        }
        Ok(Self {
            task_noise_covar_factor: Some(factor),
            ..self
        })
    }

    pub fn num_tasks(&self) -> usize {
        self.num_tasks
    }

    pub fn rank(&self) -> usize {
        self.task_noise_covar_factor.as_ref().map_or(0, |f| f.ncols())
    }

    pub fn noise(&self) -> f64 {
        self.noise
    }

    pub fn task_noises(&self) -> Option<&DVector<f64>> {
        self.task_noises.as_ref()
    }

    /// `t x t` noise covariance shared by every point
    pub fn task_noise_covar(&self) -> DMatrix<f64> {
        let t = self.num_tasks;
        let shared = DMatrix::identity(t, t) * self.noise;
        match (&self.task_noises, &self.task_noise_covar_factor) {
            (Some(v), _) => DMatrix::from_diagonal(v) + shared,
            (None, Some(f)) => f * f.transpose() + shared,
            (None, None) => shared,
        }
    }

    /// Derivative of [`Self::task_noise_covar`] with respect to each entry
    /// of `parameters()`
    pub fn task_noise_covar_gradient(&self) -> Vec<DMatrix<f64>> {
        let t = self.num_tasks;
        let unit = |j: usize, scale: f64| {
            let mut d = DMatrix::zeros(t, t);
            d[(j, j)] = scale;
            d
        };
        let mut slices = vec![
            DMatrix::identity(t, t) * (self.noise - MIN_INFERRED_NOISE_LEVEL),
        ];
        if let Some(v) = &self.task_noises {
            slices.extend(
                v.iter()
                    .enumerate()
                    .map(|(j, &x)| unit(j, x - MIN_INFERRED_NOISE_LEVEL)),
            );
        }
        if let Some(f) = &self.task_noise_covar_factor {
            slices.extend(crate::kernel::factor_gradient(f));
        }
        slices
    }

    /// Noise covariance over `n` points
    pub fn noise_covariance(&self, n: usize) -> NoiseCovariance {
        match &self.task_noises {
            Some(v) => {
                let row = v.map(|x| x + self.noise).transpose();
                NoiseCovariance::Diagonal(DMatrix::from_fn(n, self.num_tasks, |_, j| {
                    row[j]
                }))
            }
            None => NoiseCovariance::Kronecker {
                data: DMatrix::identity(n, n),
                task: self.task_noise_covar(),
            },
        }
    }

    pub fn n_parameters(&self) -> usize {
        1 + self.task_noises.as_ref().map_or(0, |v| v.len())
            + self.task_noise_covar_factor.as_ref().map_or(0, |f| f.len())
    }

    /// Global noise, then task noises (rank 0) or the noise factor
    /// row-major (rank > 0)
    pub fn parameters(&self) -> DVector<f64> {
        let mut params = vec![raw_noise(self.noise)];
        if let Some(v) = &self.task_noises {
            params.extend(v.iter().map(|&x| raw_noise(x)));
        }
        if let Some(f) = &self.task_noise_covar_factor {
            params.extend(f.transpose().iter());
        }
        DVector::from_vec(params)
    }

    pub fn consume_parameters<'p>(
        &self,
        params: &'p [f64],
    ) -> Result<(Self, &'p [f64])> {
        let n = self.n_parameters();
        if params.len() < n {
            return Err(
                crate::kernel::KernelError::MissingParameters(n - params.len())
                    .into(),
            );
        }
        let (cur, rest) = params.split_at(n);
        let t = self.num_tasks;
        let task_noises = self.task_noises.as_ref().map(|_| {
            DVector::from_iterator(t, cur[1..=t].iter().map(|&r| noise_from_raw(r)))
        });
        let task_noise_covar_factor = self
            .task_noise_covar_factor
            .as_ref()
            .map(|f| DMatrix::from_row_slice(t, f.ncols(), &cur[1..]));
        Ok((
            Self {
                num_tasks: t,
                noise: noise_from_raw(cur[0]),
                task_noises,
                task_noise_covar_factor,
                prior: self.prior.clone(),
            },
            rest,
        ))
    }

    /// Noise prior over the global noise and each task noise
    pub fn ln_prior(&self) -> f64 {
        match &self.prior {
            Some(prior) => {
                let task = self
                    .task_noises
                    .as_ref()
                    .map_or(0.0, |v| v.iter().map(|x| prior.ln_f(x)).sum());
                prior.ln_f(&self.noise) + task
            }
            None => 0.0,
        }
    }
}

/// Likelihood of a Kronecker multi-task model
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub enum MultitaskLikelihood {
    Gaussian(MultitaskGaussianLikelihood),
    /// Known `n x t` noise variances at the training points
    FixedNoise(FixedNoiseGaussianLikelihood),
}

impl MultitaskLikelihood {
    /// Noise at `n` points. Fixed noise is only known at the training
    /// points, so any other `n` is an error.
    pub fn noise_covariance(&self, n: usize) -> Result<NoiseCovariance> {
        match self {
            Self::Gaussian(lik) => Ok(lik.noise_covariance(n)),
            Self::FixedNoise(lik) => {
                if lik.noise().nrows() == n {
                    Ok(NoiseCovariance::Diagonal(lik.noise().clone()))
                } else {
                    Err(Error::shape("fixed noise rows", n, lik.noise().nrows()))
                }
            }
        }
    }

    pub fn n_parameters(&self) -> usize {
        match self {
            Self::Gaussian(lik) => lik.n_parameters(),
            Self::FixedNoise(_) => 0,
        }
    }

    pub fn parameters(&self) -> DVector<f64> {
        match self {
            Self::Gaussian(lik) => lik.parameters(),
            Self::FixedNoise(_) => DVector::zeros(0),
        }
    }

    pub fn consume_parameters<'p>(
        &self,
        params: &'p [f64],
    ) -> Result<(Self, &'p [f64])> {
        match self {
            Self::Gaussian(lik) => {
                let (lik, rest) = lik.consume_parameters(params)?;
                Ok((Self::Gaussian(lik), rest))
            }
            Self::FixedNoise(_) => Ok((self.clone(), params)),
        }
    }

    pub fn ln_prior(&self) -> f64 {
        match self {
            Self::Gaussian(lik) => lik.ln_prior(),
            Self::FixedNoise(_) => 0.0,
        }
    }
}

impl From<MultitaskGaussianLikelihood> for MultitaskLikelihood {
    fn from(lik: MultitaskGaussianLikelihood) -> Self {
        Self::Gaussian(lik)
    }
}

impl From<FixedNoiseGaussianLikelihood> for MultitaskLikelihood {
    fn from(lik: FixedNoiseGaussianLikelihood) -> Self {
        Self::FixedNoise(lik)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_noise_starts_at_prior_mode() {
        let lik = MultitaskGaussianLikelihood::new(3, 0);
        assert::close(lik.noise(), 2.0, 1E-10);
        assert_eq!(lik.rank(), 0);
        assert_eq!(lik.n_parameters(), 4);
        match lik.noise_covariance(2) {
            NoiseCovariance::Diagonal(var) => {
                assert_eq!(var.shape(), (2, 3));
                assert!(var.iter().all(|&v| (v - 4.0).abs() < 1E-10));
            }
            other => panic!("expected diagonal noise, got {other:?}"),
        }
    }

    #[test]
    fn low_rank_noise_is_kronecker() {
        let lik = MultitaskGaussianLikelihood::new(2, 1).with_noise(0.5).unwrap();
        let cov = lik.noise_covariance(3);
        assert_eq!(cov.shape(), (3, 2));
        // F = [1, 0]ᵀ so the task covariance is diag(1.5, 0.5)
        let expected: DMatrix<f64> = DMatrix::from_row_slice(3, 2, &[1.5, 0.5, 1.5, 0.5, 1.5, 0.5]);
        assert!(cov.marginal().relative_eq(&expected, 1E-12, 1E-12));
        assert!(matches!(cov.structure(), NoiseStructure::Kronecker { .. }));
    }

    #[test]
    fn parameters_round_trip() {
        let lik = MultitaskGaussianLikelihood::new(2, 0)
            .with_task_noises(DVector::from_row_slice(&[0.1, 0.3]))
            .unwrap();
        let params = lik.parameters();
        let mut extra = params.as_slice().to_vec();
        extra.push(9.0);
        let (lik2, rest) = lik.consume_parameters(&extra).unwrap();
        assert_eq!(rest, &[9.0]);
        assert::close(lik2.noise(), lik.noise(), 1E-12);
        let tn = lik2.task_noises().unwrap();
        assert::close(tn[1], 0.3, 1E-12);
        assert!(lik.consume_parameters(&[0.0]).is_err());
    }

    #[test]
    fn task_noise_gradient_matches_slope() {
        for rank in [0, 2] {
            let lik = MultitaskGaussianLikelihood::new(3, rank);
            let params = lik.parameters();
            let params = params.map(|p| p + 0.1);
            let (lik, _) = lik.consume_parameters(params.as_slice()).unwrap();
            let grad = lik.task_noise_covar_gradient();
            assert_eq!(grad.len(), lik.n_parameters());

            let h = 1E-6;
            for p in 0..params.len() {
                let mut up = params.clone();
                up[p] += h;
                let mut down = params.clone();
                down[p] -= h;
                let (l_up, _) = lik.consume_parameters(up.as_slice()).unwrap();
                let (l_down, _) = lik.consume_parameters(down.as_slice()).unwrap();
                let slope =
                    (l_up.task_noise_covar() - l_down.task_noise_covar()) / (2.0 * h);
                assert!(grad[p].relative_eq(&slope, 1E-6, 1E-8));
            }
        }
    }

    #[test]
    fn noise_floor_holds_for_any_raw_value() {
        let lik = MultitaskGaussianLikelihood::new(1, 0);
        let (lik, _) = lik.consume_parameters(&[-1E3, -1E3]).unwrap();
        assert!(lik.noise() >= MIN_INFERRED_NOISE_LEVEL);
        assert!(MultitaskGaussianLikelihood::new(1, 0).with_noise(1E-6).is_err());
    }

    #[test]
    fn ln_prior_covers_task_and_global_noise() {
        let lik = MultitaskGaussianLikelihood::new(2, 0);
        let prior = default_noise_prior();
        assert::close(lik.ln_prior(), 3.0 * prior.ln_f(&2.0), 1E-12);
        assert::close(lik.clone().without_prior().ln_prior(), 0.0, 0.0);
    }

    #[test]
    fn structure_routing() {
        let homo = NoiseCovariance::Diagonal(DMatrix::from_element(3, 2, 0.1));
        assert_eq!(homo.structure(), NoiseStructure::Homoscedastic(0.1));

        let per_task =
            NoiseCovariance::Diagonal(DMatrix::from_row_slice(2, 2, &[0.1, 0.2, 0.1, 0.2]));
        match per_task.structure() {
            NoiseStructure::Kronecker { data, task } => {
                assert_eq!(data, DMatrix::identity(2, 2));
                assert_eq!(task, DMatrix::from_row_slice(2, 2, &[0.1, 0.0, 0.0, 0.2]));
            }
            other => panic!("expected Kronecker noise, got {other:?}"),
        }

        let hetero =
            NoiseCovariance::Diagonal(DMatrix::from_row_slice(2, 2, &[0.1, 0.2, 0.3, 0.2]));
        assert!(matches!(hetero.structure(), NoiseStructure::Dense(_)));
    }

    #[test]
    fn root_mul_reproduces_covariance() {
        let cov = NoiseCovariance::Kronecker {
            data: DMatrix::from_row_slice(2, 2, &[1.0, 0.2, 0.2, 0.5]),
            task: DMatrix::from_row_slice(2, 2, &[0.3, 0.1, 0.1, 0.4]),
        };
        // columns of the root are R e_k; stacking them recovers R
        let dense = cov.to_dense();
        let mut root = DMatrix::zeros(4, 4);
        for k in 0..4 {
            let mut e = DMatrix::zeros(2, 2);
            e[(k / 2, k % 2)] = 1.0;
            let col = flatten(&cov.root_mul(&e).unwrap());
            root.set_column(k, &col);
        }
        assert!((&root * root.transpose()).relative_eq(&dense, 1E-10, 1E-10));
    }

    #[test]
    fn fixed_noise_only_at_training_points() {
        let lik: MultitaskLikelihood =
            FixedNoiseGaussianLikelihood::new(DMatrix::from_element(3, 2, 0.1))
                .unwrap()
                .into();
        assert!(lik.noise_covariance(3).is_ok());
        assert!(lik.noise_covariance(4).is_err());
        assert_eq!(lik.n_parameters(), 0);
        assert!(FixedNoiseGaussianLikelihood::new(DMatrix::from_element(1, 1, -1.0)).is_err());
    }
}
