//! Posterior distributions returned by the models
use crate::likelihood::NoiseCovariance;
use crate::linalg::{
    flatten, root_decomposition, unflatten, KroneckerProduct, KroneckerSolver,
};
use crate::result::{Error, Result};
use crate::traits::Posterior;
use nalgebra::{DMatrix, DVector};
use rand::{Rng, RngCore};
use rand_distr::StandardNormal;

/// Options for `Model::posterior`
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PosteriorOptions {
    /// Outputs to keep, all of them when `None`
    pub output_indices: Option<Vec<usize>>,
    /// Include the likelihood's observation noise
    pub observation_noise: bool,
}

impl PosteriorOptions {
    pub fn with_output_indices(self, output_indices: Vec<usize>) -> Self {
        Self {
            output_indices: Some(output_indices),
            ..self
        }
    }

    pub fn with_observation_noise(self, observation_noise: bool) -> Self {
        Self {
            observation_noise,
            ..self
        }
    }
}

pub(crate) fn check_output_indices(
    indices: &[usize],
    num_outputs: usize,
) -> Result<()> {
    match indices.iter().find(|&&i| i >= num_outputs) {
        Some(&index) => Err(Error::InvalidOutputIndex { index, num_outputs }),
        None => Ok(()),
    }
}

/// Flattened indices of `outputs` within `q x m` row-major outputs
fn flat_indices(q: usize, m: usize, outputs: &[usize]) -> Vec<usize> {
    (0..q)
        .flat_map(|i| outputs.iter().map(move |&j| i * m + j))
        .collect()
}

fn standard_normal(
    nrows: usize,
    ncols: usize,
    rng: &mut dyn RngCore,
) -> DMatrix<f64> {
    DMatrix::from_fn(nrows, ncols, |_, _| rng.sample(StandardNormal))
}

fn scale_columns(
    m: &DMatrix<f64>,
    offset: &DVector<f64>,
    scale: &DVector<f64>,
) -> DMatrix<f64> {
    DMatrix::from_fn(m.nrows(), m.ncols(), |i, j| offset[j] + scale[j] * m[(i, j)])
}

/// Gaussian posterior with a dense joint covariance
#[derive(Clone, Debug, PartialEq)]
pub struct GpPosterior {
    mean: DMatrix<f64>,
    variance: DMatrix<f64>,
    covariance: DMatrix<f64>,
}

impl GpPosterior {
    /// `mean` is `q x m`, `covariance` is over the row-major flattened mean
    pub fn new(mean: DMatrix<f64>, covariance: DMatrix<f64>) -> Result<Self> {
        let k = mean.len();
        if covariance.shape() != (k, k) {
            return Err(Error::shape(
                "posterior covariance",
                format!("{k}x{k}"),
                format!("{}x{}", covariance.nrows(), covariance.ncols()),
            ));
        }
        let variance = unflatten(&covariance.diagonal(), mean.nrows(), mean.ncols())?;
        Ok(Self {
            mean,
            variance,
            covariance,
        })
    }

    /// Keep the outputs in `indices`
    pub fn select_outputs(&self, indices: &[usize]) -> Result<Self> {
        let (q, m) = self.mean.shape();
        check_output_indices(indices, m)?;
        let flat = flat_indices(q, m, indices);
        Self::new(
            self.mean.select_columns(indices),
            self.covariance.select_rows(&flat).select_columns(&flat),
        )
    }

    /// Map every output `j` through `offset[j] + scale[j] * y`
    pub fn untransformed(
        &self,
        offset: &DVector<f64>,
        scale: &DVector<f64>,
    ) -> Result<Self> {
        let (q, m) = self.mean.shape();
        if offset.len() != m || scale.len() != m {
            return Err(Error::shape("outcome transform outputs", m, offset.len()));
        }
        let flat_scale = DVector::from_fn(q * m, |k, _| scale[k % m]);
        let covariance = DMatrix::from_fn(q * m, q * m, |a, b| {
            self.covariance[(a, b)] * flat_scale[a] * flat_scale[b]
        });
        Self::new(scale_columns(&self.mean, offset, scale), covariance)
    }
}

impl Posterior for GpPosterior {
    fn mean(&self) -> &DMatrix<f64> {
        &self.mean
    }

    fn variance(&self) -> &DMatrix<f64> {
        &self.variance
    }

    fn covariance(&self) -> Result<DMatrix<f64>> {
        Ok(self.covariance.clone())
    }

    fn sample(
        &self,
        n: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<DMatrix<f64>>> {
        let (q, m) = self.mean.shape();
        let root = root_decomposition(&self.covariance)?;
        let mean = flatten(&self.mean);
        (0..n)
            .map(|_| {
                let z = standard_normal(q * m, 1, rng).column(0).into_owned();
                Ok(unflatten(&(&mean + &root * z), q, m)?)
            })
            .collect()
    }
}

/// Point mass at the outputs of a deterministic model
#[derive(Clone, Debug, PartialEq)]
pub struct DeterministicPosterior {
    values: DMatrix<f64>,
    variance: DMatrix<f64>,
}

impl DeterministicPosterior {
    /// `values` is `q x m`
    pub fn new(values: DMatrix<f64>) -> Self {
        let variance = DMatrix::zeros(values.nrows(), values.ncols());
        Self { values, variance }
    }

    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    /// Keep the outputs in `indices`
    pub fn select_outputs(&self, indices: &[usize]) -> Result<Self> {
        check_output_indices(indices, self.values.ncols())?;
        Ok(Self::new(self.values.select_columns(indices)))
    }
}

impl Posterior for DeterministicPosterior {
    fn mean(&self) -> &DMatrix<f64> {
        &self.values
    }

    fn variance(&self) -> &DMatrix<f64> {
        &self.variance
    }

    fn covariance(&self) -> Result<DMatrix<f64>> {
        let k = self.values.len();
        Ok(DMatrix::zeros(k, k))
    }

    /// Every sample is the values themselves
    fn sample(
        &self,
        n: usize,
        _rng: &mut dyn RngCore,
    ) -> Result<Vec<DMatrix<f64>>> {
        Ok(vec![self.values.clone(); n])
    }
}

/// Maps a multi-output posterior to a single-output one
pub trait PosteriorTransform: std::fmt::Debug {
    fn transform(&self, posterior: &dyn Posterior) -> Result<GpPosterior>;
}

/// `offset + Σ_j w_j y_j`
#[derive(Clone, Debug, PartialEq)]
pub struct ScalarizedPosteriorTransform {
    weights: DVector<f64>,
    offset: f64,
}

impl ScalarizedPosteriorTransform {
    pub fn new(weights: DVector<f64>, offset: f64) -> Self {
        Self { weights, offset }
    }

    pub fn weights(&self) -> &DVector<f64> {
        &self.weights
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Scalarize `q x m` outputs into a length `q` vector
    pub fn evaluate(&self, y: &DMatrix<f64>) -> Result<DVector<f64>> {
        if y.ncols() != self.weights.len() {
            return Err(Error::shape("scalarized outputs", self.weights.len(), y.ncols()));
        }
        Ok((y * &self.weights).add_scalar(self.offset))
    }
}

impl PosteriorTransform for ScalarizedPosteriorTransform {
    fn transform(&self, posterior: &dyn Posterior) -> Result<GpPosterior> {
        let mean = posterior.mean();
        let (q, m) = mean.shape();
        let weighted = self.evaluate(mean)?;
        // row i of A picks out w for the outputs of point i
        let a = DMatrix::identity(q, q).kronecker(&self.weights.transpose());
        debug_assert_eq!(a.ncols(), q * m);
        let covariance = &a * posterior.covariance()? * a.transpose();
        GpPosterior::new(DMatrix::from_column_slice(q, 1, weighted.as_slice()), covariance)
    }
}

/// Everything a [`MultitaskGpPosterior`] needs besides its moments
#[derive(Clone, Debug)]
pub(crate) struct MatheronParts {
    /// `[[R, 0], [E, L]] ⊗ root(Ktt)`, a root of the joint train and test
    /// covariance
    pub joint_root: KroneckerProduct,
    /// `K(x*, x) ⊗ Ktt`
    pub test_train_covar: KroneckerProduct,
    /// `K(x*, x*) ⊗ Ktt`
    pub test_test_covar: KroneckerProduct,
    /// `Y - m(X)`, `n x t`
    pub train_diff: DMatrix<f64>,
    /// `m(x*)`, `q x t`
    pub test_mean: DMatrix<f64>,
    /// Solver for the noisy training covariance
    pub solver: KroneckerSolver,
    pub train_noise: NoiseCovariance,
    /// Observation noise at the test points when requested
    pub test_noise: Option<NoiseCovariance>,
}

/// Posterior of a Kronecker multi-task GP
///
/// Carries the joint root of the train and test covariance so samples can
/// be drawn with Matheron's rule without touching the training data again.
#[derive(Clone, Debug)]
pub struct MultitaskGpPosterior {
    parts: MatheronParts,
    full_mean: DMatrix<f64>,
    full_variance: DMatrix<f64>,
    affine: Option<(DVector<f64>, DVector<f64>)>,
    output_indices: Option<Vec<usize>>,
    mean: DMatrix<f64>,
    variance: DMatrix<f64>,
}

impl MultitaskGpPosterior {
    pub(crate) fn new(
        parts: MatheronParts,
        mean: DMatrix<f64>,
        variance: DMatrix<f64>,
    ) -> Self {
        Self {
            parts,
            full_mean: mean.clone(),
            full_variance: variance.clone(),
            affine: None,
            output_indices: None,
            mean,
            variance,
        }
    }

    /// Map every task `j` through `offset[j] + scale[j] * y`
    pub fn untransformed(
        self,
        offset: DVector<f64>,
        scale: DVector<f64>,
    ) -> Result<Self> {
        let t = self.num_tasks();
        if offset.len() != t || scale.len() != t {
            return Err(Error::shape("outcome transform outputs", t, offset.len()));
        }
        let affine = match self.affine {
            Some((o, s)) => {
                let offset = offset + scale.component_mul(&o);
                let scale = scale.component_mul(&s);
                (offset, scale)
            }
            None => (offset, scale),
        };
        Ok(Self {
            affine: Some(affine),
            ..self
        }
        .refresh())
    }

    /// Keep only the tasks in `indices`
    pub fn select_outputs(self, indices: Vec<usize>) -> Result<Self> {
        check_output_indices(&indices, self.num_tasks())?;
        Ok(Self {
            output_indices: Some(indices),
            ..self
        }
        .refresh())
    }

    fn refresh(self) -> Self {
        let mean = self.finalize(&self.full_mean);
        let variance = self.finalize_variance(&self.full_variance);
        Self {
            mean,
            variance,
            ..self
        }
    }

    fn finalize(&self, y: &DMatrix<f64>) -> DMatrix<f64> {
        let y = match &self.affine {
            Some((offset, scale)) => scale_columns(y, offset, scale),
            None => y.clone(),
        };
        match &self.output_indices {
            Some(indices) => y.select_columns(indices),
            None => y,
        }
    }

    fn finalize_variance(&self, var: &DMatrix<f64>) -> DMatrix<f64> {
        let var = match &self.affine {
            Some((_, scale)) => {
                let sq = scale.map(|s| s * s);
                scale_columns(var, &DVector::zeros(sq.len()), &sq)
            }
            None => var.clone(),
        };
        match &self.output_indices {
            Some(indices) => var.select_columns(indices),
            None => var,
        }
    }

    /// Number of tasks of the model, before output selection
    pub fn num_tasks(&self) -> usize {
        self.full_mean.ncols()
    }

    pub fn num_points(&self) -> usize {
        self.full_mean.nrows()
    }

    pub fn joint_root(&self) -> &KroneckerProduct {
        &self.parts.joint_root
    }

    pub fn test_train_covar(&self) -> &KroneckerProduct {
        &self.parts.test_train_covar
    }

    pub fn train_diff(&self) -> &DMatrix<f64> {
        &self.parts.train_diff
    }

    pub fn test_mean(&self) -> &DMatrix<f64> {
        &self.parts.test_mean
    }

    pub fn train_noise(&self) -> &NoiseCovariance {
        &self.parts.train_noise
    }

    pub fn test_noise(&self) -> Option<&NoiseCovariance> {
        self.parts.test_noise.as_ref()
    }

    /// One joint draw over all tasks, before the affine map and output
    /// selection
    fn draw_full(&self, rng: &mut dyn RngCore) -> Result<DMatrix<f64>> {
        let parts = &self.parts;
        let (n, t) = parts.train_diff.shape();
        let q = self.num_points();

        let z = standard_normal(parts.joint_root.ncols(), 1, rng).column(0).into_owned();
        let joint = parts.joint_root.matvec(&z)?;
        let train_part = unflatten(&joint.rows(0, n * t).into_owned(), n, t)?;
        let test_part = unflatten(&joint.rows(n * t, q * t).into_owned(), q, t)?;

        let noise = parts.train_noise.root_mul(&standard_normal(n, t, rng))?;
        let obs_minus = &parts.train_diff - (train_part + noise);
        let solved = parts.solver.solve(&obs_minus)?;
        let update = parts.test_train_covar.matvec(&flatten(&solved))?;

        let mut sample = &parts.test_mean + test_part + unflatten(&update, q, t)?;
        if let Some(test_noise) = &parts.test_noise {
            sample += test_noise.root_mul(&standard_normal(q, t, rng))?;
        }
        Ok(sample)
    }

    /// Joint covariance over all `q x t` outputs
    fn full_covariance(&self) -> Result<DMatrix<f64>> {
        let parts = &self.parts;
        let (n, t) = parts.train_diff.shape();
        let cross = parts.test_train_covar.to_dense();
        let mut solved = DMatrix::zeros(n * t, cross.nrows());
        for (k, row) in cross.row_iter().enumerate() {
            let rhs = unflatten(&row.transpose(), n, t)?;
            solved.set_column(k, &flatten(&parts.solver.solve(&rhs)?));
        }
        let mut cov = parts.test_test_covar.to_dense() - &cross * solved;
        if let Some(test_noise) = &parts.test_noise {
            cov += test_noise.to_dense();
        }
        Ok((&cov + cov.transpose()) * 0.5)
    }
}

impl Posterior for MultitaskGpPosterior {
    fn mean(&self) -> &DMatrix<f64> {
        &self.mean
    }

    fn variance(&self) -> &DMatrix<f64> {
        &self.variance
    }

    fn covariance(&self) -> Result<DMatrix<f64>> {
        let (q, t) = (self.num_points(), self.num_tasks());
        let mut cov = self.full_covariance()?;
        if let Some((_, scale)) = &self.affine {
            let flat_scale = DVector::from_fn(q * t, |k, _| scale[k % t]);
            cov = DMatrix::from_fn(q * t, q * t, |a, b| {
                cov[(a, b)] * flat_scale[a] * flat_scale[b]
            });
        }
        Ok(match &self.output_indices {
            Some(indices) => {
                let flat = flat_indices(q, t, indices);
                cov.select_rows(&flat).select_columns(&flat)
            }
            None => cov,
        })
    }

    /// Matheron's rule: draw jointly from the prior over train and test
    /// outputs, then correct the test part by the solved residual
    /// `(K + N)⁻¹ (Y - m(X) - f_train - ε)`.
    fn sample(
        &self,
        n: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<DMatrix<f64>>> {
        (0..n)
            .map(|_| Ok(self.finalize(&self.draw_full(rng)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256Plus;

    fn two_output() -> GpPosterior {
        // q = 2 points, m = 2 outputs
        let mean: DMatrix<f64> = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let cov: DMatrix<f64> = DMatrix::from_row_slice(4, 4, &[
            1.0, 0.2, 0.1, 0.0, //
            0.2, 2.0, 0.0, 0.3, //
            0.1, 0.0, 1.5, 0.4, //
            0.0, 0.3, 0.4, 0.5,
        ]);
        GpPosterior::new(mean, cov).unwrap()
    }

    #[test]
    fn variance_is_unflattened_diagonal() {
        let p = two_output();
        assert_eq!(p.variance(), &DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 1.5, 0.5]));
        assert_eq!(p.num_outputs(), 2);
    }

    #[test]
    fn select_outputs_picks_flat_entries() {
        let p = two_output().select_outputs(&[1]).unwrap();
        assert_eq!(p.mean(), &DMatrix::from_row_slice(2, 1, &[2.0, 4.0]));
        let cov = p.covariance().unwrap();
        assert_eq!(cov, DMatrix::from_row_slice(2, 2, &[2.0, 0.3, 0.3, 0.5]));
        assert_eq!(
            two_output().select_outputs(&[2]),
            Err(Error::InvalidOutputIndex {
                index: 2,
                num_outputs: 2
            })
        );
    }

    #[test]
    fn scalarized_transform() {
        let tf = ScalarizedPosteriorTransform::new(DVector::from_row_slice(&[1.0, -1.0]), 0.5);
        let p = tf.transform(&two_output()).unwrap();
        assert_eq!(p.mean(), &DMatrix::from_row_slice(2, 1, &[-0.5, -0.5]));
        // var(y0 - y1) = 1 + 2 - 2 * 0.2
        assert::close(p.variance()[(0, 0)], 2.6, 1E-12);
        // cov(y0 - y1, y2 - y3) = 0.1 - 0.0 - 0.0 + 0.3
        assert::close(p.covariance().unwrap()[(0, 1)], 0.4, 1E-12);

        let bad = ScalarizedPosteriorTransform::new(DVector::from_row_slice(&[1.0]), 0.0);
        assert!(bad.transform(&two_output()).is_err());
    }

    #[test]
    fn untransformed_scales_moments() {
        let p = two_output()
            .untransformed(
                &DVector::from_row_slice(&[10.0, 0.0]),
                &DVector::from_row_slice(&[2.0, 1.0]),
            )
            .unwrap();
        assert_eq!(p.mean(), &DMatrix::from_row_slice(2, 2, &[12.0, 2.0, 16.0, 4.0]));
        assert::close(p.variance()[(0, 0)], 4.0, 1E-12);
        assert::close(p.covariance().unwrap()[(0, 1)], 0.4, 1E-12);
    }

    #[test]
    fn samples_match_moments() {
        let mut rng = Xoshiro256Plus::seed_from_u64(5);
        let p = two_output();
        let samples = p.sample(20_000, &mut rng).unwrap();
        assert_eq!(samples[0].shape(), (2, 2));
        let mean = samples.iter().fold(DMatrix::zeros(2, 2), |acc, s| acc + s)
            / samples.len() as f64;
        assert!(mean.relative_eq(p.mean(), 0.05, 0.05));
    }
}
