//! Input and outcome transforms
use crate::result::{Error, Result};
use nalgebra::{DMatrix, DVector, RowDVector};

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

/// Ranges and standard deviations below this are replaced by one
const MIN_SCALE: f64 = 1E-8;

/// Transform applied to model inputs before the kernel sees them
pub trait InputTransform: std::fmt::Debug {
    /// Learn any state from the training inputs
    fn fit(&mut self, x: &DMatrix<f64>) -> Result<()>;

    fn transform(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>>;

    fn untransform(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>>;
}

/// Transform applied to training targets, undone on posteriors
pub trait OutcomeTransform: std::fmt::Debug {
    /// Learn the transform from `y` (`n x m`) and apply it to `y` and the
    /// observation noise `yvar`
    fn fit_transform(
        &mut self,
        y: &DMatrix<f64>,
        yvar: Option<&DMatrix<f64>>,
    ) -> Result<(DMatrix<f64>, Option<DMatrix<f64>>)>;

    fn untransform(
        &self,
        y: &DMatrix<f64>,
        yvar: Option<&DMatrix<f64>>,
    ) -> Result<(DMatrix<f64>, Option<DMatrix<f64>>)>;

    /// Per output `(offset, scale)` such that `y = offset + scale * z`
    fn affine(&self) -> Result<(DVector<f64>, DVector<f64>)>;
}

fn check_cols(what: &'static str, x: &DMatrix<f64>, d: usize) -> Result<()> {
    if x.ncols() == d {
        Ok(())
    } else {
        Err(Error::shape(what, format!("{d} columns"), format!("{} columns", x.ncols())))
    }
}

/// Rescale inputs from `[lower, upper]` to the unit cube
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct Normalize {
    dim: usize,
    learn_bounds: bool,
    lower: Option<RowDVector<f64>>,
    range: Option<RowDVector<f64>>,
}

impl Normalize {
    /// Bounds are learned from the training inputs on [`InputTransform::fit`]
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            learn_bounds: true,
            lower: None,
            range: None,
        }
    }

    /// Fixed bounds, `bounds` is `2 x d` with the lower bounds first
    pub fn with_bounds(bounds: &DMatrix<f64>) -> Result<Self> {
        if bounds.nrows() != 2 {
            return Err(Error::shape("normalize bounds", "2 rows", bounds.nrows()));
        }
        let lower = bounds.row(0).into_owned();
        let range = (bounds.row(1) - &lower).map(|r| if r < MIN_SCALE { 1.0 } else { r });
        Ok(Self {
            dim: bounds.ncols(),
            learn_bounds: false,
            lower: Some(lower),
            range: Some(range),
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    fn coefficients(&self) -> Result<(&RowDVector<f64>, &RowDVector<f64>)> {
        match (&self.lower, &self.range) {
            (Some(lower), Some(range)) => Ok((lower, range)),
            _ => Err(Error::Unsupported(
                "Normalize must be fit before it is applied".to_string(),
            )),
        }
    }
}

impl InputTransform for Normalize {
    fn fit(&mut self, x: &DMatrix<f64>) -> Result<()> {
        check_cols("normalize inputs", x, self.dim)?;
        if !self.learn_bounds {
            return Ok(());
        }
        if x.nrows() == 0 {
            return Err(Error::shape("normalize inputs", "at least one row", 0));
        }
        let lower = RowDVector::from_fn(self.dim, |_, j| x.column(j).min());
        let upper = RowDVector::from_fn(self.dim, |_, j| x.column(j).max());
        let range = (upper - &lower).map(|r| if r < MIN_SCALE { 1.0 } else { r });
        self.lower = Some(lower);
        self.range = Some(range);
        Ok(())
    }

    fn transform(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        check_cols("normalize inputs", x, self.dim)?;
        let (lower, range) = self.coefficients()?;
        Ok(DMatrix::from_fn(x.nrows(), x.ncols(), |i, j| {
            (x[(i, j)] - lower[j]) / range[j]
        }))
    }

    fn untransform(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        check_cols("normalize inputs", x, self.dim)?;
        let (lower, range) = self.coefficients()?;
        Ok(DMatrix::from_fn(x.nrows(), x.ncols(), |i, j| {
            lower[j] + x[(i, j)] * range[j]
        }))
    }
}

/// Standardize each outcome to zero mean and unit variance
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct Standardize {
    m: usize,
    means: Option<DVector<f64>>,
    stdvs: Option<DVector<f64>>,
}

impl Standardize {
    pub fn new(m: usize) -> Self {
        Self {
            m,
            means: None,
            stdvs: None,
        }
    }

    pub fn means(&self) -> Option<&DVector<f64>> {
        self.means.as_ref()
    }

    pub fn stdvs(&self) -> Option<&DVector<f64>> {
        self.stdvs.as_ref()
    }
}

impl OutcomeTransform for Standardize {
    fn fit_transform(
        &mut self,
        y: &DMatrix<f64>,
        yvar: Option<&DMatrix<f64>>,
    ) -> Result<(DMatrix<f64>, Option<DMatrix<f64>>)> {
        check_cols("standardize outcomes", y, self.m)?;
        let n = y.nrows();
        if n == 0 {
            return Err(Error::shape("standardize outcomes", "at least one row", 0));
        }
        let means = DVector::from_fn(self.m, |j, _| y.column(j).mean());
        let stdvs = DVector::from_fn(self.m, |j, _| {
            if n == 1 {
                return 1.0;
            }
            let ss: f64 = y.column(j).iter().map(|v| (v - means[j]).powi(2)).sum();
            let sd = (ss / (n - 1) as f64).sqrt();
            if sd < MIN_SCALE {
                1.0
            } else {
                sd
            }
        });
        self.means = Some(means);
        self.stdvs = Some(stdvs);

        let (offset, scale) = self.affine()?;
        let z = DMatrix::from_fn(n, self.m, |i, j| (y[(i, j)] - offset[j]) / scale[j]);
        let zvar = yvar.map(|v| DMatrix::from_fn(v.nrows(), v.ncols(), |i, j| v[(i, j)] / scale[j].powi(2)));
        Ok((z, zvar))
    }

    fn untransform(
        &self,
        y: &DMatrix<f64>,
        yvar: Option<&DMatrix<f64>>,
    ) -> Result<(DMatrix<f64>, Option<DMatrix<f64>>)> {
        check_cols("standardize outcomes", y, self.m)?;
        let (offset, scale) = self.affine()?;
        let out = DMatrix::from_fn(y.nrows(), self.m, |i, j| offset[j] + scale[j] * y[(i, j)]);
        let outvar = yvar.map(|v| DMatrix::from_fn(v.nrows(), v.ncols(), |i, j| v[(i, j)] * scale[j].powi(2)));
        Ok((out, outvar))
    }

    fn affine(&self) -> Result<(DVector<f64>, DVector<f64>)> {
        match (&self.means, &self.stdvs) {
            (Some(m), Some(s)) => Ok((m.clone(), s.clone())),
            _ => Err(Error::Unsupported(
                "Standardize must be fit before it is applied".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_learns_unit_cube() {
        let x: DMatrix<f64> = DMatrix::from_row_slice(3, 2, &[0.0, 10.0, 2.0, 20.0, 4.0, 15.0]);
        let mut tf = Normalize::new(2);
        assert!(tf.transform(&x).is_err());
        tf.fit(&x).unwrap();
        let z = tf.transform(&x).unwrap();
        assert_eq!(z, DMatrix::from_row_slice(3, 2, &[0.0, 0.0, 0.5, 1.0, 1.0, 0.5]));
        assert!(tf.untransform(&z).unwrap().relative_eq(&x, 1E-12, 1E-12));
    }

    #[test]
    fn normalize_with_fixed_bounds_ignores_fit() {
        let bounds: DMatrix<f64> = DMatrix::from_row_slice(2, 1, &[-1.0, 1.0]);
        let mut tf = Normalize::with_bounds(&bounds).unwrap();
        tf.fit(&DMatrix::from_row_slice(2, 1, &[0.0, 0.5])).unwrap();
        let z = tf.transform(&DMatrix::from_row_slice(1, 1, &[0.0])).unwrap();
        assert::close(z[(0, 0)], 0.5, 1E-14);
        assert!(tf.transform(&DMatrix::zeros(1, 2)).is_err());
    }

    #[test]
    fn normalize_constant_column() {
        let x: DMatrix<f64> = DMatrix::from_row_slice(2, 1, &[3.0, 3.0]);
        let mut tf = Normalize::new(1);
        tf.fit(&x).unwrap();
        assert_eq!(tf.transform(&x).unwrap(), DMatrix::zeros(2, 1));
    }

    #[test]
    fn standardize_round_trip() {
        let y: DMatrix<f64> = DMatrix::from_row_slice(3, 2, &[1.0, 10.0, 2.0, 10.0, 3.0, 10.0]);
        let yvar = DMatrix::from_element(3, 2, 0.5);
        let mut tf = Standardize::new(2);
        let (z, zvar) = tf.fit_transform(&y, Some(&yvar)).unwrap();
        assert_eq!(tf.means().unwrap().as_slice(), &[2.0, 10.0]);
        // sample std of (1, 2, 3) is 1, constant column gets 1
        assert_eq!(tf.stdvs().unwrap().as_slice(), &[1.0, 1.0]);
        assert::close(z[(0, 0)], -1.0, 1E-14);
        assert::close(z[(2, 1)], 0.0, 1E-14);
        assert!(zvar.unwrap().relative_eq(&yvar, 1E-14, 1E-14));

        let (back, _) = tf.untransform(&z, None).unwrap();
        assert!(back.relative_eq(&y, 1E-12, 1E-12));
    }

    #[test]
    fn standardize_scales_noise() {
        let y: DMatrix<f64> = DMatrix::from_row_slice(3, 1, &[0.0, 2.0, 4.0]);
        let mut tf = Standardize::new(1);
        let (_, zvar) = tf
            .fit_transform(&y, Some(&DMatrix::from_element(3, 1, 4.0)))
            .unwrap();
        assert::close(zvar.unwrap()[(0, 0)], 1.0, 1E-12);
        assert!(Standardize::new(2).fit_transform(&y, None).is_err());
    }
}
