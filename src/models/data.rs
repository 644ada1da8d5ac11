use crate::result::{Error, Result};
use nalgebra::DMatrix;

/// Training data for a model: features `x` (`n x d`), targets `y`
/// (`n x m`) and optional observation noise variances `yvar` (`n x m`)
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingData {
    x: DMatrix<f64>,
    y: DMatrix<f64>,
    yvar: Option<DMatrix<f64>>,
}

impl TrainingData {
    pub fn new(x: DMatrix<f64>, y: DMatrix<f64>) -> Result<Self> {
        if x.nrows() != y.nrows() {
            return Err(Error::shape("training targets rows", x.nrows(), y.nrows()));
        }
        Ok(Self { x, y, yvar: None })
    }

    pub fn with_yvar(self, yvar: DMatrix<f64>) -> Result<Self> {
        if yvar.shape() != self.y.shape() {
            return Err(Error::shape(
                "training noise",
                format!("{}x{}", self.y.nrows(), self.y.ncols()),
                format!("{}x{}", yvar.nrows(), yvar.ncols()),
            ));
        }
        Ok(Self {
            yvar: Some(yvar),
            ..self
        })
    }

    pub fn x(&self) -> &DMatrix<f64> {
        &self.x
    }

    pub fn y(&self) -> &DMatrix<f64> {
        &self.y
    }

    pub fn yvar(&self) -> Option<&DMatrix<f64>> {
        self.yvar.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shapes_are_checked() {
        assert!(TrainingData::new(DMatrix::zeros(3, 2), DMatrix::zeros(2, 1)).is_err());
        let data = TrainingData::new(DMatrix::zeros(3, 2), DMatrix::zeros(3, 1)).unwrap();
        assert!(data.clone().with_yvar(DMatrix::zeros(3, 2)).is_err());
        let data = data.with_yvar(DMatrix::zeros(3, 1)).unwrap();
        assert!(data.yvar().is_some());
    }
}
