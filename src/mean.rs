//! Prior mean functions
use crate::kernel::KernelError;
use nalgebra::{DMatrix, DVector};

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

/// Constant prior mean for a single output
#[derive(Clone, Debug, PartialEq, Default)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct ConstantMean {
    constant: f64,
}

impl ConstantMean {
    pub fn new(constant: f64) -> Self {
        Self { constant }
    }

    pub fn constant(&self) -> f64 {
        self.constant
    }

    /// Mean at each row of `x`
    pub fn forward(&self, x: &DMatrix<f64>) -> DVector<f64> {
        DVector::from_element(x.nrows(), self.constant)
    }

    pub fn parameters(&self) -> DVector<f64> {
        DVector::from_element(1, self.constant)
    }

    pub fn consume_parameters<'p>(
        &self,
        params: &'p [f64],
    ) -> Result<(Self, &'p [f64]), KernelError> {
        params
            .split_first()
            .map(|(c, rest)| (Self::new(*c), rest))
            .ok_or(KernelError::MissingParameters(1))
    }
}

/// One constant mean per task
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct MultitaskConstantMean {
    constants: DVector<f64>,
}

impl MultitaskConstantMean {
    /// Zero mean for `num_tasks` tasks
    pub fn new(num_tasks: usize) -> Self {
        Self {
            constants: DVector::zeros(num_tasks),
        }
    }

    pub fn with_constants(constants: DVector<f64>) -> Self {
        Self { constants }
    }

    pub fn constants(&self) -> &DVector<f64> {
        &self.constants
    }

    pub fn num_tasks(&self) -> usize {
        self.constants.len()
    }

    /// `n x t` mean at the rows of `x`
    pub fn forward(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        DMatrix::from_fn(x.nrows(), self.num_tasks(), |_, j| self.constants[j])
    }

    pub fn n_parameters(&self) -> usize {
        self.constants.len()
    }

    pub fn parameters(&self) -> DVector<f64> {
        self.constants.clone()
    }

    pub fn consume_parameters<'p>(
        &self,
        params: &'p [f64],
    ) -> Result<(Self, &'p [f64]), KernelError> {
        let t = self.num_tasks();
        if params.len() < t {
            return Err(KernelError::MissingParameters(t - params.len()));
        }
        let (cur, rest) = params.split_at(t);
        Ok((Self::with_constants(DVector::from_row_slice(cur)), rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multitask_forward_repeats_constants() {
        let mean = MultitaskConstantMean::with_constants(DVector::from_row_slice(&[1.0, -2.0]));
        let m = mean.forward(&DMatrix::zeros(3, 4));
        assert_eq!(m, DMatrix::from_row_slice(3, 2, &[1.0, -2.0, 1.0, -2.0, 1.0, -2.0]));
    }

    #[test]
    fn consume_parameters() {
        let mean = MultitaskConstantMean::new(2);
        let (m, rest) = mean.consume_parameters(&[0.5, 1.5, 3.0]).unwrap();
        assert_eq!(m.constants().as_slice(), &[0.5, 1.5]);
        assert_eq!(rest, &[3.0]);
        assert_eq!(
            mean.consume_parameters(&[0.5]),
            Err(KernelError::MissingParameters(1))
        );

        let (c, rest) = ConstantMean::default().consume_parameters(&[2.0]).unwrap();
        assert::close(c.constant(), 2.0, 0.0);
        assert!(rest.is_empty());
        assert_eq!(c.forward(&DMatrix::zeros(2, 1)), DVector::from_element(2, 2.0));
    }
}
