#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

use nalgebra::DMatrix;
use std::ops::Index;

/// Derivative of a covariance matrix, one slice per hyper-parameter
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct CovGrad {
    slices: Vec<DMatrix<f64>>,
}

impl CovGrad {
    /// Create a new cov-grad with given slices, which must share a shape
    pub fn new(slices: Vec<DMatrix<f64>>) -> Result<Self, CovGradError> {
        let first = slices.first().ok_or(CovGradError::Empty)?.shape();
        if slices.iter().all(|s| s.shape() == first) {
            Ok(Self { slices })
        } else {
            Err(CovGradError::ShapeMismatch(
                slices.iter().map(DMatrix::shape).collect(),
            ))
        }
    }

    /// Number of slices, one per parameter
    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.slices[0].shape()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DMatrix<f64>> {
        self.slices.iter()
    }

    /// Component wise multiplication of every slice
    pub fn component_mul(
        &self,
        other: &DMatrix<f64>,
    ) -> Result<Self, CovGradError> {
        if other.shape() == self.shape() {
            let slices =
                self.slices.iter().map(|s| s.component_mul(other)).collect();
            Ok(Self { slices })
        } else {
            Err(CovGradError::ShapeMismatch(vec![self.shape(), other.shape()]))
        }
    }

    /// Slices of `self` followed by the slices of `other`
    pub fn concat(&self, other: &Self) -> Result<Self, CovGradError> {
        if other.shape() == self.shape() {
            let slices = [self.slices.clone(), other.slices.clone()].concat();
            Ok(Self { slices })
        } else {
            Err(CovGradError::ShapeMismatch(vec![self.shape(), other.shape()]))
        }
    }

    /// Check if this is relatively eq to another cov-grad
    pub fn relative_eq(&self, other: &CovGrad, rel: f64, abs: f64) -> bool {
        self.slices.len() == other.slices.len()
            && self
                .slices
                .iter()
                .zip(other.slices.iter())
                .all(|(a, b)| a.relative_eq(b, rel, abs))
    }
}

impl Index<usize> for CovGrad {
    type Output = DMatrix<f64>;

    fn index(&self, k: usize) -> &Self::Output {
        &self.slices[k]
    }
}

impl Index<(usize, usize, usize)> for CovGrad {
    type Output = f64;

    fn index(&self, (i, j, k): (usize, usize, usize)) -> &Self::Output {
        &self.slices[k][(i, j)]
    }
}

/// Error from `CovGrad`
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub enum CovGradError {
    /// A cov-grad needs at least one slice
    #[error("a covariance gradient needs at least one slice")]
    Empty,
    /// The slices or operands disagree in shape
    #[error("covariance gradient shapes disagree: {0:?}")]
    ShapeMismatch(Vec<(usize, usize)>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_checks_shapes() {
        assert_eq!(CovGrad::new(vec![]), Err(CovGradError::Empty));
        let res = CovGrad::new(vec![DMatrix::zeros(2, 2), DMatrix::zeros(3, 3)]);
        assert_eq!(res, Err(CovGradError::ShapeMismatch(vec![(2, 2), (3, 3)])));
    }

    #[test]
    fn component_mul_and_concat() {
        let a = CovGrad::new(vec![DMatrix::from_element(2, 2, 2.0)]).unwrap();
        let b = CovGrad::new(vec![DMatrix::identity(2, 2)]).unwrap();
        let scaled = a.component_mul(&DMatrix::from_element(2, 2, 3.0)).unwrap();
        assert::close(scaled[(0, 1, 0)], 6.0, 0.0);

        let both = scaled.concat(&b).unwrap();
        assert_eq!(both.len(), 2);
        assert_eq!(both[1], DMatrix::identity(2, 2));
        assert!(a.component_mul(&DMatrix::zeros(3, 3)).is_err());
    }
}
