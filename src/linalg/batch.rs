use super::LinalgError;
use nalgebra::DMatrix;

/// A single matrix broadcast over a batch without copying it.
///
/// Every batch member is the base matrix itself, so values are identical to
/// the unbatched ones by construction.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchRepeat<'a> {
    base: &'a DMatrix<f64>,
    len: usize,
}

impl<'a> BatchRepeat<'a> {
    pub fn new(base: &'a DMatrix<f64>, len: usize) -> Self {
        Self { base, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn base(&self) -> &'a DMatrix<f64> {
        self.base
    }

    pub fn get(&self, index: usize) -> Result<&'a DMatrix<f64>, LinalgError> {
        if index < self.len {
            Ok(self.base)
        } else {
            Err(LinalgError::BatchIndex {
                index,
                len: self.len,
            })
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a DMatrix<f64>> + '_ {
        std::iter::repeat(self.base).take(self.len)
    }

    /// Materialize the batch
    pub fn to_vec(&self) -> Vec<DMatrix<f64>> {
        self.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_member_is_the_base() {
        let m: DMatrix<f64> = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.5, 2.0]);
        let batch = BatchRepeat::new(&m, 3);
        assert_eq!(batch.len(), 3);
        assert!(batch.iter().all(|b| *b == m));
        assert_eq!(batch.to_vec(), vec![m.clone(), m.clone(), m.clone()]);
        assert_eq!(batch.get(2).unwrap(), &m);
    }

    #[test]
    fn out_of_range_index() {
        let m = DMatrix::identity(2, 2);
        let batch = BatchRepeat::new(&m, 1);
        assert_eq!(
            batch.get(1),
            Err(LinalgError::BatchIndex { index: 1, len: 1 })
        );
    }
}
