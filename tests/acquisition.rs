use bopt::acquisition::{
    AcquisitionFunction, OneShotAcquisitionFunction, PosteriorMean, UpperConfidenceBound,
};
use bopt::models::{MultiTaskGp, MultiTaskOptions, NoiseSpec};
use bopt::traits::Model;
use bopt::{Error, Result};
use nalgebra::{DMatrix, DVector};

fn model() -> MultiTaskGp {
    let x = DMatrix::from_fn(6, 2, |i, j| if j == 1 { (i % 2) as f64 } else { i as f64 / 5.0 });
    let y = DMatrix::from_fn(6, 1, |i, _| (4.0 * x[(i, 0)]).sin() - x[(i, 1)]);
    MultiTaskGp::new(
        x,
        y,
        -1,
        NoiseSpec::default(),
        MultiTaskOptions::default().with_output_tasks(vec![0]),
    )
    .unwrap()
}

/// Averages the posterior mean over the candidates and a set of extra
/// points that only exist in the augmented parameterization
struct AveragedMean {
    inner: PosteriorMean<MultiTaskGp>,
    num_extra: usize,
}

impl AcquisitionFunction for AveragedMean {
    fn evaluate(&mut self, x: &[DMatrix<f64>]) -> Result<DVector<f64>> {
        let values = x
            .iter()
            .map(|xi| {
                let rows: Vec<DMatrix<f64>> =
                    (0..xi.nrows()).map(|i| xi.rows(i, 1).into_owned()).collect();
                Ok(self.inner.evaluate(&rows)?.mean())
            })
            .collect::<Result<Vec<f64>>>()?;
        Ok(DVector::from_vec(values))
    }

    fn x_pending(&self) -> Option<&DMatrix<f64>> {
        self.inner.x_pending()
    }

    fn set_x_pending(&mut self, x_pending: Option<&DMatrix<f64>>) {
        self.inner.set_x_pending(x_pending)
    }
}

impl OneShotAcquisitionFunction for AveragedMean {
    fn augmented_q_batch_size(&self, q: usize) -> usize {
        q + self.num_extra
    }

    fn extract_candidates(&self, x_full: &[DMatrix<f64>]) -> Result<Vec<DMatrix<f64>>> {
        x_full
            .iter()
            .map(|x| {
                if x.nrows() <= self.num_extra {
                    return Err(Error::Unsupported(format!(
                        "{} rows leave no candidates besides {} extra points",
                        x.nrows(),
                        self.num_extra
                    )));
                }
                Ok(x.rows(0, x.nrows() - self.num_extra).into_owned())
            })
            .collect()
    }
}

#[test]
fn one_shot_contract() {
    let mut acqf = AveragedMean {
        inner: PosteriorMean::new(model()),
        num_extra: 2,
    };
    assert_eq!(acqf.augmented_q_batch_size(3), 5);

    let x_full = DMatrix::from_fn(5, 1, |i, _| i as f64 / 4.0);
    let candidates = acqf.extract_candidates(&[x_full.clone()]).unwrap();
    assert_eq!(candidates[0], x_full.rows(0, 3).into_owned());
    assert!(acqf.extract_candidates(&[DMatrix::zeros(2, 1)]).is_err());

    let values = acqf.evaluate(&[x_full, DMatrix::from_element(1, 1, 0.5)]).unwrap();
    assert_eq!(values.len(), 2);
    assert!(values.iter().all(|v| v.is_finite()));
}

#[test]
fn analytic_functions_score_single_output_models() {
    let xs: Vec<DMatrix<f64>> = (0..4)
        .map(|i| DMatrix::from_element(1, 1, i as f64 / 3.0))
        .collect();
    let mut mean = PosteriorMean::new(model());
    let mut ucb = UpperConfidenceBound::new(model(), 2.0).unwrap();
    let m = mean.evaluate(&xs).unwrap();
    let u = ucb.evaluate(&xs).unwrap();
    assert!(u.iter().zip(m.iter()).all(|(u, m)| u > m));
    assert_eq!(mean.model().num_outputs(), 1);

    let mut lcb = UpperConfidenceBound::new(model(), 2.0).unwrap().with_maximize(false);
    let l = lcb.evaluate(&xs).unwrap();
    // -mean + s and mean + s differ by twice the mean
    for i in 0..4 {
        assert::close(u[i] - l[i], 2.0 * m[i], 1E-8);
    }
}
