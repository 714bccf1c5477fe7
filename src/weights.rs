//! Log-domain importance weights and the reductions over them.

use crate::error::{ensure_dims, ensure_finite, Result};
use burn::prelude::*;

/// Running log importance weight of every chain, `[batch, samples]`.
///
/// Starts at zero. Each annealing level adds its contribution; nothing is ever
/// exponentiated, so weights spanning hundreds of nats stay representable.
#[derive(Debug, Clone)]
pub struct LogWeightAccumulator<B: Backend> {
    log_weight: Tensor<B, 2>,
}

impl<B: Backend> LogWeightAccumulator<B> {
    pub fn new(batch: usize, samples: usize, device: &B::Device) -> Self {
        Self {
            log_weight: Tensor::zeros([batch, samples], device),
        }
    }

    /// Adds `increment` to every chain's log weight.
    ///
    /// Fails on a shape mismatch, or if the increment or the updated weight is not
    /// finite; `step` is the annealing level reported in that case.
    pub fn accumulate(&mut self, increment: Tensor<B, 2>, step: usize) -> Result<()> {
        ensure_dims("log weight increment", self.log_weight.dims(), increment.dims())?;
        ensure_finite(&increment, "log weight increment", step)?;
        let updated = self.log_weight.clone() + increment;
        ensure_finite(&updated, "log weight", step)?;
        self.log_weight = updated;
        Ok(())
    }

    pub fn log_weight(&self) -> &Tensor<B, 2> {
        &self.log_weight
    }

    pub fn into_inner(self) -> Tensor<B, 2> {
        self.log_weight
    }
}

/// `log Σ_m exp(x[b, m])` per row, shifted by the row maximum.
pub fn log_sum_exp<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 1> {
    let dims = x.dims();
    let max = x.clone().max_dim(1).detach();
    let shifted = x - max.clone().expand(dims);
    (shifted.exp().sum_dim(1).log() + max).squeeze::<1>(1)
}

/// `log (1/M) Σ_m exp(x[b, m])` per row.
pub fn log_mean_exp<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 1> {
    let samples = x.dims()[1] as f64;
    log_sum_exp(x).sub_scalar(samples.ln())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AisError;
    use approx::assert_abs_diff_eq;
    use burn::backend::{Autodiff, NdArray};

    type BackendType = Autodiff<NdArray>;

    fn values(t: Tensor<BackendType, 1>) -> Vec<f64> {
        t.into_data().iter::<f64>().collect()
    }

    #[test]
    fn accumulating_in_pieces_equals_accumulating_the_sum() {
        let device = Default::default();
        let a = Tensor::<BackendType, 2>::from_floats([[0.5, -3.0], [12.0, 0.0]], &device);
        let b = Tensor::<BackendType, 2>::from_floats([[-1.5, 2.0], [-40.0, 7.25]], &device);

        let mut pieces = LogWeightAccumulator::new(2, 2, &device);
        pieces.accumulate(a.clone(), 1).unwrap();
        pieces.accumulate(b.clone(), 2).unwrap();

        let mut once = LogWeightAccumulator::new(2, 2, &device);
        once.accumulate(a + b, 1).unwrap();

        let diff = (pieces.into_inner() - once.into_inner()).abs().max();
        assert_abs_diff_eq!(values(diff)[0], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn non_finite_increment_is_rejected_and_weight_kept() {
        let device = Default::default();
        let mut acc = LogWeightAccumulator::<BackendType>::new(1, 2, &device);
        let bad = Tensor::from_floats([[0.0, f32::INFINITY]], &device);
        match acc.accumulate(bad, 4) {
            Err(AisError::NonFinite { step, .. }) => assert_eq!(step, 4),
            other => panic!("expected NonFinite, got {other:?}"),
        }
        let w: Vec<f64> = acc.log_weight().clone().into_data().iter::<f64>().collect();
        assert_eq!(w, vec![0.0, 0.0]);
    }

    #[test]
    fn wrong_shape_is_rejected() {
        let device = Default::default();
        let mut acc = LogWeightAccumulator::<BackendType>::new(2, 3, &device);
        let inc = Tensor::zeros([2, 4], &device);
        assert!(matches!(acc.accumulate(inc, 1), Err(AisError::Shape { .. })));
    }

    #[test]
    fn log_sum_exp_survives_large_magnitudes() {
        let device = Default::default();
        let x = Tensor::<BackendType, 2>::from_floats([[1000.0, 1000.0], [-1000.0, -1000.0]], &device);
        let got = values(log_sum_exp(x));
        assert_abs_diff_eq!(got[0], 1000.0 + 2f64.ln(), epsilon = 1e-3);
        assert_abs_diff_eq!(got[1], -1000.0 + 2f64.ln(), epsilon = 1e-3);
    }

    #[test]
    fn log_mean_exp_of_equal_values_is_that_value() {
        let device = Default::default();
        let x = Tensor::<BackendType, 2>::full([3, 5], -2.5, &device);
        for v in values(log_mean_exp(x)) {
            assert_abs_diff_eq!(v, -2.5, epsilon = 1e-5);
        }
    }

    #[test]
    fn log_mean_exp_gradient_is_the_normalized_weight() {
        let device = Default::default();
        let x = Tensor::<BackendType, 2>::from_floats([[0.0, 2f32.ln()]], &device).require_grad();
        let grads = log_mean_exp(x.clone()).sum().backward();
        let g: Vec<f64> = x.grad(&grads).unwrap().into_data().iter::<f64>().collect();
        assert_abs_diff_eq!(g[0], 1.0 / 3.0, epsilon = 1e-5);
        assert_abs_diff_eq!(g[1], 2.0 / 3.0, epsilon = 1e-5);
    }
}
