//! Reduces per-chain log weights to a lower bound on `log p(x)` and a loss to minimize.

use crate::config::Aggregation;
use crate::error::{ensure_finite, Result};
use crate::weights::log_mean_exp;
use burn::prelude::*;
use burn::tensor::activation::softmax;
use burn::tensor::ElementConversion;

#[derive(Debug, Clone)]
pub struct BoundEstimate<B: Backend> {
    /// Negative batch-mean bound, one element, carrying the autodiff graph.
    pub loss: Tensor<B, 1>,
    /// Batch-mean bound in nats.
    pub bound: f64,
    /// Bound per data point, `[batch]`.
    pub per_example: Tensor<B, 1>,
}

/// Lower bound from log weights `[batch, samples]`.
///
/// For [`Aggregation::Iwae`] the gradient is taken through the self-normalized surrogate
/// `Σ_m w̃_m log w_m` with `w̃ = softmax(log w)` held constant; its value is shifted to the
/// bound itself so that `loss` reads as `-bound`.
pub fn estimate<B: Backend>(
    log_weights: Tensor<B, 2>,
    aggregation: Aggregation,
) -> Result<BoundEstimate<B>> {
    let per_example = match aggregation {
        Aggregation::Elbo => log_weights.mean_dim(1).squeeze::<1>(1),
        Aggregation::Iwae => {
            let bound = log_mean_exp(log_weights.clone().detach());
            let normalized = softmax(log_weights.clone().detach(), 1);
            let surrogate = (normalized * log_weights).sum_dim(1).squeeze::<1>(1);
            surrogate.clone() - surrogate.detach() + bound
        }
    };
    let loss = per_example.clone().mean().neg();
    ensure_finite(&loss, "loss", 0)?;
    let bound = loss.clone().neg().into_scalar().elem::<f64>();
    Ok(BoundEstimate {
        loss,
        bound,
        per_example,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use burn::backend::{Autodiff, NdArray};

    type BackendType = Autodiff<NdArray>;

    #[test]
    fn elbo_is_the_mean_log_weight() {
        let device = Default::default();
        let lw = Tensor::<BackendType, 2>::from_floats([[-1.0, -3.0], [-2.0, -2.0]], &device);
        let est = estimate(lw, Aggregation::Elbo).unwrap();
        assert_abs_diff_eq!(est.bound, -2.0, epsilon = 1e-6);
    }

    #[test]
    fn iwae_bound_dominates_elbo() {
        let device = Default::default();
        let lw = Tensor::<BackendType, 2>::from_floats([[-1.0, -3.0, -10.0]], &device);
        let elbo = estimate(lw.clone(), Aggregation::Elbo).unwrap().bound;
        let iwae = estimate(lw, Aggregation::Iwae).unwrap().bound;
        let expected = ((-1f64).exp() + (-3f64).exp() + (-10f64).exp()).ln() - 3f64.ln();
        assert_abs_diff_eq!(iwae, expected, epsilon = 1e-5);
        assert!(iwae > elbo);
    }

    #[test]
    fn single_sample_aggregations_agree() {
        let device = Default::default();
        let lw = Tensor::<BackendType, 2>::from_floats([[-4.2], [-0.3]], &device);
        let elbo = estimate(lw.clone(), Aggregation::Elbo).unwrap().bound;
        let iwae = estimate(lw, Aggregation::Iwae).unwrap().bound;
        assert_abs_diff_eq!(elbo, iwae, epsilon = 1e-6);
    }

    #[test]
    fn surrogate_gradient_uses_normalized_weights() {
        let device = Default::default();
        let lw = Tensor::<BackendType, 2>::from_floats([[0.0, 3f32.ln()]], &device).require_grad();
        let est = estimate(lw.clone(), Aggregation::Iwae).unwrap();
        let grads = est.loss.backward();
        let g: Vec<f64> = lw.grad(&grads).unwrap().into_data().iter::<f64>().collect();
        assert_abs_diff_eq!(g[0], -0.25, epsilon = 1e-5);
        assert_abs_diff_eq!(g[1], -0.75, epsilon = 1e-5);
    }

    #[test]
    fn per_example_bounds_have_batch_shape() {
        let device = Default::default();
        let lw = Tensor::<BackendType, 2>::zeros([5, 3], &device);
        let est = estimate(lw, Aggregation::Iwae).unwrap();
        assert_eq!(est.per_example.dims(), [5]);
        assert_abs_diff_eq!(est.bound, 0.0, epsilon = 1e-6);
    }
}
