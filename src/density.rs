//! The geometric bridge `log p_t(z) = (1 - β_t) log q(z | x) + β_t log p(x, z)`.

use crate::distributions::{DiagonalGaussian, LogJoint};
use crate::error::{ensure_finite, AisError, Result};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

/// Broadcasts a one-element tensor to `dims`.
pub fn broadcast_scalar<B: Backend, const D: usize>(
    scalar: Tensor<B, 1>,
    dims: [usize; D],
) -> Tensor<B, D> {
    scalar.unsqueeze::<D>().expand(dims)
}

/// Intermediate densities between a proposal and an unnormalized target.
///
/// Holds two copies of each end point: the tracked one, through which gradients reach the
/// model parameters, and a frozen one used for scores, which the kernels treat as constants.
#[derive(Debug, Clone)]
pub struct AnnealedDensity<B: AutodiffBackend, J: LogJoint<B>> {
    proposal: DiagonalGaussian<B>,
    joint: J,
    frozen_proposal: DiagonalGaussian<B>,
    frozen_joint: J,
}

impl<B: AutodiffBackend, J: LogJoint<B>> AnnealedDensity<B, J> {
    pub fn new(proposal: DiagonalGaussian<B>, joint: J) -> Self {
        Self {
            frozen_proposal: proposal.detach(),
            frozen_joint: joint.frozen(),
            proposal,
            joint,
        }
    }

    pub fn proposal(&self) -> &DiagonalGaussian<B> {
        &self.proposal
    }

    /// `log q(z | x)`, `[batch, samples]`.
    pub fn log_proposal(&self, latents: Tensor<B, 3>) -> Result<Tensor<B, 2>> {
        self.proposal.log_prob(latents)
    }

    /// `log p(x, z)`, `[batch, samples]`.
    pub fn log_joint(&self, latents: Tensor<B, 3>) -> Result<Tensor<B, 2>> {
        self.joint.log_joint(latents)
    }

    /// `log p_t(z)` at inverse temperature `beta` (a one-element tensor, possibly learned).
    pub fn log_density(&self, latents: Tensor<B, 3>, beta: &Tensor<B, 1>) -> Result<Tensor<B, 2>> {
        let log_q = self.log_proposal(latents.clone())?;
        let log_p = self.log_joint(latents)?;
        let beta = broadcast_scalar(beta.clone(), log_q.dims());
        Ok(log_q.clone() + (log_p - log_q) * beta)
    }

    /// `∇_z log p_t(z)` and `log p_t(z)`, both cut from the autodiff graph.
    ///
    /// `step` only labels errors.
    pub fn score(
        &self,
        latents: &Tensor<B, 3>,
        beta: f64,
        step: usize,
    ) -> Result<(Tensor<B, 3>, Tensor<B, 2>)> {
        let z = latents.clone().detach().require_grad();
        let log_q = self.frozen_proposal.log_prob(z.clone())?;
        let log_p = self.frozen_joint.log_joint(z.clone())?;
        let log_density = log_q.mul_scalar(1.0 - beta) + log_p.mul_scalar(beta);
        ensure_finite(&log_density, "log density", step)?;

        let grads = log_density.clone().sum().backward();
        let score = z
            .grad(&grads)
            .map(Tensor::<B, 3>::from_inner)
            .ok_or(AisError::MissingGradient("latent score"))?;
        ensure_finite(&score, "score", step)?;
        Ok((score, log_density.detach()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::GaussianJoint;
    use approx::assert_abs_diff_eq;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::ElementConversion;

    type BackendType = Autodiff<NdArray>;

    fn density() -> AnnealedDensity<BackendType, GaussianJoint> {
        let proposal = DiagonalGaussian::standard(1, 2, &Default::default());
        let joint = GaussianJoint::new(vec![2.0, -2.0], vec![1.0, 0.5], 0.3).unwrap();
        AnnealedDensity::new(proposal, joint)
    }

    #[test]
    fn end_points_match_proposal_and_target() {
        let density = density();
        let device = Default::default();
        let z = Tensor::<BackendType, 3>::from_floats([[[0.4, -0.7]]], &device);
        let zero = Tensor::<BackendType, 1>::zeros([1], &device);
        let one = Tensor::<BackendType, 1>::ones([1], &device);

        let at_zero: f64 = density.log_density(z.clone(), &zero).unwrap().into_scalar().elem();
        let log_q: f64 = density.log_proposal(z.clone()).unwrap().into_scalar().elem();
        assert_abs_diff_eq!(at_zero, log_q, epsilon = 1e-6);

        let at_one: f64 = density.log_density(z.clone(), &one).unwrap().into_scalar().elem();
        let log_p: f64 = density.log_joint(z).unwrap().into_scalar().elem();
        assert_abs_diff_eq!(at_one, log_p, epsilon = 1e-6);
    }

    #[test]
    fn score_matches_the_analytic_gradient() {
        let density = density();
        let z = Tensor::<BackendType, 3>::from_floats([[[0.5, 1.0]]], &Default::default());
        let (score, _) = density.score(&z, 0.5, 1).unwrap();
        let got: Vec<f64> = score.into_data().iter::<f64>().collect();

        // 0.5 * (-z) + 0.5 * (-(z - mean) / std²)
        let expected = [
            0.5 * -0.5 + 0.5 * -(0.5 - 2.0),
            0.5 * -1.0 + 0.5 * -(1.0 + 2.0) / 0.25,
        ];
        assert_abs_diff_eq!(got[0], expected[0], epsilon = 1e-5);
        assert_abs_diff_eq!(got[1], expected[1], epsilon = 1e-5);
    }

    #[test]
    fn score_is_cut_from_the_graph() {
        let device = Default::default();
        let mean = Tensor::<BackendType, 2>::zeros([1, 2], &device).require_grad();
        let proposal = DiagonalGaussian::new(mean, Tensor::zeros([1, 2], &device)).unwrap();
        let density = AnnealedDensity::new(
            proposal,
            GaussianJoint::new(vec![0.0; 2], vec![1.0; 2], 0.0).unwrap(),
        );
        let z = Tensor::<BackendType, 3>::ones([1, 1, 2], &device).require_grad();
        let (score, log_density) = density.score(&z, 0.3, 0).unwrap();
        assert!(!score.is_require_grad());
        assert!(!log_density.is_require_grad());
    }

    #[test]
    fn broadcast_fills_every_entry() {
        let s = Tensor::<BackendType, 1>::from_floats([2.5], &Default::default());
        let b: Vec<f64> = broadcast_scalar(s, [2, 3]).into_data().iter::<f64>().collect();
        assert_eq!(b, vec![2.5; 6]);
    }
}
