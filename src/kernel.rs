//! Markov transitions between two annealing levels.
//!
//! Every transition moves all chains at once. Scores `∇_z log p_t` come from
//! [`AnnealedDensity::score`] and are constants for autodiff; the latent and the step size
//! stay on the graph, so reparameterization gradients reach the encoder, and learned step
//! sizes receive gradients through the positions they produce.
//!
//! - [`TransitionKernel::Leapfrog`] integrates Hamiltonian dynamics with unit mass and
//!   corrects with an accept/reject test. Its moves leave `p_t` invariant, so it adds
//!   nothing to the importance weight.
//! - [`TransitionKernel::Langevin`] takes one unadjusted step and never rejects. It does
//!   not leave `p_t` invariant; the returned weight increment accounts for that through the
//!   ratio of backward and forward kernels.

pub use crate::transform::AffineCoupling;

use crate::config::AcceptanceRule;
use crate::density::{broadcast_scalar, AnnealedDensity};
use crate::distributions::{standard_normal, uniform, LogJoint};
use crate::error::{ensure_finite, Result};
use burn::prelude::*;
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::AutodiffBackend;
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKernel {
    Leapfrog {
        n_leapfrogs: usize,
        rule: AcceptanceRule,
    },
    Langevin,
}

/// Per-level inputs of a transition.
#[derive(Debug, Clone)]
pub struct AnnealingLevel<B: Backend> {
    /// Index `t` of the level, `1..=K`.
    pub index: usize,
    /// `β_t` as a one-element tensor; learned paths carry gradients here.
    pub beta: Tensor<B, 1>,
    /// `β_t` as a plain number, for scores.
    pub beta_value: f64,
    /// One-element step size (leapfrog ε or Langevin γ).
    pub step_size: Tensor<B, 1>,
}

#[derive(Debug, Clone)]
pub struct Transition<B: Backend> {
    /// New latents, `[batch, samples, latent_dim]`.
    pub latent: Tensor<B, 3>,
    /// Kernel correction to the log weight, `[batch, samples]`.
    pub log_weight_increment: Tensor<B, 2>,
    /// Accept/reject decision per chain; `None` for kernels that never reject.
    pub accepted: Option<Tensor<B, 2, Bool>>,
    /// Probability with which each proposal was accepted, detached.
    pub acceptance_probability: Option<Tensor<B, 2>>,
}

/// `min(1, exp(r))` for Metropolis-Hastings, `σ(r)` for Barker.
pub fn acceptance_probability<B: Backend>(
    log_ratio: Tensor<B, 2>,
    rule: AcceptanceRule,
) -> Tensor<B, 2> {
    match rule {
        AcceptanceRule::MetropolisHastings => log_ratio.clamp_max(0.0).exp(),
        AcceptanceRule::Barker => sigmoid(log_ratio),
    }
}

fn kinetic_energy<B: Backend>(momentum: Tensor<B, 3>) -> Tensor<B, 2> {
    momentum
        .powi_scalar(2)
        .sum_dim(2)
        .squeeze::<2>(2)
        .mul_scalar(0.5)
}

impl TransitionKernel {
    /// Moves every chain one transition towards `p_t`.
    ///
    /// # Parameters
    ///
    /// * `density`: the bridge between proposal and target.
    /// * `latent`: current latents `[batch, samples, latent_dim]`.
    /// * `level`: inverse temperature and step size of this level.
    /// * `transform`: applied after a Langevin move; ignored by the leapfrog kernel.
    /// * `rng`: source of momenta, noise and acceptance draws.
    pub fn step<B, J, R>(
        &self,
        density: &AnnealedDensity<B, J>,
        latent: Tensor<B, 3>,
        level: &AnnealingLevel<B>,
        transform: Option<&AffineCoupling<B>>,
        rng: &mut R,
    ) -> Result<Transition<B>>
    where
        B: AutodiffBackend,
        J: LogJoint<B>,
        R: Rng,
    {
        match *self {
            TransitionKernel::Leapfrog { n_leapfrogs, rule } => {
                leapfrog_step(density, latent, level, n_leapfrogs, rule, rng)
            }
            TransitionKernel::Langevin => langevin_step(density, latent, level, transform, rng),
        }
    }
}

fn leapfrog_step<B, J, R>(
    density: &AnnealedDensity<B, J>,
    latent: Tensor<B, 3>,
    level: &AnnealingLevel<B>,
    n_leapfrogs: usize,
    rule: AcceptanceRule,
    rng: &mut R,
) -> Result<Transition<B>>
where
    B: AutodiffBackend,
    J: LogJoint<B>,
    R: Rng,
{
    let dims = latent.dims();
    let [batch, samples, _] = dims;
    let device = latent.device();
    let epsilon = broadcast_scalar(level.step_size.clone(), dims);
    let half_epsilon = epsilon.clone().mul_scalar(0.5);

    let momentum_0 = standard_normal::<B, 3, R>(dims, rng, &device);
    let (mut score, logp_current) = density.score(&latent, level.beta_value, level.index)?;
    let mut logp_proposed = logp_current.clone();
    let mut position = latent.clone();
    let mut momentum = momentum_0.clone();
    for _ in 0..n_leapfrogs {
        momentum = momentum + half_epsilon.clone() * score;
        position = position + epsilon.clone() * momentum.clone();
        (score, logp_proposed) = density.score(&position, level.beta_value, level.index)?;
        momentum = momentum + half_epsilon.clone() * score.clone();
    }

    let kinetic_current = kinetic_energy(momentum_0);
    let ln_u = uniform::<B, 2, R>([batch, samples], rng, &device).log();
    match rule {
        AcceptanceRule::MetropolisHastings => {
            // H_current - H_proposed with H = -log p_t + |p|² / 2
            let log_ratio = logp_proposed - logp_current + kinetic_current
                - kinetic_energy(momentum.detach());
            ensure_finite(&log_ratio, "acceptance log-ratio", level.index)?;
            let accepted = ln_u.lower_equal(log_ratio.clone());
            let mask = accepted.clone().unsqueeze_dim::<3>(2).expand(dims);
            Ok(Transition {
                latent: latent.mask_where(mask, position),
                log_weight_increment: Tensor::zeros([batch, samples], &device),
                accepted: Some(accepted),
                acceptance_probability: Some(acceptance_probability(log_ratio, rule)),
            })
        }
        AcceptanceRule::Barker => {
            // Evaluated on the graph so the step size sees the acceptance probability.
            let log_ratio = density.log_density(position.clone(), &level.beta)?
                - density.log_density(latent.clone(), &level.beta)?
                + kinetic_current
                - kinetic_energy(momentum);
            ensure_finite(&log_ratio, "acceptance log-ratio", level.index)?;
            let probability = acceptance_probability(log_ratio, rule);
            let accepted = ln_u.lower(probability.clone().detach().log());
            // Straight-through: the value is the hard decision, the gradient that of σ.
            let relaxed = accepted.clone().float() + probability.clone()
                - probability.clone().detach();
            let relaxed = relaxed.unsqueeze_dim::<3>(2).expand(dims);
            Ok(Transition {
                latent: latent.clone() + relaxed * (position - latent),
                log_weight_increment: Tensor::zeros([batch, samples], &device),
                accepted: Some(accepted),
                acceptance_probability: Some(probability.detach()),
            })
        }
    }
}

fn langevin_step<B, J, R>(
    density: &AnnealedDensity<B, J>,
    latent: Tensor<B, 3>,
    level: &AnnealingLevel<B>,
    transform: Option<&AffineCoupling<B>>,
    rng: &mut R,
) -> Result<Transition<B>>
where
    B: AutodiffBackend,
    J: LogJoint<B>,
    R: Rng,
{
    let dims = latent.dims();
    let [batch, samples, _] = dims;
    let device = latent.device();
    let gamma = broadcast_scalar(level.step_size.clone(), dims);

    // z' = z + γ ∇log p_t(z) + sqrt(2γ) ξ
    let (score, _) = density.score(&latent, level.beta_value, level.index)?;
    let noise = standard_normal::<B, 3, R>(dims, rng, &device);
    let moved = latent.clone()
        + gamma.clone() * score
        + gamma.clone().mul_scalar(2.0).sqrt() * noise.clone();

    // Gaussian normalizers of the forward and backward kernels share γ and cancel.
    let log_forward = kinetic_energy(noise).neg();
    let (score_moved, _) = density.score(&moved, level.beta_value, level.index)?;
    let residual = latent.clone() - moved.clone() - gamma.clone() * score_moved;
    let log_backward = residual
        .powi_scalar(2)
        .sum_dim(2)
        .squeeze::<2>(2)
        .div(broadcast_scalar(level.step_size.clone().mul_scalar(4.0), [batch, samples]))
        .neg();

    let (next, log_det) = match transform {
        Some(coupling) => coupling.forward(moved),
        None => (moved, Tensor::zeros([batch, samples], &device)),
    };
    let increment = density.log_density(next.clone(), &level.beta)?
        - density.log_density(latent, &level.beta)?
        + log_backward
        - log_forward
        + log_det;
    ensure_finite(&increment, "Langevin weight correction", level.index)?;
    Ok(Transition {
        latent: next,
        log_weight_increment: increment,
        accepted: None,
        acceptance_probability: None,
    })
}
