//! The annealed importance sampler.
//!
//! [`AnnealedSampler`] is a burn [`Module`]: whatever it learns (per-level step sizes, the
//! annealing path, coupling transforms) is updated by the same optimizer as the encoder and
//! decoder. Running it draws latents from the proposal, then for every level `t = 1..=K`
//!
//! 1. adds `(β_t - β_{t-1}) (log p(x, z) - log q(z | x))` to each chain's log weight,
//! 2. moves every chain with one transition targeting `p_t` and adds the kernel's own
//!    weight correction.
//!
//! With no transitions this reduces to plain importance sampling from the proposal.

use crate::config::{AcceptanceRule, AisConfig, InferenceEngine, KernelKind, ScheduleKind};
use crate::density::{broadcast_scalar, AnnealedDensity};
use crate::distributions::{vector, DiagonalGaussian, LogJoint};
use crate::error::Result;
use crate::kernel::{AffineCoupling, AnnealingLevel, TransitionKernel};
use crate::schedule::{betas, learned_betas};
use crate::weights::LogWeightAccumulator;
use burn::module::{Ignored, Param};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use log::debug;
use rand::Rng;

/// Options of the sampler that are fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerSettings {
    pub chain_length: usize,
    pub n_leapfrogs: usize,
    pub acceptance: AcceptanceRule,
    pub kernel: KernelKind,
    pub schedule: ScheduleKind,
    pub learn_step_sizes: bool,
}

#[derive(Module, Debug)]
pub struct AnnealedSampler<B: Backend> {
    /// `ln ε_t` per annealing level.
    log_step_sizes: Param<Tensor<B, 1>>,
    /// Present only for [`ScheduleKind::Learned`].
    path_logits: Option<Param<Tensor<B, 1>>>,
    /// One coupling per level when transforms are enabled, empty otherwise.
    transforms: Vec<AffineCoupling<B>>,
    settings: Ignored<SamplerSettings>,
}

/// Result of one sampler run.
#[derive(Debug, Clone)]
pub struct SamplerOutput<B: Backend> {
    /// Final latents `[batch, samples, latent_dim]`.
    pub latents: Tensor<B, 3>,
    /// Log importance weights `[batch, samples]`.
    pub log_weights: Tensor<B, 2>,
    /// Fraction of accepted proposals over all chains and levels; `None` when nothing
    /// was accept/rejected.
    pub acceptance_rate: Option<f64>,
}

impl<B: Backend> AnnealedSampler<B> {
    pub fn new(config: &AisConfig, device: &B::Device) -> Self {
        let levels = config.chain_length.max(1);
        let log_step_sizes = Tensor::full([levels], config.step_size.ln(), device);
        let path_logits = (config.schedule == ScheduleKind::Learned)
            .then(|| Param::from_tensor(Tensor::zeros([levels], device)));
        let transforms = if config.use_transforms {
            (0..config.chain_length)
                .map(|t| AffineCoupling::new(config.hidden_dim, config.network_width, t, device))
                .collect()
        } else {
            Vec::new()
        };
        Self {
            log_step_sizes: Param::from_tensor(log_step_sizes),
            path_logits,
            transforms,
            settings: Ignored(SamplerSettings {
                chain_length: config.chain_length,
                n_leapfrogs: config.n_leapfrogs,
                acceptance: config.acceptance,
                kernel: config.kernel,
                schedule: config.schedule,
                learn_step_sizes: config.learn_step_sizes,
            }),
        }
    }

    pub fn settings(&self) -> &SamplerSettings {
        &self.settings.0
    }

    /// Step size of annealing level `level` (zero-based), one element.
    ///
    /// Detached unless step sizes are learned.
    pub fn step_size(&self, level: usize) -> Tensor<B, 1> {
        let step_size = self.log_step_sizes.val().slice([level..level + 1]).exp();
        if self.settings.0.learn_step_sizes {
            step_size
        } else {
            step_size.detach()
        }
    }

    /// The annealing path `β_0..=β_K`.
    pub fn betas(&self, device: &B::Device) -> Tensor<B, 1> {
        match &self.path_logits {
            Some(logits) => learned_betas(logits.val()),
            None => vector(
                &betas(self.settings.0.schedule, self.settings.0.chain_length),
                device,
            ),
        }
    }

    fn kernel(&self, engine: InferenceEngine) -> Option<TransitionKernel> {
        let n_leapfrogs = self.settings.0.n_leapfrogs;
        match engine {
            InferenceEngine::Plain => None,
            InferenceEngine::Langevin => Some(TransitionKernel::Langevin),
            InferenceEngine::LeapfrogMetropolis => Some(TransitionKernel::Leapfrog {
                n_leapfrogs,
                rule: AcceptanceRule::MetropolisHastings,
            }),
            InferenceEngine::LeapfrogBarker => Some(TransitionKernel::Leapfrog {
                n_leapfrogs,
                rule: AcceptanceRule::Barker,
            }),
        }
    }
}

impl<B: AutodiffBackend> AnnealedSampler<B> {
    /// Runs `num_samples` chains per data point from `proposal` towards `joint`.
    ///
    /// # Parameters
    ///
    /// * `engine`: [`InferenceEngine::Plain`] skips all transitions and uses the path
    ///   `[0, 1]`; the other engines run the configured number of levels.
    /// * `proposal`: encoder output for the batch, with its autodiff graph.
    /// * `joint`: unnormalized target for the same batch.
    pub fn run<J, R>(
        &self,
        engine: InferenceEngine,
        proposal: &DiagonalGaussian<B>,
        joint: &J,
        num_samples: usize,
        rng: &mut R,
    ) -> Result<SamplerOutput<B>>
    where
        J: LogJoint<B>,
        R: Rng,
    {
        let [batch, _] = proposal.dims();
        let device = proposal.mean.device();
        let kernel = self.kernel(engine);
        let betas = match kernel {
            Some(_) => self.betas(&device),
            None => vector(&[0.0, 1.0], &device),
        };
        let beta_values: Vec<f64> = betas.clone().detach().into_data().iter::<f64>().collect();
        let levels = beta_values.len() - 1;

        let density = AnnealedDensity::new(proposal.clone(), joint.clone());
        let mut latent = proposal.sample(num_samples, rng);
        let mut weights = LogWeightAccumulator::new(batch, num_samples, &device);
        let mut accepted_total = 0.0;
        let mut tested_levels = 0usize;

        for t in 1..=levels {
            let beta = betas.clone().slice([t..t + 1]);
            let delta = beta.clone() - betas.clone().slice([t - 1..t]);
            let log_ratio =
                density.log_joint(latent.clone())? - density.log_proposal(latent.clone())?;
            weights.accumulate(log_ratio * broadcast_scalar(delta, [batch, num_samples]), t)?;

            let Some(kernel) = kernel else {
                continue;
            };
            let level = AnnealingLevel {
                index: t,
                beta,
                beta_value: beta_values[t],
                step_size: self.step_size(t - 1),
            };
            let transition = kernel.step(
                &density,
                latent,
                &level,
                self.transforms.get(t - 1),
                rng,
            )?;
            weights.accumulate(transition.log_weight_increment, t)?;
            latent = transition.latent;

            match transition.accepted {
                Some(accepted) => {
                    let rate: f64 = accepted.float().mean().into_scalar().elem();
                    accepted_total += rate;
                    tested_levels += 1;
                    debug!("level {t}/{levels}: beta = {:.4}, acceptance = {rate:.3}", beta_values[t]);
                }
                None => debug!("level {t}/{levels}: beta = {:.4}", beta_values[t]),
            }
        }

        Ok(SamplerOutput {
            latents: latent,
            log_weights: weights.into_inner(),
            acceptance_rate: (tested_levels > 0).then(|| accepted_total / tested_levels as f64),
        })
    }
}
