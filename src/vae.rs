//! A VAE whose inference runs through the annealed sampler.
//!
//! # Examples
//!
//! ```rust
//! use burn::backend::{Autodiff, NdArray};
//! use burn::prelude::*;
//! use mc_vae::config::{AisConfig, ModelKind};
//! use mc_vae::vae::{AisVae, TrainingState};
//!
//! type B = Autodiff<NdArray>;
//! let device = Default::default();
//! let config = AisConfig::preset(ModelKind::Stacked)
//!     .with_input_shape([1, 4, 4])
//!     .with_hidden_dim(2)
//!     .with_network_width(8)
//!     .with_curriculum_boundary(1);
//! let model = AisVae::<B>::new(config.clone(), &device).unwrap();
//! let mut state = TrainingState::new(&config);
//!
//! let x = Tensor::<B, 4>::ones([3, 1, 4, 4], &device);
//! let warm_up = model.training_step(x.clone(), &mut state).unwrap();
//! let annealed = model.training_step(x, &mut state).unwrap();
//! assert!(!warm_up.engine.is_annealed());
//! assert!(annealed.engine.is_annealed());
//! assert!(annealed.bound.is_finite());
//! ```

use crate::bound::{estimate, BoundEstimate};
use crate::config::{Aggregation, AisConfig, InferenceEngine};
use crate::curriculum::{Curriculum, CurriculumMode};
use crate::distributions::LogJoint;
use crate::error::{AisError, Result};
use crate::model::GenerativeModel;
use crate::sampler::AnnealedSampler;
use crate::weights::log_mean_exp;
use burn::module::Ignored;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Largest number of chains per data point run at once by [`AisVae::evaluate`].
pub const EVAL_CHUNK: usize = 64;

#[derive(Module, Debug)]
pub struct AisVae<B: Backend> {
    pub model: GenerativeModel<B>,
    pub sampler: AnnealedSampler<B>,
    config: Ignored<AisConfig>,
}

/// Everything a training run carries from one step to the next besides the parameters.
#[derive(Debug, Clone)]
pub struct TrainingState {
    pub curriculum: Curriculum,
    pub rng: SmallRng,
}

impl TrainingState {
    pub fn new(config: &AisConfig) -> Self {
        Self {
            curriculum: Curriculum::new(config.curriculum_boundary),
            rng: SmallRng::seed_from_u64(config.seed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StepOutput<B: Backend> {
    /// Scalar loss with its autodiff graph.
    pub loss: Tensor<B, 1>,
    /// Batch-mean lower bound on `log p(x)`.
    pub bound: f64,
    pub acceptance_rate: Option<f64>,
    pub mode: CurriculumMode,
    pub engine: InferenceEngine,
}

impl<B: AutodiffBackend> AisVae<B> {
    /// Builds the model pair and the sampler, rejecting invalid configurations.
    pub fn new(config: AisConfig, device: &B::Device) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            model: GenerativeModel::new(&config, device),
            sampler: AnnealedSampler::new(&config, device),
            config: Ignored(config),
        })
    }

    pub fn config(&self) -> &AisConfig {
        &self.config.0
    }

    /// Loss and bound of one training batch `[batch, channels, height, width]`.
    ///
    /// The curriculum in `state` picks plain or annealed inference for this iteration.
    pub fn training_step(
        &self,
        x: Tensor<B, 4>,
        state: &mut TrainingState,
    ) -> Result<StepOutput<B>> {
        let mode = state.curriculum.advance();
        let engine = mode.engine(self.config.0.engine());
        let (estimate, acceptance_rate) = self.objective(
            x,
            engine,
            self.config.0.num_samples,
            self.config.0.aggregation,
            &mut state.rng,
        )?;
        Ok(StepOutput {
            loss: estimate.loss,
            bound: estimate.bound,
            acceptance_rate,
            mode,
            engine,
        })
    }

    /// Encodes `x`, runs the sampler with `engine` and reduces the weights to a bound.
    pub fn objective<R: Rng>(
        &self,
        x: Tensor<B, 4>,
        engine: InferenceEngine,
        num_samples: usize,
        aggregation: Aggregation,
        rng: &mut R,
    ) -> Result<(BoundEstimate<B>, Option<f64>)> {
        let proposal = self.model.encode(x.clone())?;
        let joint = self.model.joint(x);
        let output = self.sampler.run(engine, &proposal, &joint, num_samples, rng)?;
        Ok((estimate(output.log_weights, aggregation)?, output.acceptance_rate))
    }

    /// Importance-weighted bound on `log p(x)` with `num_samples` chains per data point,
    /// averaged over the batch.
    ///
    /// Always uses the configured annealed engine. Chains are run in chunks of at most
    /// [`EVAL_CHUNK`] so that large sample counts fit in memory. Asking for no samples is
    /// a configuration error.
    pub fn evaluate<R: Rng>(&self, x: Tensor<B, 4>, num_samples: usize, rng: &mut R) -> Result<f64> {
        if num_samples == 0 {
            return Err(AisError::Config(
                "evaluation needs at least one sample per data point".into(),
            ));
        }
        let engine = self.config.0.engine();
        let proposal = self.model.encode(x.clone())?.detach();
        let joint = self.model.joint(x).frozen();

        let mut chunks = Vec::new();
        let mut remaining = num_samples;
        while remaining > 0 {
            let n = remaining.min(EVAL_CHUNK);
            let output = self.sampler.run(engine, &proposal, &joint, n, rng)?;
            chunks.push(output.log_weights.detach());
            remaining -= n;
        }
        let log_weights = Tensor::cat(chunks, 1);
        Ok(log_mean_exp(log_weights).mean().into_scalar().elem())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KernelKind, ModelKind};
    use burn::backend::{Autodiff, NdArray};
    use burn::optim::GradientsParams;

    type BackendType = Autodiff<NdArray>;

    fn small(kind: ModelKind) -> AisConfig {
        AisConfig::preset(kind)
            .with_input_shape([1, 4, 4])
            .with_hidden_dim(2)
            .with_network_width(8)
            .with_num_samples(3)
            .with_chain_length(2)
    }

    fn batch() -> Tensor<BackendType, 4> {
        let device = Default::default();
        Tensor::<BackendType, 4>::from_floats(
            [[[[1.0, 0.0, 1.0, 0.0], [0.0, 1.0, 0.0, 1.0], [1.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 1.0]]]],
            &device,
        )
        .repeat_dim(0, 2)
    }

    #[test]
    fn invalid_config_is_rejected_before_building() {
        let config = small(ModelKind::Aiwae).with_num_samples(0);
        assert!(matches!(
            AisVae::<BackendType>::new(config, &Default::default()),
            Err(AisError::Config(_))
        ));
    }

    #[test]
    fn every_preset_trains_one_step() {
        for kind in [
            ModelKind::Vae,
            ModelKind::Iwae,
            ModelKind::Aiwae,
            ModelKind::AisVae,
            ModelKind::UlaVae,
            ModelKind::Stacked,
        ] {
            let mut config = small(kind);
            if matches!(kind, ModelKind::Vae | ModelKind::Iwae) {
                config = config.with_chain_length(0);
            }
            let model = AisVae::<BackendType>::new(config.clone(), &Default::default()).unwrap();
            let mut state = TrainingState::new(&config);
            let out = model.training_step(batch(), &mut state).unwrap();
            assert!(out.bound.is_finite(), "{kind:?}");
            assert!(out.bound < 0.0, "{kind:?}: a Bernoulli bound is a log-probability");
            let grads = GradientsParams::from_grads(out.loss.backward(), &model);
            assert!(!grads.is_empty(), "{kind:?}");
        }
    }

    #[test]
    fn stacked_training_switches_engine_at_the_boundary() {
        let config = small(ModelKind::Stacked).with_curriculum_boundary(2);
        let model = AisVae::<BackendType>::new(config.clone(), &Default::default()).unwrap();
        let mut state = TrainingState::new(&config);
        let engines: Vec<_> = (0..4)
            .map(|_| model.training_step(batch(), &mut state).unwrap().engine)
            .collect();
        assert_eq!(
            engines,
            vec![
                InferenceEngine::Plain,
                InferenceEngine::Plain,
                InferenceEngine::LeapfrogMetropolis,
                InferenceEngine::LeapfrogMetropolis,
            ]
        );
    }

    #[test]
    fn langevin_with_transforms_trains() {
        let config = small(ModelKind::UlaVae)
            .with_kernel(KernelKind::Langevin)
            .with_use_transforms(true);
        let model = AisVae::<BackendType>::new(config.clone(), &Default::default()).unwrap();
        let mut state = TrainingState::new(&config);
        let out = model.training_step(batch(), &mut state).unwrap();
        assert!(out.bound.is_finite());
        assert!(out.acceptance_rate.is_none());
    }

    #[test]
    fn evaluation_handles_more_samples_than_one_chunk() {
        let config = small(ModelKind::Aiwae);
        let model = AisVae::<BackendType>::new(config, &Default::default()).unwrap();
        let mut rng = SmallRng::seed_from_u64(0);
        let bound = model.evaluate(batch(), EVAL_CHUNK + 6, &mut rng).unwrap();
        assert!(bound.is_finite() && bound < 0.0);
    }

    #[test]
    fn evaluation_without_samples_is_rejected() {
        let model = AisVae::<BackendType>::new(small(ModelKind::Iwae), &Default::default()).unwrap();
        let mut rng = SmallRng::seed_from_u64(0);
        assert!(matches!(
            model.evaluate(batch(), 0, &mut rng),
            Err(AisError::Config(_))
        ));
    }

    #[test]
    fn non_finite_batch_is_invalid_input() {
        let config = small(ModelKind::Vae).with_chain_length(0);
        let model = AisVae::<BackendType>::new(config.clone(), &Default::default()).unwrap();
        let mut state = TrainingState::new(&config);
        let x = batch().div_scalar(0.0);
        assert!(matches!(
            model.training_step(x, &mut state),
            Err(AisError::InvalidInput)
        ));
    }
}
