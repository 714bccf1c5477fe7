//! Configuration of the model pair and the annealed sampler.
//!
//! [`AisConfig`] is a burn [`Config`], so every option has a default, a `with_*` builder
//! method, and the whole bundle can be saved to and loaded from JSON. Invalid combinations
//! are rejected by [`AisConfig::validate`] before any computation starts.
//!
//! # Examples
//!
//! ```rust
//! use mc_vae::config::{AcceptanceRule, AisConfig, InferenceEngine, ModelKind};
//!
//! let config = AisConfig::preset(ModelKind::Aiwae)
//!     .with_chain_length(5)
//!     .with_acceptance(AcceptanceRule::Barker);
//! config.validate().unwrap();
//! assert_eq!(config.engine(), InferenceEngine::LeapfrogBarker);
//! ```

use crate::error::AisError;
use burn::config::Config;

/// Markov transition used between two annealing levels.
#[derive(Config, Debug, Copy, PartialEq, Eq)]
pub enum KernelKind {
    /// Hamiltonian leapfrog trajectory followed by an accept/reject test.
    Leapfrog,
    /// A single unadjusted Langevin move, optionally followed by a learned coupling.
    Langevin,
}

/// Accept/reject criterion of the leapfrog kernel.
#[derive(Config, Debug, Copy, PartialEq, Eq)]
pub enum AcceptanceRule {
    /// Accept iff `ln u <= H_current - H_proposed`.
    MetropolisHastings,
    /// Accept with probability `sigmoid(H_current - H_proposed)`.
    Barker,
}

/// How β(t) is laid out between 0 and 1.
#[derive(Config, Debug, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    Linear,
    Geometric,
    /// Increments are a softmax over trainable logits.
    Learned,
}

/// How per-sample log weights are reduced to one bound per data point.
#[derive(Config, Debug, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Average of the log weights (the plain evidence lower bound).
    Elbo,
    /// Log of the average weight (the importance-weighted / AIS bound).
    Iwae,
}

#[derive(Config, Debug, Copy, PartialEq, Eq)]
pub enum NetKind {
    FullyConnected,
    Convolutional,
}

#[derive(Config, Debug, Copy, PartialEq, Eq)]
pub enum Activation {
    Relu,
    LeakyRelu,
    Tanh,
    LogSigmoid,
    /// Log-softmax over the last dimension.
    LogSoftmax,
    Softplus,
}

/// Observation model of the decoder.
#[derive(Config, Debug, Copy, PartialEq, Eq)]
pub enum Likelihood {
    /// Decoder outputs logits; suited to binarised data.
    Bernoulli,
    /// Decoder outputs means; the scale is `observation_scale`.
    Gaussian,
}

/// Named bundles of options matching the model families the sampler was built for.
#[derive(Config, Debug, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Vae,
    Iwae,
    Aiwae,
    AisVae,
    UlaVae,
    Stacked,
}

/// The inference engine actually run for a training step.
///
/// Selected once from the configuration; the curriculum may additionally force
/// [`InferenceEngine::Plain`] during warm-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceEngine {
    /// No transitions: samples come straight from the encoder's proposal.
    Plain,
    Langevin,
    LeapfrogMetropolis,
    LeapfrogBarker,
}

impl InferenceEngine {
    pub fn is_annealed(&self) -> bool {
        !matches!(self, InferenceEngine::Plain)
    }
}

#[derive(Config, Debug)]
pub struct AisConfig {
    /// Number of annealing levels K. Zero disables annealing entirely.
    #[config(default = 3)]
    pub chain_length: usize,
    /// Leapfrog iterations per transition.
    #[config(default = 3)]
    pub n_leapfrogs: usize,
    /// Initial step size, shared by all annealing levels.
    #[config(default = 0.01)]
    pub step_size: f64,
    #[config(default = "AcceptanceRule::MetropolisHastings")]
    pub acceptance: AcceptanceRule,
    #[config(default = "KernelKind::Leapfrog")]
    pub kernel: KernelKind,
    /// Apply a learned affine coupling after every Langevin move.
    #[config(default = false)]
    pub use_transforms: bool,
    /// Independent importance samples (chains) per data point.
    #[config(default = 1)]
    pub num_samples: usize,
    /// Iterations trained with plain inference before the sampler is engaged.
    #[config(default = 0)]
    pub curriculum_boundary: usize,
    /// Dimensionality of the latent space.
    #[config(default = 64)]
    pub hidden_dim: usize,
    /// Width of the hidden layers of encoder and decoder.
    #[config(default = 256)]
    pub network_width: usize,
    #[config(default = "NetKind::FullyConnected")]
    pub net_kind: NetKind,
    /// Input image shape as `[channels, height, width]`.
    #[config(default = "[1, 28, 28]")]
    pub input_shape: [usize; 3],
    #[config(default = "Activation::LeakyRelu")]
    pub activation: Activation,
    #[config(default = "Likelihood::Bernoulli")]
    pub likelihood: Likelihood,
    #[config(default = 1.0)]
    pub observation_scale: f64,
    #[config(default = "ScheduleKind::Linear")]
    pub schedule: ScheduleKind,
    /// Train one log step size per annealing level.
    #[config(default = false)]
    pub learn_step_sizes: bool,
    #[config(default = "Aggregation::Iwae")]
    pub aggregation: Aggregation,
    #[config(default = 42)]
    pub seed: u64,
}

impl AisConfig {
    /// Defaults for one of the named model families.
    pub fn preset(kind: ModelKind) -> Self {
        let base = AisConfig::new();
        match kind {
            ModelKind::Vae => base.with_chain_length(0).with_aggregation(Aggregation::Elbo),
            ModelKind::Iwae => base.with_chain_length(0).with_aggregation(Aggregation::Iwae),
            ModelKind::Aiwae => base
                .with_kernel(KernelKind::Leapfrog)
                .with_schedule(ScheduleKind::Linear),
            ModelKind::AisVae => base
                .with_kernel(KernelKind::Leapfrog)
                .with_n_leapfrogs(1)
                .with_learn_step_sizes(true)
                .with_schedule(ScheduleKind::Learned),
            ModelKind::UlaVae => base
                .with_kernel(KernelKind::Langevin)
                .with_learn_step_sizes(true),
            ModelKind::Stacked => AisConfig::preset(ModelKind::AisVae).with_curriculum_boundary(5),
        }
    }

    /// Rejects invalid option combinations.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.num_samples == 0 {
            return Err(AisError::Config("num_samples must be at least 1".into()));
        }
        if self.hidden_dim == 0 || self.network_width == 0 {
            return Err(AisError::Config(
                "hidden_dim and network_width must be positive".into(),
            ));
        }
        if !(self.step_size.is_finite() && self.step_size > 0.0) {
            return Err(AisError::Config(format!(
                "step_size must be a positive finite number, got {}",
                self.step_size
            )));
        }
        if self.chain_length > 0 && self.kernel == KernelKind::Leapfrog && self.n_leapfrogs == 0 {
            return Err(AisError::Config(
                "a leapfrog kernel with chain_length > 0 needs n_leapfrogs >= 1".into(),
            ));
        }
        if self.use_transforms && self.kernel != KernelKind::Langevin {
            return Err(AisError::Config(
                "use_transforms is only supported with the Langevin kernel".into(),
            ));
        }
        if self.schedule == ScheduleKind::Learned && self.chain_length == 0 {
            return Err(AisError::Config(
                "a learned annealing path needs chain_length >= 1".into(),
            ));
        }
        if !(self.observation_scale.is_finite() && self.observation_scale > 0.0) {
            return Err(AisError::Config(
                "observation_scale must be a positive finite number".into(),
            ));
        }
        let [channels, height, width] = self.input_shape;
        if channels == 0 || height == 0 || width == 0 {
            return Err(AisError::Config(format!(
                "input_shape must not contain zeros, got {:?}",
                self.input_shape
            )));
        }
        if self.net_kind == NetKind::Convolutional && (height % 4 != 0 || width % 4 != 0) {
            return Err(AisError::Config(format!(
                "the convolutional network needs height and width divisible by 4, got {height}x{width}"
            )));
        }
        Ok(())
    }

    /// Engine implied by the kernel options once annealing is active.
    pub fn engine(&self) -> InferenceEngine {
        if self.chain_length == 0 {
            return InferenceEngine::Plain;
        }
        match (self.kernel, self.acceptance) {
            (KernelKind::Langevin, _) => InferenceEngine::Langevin,
            (KernelKind::Leapfrog, AcceptanceRule::MetropolisHastings) => {
                InferenceEngine::LeapfrogMetropolis
            }
            (KernelKind::Leapfrog, AcceptanceRule::Barker) => InferenceEngine::LeapfrogBarker,
        }
    }

    /// Number of pixels of one flattened input.
    pub fn input_len(&self) -> usize {
        self.input_shape.iter().product()
    }
}
