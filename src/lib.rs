//! # mc-vae
//!
//! Variational auto-encoders whose inference is upgraded from a single Gaussian proposal to
//! annealed importance sampling: chains start at the encoder's proposal `q(z | x)`, move
//! through a path of intermediate densities towards the posterior `p(z | x)` with leapfrog
//! or Langevin transitions, and carry log importance weights that yield a lower bound on
//! `log p(x)`. Everything runs on [burn](https://burn.dev) tensors, so the bound is
//! differentiable and trains encoder, decoder and sampler together.
//!
//! ## Example
//!
//! ```rust
//! use burn::backend::{Autodiff, NdArray};
//! use burn::prelude::*;
//! use mc_vae::config::{AisConfig, ModelKind};
//! use mc_vae::vae::{AisVae, TrainingState};
//!
//! type B = Autodiff<NdArray>;
//! let device = Default::default();
//! let config = AisConfig::preset(ModelKind::Aiwae)
//!     .with_input_shape([1, 4, 4])
//!     .with_hidden_dim(2)
//!     .with_network_width(16)
//!     .with_num_samples(4);
//! let model = AisVae::<B>::new(config.clone(), &device).unwrap();
//! let mut state = TrainingState::new(&config);
//!
//! let x = Tensor::<B, 4>::zeros([2, 1, 4, 4], &device);
//! let step = model.training_step(x, &mut state).unwrap();
//! let _grads = step.loss.backward();
//! println!("bound: {:.3} nats", step.bound);
//! ```

pub mod bound;
pub mod config;
pub mod curriculum;
pub mod data;
pub mod density;
pub mod distributions;
pub mod error;
pub mod kernel;
pub mod model;
pub mod sampler;
pub mod schedule;
pub mod stats;
pub mod train;
pub mod transform;
pub mod vae;
pub mod weights;
