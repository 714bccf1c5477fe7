/*!
Densities the annealed sampler bridges between, plus seeded random draws for burn tensors.

Every latent tensor here has shape `[batch, samples, latent_dim]`; each `(batch, sample)`
row is an independent chain. Log-densities are returned per chain as `[batch, samples]`.

- [`DiagonalGaussian`] is the reparameterized proposal `q(z | x)` produced by an encoder.
- [`LogJoint`] is the unnormalized target `log p(x, z)`; [`GaussianJoint`] is a closed-form
  instance with a known normalizer, handy for checking estimators.

Random draws never use the backend's global generator. They take an explicit `Rng`, so a
seeded [`rand::rngs::SmallRng`] makes every chain reproducible.

# Examples

```rust
use burn::backend::{Autodiff, NdArray};
use burn::prelude::*;
use mc_vae::distributions::{DiagonalGaussian, GaussianJoint, LogJoint};
use rand::{rngs::SmallRng, SeedableRng};

type B = Autodiff<NdArray>;
let device = Default::default();
let mut rng = SmallRng::seed_from_u64(42);

let proposal = DiagonalGaussian::<B>::standard(3, 2, &device);
let z = proposal.sample(8, &mut rng);
assert_eq!(z.dims(), [3, 8, 2]);

let target = GaussianJoint::new(vec![1.0, -1.0], vec![0.5, 2.0], 0.7).unwrap();
let log_p = target.log_joint(z).unwrap();
assert_eq!(log_p.dims(), [3, 8]);
```
*/

use crate::error::{ensure_dims, AisError, Result};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use rand::Rng;
use rand_distr::StandardNormal;

/// `ln(2π)`.
pub const LN_2PI: f64 = 1.837_877_066_409_345_3;

/// An unnormalized target density `log p(x, z)` for a fixed batch of observations.
///
/// Implement this for anything the sampler should anneal towards.
pub trait LogJoint<B: AutodiffBackend>: Clone {
    /// Evaluates `log p(x, z)` for latents of shape `[batch, samples, latent_dim]`,
    /// returning `[batch, samples]`.
    fn log_joint(&self, latents: Tensor<B, 3>) -> Result<Tensor<B, 2>>;

    /// A copy whose evaluations record no gradients for model parameters.
    ///
    /// Used for the score `∇_z log p`, which the kernels treat as a constant.
    fn frozen(&self) -> Self;
}

/// Diagonal Gaussian `N(mean, exp(log_var))` with one row of parameters per data point.
#[derive(Debug, Clone)]
pub struct DiagonalGaussian<B: Backend> {
    pub mean: Tensor<B, 2>,
    pub log_var: Tensor<B, 2>,
}

impl<B: Backend> DiagonalGaussian<B> {
    pub fn new(mean: Tensor<B, 2>, log_var: Tensor<B, 2>) -> Result<Self> {
        ensure_dims("proposal parameters", mean.dims(), log_var.dims())?;
        Ok(Self { mean, log_var })
    }

    /// `N(0, I)` for `batch` data points in `dim` dimensions.
    pub fn standard(batch: usize, dim: usize, device: &B::Device) -> Self {
        Self {
            mean: Tensor::zeros([batch, dim], device),
            log_var: Tensor::zeros([batch, dim], device),
        }
    }

    /// `[batch, latent_dim]`
    pub fn dims(&self) -> [usize; 2] {
        self.mean.dims()
    }

    /// Draws `samples` latents per data point with `z = mean + exp(0.5 log_var) * eps`.
    ///
    /// Gradients flow into `mean` and `log_var`; `eps` is a constant.
    pub fn sample<R: Rng>(&self, samples: usize, rng: &mut R) -> Tensor<B, 3> {
        let [batch, dim] = self.dims();
        let eps = standard_normal::<B, 3, R>([batch, samples, dim], rng, &self.mean.device());
        let mean = self.mean.clone().unsqueeze_dim::<3>(1).repeat_dim(1, samples);
        let std = self
            .log_var
            .clone()
            .mul_scalar(0.5)
            .exp()
            .unsqueeze_dim::<3>(1)
            .repeat_dim(1, samples);
        mean + std * eps
    }

    /// Normalized log-density of latents `[batch, samples, latent_dim]`.
    pub fn log_prob(&self, latents: Tensor<B, 3>) -> Result<Tensor<B, 2>> {
        let [batch, samples, dim] = latents.dims();
        ensure_dims("proposal log-density", self.dims(), [batch, dim])?;
        let mean = self.mean.clone().unsqueeze_dim::<3>(1).repeat_dim(1, samples);
        let log_var = self.log_var.clone().unsqueeze_dim::<3>(1).repeat_dim(1, samples);
        let z_sq = (latents - mean).powi_scalar(2) / log_var.clone().exp();
        Ok((z_sq + log_var)
            .add_scalar(LN_2PI)
            .sum_dim(2)
            .squeeze::<2>(2)
            .mul_scalar(-0.5))
    }

    /// Same distribution, cut from the autodiff graph.
    pub fn detach(&self) -> Self {
        Self {
            mean: self.mean.clone().detach(),
            log_var: self.log_var.clone().detach(),
        }
    }
}

/// Log-density of `N(0, I)` per chain, the prior `p(z)`.
pub fn standard_normal_log_prob<B: Backend>(latents: Tensor<B, 3>) -> Tensor<B, 2> {
    latents
        .powi_scalar(2)
        .add_scalar(LN_2PI)
        .sum_dim(2)
        .squeeze::<2>(2)
        .mul_scalar(-0.5)
}

/**
Closed-form unnormalized target `log Z + log N(z; mean, diag(std²))`.

The same target is used for every data point in the batch. Its log-normalizer `log Z` is
known, so any consistent estimator of `log ∫ p(z) dz` must converge to it.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianJoint {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
    pub log_normalizer: f64,
}

impl GaussianJoint {
    /// Fails with [`AisError::Shape`] if `mean` and `std` differ in length, and with
    /// [`AisError::Config`] unless every standard deviation is positive and finite.
    pub fn new(mean: Vec<f64>, std: Vec<f64>, log_normalizer: f64) -> Result<Self> {
        ensure_dims("gaussian target std", [mean.len()], [std.len()])?;
        if !std.iter().all(|s| s.is_finite() && *s > 0.0) {
            return Err(AisError::Config(format!(
                "gaussian target needs positive standard deviations, got {std:?}"
            )));
        }
        Ok(Self {
            mean,
            std,
            log_normalizer,
        })
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }
}

impl<B: AutodiffBackend> LogJoint<B> for GaussianJoint {
    fn log_joint(&self, latents: Tensor<B, 3>) -> Result<Tensor<B, 2>> {
        let dims = latents.dims();
        ensure_dims("gaussian target", [self.dim()], [dims[2]])?;
        let device = latents.device();
        let mean = vector::<B>(&self.mean, &device).unsqueeze::<3>().expand(dims);
        let std = vector::<B>(&self.std, &device).unsqueeze::<3>().expand(dims);
        let log_det: f64 = self.std.iter().map(|s| s.ln()).sum();
        let offset = self.log_normalizer - log_det - 0.5 * LN_2PI * self.dim() as f64;
        Ok(((latents - mean) / std)
            .powi_scalar(2)
            .sum_dim(2)
            .squeeze::<2>(2)
            .mul_scalar(-0.5)
            .add_scalar(offset))
    }

    fn frozen(&self) -> Self {
        self.clone()
    }
}

/// 1-D float tensor holding `values`.
pub fn vector<B: Backend>(values: &[f64], device: &B::Device) -> Tensor<B, 1> {
    let data: Vec<B::FloatElem> = values.iter().map(|v| v.elem::<B::FloatElem>()).collect();
    Tensor::from_data(TensorData::new(data, [values.len()]), device)
}

/// Standard normal draws from an explicit generator.
pub fn standard_normal<B: Backend, const D: usize, R: Rng>(
    dims: [usize; D],
    rng: &mut R,
    device: &B::Device,
) -> Tensor<B, D> {
    let n: usize = dims.iter().product();
    let data: Vec<B::FloatElem> = (0..n)
        .map(|_| rng.sample::<f64, _>(StandardNormal).elem::<B::FloatElem>())
        .collect();
    Tensor::from_data(TensorData::new(data, dims), device)
}

/// Uniform `[0, 1)` draws from an explicit generator.
pub fn uniform<B: Backend, const D: usize, R: Rng>(
    dims: [usize; D],
    rng: &mut R,
    device: &B::Device,
) -> Tensor<B, D> {
    let n: usize = dims.iter().product();
    let data: Vec<B::FloatElem> = (0..n)
        .map(|_| rng.gen::<f64>().elem::<B::FloatElem>())
        .collect();
    Tensor::from_data(TensorData::new(data, dims), device)
}
