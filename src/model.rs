//! The generative model pair: an encoder producing the proposal `q(z | x)` and a decoder
//! producing the parameters of `p(x | z)`.
//!
//! Both come in a fully-connected and a convolutional flavour, picked by
//! [`NetKind`]. Images enter as `[batch, channels, height, width]`; the decoder always
//! emits flattened parameters `[batch, channels * height * width]`.

use crate::config::{Activation, AisConfig, Likelihood, NetKind};
use crate::distributions::{standard_normal_log_prob, DiagonalGaussian, LogJoint, LN_2PI};
use crate::error::{ensure_dims, ensure_finite, AisError, Result};
use burn::module::Ignored;
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::{Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation;
use burn::tensor::backend::AutodiffBackend;

const CONV_CHANNELS: [usize; 2] = [32, 64];

/// Applies the configured nonlinearity.
pub fn activate<B: Backend, const D: usize>(kind: Activation, x: Tensor<B, D>) -> Tensor<B, D> {
    match kind {
        Activation::Relu => activation::relu(x),
        Activation::LeakyRelu => activation::leaky_relu(x, 0.01),
        Activation::Tanh => activation::tanh(x),
        Activation::LogSigmoid => activation::log_sigmoid(x),
        Activation::LogSoftmax => activation::log_softmax(x, D - 1),
        Activation::Softplus => activation::softplus(x, 1.0),
    }
}

/// `log(1 + exp(x))` without overflow for large `x`.
fn stable_softplus<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    activation::relu(x.clone()) + x.abs().neg().exp().log1p()
}

#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    /// Empty for the fully-connected network.
    conv: Vec<Conv2d<B>>,
    hidden: Vec<Linear<B>>,
    mean: Linear<B>,
    log_var: Linear<B>,
    activation: Ignored<Activation>,
}

impl<B: Backend> Encoder<B> {
    pub fn new(config: &AisConfig, device: &B::Device) -> Self {
        let [channels, height, width] = config.input_shape;
        let (conv, flat) = match config.net_kind {
            NetKind::FullyConnected => (Vec::new(), config.input_len()),
            NetKind::Convolutional => {
                let conv = vec![
                    Conv2dConfig::new([channels, CONV_CHANNELS[0]], [3, 3])
                        .with_stride([2, 2])
                        .with_padding(PaddingConfig2d::Explicit(1, 1))
                        .init(device),
                    Conv2dConfig::new([CONV_CHANNELS[0], CONV_CHANNELS[1]], [3, 3])
                        .with_stride([2, 2])
                        .with_padding(PaddingConfig2d::Explicit(1, 1))
                        .init(device),
                ];
                (conv, CONV_CHANNELS[1] * (height / 4) * (width / 4))
            }
        };
        let hidden = vec![
            LinearConfig::new(flat, config.network_width).init(device),
            LinearConfig::new(config.network_width, config.network_width).init(device),
        ];
        Self {
            conv,
            hidden,
            mean: LinearConfig::new(config.network_width, config.hidden_dim).init(device),
            log_var: LinearConfig::new(config.network_width, config.hidden_dim).init(device),
            activation: Ignored(config.activation),
        }
    }

    /// Maps images to the proposal's `(mean, log_var)`, each `[batch, latent_dim]`.
    pub fn forward(&self, x: Tensor<B, 4>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let mut x = x;
        for conv in &self.conv {
            x = activate(self.activation.0, conv.forward(x));
        }
        let mut h: Tensor<B, 2> = x.flatten(1, 3);
        for layer in &self.hidden {
            h = activate(self.activation.0, layer.forward(h));
        }
        (self.mean.forward(h.clone()), self.log_var.forward(h))
    }
}

#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    hidden: Vec<Linear<B>>,
    /// Fully-connected: the final projection. Convolutional: projection to the
    /// smallest feature map.
    output: Linear<B>,
    deconv: Vec<ConvTranspose2d<B>>,
    activation: Ignored<Activation>,
    input_shape: Ignored<[usize; 3]>,
}

impl<B: Backend> Decoder<B> {
    pub fn new(config: &AisConfig, device: &B::Device) -> Self {
        let [channels, height, width] = config.input_shape;
        let hidden = vec![
            LinearConfig::new(config.hidden_dim, config.network_width).init(device),
            LinearConfig::new(config.network_width, config.network_width).init(device),
        ];
        let (output, deconv) = match config.net_kind {
            NetKind::FullyConnected => (
                LinearConfig::new(config.network_width, config.input_len()).init(device),
                Vec::new(),
            ),
            NetKind::Convolutional => (
                LinearConfig::new(
                    config.network_width,
                    CONV_CHANNELS[1] * (height / 4) * (width / 4),
                )
                .init(device),
                vec![
                    ConvTranspose2dConfig::new([CONV_CHANNELS[1], CONV_CHANNELS[0]], [3, 3])
                        .with_stride([2, 2])
                        .with_padding([1, 1])
                        .with_padding_out([1, 1])
                        .init(device),
                    ConvTranspose2dConfig::new([CONV_CHANNELS[0], channels], [3, 3])
                        .with_stride([2, 2])
                        .with_padding([1, 1])
                        .with_padding_out([1, 1])
                        .init(device),
                ],
            ),
        };
        Self {
            hidden,
            output,
            deconv,
            activation: Ignored(config.activation),
            input_shape: Ignored(config.input_shape),
        }
    }

    /// Maps latents `[n, latent_dim]` to flattened distribution parameters.
    pub fn forward(&self, z: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut h = z;
        for layer in &self.hidden {
            h = activate(self.activation.0, layer.forward(h));
        }
        let h = self.output.forward(h);
        if self.deconv.is_empty() {
            return h;
        }

        let [_, height, width] = self.input_shape.0;
        let n = h.dims()[0];
        let mut x: Tensor<B, 4> = activate(self.activation.0, h).reshape([
            n,
            CONV_CHANNELS[1],
            height / 4,
            width / 4,
        ]);
        let last = self.deconv.len() - 1;
        for (i, deconv) in self.deconv.iter().enumerate() {
            x = deconv.forward(x);
            if i < last {
                x = activate(self.activation.0, x);
            }
        }
        x.flatten(1, 3)
    }
}

/// Encoder, decoder and the observation model tying them together.
#[derive(Module, Debug)]
pub struct GenerativeModel<B: Backend> {
    pub encoder: Encoder<B>,
    pub decoder: Decoder<B>,
    likelihood: Ignored<Likelihood>,
    observation_scale: Ignored<f64>,
    input_shape: Ignored<[usize; 3]>,
    latent_dim: Ignored<usize>,
}

impl<B: Backend> GenerativeModel<B> {
    pub fn new(config: &AisConfig, device: &B::Device) -> Self {
        Self {
            encoder: Encoder::new(config, device),
            decoder: Decoder::new(config, device),
            likelihood: Ignored(config.likelihood),
            observation_scale: Ignored(config.observation_scale),
            input_shape: Ignored(config.input_shape),
            latent_dim: Ignored(config.hidden_dim),
        }
    }

    pub fn latent_dim(&self) -> usize {
        self.latent_dim.0
    }

    /// Proposal `q(z | x)` for a batch of images.
    ///
    /// Rejects inputs of the wrong shape and inputs containing NaN or infinities.
    pub fn encode(&self, x: Tensor<B, 4>) -> Result<DiagonalGaussian<B>> {
        let [batch, channels, height, width] = x.dims();
        ensure_dims(
            "encoder input",
            [batch, self.input_shape.0[0], self.input_shape.0[1], self.input_shape.0[2]],
            [batch, channels, height, width],
        )?;
        ensure_finite(&x, "input", 0).map_err(|_| AisError::InvalidInput)?;
        let (mean, log_var) = self.encoder.forward(x);
        ensure_finite(&mean, "proposal mean", 0)?;
        ensure_finite(&log_var, "proposal log-variance", 0)?;
        DiagonalGaussian::new(mean, log_var)
    }

    /// Distribution parameters of `p(x | z)` for latents `[n, latent_dim]`.
    pub fn decode(&self, z: Tensor<B, 2>) -> Result<Tensor<B, 2>> {
        let [n, dim] = z.dims();
        ensure_dims("decoder input", [n, self.latent_dim.0], [n, dim])?;
        Ok(self.decoder.forward(z))
    }

    /// `log p(x | z)` summed over pixels, `[n]`.
    pub fn log_likelihood(&self, x_flat: Tensor<B, 2>, params: Tensor<B, 2>) -> Tensor<B, 1> {
        log_likelihood(self.likelihood.0, self.observation_scale.0, x_flat, params)
    }
}

impl<B: AutodiffBackend> GenerativeModel<B> {
    /// The unnormalized posterior target `log p(z) + log p(x | z)` for this batch.
    pub fn joint(&self, x: Tensor<B, 4>) -> VaeJoint<B> {
        VaeJoint {
            decoder: self.decoder.clone(),
            likelihood: self.likelihood.0,
            observation_scale: self.observation_scale.0,
            latent_dim: self.latent_dim.0,
            x_flat: x.flatten(1, 3),
        }
    }
}

fn log_likelihood<B: Backend>(
    likelihood: Likelihood,
    observation_scale: f64,
    x_flat: Tensor<B, 2>,
    params: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let per_pixel = match likelihood {
        Likelihood::Bernoulli => x_flat * params.clone() - stable_softplus(params),
        Likelihood::Gaussian => (x_flat - params)
            .div_scalar(observation_scale)
            .powi_scalar(2)
            .mul_scalar(-0.5)
            .sub_scalar(observation_scale.ln() + 0.5 * LN_2PI),
    };
    per_pixel.sum_dim(1).squeeze::<1>(1)
}

/// `log p(x, z)` of a VAE decoder for one batch of observations.
#[derive(Debug, Clone)]
pub struct VaeJoint<B: Backend> {
    decoder: Decoder<B>,
    likelihood: Likelihood,
    observation_scale: f64,
    latent_dim: usize,
    x_flat: Tensor<B, 2>,
}

impl<B: AutodiffBackend> LogJoint<B> for VaeJoint<B> {
    fn log_joint(&self, latents: Tensor<B, 3>) -> Result<Tensor<B, 2>> {
        let [batch, samples, dim] = latents.dims();
        let [x_batch, pixels] = self.x_flat.dims();
        ensure_dims(
            "decoder input",
            [x_batch, samples, self.latent_dim],
            [batch, samples, dim],
        )?;

        let params = self
            .decoder
            .forward(latents.clone().reshape([batch * samples, dim]));
        let x = self
            .x_flat
            .clone()
            .unsqueeze_dim::<3>(1)
            .repeat_dim(1, samples)
            .reshape([batch * samples, pixels]);
        let log_lik = log_likelihood(self.likelihood, self.observation_scale, x, params)
            .reshape([batch, samples]);
        Ok(log_lik + standard_normal_log_prob(latents))
    }

    fn frozen(&self) -> Self {
        Self {
            decoder: self.decoder.clone().no_grad(),
            x_flat: self.x_flat.clone().detach(),
            ..self.clone()
        }
    }
}
