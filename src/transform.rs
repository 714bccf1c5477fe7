//! A learned invertible map applied after a Langevin move.

use crate::distributions::vector;
use burn::module::Ignored;
use burn::nn::{Initializer, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::tanh;

/// Real-NVP style affine coupling layer.
///
/// Coordinates where the mask is 1 pass through unchanged and condition a scale and shift
/// for the remaining ones:
///
/// `y = m ⊙ z + (1 - m) ⊙ (z ⊙ exp(s(m ⊙ z)) + t(m ⊙ z))`
///
/// The scale and shift heads start at zero, so a fresh layer is the identity with a zero
/// log-determinant.
#[derive(Module, Debug)]
pub struct AffineCoupling<B: Backend> {
    hidden: Linear<B>,
    scale: Linear<B>,
    shift: Linear<B>,
    mask: Ignored<Vec<f64>>,
}

impl<B: Backend> AffineCoupling<B> {
    /// A coupling over `dim` coordinates; `parity` picks which half is conditioned on.
    pub fn new(dim: usize, width: usize, parity: usize, device: &B::Device) -> Self {
        let mask = (0..dim)
            .map(|i| if i % 2 == parity % 2 { 1.0 } else { 0.0 })
            .collect();
        Self {
            hidden: LinearConfig::new(dim, width).init(device),
            scale: LinearConfig::new(width, dim)
                .with_initializer(Initializer::Zeros)
                .init(device),
            shift: LinearConfig::new(width, dim)
                .with_initializer(Initializer::Zeros)
                .init(device),
            mask: Ignored(mask),
        }
    }

    fn masks(&self, dims: [usize; 3], device: &B::Device) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let mask = vector::<B>(&self.mask.0, device).unsqueeze::<3>().expand(dims);
        let complement = mask.clone().neg().add_scalar(1.0);
        (mask, complement)
    }

    /// Log-scale and shift, both zero on the conditioning coordinates.
    fn scale_and_shift(
        &self,
        kept: Tensor<B, 3>,
        complement: &Tensor<B, 3>,
    ) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let h = tanh(self.hidden.forward(kept));
        let log_scale = tanh(self.scale.forward(h.clone())) * complement.clone();
        let shift = self.shift.forward(h) * complement.clone();
        (log_scale, shift)
    }

    /// Maps `z` to `y` and returns `log |det ∂y/∂z|` per chain.
    pub fn forward(&self, z: Tensor<B, 3>) -> (Tensor<B, 3>, Tensor<B, 2>) {
        let (mask, complement) = self.masks(z.dims(), &z.device());
        let kept = z.clone() * mask;
        let (log_scale, shift) = self.scale_and_shift(kept.clone(), &complement);
        let y = kept + complement * (z * log_scale.clone().exp() + shift);
        (y, log_scale.sum_dim(2).squeeze::<2>(2))
    }

    pub fn inverse(&self, y: Tensor<B, 3>) -> Tensor<B, 3> {
        let (mask, complement) = self.masks(y.dims(), &y.device());
        let kept = y.clone() * mask;
        let (log_scale, shift) = self.scale_and_shift(kept.clone(), &complement);
        kept + complement * ((y - shift) * log_scale.neg().exp())
    }
}
