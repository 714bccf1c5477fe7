//! Annealing paths β(0) = 0 < β(1) < ... < β(K) = 1.
//!
//! Fixed paths are plain `Vec<f64>`; the learned path is a tensor so that gradients reach
//! its logits.

use crate::config::ScheduleKind;
use burn::prelude::*;
use burn::tensor::activation::softmax;

/// Smallest non-zero inverse temperature of the geometric path.
pub const GEOMETRIC_BETA_MIN: f64 = 1e-3;

/// Inverse temperatures for `chain_length` annealing levels, `chain_length + 1` values.
///
/// With `chain_length == 0` this is `[0, 1]`: a single jump from proposal to target.
/// [`ScheduleKind::Learned`] has no fixed layout and falls back to the linear path,
/// which is also where [`learned_betas`] starts when its logits are all equal.
pub fn betas(kind: ScheduleKind, chain_length: usize) -> Vec<f64> {
    if chain_length == 0 {
        return vec![0.0, 1.0];
    }
    let k = chain_length as f64;
    let mut betas: Vec<f64> = (0..=chain_length)
        .map(|t| match kind {
            ScheduleKind::Linear | ScheduleKind::Learned => t as f64 / k,
            ScheduleKind::Geometric if t == 0 => 0.0,
            ScheduleKind::Geometric => GEOMETRIC_BETA_MIN.powf((k - t as f64) / k),
        })
        .collect();
    betas[chain_length] = 1.0;
    betas
}

/// Learned path: `Δβ = softmax(logits)`, `β_t = Δβ_1 + ... + Δβ_t`, with `β_K` pinned to 1.
///
/// `logits` has one entry per annealing level; the result has one more.
pub fn learned_betas<B: Backend>(logits: Tensor<B, 1>) -> Tensor<B, 1> {
    let levels = logits.dims()[0];
    let device = logits.device();
    let increments = softmax(logits, 0);

    let mut betas = Vec::with_capacity(levels + 1);
    betas.push(Tensor::<B, 1>::zeros([1], &device));
    let mut running = Tensor::<B, 1>::zeros([1], &device);
    for t in 0..levels.saturating_sub(1) {
        running = running + increments.clone().slice([t..t + 1]);
        betas.push(running.clone());
    }
    if levels > 0 {
        betas.push(Tensor::ones([1], &device));
    }
    Tensor::cat(betas, 0)
}
