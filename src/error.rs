//! Error taxonomy shared by every stage of the annealed sampler.
//!
//! Configuration problems are reported before any tensor is touched, numerical problems
//! are reported at the annealing step where they first show up, and shape problems at the
//! boundary where the mismatch is first observed. Nothing in the sampler downgrades one
//! of these to a warning; the caller decides whether to abort or skip the batch.

use burn::prelude::*;
use burn::tensor::ElementConversion;

#[derive(Debug, thiserror::Error)]
pub enum AisError {
    /// Invalid option or option combination, detected at setup.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A log-density, score, weight or loss contained NaN or an infinity.
    #[error("non-finite {quantity} at annealing step {step}")]
    NonFinite { quantity: &'static str, step: usize },

    /// Batch or latent dimensionality disagrees between two collaborators.
    #[error("shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    Shape {
        context: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// The input batch itself contains NaN or an infinity.
    #[error("input batch contains non-finite values")]
    InvalidInput,

    /// Autodiff did not produce a gradient for a tensor that required one.
    #[error("no gradient was recorded for {0}")]
    MissingGradient(&'static str),
}

pub type Result<T> = std::result::Result<T, AisError>;

/// Fails with [`AisError::NonFinite`] unless every element of `tensor` is finite.
///
/// The sum of a tensor is finite exactly when no element is NaN or infinite (barring
/// overflow of the sum itself, which is treated as non-finite too).
pub fn ensure_finite<B: Backend, const D: usize>(
    tensor: &Tensor<B, D>,
    quantity: &'static str,
    step: usize,
) -> Result<()> {
    let total: f64 = tensor.clone().sum().into_scalar().elem();
    if total.is_finite() {
        Ok(())
    } else {
        Err(AisError::NonFinite { quantity, step })
    }
}

/// Fails with [`AisError::Shape`] if `actual` differs from `expected`.
pub fn ensure_dims<const D: usize>(
    context: &'static str,
    expected: [usize; D],
    actual: [usize; D],
) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(AisError::Shape {
            context,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        })
    }
}
