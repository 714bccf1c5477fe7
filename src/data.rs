//! Synthetic image batches for demos and tests.

use crate::distributions::uniform;
use burn::prelude::*;
use burn::tensor::ElementConversion;
use rand::Rng;

/// Stochastic binarization: every pixel becomes 1 with probability equal to its intensity.
pub fn binarize<B: Backend, R: Rng>(x: Tensor<B, 4>, rng: &mut R) -> Tensor<B, 4> {
    let u = uniform::<B, 4, R>(x.dims(), rng, &x.device());
    u.lower(x).float()
}

/// `n` images of shape `[channels, height, width]` with intensities in `[0, 1]`.
///
/// Each image is one of a few prototypes (horizontal bars, vertical bars, a checkerboard, a
/// filled centre square) with independent pixel noise, so the data has a low-dimensional
/// structure a small model can learn.
pub fn synthetic_images<B: Backend, R: Rng>(
    n: usize,
    shape: [usize; 3],
    rng: &mut R,
    device: &B::Device,
) -> Tensor<B, 4> {
    let [channels, height, width] = shape;
    let mut data = Vec::with_capacity(n * channels * height * width);
    for _ in 0..n {
        let prototype = rng.gen_range(0..4);
        for _ in 0..channels {
            for row in 0..height {
                for col in 0..width {
                    let on = match prototype {
                        0 => row % 4 < 2,
                        1 => col % 4 < 2,
                        2 => (row + col) % 2 == 0,
                        _ => {
                            (height / 4..height - height / 4).contains(&row)
                                && (width / 4..width - width / 4).contains(&col)
                        }
                    };
                    let base = if on { 0.9 } else { 0.1 };
                    let noisy: f64 = base + rng.gen_range(-0.1..0.1);
                    data.push(noisy.elem::<B::FloatElem>());
                }
            }
        }
    }
    Tensor::from_data(TensorData::new(data, [n, channels, height, width]), device)
}
