//! Trains a stacked annealed VAE on synthetic binarized images and reports the bound.
//!
//! Set `RUST_LOG=info` for per-epoch summaries, `RUST_LOG=debug` for per-level sampler
//! output.

use burn::backend::{Autodiff, NdArray};
use mc_vae::config::{AisConfig, ModelKind};
use mc_vae::data::{binarize, synthetic_images};
use mc_vae::stats::best_bound;
use mc_vae::train::{fit, TrainingConfig};
use mc_vae::vae::{AisVae, TrainingState};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::error::Error;

type BackendType = Autodiff<NdArray>;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    const N_BATCHES: usize = 8;
    const BATCH_SIZE: usize = 32;
    const SEED: u64 = 42;
    let shape = [1, 8, 8];

    let config = AisConfig::preset(ModelKind::Stacked)
        .with_input_shape(shape)
        .with_hidden_dim(4)
        .with_network_width(64)
        .with_num_samples(4)
        .with_curriculum_boundary(2 * N_BATCHES)
        .with_seed(SEED);
    let training = TrainingConfig::new()
        .with_epochs(6)
        .with_learning_rate(3e-3)
        .with_eval_samples(128);

    let device = Default::default();
    let mut rng = SmallRng::seed_from_u64(SEED);
    let batches: Vec<_> = (0..N_BATCHES)
        .map(|_| {
            let x = synthetic_images::<BackendType, _>(BATCH_SIZE, shape, &mut rng, &device);
            binarize(x, &mut rng)
        })
        .collect();
    let validation = binarize(
        synthetic_images::<BackendType, _>(BATCH_SIZE, shape, &mut rng, &device),
        &mut rng,
    );

    println!("Configuration:\n{config}");
    let model = AisVae::<BackendType>::new(config.clone(), &device)?;
    let mut state = TrainingState::new(&config);
    let (model, history) = fit(model, &batches, Some(&validation), &mut state, &training)?;

    for epoch in &history {
        println!(
            "epoch {:2}: train {:8.3}  validation {:8.3}  p(accept) {}",
            epoch.epoch + 1,
            epoch.train_bound,
            epoch.validation_bound.unwrap_or(f64::NAN),
            epoch
                .acceptance_rate
                .map_or_else(|| "-".to_string(), |a| format!("{a:.2}"))
        );
    }
    let validation_bounds: Vec<f64> = history.iter().filter_map(|e| e.validation_bound).collect();
    if let Some(best) = best_bound(&validation_bounds) {
        println!("Best validation bound: {best:.3} nats");
    }

    let final_bound = model.evaluate(validation, 512, &mut rng)?;
    println!("Final validation bound (512 chains): {final_bound:.3} nats");
    Ok(())
}
