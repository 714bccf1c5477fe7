//! Checks of the annealed importance sampler against a 2D Gaussian target with a known
//! normalizing constant.
//!
//! 1. `test_bound_approaches_log_normalizer`: with many chains the bound converges to `log Z`.
//! 2. `test_bound_grows_with_samples`: averaged over replicates, the bound does not decrease
//!    as chains are added.
//! 3. `test_single_sample_bounds_stay_below_log_normalizer`: one chain per row gives a
//!    strict lower bound, with or without annealing.
//! 4. `test_other_transitions_approach_log_normalizer`: Barker leapfrog and unadjusted
//!    Langevin, the latter with its weight correction, also converge to `log Z`.
//! 5. `test_coupling_log_determinant_keeps_the_bound_consistent`: a non-identity coupling
//!    after each Langevin move still yields `log Z`.

use burn::backend::{Autodiff, NdArray};
use burn::module::{ModuleMapper, ParamId};
use burn::prelude::*;
use mc_vae::config::{AcceptanceRule, AisConfig, InferenceEngine, KernelKind};
use mc_vae::distributions::{DiagonalGaussian, GaussianJoint};
use mc_vae::sampler::AnnealedSampler;
use mc_vae::stats::mean_and_std_error;
use mc_vae::weights::log_mean_exp;
use rand::rngs::SmallRng;
use rand::SeedableRng;

type BackendType = Autodiff<NdArray>;

const LOG_Z: f64 = 1.3;

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> GaussianJoint {
        GaussianJoint::new(vec![1.0, -0.5], vec![0.8, 1.2], LOG_Z).unwrap()
    }

    /// `N(0, 1.5² I)` repeated for `replicates` independent rows.
    fn proposal(replicates: usize) -> DiagonalGaussian<BackendType> {
        let device = Default::default();
        DiagonalGaussian::new(
            Tensor::zeros([replicates, 2], &device),
            Tensor::full([replicates, 2], 2.25f64.ln(), &device),
        )
        .unwrap()
    }

    fn config() -> AisConfig {
        AisConfig::new()
            .with_hidden_dim(2)
            .with_chain_length(3)
            .with_n_leapfrogs(1)
            .with_step_size(0.1)
            .with_kernel(KernelKind::Leapfrog)
            .with_acceptance(AcceptanceRule::MetropolisHastings)
    }

    fn langevin_config() -> AisConfig {
        AisConfig::new()
            .with_hidden_dim(2)
            .with_network_width(8)
            .with_chain_length(5)
            .with_step_size(0.2)
            .with_kernel(KernelKind::Langevin)
    }

    /// Shifts every weight matrix, so couplings stop being the identity.
    struct ShiftWeights(f64);

    impl ModuleMapper<BackendType> for ShiftWeights {
        fn map_float<const D: usize>(
            &mut self,
            _id: ParamId,
            tensor: Tensor<BackendType, D>,
        ) -> Tensor<BackendType, D> {
            if D == 2 {
                tensor.add_scalar(self.0)
            } else {
                tensor
            }
        }
    }

    /// Bound per replicate row.
    fn bounds(engine: InferenceEngine, replicates: usize, samples: usize, seed: u64) -> Vec<f64> {
        let sampler = AnnealedSampler::<BackendType>::new(&config(), &Default::default());
        bounds_with(&sampler, engine, replicates, samples, seed)
    }

    fn bounds_with(
        sampler: &AnnealedSampler<BackendType>,
        engine: InferenceEngine,
        replicates: usize,
        samples: usize,
        seed: u64,
    ) -> Vec<f64> {
        let mut rng = SmallRng::seed_from_u64(seed);
        let output = sampler
            .run(engine, &proposal(replicates), &target(), samples, &mut rng)
            .unwrap();
        log_mean_exp(output.log_weights.detach())
            .into_data()
            .iter::<f64>()
            .collect()
    }

    #[test]
    fn test_bound_approaches_log_normalizer() {
        let estimates = bounds(InferenceEngine::LeapfrogMetropolis, 8, 2_000, 42);
        let (mean, std_error) = mean_and_std_error(&estimates).unwrap();
        assert!(
            (mean - LOG_Z).abs() < 0.08,
            "bound {mean:.4} ± {std_error:.4}, expected {LOG_Z}"
        );
        assert!(std_error < 0.05);
    }

    #[test]
    fn test_bound_grows_with_samples() {
        let sample_counts = [1, 8, 64];
        let means: Vec<f64> = sample_counts
            .iter()
            .map(|&m| {
                let estimates = bounds(InferenceEngine::Plain, 512, m, 7);
                mean_and_std_error(&estimates).unwrap().0
            })
            .collect();
        for pair in means.windows(2) {
            assert!(pair[0] <= pair[1], "bounds not increasing: {means:?}");
        }
        assert!(*means.last().unwrap() <= LOG_Z + 0.05);

        let annealed: Vec<f64> = [1, 64]
            .iter()
            .map(|&m| {
                let estimates = bounds(InferenceEngine::LeapfrogMetropolis, 256, m, 8);
                mean_and_std_error(&estimates).unwrap().0
            })
            .collect();
        assert!(annealed[0] <= annealed[1], "annealed bounds: {annealed:?}");
    }

    #[test]
    fn test_single_sample_bounds_stay_below_log_normalizer() {
        for engine in [InferenceEngine::Plain, InferenceEngine::LeapfrogMetropolis] {
            let (mean, std_error) =
                mean_and_std_error(&bounds(engine, 1_024, 1, 3)).unwrap();
            assert!(
                mean + 3.0 * std_error < LOG_Z,
                "{engine:?}: {mean:.4} ± {std_error:.4}"
            );
        }
    }

    fn assert_near_log_normalizer(label: &str, estimates: &[f64]) {
        let (mean, std_error) = mean_and_std_error(estimates).unwrap();
        assert!(
            (mean - LOG_Z).abs() < 0.08,
            "{label}: bound {mean:.4} ± {std_error:.4}, expected {LOG_Z}"
        );
    }

    #[test]
    fn test_other_transitions_approach_log_normalizer() {
        assert_near_log_normalizer(
            "barker",
            &bounds(InferenceEngine::LeapfrogBarker, 8, 2_000, 42),
        );

        let config = langevin_config();
        let sampler = AnnealedSampler::<BackendType>::new(&config, &Default::default());
        assert_near_log_normalizer(
            "langevin",
            &bounds_with(&sampler, config.engine(), 8, 2_000, 42),
        );
    }

    #[test]
    fn test_coupling_log_determinant_keeps_the_bound_consistent() {
        let config = langevin_config().with_use_transforms(true);
        let identity = AnnealedSampler::<BackendType>::new(&config, &Default::default());
        let shifted = identity.clone().map(&mut ShiftWeights(0.05));

        let moved: Vec<f64> = bounds_with(&shifted, config.engine(), 8, 2_000, 42);
        let unmoved: Vec<f64> = bounds_with(&identity, config.engine(), 8, 2_000, 42);
        assert_ne!(moved, unmoved);
        assert_near_log_normalizer("langevin with couplings", &moved);
    }
}
