//! A minimal training driver: Adam over all parameters, one pass over the batches per epoch.

use crate::error::{ensure_finite, AisError};
use crate::stats::BoundTracker;
use crate::vae::{AisVae, TrainingState};
use burn::config::Config;
use burn::module::{ModuleVisitor, ParamId};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use std::marker::PhantomData;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

#[derive(Config, Debug)]
pub struct TrainingConfig {
    #[config(default = 10)]
    pub epochs: usize,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    /// Chains per data point when estimating the validation bound.
    #[config(default = 256)]
    pub eval_samples: usize,
}

/// What one epoch produced.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochSummary {
    pub epoch: usize,
    /// Mean training bound over the epoch's batches.
    pub train_bound: f64,
    pub acceptance_rate: Option<f64>,
    pub validation_bound: Option<f64>,
}

struct GradientCheck<'a, B: AutodiffBackend> {
    grads: &'a GradientsParams,
    iteration: usize,
    result: crate::error::Result<()>,
    backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradientCheck<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if self.result.is_err() {
            return;
        }
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            self.result = ensure_finite(&grad, "gradient", self.iteration);
        }
    }
}

/// Fails with [`AisError::NonFinite`] if any parameter of `module` has a NaN or infinite
/// gradient in `grads`. The reported step is the training `iteration`.
pub fn check_gradients<B: AutodiffBackend, M: Module<B>>(
    module: &M,
    grads: &GradientsParams,
    iteration: usize,
) -> crate::error::Result<()> {
    let mut check = GradientCheck {
        grads,
        iteration,
        result: Ok(()),
        backend: PhantomData::<B>,
    };
    module.visit(&mut check);
    check.result
}

/// Trains `model` on `batches` for `config.epochs` epochs.
///
/// `state` carries the curriculum and the random generator across calls, so training can
/// be resumed by calling `fit` again. Any step failing with an error aborts the run, and so
/// does a non-finite parameter gradient, before the optimizer sees it.
pub fn fit<B: AutodiffBackend>(
    mut model: AisVae<B>,
    batches: &[Tensor<B, 4>],
    validation: Option<&Tensor<B, 4>>,
    state: &mut TrainingState,
    config: &TrainingConfig,
) -> crate::error::Result<(AisVae<B>, Vec<EpochSummary>)> {
    if batches.is_empty() {
        return Err(AisError::Config("training needs at least one batch".into()));
    }
    let mut optim = AdamConfig::new().init();
    let mut history = Vec::with_capacity(config.epochs);

    let pb = ProgressBar::new((config.epochs * batches.len()) as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{prefix:8} {bar:40.white} ETA {eta:3} | {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb.set_prefix("Training");

    for epoch in 0..config.epochs {
        let mut tracker = BoundTracker::new();
        for x in batches {
            let step = model.training_step(x.clone(), state)?;
            tracker.step(step.bound, step.acceptance_rate);

            let grads = GradientsParams::from_grads(step.loss.backward(), &model);
            check_gradients(&model, &grads, state.curriculum.iteration())?;
            model = optim.step(config.learning_rate, model, grads);

            pb.inc(1);
            let accept = tracker
                .acceptance_rate()
                .map_or_else(|| "-".to_string(), |a| format!("{a:.2}"));
            pb.set_message(format!(
                "bound≈{:.2} p(accept)≈{accept} mode={}",
                tracker.stats().mean,
                step.mode
            ));
        }

        let validation_bound = match validation {
            Some(x) => Some(model.evaluate(x.clone(), config.eval_samples, &mut state.rng)?),
            None => None,
        };
        let stats = tracker.stats();
        info!(
            "epoch {}: train bound {:.3} (sd {:.3}), validation bound {:?}, acceptance {:?}",
            epoch + 1,
            stats.mean,
            stats.variance.sqrt(),
            validation_bound,
            stats.acceptance_rate
        );
        history.push(EpochSummary {
            epoch,
            train_bound: stats.mean,
            acceptance_rate: stats.acceptance_rate,
            validation_bound,
        });
    }
    pb.finish_with_message("Done!");
    Ok((model, history))
}
