//! Running diagnostics for training runs and helpers for replicated bound estimates.

use ndarray::prelude::*;
use ndarray_stats::QuantileExt;
use std::collections::VecDeque;

/// Number of recent iterations the acceptance rate is averaged over.
pub const ACCEPTANCE_WINDOW: usize = 100;

/// Tracks the bound across training iterations: running mean and variance over all
/// iterations, plus a sliding window of acceptance rates.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundTracker {
    n: u64,
    mean: f64,
    mean_sq: f64,
    best: Option<f64>,
    accept_window: VecDeque<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundStats {
    pub n: u64,
    pub mean: f64,
    /// Sample variance of the tracked bounds; zero until two values were seen.
    pub variance: f64,
    pub best: Option<f64>,
    /// Mean acceptance rate over the window; `None` if no step accepted or rejected anything.
    pub acceptance_rate: Option<f64>,
}

impl Default for BoundTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundTracker {
    pub fn new() -> Self {
        Self {
            n: 0,
            mean: 0.0,
            mean_sq: 0.0,
            best: None,
            accept_window: VecDeque::with_capacity(ACCEPTANCE_WINDOW),
        }
    }

    /// Records one iteration.
    pub fn step(&mut self, bound: f64, acceptance_rate: Option<f64>) {
        self.n += 1;
        let n = self.n as f64;
        self.mean = (self.mean * (n - 1.0) + bound) / n;
        self.mean_sq = (self.mean_sq * (n - 1.0) + bound * bound) / n;
        self.best = Some(self.best.map_or(bound, |best| best.max(bound)));

        if let Some(rate) = acceptance_rate {
            self.accept_window.push_front(rate);
            if self.accept_window.len() > ACCEPTANCE_WINDOW {
                self.accept_window.pop_back();
            }
        }
    }

    pub fn acceptance_rate(&self) -> Option<f64> {
        if self.accept_window.is_empty() {
            return None;
        }
        Some(self.accept_window.iter().sum::<f64>() / self.accept_window.len() as f64)
    }

    pub fn stats(&self) -> BoundStats {
        let n = self.n as f64;
        let variance = if self.n > 1 {
            ((self.mean_sq - self.mean * self.mean) * n / (n - 1.0)).max(0.0)
        } else {
            0.0
        };
        BoundStats {
            n: self.n,
            mean: self.mean,
            variance,
            best: self.best,
            acceptance_rate: self.acceptance_rate(),
        }
    }
}

/// `log (1/n) Σ exp(v_i)` of independent log-estimates, shifted by their maximum.
///
/// Returns `None` for an empty slice or one containing NaN.
pub fn log_mean_exp(values: &[f64]) -> Option<f64> {
    let values = ArrayView1::from(values);
    let max = *values.max().ok()?;
    if max.is_infinite() {
        return Some(max);
    }
    let sum = values.mapv(|v| (v - max).exp()).sum();
    Some(max + (sum / values.len() as f64).ln())
}

/// Mean and standard error of replicated estimates.
pub fn mean_and_std_error(values: &[f64]) -> Option<(f64, f64)> {
    let values = ArrayView1::from(values);
    let mean = values.mean()?;
    if values.len() < 2 {
        return Some((mean, 0.0));
    }
    let std = values.std(1.0);
    Some((mean, std / (values.len() as f64).sqrt()))
}

/// Largest per-epoch bound so far, `None` if `bounds` is empty or unordered.
pub fn best_bound(bounds: &[f64]) -> Option<f64> {
    ArrayView1::from(bounds).max().ok().copied()
}
