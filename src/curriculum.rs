//! Warm-up schedule for stacked training: plain variational inference first, the annealed
//! sampler afterwards.

use crate::config::InferenceEngine;
use log::info;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurriculumMode {
    /// Train with the plain proposal.
    Simple,
    /// Train with the configured annealed engine.
    Annealed,
}

impl CurriculumMode {
    /// Engine to run in this mode, given the engine selected by the configuration.
    pub fn engine(&self, configured: InferenceEngine) -> InferenceEngine {
        match self {
            CurriculumMode::Simple => InferenceEngine::Plain,
            CurriculumMode::Annealed => configured,
        }
    }
}

impl fmt::Display for CurriculumMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurriculumMode::Simple => write!(f, "simple"),
            CurriculumMode::Annealed => write!(f, "annealed"),
        }
    }
}

/// Counts training iterations and switches from [`CurriculumMode::Simple`] to
/// [`CurriculumMode::Annealed`] once, at `boundary`. The switch never reverts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Curriculum {
    boundary: usize,
    iteration: usize,
    mode: CurriculumMode,
    switched_at: Option<usize>,
}

impl Curriculum {
    pub fn new(boundary: usize) -> Self {
        let (mode, switched_at) = if boundary == 0 {
            (CurriculumMode::Annealed, Some(0))
        } else {
            (CurriculumMode::Simple, None)
        };
        Self {
            boundary,
            iteration: 0,
            mode,
            switched_at,
        }
    }

    /// Mode of the current iteration; moves on to the next one.
    pub fn advance(&mut self) -> CurriculumMode {
        if self.mode == CurriculumMode::Simple && self.iteration >= self.boundary {
            self.mode = CurriculumMode::Annealed;
            self.switched_at = Some(self.iteration);
            info!(
                "Curriculum switched to annealed inference at iteration {}",
                self.iteration
            );
        }
        self.iteration += 1;
        self.mode
    }

    pub fn mode(&self) -> CurriculumMode {
        self.mode
    }

    /// Iterations consumed so far.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn boundary(&self) -> usize {
        self.boundary
    }

    /// Iteration at which annealing took over, if it has.
    pub fn switched_at(&self) -> Option<usize> {
        self.switched_at
    }
}
