//! Gate target arithmetic and windowed difficulty retuning.
use serde::{Deserialize, Serialize};

use crate::config::ConsensusConfig;
use crate::types::Hash;

/// Top 64 bits of the 256-bit target `T(d) = floor((2^64-1)/d) * 2^192 + (2^192-1)`.
/// The low 192 bits of `T` are all ones, so `h <= T` reduces to comparing
/// the leading 64 bits of `h` against this value.
pub fn target_top(difficulty: f64) -> u64 {
    if !(difficulty > 1.0) {
        return u64::MAX;
    }
    let top = (u64::MAX as f64 / difficulty).floor();
    if top >= u64::MAX as f64 {
        u64::MAX
    } else {
        top as u64
    }
}

/// `h <= T(difficulty)`. Difficulty 1.0 accepts every hash.
pub fn meets_target(h: &Hash, difficulty: f64) -> bool {
    h.leading_u64() <= target_top(difficulty)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Retune {
    pub from: f64,
    pub to: f64,
    pub observed_rate: f64,
}

#[derive(Debug, Clone)]
pub struct DifficultyController {
    difficulty: f64,
    min: f64,
    max: f64,
    window_size: usize,
    target_rate: f64,
    tolerance: f64,
    max_step: f64,
    accepted: usize,
    observed: usize,
    last_rate: Option<f64>,
    retunes: u64,
}

impl DifficultyController {
    pub fn new(cfg: &ConsensusConfig) -> Self {
        Self {
            difficulty: cfg.initial_difficulty.clamp(cfg.min_difficulty, cfg.max_difficulty),
            min: cfg.min_difficulty,
            max: cfg.max_difficulty,
            window_size: cfg.window_size.max(1),
            target_rate: cfg.target_acceptance_rate,
            tolerance: cfg.tolerance,
            max_step: cfg.max_step,
            accepted: 0,
            observed: 0,
            last_rate: None,
            retunes: 0,
        }
    }

    pub fn difficulty(&self) -> f64 {
        self.difficulty
    }

    /// Outcomes recorded in the current (incomplete) window.
    pub fn window_fill(&self) -> usize {
        self.observed
    }

    /// Acceptance rate of the last completed window.
    pub fn last_acceptance_rate(&self) -> Option<f64> {
        self.last_rate
    }

    pub fn retunes(&self) -> u64 {
        self.retunes
    }

    /// Record one gate outcome. Closing a window may move the difficulty,
    /// in which case the change is returned.
    pub fn record(&mut self, accepted: bool) -> Option<Retune> {
        self.observed += 1;
        if accepted {
            self.accepted += 1;
        }
        if self.observed < self.window_size {
            return None;
        }

        let rate = self.accepted as f64 / self.observed as f64;
        self.accepted = 0;
        self.observed = 0;
        self.last_rate = Some(rate);

        if (rate - self.target_rate).abs() <= self.tolerance {
            return None;
        }
        let cap = 1.0 + self.max_step;
        let from = self.difficulty;
        let next = if rate > self.target_rate {
            from * (rate / self.target_rate).min(cap)
        } else {
            let ratio = self.target_rate / rate.max(f64::EPSILON);
            from / ratio.min(cap)
        };
        self.difficulty = next.clamp(self.min, self.max);
        if self.difficulty == from {
            return None;
        }
        self.retunes += 1;
        Some(Retune { from, to: self.difficulty, observed_rate: rate })
    }
}
