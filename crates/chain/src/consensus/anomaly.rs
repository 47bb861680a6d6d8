//! Anomaly detection over entropy sampling patterns.
//!
//! Each sample becomes a [`ComputationalPattern`]. A pattern is anomalous
//! when its normalized entropy is below the absolute floor, or (once
//! `min_history` patterns exist) outside `mean +/- band_sigma * sigma` of
//! the recorded history. Anomalies escalate the isolation level and append
//! response actions; they never reject a transaction or block.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::config::AnomalyConfig;
use crate::entropy::EntropySample;

/// Upper bound on retained response actions.
const MAX_ACTIONS: usize = 1_024;

pub const ACTION_QUARANTINE: &str = "quarantine-entropy-source";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputationalPattern {
    pub timestamp: u64,
    pub entropy: f64,
    /// Microseconds.
    pub duration: u64,
    pub resource_usage: f64,
}

impl From<&EntropySample> for ComputationalPattern {
    fn from(s: &EntropySample) -> Self {
        Self {
            timestamp: s.timestamp_ms,
            entropy: s.normalized_entropy(),
            duration: s.duration_us,
            resource_usage: s.resource_usage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnomalyReason {
    BelowFloor { floor: f64 },
    OutsideBand { mean: f64, sigma: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub level: u8,
    pub actions: Vec<String>,
    pub pattern: ComputationalPattern,
    /// 0.0 ..= 1.0
    pub severity: f64,
    pub reason: AnomalyReason,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityResponse {
    pub isolation_level: u8,
    pub response_actions: Vec<String>,
}

impl SecurityResponse {
    fn push_action(&mut self, action: String) {
        if self.response_actions.len() >= MAX_ACTIONS {
            self.response_actions.remove(0);
        }
        self.response_actions.push(action);
    }
}

#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    cfg: AnomalyConfig,
    history: VecDeque<ComputationalPattern>,
    response: SecurityResponse,
    clean_streak: usize,
    anomalies: u64,
}

impl AnomalyDetector {
    pub fn new(cfg: AnomalyConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(cfg.history_size),
            cfg,
            response: SecurityResponse::default(),
            clean_streak: 0,
            anomalies: 0,
        }
    }

    fn band(&self) -> Option<(f64, f64)> {
        if self.history.len() < self.cfg.min_history.max(2) {
            return None;
        }
        let n = self.history.len() as f64;
        let mean = self.history.iter().map(|p| p.entropy).sum::<f64>() / n;
        let var = self.history.iter().map(|p| (p.entropy - mean).powi(2)).sum::<f64>() / n;
        Some((mean, var.sqrt()))
    }

    fn classify(&self, entropy: f64) -> Option<(AnomalyReason, f64)> {
        let floor = self.cfg.entropy_floor;
        if entropy < floor {
            let severity = if floor > 0.0 { (floor - entropy) / floor } else { 1.0 };
            return Some((AnomalyReason::BelowFloor { floor }, severity.clamp(0.0, 1.0)));
        }
        let (mean, sigma) = self.band()?;
        let deviation = (entropy - mean).abs();
        let allowed = self.cfg.band_sigma * sigma;
        if deviation <= allowed.max(1e-9) {
            return None;
        }
        let severity = if allowed > 0.0 { 1.0 - allowed / deviation } else { 1.0 };
        Some((AnomalyReason::OutsideBand { mean, sigma }, severity.clamp(0.0, 1.0)))
    }

    /// Record a pattern and return an event if it was anomalous.
    pub fn observe(&mut self, pattern: ComputationalPattern) -> Option<AnomalyEvent> {
        let verdict = self.classify(pattern.entropy);

        if self.history.len() >= self.cfg.history_size {
            self.history.pop_front();
        }
        self.history.push_back(pattern.clone());

        let (reason, severity) = match verdict {
            Some(v) => v,
            None => {
                self.clean_streak += 1;
                if self.clean_streak >= self.cfg.recovery_window && self.response.isolation_level > 0 {
                    self.response.isolation_level -= 1;
                    self.clean_streak = 0;
                    let action = format!("relax-isolation-{}", self.response.isolation_level);
                    self.response.push_action(action);
                }
                return None;
            }
        };

        self.anomalies += 1;
        self.clean_streak = 0;
        if self.response.isolation_level < self.cfg.max_isolation_level {
            self.response.isolation_level += 1;
        }
        let level = self.response.isolation_level;
        let mut actions = vec![format!("isolate-level-{}", level)];
        if severity >= self.cfg.threat_threshold {
            actions.push(ACTION_QUARANTINE.to_string());
        }
        for a in &actions {
            self.response.push_action(a.clone());
        }

        Some(AnomalyEvent { level, actions, pattern, severity, reason })
    }

    pub fn isolation_level(&self) -> u8 {
        self.response.isolation_level
    }

    pub fn response(&self) -> &SecurityResponse {
        &self.response
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn anomalies_seen(&self) -> u64 {
        self.anomalies
    }
}
