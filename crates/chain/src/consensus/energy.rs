use serde::{Deserialize, Serialize};

/// Smoothing factor for the moving average of per-sample usage.
const USAGE_ALPHA: f64 = 0.1;

/// Tracks resource usage of entropy sampling against a baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyMonitor {
    pub current_usage: f64,
    /// 1.0 when usage is negligible against the baseline, 0.0 at or above it.
    pub efficiency_score: f64,
    pub baseline_consumption: f64,
    pub samples: u64,
}

impl EnergyMonitor {
    pub fn new(baseline_consumption: f64) -> Self {
        Self {
            current_usage: 0.0,
            efficiency_score: 1.0,
            baseline_consumption,
            samples: 0,
        }
    }

    pub fn record(&mut self, resource_usage: f64) {
        let usage = if resource_usage.is_finite() { resource_usage.max(0.0) } else { 0.0 };
        self.current_usage = if self.samples == 0 {
            usage
        } else {
            USAGE_ALPHA * usage + (1.0 - USAGE_ALPHA) * self.current_usage
        };
        self.samples += 1;
        self.efficiency_score = if self.baseline_consumption > 0.0 {
            (1.0 - self.current_usage / self.baseline_consumption).clamp(0.0, 1.0)
        } else {
            0.0
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn efficiency_tracks_usage() {
        let mut m = EnergyMonitor::new(100.0);
        assert_eq!(m.efficiency_score, 1.0);
        m.record(10.0);
        assert_eq!(m.current_usage, 10.0);
        assert!((m.efficiency_score - 0.9).abs() < 1e-9);
        for _ in 0..200 {
            m.record(500.0);
        }
        assert_eq!(m.efficiency_score, 0.0);
        m.record(f64::NAN);
        assert!(m.current_usage.is_finite());
    }
}
