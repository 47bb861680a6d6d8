use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{info, warn};

use super::ProofOfContribution;
use crate::shutdown::Shutdown;

/// Background task that periodically logs consensus state and relays
/// anomaly events to the log.
pub struct ContributionMonitor {
    poc: Arc<ProofOfContribution>,
    interval: Duration,
    shutdown: Arc<Shutdown>,
}

impl ContributionMonitor {
    pub fn new(poc: Arc<ProofOfContribution>, interval: Duration, shutdown: Arc<Shutdown>) -> Self {
        Self { poc, interval, shutdown }
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("contribution monitor started: reporting every {:?}", self.interval);
            let mut anomalies = self.poc.subscribe_anomalies();
            let mut ticker = interval(self.interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = self.shutdown.wait() => {
                        info!("contribution monitor shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let snap = self.poc.snapshot();
                        info!(
                            difficulty = snap.difficulty,
                            window_fill = snap.window_fill,
                            acceptance_rate = ?snap.acceptance_rate,
                            isolation_level = snap.isolation_level,
                            efficiency = snap.energy.efficiency_score,
                            pool_remaining = %snap.reward_pool.remaining,
                            "contribution status"
                        );
                    }
                    ev = anomalies.recv() => match ev {
                        Ok(ev) => warn!(
                            level = ev.level,
                            severity = ev.severity,
                            reason = ?ev.reason,
                            "isolation escalated"
                        ),
                        Err(RecvError::Lagged(n)) => warn!("monitor lagged, {} anomaly events dropped", n),
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    }
}
