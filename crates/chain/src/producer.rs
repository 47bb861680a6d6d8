use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::chain::{ChainCore, RoundOutcome};
use crate::shutdown::Shutdown;

/// Fixed-cadence block production. Each tick runs one round on the blocking
/// pool since proof search is CPU-bound.
pub struct BlockProducer {
    chain: Arc<ChainCore>,
    block_time: Duration,
    shutdown: Arc<Shutdown>,
}

impl BlockProducer {
    pub fn new(chain: Arc<ChainCore>, block_time: Duration, shutdown: Arc<Shutdown>) -> Self {
        Self { chain, block_time, shutdown }
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("block producer started: one round every {:?}", self.block_time);
            let mut ticker = interval(self.block_time.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick fires immediately; production starts one period in
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = self.shutdown.wait() => {
                        info!("block producer shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let chain = self.chain.clone();
                        match tokio::task::spawn_blocking(move || chain.produce_once()).await {
                            Ok(RoundOutcome::Appended(r)) => debug!(height = r.height, "round appended block"),
                            Ok(RoundOutcome::Skipped(reason)) => debug!(?reason, "round skipped"),
                            Ok(RoundOutcome::Rejected(e)) => debug!(reason = e.reason_code(), "round rejected"),
                            Err(e) => error!("production round panicked: {}", e),
                        }
                    }
                }
            }
        })
    }
}
