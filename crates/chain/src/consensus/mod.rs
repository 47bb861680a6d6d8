//! # Contribution Consensus Engine
//!
//! Entropy-sampling contribution proof used both as an admission gate for
//! transactions and as the block proof.
//!
//! ```text
//!   x (tx hash / header bytes) ──┐
//!                                ├─► h = SHA3-256(x ++ e) ──► h <= T(difficulty) ?
//!   e = EntropySource::sample() ─┘
//!            │
//!            ├─► EnergyMonitor::record(resource_usage)
//!            └─► AnomalyDetector::observe(pattern) ──► AnomalyEvent (broadcast)
//! ```
//!
//! Gate outcomes feed the [`DifficultyController`], which retunes once per
//! window. Anomaly events are a side channel only: they never change a gate
//! or proof outcome.

pub mod anomaly;
pub mod difficulty;
pub mod energy;
pub mod monitor;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::block::PocSolution;
use crate::config::KernelConfig;
use crate::crypto::sha3_256_concat;
use crate::entropy::{EntropySample, EntropySource, SourceHealth};
use crate::error::Result;
use crate::tokenomics::{Distribution, RewardPool, RewardPoolSnapshot};
use crate::types::{Amount, Hash};

pub use anomaly::{AnomalyDetector, AnomalyEvent, AnomalyReason, ComputationalPattern, SecurityResponse};
pub use difficulty::{meets_target, target_top, DifficultyController, Retune};
pub use energy::EnergyMonitor;
pub use monitor::ContributionMonitor;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusSnapshot {
    pub difficulty: f64,
    pub window_fill: usize,
    pub acceptance_rate: Option<f64>,
    pub isolation_level: u8,
    pub energy: EnergyMonitor,
    pub reward_pool: RewardPoolSnapshot,
    pub gated: u64,
    pub gate_accepted: u64,
    pub anomalies: u64,
    pub source_health: SourceHealth,
}

struct ContributionState {
    difficulty: DifficultyController,
    anomaly: AnomalyDetector,
    energy: EnergyMonitor,
    gated: u64,
    gate_accepted: u64,
}

pub struct ProofOfContribution {
    source: Arc<dyn EntropySource>,
    state: RwLock<ContributionState>,
    rewards: RwLock<RewardPool>,
    anomaly_tx: broadcast::Sender<AnomalyEvent>,
    min_difficulty: f64,
}

impl ProofOfContribution {
    pub fn new(cfg: &KernelConfig, source: Arc<dyn EntropySource>) -> Self {
        let (anomaly_tx, _) = broadcast::channel(cfg.anomaly.event_channel.max(1));
        Self {
            source,
            state: RwLock::new(ContributionState {
                difficulty: DifficultyController::new(&cfg.consensus),
                anomaly: AnomalyDetector::new(cfg.anomaly.clone()),
                energy: EnergyMonitor::new(cfg.consensus.baseline_consumption),
                gated: 0,
                gate_accepted: 0,
            }),
            rewards: RwLock::new(RewardPool::new(
                cfg.rewards.initial_pool as Amount,
                cfg.rewards.block_reward as Amount,
            )),
            anomaly_tx,
            min_difficulty: cfg.consensus.min_difficulty,
        }
    }

    /// Draw one sample and feed the energy monitor and anomaly detector.
    fn sample(&self) -> Result<EntropySample> {
        let sample = self.source.sample()?;
        let event = {
            let mut st = self.state.write();
            st.energy.record(sample.resource_usage);
            st.anomaly.observe(ComputationalPattern::from(&sample))
        };
        if let Some(ev) = event {
            warn!(
                level = ev.level,
                severity = ev.severity,
                entropy = ev.pattern.entropy,
                actions = ?ev.actions,
                "entropy anomaly"
            );
            // no subscribers is fine
            let _ = self.anomaly_tx.send(ev);
        }
        Ok(sample)
    }

    pub fn difficulty(&self) -> f64 {
        self.state.read().difficulty.difficulty()
    }

    pub fn min_difficulty(&self) -> f64 {
        self.min_difficulty
    }

    /// Admission gate for one transaction. The outcome counts toward the
    /// current retune window.
    pub fn gate_transaction(&self, tx_hash: &Hash) -> Result<bool> {
        let difficulty = self.difficulty();
        let sample = self.sample()?;
        let h = sha3_256_concat(&[tx_hash.as_bytes(), &sample.bytes]);
        let accepted = meets_target(&h, difficulty);

        let retune = {
            let mut st = self.state.write();
            st.gated += 1;
            if accepted {
                st.gate_accepted += 1;
            }
            st.difficulty.record(accepted)
        };
        if let Some(r) = retune {
            info!(from = r.from, to = r.to, rate = r.observed_rate, "difficulty retuned");
        }
        debug!(tx = %tx_hash.short(), accepted, difficulty, "contribution gate");
        Ok(accepted)
    }

    /// One proof attempt over `proof_input` at `difficulty`.
    pub fn attempt_proof(&self, proof_input: &[u8], difficulty: f64) -> Result<Option<PocSolution>> {
        let sample = self.sample()?;
        let digest = sha3_256_concat(&[proof_input, &sample.bytes]);
        if meets_target(&digest, difficulty) {
            Ok(Some(PocSolution { entropy: Hash::from_bytes(sample.bytes), digest }))
        } else {
            Ok(None)
        }
    }

    /// Recompute the digest from the recorded entropy and check it against
    /// `difficulty`, which may not be below the configured minimum.
    pub fn verify_solution(&self, proof_input: &[u8], solution: &PocSolution, difficulty: f64) -> bool {
        if !(difficulty >= self.min_difficulty) {
            return false;
        }
        let digest = sha3_256_concat(&[proof_input, solution.entropy.as_bytes()]);
        digest == solution.digest && meets_target(&digest, difficulty)
    }

    pub fn subscribe_anomalies(&self) -> broadcast::Receiver<AnomalyEvent> {
        self.anomaly_tx.subscribe()
    }

    pub fn isolation_level(&self) -> u8 {
        self.state.read().anomaly.isolation_level()
    }

    pub fn security_response(&self) -> SecurityResponse {
        self.state.read().anomaly.response().clone()
    }

    pub fn energy(&self) -> EnergyMonitor {
        self.state.read().energy.clone()
    }

    pub fn source_health(&self) -> SourceHealth {
        self.source.health()
    }

    pub fn distribute_rewards(
        &self,
        block_hash: Hash,
        originators: &[String],
        validator: &str,
        fees: Amount,
    ) -> Distribution {
        self.rewards.write().distribute(block_hash, originators, validator, fees)
    }

    pub fn reward_balance(&self, account: &str) -> Amount {
        self.rewards.read().balance(account)
    }

    pub fn reward_pool(&self) -> RewardPoolSnapshot {
        self.rewards.read().snapshot()
    }

    pub fn snapshot(&self) -> ConsensusSnapshot {
        let st = self.state.read();
        ConsensusSnapshot {
            difficulty: st.difficulty.difficulty(),
            window_fill: st.difficulty.window_fill(),
            acceptance_rate: st.difficulty.last_acceptance_rate(),
            isolation_level: st.anomaly.isolation_level(),
            energy: st.energy.clone(),
            reward_pool: self.rewards.read().snapshot(),
            gated: st.gated,
            gate_accepted: st.gate_accepted,
            anomalies: st.anomaly.anomalies_seen(),
            source_health: self.source.health(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::{ConstantEntropySource, SeededEntropySource};

    fn poc_with(cfg: KernelConfig, source: Arc<dyn EntropySource>) -> ProofOfContribution {
        ProofOfContribution::new(&cfg, source)
    }

    #[test]
    fn difficulty_one_accepts_everything() {
        let poc = poc_with(KernelConfig::default(), Arc::new(SeededEntropySource::new(1)));
        for i in 0..50u8 {
            assert!(poc.gate_transaction(&Hash::from_bytes([i; 32])).expect("gate"));
        }
        assert_eq!(poc.snapshot().gate_accepted, 50);
    }

    #[test]
    fn proof_roundtrip_and_tamper() {
        let poc = poc_with(KernelConfig::default(), Arc::new(SeededEntropySource::new(2)));
        let sol = poc.attempt_proof(b"header", 1.0).expect("sample").expect("always meets at 1.0");
        assert!(poc.verify_solution(b"header", &sol, 1.0));
        assert!(!poc.verify_solution(b"other", &sol, 1.0));
        let mut bad = sol.clone();
        bad.entropy = Hash::zero();
        assert!(!poc.verify_solution(b"header", &bad, 1.0));
        // below the configured floor
        assert!(!poc.verify_solution(b"header", &sol, 0.5));
    }

    #[test]
    fn high_difficulty_rejects_most() {
        let mut cfg = KernelConfig::default();
        cfg.consensus.initial_difficulty = 1_000.0;
        cfg.consensus.window_size = 10_000;
        let poc = poc_with(cfg, Arc::new(SeededEntropySource::new(3)));
        let accepted = (0..200u32)
            .filter(|i| {
                let mut b = [0u8; 32];
                b[..4].copy_from_slice(&i.to_be_bytes());
                poc.gate_transaction(&Hash::from_bytes(b)).expect("gate")
            })
            .count();
        assert!(accepted < 10, "accepted {}", accepted);
    }

    #[test]
    fn anomalies_do_not_change_gate_outcome() {
        let poc = poc_with(KernelConfig::default(), Arc::new(ConstantEntropySource(0)));
        let mut rx = poc.subscribe_anomalies();
        assert!(poc.gate_transaction(&Hash::zero()).expect("gate"));
        let ev = rx.try_recv().expect("anomaly event");
        assert_eq!(ev.level, 1);
        assert_eq!(poc.isolation_level(), 1);
    }

    #[test]
    fn rewards_flow_through_pool() {
        let poc = poc_with(KernelConfig::default(), Arc::new(SeededEntropySource::new(4)));
        let d = poc.distribute_rewards(Hash::zero(), &["alice".into()], "val", 0);
        assert_eq!(d.amount, 1_000);
        assert_eq!(poc.reward_balance("alice"), 700);
        assert_eq!(poc.reward_pool().remaining, 999_000);
    }
}
