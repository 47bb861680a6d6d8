//! Typed kernel configuration loaded from TOML.
//!
//! Every section has `#[serde(default)]`, so a file only needs the keys it
//! overrides. `validate()` rejects combinations the components cannot run
//! with; it is called by [`crate::kernel::Kernel::build`].

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{KernelError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Minimum `gas_price * gas_limit`.
    pub min_fee: u64,
    pub mempool_capacity: usize,
    /// Bounded submission queue in front of the admission processor.
    pub submission_queue: usize,
    /// Capacity of the `admitted` broadcast channel.
    pub admitted_channel: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            min_fee: 1_000,
            mempool_capacity: 100_000,
            submission_queue: 1_000,
            admitted_channel: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub initial_difficulty: f64,
    pub min_difficulty: f64,
    pub max_difficulty: f64,
    /// Outcomes per retune window.
    pub window_size: usize,
    pub target_acceptance_rate: f64,
    pub tolerance: f64,
    /// Largest relative change per retune (0.25 = at most x1.25 or /1.25).
    pub max_step: f64,
    /// Use a ChaCha stream with this seed instead of the OS RNG.
    pub entropy_seed: Option<u64>,
    pub baseline_consumption: f64,
    pub monitor_interval_secs: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            initial_difficulty: 1.0,
            min_difficulty: 1.0,
            max_difficulty: 1_000_000.0,
            window_size: 201,
            target_acceptance_rate: 0.5,
            tolerance: 0.05,
            max_step: 0.25,
            entropy_seed: None,
            baseline_consumption: 100.0,
            monitor_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub history_size: usize,
    pub min_history: usize,
    pub band_sigma: f64,
    pub entropy_floor: f64,
    pub threat_threshold: f64,
    pub max_isolation_level: u8,
    /// Consecutive clean samples before isolation drops one level.
    pub recovery_window: usize,
    pub event_channel: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            history_size: 1_000,
            min_history: 32,
            band_sigma: 4.0,
            entropy_floor: 0.1,
            threat_threshold: 0.95,
            max_isolation_level: 5,
            recovery_window: 201,
            event_channel: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardsConfig {
    pub initial_pool: u64,
    pub block_reward: u64,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            initial_pool: 1_000_000,
            block_reward: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub block_time_secs: u64,
    pub max_block_txs: usize,
    pub max_block_gas: u64,
    pub proof_max_attempts: u64,
    pub proof_time_budget_ms: u64,
    pub skip_empty_blocks: bool,
    pub proposer_id: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            block_time_secs: 60,
            max_block_txs: 1_000,
            max_block_gas: 30_000_000,
            proof_max_attempts: 1_000_000,
            proof_time_budget_ms: 5_000,
            skip_empty_blocks: true,
            proposer_id: "kernel".to_string(),
        }
    }
}

impl ChainConfig {
    pub fn block_time(&self) -> Duration {
        Duration::from_secs(self.block_time_secs)
    }

    pub fn proof_time_budget(&self) -> Duration {
        Duration::from_millis(self.proof_time_budget_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub command_queue: usize,
    pub response_queue: usize,
    pub max_pending: usize,
    pub request_timeout_ms: u64,
    pub degraded_after_ms: u64,
    pub liveness_timeout_ms: u64,
    pub removal_after_ms: u64,
    pub sweep_interval_ms: u64,
    pub outcome_channel: usize,
    /// Admitted commands held while no worker can take them. 0 turns every
    /// such command into an immediate failed outcome.
    pub max_deferred: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command_queue: 100,
            response_queue: 100,
            max_pending: 1_000,
            request_timeout_ms: 30_000,
            degraded_after_ms: 10_000,
            liveness_timeout_ms: 30_000,
            removal_after_ms: 300_000,
            sweep_interval_ms: 10_000,
            outcome_channel: 256,
            max_deferred: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// 0 disables periodic rotation.
    pub key_rotation_secs: u64,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self { key_rotation_secs: 24 * 60 * 60 }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub admission: AdmissionConfig,
    pub consensus: ConsensusConfig,
    pub anomaly: AnomalyConfig,
    pub rewards: RewardsConfig,
    pub chain: ChainConfig,
    pub bridge: BridgeConfig,
    pub crypto: CryptoConfig,
}

impl KernelConfig {
    pub fn validate(&self) -> Result<()> {
        let c = &self.consensus;
        if !(c.min_difficulty >= 1.0) {
            return Err(KernelError::Config("consensus.min_difficulty must be >= 1.0".into()));
        }
        if !(c.max_difficulty >= c.min_difficulty) {
            return Err(KernelError::Config("consensus.max_difficulty below min_difficulty".into()));
        }
        if !(c.initial_difficulty >= c.min_difficulty && c.initial_difficulty <= c.max_difficulty) {
            return Err(KernelError::Config("consensus.initial_difficulty out of bounds".into()));
        }
        if c.window_size == 0 {
            return Err(KernelError::Config("consensus.window_size must be > 0".into()));
        }
        if !(c.target_acceptance_rate > 0.0 && c.target_acceptance_rate <= 1.0) {
            return Err(KernelError::Config("consensus.target_acceptance_rate must be in (0, 1]".into()));
        }
        if !(c.max_step > 0.0) || !(c.tolerance >= 0.0) {
            return Err(KernelError::Config("consensus.max_step and tolerance must be positive".into()));
        }

        let a = &self.anomaly;
        if a.history_size == 0 || a.min_history > a.history_size {
            return Err(KernelError::Config("anomaly.min_history must fit in history_size".into()));
        }

        for (name, v) in [
            ("admission.mempool_capacity", self.admission.mempool_capacity),
            ("admission.submission_queue", self.admission.submission_queue),
            ("admission.admitted_channel", self.admission.admitted_channel),
            ("anomaly.event_channel", a.event_channel),
            ("bridge.command_queue", self.bridge.command_queue),
            ("bridge.response_queue", self.bridge.response_queue),
            ("bridge.max_pending", self.bridge.max_pending),
            ("bridge.outcome_channel", self.bridge.outcome_channel),
            ("chain.max_block_txs", self.chain.max_block_txs),
        ] {
            if v == 0 {
                return Err(KernelError::Config(format!("{} must be > 0", name)));
            }
        }

        let b = &self.bridge;
        if !(b.degraded_after_ms <= b.liveness_timeout_ms && b.liveness_timeout_ms <= b.removal_after_ms) {
            return Err(KernelError::Config(
                "bridge timeouts must satisfy degraded_after <= liveness_timeout <= removal_after".into(),
            ));
        }
        if self.chain.block_time_secs == 0 || self.chain.proof_max_attempts == 0 {
            return Err(KernelError::Config("chain.block_time_secs and proof_max_attempts must be > 0".into()));
        }
        if self.chain.max_block_gas == 0 {
            return Err(KernelError::Config("chain.max_block_gas must be > 0".into()));
        }
        Ok(())
    }
}

/// Load and validate a config from a TOML file path.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<KernelConfig> {
    let p = path.as_ref();
    let s = fs::read_to_string(p)
        .map_err(|e| KernelError::Config(format!("read {}: {}", p.display(), e)))?;
    let cfg: KernelConfig =
        toml::from_str(&s).map_err(|e| KernelError::Config(format!("parse {}: {}", p.display(), e)))?;
    cfg.validate()?;
    Ok(cfg)
}
