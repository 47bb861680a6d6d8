//! # Aether Node CLI
//!
//! Argument parsing, config resolution and the in-process echo workers
//! used when no external execution worker is attached.
//!
//! ## Precedence
//!
//! ```text
//! built-in defaults ◄── --config <file.toml> ◄── command-line overrides
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use aether_chain::bridge::{BridgeHandle, ChannelTransport, CommandKind, ResponseEnvelope};
use aether_chain::config::{load_from_file, KernelConfig};
use aether_chain::ExecutionBridge;

// ════════════════════════════════════════════════════════════════════════════
// ARGUMENTS
// ════════════════════════════════════════════════════════════════════════════

#[derive(Parser, Debug)]
#[command(version, about = "Aether ledger node: admission, contribution consensus and block production")]
pub struct Cli {
    /// TOML config file; missing sections fall back to defaults
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Block production interval in seconds
    #[arg(long, global = true)]
    pub block_time_secs: Option<u64>,

    /// Identity recorded as proposer in produced blocks
    #[arg(long, global = true)]
    pub proposer_id: Option<String>,

    /// Minimum fee (gas_price * gas_limit) accepted by admission
    #[arg(long, global = true)]
    pub min_fee: Option<u64>,

    /// Seed a deterministic entropy source instead of the OS generator
    #[arg(long, global = true)]
    pub entropy_seed: Option<u64>,

    /// Tracing filter, e.g. `info` or `aether_chain=debug,info`
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub cmd: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the kernel until interrupted (default)
    Run {
        /// Attach this many in-process echo workers to the execution bridge
        #[arg(long, default_value_t = 0)]
        local_workers: usize,
    },
    /// Print the effective configuration as TOML and exit
    PrintConfig,
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.cmd.clone().unwrap_or(Commands::Run { local_workers: 0 })
    }

    /// Defaults, then the config file, then flag overrides. The result is
    /// validated.
    pub fn resolve_config(&self) -> Result<KernelConfig> {
        let mut cfg = match &self.config {
            Some(path) => load_from_file(path).with_context(|| format!("loading {}", path.display()))?,
            None => KernelConfig::default(),
        };
        if let Some(secs) = self.block_time_secs {
            cfg.chain.block_time_secs = secs;
        }
        if let Some(id) = &self.proposer_id {
            cfg.chain.proposer_id = id.clone();
        }
        if let Some(fee) = self.min_fee {
            cfg.admission.min_fee = fee;
        }
        if self.entropy_seed.is_some() {
            cfg.consensus.entropy_seed = self.entropy_seed;
        }
        cfg.validate().context("invalid configuration")?;
        Ok(cfg)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// LOCAL WORKERS
// ════════════════════════════════════════════════════════════════════════════

/// Attach `count` echo workers. Each one acknowledges every command with a
/// success response and heartbeats at half the degradation threshold.
pub fn spawn_local_workers(
    count: usize,
    cfg: &KernelConfig,
    transport: &Arc<ChannelTransport>,
    bridge: &Arc<ExecutionBridge>,
    responses: &BridgeHandle,
) -> Vec<JoinHandle<()>> {
    let beat = Duration::from_millis((cfg.bridge.degraded_after_ms / 2).max(100));
    (0..count)
        .map(|i| {
            let id = format!("local-worker-{}", i);
            let mut inbox = transport.attach(&id);
            bridge.announce(&id, "127.0.0.1", 0);
            let bridge = bridge.clone();
            let responses = responses.clone();
            tokio::spawn(async move {
                let mut ticker = interval(beat);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        cmd = inbox.recv() => {
                            let Some(cmd) = cmd else { break };
                            let result = serde_json::json!({
                                "tx": cmd.transaction.hash.to_hex(),
                                "dry_run": cmd.kind == CommandKind::Simulate,
                            });
                            debug!(worker = %id, timestamp = cmd.timestamp, "echoing command");
                            if let Err(e) = responses.respond(ResponseEnvelope::success(id.as_str(), cmd.timestamp, result)).await {
                                warn!(worker = %id, "response not delivered: {}", e);
                                break;
                            }
                        }
                        _ = ticker.tick() => {
                            if !bridge.heartbeat(&id) {
                                info!(worker = %id, "heartbeat ignored, re-announcing");
                                bridge.announce(&id, "127.0.0.1", 0);
                            }
                        }
                    }
                }
            })
        })
        .collect()
}
