//! # Aether Node Entry Point
//!
//! ## Initialization Flow
//! 1. Parse arguments and install the tracing subscriber
//! 2. Resolve and validate configuration
//! 3. Build the kernel (crypto, consensus, admission, chain, bridge)
//! 4. Start kernel tasks and optional local workers
//! 5. Wait for Ctrl-C, then shut everything down in order
//!
//! ## Exit Codes
//! Fatal kernel errors (crypto or genesis initialization, invalid config)
//! terminate the process with a non-zero status.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use aether_chain::{Kernel, KernelDeps};

use crate::cli::{spawn_local_workers, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cfg = cli.resolve_config()?;

    let local_workers = match cli.command() {
        Commands::PrintConfig => {
            let rendered = toml::to_string_pretty(&cfg).context("rendering config")?;
            println!("{}", rendered);
            return Ok(());
        }
        Commands::Run { local_workers } => local_workers,
    };

    info!("═══════════════════════════════════════════════════════════════");
    info!("                        Aether Node                             ");
    info!("═══════════════════════════════════════════════════════════════");
    info!("Proposer:     {}", cfg.chain.proposer_id);
    info!("Block time:   {}s", cfg.chain.block_time_secs);
    info!("Min fee:      {}", cfg.admission.min_fee);
    info!("Difficulty:   {}", cfg.consensus.initial_difficulty);
    info!("═══════════════════════════════════════════════════════════════");

    let (deps, transport) = KernelDeps::in_process(&cfg);
    let kernel = Kernel::build(cfg.clone(), deps).context("kernel initialization failed")?;
    let handle = kernel.start();

    let workers = spawn_local_workers(local_workers, &cfg, &transport, handle.bridge(), handle.bridge_handle());
    if !workers.is_empty() {
        info!(count = workers.len(), "local execution workers attached");
    }

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("interrupt received");

    for w in &workers {
        w.abort();
    }
    let tip = handle.chain().snapshot();
    handle.shutdown().await;
    if tip.height == 0 {
        warn!("stopped without producing a block");
    } else {
        info!(height = tip.height, tip = %tip.tip_hash.short(), "final chain tip");
    }
    Ok(())
}
