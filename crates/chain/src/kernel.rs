//! # Kernel Composition
//!
//! Wires every component from injected dependencies and spawns the long
//! running tasks.
//!
//! | Task | Input | Output |
//! |------|-------|--------|
//! | admission processor | submission queue | `admitted` broadcast |
//! | block producer | `block_time` tick | appended blocks |
//! | contribution monitor | tick + anomaly broadcast | log |
//! | bridge manager | command / response queues, sweep tick | execution outcomes |
//! | admitted forwarder | `admitted` broadcast | bridge command queue or deferred backlog |
//! | key rotation | `key_rotation_secs` tick | rotated keys |
//!
//! All tasks stop on the shared [`Shutdown`] signal.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::admission::{AdmissionPipeline, AdmissionProcessor, AdmissionResult, AdmittedTx, Submission};
use crate::bridge::{BridgeHandle, BridgeManager, ChannelTransport, CommandKind, ExecutionBridge, WorkerTransport};
use crate::chain::ChainCore;
use crate::config::KernelConfig;
use crate::consensus::{ContributionMonitor, ProofOfContribution};
use crate::crypto::{CryptoFoundation, KemProvider, OpaqueBlobKem};
use crate::entropy::{EntropySource, OsEntropySource, SeededEntropySource};
use crate::error::{KernelError, Result};
use crate::producer::BlockProducer;
use crate::shutdown::Shutdown;
use crate::tx::Transaction;

/// Pluggable collaborators.
#[derive(Clone)]
pub struct KernelDeps {
    pub entropy: Arc<dyn EntropySource>,
    pub kem: Arc<dyn KemProvider>,
    pub transport: Arc<dyn WorkerTransport>,
}

impl KernelDeps {
    /// Default collaborators with an in-process worker transport. The
    /// transport is returned too so workers can be attached to it.
    pub fn in_process(cfg: &KernelConfig) -> (Self, Arc<ChannelTransport>) {
        let entropy: Arc<dyn EntropySource> = match cfg.consensus.entropy_seed {
            Some(seed) => Arc::new(SeededEntropySource::new(seed)),
            None => Arc::new(OsEntropySource::new()),
        };
        let transport = Arc::new(ChannelTransport::new(cfg.bridge.command_queue));
        let deps = Self {
            entropy,
            kem: Arc::new(OpaqueBlobKem),
            transport: transport.clone(),
        };
        (deps, transport)
    }
}

/// Fully wired but not yet running kernel.
pub struct Kernel {
    cfg: KernelConfig,
    crypto: Arc<CryptoFoundation>,
    poc: Arc<ProofOfContribution>,
    admission: Arc<AdmissionPipeline>,
    chain: Arc<ChainCore>,
    bridge: Arc<ExecutionBridge>,
}

impl Kernel {
    /// Validate the config and build every component. Crypto and genesis
    /// failures come back as their fatal error variants.
    pub fn build(cfg: KernelConfig, deps: KernelDeps) -> Result<Self> {
        cfg.validate()?;
        let crypto = Arc::new(CryptoFoundation::initialize(deps.kem)?);
        let poc = Arc::new(ProofOfContribution::new(&cfg, deps.entropy));
        let admission = Arc::new(AdmissionPipeline::new(&cfg, crypto.clone(), poc.clone()));
        let chain = Arc::new(ChainCore::new(cfg.chain.clone(), admission.clone(), poc.clone())?);
        let bridge = Arc::new(ExecutionBridge::new(&cfg.bridge, deps.transport));
        info!(
            proposer = %cfg.chain.proposer_id,
            difficulty = poc.difficulty(),
            "kernel built"
        );
        Ok(Self { cfg, crypto, poc, admission, chain, bridge })
    }

    pub fn crypto(&self) -> &Arc<CryptoFoundation> {
        &self.crypto
    }

    /// Spawn all tasks. Must be called inside a tokio runtime.
    pub fn start(self) -> KernelHandle {
        let shutdown = Arc::new(Shutdown::new());
        let mut tasks = Vec::new();

        let (sub_tx, sub_rx) = mpsc::channel(self.cfg.admission.submission_queue);
        // subscribe before the processor can publish anything
        let admitted = self.admission.subscribe();
        tasks.push(AdmissionProcessor::new(self.admission.clone(), sub_rx, shutdown.clone()).start());

        tasks.push(BlockProducer::new(self.chain.clone(), self.cfg.chain.block_time(), shutdown.clone()).start());

        tasks.push(
            ContributionMonitor::new(
                self.poc.clone(),
                Duration::from_secs(self.cfg.consensus.monitor_interval_secs.max(1)),
                shutdown.clone(),
            )
            .start(),
        );

        let (manager, bridge_handle) = BridgeManager::new(self.bridge.clone(), &self.cfg.bridge, shutdown.clone());
        tasks.push(manager.start());

        tasks.push(spawn_forwarder(
            admitted,
            self.admission.clone(),
            self.bridge.clone(),
            bridge_handle.clone(),
            shutdown.clone(),
        ));

        if self.cfg.crypto.key_rotation_secs > 0 {
            tasks.push(spawn_key_rotation(
                self.crypto.clone(),
                Duration::from_secs(self.cfg.crypto.key_rotation_secs),
                shutdown.clone(),
            ));
        }

        info!(tasks = tasks.len(), "kernel started");
        KernelHandle {
            submissions: sub_tx,
            bridge_handle,
            crypto: self.crypto,
            poc: self.poc,
            admission: self.admission,
            chain: self.chain,
            bridge: self.bridge,
            shutdown,
            tasks,
        }
    }
}

/// Forward admitted commands to the execution bridge.
///
/// Commands no worker can take go to the bridge's deferred backlog, and
/// anything else that cannot be dispatched is published as undelivered.
/// After a broadcast lag the skipped range is recovered from the mempool;
/// transactions already sealed by then are only logged.
fn spawn_forwarder(
    mut admitted: tokio::sync::broadcast::Receiver<AdmittedTx>,
    admission: Arc<AdmissionPipeline>,
    bridge: Arc<ExecutionBridge>,
    handle: BridgeHandle,
    shutdown: Arc<Shutdown>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("admitted-command forwarder started");
        let mut next_seq: u64 = 0;
        let mut lagged = false;
        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    info!("forwarder shutting down");
                    break;
                }
                msg = admitted.recv() => match msg {
                    Ok(entry) => {
                        let mut batch = Vec::new();
                        if lagged {
                            lagged = false;
                            let recovered = admission.pending_between(next_seq, entry.seq);
                            info!(
                                missed = entry.seq.saturating_sub(next_seq),
                                recovered = recovered.len(),
                                "forwarder recovered lagged transactions from mempool"
                            );
                            batch.extend(recovered.into_iter().map(|m| m.tx));
                        }
                        next_seq = entry.seq + 1;
                        batch.push(entry.tx);

                        let mut open = true;
                        for tx in batch {
                            if !forward(&bridge, &handle, tx).await {
                                open = false;
                                break;
                            }
                        }
                        if !open {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!("forwarder lagged, {} admitted transactions skipped", n);
                        lagged = true;
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    })
}

/// Dispatch one admitted command. Returns `false` once the bridge manager
/// is gone.
async fn forward(bridge: &ExecutionBridge, handle: &BridgeHandle, tx: Transaction) -> bool {
    if !tx.requires_execution() {
        return true;
    }
    let hash = tx.hash;
    if bridge.deferred_len() > 0 {
        // stay behind the backlog so workers see admission order
        bridge.defer(CommandKind::Execute, tx);
        return true;
    }
    match handle.dispatch(CommandKind::Execute, tx.clone()).await {
        Ok(ticket) => debug!(tx = %hash.short(), worker = %ticket.worker_id, "forwarded to worker"),
        Err(KernelError::ShuttingDown) => return false,
        Err(e @ (KernelError::NoAvailableWorker | KernelError::PoolFull(_))) => {
            debug!(tx = %hash.short(), reason = e.reason_code(), "no worker can take the command yet");
            bridge.defer(CommandKind::Execute, tx);
        }
        Err(e) => {
            bridge.fail_undelivered(hash, e.to_string());
        }
    }
    true
}

fn spawn_key_rotation(crypto: Arc<CryptoFoundation>, every: Duration, shutdown: Arc<Shutdown>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {
                    if let Err(e) = crypto.rotate_keys() {
                        error!("key rotation failed: {}", e);
                    }
                }
            }
        }
    })
}

/// Running kernel.
pub struct KernelHandle {
    submissions: mpsc::Sender<Submission>,
    bridge_handle: BridgeHandle,
    crypto: Arc<CryptoFoundation>,
    poc: Arc<ProofOfContribution>,
    admission: Arc<AdmissionPipeline>,
    chain: Arc<ChainCore>,
    bridge: Arc<ExecutionBridge>,
    shutdown: Arc<Shutdown>,
    tasks: Vec<JoinHandle<()>>,
}

impl KernelHandle {
    /// Queue a transaction, waiting for queue capacity, and await the verdict.
    pub async fn submit(&self, tx: Transaction) -> AdmissionResult {
        let (reply, rx) = oneshot::channel();
        self.submissions
            .send(Submission { tx, reply })
            .await
            .map_err(|_| KernelError::ShuttingDown)?;
        rx.await.map_err(|_| KernelError::ShuttingDown)?
    }

    /// Like [`submit`](Self::submit) but fails with `PoolFull` instead of
    /// waiting when the submission queue is full.
    pub async fn try_submit(&self, tx: Transaction) -> AdmissionResult {
        let (reply, rx) = oneshot::channel();
        self.submissions.try_send(Submission { tx, reply }).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => KernelError::PoolFull("submission queue".to_string()),
            mpsc::error::TrySendError::Closed(_) => KernelError::ShuttingDown,
        })?;
        rx.await.map_err(|_| KernelError::ShuttingDown)?
    }

    pub fn crypto(&self) -> &Arc<CryptoFoundation> {
        &self.crypto
    }

    pub fn consensus(&self) -> &Arc<ProofOfContribution> {
        &self.poc
    }

    pub fn admission(&self) -> &Arc<AdmissionPipeline> {
        &self.admission
    }

    pub fn chain(&self) -> &Arc<ChainCore> {
        &self.chain
    }

    pub fn bridge(&self) -> &Arc<ExecutionBridge> {
        &self.bridge
    }

    /// Queue side of the bridge manager, used by workers to deliver responses.
    pub fn bridge_handle(&self) -> &BridgeHandle {
        &self.bridge_handle
    }

    /// Signal every task and wait for them to finish.
    pub async fn shutdown(self) {
        info!("kernel shutting down");
        self.shutdown.trigger();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("task ended abnormally: {}", e);
            }
        }
        info!("kernel stopped");
    }
}
