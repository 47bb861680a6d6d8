//! # Execution Bridge
//!
//! Forwards admitted commands to external execution workers and correlates
//! their asynchronous responses.
//!
//! ```text
//!   dispatch(kind, tx)
//!        │ select_lru() among Connected workers
//!        ▼
//!   pending[(worker_id, timestamp)] ──► WorkerTransport::send(CommandEnvelope)
//!        ▲
//!        │ on_response(ResponseEnvelope)   expire_requests(now)
//!        └──────────────► ExecutionOutcome ──► ticket + outcome broadcast
//! ```
//!
//! | Failure | Error |
//! |---------|-------|
//! | no connected worker | `NoAvailableWorker` |
//! | pending table full | `PoolFull` |
//! | response breaks the wire contract | `InvalidEnvelope` |
//! | response with no matching request | `UnknownRequest` |
//! | request outlives `request_timeout` or its worker is lost | `WorkerTimeout` (as `ExecutionStatus::TimedOut`) |
//!
//! Admitted commands that no worker can take right now (`NoAvailableWorker`,
//! `PoolFull`) wait in a bounded backlog. The backlog drains in order when a
//! worker announces itself, after each response and on every sweep tick. A
//! command that does not fit in the backlog, or fails for any other reason,
//! is published as `ExecutionStatus::Undelivered`.
//!
//! The manager never awaits the transport: each dispatch runs as its own
//! task, so responses, sweeps and expiry keep flowing while a worker's inbox
//! is full.

pub mod envelope;
pub mod registry;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::{KernelError, Result};
use crate::shutdown::Shutdown;
use crate::tx::Transaction;
use crate::types::{now_ms, Hash};

pub use envelope::{
    CommandEnvelope, CommandKind, CorrelationKey, ExecutionOutcome, ExecutionStatus, ResponseEnvelope,
};
pub use registry::{NodeConnection, NodeRegistry, NodeStatus, SweepReport};

// ════════════════════════════════════════════════════════════════════════════
// TRANSPORT
// ════════════════════════════════════════════════════════════════════════════

/// Carries a command envelope to one worker.
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    async fn send(&self, node: &NodeConnection, envelope: CommandEnvelope) -> Result<()>;
}

/// In-process transport: each attached worker owns the receiving half of a
/// bounded channel. A full inbox is reported as `PoolFull` instead of
/// waiting for the worker to catch up.
pub struct ChannelTransport {
    capacity: usize,
    workers: RwLock<HashMap<String, mpsc::Sender<CommandEnvelope>>>,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), workers: RwLock::new(HashMap::new()) }
    }

    /// Attach a worker; replaces any previous channel for the same id.
    pub fn attach(&self, worker_id: &str) -> mpsc::Receiver<CommandEnvelope> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.workers.write().insert(worker_id.to_string(), tx);
        rx
    }

    pub fn detach(&self, worker_id: &str) -> bool {
        self.workers.write().remove(worker_id).is_some()
    }
}

#[async_trait]
impl WorkerTransport for ChannelTransport {
    async fn send(&self, node: &NodeConnection, envelope: CommandEnvelope) -> Result<()> {
        let sender = self
            .workers
            .read()
            .get(&node.id)
            .cloned()
            .ok_or_else(|| KernelError::Transport(format!("worker {} not attached", node.id)))?;
        sender.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => KernelError::PoolFull(format!("worker {} inbox", node.id)),
            mpsc::error::TrySendError::Closed(_) => KernelError::Transport(format!("worker {} channel closed", node.id)),
        })
    }
}

// ════════════════════════════════════════════════════════════════════════════
// BRIDGE
// ════════════════════════════════════════════════════════════════════════════

/// Handle returned by a successful dispatch.
#[derive(Debug)]
pub struct DispatchTicket {
    pub key: CorrelationKey,
    pub worker_id: String,
    pub outcome: oneshot::Receiver<ExecutionOutcome>,
}

struct PendingRequest {
    tx_hash: Hash,
    dispatched_at: u64,
    reply: oneshot::Sender<ExecutionOutcome>,
}

struct DeferredCommand {
    kind: CommandKind,
    transaction: Transaction,
}

pub struct ExecutionBridge {
    registry: RwLock<NodeRegistry>,
    pending: Mutex<HashMap<CorrelationKey, PendingRequest>>,
    transport: Arc<dyn WorkerTransport>,
    max_pending: usize,
    request_timeout_ms: u64,
    last_timestamp: Mutex<u64>,
    outcomes: broadcast::Sender<ExecutionOutcome>,
    deferred: Mutex<VecDeque<DeferredCommand>>,
    max_deferred: usize,
    /// Held by the one task draining the backlog.
    draining: tokio::sync::Mutex<()>,
    wake: Notify,
}

impl ExecutionBridge {
    pub fn new(cfg: &BridgeConfig, transport: Arc<dyn WorkerTransport>) -> Self {
        let (outcomes, _) = broadcast::channel(cfg.outcome_channel.max(1));
        Self {
            registry: RwLock::new(NodeRegistry::new(cfg)),
            pending: Mutex::new(HashMap::new()),
            transport,
            max_pending: cfg.max_pending,
            request_timeout_ms: cfg.request_timeout_ms,
            last_timestamp: Mutex::new(0),
            outcomes,
            deferred: Mutex::new(VecDeque::new()),
            max_deferred: cfg.max_deferred,
            draining: tokio::sync::Mutex::new(()),
            wake: Notify::new(),
        }
    }

    pub fn announce(&self, id: &str, address: &str, port: u16) {
        if self.registry.write().announce(id, address, port, now_ms()) {
            info!(worker = id, address, port, "execution worker connected");
            self.wake.notify_one();
        }
    }

    pub fn heartbeat(&self, id: &str) -> bool {
        self.registry.write().heartbeat(id, now_ms())
    }

    /// Apply liveness thresholds, then fail requests whose worker is gone.
    pub fn sweep(&self, now: u64) -> SweepReport {
        let report = self.registry.write().sweep(now);
        for id in &report.degraded {
            warn!(worker = %id, "execution worker degraded");
        }
        for id in &report.lost {
            warn!(worker = %id, "execution worker lost");
        }
        for id in &report.removed {
            info!(worker = %id, "execution worker removed");
        }
        report
    }

    /// Strictly increasing per bridge, close to wall time.
    fn next_timestamp(&self, now: u64) -> u64 {
        let mut last = self.last_timestamp.lock();
        let ts = now.max(*last + 1);
        *last = ts;
        ts
    }

    pub async fn dispatch(&self, kind: CommandKind, transaction: Transaction) -> Result<DispatchTicket> {
        if self.pending.lock().len() >= self.max_pending {
            return Err(KernelError::PoolFull(format!("bridge pending table at {}", self.max_pending)));
        }
        let now = now_ms();
        let node = self.registry.write().select_lru(now).ok_or(KernelError::NoAvailableWorker)?;
        let timestamp = self.next_timestamp(now);
        let key = CorrelationKey { worker_id: node.id.clone(), timestamp };
        let tx_hash = transaction.hash;

        let (reply, outcome) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.len() >= self.max_pending {
                return Err(KernelError::PoolFull(format!("bridge pending table at {}", self.max_pending)));
            }
            pending.insert(key.clone(), PendingRequest { tx_hash, dispatched_at: now, reply });
        }

        let envelope = CommandEnvelope { kind, transaction, timestamp };
        if let Err(e) = self.transport.send(&node, envelope).await {
            self.pending.lock().remove(&key);
            warn!(worker = %node.id, "dispatch failed: {}", e);
            return Err(e);
        }
        debug!(worker = %node.id, timestamp, tx = %tx_hash.short(), "command dispatched");
        Ok(DispatchTicket { key, worker_id: node.id, outcome })
    }

    /// Validate, correlate and publish a worker response.
    pub fn on_response(&self, response: ResponseEnvelope) -> Result<ExecutionOutcome> {
        response.validate()?;
        let key = response.key();
        let request = self.pending.lock().remove(&key).ok_or_else(|| KernelError::UnknownRequest {
            worker_id: key.worker_id.clone(),
            timestamp: key.timestamp,
        })?;
        self.registry.write().heartbeat(&key.worker_id, now_ms());

        let status = if response.success {
            ExecutionStatus::Succeeded(response.result.unwrap_or(serde_json::Value::Null))
        } else {
            ExecutionStatus::Failed(response.error.unwrap_or_default())
        };
        let outcome = ExecutionOutcome {
            key,
            tx_hash: request.tx_hash,
            status,
            latency_ms: now_ms().saturating_sub(request.dispatched_at),
        };
        self.publish(request.reply, outcome.clone());
        Ok(outcome)
    }

    /// Fail requests older than `request_timeout`, and requests bound to a
    /// worker that is lost or no longer registered.
    pub fn expire_requests(&self, now: u64) -> Vec<ExecutionOutcome> {
        let expired: Vec<(CorrelationKey, PendingRequest)> = {
            let registry = self.registry.read();
            let mut pending = self.pending.lock();
            let keys: Vec<CorrelationKey> = pending
                .iter()
                .filter(|(key, req)| {
                    let stale = now.saturating_sub(req.dispatched_at) >= self.request_timeout_ms;
                    let gone = !matches!(
                        registry.status(&key.worker_id),
                        Some(NodeStatus::Connected) | Some(NodeStatus::Degraded)
                    );
                    stale || gone
                })
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|k| pending.remove(&k).map(|req| (k, req)))
                .collect()
        };

        expired
            .into_iter()
            .map(|(key, req)| {
                let err = KernelError::WorkerTimeout { worker_id: key.worker_id.clone(), timestamp: key.timestamp };
                warn!(tx = %req.tx_hash.short(), "{}", err);
                let outcome = ExecutionOutcome {
                    key,
                    tx_hash: req.tx_hash,
                    status: ExecutionStatus::TimedOut,
                    latency_ms: now.saturating_sub(req.dispatched_at),
                };
                self.publish(req.reply, outcome.clone());
                outcome
            })
            .collect()
    }

    // ════════════════════════════════════════════════════════════════════════
    // DEFERRED BACKLOG
    // ════════════════════════════════════════════════════════════════════════

    /// Hold a command until a worker can take it.
    ///
    /// # Returns
    ///
    /// `false` if the backlog is full. The command is then published as
    /// undelivered and dropped.
    pub fn defer(&self, kind: CommandKind, transaction: Transaction) -> bool {
        let tx_hash = transaction.hash;
        {
            let mut deferred = self.deferred.lock();
            if deferred.len() < self.max_deferred {
                deferred.push_back(DeferredCommand { kind, transaction });
                debug!(tx = %tx_hash.short(), backlog = deferred.len(), "command deferred");
                drop(deferred);
                self.wake.notify_one();
                return true;
            }
        }
        self.fail_undelivered(tx_hash, format!("deferred backlog full at {}", self.max_deferred));
        false
    }

    /// Publish a failed outcome for a command no worker received.
    pub fn fail_undelivered(&self, tx_hash: Hash, reason: impl Into<String>) -> ExecutionOutcome {
        let reason = reason.into();
        warn!(tx = %tx_hash.short(), "command not delivered: {}", reason);
        let outcome = ExecutionOutcome::undelivered(tx_hash, reason);
        let _ = self.outcomes.send(outcome.clone());
        outcome
    }

    /// Dispatch backlog entries in order until the backlog is empty or the
    /// next entry still has nowhere to go. Returns how many were delivered;
    /// a drain already in progress makes this a no-op.
    pub async fn redeliver(&self) -> usize {
        let Ok(_guard) = self.draining.try_lock() else {
            return 0;
        };
        let mut delivered = 0;
        loop {
            let Some(next) = self.deferred.lock().pop_front() else {
                break;
            };
            let tx_hash = next.transaction.hash;
            match self.dispatch(next.kind, next.transaction.clone()).await {
                Ok(_) => delivered += 1,
                Err(KernelError::NoAvailableWorker) | Err(KernelError::PoolFull(_)) => {
                    self.deferred.lock().push_front(next);
                    break;
                }
                Err(e) => {
                    self.fail_undelivered(tx_hash, e.to_string());
                }
            }
        }
        if delivered > 0 {
            info!(delivered, remaining = self.deferred_len(), "deferred commands delivered");
        }
        delivered
    }

    /// Fail everything still in the backlog.
    pub fn fail_deferred(&self, reason: &str) -> usize {
        let drained: Vec<DeferredCommand> = self.deferred.lock().drain(..).collect();
        for cmd in &drained {
            self.fail_undelivered(cmd.transaction.hash, reason);
        }
        drained.len()
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.lock().len()
    }

    /// Resolves after a worker connects or a command is deferred.
    pub async fn redelivery_wanted(&self) {
        self.wake.notified().await
    }

    fn publish(&self, reply: oneshot::Sender<ExecutionOutcome>, outcome: ExecutionOutcome) {
        // the ticket holder may have dropped the receiver
        let _ = reply.send(outcome.clone());
        let _ = self.outcomes.send(outcome);
    }

    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<ExecutionOutcome> {
        self.outcomes.subscribe()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn nodes(&self) -> Vec<NodeConnection> {
        self.registry.read().list()
    }

    pub fn node_status(&self, id: &str) -> Option<NodeStatus> {
        self.registry.read().status(id)
    }

    pub fn connected_workers(&self) -> usize {
        self.registry.read().connected_count()
    }
}

// ════════════════════════════════════════════════════════════════════════════
// MANAGER TASK
// ════════════════════════════════════════════════════════════════════════════

/// Requests accepted by the bridge manager's command queue.
#[derive(Debug)]
pub enum BridgeCommand {
    Dispatch {
        kind: CommandKind,
        transaction: Transaction,
        reply: oneshot::Sender<Result<DispatchTicket>>,
    },
}

/// Sending side of the bridge manager's queues.
#[derive(Clone)]
pub struct BridgeHandle {
    commands: mpsc::Sender<BridgeCommand>,
    responses: mpsc::Sender<ResponseEnvelope>,
}

impl BridgeHandle {
    pub async fn dispatch(&self, kind: CommandKind, transaction: Transaction) -> Result<DispatchTicket> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(BridgeCommand::Dispatch { kind, transaction, reply })
            .await
            .map_err(|_| KernelError::ShuttingDown)?;
        rx.await.map_err(|_| KernelError::ShuttingDown)?
    }

    /// Queue a worker response; waits for queue capacity.
    pub async fn respond(&self, response: ResponseEnvelope) -> Result<()> {
        self.responses.send(response).await.map_err(|_| KernelError::ShuttingDown)
    }

    pub fn try_respond(&self, response: ResponseEnvelope) -> Result<()> {
        self.responses.try_send(response).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => KernelError::PoolFull("bridge response queue".to_string()),
            mpsc::error::TrySendError::Closed(_) => KernelError::ShuttingDown,
        })
    }
}

/// Owns the bridge's bounded queues, runs the periodic sweep and drains the
/// deferred backlog.
pub struct BridgeManager {
    bridge: Arc<ExecutionBridge>,
    commands: mpsc::Receiver<BridgeCommand>,
    responses: mpsc::Receiver<ResponseEnvelope>,
    sweep_interval: Duration,
    shutdown: Arc<Shutdown>,
}

impl BridgeManager {
    pub fn new(bridge: Arc<ExecutionBridge>, cfg: &BridgeConfig, shutdown: Arc<Shutdown>) -> (Self, BridgeHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(cfg.command_queue.max(1));
        let (resp_tx, resp_rx) = mpsc::channel(cfg.response_queue.max(1));
        let manager = Self {
            bridge,
            commands: cmd_rx,
            responses: resp_rx,
            sweep_interval: Duration::from_millis(cfg.sweep_interval_ms.max(1)),
            shutdown,
        };
        (manager, BridgeHandle { commands: cmd_tx, responses: resp_tx })
    }

    pub fn start(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("bridge manager started: sweeping every {:?}", self.sweep_interval);
            let mut ticker = interval(self.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = self.shutdown.wait() => {
                        info!("bridge manager shutting down");
                        break;
                    }
                    cmd = self.commands.recv() => match cmd {
                        Some(BridgeCommand::Dispatch { kind, transaction, reply }) => {
                            let bridge = self.bridge.clone();
                            tokio::spawn(async move {
                                // caller may have stopped waiting
                                let _ = reply.send(bridge.dispatch(kind, transaction).await);
                            });
                        }
                        None => break,
                    },
                    resp = self.responses.recv() => match resp {
                        Some(resp) => {
                            if let Err(e) = self.bridge.on_response(resp) {
                                warn!(reason = e.reason_code(), "dropped worker response: {}", e);
                            }
                            self.spawn_redelivery();
                        }
                        None => break,
                    },
                    _ = self.bridge.redelivery_wanted() => self.spawn_redelivery(),
                    _ = ticker.tick() => {
                        let now = now_ms();
                        self.bridge.sweep(now);
                        let expired = self.bridge.expire_requests(now);
                        if !expired.is_empty() {
                            debug!(count = expired.len(), "expired pending requests");
                        }
                        self.spawn_redelivery();
                    }
                }
            }
            let failed = self.bridge.fail_deferred("kernel shutting down");
            if failed > 0 {
                warn!(count = failed, "deferred commands failed at shutdown");
            }
        })
    }

    fn spawn_redelivery(&self) {
        if self.bridge.deferred_len() == 0 {
            return;
        }
        let bridge = self.bridge.clone();
        tokio::spawn(async move {
            bridge.redeliver().await;
        });
    }
}
