//! # Transaction Admission Pipeline
//!
//! Ordered, short-circuit checks for every submitted transaction:
//!
//! | Step | Check | Failure |
//! |------|-------|---------|
//! | 1 | signature present, 32-byte scalars, ECDSA valid | `InvalidSignature` |
//! | 2 | `gas_limit <= chain.max_block_gas` | `GasLimitExceeded` |
//! | 3 | nonce is exactly the signer's next | `ReplayedOrOutOfOrderNonce` |
//! | 4 | `gas_price * gas_limit >= min_fee` | `InsufficientFee` |
//! | 5 | contribution gate on the tx hash | `ContributionProofRejected` |
//! | 6 | mempool has room | `PoolFull` |
//!
//! Block assembly is oldest-first and stops at the first transaction that
//! does not fit, so step 2 keeps every admitted transaction selectable.
//!
//! Steps 1-2 only read the transaction, so they run before the lock. Steps 3-6
//! and the mutation (mempool insert + nonce advance) run under a single
//! write lock, which makes the pipeline the only writer of both. A failed
//! check leaves the state untouched.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::KernelConfig;
use crate::consensus::ProofOfContribution;
use crate::crypto::CryptoFoundation;
use crate::error::{KernelError, Result};
use crate::mempool::Mempool;
use crate::nonce::NonceTracker;
use crate::shutdown::Shutdown;
use crate::tx::Transaction;
use crate::types::Hash;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionReceipt {
    pub hash: Hash,
    pub signer: String,
    pub nonce: u64,
    /// Admission sequence number inside the mempool.
    pub seq: u64,
}

pub type AdmissionResult = Result<AdmissionReceipt>;

/// Broadcast on the `admitted` channel after a successful admission.
#[derive(Debug, Clone)]
pub struct AdmittedTx {
    pub seq: u64,
    pub tx: Transaction,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionStats {
    pub admitted: u64,
    pub rejected: u64,
    pub pending: usize,
}

struct PoolState {
    mempool: Mempool,
    nonces: NonceTracker,
}

pub struct AdmissionPipeline {
    crypto: Arc<CryptoFoundation>,
    poc: Arc<ProofOfContribution>,
    state: RwLock<PoolState>,
    min_fee: u128,
    max_tx_gas: u64,
    admitted_tx: broadcast::Sender<AdmittedTx>,
    admitted: AtomicU64,
    rejected: AtomicU64,
}

impl AdmissionPipeline {
    /// Reads the `admission` section plus `chain.max_block_gas`, the
    /// largest gas limit a single transaction may declare.
    pub fn new(cfg: &KernelConfig, crypto: Arc<CryptoFoundation>, poc: Arc<ProofOfContribution>) -> Self {
        let a = &cfg.admission;
        let (admitted_tx, _) = broadcast::channel(a.admitted_channel.max(1));
        Self {
            crypto,
            poc,
            state: RwLock::new(PoolState {
                mempool: Mempool::new(a.mempool_capacity),
                nonces: NonceTracker::new(),
            }),
            min_fee: a.min_fee as u128,
            max_tx_gas: cfg.chain.max_block_gas,
            admitted_tx,
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn submit(&self, tx: Transaction) -> AdmissionResult {
        let hash = tx.hash;
        match self.admit(tx) {
            Ok(receipt) => {
                self.admitted.fetch_add(1, Ordering::Relaxed);
                info!(tx = %hash.short(), seq = receipt.seq, nonce = receipt.nonce, "transaction admitted");
                Ok(receipt)
            }
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(tx = %hash.short(), reason = e.reason_code(), "transaction rejected: {}", e);
                Err(e)
            }
        }
    }

    fn admit(&self, tx: Transaction) -> AdmissionResult {
        // 1. signature
        if !self.crypto.verify(&tx) {
            return Err(KernelError::InvalidSignature);
        }
        let signer = tx.signer().ok_or(KernelError::InvalidSignature)?;

        // 2. block gas bound
        if tx.gas_limit() > self.max_tx_gas {
            return Err(KernelError::GasLimitExceeded { gas_limit: tx.gas_limit(), max: self.max_tx_gas });
        }

        let mut st = self.state.write();

        // 3. nonce
        st.nonces.check(&signer, tx.nonce)?;

        // 4. fee
        let offered = tx.fee();
        if offered < self.min_fee {
            return Err(KernelError::InsufficientFee { offered, required: self.min_fee });
        }

        // 5. contribution gate
        if !self.poc.gate_transaction(&tx.hash)? {
            return Err(KernelError::ContributionProofRejected { difficulty: self.poc.difficulty() });
        }

        // 6. capacity
        if st.mempool.is_full() {
            return Err(KernelError::PoolFull("mempool".to_string()));
        }

        let nonce = tx.nonce;
        let hash = tx.hash;
        let seq = st.mempool.insert(tx.clone())?;
        st.nonces.advance(&signer, nonce);
        drop(st);

        // receivers may all be gone
        let _ = self.admitted_tx.send(AdmittedTx { seq, tx });
        Ok(AdmissionReceipt { hash, signer, nonce, seq })
    }

    /// Oldest-first candidates for the next block; the mempool is unchanged.
    pub fn select_for_block(&self, max_txs: usize, max_gas: u64) -> Vec<Transaction> {
        self.state.read().mempool.select(max_txs, max_gas)
    }

    /// Drop transactions that made it into an appended block.
    pub fn remove_included(&self, hashes: &[Hash]) -> usize {
        let mut st = self.state.write();
        hashes.iter().filter(|h| st.mempool.remove(h).is_some()).count()
    }

    /// Still-pending transactions admitted with a sequence number in
    /// `from..to`. Used to recover broadcasts a slow subscriber missed.
    pub fn pending_between(&self, from: u64, to: u64) -> Vec<AdmittedTx> {
        self.state
            .read()
            .mempool
            .admitted_between(from, to)
            .into_iter()
            .map(|(seq, tx)| AdmittedTx { seq, tx })
            .collect()
    }

    pub fn evict(&self, hash: &Hash) -> Option<Transaction> {
        let removed = self.state.write().mempool.remove(hash);
        if removed.is_some() {
            warn!(tx = %hash.short(), "transaction evicted");
        }
        removed
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.state.read().mempool.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.state.read().mempool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_nonce(&self, signer: &str) -> Option<u64> {
        self.state.read().nonces.last(signer)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AdmittedTx> {
        self.admitted_tx.subscribe()
    }

    pub fn stats(&self) -> AdmissionStats {
        AdmissionStats {
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            pending: self.len(),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// PROCESSOR TASK
// ════════════════════════════════════════════════════════════════════════════

/// One queued submission with its reply slot.
#[derive(Debug)]
pub struct Submission {
    pub tx: Transaction,
    pub reply: oneshot::Sender<AdmissionResult>,
}

/// Drains the bounded submission queue into the pipeline.
pub struct AdmissionProcessor {
    pipeline: Arc<AdmissionPipeline>,
    rx: mpsc::Receiver<Submission>,
    shutdown: Arc<Shutdown>,
}

impl AdmissionProcessor {
    pub fn new(pipeline: Arc<AdmissionPipeline>, rx: mpsc::Receiver<Submission>, shutdown: Arc<Shutdown>) -> Self {
        Self { pipeline, rx, shutdown }
    }

    pub fn start(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("admission processor started");
            loop {
                tokio::select! {
                    _ = self.shutdown.wait() => {
                        info!("admission processor shutting down");
                        break;
                    }
                    sub = self.rx.recv() => {
                        let Some(sub) = sub else {
                            info!("submission queue closed");
                            break;
                        };
                        let result = self.pipeline.submit(sub.tx);
                        // caller may have stopped waiting
                        let _ = sub.reply.send(result);
                    }
                }
            }
            // reject what is still queued so callers are not left hanging
            self.rx.close();
            while let Ok(sub) = self.rx.try_recv() {
                let _ = sub.reply.send(Err(KernelError::ShuttingDown));
            }
        })
    }
}
