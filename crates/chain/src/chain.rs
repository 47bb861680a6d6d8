//! # Chain Core
//!
//! Append-only in-memory chain rooted at the deterministic genesis block.
//!
//! ```text
//! produce_once:
//!   assemble_candidate ─► propose_block ─► validate ─► append
//!     (Building)          (ProofSearch)    (Validated)  (Appended)
//!                              │               │
//!                          Exhausted ─► skip   └─► Rejected
//! ```
//!
//! `append` re-validates under the chain write lock, so a block built on a
//! tip that moved in the meantime is refused with `ChainDiscontinuity`.
//! Reward distribution and mempool cleanup run under the same lock: once
//! the new tip is visible, its transactions are no longer selectable.
//!
//! Lock order: chain blocks, then admission state, then consensus state.

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::admission::AdmissionPipeline;
use crate::block::{genesis_block, next_state_root, Block, BlockStatus};
use crate::config::ChainConfig;
use crate::consensus::ProofOfContribution;
use crate::error::{KernelError, Result};
use crate::tokenomics::{Distribution, RewardPoolSnapshot};
use crate::types::Hash;

const BLOCK_EVENT_CHANNEL: usize = 64;

/// A block moving through the production state machine.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub block: Block,
    pub status: BlockStatus,
}

impl Candidate {
    fn advance(&mut self, next: BlockStatus) {
        debug_assert!(self.status.can_transition_to(next), "{:?} -> {:?}", self.status, next);
        self.status = next;
    }
}

#[derive(Debug, Clone)]
pub enum ProposalOutcome {
    Proven(Candidate),
    /// Budget ran out. The candidate's transactions stay in the mempool.
    Exhausted { attempts: u64, elapsed: Duration },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendReceipt {
    pub height: u64,
    pub hash: Hash,
    pub tx_count: usize,
    pub removed_from_mempool: usize,
    pub distribution: Distribution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    EmptyMempool,
    ProofExhausted { attempts: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoundOutcome {
    Appended(AppendReceipt),
    Skipped(SkipReason),
    Rejected(KernelError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub height: u64,
    pub tip_hash: Hash,
    pub difficulty: f64,
    pub mempool_len: usize,
    pub reward_pool: RewardPoolSnapshot,
}

pub struct ChainCore {
    blocks: RwLock<Vec<Block>>,
    admission: Arc<AdmissionPipeline>,
    poc: Arc<ProofOfContribution>,
    cfg: ChainConfig,
    block_tx: broadcast::Sender<AppendReceipt>,
}

impl ChainCore {
    /// Build the chain with its genesis block. Failure here is fatal.
    pub fn new(cfg: ChainConfig, admission: Arc<AdmissionPipeline>, poc: Arc<ProofOfContribution>) -> Result<Self> {
        let genesis = genesis_block()?;
        info!(hash = %genesis.hash, "genesis block created");
        let (block_tx, _) = broadcast::channel(BLOCK_EVENT_CHANNEL);
        Ok(Self {
            blocks: RwLock::new(vec![genesis]),
            admission,
            poc,
            cfg,
            block_tx,
        })
    }

    // ════════════════════════════════════════════════════════════════════════
    // PRODUCTION
    // ════════════════════════════════════════════════════════════════════════

    /// Build an unsolved block over the oldest pending transactions.
    pub fn assemble_candidate(&self) -> Candidate {
        let (prev_hash, parent_state) = {
            let blocks = self.blocks.read();
            // chain always holds at least genesis
            let tip = &blocks[blocks.len() - 1];
            (tip.hash, tip.header.state_root)
        };
        let txs = self.admission.select_for_block(self.cfg.max_block_txs, self.cfg.max_block_gas);
        let block = Block::new(
            prev_hash,
            parent_state,
            txs,
            self.poc.difficulty(),
            self.cfg.proposer_id.clone(),
            Utc::now(),
        );
        Candidate { block, status: BlockStatus::Building }
    }

    /// Search for a contribution proof within the attempt and time budget.
    /// Each attempt draws a fresh entropy sample; `header.nonce` records the
    /// attempt index of the winning sample.
    pub fn propose_block(&self, mut candidate: Candidate) -> Result<ProposalOutcome> {
        candidate.advance(BlockStatus::ProofSearch);
        let started = Instant::now();
        let budget = self.cfg.proof_time_budget();
        let difficulty = candidate.block.header.difficulty;

        for attempt in 0..self.cfg.proof_max_attempts {
            if attempt > 0 && started.elapsed() >= budget {
                return Ok(ProposalOutcome::Exhausted { attempts: attempt, elapsed: started.elapsed() });
            }
            candidate.block.header.nonce = attempt;
            let input = candidate.block.header.proof_input();
            if let Some(solution) = self.poc.attempt_proof(&input, difficulty)? {
                candidate.block.header.poc_solution = Some(solution);
                candidate.block.rehash();
                debug!(attempts = attempt + 1, hash = %candidate.block.hash.short(), "proof found");
                return Ok(ProposalOutcome::Proven(candidate));
            }
        }
        Ok(ProposalOutcome::Exhausted {
            attempts: self.cfg.proof_max_attempts,
            elapsed: started.elapsed(),
        })
    }

    /// Validate against the current tip. No state is touched.
    pub fn validate(&self, block: &Block) -> Result<()> {
        let blocks = self.blocks.read();
        self.validate_against(block, &blocks[blocks.len() - 1])
    }

    fn validate_against(&self, block: &Block, tip: &Block) -> Result<()> {
        if block.header.previous_hash != tip.hash {
            return Err(KernelError::ChainDiscontinuity {
                expected: tip.hash,
                got: block.header.previous_hash,
            });
        }
        let computed = block.header.compute_hash();
        if computed != block.hash {
            return Err(KernelError::HeaderHashMismatch { claimed: block.hash, computed });
        }
        let computed = Block::compute_merkle_root(&block.transactions);
        if computed != block.header.merkle_root {
            return Err(KernelError::MerkleMismatch { claimed: block.header.merkle_root, computed });
        }
        let computed = next_state_root(&tip.header.state_root, &block.header.merkle_root);
        if computed != block.header.state_root {
            return Err(KernelError::StateRootMismatch { claimed: block.header.state_root, computed });
        }
        let solution = block
            .header
            .poc_solution
            .as_ref()
            .ok_or_else(|| KernelError::InvalidProof("missing solution".to_string()))?;
        if !self.poc.verify_solution(&block.header.proof_input(), solution, block.header.difficulty) {
            return Err(KernelError::InvalidProof(format!(
                "solution does not meet difficulty {}",
                block.header.difficulty
            )));
        }
        Ok(())
    }

    /// Re-validate against the tip under the write lock and push. Rewards
    /// are distributed and included transactions leave the mempool before
    /// the lock is released.
    pub fn append(&self, block: Block) -> Result<AppendReceipt> {
        let (height, distribution, removed) = {
            let mut blocks = self.blocks.write();
            self.validate_against(&block, &blocks[blocks.len() - 1])?;
            let distribution = self.poc.distribute_rewards(
                block.hash,
                &block.originators(),
                &block.header.proposer,
                block.total_fees(),
            );
            let removed = self.admission.remove_included(&block.tx_hashes());
            blocks.push(block.clone());
            ((blocks.len() - 1) as u64, distribution, removed)
        };

        let receipt = AppendReceipt {
            height,
            hash: block.hash,
            tx_count: block.transactions.len(),
            removed_from_mempool: removed,
            distribution,
        };
        info!(
            height,
            hash = %block.hash.short(),
            txs = receipt.tx_count,
            reward = %receipt.distribution.amount,
            "block appended"
        );
        let _ = self.block_tx.send(receipt.clone());
        Ok(receipt)
    }

    /// One production round. Exhaustion and an empty mempool are skips.
    pub fn produce_once(&self) -> RoundOutcome {
        let candidate = self.assemble_candidate();
        if candidate.block.transactions.is_empty() && self.cfg.skip_empty_blocks {
            debug!("mempool empty, skipping round");
            return RoundOutcome::Skipped(SkipReason::EmptyMempool);
        }

        let mut candidate = match self.propose_block(candidate) {
            Ok(ProposalOutcome::Proven(c)) => c,
            Ok(ProposalOutcome::Exhausted { attempts, elapsed }) => {
                warn!(attempts, ?elapsed, "proof search exhausted, transactions stay pending");
                return RoundOutcome::Skipped(SkipReason::ProofExhausted { attempts });
            }
            Err(e) => {
                warn!("proof search failed: {}", e);
                return RoundOutcome::Rejected(e);
            }
        };

        if let Err(e) = self.validate(&candidate.block) {
            candidate.advance(BlockStatus::Rejected);
            warn!(reason = e.reason_code(), "candidate rejected: {}", e);
            return RoundOutcome::Rejected(e);
        }
        candidate.advance(BlockStatus::Validated);

        match self.append(candidate.block.clone()) {
            Ok(receipt) => {
                candidate.advance(BlockStatus::Appended);
                RoundOutcome::Appended(receipt)
            }
            Err(e) => {
                candidate.advance(BlockStatus::Rejected);
                warn!(reason = e.reason_code(), "append refused: {}", e);
                RoundOutcome::Rejected(e)
            }
        }
    }

    // ════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ════════════════════════════════════════════════════════════════════════

    pub fn blocks(&self) -> Vec<Block> {
        self.blocks.read().clone()
    }

    pub fn block_at(&self, height: u64) -> Option<Block> {
        self.blocks.read().get(height as usize).cloned()
    }

    pub fn tip(&self) -> Block {
        let blocks = self.blocks.read();
        blocks[blocks.len() - 1].clone()
    }

    pub fn tip_hash(&self) -> Hash {
        let blocks = self.blocks.read();
        blocks[blocks.len() - 1].hash
    }

    /// Genesis is height 0.
    pub fn height(&self) -> u64 {
        (self.blocks.read().len() - 1) as u64
    }

    pub fn subscribe_blocks(&self) -> broadcast::Receiver<AppendReceipt> {
        self.block_tx.subscribe()
    }

    pub fn snapshot(&self) -> ChainSnapshot {
        let (height, tip_hash) = {
            let blocks = self.blocks.read();
            ((blocks.len() - 1) as u64, blocks[blocks.len() - 1].hash)
        };
        ChainSnapshot {
            height,
            tip_hash,
            difficulty: self.poc.difficulty(),
            mempool_len: self.admission.len(),
            reward_pool: self.poc.reward_pool(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::crypto::{CryptoFoundation, OpaqueBlobKem};
    use crate::entropy::SeededEntropySource;
    use crate::tx::{Command, Transaction};

    struct Rig {
        crypto: Arc<CryptoFoundation>,
        admission: Arc<AdmissionPipeline>,
        chain: ChainCore,
    }

    fn rig(cfg: KernelConfig) -> Rig {
        let crypto = Arc::new(CryptoFoundation::initialize(Arc::new(OpaqueBlobKem)).expect("crypto"));
        crypto.register_key("alice").expect("alice");
        let poc = Arc::new(ProofOfContribution::new(&cfg, Arc::new(SeededEntropySource::new(5))));
        let admission = Arc::new(AdmissionPipeline::new(&cfg, crypto.clone(), poc.clone()));
        let chain = ChainCore::new(cfg.chain.clone(), admission.clone(), poc).expect("genesis");
        Rig { crypto, admission, chain }
    }

    fn submit(r: &Rig, nonce: u64) -> Transaction {
        let mut tx = Transaction::builder(Command::call("m", "f", 100)).nonce(nonce).gas_price(10).build();
        r.crypto.sign_transaction(&mut tx, "alice").expect("sign");
        r.admission.submit(tx.clone()).expect("admit");
        tx
    }

    #[test]
    fn empty_mempool_skips() {
        let r = rig(KernelConfig::default());
        assert_eq!(r.chain.produce_once(), RoundOutcome::Skipped(SkipReason::EmptyMempool));
        assert_eq!(r.chain.height(), 0);
    }

    #[test]
    fn produce_appends_and_clears_mempool() {
        let r = rig(KernelConfig::default());
        let genesis = r.chain.tip_hash();
        let tx = submit(&r, 0);
        let RoundOutcome::Appended(receipt) = r.chain.produce_once() else {
            panic!("expected append");
        };
        assert_eq!(receipt.height, 1);
        assert_eq!(receipt.removed_from_mempool, 1);
        let block = r.chain.block_at(1).expect("block 1");
        assert_eq!(block.header.previous_hash, genesis);
        assert_eq!(block.header.merkle_root, tx.hash);
        assert!(r.admission.is_empty());
        assert_eq!(r.chain.snapshot().height, 1);
    }

    #[test]
    fn exhaustion_keeps_transactions() {
        let mut cfg = KernelConfig::default();
        cfg.consensus.max_difficulty = 1e18;
        cfg.chain.proof_max_attempts = 3;
        let r = rig(cfg);
        let tx = submit(&r, 0);

        let mut candidate = r.chain.assemble_candidate();
        candidate.block.header.difficulty = 1e18;
        candidate.block.rehash();
        match r.chain.propose_block(candidate).expect("propose") {
            ProposalOutcome::Exhausted { attempts, .. } => assert_eq!(attempts, 3),
            ProposalOutcome::Proven(_) => panic!("1e18 should not be met in 3 attempts"),
        }
        assert!(r.admission.contains(&tx.hash));
    }

    #[test]
    fn stale_candidate_is_discontinuous() {
        let r = rig(KernelConfig::default());
        submit(&r, 0);
        let stale = match r.chain.propose_block(r.chain.assemble_candidate()).expect("propose") {
            ProposalOutcome::Proven(c) => c.block,
            ProposalOutcome::Exhausted { .. } => panic!("difficulty 1.0 always proves"),
        };
        r.chain.append(stale.clone()).expect("first append");
        let err = r.chain.append(stale).unwrap_err();
        assert!(matches!(err, KernelError::ChainDiscontinuity { .. }));
        assert_eq!(r.chain.height(), 1);
    }

    #[test]
    fn concurrent_rounds_never_include_a_transaction_twice() {
        let mut cfg = KernelConfig::default();
        cfg.chain.max_block_txs = 1;
        let r = rig(cfg);
        let submitted: Vec<Hash> = (0..24).map(|n| submit(&r, n).hash).collect();

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..200 {
                        if r.admission.is_empty() {
                            break;
                        }
                        r.chain.produce_once();
                    }
                });
            }
        });

        let blocks = r.chain.blocks();
        let mut included: Vec<Hash> = blocks[1..].iter().flat_map(|b| b.tx_hashes()).collect();
        assert_eq!(included.len(), submitted.len());
        included.sort();
        included.dedup();
        assert_eq!(included.len(), submitted.len());
        assert!(r.admission.is_empty());

        // one block reward per appended block, nothing paid twice
        let reward_pool = r.chain.snapshot().reward_pool;
        let fees: u128 = blocks[1..].iter().map(|b| b.total_fees()).sum();
        assert_eq!(reward_pool.distributed_total, 1_000 * (blocks.len() as u128 - 1) + fees);
    }
}
