//! Block structure
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::sha3_256;
use crate::error::{KernelError, Result};
use crate::merkle::merkle_root;
use crate::tx::{Command, PrivacyLevel, Transaction, TxMetadata, TxOutput};
use crate::types::{Amount, Hash};

pub const BLOCK_VERSION: u32 = 1;

/// 2024-01-01T00:00:00Z; fixed so every node derives the same genesis.
pub const GENESIS_TIMESTAMP: i64 = 1_704_067_200;
pub const GENESIS_VALIDATOR: &str = "genesis_validator";
/// 21 million tokens at 10^8 base units each.
pub const GENESIS_SUPPLY: Amount = 2_100_000_000_000_000;

/// Entropy sample and resulting digest that satisfied the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PocSolution {
    pub entropy: Hash,
    pub digest: Hash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub previous_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: DateTime<Utc>,
    /// Proof attempt counter.
    pub nonce: u64,
    pub difficulty: f64,
    pub poc_solution: Option<PocSolution>,
    pub proposer: String,
    /// `H(parent.state_root ++ merkle_root)`
    pub state_root: Hash,
}

impl BlockHeader {
    fn encode(&self) -> Vec<u8> {
        // fixed-shape struct with no maps; bincode cannot fail on it
        bincode::serialize(self).expect("block header encodes with bincode")
    }

    pub fn compute_hash(&self) -> Hash {
        sha3_256(&self.encode())
    }

    /// Bytes the contribution proof is computed over: the header with no
    /// solution attached.
    pub fn proof_input(&self) -> Vec<u8> {
        let mut unsolved = self.clone();
        unsolved.poc_solution = None;
        unsolved.encode()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub hash: Hash,
}

impl Block {
    /// Assemble a block over `transactions`; merkle root, state root and
    /// hash are derived here.
    pub fn new(
        previous_hash: Hash,
        parent_state_root: Hash,
        transactions: Vec<Transaction>,
        difficulty: f64,
        proposer: String,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let merkle_root = Self::compute_merkle_root(&transactions);
        let state_root = next_state_root(&parent_state_root, &merkle_root);
        let header = BlockHeader {
            version: BLOCK_VERSION,
            previous_hash,
            merkle_root,
            timestamp,
            nonce: 0,
            difficulty,
            poc_solution: None,
            proposer,
            state_root,
        };
        let hash = header.compute_hash();
        Block { header, transactions, hash }
    }

    pub fn compute_merkle_root(transactions: &[Transaction]) -> Hash {
        let leaves: Vec<Hash> = transactions.iter().map(|t| t.hash).collect();
        merkle_root(&leaves)
    }

    /// Re-derive `hash` after the header changed.
    pub fn rehash(&mut self) {
        self.hash = self.header.compute_hash();
    }

    pub fn tx_hashes(&self) -> Vec<Hash> {
        self.transactions.iter().map(|t| t.hash).collect()
    }

    pub fn total_fees(&self) -> Amount {
        self.transactions.iter().map(|t| t.fee()).fold(0, Amount::saturating_add)
    }

    /// Signers of the included transactions, in block order.
    pub fn originators(&self) -> Vec<String> {
        self.transactions.iter().filter_map(|t| t.signer()).collect()
    }
}

pub fn next_state_root(parent_state_root: &Hash, merkle_root: &Hash) -> Hash {
    crate::crypto::sha3_256_concat(&[parent_state_root.as_bytes(), merkle_root.as_bytes()])
}

/// Lifecycle of a block candidate.
///
/// ```text
/// Building ──► ProofSearch ──► Validated ──► Appended
///                  │               │
///                  └──► Rejected ◄─┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    Building,
    ProofSearch,
    Validated,
    Appended,
    Rejected,
}

impl BlockStatus {
    pub fn can_transition_to(self, next: BlockStatus) -> bool {
        use BlockStatus::*;
        matches!(
            (self, next),
            (Building, ProofSearch)
                | (ProofSearch, Validated)
                | (ProofSearch, Rejected)
                | (Validated, Appended)
                | (Validated, Rejected)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BlockStatus::Appended | BlockStatus::Rejected)
    }
}

/// The deterministic genesis transaction minting the initial supply.
pub fn genesis_transaction() -> Transaction {
    let mut command = Command::call("genesis_module", "initialize", 1_000_000);
    command.parameters.push(serde_json::Value::String("AETHER_CHAIN".to_string()));
    command.privacy = PrivacyLevel::Public;
    Transaction::new(
        Vec::new(),
        vec![TxOutput {
            address: GENESIS_VALIDATOR.to_string(),
            amount: GENESIS_SUPPLY,
            data: "genesis allocation".to_string(),
            lock_script: String::new(),
        }],
        command,
        TxMetadata { timestamp: GENESIS_TIMESTAMP, gas_price: 1, priority: 255, version: 1 },
        0,
    )
}

pub fn genesis_block() -> Result<Block> {
    let timestamp = DateTime::<Utc>::from_timestamp(GENESIS_TIMESTAMP, 0)
        .ok_or_else(|| KernelError::GenesisInitialization("invalid genesis timestamp".to_string()))?;
    let block = Block::new(
        Hash::zero(),
        Hash::zero(),
        vec![genesis_transaction()],
        1.0,
        GENESIS_VALIDATOR.to_string(),
        timestamp,
    );
    bincode::serialize(&block.header)
        .map_err(|e| KernelError::GenesisInitialization(format!("genesis header: {}", e)))?;
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_is_deterministic() {
        let a = genesis_block().expect("genesis");
        let b = genesis_block().expect("genesis");
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.header.previous_hash, Hash::zero());
        assert_eq!(a.transactions[0].outputs[0].amount, GENESIS_SUPPLY);
        assert_eq!(a.header.merkle_root, a.transactions[0].hash);
    }

    #[test]
    fn header_hash_covers_solution_but_proof_input_does_not() {
        let mut block = genesis_block().expect("genesis");
        let input = block.header.proof_input();
        let before = block.header.compute_hash();
        block.header.poc_solution = Some(PocSolution { entropy: Hash::zero(), digest: Hash::zero() });
        assert_eq!(block.header.proof_input(), input);
        assert_ne!(block.header.compute_hash(), before);
    }

    #[test]
    fn header_encoding_is_never_empty() {
        let block = genesis_block().expect("genesis");
        assert!(!block.header.proof_input().is_empty());
        assert_ne!(block.header.compute_hash(), sha3_256(b""));

        let mut moved = block.header.clone();
        moved.proposer = "other".into();
        assert_ne!(moved.compute_hash(), block.header.compute_hash());
    }

    #[test]
    fn status_transitions() {
        use BlockStatus::*;
        assert!(Building.can_transition_to(ProofSearch));
        assert!(ProofSearch.can_transition_to(Rejected));
        assert!(Validated.can_transition_to(Appended));
        assert!(!Building.can_transition_to(Appended));
        assert!(!Appended.can_transition_to(Rejected));
        assert!(Rejected.is_terminal());
    }
}
