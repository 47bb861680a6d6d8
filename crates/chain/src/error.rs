//! # Kernel Error Types
//!
//! Every admission, chain and bridge failure maps to exactly one
//! `KernelError` variant. Validation failures are local and recoverable:
//! the offending transaction or block is discarded and nothing is mutated.
//! Only `CryptoInitialization` and `GenesisInitialization` are fatal, and
//! they can only be produced while the kernel is being built.
//!
//! | Category | Variants |
//! |----------|----------|
//! | Admission | `InvalidSignature`, `ReplayedOrOutOfOrderNonce`, `InsufficientFee`, `GasLimitExceeded`, `ContributionProofRejected`, `DuplicateTransaction`, `PoolFull` |
//! | Chain | `ChainDiscontinuity`, `HeaderHashMismatch`, `MerkleMismatch`, `StateRootMismatch`, `InvalidProof` |
//! | Bridge | `NoAvailableWorker`, `WorkerTimeout`, `InvalidEnvelope`, `UnknownRequest`, `Transport` |
//! | Keys / entropy | `KeyNotFound`, `EntropyUnavailable` |
//! | Startup | `CryptoInitialization`, `GenesisInitialization`, `Config` |

use thiserror::Error;

use crate::types::Hash;

pub type Result<T> = std::result::Result<T, KernelError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum KernelError {
    // ════════════════════════════════════════════════════════════════════════
    // ADMISSION
    // ════════════════════════════════════════════════════════════════════════

    /// Signature missing, malformed, or not valid for the transaction hash.
    #[error("invalid signature")]
    InvalidSignature,

    /// Nonce is a replay or leaves a gap.
    #[error("replayed or out-of-order nonce for {signer}: expected {expected}, got {got}")]
    ReplayedOrOutOfOrderNonce {
        signer: String,
        expected: u64,
        got: u64,
    },

    /// `gas_price * gas_limit` below the admission floor.
    #[error("insufficient fee: offered {offered}, required {required}")]
    InsufficientFee {
        offered: u128,
        required: u128,
    },

    /// A single transaction that could never fit in a block.
    #[error("gas limit {gas_limit} exceeds block gas limit {max}")]
    GasLimitExceeded {
        gas_limit: u64,
        max: u64,
    },

    #[error("contribution proof rejected at difficulty {difficulty}")]
    ContributionProofRejected {
        difficulty: f64,
    },

    #[error("transaction {0} already in mempool")]
    DuplicateTransaction(Hash),

    /// A bounded queue or table is at capacity.
    #[error("pool full: {0}")]
    PoolFull(String),

    // ════════════════════════════════════════════════════════════════════════
    // CHAIN
    // ════════════════════════════════════════════════════════════════════════

    #[error("chain discontinuity: expected previous hash {expected}, got {got}")]
    ChainDiscontinuity {
        expected: Hash,
        got: Hash,
    },

    #[error("header hash mismatch: block claims {claimed}, header hashes to {computed}")]
    HeaderHashMismatch {
        claimed: Hash,
        computed: Hash,
    },

    #[error("merkle mismatch: header commits {claimed}, transactions give {computed}")]
    MerkleMismatch {
        claimed: Hash,
        computed: Hash,
    },

    #[error("state root mismatch: header commits {claimed}, parent state gives {computed}")]
    StateRootMismatch {
        claimed: Hash,
        computed: Hash,
    },

    #[error("invalid contribution proof: {0}")]
    InvalidProof(String),

    // ════════════════════════════════════════════════════════════════════════
    // BRIDGE
    // ════════════════════════════════════════════════════════════════════════

    #[error("no available worker")]
    NoAvailableWorker,

    #[error("worker {worker_id} timed out on request {timestamp}")]
    WorkerTimeout {
        worker_id: String,
        timestamp: u64,
    },

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("no pending request for worker {worker_id} at {timestamp}")]
    UnknownRequest {
        worker_id: String,
        timestamp: u64,
    },

    #[error("transport error: {0}")]
    Transport(String),

    // ════════════════════════════════════════════════════════════════════════
    // KEYS / ENTROPY
    // ════════════════════════════════════════════════════════════════════════

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("entropy source unavailable: {0}")]
    EntropyUnavailable(String),

    #[error("malformed value: {0}")]
    Malformed(String),

    // ════════════════════════════════════════════════════════════════════════
    // STARTUP
    // ════════════════════════════════════════════════════════════════════════

    #[error("failed to initialize cryptographic foundation: {0}")]
    CryptoInitialization(String),

    #[error("failed to initialize genesis block: {0}")]
    GenesisInitialization(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("kernel is shutting down")]
    ShuttingDown,
}

impl KernelError {
    /// Stable machine-readable reason code for external callers.
    pub fn reason_code(&self) -> &'static str {
        match self {
            KernelError::InvalidSignature => "invalid_signature",
            KernelError::ReplayedOrOutOfOrderNonce { .. } => "replayed_or_out_of_order_nonce",
            KernelError::InsufficientFee { .. } => "insufficient_fee",
            KernelError::GasLimitExceeded { .. } => "gas_limit_exceeded",
            KernelError::ContributionProofRejected { .. } => "contribution_proof_rejected",
            KernelError::DuplicateTransaction(_) => "duplicate_transaction",
            KernelError::PoolFull(_) => "pool_full",
            KernelError::ChainDiscontinuity { .. } => "chain_discontinuity",
            KernelError::HeaderHashMismatch { .. } => "header_hash_mismatch",
            KernelError::MerkleMismatch { .. } => "merkle_mismatch",
            KernelError::StateRootMismatch { .. } => "state_root_mismatch",
            KernelError::InvalidProof(_) => "invalid_proof",
            KernelError::NoAvailableWorker => "no_available_worker",
            KernelError::WorkerTimeout { .. } => "worker_timeout",
            KernelError::InvalidEnvelope(_) => "invalid_envelope",
            KernelError::UnknownRequest { .. } => "unknown_request",
            KernelError::Transport(_) => "transport",
            KernelError::KeyNotFound(_) => "key_not_found",
            KernelError::EntropyUnavailable(_) => "entropy_unavailable",
            KernelError::Malformed(_) => "malformed",
            KernelError::CryptoInitialization(_) => "crypto_initialization",
            KernelError::GenesisInitialization(_) => "genesis_initialization",
            KernelError::Config(_) => "config",
            KernelError::ShuttingDown => "shutting_down",
        }
    }

    /// True for the two conditions that must abort startup.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            KernelError::CryptoInitialization(_) | KernelError::GenesisInitialization(_)
        )
    }
}
