//! # Aether Chain Kernel
//!
//! Consensus and transaction-admission core of a ledger node. Signed
//! commands are admitted into a pending pool, blocks are sealed with an
//! entropy-sampling contribution proof, and admitted computation is
//! forwarded to external execution workers.
//!
//! ## Module Overview
//!
//! | Module | Fungsi |
//! |--------|--------|
//! | `types` | `Hash` (SHA3-256), hex serde helpers, clock |
//! | `error` | `KernelError` taxonomy and reason codes |
//! | `crypto` | key store, secp256k1 ECDSA, opaque post-quantum blobs |
//! | `tx` | transaction model and content hash |
//! | `entropy` | entropy source contract and implementations |
//! | `consensus` | contribution gate, difficulty retune, anomaly detection, energy |
//! | `tokenomics` | reward pool, 70/20/10 split |
//! | `nonce`, `mempool`, `admission` | admission pipeline |
//! | `merkle`, `block`, `chain`, `producer` | chain core and block production |
//! | `bridge` | execution worker registry, dispatch, response correlation |
//! | `config` | TOML configuration |
//! | `kernel` | composition root and task lifecycle |
//!
//! ## Control Flow
//!
//! ```text
//! submit(tx) ─► verify signature ─► nonce ─► fee ─► contribution gate ─► mempool
//!                                                                          │
//!        ┌──────────── admitted broadcast ◄────────────────────────────────┤
//!        ▼                                                                 ▼
//!   execution bridge ─► worker ─► response            block producer (every block_time)
//!                                                      assemble ─► prove ─► validate ─► append
//! ```

pub mod types;
pub mod error;
pub mod crypto;
pub mod tx;
pub mod entropy;
pub mod consensus;
pub mod tokenomics;
pub mod nonce;
pub mod mempool;
pub mod admission;
pub mod merkle;
pub mod block;
pub mod chain;
pub mod producer;
pub mod bridge;
pub mod config;
pub mod shutdown;
pub mod kernel;

// ════════════════════════════════════════════════════════════════════════════
// RE-EXPORTS
// ════════════════════════════════════════════════════════════════════════════

pub use admission::{AdmissionPipeline, AdmissionReceipt, AdmissionResult};
pub use block::{Block, BlockHeader, BlockStatus, PocSolution};
pub use bridge::{
    ChannelTransport, CommandEnvelope, CommandKind, ExecutionBridge, ExecutionOutcome, ResponseEnvelope,
    WorkerTransport,
};
pub use chain::{AppendReceipt, ChainCore, ChainSnapshot, RoundOutcome};
pub use config::KernelConfig;
pub use consensus::{AnomalyEvent, ConsensusSnapshot, ProofOfContribution};
pub use crypto::CryptoFoundation;
pub use error::{KernelError, Result};
pub use kernel::{Kernel, KernelDeps, KernelHandle};
pub use tx::{Command, Transaction, TxSignature};
pub use types::{Amount, Hash};
