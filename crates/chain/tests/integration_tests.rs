//! Integration tests for the Aether chain kernel
//! Run with: cargo test --test integration_tests

use std::sync::Arc;

use proptest::prelude::*;

use aether_chain::admission::AdmissionPipeline;
use aether_chain::block::{genesis_block, Block, PocSolution};
use aether_chain::chain::{ProposalOutcome, RoundOutcome};
use aether_chain::config::{load_from_file, KernelConfig};
use aether_chain::crypto::{sha3_256, verify_transaction, OpaqueBlobKem};
use aether_chain::entropy::SeededEntropySource;
use aether_chain::merkle::{empty_root, merkle_root};
use aether_chain::nonce::NonceTracker;
use aether_chain::*;

struct Node {
    crypto: Arc<CryptoFoundation>,
    admission: Arc<AdmissionPipeline>,
    chain: ChainCore,
}

fn node(cfg: KernelConfig) -> Node {
    let crypto = Arc::new(CryptoFoundation::initialize(Arc::new(OpaqueBlobKem)).unwrap());
    let poc = Arc::new(ProofOfContribution::new(&cfg, Arc::new(SeededEntropySource::new(11))));
    let admission = Arc::new(AdmissionPipeline::new(&cfg, crypto.clone(), poc.clone()));
    let chain = ChainCore::new(cfg.chain.clone(), admission.clone(), poc).unwrap();
    Node { crypto, admission, chain }
}

fn signed_tx(crypto: &CryptoFoundation, key: &str, nonce: u64) -> Transaction {
    crypto.register_key(key).unwrap();
    let mut tx = Transaction::builder(Command::call("module", "run", 100))
        .nonce(nonce)
        .gas_price(10)
        .build();
    crypto.sign_transaction(&mut tx, key).unwrap();
    tx
}

/// A proven block on top of the current tip, not yet appended.
fn proven_block(n: &Node, nonce: u64) -> Block {
    let tx = signed_tx(&n.crypto, "alice", nonce);
    n.admission.submit(tx).unwrap();
    match n.chain.propose_block(n.chain.assemble_candidate()).unwrap() {
        ProposalOutcome::Proven(c) => c.block,
        ProposalOutcome::Exhausted { .. } => panic!("difficulty 1.0 always proves"),
    }
}

// ============================================================
// CRYPTO
// ============================================================

#[test]
fn test_sign_and_verify_roundtrip() {
    let crypto = CryptoFoundation::initialize(Arc::new(OpaqueBlobKem)).unwrap();
    let tx = signed_tx(&crypto, "alice", 0);
    assert!(verify_transaction(&tx));
    assert_eq!(tx.signer().unwrap(), hex::encode(crypto.public_key("alice").unwrap()));
}

#[test]
fn test_any_content_mutation_breaks_signature() {
    let crypto = CryptoFoundation::initialize(Arc::new(OpaqueBlobKem)).unwrap();
    let tx = signed_tx(&crypto, "alice", 0);

    let mut nonce_changed = tx.clone();
    nonce_changed.nonce += 1;
    assert!(!verify_transaction(&nonce_changed));

    let mut price_changed = tx.clone();
    price_changed.metadata.gas_price += 1;
    assert!(!verify_transaction(&price_changed));

    // rehashing does not help: the signature is bound to the old hash
    let mut resealed = tx.clone();
    resealed.command.gas_limit = 1;
    let sig = resealed.signature.clone();
    resealed.hash = resealed.compute_hash();
    resealed.signature = sig;
    assert!(!verify_transaction(&resealed));

    let mut truncated = tx;
    if let Some(sig) = truncated.signature.as_mut() {
        sig.r.pop();
    }
    assert!(!verify_transaction(&truncated));
}

#[test]
fn test_rotation_keeps_old_signatures_verifiable() {
    let crypto = CryptoFoundation::initialize(Arc::new(OpaqueBlobKem)).unwrap();
    let before = signed_tx(&crypto, "alice", 0);
    let old_pk = crypto.public_key("alice").unwrap();

    let new_pk = crypto.rotate_key("alice").unwrap();
    assert_ne!(old_pk, new_pk);
    assert_eq!(crypto.key_version("alice").unwrap(), 2);
    assert_eq!(crypto.retired_public_keys("alice").unwrap(), vec![old_pk]);

    // the signature carries its own public key
    assert!(verify_transaction(&before));
    let after = signed_tx(&crypto, "alice", 1);
    assert_ne!(before.signer(), after.signer());
}

#[test]
fn test_unknown_key_is_reported() {
    let crypto = CryptoFoundation::initialize(Arc::new(OpaqueBlobKem)).unwrap();
    assert!(matches!(crypto.sign(&sha3_256(b"x"), "nobody"), Err(KernelError::KeyNotFound(_))));
    assert!(matches!(crypto.rotate_key("nobody"), Err(KernelError::KeyNotFound(_))));
}

// ============================================================
// MERKLE
// ============================================================

#[test]
fn test_merkle_edge_cases() {
    assert_eq!(merkle_root(&[]), empty_root());
    assert_eq!(empty_root(), sha3_256(b""));

    let a = sha3_256(b"a");
    assert_eq!(merkle_root(&[a]), a);

    let b = sha3_256(b"b");
    let c = sha3_256(b"c");
    let ab = sha3_256(&[a.as_bytes().as_slice(), b.as_bytes().as_slice()].concat());
    let cc = sha3_256(&[c.as_bytes().as_slice(), c.as_bytes().as_slice()].concat());
    let root = sha3_256(&[ab.as_bytes().as_slice(), cc.as_bytes().as_slice()].concat());
    assert_eq!(merkle_root(&[a, b, c]), root);
    assert_ne!(merkle_root(&[a, b]), merkle_root(&[b, a]));
}

// ============================================================
// NONCE
// ============================================================

proptest! {
    #[test]
    fn prop_only_next_nonce_is_accepted(advance in 0u64..20, candidate in 0u64..40) {
        let mut tracker = NonceTracker::new();
        for n in 0..advance {
            tracker.check("alice", n).unwrap();
            tracker.advance("alice", n);
        }
        let ok = tracker.check("alice", candidate).is_ok();
        prop_assert_eq!(ok, candidate == advance);
        prop_assert_eq!(tracker.expected("bob"), 0);
    }
}

// ============================================================
// CHAIN VALIDATION
// ============================================================

#[test]
fn test_genesis_is_deterministic() {
    let a = genesis_block().unwrap();
    let b = genesis_block().unwrap();
    assert_eq!(a.hash, b.hash);
    assert!(a.header.previous_hash.is_zero());
    assert_eq!(a.transactions.len(), 1);
}

#[test]
fn test_tampered_header_is_rejected() {
    let n = node(KernelConfig::default());
    let mut block = proven_block(&n, 0);
    block.header.proposer = "mallory".into();
    assert!(matches!(n.chain.validate(&block), Err(KernelError::HeaderHashMismatch { .. })));
}

#[test]
fn test_tampered_body_is_rejected() {
    let n = node(KernelConfig::default());
    let mut block = proven_block(&n, 0);
    block.transactions.push(signed_tx(&n.crypto, "bob", 0));
    assert!(matches!(n.chain.validate(&block), Err(KernelError::MerkleMismatch { .. })));
}

#[test]
fn test_forged_state_root_is_rejected() {
    let n = node(KernelConfig::default());
    let mut block = proven_block(&n, 0);
    let honest = block.header.state_root;
    block.header.state_root = sha3_256(b"forged");
    block.rehash();

    let err = n.chain.validate(&block).unwrap_err();
    assert_eq!(err, KernelError::StateRootMismatch { claimed: sha3_256(b"forged"), computed: honest });
    assert_eq!(err.reason_code(), "state_root_mismatch");
    assert!(n.chain.append(block).is_err());
    assert_eq!(n.chain.height(), 0);
}

#[test]
fn test_missing_or_forged_proof_is_rejected() {
    let n = node(KernelConfig::default());
    let mut block = proven_block(&n, 0);

    block.header.poc_solution = None;
    block.rehash();
    assert!(matches!(n.chain.validate(&block), Err(KernelError::InvalidProof(_))));

    block.header.poc_solution = Some(PocSolution { entropy: sha3_256(b"e"), digest: sha3_256(b"d") });
    block.rehash();
    assert!(matches!(n.chain.validate(&block), Err(KernelError::InvalidProof(_))));
}

#[test]
fn test_difficulty_below_floor_is_rejected() {
    let n = node(KernelConfig::default());
    let mut block = proven_block(&n, 0);
    block.header.difficulty = 0.5;
    block.rehash();
    assert!(matches!(n.chain.validate(&block), Err(KernelError::InvalidProof(_))));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_wrong_parent_is_discontinuous(bytes in proptest::array::uniform32(any::<u8>())) {
        let n = node(KernelConfig::default());
        let mut block = proven_block(&n, 0);
        let forged = Hash::from_bytes(bytes);
        prop_assume!(forged != n.chain.tip_hash());
        block.header.previous_hash = forged;
        block.rehash();
        let is_discontinuity = matches!(n.chain.append(block), Err(KernelError::ChainDiscontinuity { .. }));
        prop_assert!(is_discontinuity);
        prop_assert_eq!(n.chain.height(), 0);
    }
}

#[test]
fn test_consecutive_blocks_link() {
    let n = node(KernelConfig::default());
    for nonce in 0..3 {
        n.admission.submit(signed_tx(&n.crypto, "alice", nonce)).unwrap();
        assert!(matches!(n.chain.produce_once(), RoundOutcome::Appended(_)));
    }
    let blocks = n.chain.blocks();
    assert_eq!(blocks.len(), 4);
    for pair in blocks.windows(2) {
        assert_eq!(pair[1].header.previous_hash, pair[0].hash);
        assert_eq!(pair[1].hash, pair[1].header.compute_hash());
    }
}

// ============================================================
// CONFIG
// ============================================================

#[test]
fn test_config_file_roundtrip() {
    use std::io::Write;

    let mut cfg = KernelConfig::default();
    cfg.chain.proposer_id = "node-z".into();
    cfg.bridge.request_timeout_ms = 1_234;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(toml::to_string(&cfg).unwrap().as_bytes()).unwrap();
    assert_eq!(load_from_file(file.path()).unwrap(), cfg);
}

#[test]
fn test_zero_block_gas_is_rejected() {
    let mut cfg = KernelConfig::default();
    cfg.chain.max_block_gas = 0;
    assert!(matches!(cfg.validate(), Err(KernelError::Config(_))));
}

#[test]
fn test_invalid_config_file_is_rejected() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"[consensus]\nmin_difficulty = 0.5\n").unwrap();
    assert!(matches!(load_from_file(file.path()), Err(KernelError::Config(_))));
    assert!(matches!(load_from_file("/nonexistent/aether.toml"), Err(KernelError::Config(_))));
}
